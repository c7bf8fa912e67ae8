//! Longest-match and all-matches scanning of a [`TextChunk`].

use std::sync::atomic::{AtomicBool, Ordering};

use crate::casefold::CaseFolder;
use crate::chunk::TextChunk;
use crate::errors::{GazetteerError, Result};
use crate::store::{GazStore, State};

/// Number of chunk positions processed between two checks of the interrupt flag.
pub const INTERRUPT_CHECK_INTERVAL: usize = 256;

/// A match found in a chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkMatch<'a> {
    /// Chunk position of the first matched character.
    pub first: usize,

    /// Chunk position of the last matched character.
    pub last: usize,

    /// Final state reached by the match.
    pub state: State<'a>,
}

/// Walks chunks through the automaton of a [`GazStore`].
///
/// Matching starts at every valid start position. From each start the scanner follows the
/// automaton as far as it can and remembers the last final state that ends at a valid end
/// position. Once the walk fails or reaches the end of the chunk, the remembered match is
/// emitted and scanning resumes at the next valid start after the current start.
#[derive(Clone, Copy)]
pub struct Scanner<'a> {
    store: &'a GazStore,
    folder: Option<&'a CaseFolder>,
    longest_match_only: bool,
    interrupt: Option<&'a AtomicBool>,
}

impl<'a> Scanner<'a> {
    /// Creates a scanner reporting only the longest match from each start.
    pub const fn new(store: &'a GazStore) -> Self {
        Self {
            store,
            folder: None,
            longest_match_only: true,
            interrupt: None,
        }
    }

    /// Folds input characters before matching. Use the folder the store was built with.
    #[must_use]
    pub const fn case_folder(mut self, folder: Option<&'a CaseFolder>) -> Self {
        self.folder = folder;
        self
    }

    /// Reports every match from each start instead of only the longest one.
    #[must_use]
    pub const fn longest_match_only(mut self, yes: bool) -> Self {
        self.longest_match_only = yes;
        self
    }

    /// Aborts the scan with [`GazetteerError::Interrupted`] once `flag` is set.
    #[must_use]
    pub const fn interrupt(mut self, flag: Option<&'a AtomicBool>) -> Self {
        self.interrupt = flag;
        self
    }

    /// Scans `chunk` and passes every match to `emit` in order of discovery.
    ///
    /// # Errors
    ///
    /// [`GazetteerError::Interrupted`] is returned when the interrupt flag is set.
    pub fn scan<F>(&self, chunk: &TextChunk, mut emit: F) -> Result<()>
    where
        F: FnMut(ChunkMatch<'a>),
    {
        let chars = chunk.chars();
        let root = self.store.initial_state();
        let Some(mut pos) = chunk.next_valid_start(0) else {
            return Ok(());
        };
        let mut region_start = pos;
        let mut state = root;
        let mut pending: Option<(usize, State<'a>)> = None;
        let mut steps = 0;

        while pos < chars.len() {
            steps += 1;
            if steps % INTERRUPT_CHECK_INTERVAL == 0 && self.is_interrupted() {
                return Err(GazetteerError::interrupted(pos));
            }

            let c = self.folder.map_or(chars[pos], |f| f.fold_char(chars[pos]));
            let restart = match state.next(c) {
                None => true,
                Some(next) => {
                    state = next;
                    if state.is_final()
                        && chunk.is_valid_start(region_start)
                        && chunk.is_valid_end(pos)
                    {
                        if !self.longest_match_only {
                            if let Some((last, s)) = pending.take() {
                                emit(ChunkMatch {
                                    first: region_start,
                                    last,
                                    state: s,
                                });
                            }
                        }
                        pending = Some((pos, state));
                    }
                    pos += 1;
                    pos == chars.len()
                }
            };

            if restart {
                if let Some((last, s)) = pending.take() {
                    emit(ChunkMatch {
                        first: region_start,
                        last,
                        state: s,
                    });
                }
                match chunk.next_valid_start(region_start + 1) {
                    Some(p) => {
                        pos = p;
                        region_start = p;
                        state = root;
                    }
                    None => break,
                }
            }
        }

        if let Some((last, s)) = pending {
            emit(ChunkMatch {
                first: region_start,
                last,
                state: s,
            });
        }
        Ok(())
    }

    /// Scans `chunk` and collects all matches.
    ///
    /// # Errors
    ///
    /// [`GazetteerError::Interrupted`] is returned when the interrupt flag is set.
    pub fn find_all(&self, chunk: &TextChunk) -> Result<Vec<ChunkMatch<'a>>> {
        let mut matches = vec![];
        self.scan(chunk, |m| matches.push(m))?;
        Ok(matches)
    }

    fn is_interrupted(&self) -> bool {
        self.interrupt
            .map_or(false, |flag| flag.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::chunk::Boundaries;
    use crate::features::FeatureMap;

    fn build(entries: &[&str]) -> GazStore {
        let mut store = GazStore::new();
        let list = store.add_list_info("Lookup", "test", FeatureMap::new()).unwrap();
        for entry in entries {
            store.add_lookup(entry, list, &[("e", entry)]).unwrap();
        }
        store.compact().unwrap();
        store
    }

    fn spans(scanner: &Scanner, text: &str, boundaries: Boundaries) -> Vec<(usize, usize)> {
        let chunk = TextChunk::from_text(text, 0..text.len(), boundaries);
        scanner
            .find_all(&chunk)
            .unwrap()
            .into_iter()
            .map(|m| (chunk.start_offset(m.first), chunk.end_offset(m.last)))
            .collect()
    }

    #[test]
    fn test_longest_and_all() {
        let store = build(&["New", "New York"]);
        let longest = Scanner::new(&store);
        assert_eq!(
            spans(&longest, "New York City", Boundaries::default()),
            vec![(0, 8)]
        );
        let all = longest.longest_match_only(false);
        assert_eq!(
            spans(&all, "New York City", Boundaries::default()),
            vec![(0, 3), (0, 8)]
        );
    }

    #[test]
    fn test_overlapping_restart() {
        let store = build(&["ab", "bcd"]);
        let scanner = Scanner::new(&store);
        assert_eq!(
            spans(&scanner, "xabcd", Boundaries::default()),
            vec![(1, 3), (2, 5)]
        );
    }

    #[test]
    fn test_match_at_chunk_end_and_restart() {
        let store = build(&["aaa", "a"]);
        let scanner = Scanner::new(&store);
        assert_eq!(
            spans(&scanner, "aa", Boundaries::default()),
            vec![(0, 1), (1, 2)]
        );
    }

    #[test]
    fn test_case_folding() {
        let store = build(&["BERLIN"]);
        let folder = CaseFolder::default();
        let scanner = Scanner::new(&store).case_folder(Some(&folder));
        assert_eq!(
            spans(&scanner, "in Berlin", Boundaries::default()),
            vec![(3, 9)]
        );
        assert!(spans(&Scanner::new(&store), "in Berlin", Boundaries::default()).is_empty());
    }

    #[test]
    fn test_interrupt() {
        let store = build(&["x"]);
        let flag = AtomicBool::new(true);
        let scanner = Scanner::new(&store).interrupt(Some(&flag));
        let text = "y".repeat(INTERRUPT_CHECK_INTERVAL * 2);
        let chunk = TextChunk::from_text(&text, 0..text.len(), Boundaries::default());
        assert!(scanner.find_all(&chunk).unwrap_err().is_interrupted());

        flag.store(false, Ordering::Relaxed);
        assert!(scanner.find_all(&chunk).unwrap().is_empty());
    }
}
