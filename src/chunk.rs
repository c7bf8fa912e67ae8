//! Scan buffers built from a document.
//!
//! A [`TextChunk`] holds the characters a scan walks over, and for each position the document
//! offsets a match starting or ending there maps to, plus whether a match may start or end
//! there at all.

use std::ops::Range;

use crate::document::{Annotation, Document};
use crate::features::FeatureValue;

const VALID_START: u8 = 1;
const VALID_END: u8 = 2;

/// Word-boundary policy of a chunk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Boundaries {
    /// Matches may only start at the first character of a word.
    pub word_start_only: bool,

    /// Matches may only end at the last character of a word.
    pub word_end_only: bool,
}

/// Annotation types and feature a chunk is built from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WordSource<'a> {
    pub word_type: &'a str,
    pub space_type: &'a str,

    /// Feature of word annotations that supplies the text. When `None`, the covered document
    /// text is used.
    pub text_feature: Option<&'a str>,
}

/// A normalized scan buffer with offset mapping and boundary flags.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TextChunk {
    chars: Vec<char>,
    starts: Vec<usize>,
    ends: Vec<usize>,
    flags: Vec<u8>,
}

impl TextChunk {
    /// Builds a chunk from `text[range]`. Every character maps to its own offsets.
    ///
    /// With a boundary policy, a word is a maximal run of alphanumeric characters, judged
    /// against the whole `text`.
    pub fn from_text(text: &str, range: Range<usize>, boundaries: Boundaries) -> Self {
        let mut chunk = Self::default();
        let Some(slice) = text.get(range.clone()) else {
            return chunk;
        };
        let mut prev = text[..range.start].chars().next_back();
        let mut iter = slice.char_indices().peekable();
        while let Some((i, c)) = iter.next() {
            let start = range.start + i;
            let end = start + c.len_utf8();
            let next = text[end..].chars().next();
            let word = c.is_alphanumeric();
            let valid_start =
                !boundaries.word_start_only || (word && !prev.map_or(false, char::is_alphanumeric));
            let valid_end =
                !boundaries.word_end_only || (word && !next.map_or(false, char::is_alphanumeric));
            chunk.push(c, start, end, valid_start, valid_end);
            prev = Some(c);
        }
        chunk
    }

    /// Builds a chunk from the word and space annotations inside `range`.
    ///
    /// The characters of each word are appended in document order. A run of space annotations
    /// becomes a single `' '`, which is never a valid match boundary. When the text comes from
    /// a feature, every character of a word maps to the whole word span.
    pub fn from_annotations(
        doc: &Document,
        range: Range<usize>,
        source: &WordSource,
        boundaries: Boundaries,
    ) -> Self {
        let mut chunk = Self::default();
        let mut anns: Vec<&Annotation> = doc
            .annotations()
            .iter()
            .filter(|a| {
                (a.annotation_type == source.word_type || a.annotation_type == source.space_type)
                    && a.is_within(&range)
            })
            .collect();
        anns.sort_by_key(|a| a.start);

        let mut first_space = true;
        for ann in anns {
            if ann.annotation_type == source.word_type {
                let before = chunk.len();
                match source.text_feature {
                    Some(feature) => {
                        let text = match ann.features.get(feature) {
                            Some(FeatureValue::String(s)) => s.clone(),
                            Some(v) => v.to_string(),
                            None => continue,
                        };
                        let last = text.chars().count().saturating_sub(1);
                        for (j, c) in text.chars().enumerate() {
                            chunk.push(
                                c,
                                ann.start,
                                ann.end,
                                !boundaries.word_start_only || j == 0,
                                !boundaries.word_end_only || j == last,
                            );
                        }
                    }
                    None => {
                        let Some(text) = doc.slice(ann.span()) else {
                            continue;
                        };
                        let last = text.chars().count().saturating_sub(1);
                        for (j, (i, c)) in text.char_indices().enumerate() {
                            let start = ann.start + i;
                            chunk.push(
                                c,
                                start,
                                start + c.len_utf8(),
                                !boundaries.word_start_only || j == 0,
                                !boundaries.word_end_only || j == last,
                            );
                        }
                    }
                }
                // Words without text do not reopen the space run.
                if chunk.len() > before {
                    first_space = true;
                }
            } else if first_space {
                first_space = false;
                chunk.push(' ', ann.start, ann.end, false, false);
            }
        }
        chunk
    }

    fn push(&mut self, c: char, start: usize, end: usize, valid_start: bool, valid_end: bool) {
        self.chars.push(c);
        self.starts.push(start);
        self.ends.push(end);
        let mut flags = 0;
        if valid_start {
            flags |= VALID_START;
        }
        if valid_end {
            flags |= VALID_END;
        }
        self.flags.push(flags);
    }

    /// Returns the number of positions.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.chars.len()
    }

    /// Checks if the chunk has no positions.
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// Returns the characters of the chunk.
    #[inline(always)]
    pub fn chars(&self) -> &[char] {
        &self.chars
    }

    /// Returns the document offset a match starting at `pos` begins at.
    #[inline(always)]
    pub fn start_offset(&self, pos: usize) -> usize {
        self.starts[pos]
    }

    /// Returns the exclusive document offset a match ending at `pos` ends at.
    #[inline(always)]
    pub fn end_offset(&self, pos: usize) -> usize {
        self.ends[pos]
    }

    /// Checks if a match may start at `pos`.
    #[inline(always)]
    pub fn is_valid_start(&self, pos: usize) -> bool {
        self.flags.get(pos).map_or(false, |f| f & VALID_START != 0)
    }

    /// Checks if a match may end at `pos`.
    #[inline(always)]
    pub fn is_valid_end(&self, pos: usize) -> bool {
        self.flags.get(pos).map_or(false, |f| f & VALID_END != 0)
    }

    /// Returns the first position at or after `pos` where a match may start.
    #[inline(always)]
    pub fn next_valid_start(&self, pos: usize) -> Option<usize> {
        (pos..self.len()).find(|&p| self.is_valid_start(p))
    }

    /// Returns the chunk text between positions `first` and `last`, both inclusive.
    pub fn text(&self, first: usize, last: usize) -> String {
        self.chars
            .get(first..=last)
            .map(|cs| cs.iter().collect())
            .unwrap_or_default()
    }

    /// Returns the whole chunk text.
    pub fn to_text(&self) -> String {
        self.chars.iter().collect()
    }
}
