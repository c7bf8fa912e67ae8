//! Transition tables of multi-way states.
//!
//! A table maps characters to target state ids and is addressed by a map id. During
//! construction the tables live in [`CharMapPhase1`], one sorted vector per table. Compaction
//! converts them into a [`CharMapPhase2`], which flattens every table into one contiguous
//! [`BlobStore`] and no longer accepts mutations.

use crate::blob::BlobStore;
use crate::errors::{GazetteerError, Result};
use crate::serializer::{deserialize_vec, serialize_slice, Deserialize, Serialize};

/// Size of one flattened entry: `| char: u32 | target: u32 |`.
const ENTRY_LEN: usize = 8;

/// Read access to transition tables, shared by both phases.
pub trait Transitions {
    /// Returns the target of the transition from table `map` with `c`.
    fn next(&self, map: u32, c: char) -> Option<u32>;

    /// Returns the number of tables.
    fn num_maps(&self) -> usize;

    /// Returns the total amount of heap used by the tables in bytes.
    fn heap_bytes(&self) -> usize;
}

/// Growable transition tables used while the automaton is built.
#[derive(Clone, Default, Debug)]
pub struct CharMapPhase1 {
    tables: Vec<Vec<(char, u32)>>,
}

impl CharMapPhase1 {
    /// Creates an empty set of tables.
    pub const fn new() -> Self {
        Self { tables: vec![] }
    }

    /// Inserts or overwrites the transition `c -> target`.
    ///
    /// When `map` is `None`, a new table is created. Returns the id of the table holding the
    /// transition.
    ///
    /// # Errors
    ///
    /// [`GazetteerError`] is returned when `map` is not a valid table id or the number of
    /// tables exceeds `u32::MAX`.
    pub fn put(&mut self, map: Option<u32>, c: char, target: u32) -> Result<u32> {
        let map = match map {
            Some(map) => map,
            None => {
                let map = u32::try_from(self.tables.len()).map_err(|_| {
                    GazetteerError::invalid_operation("put", "too many transition tables")
                })?;
                self.tables.push(vec![]);
                map
            }
        };
        let table = self.table_mut("put", map)?;
        match table.binary_search_by_key(&c, |&(k, _)| k) {
            Ok(i) => table[i].1 = target,
            Err(i) => table.insert(i, (c, target)),
        }
        Ok(map)
    }

    /// Redirects the existing transition `c -> old` to `c -> new`.
    ///
    /// # Errors
    ///
    /// [`GazetteerError`] is returned when the transition does not exist or does not currently
    /// lead to `old`.
    pub fn replace(&mut self, map: u32, c: char, new: u32, old: u32) -> Result<()> {
        let table = self.table_mut("replace", map)?;
        let i = table
            .binary_search_by_key(&c, |&(k, _)| k)
            .map_err(|_| {
                GazetteerError::invalid_operation(
                    "replace",
                    format!("no transition for {c:?} in table {map}"),
                )
            })?;
        if table[i].1 != old {
            return Err(GazetteerError::invalid_operation(
                "replace",
                format!(
                    "transition for {c:?} in table {map} leads to {}, not {old}",
                    table[i].1
                ),
            ));
        }
        table[i].1 = new;
        Ok(())
    }

    /// Flattens all tables into an immutable [`CharMapPhase2`].
    ///
    /// # Errors
    ///
    /// [`GazetteerError`] is returned when a table is too large to be flattened.
    pub fn compact(self) -> Result<CharMapPhase2> {
        let mut blob = BlobStore::new();
        let mut offsets = Vec::with_capacity(self.tables.len());
        let mut buf = vec![];
        for table in self.tables {
            buf.clear();
            for (c, target) in table {
                buf.extend_from_slice(&u32::from(c).to_le_bytes());
                buf.extend_from_slice(&target.to_le_bytes());
            }
            offsets.push(blob.add_variable(&buf)?);
        }
        blob.shrink_to_fit();
        Ok(CharMapPhase2 { blob, offsets })
    }

    fn table_mut(&mut self, op: &'static str, map: u32) -> Result<&mut Vec<(char, u32)>> {
        self.tables.get_mut(map as usize).ok_or_else(|| {
            GazetteerError::invalid_operation(op, format!("unknown transition table {map}"))
        })
    }
}

impl Transitions for CharMapPhase1 {
    #[inline(always)]
    fn next(&self, map: u32, c: char) -> Option<u32> {
        let table = self.tables.get(map as usize)?;
        table
            .binary_search_by_key(&c, |&(k, _)| k)
            .ok()
            .map(|i| table[i].1)
    }

    fn num_maps(&self) -> usize {
        self.tables.len()
    }

    fn heap_bytes(&self) -> usize {
        self.tables.capacity() * std::mem::size_of::<Vec<(char, u32)>>()
            + self
                .tables
                .iter()
                .map(|t| t.capacity() * std::mem::size_of::<(char, u32)>())
                .sum::<usize>()
    }
}

/// Immutable transition tables flattened into one blob.
#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct CharMapPhase2 {
    blob: BlobStore,
    offsets: Vec<u64>,
}

impl CharMapPhase2 {
    #[inline(always)]
    fn entries(&self, map: u32) -> Option<&[u8]> {
        let offset = *self.offsets.get(map as usize)?;
        self.blob.get_variable(offset).ok()
    }

    /// Iterates over the transitions of table `map` in character order.
    pub fn iter(&self, map: u32) -> impl Iterator<Item = (char, u32)> + '_ {
        self.entries(map)
            .unwrap_or_default()
            .chunks_exact(ENTRY_LEN)
            .filter_map(decode_entry)
    }

    /// Checks that every table is well formed and sorted.
    pub(crate) fn validate(&self) -> Result<()> {
        for (map, &offset) in self.offsets.iter().enumerate() {
            let entries = self.blob.get_variable(offset)?;
            if entries.len() % ENTRY_LEN != 0 {
                return Err(GazetteerError::format(format!(
                    "transition table {map} has a partial entry"
                )));
            }
            let mut prev = None;
            for entry in entries.chunks_exact(ENTRY_LEN) {
                let (c, _) = decode_entry(entry).ok_or_else(|| {
                    GazetteerError::format(format!("transition table {map} holds a non-char key"))
                })?;
                if prev.map_or(false, |p| p >= c) {
                    return Err(GazetteerError::format(format!(
                        "transition table {map} is not sorted"
                    )));
                }
                prev = Some(c);
            }
        }
        Ok(())
    }
}

#[inline(always)]
fn decode_entry(entry: &[u8]) -> Option<(char, u32)> {
    let mut c = [0; 4];
    let mut target = [0; 4];
    c.copy_from_slice(entry.get(..4)?);
    target.copy_from_slice(entry.get(4..ENTRY_LEN)?);
    Some((
        char::from_u32(u32::from_le_bytes(c))?,
        u32::from_le_bytes(target),
    ))
}

impl Transitions for CharMapPhase2 {
    #[inline(always)]
    fn next(&self, map: u32, c: char) -> Option<u32> {
        let entries = self.entries(map)?;
        let key = u32::from(c);
        let (mut lo, mut hi) = (0, entries.len() / ENTRY_LEN);
        while lo < hi {
            let mid = (lo + hi) / 2;
            let entry = &entries[mid * ENTRY_LEN..(mid + 1) * ENTRY_LEN];
            let mut k = [0; 4];
            k.copy_from_slice(&entry[..4]);
            let k = u32::from_le_bytes(k);
            if k == key {
                let mut target = [0; 4];
                target.copy_from_slice(&entry[4..]);
                return Some(u32::from_le_bytes(target));
            } else if k < key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        None
    }

    fn num_maps(&self) -> usize {
        self.offsets.len()
    }

    fn heap_bytes(&self) -> usize {
        self.blob.heap_bytes() + self.offsets.capacity() * std::mem::size_of::<u64>()
    }
}

impl Serialize for CharMapPhase2 {
    fn to_vec(&self, dst: &mut Vec<u8>) {
        self.blob.to_vec(dst);
        serialize_slice(&self.offsets, dst);
    }
}

impl Deserialize for CharMapPhase2 {
    fn from_slice(src: &[u8]) -> Result<(Self, &[u8])> {
        let (blob, src) = BlobStore::from_slice(src)?;
        let (offsets, src) = deserialize_vec(src)?;
        let charmaps = Self { blob, offsets };
        charmaps.validate()?;
        Ok((charmaps, src))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase1_sorted_insert() {
        let mut maps = CharMapPhase1::new();
        let m = maps.put(None, 'm', 1).unwrap();
        assert_eq!(maps.put(Some(m), 'a', 2).unwrap(), m);
        assert_eq!(maps.put(Some(m), 'z', 3).unwrap(), m);
        let n = maps.put(None, 'a', 9).unwrap();
        assert_ne!(m, n);

        assert_eq!(maps.next(m, 'a'), Some(2));
        assert_eq!(maps.next(m, 'm'), Some(1));
        assert_eq!(maps.next(m, 'z'), Some(3));
        assert_eq!(maps.next(m, 'b'), None);
        assert_eq!(maps.next(n, 'a'), Some(9));
        assert_eq!(maps.next(42, 'a'), None);
        assert!(maps.put(Some(42), 'a', 1).is_err());
    }

    #[test]
    fn test_phase1_replace() {
        let mut maps = CharMapPhase1::new();
        let m = maps.put(None, 'x', 5).unwrap();
        assert!(maps.replace(m, 'x', 6, 4).unwrap_err().is_invalid_operation());
        assert!(maps.replace(m, 'y', 6, 5).unwrap_err().is_invalid_operation());
        maps.replace(m, 'x', 6, 5).unwrap();
        assert_eq!(maps.next(m, 'x'), Some(6));
    }

    #[test]
    fn test_compaction_keeps_transitions() {
        let mut maps = CharMapPhase1::new();
        let m = maps.put(None, 'ä', 10).unwrap();
        maps.put(Some(m), 'b', 11).unwrap();
        maps.put(Some(m), '漢', 12).unwrap();
        let empty = maps.put(None, 'q', 0).unwrap();
        let expected: Vec<_> = ['b', 'q', 'ä', '漢', 'c']
            .iter()
            .map(|&c| (maps.next(m, c), maps.next(empty, c)))
            .collect();

        let maps = maps.compact().unwrap();
        let actual: Vec<_> = ['b', 'q', 'ä', '漢', 'c']
            .iter()
            .map(|&c| (maps.next(m, c), maps.next(empty, c)))
            .collect();
        assert_eq!(expected, actual);
        assert_eq!(maps.num_maps(), 2);
        assert_eq!(
            maps.iter(m).collect::<Vec<_>>(),
            vec![('b', 11), ('ä', 10), ('漢', 12)]
        );
    }

    #[test]
    fn test_phase2_serialization_validates() {
        let mut maps = CharMapPhase1::new();
        let m = maps.put(None, 'a', 1).unwrap();
        maps.put(Some(m), 'b', 2).unwrap();
        let maps = maps.compact().unwrap();

        let mut buf = vec![];
        maps.to_vec(&mut buf);
        let (other, rest) = CharMapPhase2::from_slice(&buf).unwrap();
        assert!(rest.is_empty());
        assert_eq!(maps, other);

        assert!(CharMapPhase2::from_slice(&buf[..buf.len() - 1]).is_err());
    }
}
