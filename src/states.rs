//! Fixed-size state records and the store that owns them.
//!
//! Every state is a 16-byte record in a [`BlobStore`], addressed by its id:
//!
//! ```text
//! | payload pointer + tag: u64 | next state or table id: u32 | char or 0: u32 |
//! ```
//!
//! The tag bit tells a single-edge state from a multi-way state, so both variants fit the same
//! stride and a state keeps its id when it is promoted.

use std::fmt;

use crate::blob::BlobStore;
use crate::charmap::{CharMapPhase1, CharMapPhase2, Transitions};
use crate::errors::{GazetteerError, Result};
use crate::intpack::TaggedU64;
use crate::serializer::{Deserialize, Serialize};

/// Size of one state record in bytes.
pub const STATE_RECORD_LEN: usize = 16;

/// Id of the initial state.
pub const ROOT_STATE_IDX: u32 = 0;

const ID_INVALID: u32 = u32::MAX;

/// Outgoing edges of a state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Edges {
    /// At most one outgoing edge, stored inline.
    SingleChar(Option<(char, u32)>),

    /// Any number of edges, stored in the transition table with the given id.
    CharMap(Option<u32>),
}

/// Decoded form of a state record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateRecord {
    /// Offset of the payload list, if the state is final.
    pub lookup: Option<u64>,
    pub edges: Edges,
}

impl StateRecord {
    const fn new(edges: Edges) -> Self {
        Self {
            lookup: None,
            edges,
        }
    }

    pub fn serialize(&self) -> [u8; STATE_RECORD_LEN] {
        let mut head = TaggedU64::default();
        head.set_pointer(self.lookup);
        let (id, c) = match self.edges {
            Edges::SingleChar(edge) => {
                head.set_tag(false);
                edge.map_or((ID_INVALID, 0), |(c, next)| (next, u32::from(c)))
            }
            Edges::CharMap(map) => {
                head.set_tag(true);
                (map.unwrap_or(ID_INVALID), 0)
            }
        };
        let mut bytes = [0; STATE_RECORD_LEN];
        bytes[0..8].copy_from_slice(&head.to_le_bytes());
        bytes[8..12].copy_from_slice(&id.to_le_bytes());
        bytes[12..16].copy_from_slice(&c.to_le_bytes());
        bytes
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != STATE_RECORD_LEN {
            return Err(GazetteerError::invalid_operation(
                "state record",
                format!("expected {STATE_RECORD_LEN} bytes, got {}", bytes.len()),
            ));
        }
        let mut head = [0; 8];
        let mut id = [0; 4];
        let mut c = [0; 4];
        head.copy_from_slice(&bytes[0..8]);
        id.copy_from_slice(&bytes[8..12]);
        c.copy_from_slice(&bytes[12..16]);
        let head = TaggedU64::from_le_bytes(head);
        let id = Some(u32::from_le_bytes(id)).filter(|&id| id != ID_INVALID);
        let c = u32::from_le_bytes(c);
        let edges = if head.tag() {
            Edges::CharMap(id)
        } else if c == 0 {
            Edges::SingleChar(None)
        } else {
            let c = char::from_u32(c).ok_or_else(|| {
                GazetteerError::invalid_operation("state record", format!("invalid char {c:#x}"))
            })?;
            let next = id.ok_or_else(|| {
                GazetteerError::invalid_operation("state record", "edge without target")
            })?;
            Edges::SingleChar(Some((c, next)))
        };
        Ok(Self {
            lookup: head.pointer(),
            edges,
        })
    }
}

/// Counters describing the shape of the automaton.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct StateStats {
    /// Number of states.
    pub nodes: u32,

    /// Number of states with a transition table, including promoted ones.
    pub charmap_nodes: u32,

    /// Number of states with at most one edge.
    pub single_char_nodes: u32,

    /// Number of single-edge states that were promoted to a transition table.
    pub promoted_nodes: u32,

    /// Number of states carrying a payload.
    pub final_nodes: u32,
}

impl fmt::Display for StateStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "nodes={} charmap_nodes={} single_char_nodes={} promoted_nodes={} final_nodes={}",
            self.nodes,
            self.charmap_nodes,
            self.single_char_nodes,
            self.promoted_nodes,
            self.final_nodes
        )
    }
}

impl Serialize for StateStats {
    fn to_vec(&self, dst: &mut Vec<u8>) {
        for x in [
            self.nodes,
            self.charmap_nodes,
            self.single_char_nodes,
            self.promoted_nodes,
            self.final_nodes,
        ] {
            x.to_vec(dst);
        }
    }
}

impl Deserialize for StateStats {
    fn from_slice(src: &[u8]) -> Result<(Self, &[u8])> {
        let (nodes, src) = u32::from_slice(src)?;
        let (charmap_nodes, src) = u32::from_slice(src)?;
        let (single_char_nodes, src) = u32::from_slice(src)?;
        let (promoted_nodes, src) = u32::from_slice(src)?;
        let (final_nodes, src) = u32::from_slice(src)?;
        Ok((
            Self {
                nodes,
                charmap_nodes,
                single_char_nodes,
                promoted_nodes,
                final_nodes,
            },
            src,
        ))
    }
}

#[derive(Clone, Debug)]
enum CharMaps {
    Building(CharMapPhase1),
    Compacted(CharMapPhase2),
}

/// Arena of state records together with the transition tables they refer to.
#[derive(Clone, Debug)]
pub struct StateStore {
    records: BlobStore,
    charmaps: CharMaps,
    stats: StateStats,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    /// Creates a store holding only the initial state, which is a multi-way state.
    pub fn new() -> Self {
        let mut store = Self {
            records: BlobStore::new(),
            charmaps: CharMaps::Building(CharMapPhase1::new()),
            stats: StateStats::default(),
        };
        store.push(StateRecord::new(Edges::CharMap(None)));
        store.stats.charmap_nodes += 1;
        store
    }

    /// Returns the number of states.
    #[inline(always)]
    pub const fn num_states(&self) -> u32 {
        self.stats.nodes
    }

    /// Returns the counters of this store.
    #[inline(always)]
    pub const fn stats(&self) -> &StateStats {
        &self.stats
    }

    /// Checks if [`Self::compact()`] has been called.
    #[inline(always)]
    pub const fn is_compacted(&self) -> bool {
        matches!(self.charmaps, CharMaps::Compacted(_))
    }

    /// Returns the total amount of heap used by this store in bytes.
    pub fn heap_bytes(&self) -> usize {
        self.records.heap_bytes()
            + match &self.charmaps {
                CharMaps::Building(m) => m.heap_bytes(),
                CharMaps::Compacted(m) => m.heap_bytes(),
            }
    }

    /// Appends an empty multi-way state and returns its id.
    ///
    /// # Errors
    ///
    /// [`GazetteerError`] is returned after compaction or when the number of states would
    /// exceed `u32::MAX - 1`.
    pub fn new_char_map_state(&mut self) -> Result<u32> {
        self.check_building("new_char_map_state")?;
        self.check_capacity()?;
        let id = self.push(StateRecord::new(Edges::CharMap(None)));
        self.stats.charmap_nodes += 1;
        Ok(id)
    }

    /// Appends an empty single-edge state and returns its id.
    ///
    /// # Errors
    ///
    /// [`GazetteerError`] is returned after compaction or when the number of states would
    /// exceed `u32::MAX - 1`.
    pub fn new_single_char_state(&mut self) -> Result<u32> {
        self.check_building("new_single_char_state")?;
        self.check_capacity()?;
        let id = self.push(StateRecord::new(Edges::SingleChar(None)));
        self.stats.single_char_nodes += 1;
        Ok(id)
    }

    /// Adds the transition `state --c--> target`.
    ///
    /// A single-edge state that already has an edge with another character is promoted in
    /// place to a multi-way state. Its id does not change.
    ///
    /// # Errors
    ///
    /// [`GazetteerError::InvalidOperation`] is returned after compaction, for unknown ids, or
    /// when `c` is U+0000, which marks an empty single-edge record.
    pub fn put(&mut self, state: u32, c: char, target: u32) -> Result<()> {
        self.phase1_mut("put")?;
        if c == '\0' {
            return Err(GazetteerError::invalid_operation(
                "put",
                "U+0000 cannot label a transition",
            ));
        }
        self.check_state("put", target)?;
        let mut record = self.record(state)?;
        match record.edges {
            Edges::SingleChar(None) => {
                record.edges = Edges::SingleChar(Some((c, target)));
            }
            Edges::SingleChar(Some((c0, _))) if c0 == c => {
                record.edges = Edges::SingleChar(Some((c, target)));
            }
            Edges::SingleChar(Some((c0, t0))) => {
                let charmaps = self.phase1_mut("put")?;
                let map = charmaps.put(None, c0, t0)?;
                charmaps.put(Some(map), c, target)?;
                record.edges = Edges::CharMap(Some(map));
                self.stats.single_char_nodes -= 1;
                self.stats.charmap_nodes += 1;
                self.stats.promoted_nodes += 1;
            }
            Edges::CharMap(map) => {
                let new_map = self.phase1_mut("put")?.put(map, c, target)?;
                if map.is_some() {
                    return Ok(());
                }
                record.edges = Edges::CharMap(Some(new_map));
            }
        }
        self.write(state, &record)
    }

    /// Redirects the existing transition `state --c--> old` to `new`.
    ///
    /// # Errors
    ///
    /// [`GazetteerError::InvalidOperation`] is returned after compaction, when the transition
    /// does not exist, or when it does not lead to `old`.
    pub fn replace(&mut self, state: u32, c: char, new: u32, old: u32) -> Result<()> {
        self.phase1_mut("replace")?;
        self.check_state("replace", new)?;
        let mut record = self.record(state)?;
        match record.edges {
            Edges::SingleChar(Some((c0, t0))) if c0 == c && t0 == old => {
                record.edges = Edges::SingleChar(Some((c, new)));
                self.write(state, &record)
            }
            Edges::CharMap(Some(map)) => self.phase1_mut("replace")?.replace(map, c, new, old),
            _ => Err(GazetteerError::invalid_operation(
                "replace",
                format!("state {state} has no transition {c:?} -> {old}"),
            )),
        }
    }

    /// Returns the target of the transition from `state` with `c`.
    #[inline(always)]
    pub fn next(&self, state: u32, c: char) -> Option<u32> {
        match self.record(state).ok()?.edges {
            Edges::SingleChar(Some((c0, next))) if c0 == c => Some(next),
            Edges::SingleChar(_) | Edges::CharMap(None) => None,
            Edges::CharMap(Some(map)) => match &self.charmaps {
                CharMaps::Building(m) => m.next(map, c),
                CharMaps::Compacted(m) => m.next(map, c),
            },
        }
    }

    /// Checks if `state` carries a payload.
    #[inline(always)]
    pub fn is_final(&self, state: u32) -> bool {
        self.lookup_index(state).is_some()
    }

    /// Returns the payload offset of `state`.
    #[inline(always)]
    pub fn lookup_index(&self, state: u32) -> Option<u64> {
        self.record(state).ok()?.lookup
    }

    /// Sets the payload offset of `state`.
    ///
    /// # Errors
    ///
    /// [`GazetteerError::InvalidOperation`] is returned after compaction, for unknown ids, or
    /// when `index` is too large to be packed.
    pub fn set_lookup_index(&mut self, state: u32, index: u64) -> Result<()> {
        self.check_building("set_lookup_index")?;
        if index > TaggedU64::MAX_POINTER {
            return Err(GazetteerError::invalid_operation(
                "set_lookup_index",
                format!("payload offset {index} is too large"),
            ));
        }
        let mut record = self.record(state)?;
        if record.lookup.is_none() {
            self.stats.final_nodes += 1;
        }
        record.lookup = Some(index);
        self.write(state, &record)
    }

    /// Returns the decoded record of `state`.
    ///
    /// # Errors
    ///
    /// [`GazetteerError::InvalidOperation`] is returned for unknown ids.
    #[inline(always)]
    pub fn record(&self, state: u32) -> Result<StateRecord> {
        let bytes = self
            .records
            .get_fixed(Self::offset(state), STATE_RECORD_LEN)?;
        StateRecord::deserialize(bytes)
    }

    /// Converts the transition tables to their immutable form. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// [`GazetteerError`] is returned when a table is too large to be flattened.
    pub fn compact(&mut self) -> Result<()> {
        if let CharMaps::Building(phase1) = &mut self.charmaps {
            let phase1 = std::mem::take(phase1);
            self.charmaps = CharMaps::Compacted(phase1.compact()?);
            self.records.shrink_to_fit();
        }
        Ok(())
    }

    /// Serializes a compacted store.
    ///
    /// # Errors
    ///
    /// [`GazetteerError::InvalidOperation`] is returned if the store is not compacted.
    pub fn serialize_into(&self, dst: &mut Vec<u8>) -> Result<()> {
        let CharMaps::Compacted(charmaps) = &self.charmaps else {
            return Err(GazetteerError::invalid_operation(
                "serialize",
                "the store must be compacted first",
            ));
        };
        self.stats.to_vec(dst);
        self.records.to_vec(dst);
        charmaps.to_vec(dst);
        Ok(())
    }

    /// Iterates over the payload offsets of all final states.
    pub fn lookup_indices(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.num_states()).filter_map(|state| self.lookup_index(state))
    }

    fn validate(&self) -> Result<()> {
        if self.records.len() != u64::from(self.stats.nodes) * STATE_RECORD_LEN as u64 {
            return Err(GazetteerError::format("state count does not match the records"));
        }
        let num_maps = match &self.charmaps {
            CharMaps::Building(m) => m.num_maps(),
            CharMaps::Compacted(m) => m.num_maps(),
        };
        for state in 0..self.num_states() {
            let record = self.record(state)?;
            let in_range = match record.edges {
                Edges::SingleChar(Some((_, next))) => next < self.num_states(),
                Edges::CharMap(Some(map)) => {
                    (map as usize) < num_maps
                        && match &self.charmaps {
                            CharMaps::Compacted(m) => {
                                m.iter(map).all(|(_, next)| next < self.num_states())
                            }
                            CharMaps::Building(_) => true,
                        }
                }
                Edges::SingleChar(None) | Edges::CharMap(None) => true,
            };
            if !in_range {
                return Err(GazetteerError::format(format!(
                    "state {state} refers to a missing state or table"
                )));
            }
        }
        Ok(())
    }

    #[inline(always)]
    const fn offset(state: u32) -> u64 {
        state as u64 * STATE_RECORD_LEN as u64
    }

    fn push(&mut self, record: StateRecord) -> u32 {
        let id = self.stats.nodes;
        self.records.add_fixed(&record.serialize());
        self.stats.nodes += 1;
        id
    }

    fn write(&mut self, state: u32, record: &StateRecord) -> Result<()> {
        self.records
            .replace_fixed(Self::offset(state), &record.serialize())
    }

    fn check_capacity(&self) -> Result<()> {
        if self.stats.nodes >= ID_INVALID - 1 {
            return Err(GazetteerError::invalid_operation(
                "new state",
                format!("number of states must be smaller than {}", ID_INVALID - 1),
            ));
        }
        Ok(())
    }

    fn check_state(&self, op: &'static str, state: u32) -> Result<()> {
        if state < self.num_states() {
            Ok(())
        } else {
            Err(GazetteerError::invalid_operation(
                op,
                format!("unknown state {state}"),
            ))
        }
    }

    fn check_building(&self, op: &'static str) -> Result<()> {
        if self.is_compacted() {
            Err(GazetteerError::invalid_operation(
                op,
                "cannot be called after compaction",
            ))
        } else {
            Ok(())
        }
    }

    fn phase1_mut(&mut self, op: &'static str) -> Result<&mut CharMapPhase1> {
        match &mut self.charmaps {
            CharMaps::Building(m) => Ok(m),
            CharMaps::Compacted(_) => Err(GazetteerError::invalid_operation(
                op,
                "cannot be called after compaction",
            )),
        }
    }
}

impl Deserialize for StateStore {
    fn from_slice(src: &[u8]) -> Result<(Self, &[u8])> {
        let (stats, src) = StateStats::from_slice(src)?;
        let (records, src) = BlobStore::from_slice(src)?;
        let (charmaps, src) = CharMapPhase2::from_slice(src)?;
        let store = Self {
            records,
            charmaps: CharMaps::Compacted(charmaps),
            stats,
        };
        store.validate()?;
        Ok((store, src))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_layout() {
        let records = [
            StateRecord::new(Edges::SingleChar(None)),
            StateRecord::new(Edges::CharMap(None)),
            StateRecord {
                lookup: Some(0),
                edges: Edges::SingleChar(Some(('ß', 7))),
            },
            StateRecord {
                lookup: Some(1 << 40),
                edges: Edges::CharMap(Some(3)),
            },
        ];
        for record in records {
            let bytes = record.serialize();
            assert_eq!(StateRecord::deserialize(&bytes).unwrap(), record);
        }
        assert!(StateRecord::deserialize(&[0; 15]).is_err());
    }

    #[test]
    fn test_promotion_keeps_id() {
        let mut store = StateStore::new();
        let s = store.new_single_char_state().unwrap();
        let a = store.new_single_char_state().unwrap();
        let b = store.new_single_char_state().unwrap();
        store.put(ROOT_STATE_IDX, 'x', s).unwrap();
        store.put(s, 'a', a).unwrap();
        assert!(matches!(store.record(s).unwrap().edges, Edges::SingleChar(_)));

        store.put(s, 'b', b).unwrap();
        assert!(matches!(store.record(s).unwrap().edges, Edges::CharMap(_)));
        assert_eq!(store.next(ROOT_STATE_IDX, 'x'), Some(s));
        assert_eq!(store.next(s, 'a'), Some(a));
        assert_eq!(store.next(s, 'b'), Some(b));
        assert_eq!(store.next(s, 'c'), None);

        let stats = store.stats();
        assert_eq!(stats.nodes, 4);
        assert_eq!(stats.promoted_nodes, 1);
        assert_eq!(stats.charmap_nodes, 2);
        assert_eq!(stats.single_char_nodes, 2);
    }

    #[test]
    fn test_nul_transition_is_rejected() {
        let mut store = StateStore::new();
        let s = store.new_single_char_state().unwrap();
        let t = store.new_single_char_state().unwrap();
        assert!(store.put(s, '\0', t).unwrap_err().is_invalid_operation());
        assert!(store
            .put(ROOT_STATE_IDX, '\0', t)
            .unwrap_err()
            .is_invalid_operation());
        assert_eq!(store.record(s).unwrap().edges, Edges::SingleChar(None));
        assert_eq!(store.next(s, '\0'), None);

        store.put(s, 'a', t).unwrap();
        assert!(store.put(s, '\0', t).unwrap_err().is_invalid_operation());
        assert_eq!(store.next(s, 'a'), Some(t));
        assert_eq!(store.stats().promoted_nodes, 0);
    }

    #[test]
    fn test_final_counter() {
        let mut store = StateStore::new();
        let s = store.new_single_char_state().unwrap();
        assert!(!store.is_final(s));
        store.set_lookup_index(s, 0).unwrap();
        store.set_lookup_index(s, 24).unwrap();
        assert!(store.is_final(s));
        assert_eq!(store.lookup_index(s), Some(24));
        assert_eq!(store.stats().final_nodes, 1);
    }

    #[test]
    fn test_replace() {
        let mut store = StateStore::new();
        let s = store.new_single_char_state().unwrap();
        let t = store.new_single_char_state().unwrap();
        let u = store.new_single_char_state().unwrap();
        store.put(s, 'q', t).unwrap();
        assert!(store.replace(s, 'q', u, s).is_err());
        store.replace(s, 'q', u, t).unwrap();
        assert_eq!(store.next(s, 'q'), Some(u));

        store.put(ROOT_STATE_IDX, 'q', t).unwrap();
        store.replace(ROOT_STATE_IDX, 'q', u, t).unwrap();
        assert_eq!(store.next(ROOT_STATE_IDX, 'q'), Some(u));
    }

    #[test]
    fn test_mutation_after_compaction() {
        let mut store = StateStore::new();
        let s = store.new_single_char_state().unwrap();
        store.put(ROOT_STATE_IDX, 'a', s).unwrap();
        store.compact().unwrap();
        store.compact().unwrap();

        assert_eq!(store.next(ROOT_STATE_IDX, 'a'), Some(s));
        assert!(store.put(ROOT_STATE_IDX, 'b', s).unwrap_err().is_invalid_operation());
        assert!(store
            .replace(ROOT_STATE_IDX, 'a', ROOT_STATE_IDX, s)
            .unwrap_err()
            .is_invalid_operation());
        assert!(store.new_single_char_state().is_err());
        assert!(store.set_lookup_index(s, 0).is_err());
        assert_eq!(store.next(ROOT_STATE_IDX, 'a'), Some(s));
        assert_eq!(store.next(ROOT_STATE_IDX, 'b'), None);
    }

    #[test]
    fn test_serialization_requires_compaction() {
        let mut store = StateStore::new();
        let s = store.new_char_map_state().unwrap();
        store.put(ROOT_STATE_IDX, 'z', s).unwrap();
        let mut buf = vec![];
        assert!(store.serialize_into(&mut buf).is_err());

        store.compact().unwrap();
        store.serialize_into(&mut buf).unwrap();
        let (other, rest) = StateStore::from_slice(&buf).unwrap();
        assert!(rest.is_empty());
        assert_eq!(other.stats(), store.stats());
        assert_eq!(other.next(ROOT_STATE_IDX, 'z'), Some(s));
    }
}
