//! The gazetteer automaton.
//!
//! [`GazStore`] inserts lexicon entries character by character into a [`StateStore`] and
//! attaches a payload list to every terminal state. Each payload element is encoded as
//!
//! ```text
//! | list index: u32 | number of pairs: u32 | (key offset: u64 | value len: u32 | value)* |
//! ```
//!
//! Feature names are stored once in the blob store and referenced by offset.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::time::Instant;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rustc_hash::FxHashMap;

use crate::blob::{BlobStore, ListIter};
use crate::errors::{GazetteerError, Result};
use crate::features::{deserialize_features, serialize_features, FeatureMap, FeatureValue};
use crate::serializer::{deserialize_vec, serialize_slice, Deserialize, Serialize};
use crate::states::{StateStats, StateStore, ROOT_STATE_IDX};

/// Leading bytes of a serialized store.
const MAGIC: &[u8; 6] = b"GAZBIN";

/// Version of the serialized layout.
const FORMAT_VERSION: u32 = 1;

/// Name of the feature holding the list index of a lookup.
pub const LIST_NUMBER_FEATURE: &str = "_listnr";

/// Metadata shared by all entries loaded from one list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListInfo {
    annotation_type: String,
    source: String,
    features: FeatureMap,
}

impl ListInfo {
    /// Type of the annotations created for entries of this list.
    pub fn annotation_type(&self) -> &str {
        &self.annotation_type
    }

    /// Path or URL the list was loaded from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Features attached to every entry of this list.
    pub const fn features(&self) -> &FeatureMap {
        &self.features
    }
}

impl Serialize for ListInfo {
    fn to_vec(&self, dst: &mut Vec<u8>) {
        self.annotation_type.to_vec(dst);
        self.source.to_vec(dst);
        serialize_features(&self.features, dst);
    }
}

impl Deserialize for ListInfo {
    fn from_slice(src: &[u8]) -> Result<(Self, &[u8])> {
        let (annotation_type, src) = String::from_slice(src)?;
        let (source, src) = String::from_slice(src)?;
        let (features, src) = deserialize_features(src)?;
        Ok((
            Self {
                annotation_type,
                source,
                features,
            },
            src,
        ))
    }
}

struct KeyEntry {
    key: String,
    offset: u64,
}

impl Serialize for KeyEntry {
    fn to_vec(&self, dst: &mut Vec<u8>) {
        self.key.to_vec(dst);
        self.offset.to_vec(dst);
    }
}

impl Deserialize for KeyEntry {
    fn from_slice(src: &[u8]) -> Result<(Self, &[u8])> {
        let (key, src) = String::from_slice(src)?;
        let (offset, src) = u64::from_slice(src)?;
        Ok((Self { key, offset }, src))
    }
}

/// Multi-entry string automaton with feature payloads.
///
/// A store is built by [`Self::add_list_info()`] and [`Self::add_lookup()`], then frozen by
/// [`Self::compact()`]. A compacted store is immutable and can be shared between threads.
///
/// # Examples
///
/// ```
/// use extgaz::{FeatureMap, GazStore};
///
/// let mut store = GazStore::new();
/// let list = store.add_list_info("Lookup", "cities.lst", FeatureMap::new()).unwrap();
/// store.add_lookup("Berlin", list, &[("country", "DE")]).unwrap();
/// store.add_lookup("Bern", list, &[("country", "CH")]).unwrap();
/// store.compact().unwrap();
///
/// let lookup = store.match_str("Bern").unwrap().next().unwrap();
/// assert_eq!(lookup.features().collect::<Vec<_>>(), vec![("country", "CH")]);
/// assert!(store.match_str("Ber").is_none());
/// ```
#[derive(Clone, Debug, Default)]
pub struct GazStore {
    blob: BlobStore,
    keys: FxHashMap<String, u64>,
    list_infos: Vec<ListInfo>,
    states: StateStore,
    num_entries: u64,
    num_input_chars: u64,
}

impl GazStore {
    /// Creates an empty store in the building phase.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a source list and returns its index.
    ///
    /// # Errors
    ///
    /// [`GazetteerError::InvalidOperation`] is returned when the list index no longer fits in
    /// `u32`.
    pub fn add_list_info<T, S>(
        &mut self,
        annotation_type: T,
        source: S,
        features: FeatureMap,
    ) -> Result<u32>
    where
        T: Into<String>,
        S: Into<String>,
    {
        let index = checked_list_index(self.list_infos.len())?;
        self.list_infos.push(ListInfo {
            annotation_type: annotation_type.into(),
            source: source.into(),
            features,
        });
        Ok(index)
    }

    /// Returns the list registered under `index`.
    pub fn list_info(&self, index: u32) -> Option<&ListInfo> {
        self.list_infos.get(index as usize)
    }

    /// Returns all registered lists.
    pub fn list_infos(&self) -> &[ListInfo] {
        &self.list_infos
    }

    /// Inserts `entry` with a payload made of `list_index` and the given feature pairs.
    ///
    /// Inserting a payload that is already attached to the same entry has no effect.
    ///
    /// # Errors
    ///
    /// - [`GazetteerError::Data`] is returned when `entry` is empty or contains U+0000.
    /// - [`GazetteerError::InvalidOperation`] is returned after compaction or when
    ///   `list_index` is unknown.
    pub fn add_lookup<K, V>(&mut self, entry: &str, list_index: u32, features: &[(K, V)]) -> Result<()>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        if self.is_compacted() {
            return Err(GazetteerError::invalid_operation(
                "add_lookup",
                "cannot be called after compaction",
            ));
        }
        let source = self
            .list_info(list_index)
            .ok_or_else(|| {
                GazetteerError::invalid_operation(
                    "add_lookup",
                    format!("unknown list index {list_index}"),
                )
            })?
            .source
            .clone();
        if entry.is_empty() {
            return Err(GazetteerError::data(source, 0, "empty entry"));
        }
        if entry.contains('\0') {
            return Err(GazetteerError::data(
                source,
                0,
                format!("entry {entry:?} contains U+0000"),
            ));
        }

        let mut state = ROOT_STATE_IDX;
        for c in entry.chars() {
            self.num_input_chars += 1;
            state = match self.states.next(state, c) {
                Some(next) => next,
                None => {
                    let next = self.states.new_single_char_state()?;
                    self.states.put(state, c, next)?;
                    next
                }
            };
        }

        let payload = self.encode_payload(list_index, features)?;
        match self.states.lookup_index(state) {
            None => {
                let head = self.blob.add_list_first(&payload)?;
                self.states.set_lookup_index(state, head)?;
                self.num_entries += 1;
            }
            Some(head) => {
                if self.blob.find_in_list(head, &payload)?.is_none() {
                    self.blob.append_list(head, &payload)?;
                    self.num_entries += 1;
                }
            }
        }
        Ok(())
    }

    fn encode_payload<K, V>(&mut self, list_index: u32, features: &[(K, V)]) -> Result<Vec<u8>>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let num_pairs = u32::try_from(features.len()).map_err(|_| {
            GazetteerError::invalid_operation("add_lookup", "too many features")
        })?;
        let mut payload = vec![];
        list_index.to_vec(&mut payload);
        num_pairs.to_vec(&mut payload);
        for (k, v) in features {
            let key_offset = self.key_offset(k.as_ref())?;
            let value = v.as_ref().as_bytes();
            let value_len = u32::try_from(value.len()).map_err(|_| {
                GazetteerError::invalid_operation("add_lookup", "feature value is too long")
            })?;
            key_offset.to_vec(&mut payload);
            value_len.to_vec(&mut payload);
            payload.extend_from_slice(value);
        }
        Ok(payload)
    }

    fn key_offset(&mut self, key: &str) -> Result<u64> {
        if let Some(&offset) = self.keys.get(key) {
            return Ok(offset);
        }
        let offset = self.blob.add_variable(key.as_bytes())?;
        self.keys.insert(key.to_string(), offset);
        Ok(offset)
    }

    /// Freezes the automaton. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// [`GazetteerError`] is returned when a transition table is too large to be flattened.
    pub fn compact(&mut self) -> Result<()> {
        if self.is_compacted() {
            return Ok(());
        }
        let start = Instant::now();
        self.states.compact()?;
        self.blob.shrink_to_fit();
        self.keys.shrink_to_fit();
        self.list_infos.shrink_to_fit();
        tracing::info!(elapsed = ?start.elapsed(), "compacted gazetteer store");
        Ok(())
    }

    /// Checks if [`Self::compact()`] has been called.
    #[inline(always)]
    pub const fn is_compacted(&self) -> bool {
        self.states.is_compacted()
    }

    /// Returns the initial state.
    #[inline(always)]
    pub const fn initial_state(&self) -> State<'_> {
        State {
            store: self,
            id: ROOT_STATE_IDX,
        }
    }

    /// Returns the state with the given id, if it exists.
    pub fn state(&self, id: u32) -> Option<State<'_>> {
        (id < self.states.num_states()).then_some(State { store: self, id })
    }

    /// Matches the whole of `text` and returns the payloads of the entry, or `None` if `text`
    /// is not an entry.
    pub fn match_str(&self, text: &str) -> Option<LookupIter<'_>> {
        let mut state = self.initial_state();
        for c in text.chars() {
            state = state.next(c)?;
        }
        state.is_final().then(|| state.lookups())
    }

    /// Decodes the payloads attached to `state`. Non-final states yield nothing.
    pub fn lookups(&self, state: u32) -> LookupIter<'_> {
        let inner = self
            .states
            .lookup_index(state)
            .and_then(|head| self.blob.list_iter(head).ok());
        LookupIter { store: self, inner }
    }

    /// Returns the counters of the underlying state store.
    pub const fn state_stats(&self) -> &StateStats {
        self.states.stats()
    }

    /// Returns the number of distinct payloads stored.
    pub const fn num_entries(&self) -> u64 {
        self.num_entries
    }

    /// Returns the total amount of heap used by this store in bytes.
    pub fn heap_bytes(&self) -> usize {
        self.blob.heap_bytes()
            + self.states.heap_bytes()
            + self
                .keys
                .keys()
                .map(|k| k.capacity() + std::mem::size_of::<(String, u64)>())
                .sum::<usize>()
            + self.list_infos.capacity() * std::mem::size_of::<ListInfo>()
    }

    /// Returns a one-line summary of the automaton.
    pub fn stats_string(&self) -> String {
        format!(
            "{} entries={} input_chars={} lists={} keys={} blob_bytes={} heap_bytes={}",
            self.states.stats(),
            self.num_entries,
            self.num_input_chars,
            self.list_infos.len(),
            self.keys.len(),
            self.blob.len(),
            self.heap_bytes()
        )
    }

    /// Serializes a compacted store.
    ///
    /// # Errors
    ///
    /// [`GazetteerError::InvalidOperation`] is returned if the store is not compacted.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut dst = vec![];
        dst.extend_from_slice(MAGIC);
        FORMAT_VERSION.to_vec(&mut dst);
        self.num_entries.to_vec(&mut dst);
        self.num_input_chars.to_vec(&mut dst);
        self.blob.to_vec(&mut dst);
        let mut keys: Vec<_> = self
            .keys
            .iter()
            .map(|(key, &offset)| KeyEntry {
                key: key.clone(),
                offset,
            })
            .collect();
        keys.sort_unstable_by_key(|k| k.offset);
        serialize_slice(&keys, &mut dst);
        serialize_slice(&self.list_infos, &mut dst);
        self.states.serialize_into(&mut dst)?;
        Ok(dst)
    }

    /// Deserializes a store serialized by [`Self::serialize()`] and returns it with the
    /// remaining bytes.
    ///
    /// # Errors
    ///
    /// [`GazetteerError::Format`] is returned when `src` is not a valid serialized store.
    pub fn deserialize(src: &[u8]) -> Result<(Self, &[u8])> {
        let src = src
            .strip_prefix(MAGIC.as_slice())
            .ok_or_else(|| GazetteerError::format("not a gazetteer cache"))?;
        let (version, src) = u32::from_slice(src)?;
        if version != FORMAT_VERSION {
            return Err(GazetteerError::format(format!(
                "unsupported format version {version}"
            )));
        }
        let (num_entries, src) = u64::from_slice(src)?;
        let (num_input_chars, src) = u64::from_slice(src)?;
        let (blob, src) = BlobStore::from_slice(src)?;
        let (keys, src) = deserialize_vec::<KeyEntry>(src)?;
        let (list_infos, src) = deserialize_vec::<ListInfo>(src)?;
        let (states, src) = StateStore::from_slice(src)?;
        let store = Self {
            blob,
            keys: keys.into_iter().map(|k| (k.key, k.offset)).collect(),
            list_infos,
            states,
            num_entries,
            num_input_chars,
        };
        store.validate()?;
        Ok((store, src))
    }

    /// Compacts the store and writes it gzip-compressed to `path`.
    ///
    /// # Errors
    ///
    /// [`GazetteerError`] is returned when compaction or writing fails.
    pub fn save<P>(&mut self, path: P) -> Result<()>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let start = Instant::now();
        self.compact()?;
        let bytes = self.serialize()?;
        let mut encoder = GzEncoder::new(BufWriter::new(File::create(path)?), Compression::default());
        encoder.write_all(&bytes)?;
        encoder.finish()?.flush()?;
        tracing::info!(path = %path.display(), bytes = bytes.len(), elapsed = ?start.elapsed(), "saved gazetteer store");
        Ok(())
    }

    /// Loads a store written by [`Self::save()`].
    ///
    /// # Errors
    ///
    /// [`GazetteerError`] is returned when the file cannot be read or is not a valid store.
    pub fn load<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let start = Instant::now();
        let mut bytes = vec![];
        GzDecoder::new(BufReader::new(File::open(path)?)).read_to_end(&mut bytes)?;
        let (store, rest) = Self::deserialize(&bytes)?;
        if !rest.is_empty() {
            return Err(GazetteerError::format(format!(
                "{} trailing bytes after the store",
                rest.len()
            )));
        }
        tracing::info!(path = %path.display(), elapsed = ?start.elapsed(), "loaded gazetteer store");
        Ok(store)
    }

    fn validate(&self) -> Result<()> {
        for &offset in self.keys.values() {
            self.decode_key(offset)?;
        }
        for head in self.states.lookup_indices() {
            for raw in self.blob.list_iter(head)? {
                let (list_index, num_pairs, mut pairs) = decode_payload_header(raw?)?;
                if self.list_info(list_index).is_none() {
                    return Err(GazetteerError::format(format!(
                        "payload refers to unknown list {list_index}"
                    )));
                }
                for _ in 0..num_pairs {
                    let (_, rest) = self.decode_pair(pairs)?;
                    pairs = rest;
                }
            }
        }
        Ok(())
    }

    fn decode_key(&self, offset: u64) -> Result<&str> {
        std::str::from_utf8(self.blob.get_variable(offset)?)
            .map_err(|e| GazetteerError::format(format!("invalid feature name: {e}")))
    }

    fn decode_pair<'a>(&'a self, src: &'a [u8]) -> Result<((&'a str, &'a str), &'a [u8])> {
        let (key_offset, src) = u64::from_slice(src)?;
        let (value_len, src) = u32::from_slice(src)?;
        let value_len = value_len as usize;
        if src.len() < value_len {
            return Err(GazetteerError::format("truncated feature value"));
        }
        let (value, rest) = src.split_at(value_len);
        let value = std::str::from_utf8(value)
            .map_err(|e| GazetteerError::format(format!("invalid feature value: {e}")))?;
        Ok(((self.decode_key(key_offset)?, value), rest))
    }
}

fn decode_payload_header(raw: &[u8]) -> Result<(u32, u32, &[u8])> {
    let (list_index, src) = u32::from_slice(raw)?;
    let (num_pairs, src) = u32::from_slice(src)?;
    Ok((list_index, num_pairs, src))
}

fn checked_list_index(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        GazetteerError::invalid_operation("add_list_info", format!("too many lists: {len}"))
    })
}

/// A state of a [`GazStore`].
#[derive(Clone, Copy)]
pub struct State<'a> {
    store: &'a GazStore,
    id: u32,
}

impl<'a> State<'a> {
    /// Returns the id of this state.
    #[inline(always)]
    pub const fn id(self) -> u32 {
        self.id
    }

    /// Follows the transition with `c`.
    #[inline(always)]
    pub fn next(self, c: char) -> Option<Self> {
        self.store.states.next(self.id, c).map(|id| Self {
            store: self.store,
            id,
        })
    }

    /// Checks if this state ends at least one entry.
    #[inline(always)]
    pub fn is_final(self) -> bool {
        self.store.states.is_final(self.id)
    }

    /// Decodes the payloads attached to this state.
    pub fn lookups(self) -> LookupIter<'a> {
        self.store.lookups(self.id)
    }
}

impl PartialEq for State<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.store, other.store) && self.id == other.id
    }
}

impl Eq for State<'_> {}

impl std::fmt::Debug for State<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("State").field("id", &self.id).finish()
    }
}

/// Iterator over the payloads of a state, created by [`GazStore::lookups()`].
pub struct LookupIter<'a> {
    store: &'a GazStore,
    inner: Option<ListIter<'a>>,
}

impl<'a> Iterator for LookupIter<'a> {
    type Item = Lookup<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let raw = self.inner.as_mut()?.next()?.ok()?;
        let (list_index, num_pairs, pairs) = decode_payload_header(raw).ok()?;
        Some(Lookup {
            store: self.store,
            list_index,
            num_pairs,
            pairs,
        })
    }
}

/// One payload: the list an entry came from and the entry's own features.
#[derive(Clone, Copy)]
pub struct Lookup<'a> {
    store: &'a GazStore,
    list_index: u32,
    num_pairs: u32,
    pairs: &'a [u8],
}

impl<'a> Lookup<'a> {
    /// Returns the index of the source list.
    #[inline(always)]
    pub const fn list_index(&self) -> u32 {
        self.list_index
    }

    /// Returns the source list.
    pub fn list_info(&self) -> &'a ListInfo {
        &self.store.list_infos[self.list_index as usize]
    }

    /// Iterates over the entry features in insertion order.
    pub fn features(&self) -> EntryFeatures<'a> {
        EntryFeatures {
            store: self.store,
            remaining: self.num_pairs,
            src: self.pairs,
        }
    }

    /// Builds the feature map of this payload: list features, the list number, then the entry
    /// features, later ones overriding earlier ones.
    pub fn feature_map(&self) -> FeatureMap {
        let mut map = self.list_info().features().clone();
        map.insert(
            LIST_NUMBER_FEATURE.to_string(),
            FeatureValue::Int(i64::from(self.list_index)),
        );
        for (k, v) in self.features() {
            map.insert(k.to_string(), FeatureValue::from(v));
        }
        map
    }
}

impl std::fmt::Debug for Lookup<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Lookup")
            .field("list_index", &self.list_index)
            .field("features", &self.features().collect::<Vec<_>>())
            .finish()
    }
}

/// Iterator over the features of a [`Lookup`].
pub struct EntryFeatures<'a> {
    store: &'a GazStore,
    remaining: u32,
    src: &'a [u8],
}

impl<'a> Iterator for EntryFeatures<'a> {
    type Item = (&'a str, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        match self.store.decode_pair(self.src) {
            Ok((pair, rest)) => {
                self.src = rest;
                Some(pair)
            }
            Err(_) => {
                self.remaining = 0;
                None
            }
        }
    }
}
