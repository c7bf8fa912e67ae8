//! Append-only byte arena for variable-length chunks, fixed-length slots, and linked lists.
//!
//! Offsets are `u64`, so a single store can grow past 4 GiB. Chunk lengths are stored as
//! `u32`.
//!
//! Lists use a header record and uniform element nodes:
//!
//! ```text
//! header: | count: u32 | first: u64 | last: u64 |
//! node:   | next: u64 | len: u32 | data ... |
//! ```
//!
//! The header keeps a pointer to the last node, so appending does not walk the chain.

use crate::errors::{GazetteerError, Result};
use crate::serializer::{deserialize_bytes, serialize_bytes, Deserialize, Serialize};

const NIL: u64 = u64::MAX;

const LIST_HEADER_LEN: usize = 20;
const LIST_NODE_HEADER_LEN: usize = 12;

/// Append-only storage of binary chunks addressed by offsets.
#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct BlobStore {
    data: Vec<u8>,
}

impl BlobStore {
    /// Creates an empty store.
    pub const fn new() -> Self {
        Self { data: vec![] }
    }

    /// Returns the number of bytes in use.
    #[inline(always)]
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    /// Checks if nothing has been stored.
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the total amount of heap used by this store in bytes.
    pub fn heap_bytes(&self) -> usize {
        self.data.capacity()
    }

    /// Releases unused capacity.
    pub fn shrink_to_fit(&mut self) {
        self.data.shrink_to_fit();
    }

    /// Stores length-prefixed data and returns its offset.
    ///
    /// # Errors
    ///
    /// [`GazetteerError`] is returned when `bytes` is longer than `u32::MAX`.
    pub fn add_variable(&mut self, bytes: &[u8]) -> Result<u64> {
        let len = chunk_len("add_variable", bytes)?;
        let offset = self.len();
        self.data.extend_from_slice(&len.to_le_bytes());
        self.data.extend_from_slice(bytes);
        Ok(offset)
    }

    /// Gets data stored by [`Self::add_variable()`].
    ///
    /// # Errors
    ///
    /// [`GazetteerError`] is returned when `offset` does not address a stored chunk.
    pub fn get_variable(&self, offset: u64) -> Result<&[u8]> {
        let len = self.read_u32("get_variable", offset)?;
        self.slice("get_variable", offset + 4, u64::from(len))
    }

    /// Stores data without a length prefix and returns its offset.
    pub fn add_fixed(&mut self, bytes: &[u8]) -> u64 {
        let offset = self.len();
        self.data.extend_from_slice(bytes);
        offset
    }

    /// Gets `len` bytes at `offset`.
    ///
    /// # Errors
    ///
    /// [`GazetteerError`] is returned when the range is out of bounds.
    #[inline(always)]
    pub fn get_fixed(&self, offset: u64, len: usize) -> Result<&[u8]> {
        self.slice("get_fixed", offset, len as u64)
    }

    /// Overwrites the bytes at `offset`.
    ///
    /// # Errors
    ///
    /// [`GazetteerError`] is returned when the range is out of bounds.
    pub fn replace_fixed(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        let range = self.range("replace_fixed", offset, bytes.len() as u64)?;
        self.data[range].copy_from_slice(bytes);
        Ok(())
    }

    /// Creates a new list holding one element and returns the offset of its header.
    ///
    /// # Errors
    ///
    /// [`GazetteerError`] is returned when `bytes` is longer than `u32::MAX`.
    pub fn add_list_first(&mut self, bytes: &[u8]) -> Result<u64> {
        let head = self.len();
        let node = head + LIST_HEADER_LEN as u64;
        self.data.extend_from_slice(&1u32.to_le_bytes());
        self.data.extend_from_slice(&node.to_le_bytes());
        self.data.extend_from_slice(&node.to_le_bytes());
        self.push_node(bytes)?;
        Ok(head)
    }

    /// Appends an element to the list at `head` and returns `head`.
    ///
    /// # Errors
    ///
    /// [`GazetteerError`] is returned when `head` does not address a list header.
    pub fn append_list(&mut self, head: u64, bytes: &[u8]) -> Result<u64> {
        let count = self.read_u32("append_list", head)?;
        let last = self.read_u64("append_list", head + 12)?;
        self.check_node("append_list", last)?;
        let node = self.push_node(bytes)?;
        self.write_bytes("append_list", last, &node.to_le_bytes())?;
        self.write_bytes("append_list", head, &(count + 1).to_le_bytes())?;
        self.write_bytes("append_list", head + 12, &node.to_le_bytes())?;
        Ok(head)
    }

    /// Returns the number of elements in the list at `head`.
    ///
    /// # Errors
    ///
    /// [`GazetteerError`] is returned when `head` does not address a list header.
    pub fn list_len(&self, head: u64) -> Result<u32> {
        self.read_u32("list_len", head)
    }

    /// Gets the `index`-th element of the list at `head`.
    ///
    /// # Errors
    ///
    /// [`GazetteerError`] is returned when `head` does not address a list or `index` is out of
    /// range.
    pub fn get_list_element(&self, head: u64, index: u32) -> Result<&[u8]> {
        self.list_iter(head)?
            .nth(index as usize)
            .ok_or_else(|| {
                GazetteerError::invalid_operation(
                    "get_list_element",
                    format!("index {index} out of range for list at {head}"),
                )
            })?
    }

    /// Returns the position of the first element byte-equal to `bytes`, if any.
    ///
    /// # Errors
    ///
    /// [`GazetteerError`] is returned when the list is malformed.
    pub fn find_in_list(&self, head: u64, bytes: &[u8]) -> Result<Option<u32>> {
        for (i, element) in self.list_iter(head)?.enumerate() {
            if element? == bytes {
                return Ok(Some(i as u32));
            }
        }
        Ok(None)
    }

    /// Creates an iterator over the elements of the list at `head`.
    ///
    /// # Errors
    ///
    /// [`GazetteerError`] is returned when `head` does not address a list header.
    pub fn list_iter(&self, head: u64) -> Result<ListIter<'_>> {
        let remaining = self.read_u32("list_iter", head)?;
        let node = self.read_u64("list_iter", head + 4)?;
        Ok(ListIter {
            store: self,
            node,
            remaining,
        })
    }

    fn push_node(&mut self, bytes: &[u8]) -> Result<u64> {
        let len = chunk_len("list element", bytes)?;
        let offset = self.len();
        self.data.extend_from_slice(&NIL.to_le_bytes());
        self.data.extend_from_slice(&len.to_le_bytes());
        self.data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn check_node(&self, op: &'static str, node: u64) -> Result<()> {
        self.range(op, node, LIST_NODE_HEADER_LEN as u64).map(|_| ())
    }

    fn range(&self, op: &'static str, offset: u64, len: u64) -> Result<std::ops::Range<usize>> {
        offset
            .checked_add(len)
            .filter(|&end| end <= self.len())
            .map(|end| offset as usize..end as usize)
            .ok_or_else(|| {
                GazetteerError::invalid_operation(
                    op,
                    format!("range {offset}+{len} exceeds store of {} bytes", self.len()),
                )
            })
    }

    #[inline(always)]
    fn slice(&self, op: &'static str, offset: u64, len: u64) -> Result<&[u8]> {
        Ok(&self.data[self.range(op, offset, len)?])
    }

    fn read_u32(&self, op: &'static str, offset: u64) -> Result<u32> {
        let mut bytes = [0; 4];
        bytes.copy_from_slice(self.slice(op, offset, 4)?);
        Ok(u32::from_le_bytes(bytes))
    }

    fn read_u64(&self, op: &'static str, offset: u64) -> Result<u64> {
        let mut bytes = [0; 8];
        bytes.copy_from_slice(self.slice(op, offset, 8)?);
        Ok(u64::from_le_bytes(bytes))
    }

    fn write_bytes(&mut self, op: &'static str, offset: u64, bytes: &[u8]) -> Result<()> {
        let range = self.range(op, offset, bytes.len() as u64)?;
        self.data[range].copy_from_slice(bytes);
        Ok(())
    }
}

fn chunk_len(op: &'static str, bytes: &[u8]) -> Result<u32> {
    u32::try_from(bytes.len()).map_err(|_| {
        GazetteerError::invalid_operation(op, format!("chunk of {} bytes is too long", bytes.len()))
    })
}

fn read_node(store: &BlobStore, node: u64) -> Result<(u64, &[u8])> {
    let next = store.read_u64("list_iter", node)?;
    let len = store.read_u32("list_iter", node + 8)?;
    let data = store.slice("list_iter", node + LIST_NODE_HEADER_LEN as u64, u64::from(len))?;
    Ok((next, data))
}

/// Iterator over the elements of a list, created by [`BlobStore::list_iter()`].
pub struct ListIter<'a> {
    store: &'a BlobStore,
    node: u64,
    remaining: u32,
}

impl<'a> Iterator for ListIter<'a> {
    type Item = Result<&'a [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 || self.node == NIL {
            return None;
        }
        self.remaining -= 1;
        match read_node(self.store, self.node) {
            Ok((next, data)) => {
                self.node = next;
                Some(Ok(data))
            }
            Err(e) => {
                self.remaining = 0;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining as usize))
    }
}

impl Serialize for BlobStore {
    fn to_vec(&self, dst: &mut Vec<u8>) {
        serialize_bytes(&self.data, dst);
    }
}

impl Deserialize for BlobStore {
    fn from_slice(src: &[u8]) -> Result<(Self, &[u8])> {
        let (data, rest) = deserialize_bytes(src)?;
        Ok((Self { data }, rest))
    }
}
