//! Utilities for serializing/deserializing data.
//!
//! All integers are little-endian. Decoding never trusts the input: every read checks the
//! remaining length and reports a [`FormatError`](crate::errors::FormatError) instead of
//! panicking.

use crate::errors::{GazetteerError, Result};

pub trait Serialize {
    fn to_vec(&self, dst: &mut Vec<u8>);
}

pub trait Deserialize {
    fn from_slice(src: &[u8]) -> Result<(Self, &[u8])>
    where
        Self: Sized;
}

#[inline(always)]
pub(crate) fn split<const N: usize>(src: &[u8]) -> Result<([u8; N], &[u8])> {
    if src.len() < N {
        return Err(GazetteerError::format(format!(
            "unexpected end of data: needed {N} bytes, {} left",
            src.len()
        )));
    }
    let (head, rest) = src.split_at(N);
    let mut bytes = [0; N];
    bytes.copy_from_slice(head);
    Ok((bytes, rest))
}

impl Serialize for u32 {
    #[inline(always)]
    fn to_vec(&self, dst: &mut Vec<u8>) {
        dst.extend_from_slice(&self.to_le_bytes());
    }
}

impl Deserialize for u32 {
    #[inline(always)]
    fn from_slice(src: &[u8]) -> Result<(Self, &[u8])> {
        let (bytes, rest) = split::<4>(src)?;
        Ok((Self::from_le_bytes(bytes), rest))
    }
}

impl Serialize for u64 {
    #[inline(always)]
    fn to_vec(&self, dst: &mut Vec<u8>) {
        dst.extend_from_slice(&self.to_le_bytes());
    }
}

impl Deserialize for u64 {
    #[inline(always)]
    fn from_slice(src: &[u8]) -> Result<(Self, &[u8])> {
        let (bytes, rest) = split::<8>(src)?;
        Ok((Self::from_le_bytes(bytes), rest))
    }
}

impl Serialize for String {
    fn to_vec(&self, dst: &mut Vec<u8>) {
        serialize_bytes(self.as_bytes(), dst);
    }
}

impl Deserialize for String {
    fn from_slice(src: &[u8]) -> Result<(Self, &[u8])> {
        let (bytes, rest) = deserialize_bytes(src)?;
        let s = String::from_utf8(bytes)
            .map_err(|e| GazetteerError::format(format!("invalid UTF-8 string: {e}")))?;
        Ok((s, rest))
    }
}

pub fn serialize_bytes(src: &[u8], dst: &mut Vec<u8>) {
    u64::try_from(src.len()).unwrap_or(u64::MAX).to_vec(dst);
    dst.extend_from_slice(src);
}

pub fn deserialize_bytes(src: &[u8]) -> Result<(Vec<u8>, &[u8])> {
    let (len, src) = u64::from_slice(src)?;
    let len = usize::try_from(len)
        .ok()
        .filter(|&len| len <= src.len())
        .ok_or_else(|| GazetteerError::format(format!("byte run of {len} exceeds the data")))?;
    let (head, rest) = src.split_at(len);
    Ok((head.to_vec(), rest))
}

pub fn serialize_slice<S>(src: &[S], dst: &mut Vec<u8>)
where
    S: Serialize,
{
    u64::try_from(src.len()).unwrap_or(u64::MAX).to_vec(dst);
    src.iter().for_each(|x| x.to_vec(dst));
}

pub fn deserialize_vec<D>(src: &[u8]) -> Result<(Vec<D>, &[u8])>
where
    D: Deserialize,
{
    let (len, mut src) = u64::from_slice(src)?;
    // Every element takes at least one byte, so this bounds the allocation.
    let capacity = usize::try_from(len).unwrap_or(usize::MAX).min(src.len());
    let mut dst = Vec::with_capacity(capacity);
    for _ in 0..len {
        let (x, rest) = D::from_slice(src)?;
        dst.push(x);
        src = rest;
    }
    Ok((dst, src))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncated_input() {
        let mut buf = vec![];
        0xdead_beef_u32.to_vec(&mut buf);
        assert!(u64::from_slice(&buf).is_err());
        let (x, rest) = u32::from_slice(&buf).unwrap();
        assert_eq!(x, 0xdead_beef);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_vec_length_beyond_data() {
        let mut buf = vec![];
        1000u64.to_vec(&mut buf);
        7u32.to_vec(&mut buf);
        assert!(deserialize_vec::<u32>(&buf).is_err());
    }

    #[test]
    fn test_strings() {
        let mut buf = vec![];
        serialize_slice(&["Berlin".to_string(), "Köln".to_string()], &mut buf);
        buf.push(42);
        let (v, rest) = deserialize_vec::<String>(&buf).unwrap();
        assert_eq!(v, vec!["Berlin", "Köln"]);
        assert_eq!(rest, &[42]);
    }

    #[test]
    fn test_invalid_utf8() {
        let mut buf = vec![];
        serialize_bytes(&[0xff, 0xfe], &mut buf);
        assert!(String::from_slice(&buf).is_err());
    }
}
