//! Feature values attached to lists, entries, and emitted annotations.

use std::collections::BTreeMap;
use std::fmt;

use crate::errors::{GazetteerError, Result};
use crate::serializer::{Deserialize, Serialize};

/// Feature names mapped to values, ordered by name.
pub type FeatureMap = BTreeMap<String, FeatureValue>;

/// A feature value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Bool(bool),
    Int(i64),
    String(String),
}

impl FeatureValue {
    /// Returns the string value, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for FeatureValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for FeatureValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for FeatureValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for FeatureValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl Serialize for FeatureValue {
    fn to_vec(&self, dst: &mut Vec<u8>) {
        match self {
            Self::Bool(b) => {
                dst.push(0);
                dst.push(u8::from(*b));
            }
            Self::Int(i) => {
                dst.push(1);
                dst.extend_from_slice(&i.to_le_bytes());
            }
            Self::String(s) => {
                dst.push(2);
                s.to_vec(dst);
            }
        }
    }
}

impl Deserialize for FeatureValue {
    fn from_slice(src: &[u8]) -> Result<(Self, &[u8])> {
        let (&tag, src) = src
            .split_first()
            .ok_or_else(|| GazetteerError::format("missing feature value"))?;
        match tag {
            0 => {
                let (&b, src) = src
                    .split_first()
                    .ok_or_else(|| GazetteerError::format("missing bool feature"))?;
                Ok((Self::Bool(b != 0), src))
            }
            1 => {
                let (x, src) = u64::from_slice(src)?;
                Ok((Self::Int(x as i64), src))
            }
            2 => {
                let (s, src) = String::from_slice(src)?;
                Ok((Self::String(s), src))
            }
            _ => Err(GazetteerError::format(format!(
                "unknown feature value tag {tag}"
            ))),
        }
    }
}

pub(crate) fn serialize_features(features: &FeatureMap, dst: &mut Vec<u8>) {
    (features.len() as u64).to_vec(dst);
    for (k, v) in features {
        k.to_vec(dst);
        v.to_vec(dst);
    }
}

pub(crate) fn deserialize_features(src: &[u8]) -> Result<(FeatureMap, &[u8])> {
    let (len, mut src) = u64::from_slice(src)?;
    let mut features = FeatureMap::new();
    for _ in 0..len {
        let (k, rest) = String::from_slice(src)?;
        let (v, rest) = FeatureValue::from_slice(rest)?;
        features.insert(k, v);
        src = rest;
    }
    Ok((features, src))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_map_encoding() {
        let mut features = FeatureMap::new();
        features.insert("majorType".into(), "location".into());
        features.insert("_listnr".into(), 3i64.into());
        features.insert("_firstcharUpper".into(), true.into());
        features.insert("neg".into(), (-17i64).into());

        let mut buf = vec![];
        serialize_features(&features, &mut buf);
        let (other, rest) = deserialize_features(&buf).unwrap();
        assert!(rest.is_empty());
        assert_eq!(features, other);

        assert!(FeatureValue::from_slice(&[7]).is_err());
    }

    #[test]
    fn test_json_shape() {
        let mut features = FeatureMap::new();
        features.insert("a".into(), "x".into());
        features.insert("b".into(), 1i64.into());
        features.insert("c".into(), false.into());
        let json = serde_json::to_string(&features).unwrap();
        assert_eq!(json, r#"{"a":"x","b":1,"c":false}"#);
    }
}
