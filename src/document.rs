//! Minimal document model: a text and the annotations over it.
//!
//! Offsets are byte offsets into the text, and `end` is exclusive.

use std::ops::Range;

use crate::features::{FeatureMap, FeatureValue};

/// A typed span with features.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Annotation {
    pub start: usize,
    pub end: usize,
    #[serde(rename = "type")]
    pub annotation_type: String,
    #[serde(default)]
    pub features: FeatureMap,
}

impl Annotation {
    /// Creates an annotation without features.
    pub fn new<T>(annotation_type: T, start: usize, end: usize) -> Self
    where
        T: Into<String>,
    {
        Self {
            start,
            end,
            annotation_type: annotation_type.into(),
            features: FeatureMap::new(),
        }
    }

    /// Adds a feature.
    #[must_use]
    pub fn with_feature<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<FeatureValue>,
    {
        self.features.insert(key.into(), value.into());
        self
    }

    /// Returns the covered byte range.
    #[inline(always)]
    pub const fn span(&self) -> Range<usize> {
        self.start..self.end
    }

    /// Checks if this annotation lies within `range`.
    #[inline(always)]
    pub const fn is_within(&self, range: &Range<usize>) -> bool {
        range.start <= self.start && self.end <= range.end
    }
}

/// A text with annotations.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Document {
    text: String,
    annotations: Vec<Annotation>,
}

impl Document {
    /// Creates a document without annotations.
    pub fn new<T>(text: T) -> Self
    where
        T: Into<String>,
    {
        Self {
            text: text.into(),
            annotations: vec![],
        }
    }

    /// Returns the text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Returns the text covered by `range`, or `None` if `range` is not on char boundaries.
    pub fn slice(&self, range: Range<usize>) -> Option<&str> {
        self.text.get(range)
    }

    /// Adds an annotation.
    pub fn add(&mut self, annotation: Annotation) {
        self.annotations.push(annotation);
    }

    /// Adds a feature-less annotation.
    #[must_use]
    pub fn with_annotation<T>(mut self, annotation_type: T, start: usize, end: usize) -> Self
    where
        T: Into<String>,
    {
        self.add(Annotation::new(annotation_type, start, end));
        self
    }

    /// Returns all annotations in insertion order.
    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    /// Returns all annotations for modification.
    pub fn annotations_mut(&mut self) -> &mut Vec<Annotation> {
        &mut self.annotations
    }

    /// Returns the indices of annotations of the given type in document order.
    ///
    /// Ties on the start offset keep insertion order.
    pub fn indices_of_type(&self, annotation_type: &str) -> Vec<usize> {
        let mut indices: Vec<_> = (0..self.annotations.len())
            .filter(|&i| self.annotations[i].annotation_type == annotation_type)
            .collect();
        indices.sort_by_key(|&i| self.annotations[i].start);
        indices
    }

    /// Returns annotations of the given type in document order.
    pub fn of_type(&self, annotation_type: &str) -> Vec<&Annotation> {
        self.indices_of_type(annotation_type)
            .into_iter()
            .map(|i| &self.annotations[i])
            .collect()
    }

    /// Returns annotations of the given type inside `range`, in document order.
    pub fn of_type_within(&self, annotation_type: &str, range: &Range<usize>) -> Vec<&Annotation> {
        self.of_type(annotation_type)
            .into_iter()
            .filter(|a| a.is_within(range))
            .collect()
    }
}

/// Splits a whitespace-separated text into `Token` and `SpaceToken` annotations.
///
/// This is a convenience for callers that have no tokenizer of their own.
pub fn whitespace_tokens(text: &str) -> Document {
    let mut doc = Document::new(text);
    let mut start = None;
    let mut space = None;
    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            if let Some(s) = start.take() {
                doc.add(Annotation::new("Token", s, i));
            }
            space.get_or_insert(i);
        } else {
            if let Some(s) = space.take() {
                doc.add(Annotation::new("SpaceToken", s, i));
            }
            start.get_or_insert(i);
        }
    }
    if let Some(s) = start {
        doc.add(Annotation::new("Token", s, text.len()));
    }
    if let Some(s) = space {
        doc.add(Annotation::new("SpaceToken", s, text.len()));
    }
    doc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_order() {
        let doc = Document::new("a b c")
            .with_annotation("Token", 4, 5)
            .with_annotation("Token", 0, 1)
            .with_annotation("SpaceToken", 1, 2)
            .with_annotation("Token", 2, 3);
        let starts: Vec<_> = doc.of_type("Token").iter().map(|a| a.start).collect();
        assert_eq!(starts, vec![0, 2, 4]);
        let inner: Vec<_> = doc
            .of_type_within("Token", &(1..4))
            .iter()
            .map(|a| a.start)
            .collect();
        assert_eq!(inner, vec![2]);
    }

    #[test]
    fn test_whitespace_tokens() {
        let doc = whitespace_tokens("New  York ");
        let spans: Vec<_> = doc
            .annotations()
            .iter()
            .map(|a| (a.annotation_type.as_str(), a.start, a.end))
            .collect();
        assert_eq!(
            spans,
            vec![
                ("Token", 0, 3),
                ("SpaceToken", 3, 5),
                ("Token", 5, 9),
                ("SpaceToken", 9, 10),
            ]
        );
    }
}
