//! Whole-value matching of annotation features.
//!
//! A [`FeatureGazetteer`] looks up the value of one feature of every word annotation and
//! edits the document depending on whether the value matched.

use std::collections::BTreeSet;

use crate::document::{Annotation, Document};
use crate::errors::{GazetteerError, Result};
use crate::features::{FeatureMap, FeatureValue};
use crate::gazetteer::Gazetteer;
use crate::store::{Lookup, LookupIter};

/// What to do with a word annotation after looking it up.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProcessingMode {
    /// Adds the payload features that the word does not have yet.
    #[default]
    AddFeatures,

    /// Adds the payload features, replacing existing values.
    OverwriteFeatures,

    /// Removes words that matched.
    RemoveAnnotation,

    /// Emits a new annotation over each matching word, one per payload.
    AddNewAnnotation,

    /// Removes words that did not match.
    KeepOnlyMatches,
}

/// Query-time options of a [`FeatureGazetteer`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeatureGazetteerOptions {
    word_type: String,
    containing_type: Option<String>,
    text_feature: Option<String>,
    match_at_start_only: bool,
    match_at_end_only: bool,
    mode: ProcessingMode,
    output_type: Option<String>,
    feature_prefix: String,
}

impl Default for FeatureGazetteerOptions {
    fn default() -> Self {
        Self {
            word_type: "Token".to_string(),
            containing_type: None,
            text_feature: None,
            match_at_start_only: true,
            match_at_end_only: true,
            mode: ProcessingMode::default(),
            output_type: None,
            feature_prefix: String::new(),
        }
    }
}

impl FeatureGazetteerOptions {
    /// Creates the default options.
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn word_type<S: Into<String>>(mut self, word_type: S) -> Self {
        self.word_type = word_type.into();
        self
    }

    /// Only processes words inside annotations of this type. An empty name processes all.
    #[must_use]
    pub fn containing_type<S: Into<String>>(mut self, containing_type: S) -> Self {
        let containing_type = containing_type.into();
        self.containing_type = (!containing_type.is_empty()).then_some(containing_type);
        self
    }

    /// Looks up this feature instead of the covered text. Words without it never match.
    #[must_use]
    pub fn text_feature<S: Into<String>>(mut self, text_feature: S) -> Self {
        let text_feature = text_feature.into();
        self.text_feature = (!text_feature.is_empty()).then_some(text_feature);
        self
    }

    /// Requires a match to start at the first character of the value.
    #[must_use]
    pub const fn match_at_start_only(mut self, yes: bool) -> Self {
        self.match_at_start_only = yes;
        self
    }

    /// Requires a match to end at the last character of the value.
    #[must_use]
    pub const fn match_at_end_only(mut self, yes: bool) -> Self {
        self.match_at_end_only = yes;
        self
    }

    #[must_use]
    pub const fn mode(mut self, mode: ProcessingMode) -> Self {
        self.mode = mode;
        self
    }

    /// Uses this type for new annotations instead of the list's type.
    #[must_use]
    pub fn output_type<S: Into<String>>(mut self, output_type: S) -> Self {
        let output_type = output_type.into();
        self.output_type = (!output_type.is_empty()).then_some(output_type);
        self
    }

    /// Prepends this to the names of features added to words.
    #[must_use]
    pub fn feature_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.feature_prefix = prefix.into();
        self
    }
}

/// Matches feature values of word annotations against a lexicon.
pub struct FeatureGazetteer {
    gazetteer: Gazetteer,
    options: FeatureGazetteerOptions,
}

impl FeatureGazetteer {
    /// Creates a gazetteer.
    ///
    /// # Errors
    ///
    /// [`GazetteerError::Config`] is returned when the word type is empty.
    pub fn new(gazetteer: Gazetteer, options: FeatureGazetteerOptions) -> Result<Self> {
        if options.word_type.is_empty() {
            return Err(GazetteerError::config("word_type", "must not be empty"));
        }
        Ok(Self { gazetteer, options })
    }

    /// Returns the underlying gazetteer.
    pub const fn gazetteer(&self) -> &Gazetteer {
        &self.gazetteer
    }

    /// Looks up `value` and returns the payloads of the first match, or `None`.
    ///
    /// Starts are tried from left to right and only the first character is tried if matches
    /// must start there. From each start the shortest entry that reaches far enough wins: any
    /// entry if matches may end anywhere, else only an entry covering the rest of the value.
    pub fn find(&self, value: &str) -> Option<LookupIter<'_>> {
        let folder = self.gazetteer.case_folder();
        let chars: Vec<char> = value
            .chars()
            .map(|c| folder.map_or(c, |f| f.fold_char(c)))
            .collect();
        if chars.is_empty() {
            return None;
        }
        let last = chars.len() - 1;
        let last_start = if self.options.match_at_start_only { 0 } else { last };
        let min_end = if self.options.match_at_end_only { last } else { 0 };
        let root = self.gazetteer.store().initial_state();
        for start in 0..=last_start {
            let mut state = root;
            for (i, &c) in chars.iter().enumerate().skip(start) {
                let Some(next) = state.next(c) else {
                    break;
                };
                state = next;
                if state.is_final() && i >= min_end {
                    return Some(state.lookups());
                }
            }
        }
        None
    }

    /// Processes the word annotations of `doc` and returns the annotations created in
    /// [`ProcessingMode::AddNewAnnotation`] mode.
    ///
    /// Words inside several containing annotations are processed once per container.
    ///
    /// # Errors
    ///
    /// No error is returned at present.
    pub fn execute(&self, doc: &mut Document) -> Result<Vec<Annotation>> {
        let words = match &self.options.containing_type {
            Some(containing_type) => {
                let mut words = vec![];
                for outer in doc.of_type(containing_type) {
                    let range = outer.span();
                    words.extend(
                        doc.indices_of_type(&self.options.word_type)
                            .into_iter()
                            .filter(|&i| doc.annotations()[i].is_within(&range)),
                    );
                }
                words
            }
            None => doc.indices_of_type(&self.options.word_type),
        };

        let mut output = vec![];
        let mut removed = BTreeSet::new();
        for i in words {
            let value = self.word_value(doc, &doc.annotations()[i]);
            let lookups = self.find(&value);
            match (self.options.mode, lookups) {
                (ProcessingMode::AddFeatures, Some(lookups)) => {
                    self.add_features(&mut doc.annotations_mut()[i].features, lookups, false);
                }
                (ProcessingMode::OverwriteFeatures, Some(lookups)) => {
                    self.add_features(&mut doc.annotations_mut()[i].features, lookups, true);
                }
                (ProcessingMode::RemoveAnnotation, Some(_))
                | (ProcessingMode::KeepOnlyMatches, None) => {
                    removed.insert(i);
                }
                (ProcessingMode::AddNewAnnotation, Some(lookups)) => {
                    let word = &doc.annotations()[i];
                    for lookup in lookups {
                        output.push(Annotation {
                            start: word.start,
                            end: word.end,
                            annotation_type: self.output_type(&lookup).to_string(),
                            features: payload_features(&lookup),
                        });
                    }
                }
                _ => {}
            }
        }

        tracing::debug!(
            added = output.len(),
            removed = removed.len(),
            "feature gazetteer finished"
        );
        let annotations = doc.annotations_mut();
        for i in removed.into_iter().rev() {
            annotations.remove(i);
        }
        Ok(output)
    }

    fn word_value(&self, doc: &Document, word: &Annotation) -> String {
        match &self.options.text_feature {
            Some(feature) => word
                .features
                .get(feature)
                .map(|v| v.to_string())
                .unwrap_or_default(),
            None => doc.slice(word.span()).unwrap_or_default().to_string(),
        }
    }

    fn output_type<'a>(&'a self, lookup: &Lookup<'a>) -> &'a str {
        self.options
            .output_type
            .as_deref()
            .unwrap_or_else(|| lookup.list_info().annotation_type())
    }

    fn add_features(&self, target: &mut FeatureMap, lookups: LookupIter, overwrite: bool) {
        for lookup in lookups {
            for (key, value) in payload_features(&lookup) {
                let key = format!("{}{key}", self.options.feature_prefix);
                if overwrite {
                    target.insert(key, value);
                } else {
                    target.entry(key).or_insert(value);
                }
            }
        }
    }
}

fn payload_features(lookup: &Lookup) -> FeatureMap {
    let mut features = lookup.list_info().features().clone();
    for (key, value) in lookup.features() {
        features.insert(key.to_string(), FeatureValue::from(value));
    }
    features
}
