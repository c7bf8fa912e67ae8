//! Rule-ordered selection among competing pattern matches.
//!
//! [`RegexAnnotator`] runs a list of regular expressions over a [`TextChunk`]. At each step it
//! takes the smallest offset where any rule matches, selects among the rules matching there
//! according to a [`MatchPreference`], and continues after the selected matches.

use regex::{Captures, Regex};

use crate::chunk::{Boundaries, TextChunk};
use crate::document::Annotation;
use crate::errors::{GazetteerError, Result};
use crate::features::{FeatureMap, FeatureValue};

/// Which of the matches starting at the same offset to keep. Ties are broken by the order
/// the rules were declared in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MatchPreference {
    /// Every match.
    All,

    /// The match of the first rule.
    FirstRule,

    /// The match of the last rule.
    LastRule,

    /// Every match of the greatest length.
    LongestAllRules,

    /// The first rule among the matches of the greatest length.
    LongestFirstRule,

    /// The last rule among the matches of the greatest length.
    #[default]
    LongestLastRule,
}

/// A match of one rule, used as input to [`select()`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub rule: usize,
    pub start: usize,
    pub end: usize,
}

impl Candidate {
    #[inline(always)]
    pub const fn len(&self) -> usize {
        self.end - self.start
    }

    #[inline(always)]
    pub const fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

/// Selects among `candidates`, which must all start at the same offset and be ordered by
/// rule. Returns the indices of the selected candidates and the length to skip when matches
/// may not overlap.
pub fn select(preference: MatchPreference, candidates: &[Candidate]) -> (Vec<usize>, usize) {
    let Some(longest) = candidates.iter().map(Candidate::len).max() else {
        return (vec![], 0);
    };
    let single = |i: usize| (vec![i], candidates[i].len());
    let last = candidates.len() - 1;
    if candidates.len() == 1 {
        return single(0);
    }
    let longest_indices = || {
        (0..candidates.len())
            .filter(|&i| candidates[i].len() == longest)
            .collect::<Vec<_>>()
    };
    match preference {
        MatchPreference::All => ((0..candidates.len()).collect(), longest),
        MatchPreference::FirstRule => single(0),
        MatchPreference::LastRule => single(last),
        MatchPreference::LongestAllRules => (longest_indices(), longest),
        MatchPreference::LongestFirstRule => {
            (longest_indices().into_iter().take(1).collect(), longest)
        }
        MatchPreference::LongestLastRule => {
            (longest_indices().into_iter().rev().take(1).collect(), longest)
        }
    }
}

/// A pattern and the annotation it produces.
#[derive(Clone, Debug)]
pub struct RegexRule {
    regex: Regex,
    annotation_type: String,
    group: usize,
    features: FeatureMap,
    group_features: Vec<(String, usize)>,
}

impl RegexRule {
    /// Creates a rule annotating the whole match.
    ///
    /// # Errors
    ///
    /// [`GazetteerError::Config`] is returned for an invalid pattern.
    pub fn new<T>(pattern: &str, annotation_type: T) -> Result<Self>
    where
        T: Into<String>,
    {
        let regex = Regex::new(pattern)
            .map_err(|e| GazetteerError::config("pattern", e.to_string()))?;
        Ok(Self {
            regex,
            annotation_type: annotation_type.into(),
            group: 0,
            features: FeatureMap::new(),
            group_features: vec![],
        })
    }

    /// Annotates the span of this capture group instead of the whole match.
    #[must_use]
    pub const fn group(mut self, group: usize) -> Self {
        self.group = group;
        self
    }

    /// Adds a constant feature.
    #[must_use]
    pub fn feature<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<FeatureValue>,
    {
        self.features.insert(key.into(), value.into());
        self
    }

    /// Sets a feature to the text of a capture group, if the group took part in the match.
    #[must_use]
    pub fn group_feature<K>(mut self, key: K, group: usize) -> Self
    where
        K: Into<String>,
    {
        self.group_features.push((key.into(), group));
        self
    }
}

/// Annotates chunks with the matches of a list of rules.
#[derive(Clone, Debug)]
pub struct RegexAnnotator {
    rules: Vec<RegexRule>,
    preference: MatchPreference,
    overlapping: bool,
}

impl RegexAnnotator {
    /// Creates an annotator preferring the longest match of the last rule, without overlaps.
    pub fn new(rules: Vec<RegexRule>) -> Self {
        Self {
            rules,
            preference: MatchPreference::default(),
            overlapping: false,
        }
    }

    #[must_use]
    pub const fn preference(mut self, preference: MatchPreference) -> Self {
        self.preference = preference;
        self
    }

    /// Allows matches to overlap. The next step then starts one character after the current
    /// offset instead of after the longest selected match.
    #[must_use]
    pub const fn overlapping(mut self, yes: bool) -> Self {
        self.overlapping = yes;
        self
    }

    /// Annotates a plain text.
    pub fn annotate_text(&self, text: &str) -> Vec<Annotation> {
        self.annotate_chunk(&TextChunk::from_text(
            text,
            0..text.len(),
            Boundaries::default(),
        ))
    }

    /// Annotates a chunk. Offsets are mapped back through the chunk.
    pub fn annotate_chunk(&self, chunk: &TextChunk) -> Vec<Annotation> {
        let haystack = chunk.to_text();
        let char_starts: Vec<usize> = haystack.char_indices().map(|(i, _)| i).collect();
        let mut output = vec![];
        let mut current: Vec<Option<Captures>> = self
            .rules
            .iter()
            .map(|r| r.regex.captures(&haystack))
            .collect();

        let mut offset = 0;
        while offset < haystack.len() {
            for (rule, caps) in self.rules.iter().zip(current.iter_mut()) {
                if caps
                    .as_ref()
                    .and_then(|c| c.get(0))
                    .map_or(false, |m| m.start() < offset)
                {
                    *caps = rule.regex.captures_at(&haystack, offset);
                }
            }
            let Some(smallest) = current
                .iter()
                .flatten()
                .filter_map(|c| c.get(0))
                .map(|m| m.start())
                .min()
            else {
                break;
            };
            let candidates: Vec<Candidate> = current
                .iter()
                .enumerate()
                .filter_map(|(rule, caps)| {
                    let m = caps.as_ref()?.get(0)?;
                    (m.start() == smallest).then_some(Candidate {
                        rule,
                        start: m.start(),
                        end: m.end(),
                    })
                })
                .collect();
            let (selected, skip) = select(self.preference, &candidates);
            for i in selected {
                let rule = candidates[i].rule;
                if let Some(caps) = &current[rule] {
                    self.annotate_match(&self.rules[rule], caps, chunk, &char_starts, &mut output);
                }
            }

            offset = if self.overlapping || skip == 0 {
                next_char_boundary(&haystack, smallest)
            } else {
                smallest + skip
            };
        }
        output
    }

    fn annotate_match(
        &self,
        rule: &RegexRule,
        caps: &Captures,
        chunk: &TextChunk,
        char_starts: &[usize],
        output: &mut Vec<Annotation>,
    ) {
        let Some(m) = caps.get(rule.group) else {
            return;
        };
        if m.is_empty() {
            return;
        }
        let first = char_starts.partition_point(|&s| s < m.start());
        let last = char_starts.partition_point(|&s| s < m.end()) - 1;
        let mut features = rule.features.clone();
        for (key, group) in &rule.group_features {
            if let Some(g) = caps.get(*group) {
                features.insert(key.clone(), FeatureValue::from(g.as_str()));
            }
        }
        output.push(Annotation {
            start: chunk.start_offset(first),
            end: chunk.end_offset(last),
            annotation_type: rule.annotation_type.clone(),
            features,
        });
    }
}

fn next_char_boundary(s: &str, offset: usize) -> usize {
    s[offset..]
        .chars()
        .next()
        .map_or(s.len(), |c| offset + c.len_utf8())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(rule: usize, len: usize) -> Candidate {
        Candidate {
            rule,
            start: 0,
            end: len,
        }
    }

    #[test]
    fn test_select() {
        let cands = [c(0, 2), c(1, 5), c(2, 5), c(3, 1)];
        assert_eq!(select(MatchPreference::All, &cands), (vec![0, 1, 2, 3], 5));
        assert_eq!(select(MatchPreference::FirstRule, &cands), (vec![0], 2));
        assert_eq!(select(MatchPreference::LastRule, &cands), (vec![3], 1));
        assert_eq!(select(MatchPreference::LongestAllRules, &cands), (vec![1, 2], 5));
        assert_eq!(select(MatchPreference::LongestFirstRule, &cands), (vec![1], 5));
        assert_eq!(select(MatchPreference::LongestLastRule, &cands), (vec![2], 5));
        assert_eq!(select(MatchPreference::LongestLastRule, &[]), (vec![], 0));
        assert_eq!(select(MatchPreference::All, &[c(4, 3)]), (vec![0], 3));
    }

    fn types(anns: &[Annotation]) -> Vec<(String, usize, usize)> {
        anns.iter()
            .map(|a| (a.annotation_type.clone(), a.start, a.end))
            .collect()
    }

    fn rules() -> Vec<RegexRule> {
        vec![
            RegexRule::new(r"\d+", "Number").unwrap(),
            RegexRule::new(r"\d+\.\d+", "Decimal").unwrap(),
            RegexRule::new(r"\d", "Digit").unwrap(),
        ]
    }

    #[test]
    fn test_longest_last_rule() {
        let anns = RegexAnnotator::new(rules()).annotate_text("pi 3.14 and 42");
        assert_eq!(
            types(&anns),
            vec![
                ("Decimal".to_string(), 3, 7),
                ("Number".to_string(), 12, 14),
            ]
        );
    }

    #[test]
    fn test_first_rule_and_overlap() {
        let annotator = RegexAnnotator::new(rules()).preference(MatchPreference::FirstRule);
        assert_eq!(
            types(&annotator.annotate_text("3.14")),
            vec![("Number".to_string(), 0, 1), ("Number".to_string(), 2, 4)]
        );

        let annotator = annotator.overlapping(true);
        assert_eq!(
            types(&annotator.annotate_text("42")),
            vec![("Number".to_string(), 0, 2), ("Number".to_string(), 1, 2)]
        );
    }

    #[test]
    fn test_groups_and_features() {
        let rule = RegexRule::new(r"(?:Mr|Ms)\. (\p{Lu}\w+)", "Person")
            .unwrap()
            .group(1)
            .feature("kind", "title")
            .group_feature("surname", 1);
        let anns = RegexAnnotator::new(vec![rule]).annotate_text("Hi Ms. Müller!");
        assert_eq!(anns.len(), 1);
        assert_eq!((anns[0].start, anns[0].end), (7, 14));
        assert_eq!(anns[0].features["kind"], FeatureValue::from("title"));
        assert_eq!(anns[0].features["surname"], FeatureValue::from("Müller"));
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(matches!(
            RegexRule::new("(", "X"),
            Err(GazetteerError::Config(_))
        ));
    }
}
