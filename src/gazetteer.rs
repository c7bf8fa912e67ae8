//! Gazetteers over a shared store, and the span-scanning [`ExtendedGazetteer`].

use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::casefold::CaseFolder;
use crate::chunk::{Boundaries, TextChunk, WordSource};
use crate::config::{self, GazetteerConfig};
use crate::document::{Annotation, Document};
use crate::errors::{GazetteerError, Result};
use crate::features::FeatureValue;
use crate::registry::{SharedStore, StoreCache};
use crate::scan::{ChunkMatch, Scanner};
use crate::store::GazStore;

/// Feature holding the character class of the first matched character.
pub const FIRST_CHAR_CATEGORY_FEATURE: &str = "_firstcharCategory";

/// Feature telling whether the first matched character is upper case.
pub const FIRST_CHAR_UPPER_FEATURE: &str = "_firstcharUpper";

/// Feature holding the matched chunk text.
pub const MATCHED_STRING_FEATURE: &str = "_string";

/// A loaded lexicon together with the case folding it was built with.
#[derive(Debug)]
pub struct Gazetteer {
    store: SharedStore,
    folder: Option<CaseFolder>,
    origin: Option<(StoreCache, GazetteerConfig)>,
}

impl Gazetteer {
    /// Opens the lexicon of `config` through the process-wide store cache.
    ///
    /// # Errors
    ///
    /// Errors from loading the configuration, its lists, or its cache file are returned.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use extgaz::{Gazetteer, GazetteerConfig};
    ///
    /// let config = GazetteerConfig::new("lists/cities.def").case_sensitive(false);
    /// let gazetteer = Gazetteer::open(&config).unwrap();
    /// assert!(gazetteer.store().match_str("PARIS").is_some());
    /// ```
    pub fn open(config: &GazetteerConfig) -> Result<Self> {
        Self::open_in(StoreCache::global(), config)
    }

    /// Opens the lexicon of `config` through the given cache.
    ///
    /// # Errors
    ///
    /// Errors from loading the configuration, its lists, or its cache file are returned.
    pub fn open_in(cache: &StoreCache, config: &GazetteerConfig) -> Result<Self> {
        let store = cache.acquire(config.cache_key(), || config::load_store(config))?;
        Ok(Self {
            store,
            folder: config.case_folder(),
            origin: Some((cache.clone(), config.clone())),
        })
    }

    /// Wraps a store that was built in memory. A case-insensitive store must have been filled
    /// with entries folded for `locale`.
    ///
    /// # Errors
    ///
    /// [`GazetteerError::InvalidOperation`] is returned if `store` is not compacted.
    pub fn from_store(store: GazStore, case_sensitive: bool, locale: &str) -> Result<Self> {
        if !store.is_compacted() {
            return Err(GazetteerError::invalid_operation(
                "from_store",
                "the store must be compacted before matching",
            ));
        }
        Ok(Self {
            store: SharedStore::detached(store),
            folder: (!case_sensitive).then(|| CaseFolder::new(locale)),
            origin: None,
        })
    }

    /// Evicts the store from its cache and loads it again. A detached store is kept.
    ///
    /// # Errors
    ///
    /// Errors from reloading are returned and the old store stays in use.
    pub fn reinit(&mut self) -> Result<()> {
        let Some((cache, config)) = &self.origin else {
            return Ok(());
        };
        let key = config.cache_key();
        tracing::info!(key = %key, "force-removing gazetteer store");
        cache.remove(&key);
        self.store = cache.acquire(key, || config::load_store(config))?;
        Ok(())
    }

    /// Returns the store.
    pub fn store(&self) -> &GazStore {
        &self.store
    }

    /// Returns the case folder, or `None` if matching respects case.
    pub fn case_folder(&self) -> Option<&CaseFolder> {
        self.folder.as_ref()
    }
}

/// Query-time options of an [`ExtendedGazetteer`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtendedGazetteerOptions {
    word_type: String,
    space_type: String,
    containing_type: Option<String>,
    splitting_type: Option<String>,
    text_feature: Option<String>,
    word_start_only: bool,
    word_end_only: bool,
    longest_match_only: bool,
    output_type: Option<String>,
}

impl Default for ExtendedGazetteerOptions {
    fn default() -> Self {
        Self {
            word_type: "Token".to_string(),
            space_type: "SpaceToken".to_string(),
            containing_type: None,
            splitting_type: None,
            text_feature: None,
            word_start_only: true,
            word_end_only: true,
            longest_match_only: true,
            output_type: None,
        }
    }
}

fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

impl ExtendedGazetteerOptions {
    /// Creates the default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the type of the word annotations.
    #[must_use]
    pub fn word_type<S: Into<String>>(mut self, word_type: S) -> Self {
        self.word_type = word_type.into();
        self
    }

    /// Sets the type of the space annotations.
    #[must_use]
    pub fn space_type<S: Into<String>>(mut self, space_type: S) -> Self {
        self.space_type = space_type.into();
        self
    }

    /// Scans each annotation of this type separately. An empty name scans the whole document.
    #[must_use]
    pub fn containing_type<S: Into<String>>(mut self, containing_type: S) -> Self {
        self.containing_type = non_empty(containing_type.into());
        self
    }

    /// Ends a scan unit at the start of each annotation of this type.
    #[must_use]
    pub fn splitting_type<S: Into<String>>(mut self, splitting_type: S) -> Self {
        self.splitting_type = non_empty(splitting_type.into());
        self
    }

    /// Takes the text of each word from this feature instead of the document.
    #[must_use]
    pub fn text_feature<S: Into<String>>(mut self, text_feature: S) -> Self {
        self.text_feature = non_empty(text_feature.into());
        self
    }

    /// Sets whether matches may only start at the beginning of a word.
    #[must_use]
    pub const fn word_start_only(mut self, yes: bool) -> Self {
        self.word_start_only = yes;
        self
    }

    /// Sets whether matches may only end at the end of a word.
    #[must_use]
    pub const fn word_end_only(mut self, yes: bool) -> Self {
        self.word_end_only = yes;
        self
    }

    /// Sets whether only the longest match from each start is reported.
    #[must_use]
    pub const fn longest_match_only(mut self, yes: bool) -> Self {
        self.longest_match_only = yes;
        self
    }

    /// Uses this type for every emitted annotation instead of the list's type.
    #[must_use]
    pub fn output_type<S: Into<String>>(mut self, output_type: S) -> Self {
        self.output_type = non_empty(output_type.into());
        self
    }

    const fn boundaries(&self) -> Boundaries {
        Boundaries {
            word_start_only: self.word_start_only,
            word_end_only: self.word_end_only,
        }
    }

    fn check(&self) -> Result<()> {
        if self.word_type.is_empty() {
            return Err(GazetteerError::config("word_type", "must not be empty"));
        }
        if self.space_type.is_empty() {
            return Err(GazetteerError::config("space_type", "must not be empty"));
        }
        Ok(())
    }
}

/// Finds lexicon entries in the text spanned by word annotations.
///
/// Every match yields one annotation per payload. Its features are the list features,
/// the list number, the entry features, and three features describing the matched text.
pub struct ExtendedGazetteer {
    gazetteer: Gazetteer,
    options: ExtendedGazetteerOptions,
    interrupt: Arc<AtomicBool>,
}

impl ExtendedGazetteer {
    /// Creates a gazetteer.
    ///
    /// # Errors
    ///
    /// [`GazetteerError::Config`] is returned when a required option is empty.
    pub fn new(gazetteer: Gazetteer, options: ExtendedGazetteerOptions) -> Result<Self> {
        options.check()?;
        Ok(Self {
            gazetteer,
            options,
            interrupt: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Returns the flag that aborts a running [`Self::execute()`] when set.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    /// Returns the underlying gazetteer.
    pub const fn gazetteer(&self) -> &Gazetteer {
        &self.gazetteer
    }

    /// Returns the options.
    pub const fn options(&self) -> &ExtendedGazetteerOptions {
        &self.options
    }

    /// Scans the word and space annotations of `doc` and returns the match annotations in the
    /// order they were found. The interrupt flag is cleared when the run starts.
    ///
    /// # Errors
    ///
    /// [`GazetteerError::Interrupted`] is returned when the interrupt flag gets set.
    pub fn execute(&self, doc: &Document) -> Result<Vec<Annotation>> {
        self.interrupt.store(false, Ordering::Relaxed);
        let source = WordSource {
            word_type: &self.options.word_type,
            space_type: &self.options.space_type,
            text_feature: self.options.text_feature.as_deref(),
        };
        let mut output = vec![];
        for unit in scan_units(
            doc,
            self.options.containing_type.as_deref(),
            self.options.splitting_type.as_deref(),
        ) {
            let chunk =
                TextChunk::from_annotations(doc, unit, &source, self.options.boundaries());
            self.annotate_chunk(&chunk, &mut output)?;
        }
        tracing::debug!(matches = output.len(), "extended gazetteer finished");
        Ok(output)
    }

    /// Scans `text` directly, without word annotations. Word boundaries are runs of
    /// alphanumeric characters.
    ///
    /// # Errors
    ///
    /// [`GazetteerError::Interrupted`] is returned when the interrupt flag gets set.
    pub fn annotate_text(&self, text: &str) -> Result<Vec<Annotation>> {
        self.interrupt.store(false, Ordering::Relaxed);
        let chunk = TextChunk::from_text(text, 0..text.len(), self.options.boundaries());
        let mut output = vec![];
        self.annotate_chunk(&chunk, &mut output)?;
        Ok(output)
    }

    fn annotate_chunk(&self, chunk: &TextChunk, output: &mut Vec<Annotation>) -> Result<()> {
        let store = self.gazetteer.store();
        let scanner = Scanner::new(store)
            .case_folder(self.gazetteer.case_folder())
            .longest_match_only(self.options.longest_match_only)
            .interrupt(Some(&self.interrupt));
        let res = scanner.scan(chunk, |m| self.create_lookups(chunk, m, output));
        if res.is_err() {
            self.interrupt.store(false, Ordering::Relaxed);
        }
        res
    }

    fn create_lookups(&self, chunk: &TextChunk, m: ChunkMatch, output: &mut Vec<Annotation>) {
        let first_char = chunk.chars()[m.first];
        let matched = chunk.text(m.first, m.last);
        for lookup in m.state.lookups() {
            let mut features = lookup.feature_map();
            features.insert(
                FIRST_CHAR_CATEGORY_FEATURE.to_string(),
                char_category(first_char).into(),
            );
            features.insert(
                FIRST_CHAR_UPPER_FEATURE.to_string(),
                first_char.is_uppercase().into(),
            );
            features.insert(
                MATCHED_STRING_FEATURE.to_string(),
                FeatureValue::from(matched.as_str()),
            );
            let annotation_type = self
                .options
                .output_type
                .as_deref()
                .unwrap_or_else(|| lookup.list_info().annotation_type());
            output.push(Annotation {
                start: chunk.start_offset(m.first),
                end: chunk.end_offset(m.last),
                annotation_type: annotation_type.to_string(),
                features,
            });
        }
    }
}

/// Returns the byte ranges scanned separately.
///
/// With a containing type there is one range per containing annotation, otherwise the whole
/// document. Each range is cut at the start of every splitting annotation inside it.
pub fn scan_units(
    doc: &Document,
    containing_type: Option<&str>,
    splitting_type: Option<&str>,
) -> Vec<Range<usize>> {
    let outer: Vec<Range<usize>> = match containing_type {
        Some(t) => doc.of_type(t).into_iter().map(Annotation::span).collect(),
        None => vec![0..doc.text().len()],
    };
    let Some(splitting_type) = splitting_type else {
        return outer;
    };
    let mut units = vec![];
    for range in outer {
        let mut last = range.start;
        for split in doc.of_type_within(splitting_type, &range) {
            if split.start > last {
                units.push(last..split.start);
            }
            last = split.start;
        }
        if last < range.end {
            units.push(last..range.end);
        }
    }
    units
}

/// Returns a coarse Unicode general category of `c`: `Lu`, `Ll`, `Lo`, `N`, `Z`, `C`, `P`,
/// or `S`.
pub fn char_category(c: char) -> &'static str {
    if c.is_uppercase() {
        "Lu"
    } else if c.is_lowercase() {
        "Ll"
    } else if c.is_alphabetic() {
        "Lo"
    } else if c.is_numeric() {
        "N"
    } else if c.is_whitespace() && !c.is_control() {
        "Z"
    } else if c.is_control() || matches!(c, '\u{200b}'..='\u{200f}' | '\u{feff}') {
        "C"
    } else if is_punctuation(c) {
        "P"
    } else {
        "S"
    }
}

fn is_punctuation(c: char) -> bool {
    if c.is_ascii() {
        return c.is_ascii_punctuation() && !matches!(c, '$' | '+' | '<' | '=' | '>' | '^' | '`' | '|' | '~');
    }
    matches!(
        c,
        '¡' | '§' | '«' | '¶' | '·' | '»' | '¿'
            | '\u{2010}'..='\u{2027}'
            | '\u{2030}'..='\u{205e}'
            | '\u{3001}'..='\u{3003}'
            | '\u{3008}'..='\u{3011}'
            | '\u{3014}'..='\u{301f}'
            | '\u{ff01}'..='\u{ff0f}'
    ) && !matches!(c, '\u{2044}' | '\u{2052}')
}
