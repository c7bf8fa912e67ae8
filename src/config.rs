//! Lexicon configuration files and list loading.
//!
//! Two configuration formats are understood:
//!
//! - `.def`: one list per line, `listFile:majorType:minorType:languages:annotationType`, where
//!   only `listFile` is required.
//! - `.defyaml`: a YAML document, either a sequence of list descriptors or a mapping with
//!   optional `cacheDir` and `cacheFile` keys and a `listFiles` sequence.
//!
//! List files hold one entry per line, optionally followed by `separator key=value` segments.
//! Files ending in `.gz` are decompressed while reading.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::Instant;

use flate2::read::GzDecoder;
use serde::Deserialize;

use crate::casefold::CaseFolder;
use crate::errors::{GazetteerError, Result};
use crate::features::{FeatureMap, FeatureValue};
use crate::registry::CacheKey;
use crate::store::GazStore;

/// Maximum number of `key=value` features a single list entry may carry.
pub const MAX_FEATURES_PER_ENTRY: usize = 200;

/// Annotation type used when a list does not name one.
pub const DEFAULT_ANNOTATION_TYPE: &str = "Lookup";

/// List feature holding the major type.
pub const MAJOR_TYPE_FEATURE: &str = "majorType";

/// List feature holding the minor type.
pub const MINOR_TYPE_FEATURE: &str = "minorType";

/// List feature holding the languages.
pub const LANGUAGE_FEATURE: &str = "language";

const CACHE_EXTENSION: &str = "gazbin";

/// Load-time settings of a gazetteer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GazetteerConfig {
    config_path: PathBuf,
    case_sensitive: bool,
    locale: String,
    separator: String,
}

impl GazetteerConfig {
    /// Creates a case-sensitive configuration for the given `.def` or `.defyaml` file.
    pub fn new<P>(config_path: P) -> Self
    where
        P: Into<PathBuf>,
    {
        Self {
            config_path: config_path.into(),
            case_sensitive: true,
            locale: "en".to_string(),
            separator: "\t".to_string(),
        }
    }

    /// Sets whether matching respects case.
    #[must_use]
    pub const fn case_sensitive(mut self, yes: bool) -> Self {
        self.case_sensitive = yes;
        self
    }

    /// Sets the language used for case folding.
    #[must_use]
    pub fn locale<S>(mut self, locale: S) -> Self
    where
        S: Into<String>,
    {
        self.locale = locale.into();
        self
    }

    /// Sets the separator between an entry and its features. An empty separator disables
    /// entry features.
    #[must_use]
    pub fn separator<S>(mut self, separator: S) -> Self
    where
        S: Into<String>,
    {
        self.separator = separator.into();
        self
    }

    /// Returns the configuration file.
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Checks if matching respects case.
    pub const fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    /// Returns the folder for case-insensitive matching, or `None` if matching respects case.
    pub fn case_folder(&self) -> Option<CaseFolder> {
        (!self.case_sensitive).then(|| CaseFolder::new(&self.locale))
    }

    /// Returns the key under which the loaded store is shared.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(
            self.config_path.to_string_lossy(),
            self.case_sensitive,
            self.locale.as_str(),
        )
    }

    fn check(&self) -> Result<()> {
        if self.config_path.as_os_str().is_empty() {
            return Err(GazetteerError::config("config_path", "must not be empty"));
        }
        if self.locale.is_empty() {
            return Err(GazetteerError::config("locale", "must not be empty"));
        }
        Ok(())
    }
}

/// One list file and the metadata of its entries.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDescriptor {
    pub list_file: String,
    #[serde(default)]
    pub major_type: Option<String>,
    #[serde(default)]
    pub minor_type: Option<String>,
    #[serde(default)]
    pub languages: Option<String>,
    #[serde(default)]
    pub annotation_type: Option<String>,

    /// Additional list features.
    #[serde(default)]
    pub features: BTreeMap<String, String>,
}

impl ListDescriptor {
    /// Returns the annotation type, defaulting to [`DEFAULT_ANNOTATION_TYPE`].
    pub fn annotation_type(&self) -> &str {
        self.annotation_type
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_ANNOTATION_TYPE)
    }

    /// Returns the features shared by all entries of the list.
    pub fn list_features(&self) -> FeatureMap {
        let mut features: FeatureMap = self
            .features
            .iter()
            .map(|(k, v)| (k.clone(), FeatureValue::from(v.as_str())))
            .collect();
        features.insert(
            MAJOR_TYPE_FEATURE.to_string(),
            self.major_type.clone().unwrap_or_default().into(),
        );
        features.insert(
            MINOR_TYPE_FEATURE.to_string(),
            self.minor_type.clone().unwrap_or_default().into(),
        );
        if let Some(languages) = &self.languages {
            features.insert(LANGUAGE_FEATURE.to_string(), languages.as_str().into());
        }
        features
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DefYaml {
    Lists(Vec<ListDescriptor>),
    Config(DefYamlConfig),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DefYamlConfig {
    #[serde(default)]
    cache_dir: Option<String>,
    #[serde(default, alias = "chacheFile")]
    cache_file: Option<String>,
    #[serde(default)]
    list_files: Vec<ListDescriptor>,
}

/// A parsed configuration file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListDefinition {
    /// Directory relative list paths are resolved against.
    pub base_dir: PathBuf,

    /// Location of the binary cache.
    pub cache_file: PathBuf,

    pub lists: Vec<ListDescriptor>,
}

impl ListDefinition {
    /// Reads a `.def` or `.defyaml` file.
    ///
    /// # Errors
    ///
    /// - [`GazetteerError::Config`] is returned for other extensions and malformed contents.
    /// - [`GazetteerError::Io`] is returned when the file cannot be read.
    pub fn read<P>(config_path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let config_path = config_path.as_ref();
        let base_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let default_cache = config_path.with_extension(CACHE_EXTENSION);
        let extension = config_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        match extension {
            "def" => {
                let text = read_to_string(config_path)?;
                Ok(Self {
                    base_dir,
                    cache_file: default_cache,
                    lists: parse_def(&text, &config_path.display().to_string())?,
                })
            }
            "defyaml" => {
                let text = read_to_string(config_path)?;
                let (lists, cache_dir, cache_file) = parse_defyaml(&text)?;
                let cache_file = match (cache_dir, cache_file) {
                    (None, None) => default_cache,
                    (dir, file) => {
                        let dir = dir.map_or_else(|| base_dir.clone(), |d| base_dir.join(d));
                        let file = file.map_or_else(
                            || {
                                default_cache
                                    .file_name()
                                    .map(PathBuf::from)
                                    .unwrap_or_default()
                            },
                            PathBuf::from,
                        );
                        dir.join(file)
                    }
                };
                Ok(Self {
                    base_dir,
                    cache_file,
                    lists,
                })
            }
            _ => Err(GazetteerError::config(
                "config_path",
                format!(
                    "{} must have a .def or .defyaml extension",
                    config_path.display()
                ),
            )),
        }
    }
}

fn read_to_string(path: &Path) -> Result<String> {
    let mut text = String::new();
    File::open(path)?.read_to_string(&mut text)?;
    Ok(strip_bom(&text).to_string())
}

#[inline(always)]
fn strip_bom(s: &str) -> &str {
    s.strip_prefix('\u{feff}').unwrap_or(s)
}

/// Parses the lines of a `.def` file.
///
/// # Errors
///
/// [`GazetteerError::Config`] is returned for lines with more than five fields or an empty
/// list file name.
pub fn parse_def(text: &str, origin: &str) -> Result<Vec<ListDescriptor>> {
    let mut lists = vec![];
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            tracing::warn!(origin, line = i + 1, "skipping empty line in def file");
            continue;
        }
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() > 5 {
            return Err(GazetteerError::config(
                "def",
                format!("{origin}:{}: more than 5 fields in {line:?}", i + 1),
            ));
        }
        if fields[0].is_empty() {
            return Err(GazetteerError::config(
                "def",
                format!("{origin}:{}: missing list file name", i + 1),
            ));
        }
        let field = |n: usize| fields.get(n).map(|s| s.to_string());
        lists.push(ListDescriptor {
            list_file: fields[0].to_string(),
            major_type: field(1),
            minor_type: field(2),
            languages: field(3),
            annotation_type: field(4),
            features: BTreeMap::new(),
        });
    }
    Ok(lists)
}

type DefYamlParts = (Vec<ListDescriptor>, Option<String>, Option<String>);

/// Parses a `.defyaml` document into its lists and the optional cache directory and file.
///
/// # Errors
///
/// [`GazetteerError::Config`] is returned when the document has neither supported shape.
pub fn parse_defyaml(text: &str) -> Result<DefYamlParts> {
    let parsed: DefYaml = serde_yaml::from_str(text)
        .map_err(|e| GazetteerError::config("defyaml", format!("unsupported document: {e}")))?;
    let parts = match parsed {
        DefYaml::Lists(lists) => (lists, None, None),
        DefYaml::Config(config) => (config.list_files, config.cache_dir, config.cache_file),
    };
    if let Some(list) = parts.0.iter().find(|l| l.list_file.is_empty()) {
        return Err(GazetteerError::config(
            "defyaml",
            format!("missing list file name in {list:?}"),
        ));
    }
    Ok(parts)
}

/// Trims `entry` and collapses every run of whitespace into one space.
pub fn normalize_entry(entry: &str) -> String {
    let mut normalized = String::with_capacity(entry.len());
    for word in entry.split_whitespace() {
        if !normalized.is_empty() {
            normalized.push(' ');
        }
        normalized.push_str(word);
    }
    normalized
}

/// Adds a list entry after normalization. Case-insensitive stores receive the folded forms.
///
/// Entries that are empty after normalization are skipped.
///
/// # Errors
///
/// Errors of [`GazStore::add_lookup()`] are returned.
pub fn add_entry<K, V>(
    store: &mut GazStore,
    folder: Option<&CaseFolder>,
    entry: &str,
    list_index: u32,
    features: &[(K, V)],
) -> Result<()>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let normalized = normalize_entry(entry);
    if normalized.is_empty() {
        return Ok(());
    }
    match folder {
        None => store.add_lookup(&normalized, list_index, features),
        Some(folder) => {
            for variant in folder.variants(&normalized) {
                store.add_lookup(&variant, list_index, features)?;
            }
            Ok(())
        }
    }
}

/// Splits a list line into the entry and its features.
///
/// # Errors
///
/// [`GazetteerError::Data`] is returned for a feature segment without `=`, and
/// [`GazetteerError::Config`] for more than [`MAX_FEATURES_PER_ENTRY`] features.
pub fn parse_list_line<'a>(
    line: &'a str,
    separator: &str,
    origin: &str,
    line_no: usize,
) -> Result<(&'a str, Vec<(&'a str, &'a str)>)> {
    if separator.is_empty() {
        return Ok((line, vec![]));
    }
    let mut segments = line.split(separator);
    let entry = segments.next().unwrap_or_default();
    let mut features = vec![];
    for segment in segments {
        if features.len() == MAX_FEATURES_PER_ENTRY {
            return Err(GazetteerError::config(
                "list",
                format!(
                    "more than {MAX_FEATURES_PER_ENTRY} features in entry at {origin} line {line_no}"
                ),
            ));
        }
        let (key, value) = segment.split_once('=').ok_or_else(|| {
            GazetteerError::data(
                origin,
                line_no,
                format!("not a proper feature=value: {segment:?}"),
            )
        })?;
        features.push((key, value));
    }
    Ok((entry, features))
}

fn open_list(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path)?;
    if path.extension().map_or(false, |e| e == "gz") {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Loads one list file into `store` and returns the number of lines read.
///
/// # Errors
///
/// Any malformed line aborts the load with an error naming the list and the line.
pub fn load_list(
    store: &mut GazStore,
    descriptor: &ListDescriptor,
    base_dir: &Path,
    separator: &str,
    folder: Option<&CaseFolder>,
) -> Result<usize> {
    let path = base_dir.join(&descriptor.list_file);
    let origin = path.display().to_string();
    let list_index = store.add_list_info(
        descriptor.annotation_type(),
        origin.as_str(),
        descriptor.list_features(),
    )?;
    let reader = open_list(&path)?;
    let mut lines = 0;
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = i + 1;
        lines = line_no;
        let line = if i == 0 { strip_bom(&line) } else { &line };
        let result = parse_list_line(line, separator, &origin, line_no).and_then(|(entry, features)| {
            if entry.contains('\0') {
                return Err(GazetteerError::data(
                    &origin,
                    line_no,
                    "entry contains U+0000",
                ));
            }
            add_entry(store, folder, entry, list_index, &features)
        });
        if let Err(e) = result {
            tracing::error!(list = %origin, line = line_no, text = %line, "rejected gazetteer entry");
            return Err(e);
        }
    }
    tracing::debug!(list = %origin, lines, "loaded gazetteer list");
    Ok(lines)
}

/// Builds and compacts a store from all lists of `definition`.
///
/// # Errors
///
/// Any error aborts the whole build.
pub fn build_store(definition: &ListDefinition, config: &GazetteerConfig) -> Result<GazStore> {
    let start = Instant::now();
    let folder = config.case_folder();
    let mut store = GazStore::new();
    for descriptor in &definition.lists {
        load_list(
            &mut store,
            descriptor,
            &definition.base_dir,
            &config.separator,
            folder.as_ref(),
        )?;
    }
    store.compact()?;
    tracing::info!(lists = definition.lists.len(), elapsed = ?start.elapsed(), "built gazetteer from list files");
    Ok(store)
}

/// Loads the store of `config` from its cache file, or builds it from the lists and writes
/// the cache.
///
/// A cache that cannot be written is reported and otherwise ignored.
///
/// # Errors
///
/// Errors from reading the configuration, the lists, or an existing cache are returned.
pub fn load_store(config: &GazetteerConfig) -> Result<GazStore> {
    config.check()?;
    let definition = ListDefinition::read(&config.config_path)?;
    let store = if definition.cache_file.exists() {
        GazStore::load(&definition.cache_file)?
    } else {
        let mut store = build_store(&definition, config)?;
        if let Err(e) = store.save(&definition.cache_file) {
            tracing::warn!(cache = %definition.cache_file.display(), error = %e, "could not write gazetteer cache");
        }
        store
    };
    tracing::info!(stats = %store.stats_string(), "gazetteer store ready");
    Ok(store)
}
