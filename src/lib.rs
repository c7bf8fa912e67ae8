//! # extgaz: Extended Gazetteer
//!
//! A compact finite-state lexicon for finding hundreds of thousands of entries in text at
//! once. Each entry carries the features of the list it came from plus its own key/value
//! features.
//!
//! A [`GazStore`] is filled with entries, compacted into its immutable query form, and then
//! scanned either over raw text or over word annotations of a [`Document`].
//!
//! ## Examples
//!
//! ```
//! use extgaz::{ExtendedGazetteer, ExtendedGazetteerOptions, FeatureMap, GazStore, Gazetteer};
//!
//! let mut store = GazStore::new();
//! let cities = store.add_list_info("Location", "cities.lst", FeatureMap::new()).unwrap();
//! store.add_lookup("New", cities, &[("kind", "prefix")]).unwrap();
//! store.add_lookup("New York", cities, &[("country", "US")]).unwrap();
//! store.compact().unwrap();
//!
//! let gazetteer = Gazetteer::from_store(store, true, "en").unwrap();
//! let ext = ExtendedGazetteer::new(gazetteer, ExtendedGazetteerOptions::new()).unwrap();
//!
//! let anns = ext.annotate_text("New York City").unwrap();
//! assert_eq!(1, anns.len());
//! assert_eq!((0, 8), (anns[0].start, anns[0].end));
//! assert_eq!("US", anns[0].features["country"].to_string());
//! ```
//!
//! Lexicons are usually described by a `.def` or `.defyaml` file and opened through
//! [`Gazetteer::open()`], which caches the compiled automaton next to the configuration and
//! shares it between all gazetteers using the same configuration.

mod blob;
mod casefold;
mod charmap;
mod intpack;
mod serializer;
mod states;

pub mod chunk;
pub mod config;
pub mod document;
pub mod errors;
pub mod feature_gazetteer;
pub mod features;
pub mod gazetteer;
pub mod preference;
pub mod registry;
pub mod scan;
pub mod store;

#[cfg(test)]
mod tests;

pub use blob::BlobStore;
pub use casefold::CaseFolder;
pub use charmap::{CharMapPhase1, CharMapPhase2, Transitions};
pub use config::{GazetteerConfig, ListDescriptor};
pub use document::{Annotation, Document};
pub use feature_gazetteer::{FeatureGazetteer, FeatureGazetteerOptions, ProcessingMode};
pub use features::{FeatureMap, FeatureValue};
pub use gazetteer::{ExtendedGazetteer, ExtendedGazetteerOptions, Gazetteer};
pub use preference::{MatchPreference, RegexAnnotator, RegexRule};
pub use registry::{CacheKey, SharedStore, StoreCache};
pub use states::{StateStats, StateStore};
pub use store::{GazStore, ListInfo, Lookup, State};
