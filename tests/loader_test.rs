use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;

use extgaz::config::{load_store, ListDefinition};
use extgaz::errors::GazetteerError;
use extgaz::{
    ExtendedGazetteer, ExtendedGazetteerOptions, FeatureValue, GazStore, Gazetteer,
    GazetteerConfig, StoreCache,
};

fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

fn write_gz(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
    encoder.write_all(contents.as_bytes()).unwrap();
    encoder.finish().unwrap();
    path
}

fn payload(store: &GazStore, entry: &str) -> Vec<(String, FeatureValue)> {
    store
        .match_str(entry)
        .unwrap_or_else(|| panic!("{entry:?} not found"))
        .flat_map(|l| l.feature_map().into_iter())
        .collect()
}

#[test]
fn test_def_with_gz_and_bom() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "cities.lst",
        "\u{feff}Paris\tcountry=FR\n  New   York \tcountry=US\tpop=8e6\n\n",
    );
    write_gz(dir.path(), "people.lst.gz", "Ada Lovelace\nAlan Turing\tfield=cs\n");
    let def = write(
        dir.path(),
        "all.def",
        "cities.lst:location:city:en:Location\n\npeople.lst.gz:person\n",
    );

    let store = load_store(&GazetteerConfig::new(&def)).unwrap();
    assert!(store.is_compacted());
    assert_eq!(store.list_infos().len(), 2);

    let paris = payload(&store, "Paris");
    assert!(paris.contains(&("country".to_string(), "FR".into())));
    assert!(paris.contains(&("majorType".to_string(), "location".into())));
    assert!(paris.contains(&("minorType".to_string(), "city".into())));
    assert!(paris.contains(&("language".to_string(), "en".into())));
    assert!(paris.contains(&("_listnr".to_string(), FeatureValue::Int(0))));

    let ny = payload(&store, "New York");
    assert!(ny.contains(&("pop".to_string(), "8e6".into())));
    assert!(store.match_str("New   York").is_none());

    let turing = payload(&store, "Alan Turing");
    assert!(turing.contains(&("majorType".to_string(), "person".into())));
    assert!(turing.contains(&("field".to_string(), "cs".into())));
    assert_eq!(
        store.match_str("Ada Lovelace").unwrap().next().unwrap().list_info().annotation_type(),
        "Lookup"
    );

    // The cache is written next to the def file and used from then on.
    let cache = dir.path().join("all.gazbin");
    assert!(cache.exists());
    fs::remove_file(dir.path().join("cities.lst")).unwrap();
    let cached = load_store(&GazetteerConfig::new(&def)).unwrap();
    assert_eq!(cached.num_entries(), store.num_entries());
    assert!(cached.match_str("Paris").is_some());
}

#[test]
fn test_case_insensitive_lists() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "streets.lst", "Straße\nberlin\n");
    let def = write(dir.path(), "streets.def", "streets.lst:street\n");
    let config = GazetteerConfig::new(&def).case_sensitive(false);
    let gazetteer = Gazetteer::open_in(&StoreCache::new(), &config).unwrap();
    let ext = ExtendedGazetteer::new(gazetteer, ExtendedGazetteerOptions::new()).unwrap();

    for text in ["BERLIN", "Berlin", "straße", "STRAßE"] {
        let anns = ext.annotate_text(text).unwrap();
        assert_eq!(anns.len(), 1, "{text}");
        assert_eq!((anns[0].start, anns[0].end), (0, text.len()));
    }
}

#[test]
fn test_defyaml_forms() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.lst", "alpha\tk=1\n");
    write(dir.path(), "b.lst", "beta\n");
    fs::create_dir(dir.path().join("cache")).unwrap();

    let yaml = write(
        dir.path(),
        "lists.defyaml",
        "cacheDir: cache\nchacheFile: lists.bin\nlistFiles:\n  - listFile: a.lst\n    majorType: letter\n    annotationType: Greek\n    features:\n      script: greek\n  - listFile: b.lst\n",
    );
    let definition = ListDefinition::read(&yaml).unwrap();
    assert_eq!(definition.cache_file, dir.path().join("cache").join("lists.bin"));
    assert_eq!(definition.lists.len(), 2);

    let store = load_store(&GazetteerConfig::new(&yaml)).unwrap();
    assert!(dir.path().join("cache").join("lists.bin").exists());
    let alpha = store.match_str("alpha").unwrap().next().unwrap();
    assert_eq!(alpha.list_info().annotation_type(), "Greek");
    let features = alpha.feature_map();
    assert_eq!(features["script"], FeatureValue::from("greek"));
    assert_eq!(features["majorType"], FeatureValue::from("letter"));
    assert_eq!(features["k"], FeatureValue::from("1"));

    let seq = write(dir.path(), "seq.defyaml", "- listFile: b.lst\n");
    let definition = ListDefinition::read(&seq).unwrap();
    assert_eq!(definition.cache_file, dir.path().join("seq.gazbin"));
    assert!(load_store(&GazetteerConfig::new(&seq))
        .unwrap()
        .match_str("beta")
        .is_some());

    let strange = write(dir.path(), "strange.defyaml", "just a string\n");
    assert!(matches!(
        ListDefinition::read(&strange),
        Err(GazetteerError::Config(_))
    ));
}

#[test]
fn test_list_errors_abort_the_load() {
    let dir = tempfile::tempdir().unwrap();

    write(dir.path(), "bad_feature.lst", "ok\nbroken\tnovalue\n");
    let def = write(dir.path(), "bad_feature.def", "bad_feature.lst\n");
    match load_store(&GazetteerConfig::new(&def)) {
        Err(GazetteerError::Data(e)) => {
            assert_eq!(e.line, 2);
            assert!(e.origin.ends_with("bad_feature.lst"));
        }
        other => panic!("unexpected result: {:?}", other.err()),
    }
    assert!(!dir.path().join("bad_feature.gazbin").exists());

    write(dir.path(), "nul.lst", "a\0b\n");
    let def = write(dir.path(), "nul.def", "nul.lst\n");
    assert!(matches!(
        load_store(&GazetteerConfig::new(&def)),
        Err(GazetteerError::Data(_))
    ));

    let many: String = (0..201).map(|i| format!("\tk{i}=v")).collect();
    write(dir.path(), "many.lst", &format!("entry{many}\n"));
    let def = write(dir.path(), "many.def", "many.lst\n");
    assert!(matches!(
        load_store(&GazetteerConfig::new(&def)),
        Err(GazetteerError::Config(_))
    ));

    let def = write(dir.path(), "missing.def", "missing.lst\n");
    assert!(matches!(
        load_store(&GazetteerConfig::new(&def)),
        Err(GazetteerError::Io(_))
    ));

    let txt = write(dir.path(), "lists.txt", "a.lst\n");
    assert!(matches!(
        load_store(&GazetteerConfig::new(&txt)),
        Err(GazetteerError::Config(_))
    ));
}

#[test]
fn test_separator_option() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "pipes.lst", "a=b|k=v\n");
    let def = write(dir.path(), "pipes.def", "pipes.lst\n");
    let store = load_store(&GazetteerConfig::new(&def).separator("|")).unwrap();
    let lookup = store.match_str("a=b").unwrap().next().unwrap();
    assert_eq!(lookup.features().collect::<Vec<_>>(), vec![("k", "v")]);
}

#[test]
fn test_shared_stores() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "x.lst", "xylophone\n");
    let def = write(dir.path(), "x.def", "x.lst\n");
    let cache = StoreCache::new();
    let config = GazetteerConfig::new(&def);

    let a = Gazetteer::open_in(&cache, &config).unwrap();
    let b = Gazetteer::open_in(&cache, &config).unwrap();
    assert!(std::ptr::eq(a.store(), b.store()));
    assert_eq!(cache.ref_count(&config.cache_key()), 2);

    let insensitive = config.clone().case_sensitive(false);
    let c = Gazetteer::open_in(&cache, &insensitive).unwrap();
    assert!(!std::ptr::eq(a.store(), c.store()));
    assert_eq!(cache.len(), 2);

    drop(a);
    assert_eq!(cache.ref_count(&config.cache_key()), 1);
    drop(b);
    drop(c);
    assert!(cache.is_empty());
}

#[test]
fn test_reinit_reloads() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "x.lst", "old\n");
    let def = write(dir.path(), "x.def", "x.lst\n");
    let cache = StoreCache::new();
    let config = GazetteerConfig::new(&def);
    let mut gazetteer = Gazetteer::open_in(&cache, &config).unwrap();
    assert!(gazetteer.store().match_str("old").is_some());

    write(dir.path(), "x.lst", "new\n");
    fs::remove_file(dir.path().join("x.gazbin")).unwrap();
    gazetteer.reinit().unwrap();
    assert!(gazetteer.store().match_str("new").is_some());
    assert!(gazetteer.store().match_str("old").is_none());
    assert_eq!(cache.ref_count(&config.cache_key()), 1);
}
