use std::time::Duration;

use criterion::{
    criterion_group, criterion_main, measurement::WallTime, BenchmarkGroup, Criterion, SamplingMode,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use extgaz::document::whitespace_tokens;
use extgaz::{
    ExtendedGazetteer, ExtendedGazetteerOptions, FeatureMap, GazStore, Gazetteer,
};

const BUILD_SAMPLE_SIZE: usize = 10;
const BUILD_WARM_UP_TIME: Duration = Duration::from_millis(500);
const BUILD_MEASURE_TIME: Duration = Duration::from_secs(2);

const SEARCH_SAMPLE_SIZE: usize = 30;
const SEARCH_WARM_UP_TIME: Duration = Duration::from_millis(500);
const SEARCH_MEASURE_TIME: Duration = Duration::from_secs(2);

const WORDS: &[&str] = &[
    "new", "york", "city", "san", "francisco", "bay", "area", "united", "states", "of",
    "america", "berlin", "münchen", "straße", "river", "lake", "mount", "saint", "port",
];

fn random_phrase(rng: &mut StdRng, max_words: usize) -> String {
    let len = rng.gen_range(1..=max_words);
    (0..len)
        .map(|_| WORDS[rng.gen_range(0..WORDS.len())])
        .collect::<Vec<_>>()
        .join(" ")
}

fn generate_entries(num: usize) -> Vec<String> {
    let mut rng = StdRng::seed_from_u64(num as u64);
    (0..num).map(|_| random_phrase(&mut rng, 4)).collect()
}

fn generate_haystack() -> String {
    let mut rng = StdRng::seed_from_u64(0);
    (0..2000)
        .map(|_| random_phrase(&mut rng, 8))
        .collect::<Vec<_>>()
        .join(". ")
}

fn build_store(entries: &[String]) -> GazStore {
    let mut store = GazStore::new();
    let list = store.add_list_info("Location", "places.lst", FeatureMap::new()).unwrap();
    for (i, entry) in entries.iter().enumerate() {
        let id = i.to_string();
        store.add_lookup(entry, list, &[("id", id.as_str())]).unwrap();
    }
    store.compact().unwrap();
    store
}

macro_rules! define_build_bench {
    ( $func_name:ident, $group:literal, $num:literal ) => {
        fn $func_name(c: &mut Criterion) {
            let mut group = c.benchmark_group($group);
            group.sample_size(BUILD_SAMPLE_SIZE);
            group.warm_up_time(BUILD_WARM_UP_TIME);
            group.measurement_time(BUILD_MEASURE_TIME);
            group.sampling_mode(SamplingMode::Flat);
            let entries = generate_entries($num);
            add_build_benches(&mut group, &entries);
        }
    };
}

macro_rules! define_find_bench {
    ( $func_name:ident, $group:literal, $num:literal ) => {
        fn $func_name(c: &mut Criterion) {
            let mut group = c.benchmark_group($group);
            group.sample_size(SEARCH_SAMPLE_SIZE);
            group.warm_up_time(SEARCH_WARM_UP_TIME);
            group.measurement_time(SEARCH_MEASURE_TIME);
            group.sampling_mode(SamplingMode::Flat);
            let entries = generate_entries($num);
            add_find_benches(&mut group, &entries, &generate_haystack());
        }
    };
}

define_build_bench!(criterion_random_1000_build, "random_1000/build", 1000);
define_build_bench!(criterion_random_50000_build, "random_50000/build", 50000);

define_find_bench!(criterion_random_1000_find, "random_1000/find", 1000);
define_find_bench!(criterion_random_50000_find, "random_50000/find", 50000);

fn add_build_benches(group: &mut BenchmarkGroup<WallTime>, entries: &[String]) {
    group.bench_function("extgaz", |b| {
        b.iter(|| build_store(entries));
    });

    group.bench_function("extgaz/serialize", |b| {
        let store = build_store(entries);
        b.iter(|| store.serialize().unwrap());
    });
}

fn add_find_benches(group: &mut BenchmarkGroup<WallTime>, entries: &[String], haystack: &str) {
    let longest = ExtendedGazetteer::new(
        Gazetteer::from_store(build_store(entries), true, "en").unwrap(),
        ExtendedGazetteerOptions::new(),
    )
    .unwrap();
    group.bench_function("extgaz/text/longest", |b| {
        b.iter(|| longest.annotate_text(haystack).unwrap().len());
    });

    let all = ExtendedGazetteer::new(
        Gazetteer::from_store(build_store(entries), true, "en").unwrap(),
        ExtendedGazetteerOptions::new().longest_match_only(false),
    )
    .unwrap();
    group.bench_function("extgaz/text/all", |b| {
        b.iter(|| all.annotate_text(haystack).unwrap().len());
    });

    let insensitive = ExtendedGazetteer::new(
        Gazetteer::from_store(build_store(entries), false, "en").unwrap(),
        ExtendedGazetteerOptions::new(),
    )
    .unwrap();
    group.bench_function("extgaz/text/case_insensitive", |b| {
        b.iter(|| insensitive.annotate_text(haystack).unwrap().len());
    });

    let doc = whitespace_tokens(haystack);
    group.bench_function("extgaz/tokens/longest", |b| {
        b.iter(|| longest.execute(&doc).unwrap().len());
    });
}

criterion_group!(
    benches,
    criterion_random_1000_find,
    criterion_random_50000_find,
    criterion_random_1000_build,
    criterion_random_50000_build,
);
criterion_main!(benches);
