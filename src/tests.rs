use super::*;

use std::collections::{BTreeSet, HashMap};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::chunk::{Boundaries, TextChunk};
use crate::scan::Scanner;

const CHARSET: &[char] = &['r', 'a', 'n', 'd', 'o', 'm', 'ä', '語', ' '];

fn generate_random_string(rng: &mut StdRng, size: usize) -> String {
    (0..size)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())])
        .collect()
}

// props are a sequence of (num, max length) to generate.
fn generate_random_lexicon(
    rng: &mut StdRng,
    props: &[(usize, usize)],
) -> HashMap<String, BTreeSet<(u32, String)>> {
    let mut lexicon = HashMap::<String, BTreeSet<(u32, String)>>::new();
    for &(num, len) in props {
        for _ in 0..num {
            let size = rng.gen_range(1..=len);
            let entry = generate_random_string(rng, size);
            let list = rng.gen_range(0..3);
            let value = rng.gen_range(0..4).to_string();
            lexicon.entry(entry).or_default().insert((list, value));
        }
    }
    lexicon
}

fn build_store(lexicon: &HashMap<String, BTreeSet<(u32, String)>>) -> GazStore {
    let mut store = GazStore::new();
    for i in 0..3 {
        store.add_list_info("Lookup", format!("list{i}"), FeatureMap::new()).unwrap();
    }
    for (entry, payloads) in lexicon {
        for (list, value) in payloads {
            store.add_lookup(entry, *list, &[("v", value)]).unwrap();
            // Duplicates are ignored.
            store.add_lookup(entry, *list, &[("v", value)]).unwrap();
        }
    }
    store.compact().unwrap();
    store
}

fn payloads(lookups: store::LookupIter) -> BTreeSet<(u32, String)> {
    lookups
        .map(|l| {
            let (_, v) = l.features().next().unwrap();
            (l.list_index(), v.to_string())
        })
        .collect()
}

fn all_matches(store: &GazStore, text: &str, longest_only: bool) -> Vec<(usize, usize, Vec<String>)> {
    let chunk = TextChunk::from_text(text, 0..text.len(), Boundaries::default());
    Scanner::new(store)
        .longest_match_only(longest_only)
        .find_all(&chunk)
        .unwrap()
        .into_iter()
        .map(|m| {
            let features = m
                .state
                .lookups()
                .map(|l| format!("{}:{:?}", l.list_index(), l.features().collect::<Vec<_>>()))
                .collect();
            (chunk.start_offset(m.first), chunk.end_offset(m.last), features)
        })
        .collect()
}

fn naive_matches<T>(
    lexicon: &HashMap<String, T>,
    text: &str,
    longest_only: bool,
) -> Vec<(usize, usize)> {
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain([text.len()])
        .collect();
    let mut matches = vec![];
    for (si, &s) in bounds.iter().enumerate() {
        let found: Vec<(usize, usize)> = bounds[si + 1..]
            .iter()
            .filter(|&&e| lexicon.contains_key(&text[s..e]))
            .map(|&e| (s, e))
            .collect();
        if longest_only {
            matches.extend(found.last());
        } else {
            matches.extend(found);
        }
    }
    matches
}

#[test]
fn test_random_lexicon_lookups() {
    let mut rng = StdRng::seed_from_u64(17);
    let lexicon = generate_random_lexicon(&mut rng, &[(5000, 4), (5000, 12), (200, 40)]);
    let store = build_store(&lexicon);

    let expected_entries: usize = lexicon.values().map(BTreeSet::len).sum();
    assert_eq!(store.num_entries(), expected_entries as u64);
    assert_eq!(store.state_stats().final_nodes as usize, lexicon.len());

    for (entry, expected) in &lexicon {
        let found = payloads(store.match_str(entry).unwrap());
        assert_eq!(&found, expected, "{entry:?}");
    }
    for _ in 0..2000 {
        let size = rng.gen_range(1..8);
        let query = generate_random_string(&mut rng, size);
        assert_eq!(
            store.match_str(&query).is_some(),
            lexicon.contains_key(&query),
            "{query:?}"
        );
    }
}

#[test]
fn test_random_scan_agrees_with_naive() {
    let mut rng = StdRng::seed_from_u64(42);
    let lexicon = generate_random_lexicon(&mut rng, &[(300, 3), (300, 6)]);
    let store = build_store(&lexicon);
    for _ in 0..200 {
        let size = rng.gen_range(0..60);
        let text = generate_random_string(&mut rng, size);
        for longest_only in [true, false] {
            let found: Vec<_> = all_matches(&store, &text, longest_only)
                .into_iter()
                .map(|(s, e, _)| (s, e))
                .collect();
            assert_eq!(
                found,
                naive_matches(&lexicon, &text, longest_only),
                "{text:?} longest_only={longest_only}"
            );
        }
    }
}

#[test]
fn test_random_serialization_preserves_matches() {
    let mut rng = StdRng::seed_from_u64(7);
    let lexicon = generate_random_lexicon(&mut rng, &[(6000, 5), (6000, 10)]);
    let store = build_store(&lexicon);
    let bytes = store.serialize().unwrap();
    let (loaded, rest) = GazStore::deserialize(&bytes).unwrap();
    assert!(rest.is_empty());

    assert_eq!(store.num_entries(), loaded.num_entries());
    assert_eq!(store.state_stats(), loaded.state_stats());
    for _ in 0..100 {
        let size = rng.gen_range(0..80);
        let text = generate_random_string(&mut rng, size);
        for longest_only in [true, false] {
            assert_eq!(
                all_matches(&store, &text, longest_only),
                all_matches(&loaded, &text, longest_only)
            );
        }
    }
}

#[test]
fn test_state_counts() {
    let mut rng = StdRng::seed_from_u64(3);
    let lexicon = generate_random_lexicon(&mut rng, &[(1000, 8)]);
    let store = build_store(&lexicon);
    let stats = store.state_stats();
    assert_eq!(
        stats.nodes,
        stats.charmap_nodes + stats.single_char_nodes
    );
    assert!(stats.promoted_nodes <= stats.charmap_nodes);

    let mut prefixes = BTreeSet::new();
    for entry in lexicon.keys() {
        let bounds = entry.char_indices().map(|(i, _)| i).skip(1).chain([entry.len()]);
        for e in bounds {
            prefixes.insert(&entry[..e]);
        }
    }
    // One state per distinct prefix plus the root.
    assert_eq!(stats.nodes as usize, prefixes.len() + 1);
}
