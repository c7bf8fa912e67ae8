use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use extgaz::{FeatureMap, GazStore};

const CHARSET: &[char] = &['a', 'e', 'i', 'n', 'o', 'r', 's', 't', 'ü', 'ß', ' '];

fn main() {
    for &num in &[100, 5000, 15000, 100000] {
        println!("== random_{} ==", num);
        let store = build_store(num);
        format_memory("extgaz", store.heap_bytes());
        println!("{}", store.stats_string());
    }
}

fn build_store(num: usize) -> GazStore {
    let mut rng = StdRng::seed_from_u64(num as u64);
    let mut store = GazStore::new();
    let mut features = FeatureMap::new();
    features.insert("majorType".to_string(), "random".into());
    let list = store.add_list_info("Lookup", "random.lst", features).unwrap();
    for i in 0..num {
        let len = rng.gen_range(2..16);
        let entry: String = (0..len)
            .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())])
            .collect();
        let id = i.to_string();
        store
            .add_lookup(entry.trim(), list, &[("id", id.as_str())])
            .unwrap();
    }
    store.compact().unwrap();
    store
}

fn format_memory(title: &str, bytes: usize) {
    println!(
        "{}: {} bytes, {:.3} MiB",
        title,
        bytes,
        bytes as f64 / (1024.0 * 1024.0)
    );
}
