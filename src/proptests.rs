use super::*;

use proptest::prelude::*;
use std::collections::HashMap;

const KEY_LEN: usize = 3;

fn trie_config(key_size: usize, max_list_size: usize) -> TrieConfig {
    TrieConfig {
        key_size,
        value_size: 8,
        addr_size: 3,
        max_list_size,
        page_size: 1 << 12,
    }
}

/// Every kind of map, over small pages so that page boundaries are crossed.
fn all_maps(dir: &std::path::Path, key_size: usize, max_list_size: usize) -> Vec<Box<dyn MdMap>> {
    let config = trie_config(key_size, max_list_size);
    vec![
        Box::new(HashMdMap::new(key_size)) as Box<dyn MdMap>,
        Box::new(HeapMap::open(config.clone(), HeapPages).unwrap()),
        Box::new(OffHeapMap::open(config.clone(), OffHeapPages).unwrap()),
        Box::new(MappedMap::open(config, MappedPages::new(dir)).unwrap()),
    ]
}

fn scan_sorted(map: &mut dyn MdMap) -> Vec<(Vec<u8>, u64)> {
    let mut out = Vec::new();
    map.scan(&mut |k, c| out.push((k.to_vec(), c))).unwrap();
    out.sort();
    out
}

#[derive(Clone, Debug)]
enum Op {
    Add(Vec<u8>, u64),
    Get(Vec<u8>),
}

fn key_strategy(len: usize) -> impl Strategy<Value = Vec<u8>> + Clone {
    // A tiny alphabet makes keys share prefixes, so chains fill and promote
    // at every depth.
    prop::collection::vec(prop_oneof![Just(0u8), Just(1), Just(2), Just(255)], len)
}

fn ops_strategy(len: usize) -> impl Strategy<Value = Vec<Op>> {
    let key = key_strategy(len);
    let op = prop_oneof![
        70 => (key.clone(), 0u64..1_000).prop_map(|(k, c)| Op::Add(k, c)),
        30 => key.prop_map(Op::Get),
    ];
    prop::collection::vec(op, 0..=400)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        max_shrink_iters: 10_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_equivalence(ops in ops_strategy(KEY_LEN), list_size in 1usize..=4) {
        let dir = tempfile::tempdir().unwrap();
        let mut maps = all_maps(dir.path(), KEY_LEN, list_size);
        let mut model: HashMap<Vec<u8>, u64> = HashMap::new();

        for op in ops {
            match op {
                Op::Add(key, count) => {
                    let total = model.entry(key.clone()).or_insert(0);
                    *total += count;
                    for map in maps.iter_mut() {
                        prop_assert_eq!(map.add(&key, count).unwrap(), *total);
                    }
                }
                Op::Get(key) => {
                    let expected = model.get(&key).copied().unwrap_or(0);
                    for map in maps.iter() {
                        prop_assert_eq!(map.get(&key).unwrap(), expected);
                    }
                }
            }
            for map in maps.iter() {
                prop_assert_eq!(map.len(), model.len());
            }
        }

        let mut expected: Vec<(Vec<u8>, u64)> = model.into_iter().collect();
        expected.sort();
        for mut map in maps {
            prop_assert_eq!(scan_sorted(map.as_mut()), expected.clone());
            map.dispose().unwrap();
        }
        prop_assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn prop_random_keys(keys in prop::collection::vec(any::<[u8; 8]>(), 0..=600)) {
        let mut map = HeapMap::open(trie_config(8, 2), HeapPages).unwrap();
        let mut model: HashMap<[u8; 8], u64> = HashMap::new();
        for key in &keys {
            let total = model.entry(*key).or_insert(0);
            *total += 1;
            prop_assert_eq!(map.add(key, 1).unwrap(), *total);
        }
        prop_assert_eq!(map.len(), model.len());
        for (key, count) in &model {
            prop_assert_eq!(map.get(key).unwrap(), *count);
        }

        let stats = map.stats();
        prop_assert_eq!(stats.entries, model.len());
        prop_assert_eq!(stats.list_blocks, model.len());
        prop_assert_eq!(stats.bytes_used, map.data_map().data_size());
    }

    #[test]
    fn prop_scan_order_is_stable(keys in prop::collection::vec(key_strategy(KEY_LEN), 0..=200)) {
        // Within one map, scan order is "ascending by routing byte per level",
        // so visiting twice must give the same sequence, and the set must be
        // identical on every backing store.
        let dir = tempfile::tempdir().unwrap();
        let config = trie_config(KEY_LEN, 2);
        let mut heap = DataMap::open(config.clone(), HeapPages).unwrap();
        let mut mapped = DataMap::open(config, MappedPages::new(dir.path())).unwrap();
        for key in &keys {
            heap.cursor().put(key).unwrap();
            mapped.cursor().put(key).unwrap();
        }

        let mut first = Vec::new();
        heap.cursor().scan(|e| first.push(e.key().to_vec())).unwrap();
        let mut second = Vec::new();
        heap.cursor().scan(|e| second.push(e.key().to_vec())).unwrap();
        let mut other = Vec::new();
        mapped.cursor().scan(|e| other.push(e.key().to_vec())).unwrap();

        prop_assert_eq!(&first, &second);
        prop_assert_eq!(&first, &other);
        // Each leading byte is visited as one contiguous, ascending run.
        let leading: Vec<u8> = first.iter().map(|k| k[0]).collect();
        let mut sorted = leading.clone();
        sorted.sort();
        prop_assert_eq!(leading, sorted);

        let mut unique = keys.clone();
        unique.sort();
        unique.dedup();
        first.sort();
        prop_assert_eq!(first, unique);

        heap.dispose().unwrap();
        mapped.dispose().unwrap();
    }
}

fn for_each_permutation<T: Clone>(items: &[T], mut f: impl FnMut(Vec<T>)) {
    fn rec<T: Clone>(items: &[T], used: &mut [bool], out: &mut Vec<T>, f: &mut impl FnMut(Vec<T>)) {
        if out.len() == items.len() {
            f(out.clone());
            return;
        }
        for i in 0..items.len() {
            if used[i] {
                continue;
            }
            used[i] = true;
            out.push(items[i].clone());
            rec(items, used, out, f);
            out.pop();
            used[i] = false;
        }
    }

    let mut used = vec![false; items.len()];
    let mut out = Vec::with_capacity(items.len());
    rec(items, &mut used, &mut out, &mut f);
}

#[test]
fn exhaustive_insert_order_small_set() {
    // Shared prefixes of every length, so some orders promote at depth 1 and
    // some all the way down to depth 2.
    let keys: Vec<[u8; 3]> = vec![
        [1, 1, 1],
        [1, 1, 2],
        [1, 1, 3],
        [1, 2, 1],
        [1, 2, 2],
        [2, 1, 1],
    ];

    for_each_permutation(&keys, |perm| {
        let mut map = HeapMap::open(trie_config(3, 2), HeapPages).unwrap();
        for (i, k) in perm.iter().enumerate() {
            assert_eq!(map.add(k, i as u64 + 1).unwrap(), i as u64 + 1);
        }
        assert_eq!(map.len(), keys.len());
        for (i, k) in perm.iter().enumerate() {
            assert_eq!(map.get(k).unwrap(), i as u64 + 1);
        }

        let mut expected: Vec<(Vec<u8>, u64)> = perm
            .iter()
            .enumerate()
            .map(|(i, k)| (k.to_vec(), i as u64 + 1))
            .collect();
        expected.sort();
        assert_eq!(scan_sorted(&mut map), expected);
    });
}

#[test]
fn exhaustive_repeat_adds_small_set() {
    let keys: Vec<[u8; 3]> = vec![[0, 0, 0], [0, 0, 1], [0, 1, 0], [0, 0, 0], [0, 0, 1]];

    for_each_permutation(&keys, |perm| {
        let mut map = HeapMap::open(trie_config(3, 1), HeapPages).unwrap();
        for k in &perm {
            map.add(k, 1).unwrap();
        }
        assert_eq!(map.len(), 3);
        assert_eq!(map.get(&[0, 0, 0]).unwrap(), 2);
        assert_eq!(map.get(&[0, 0, 1]).unwrap(), 2);
        assert_eq!(map.get(&[0, 1, 0]).unwrap(), 1);
        assert_eq!(map.get(&[1, 0, 0]).unwrap(), 0);
    });
}
