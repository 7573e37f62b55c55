//! Property tests for identity and store invariants.

use crate::identity::IdentityMap;
use crate::store::VectorStore;
use crate::types::{InitOptions, QueryHit, VectorHandle};
use proptest::prelude::*;
use std::collections::HashSet;
use tempfile::TempDir;

#[derive(Debug, Clone)]
enum MapOp {
    Bind(VectorHandle, u8),
    Unbind(VectorHandle),
    UnbindUuid(u8),
}

fn map_op() -> impl Strategy<Value = MapOp> {
    prop_oneof![
        (0i64..16, 0u8..16).prop_map(|(h, u)| MapOp::Bind(h, u)),
        (0i64..16).prop_map(MapOp::Unbind),
        (0u8..16).prop_map(MapOp::UnbindUuid),
    ]
}

fn vectors(max: usize) -> impl Strategy<Value = Vec<Vec<f32>>> {
    prop::collection::vec(prop::collection::vec(-10.0f32..10.0, 3), 1..max)
}

fn assert_mirrored(map: &IdentityMap) {
    assert_eq!(map.forward().len(), map.reverse().len());
    for (handle, uuid) in map.forward() {
        assert_eq!(map.resolve_reverse(uuid), Some(*handle));
    }
}

proptest! {
    #[test]
    fn prop_identity_map_stays_bidirectional(ops in prop::collection::vec(map_op(), 0..64)) {
        let mut map = IdentityMap::new();
        for op in ops {
            match op {
                MapOp::Bind(handle, u) => {
                    // Conflicts are rejected without touching the map
                    let _ = map.bind(handle, &format!("uuid-{}", u));
                }
                MapOp::Unbind(handle) => {
                    map.unbind(handle);
                }
                MapOp::UnbindUuid(u) => {
                    map.unbind_by_uuid(&format!("uuid-{}", u));
                }
            }
            assert_mirrored(&map);
        }
    }

    #[test]
    fn prop_assigned_handle_is_free(occupied in prop::collection::hash_set(0i64..64, 0..40), proposed in 0i64..64) {
        let mut map = IdentityMap::new();
        for handle in &occupied {
            map.bind(*handle, &format!("uuid-{}", handle)).unwrap();
        }
        let handle = map.assign_or_reuse(proposed);
        prop_assert!(handle >= proposed);
        prop_assert!(!occupied.contains(&handle));
    }

    #[test]
    fn prop_store_handles_are_unique(data in vectors(40)) {
        let temp = TempDir::new().unwrap();
        let mut store = VectorStore::open(temp.path()).unwrap();
        store.initialize_index(InitOptions::flat(3).with_identity()).unwrap();

        let mut handles = HashSet::new();
        for (i, v) in data.iter().enumerate() {
            let handle = store.add(Some(&format!("uuid-{}", i)), v).unwrap();
            prop_assert!(handles.insert(handle));
        }
        prop_assert_eq!(store.count(), data.len());
        prop_assert_eq!(store.identity().len(), data.len());
        assert_mirrored(store.identity());
    }

    #[test]
    fn prop_removed_uuids_never_return(
        data in vectors(30),
        mask in prop::collection::vec(any::<bool>(), 30),
    ) {
        let temp = TempDir::new().unwrap();
        let mut store = VectorStore::open(temp.path()).unwrap();
        store.initialize_index(InitOptions::flat(3).with_identity()).unwrap();

        for (i, v) in data.iter().enumerate() {
            store.add(Some(&format!("uuid-{}", i)), v).unwrap();
        }

        let removed: Vec<String> = (0..data.len())
            .filter(|&i| mask[i])
            .map(|i| format!("uuid-{}", i))
            .collect();
        prop_assert_eq!(store.remove(&removed, &[]).unwrap(), removed.len());
        prop_assert_eq!(store.count(), data.len() - removed.len());
        prop_assert_eq!(store.identity().len(), store.count());

        for v in &data {
            let hits = store.query(v, data.len(), None).unwrap();
            prop_assert_eq!(hits.len(), store.count());
            for hit in hits {
                let QueryHit::Uuid(uuid) = hit else {
                    panic!("tracked store returned a raw handle");
                };
                prop_assert!(!removed.contains(&uuid));
            }
        }

        // Freed slots are reused without clashing with survivors
        let handle = store.add(Some("uuid-new"), &data[0]).unwrap();
        prop_assert_eq!(store.identity().resolve(handle), Some("uuid-new"));
        prop_assert_eq!(store.identity().len(), store.count());
    }
}
