use futures::executor::block_on;

use arbor::prelude::*;
use arbor::repo::BlockStore;

type Backend = MemoryStore<String, Blake3>;

fn master(backend: &Backend) -> Store<Basic, Backend> {
    Store::master(backend.clone(), Config::new(), Task::new("tester"))
}

#[test]
fn depth_bounded_export_stops_at_the_frontier() {
    block_on(async {
        let backend = Backend::new();
        let mut store = master(&backend);
        let c1 = store.update(&key(["one"]), "1".to_string()).await.unwrap();
        let c2 = store.update(&key(["two"]), "2".to_string()).await.unwrap();
        let c3 = store.update(&key(["three"]), "3".to_string()).await.unwrap();

        let slice = store
            .export(SliceParams {
                depth: Some(1),
                max: Some(vec![c3]),
                ..SliceParams::default()
            })
            .await
            .expect("export");

        let mut exported: Vec<_> = slice.commits.iter().map(|(d, _)| *d).collect();
        exported.sort();
        let mut expected = vec![c3.digest(), c2.digest()];
        expected.sort();
        assert_eq!(exported, expected);

        let other = Backend::new();
        let receiver = master(&other);
        receiver.import_force(&slice).await.expect("import");

        // The boundary commit's history is cut off, its tree is not.
        let pinned: Store<Basic, Backend> =
            Store::of_head(other.clone(), Config::new(), Task::new("tester"), c3);
        assert_eq!(pinned.read(&key(["one"])).await.unwrap(), Some("1".to_string()));
        assert_eq!(pinned.read(&key(["three"])).await.unwrap(), Some("3".to_string()));
        assert_eq!(other.read(&c1.digest()).await.unwrap(), None);
    });
}

#[test]
fn full_export_reproduces_byte_equal_values() {
    block_on(async {
        let backend = Backend::new();
        let mut store = master(&backend);
        store.update(&key(["a", "b"]), "1".to_string()).await.unwrap();
        store.update(&key(["a", "c"]), "2".to_string()).await.unwrap();
        store.update(&key(["top"]), "3".to_string()).await.unwrap();

        let slice = store.export(SliceParams::default()).await.expect("export");
        assert!(!slice.contents.is_empty());
        assert!(!slice.nodes.is_empty());
        assert_eq!(slice.commits.len(), 3);
        assert_eq!(slice.tags.len(), 1);

        let other = Backend::new();
        let receiver = master(&other);
        receiver.import_force(&slice).await.expect("import");

        for section in [&slice.contents, &slice.nodes, &slice.commits] {
            for (digest, bytes) in section {
                let stored = other
                    .read(digest)
                    .await
                    .unwrap()
                    .expect("imported object must be present");
                assert_eq!(stored.as_ref(), bytes.as_ref());
            }
        }

        // The receiving master now reads the same values.
        assert_eq!(
            receiver.read(&key(["a", "b"])).await.unwrap(),
            Some("1".to_string())
        );
        assert_eq!(receiver.read(&key(["top"])).await.unwrap(), Some("3".to_string()));
    });
}

#[test]
fn import_refuses_existing_tags() {
    block_on(async {
        let backend = Backend::new();
        let mut store = master(&backend);
        store.update(&key(["k"]), "v".to_string()).await.unwrap();
        let slice = store.export(SliceParams::default()).await.unwrap();

        let other = Backend::new();
        let mut receiver = master(&other);
        receiver
            .update(&key(["local"]), "w".to_string())
            .await
            .unwrap();

        let err = receiver
            .import(&slice)
            .await
            .expect_err("colliding master tag must be reported");
        assert!(matches!(err, StoreError::DuplicatedTags(_)));
        // The local branch was not clobbered.
        assert_eq!(
            receiver.read(&key(["local"])).await.unwrap(),
            Some("w".to_string())
        );

        receiver.import_force(&slice).await.expect("forced import");
        assert_eq!(receiver.read(&key(["k"])).await.unwrap(), Some("v".to_string()));
    });
}

#[test]
fn import_into_fresh_store_accepts_tags() {
    block_on(async {
        let backend = Backend::new();
        let mut store = master(&backend);
        store.update(&key(["k"]), "v".to_string()).await.unwrap();
        let slice = store.export(SliceParams::default()).await.unwrap();

        let other = Backend::new();
        let receiver = master(&other);
        receiver.import(&slice).await.expect("plain import");
        assert_eq!(receiver.read(&key(["k"])).await.unwrap(), Some("v".to_string()));
    });
}

#[test]
fn slices_survive_the_wire() {
    block_on(async {
        let backend = Backend::new();
        let mut store = master(&backend);
        store.update(&key(["k"]), "v".to_string()).await.unwrap();

        let slice = store.export(SliceParams::default()).await.unwrap();
        let decoded = Slice::decode(&slice.encode()).expect("decode");

        let other = Backend::new();
        let receiver = master(&other);
        receiver.import_force(&decoded).await.expect("import decoded");
        assert_eq!(receiver.read(&key(["k"])).await.unwrap(), Some("v".to_string()));
    });
}

#[test]
fn importing_twice_adds_nothing() {
    block_on(async {
        let backend = Backend::new();
        let mut store = master(&backend);
        store.update(&key(["k"]), "v".to_string()).await.unwrap();
        let slice = store.export(SliceParams::default()).await.unwrap();

        let other = Backend::new();
        let receiver = master(&other);
        receiver.import_force(&slice).await.unwrap();
        let after_first = other.block_count();
        receiver.import_force(&slice).await.unwrap();
        assert_eq!(other.block_count(), after_first);
    });
}
