use futures::executor::block_on;

use arbor::prelude::*;

type Backend = MemoryStore<String, Blake3>;

fn master(backend: &Backend) -> Store<Basic, Backend> {
    Store::master(backend.clone(), Config::new(), Task::new("tester"))
}

#[test]
fn view_stages_writes_until_commit() {
    block_on(async {
        let backend = Backend::new();
        let mut store = master(&backend);
        store.update(&key(["seed"]), "0".to_string()).await.unwrap();

        let mut view = store.view(key::<_, &str>([])).await.unwrap();
        view.update(key(["a"]), "1".to_string());
        view.update(key(["b", "c"]), "2".to_string());

        // Nothing reaches the branch before the commit.
        assert_eq!(store.read(&key(["a"])).await.unwrap(), None);
        assert_eq!(view.read(&key(["a"])).await.unwrap(), Some("1".to_string()));

        store.update_path(&mut view).await.expect("commit view");
        assert_eq!(store.read(&key(["a"])).await.unwrap(), Some("1".to_string()));
        assert_eq!(
            store.read(&key(["b", "c"])).await.unwrap(),
            Some("2".to_string())
        );
        assert_eq!(store.read(&key(["seed"])).await.unwrap(), Some("0".to_string()));
    });
}

#[test]
fn replay_matches_replace_when_the_head_stood_still() {
    block_on(async {
        let backend = Backend::new();
        let mut store = master(&backend);
        store.update(&key(["seed"]), "0".to_string()).await.unwrap();
        let mut alt = store.clone_branch("alt".to_string()).await.unwrap();

        let mut replace_view = store.view(key::<_, &str>([])).await.unwrap();
        let mut rebase_view = alt.view(key::<_, &str>([])).await.unwrap();
        for view in [&mut replace_view, &mut rebase_view] {
            assert_eq!(view.read(&key(["seed"])).await.unwrap(), Some("0".to_string()));
            view.update(key(["x"]), "1".to_string());
            view.remove(key(["seed"]));
        }

        store.update_path(&mut replace_view).await.expect("replace");
        alt.rebase_path(&mut rebase_view).await.expect("rebase");

        for keys in [key(["seed"]), key(["x"])] {
            assert_eq!(
                store.read(&keys).await.unwrap(),
                alt.read(&keys).await.unwrap()
            );
        }
    });
}

#[test]
fn rebase_detects_divergent_reads_while_replace_succeeds() {
    block_on(async {
        let backend = Backend::new();
        let mut store = master(&backend);
        store.update(&key(["k"]), "a".to_string()).await.unwrap();

        let mut view = store.view(key::<_, &str>([])).await.unwrap();
        assert_eq!(view.read(&key(["k"])).await.unwrap(), Some("a".to_string()));

        // The branch moves underneath the view.
        store.update(&key(["k"]), "b".to_string()).await.unwrap();

        let err = store
            .rebase_path(&mut view)
            .await
            .expect_err("divergent read must conflict");
        assert!(err.is_conflict(), "unexpected error: {err}");
        assert_eq!(store.read(&key(["k"])).await.unwrap(), Some("b".to_string()));

        // Replace semantics ignore the divergence and reinstate the view.
        store.update_path(&mut view).await.expect("replace");
        assert_eq!(store.read(&key(["k"])).await.unwrap(), Some("a".to_string()));
    });
}

#[test]
fn rebase_reapplies_writes_on_top_of_the_tip() {
    block_on(async {
        let backend = Backend::new();
        let mut store = master(&backend);
        store.update(&key(["base"]), "0".to_string()).await.unwrap();

        let mut view = store.view(key::<_, &str>([])).await.unwrap();
        view.update(key(["mine"]), "1".to_string());

        // An unrelated key moves; no recorded observation diverges.
        store.update(&key(["theirs"]), "2".to_string()).await.unwrap();

        store.rebase_path(&mut view).await.expect("rebase");
        assert_eq!(store.read(&key(["mine"])).await.unwrap(), Some("1".to_string()));
        assert_eq!(store.read(&key(["theirs"])).await.unwrap(), Some("2".to_string()));
    });
}

#[test]
fn the_action_log_records_observations_in_order() {
    block_on(async {
        let backend = Backend::new();
        let mut store = master(&backend);
        store.update(&key(["k"]), "v".to_string()).await.unwrap();

        let mut view = store.view(key::<_, &str>([])).await.unwrap();
        let _ = view.read(&key(["k"])).await.unwrap();
        let _ = view.read(&key(["k"])).await.unwrap();
        view.update(key(["w"]), "1".to_string());
        let listed = view.list(&key::<_, &str>([])).await.unwrap();

        let actions = view.actions();
        assert_eq!(actions.len(), 3, "duplicate reads coalesce: {actions:?}");
        assert_eq!(
            actions[0],
            Action::Read(key(["k"]), Some("v".to_string()))
        );
        assert_eq!(
            actions[1],
            Action::Write(key(["w"]), Some("1".to_string()))
        );
        assert_eq!(actions[2], Action::List(key::<_, &str>([]), listed));
    });
}

#[test]
fn pending_writes_shadow_the_backing_tree() {
    block_on(async {
        let backend = Backend::new();
        let mut store = master(&backend);
        store.update(&key(["k"]), "old".to_string()).await.unwrap();

        let mut view = store.view(key::<_, &str>([])).await.unwrap();
        view.update(key(["k"]), "new".to_string());
        assert_eq!(view.read(&key(["k"])).await.unwrap(), Some("new".to_string()));

        view.remove(key(["k"]));
        assert_eq!(view.read(&key(["k"])).await.unwrap(), None);
        assert!(!view.mem(&key(["k"])).await.unwrap());
    });
}

#[test]
fn view_lists_through_pending_writes() {
    block_on(async {
        let backend = Backend::new();
        let mut store = master(&backend);
        store.update(&key(["dir", "a"]), "1".to_string()).await.unwrap();

        let mut view = store.view(key::<_, &str>([])).await.unwrap();
        view.update(key(["dir", "b"]), "2".to_string());
        view.remove(key(["dir", "a"]));

        assert_eq!(view.list(&key(["dir"])).await.unwrap(), vec!["b".to_string()]);
    });
}

#[test]
fn disjoint_view_edits_merge() {
    block_on(async {
        let backend = Backend::new();
        let mut store = master(&backend);
        store.update(&key(["seed"]), "0".to_string()).await.unwrap();

        let left = {
            let mut v = store.view(key::<_, &str>([])).await.unwrap();
            v.update(key(["x"]), "1".to_string());
            v
        };
        let mut right = store.view(key::<_, &str>([])).await.unwrap();
        right.update(key(["y"]), "2".to_string());

        left.merge_into(&mut right).await.expect("merge views");

        store.update_path(&mut right).await.expect("commit");
        assert_eq!(store.read(&key(["x"])).await.unwrap(), Some("1".to_string()));
        assert_eq!(store.read(&key(["y"])).await.unwrap(), Some("2".to_string()));
    });
}

#[test]
fn double_written_keys_go_through_the_contents_merge() {
    block_on(async {
        let backend = Backend::new();
        let mut store = master(&backend);
        store.update(&key(["k"]), "old".to_string()).await.unwrap();

        let left = {
            let mut v = store.view(key::<_, &str>([])).await.unwrap();
            // Writing the ancestor value on one side lets the other win.
            v.update(key(["k"]), "old".to_string());
            v
        };
        let mut right = store.view(key::<_, &str>([])).await.unwrap();
        right.update(key(["k"]), "theirs".to_string());

        left.merge_into(&mut right).await.expect("merge views");
        store.update_path(&mut right).await.unwrap();
        assert_eq!(
            store.read(&key(["k"])).await.unwrap(),
            Some("theirs".to_string())
        );
    });
}

#[test]
fn conflicting_view_edits_refuse_to_merge() {
    block_on(async {
        let backend = Backend::new();
        let mut store = master(&backend);
        store.update(&key(["k"]), "old".to_string()).await.unwrap();

        let left = {
            let mut v = store.view(key::<_, &str>([])).await.unwrap();
            v.update(key(["k"]), "mine".to_string());
            v
        };
        let mut right = store.view(key::<_, &str>([])).await.unwrap();
        right.update(key(["k"]), "theirs".to_string());

        let err = left
            .merge_into(&mut right)
            .await
            .expect_err("diverged writes must conflict");
        assert!(err.is_conflict(), "unexpected error: {err}");
    });
}

#[test]
fn stale_reads_invalidate_a_view_merge() {
    block_on(async {
        let backend = Backend::new();
        let mut store = master(&backend);
        store.update(&key(["k"]), "old".to_string()).await.unwrap();

        let mut left = store.view(key::<_, &str>([])).await.unwrap();
        assert_eq!(left.read(&key(["k"])).await.unwrap(), Some("old".to_string()));

        let mut right = store.view(key::<_, &str>([])).await.unwrap();
        right.update(key(["k"]), "changed".to_string());

        let err = left
            .merge_into(&mut right)
            .await
            .expect_err("a read the target overwrote must conflict");
        assert!(err.is_conflict(), "unexpected error: {err}");
    });
}

#[test]
fn view_over_a_subtree_commits_at_its_path() {
    block_on(async {
        let backend = Backend::new();
        let mut store = master(&backend);
        store
            .update(&key(["dir", "keep"]), "0".to_string())
            .await
            .unwrap();
        store.update(&key(["other"]), "9".to_string()).await.unwrap();

        let mut view = store.view(key(["dir"])).await.unwrap();
        assert_eq!(view.read(&key(["keep"])).await.unwrap(), Some("0".to_string()));
        view.update(key(["fresh"]), "1".to_string());

        store.update_path(&mut view).await.expect("commit");
        assert_eq!(
            store.read(&key(["dir", "fresh"])).await.unwrap(),
            Some("1".to_string())
        );
        assert_eq!(
            store.read(&key(["dir", "keep"])).await.unwrap(),
            Some("0".to_string())
        );
        assert_eq!(store.read(&key(["other"])).await.unwrap(), Some("9".to_string()));
    });
}
