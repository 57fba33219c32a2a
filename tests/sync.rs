use futures::executor::block_on;
use url::Url;

use arbor::prelude::*;

type Backend = MemoryStore<String, Blake3>;

fn master(backend: &Backend) -> Store<Basic, Backend> {
    Store::master(backend.clone(), Config::new(), Task::new("tester"))
}

fn uri() -> Url {
    Url::parse("mem://remote").expect("static url")
}

#[test]
fn pull_adopts_the_remote_head() {
    block_on(async {
        let upstream = Backend::new();
        let mut origin = master(&upstream);
        let head = origin.update(&key(["k"]), "v".to_string()).await.unwrap();

        let local = Backend::new();
        let remote: LocalRemote<Basic, Backend> =
            LocalRemote::new(local.clone(), upstream.clone());

        let mut store = master(&local);
        let fetched = store.pull(&remote, &uri(), None).await.expect("pull");

        assert_eq!(fetched, Some(head));
        assert_eq!(store.head().await.unwrap(), Some(head));
        assert_eq!(store.read(&key(["k"])).await.unwrap(), Some("v".to_string()));
    });
}

#[test]
fn fetch_reports_without_moving_the_branch() {
    block_on(async {
        let upstream = Backend::new();
        let mut origin = master(&upstream);
        let head = origin.update(&key(["k"]), "v".to_string()).await.unwrap();

        let local = Backend::new();
        let remote: LocalRemote<Basic, Backend> =
            LocalRemote::new(local.clone(), upstream.clone());

        let store = master(&local);
        let fetched = store.fetch(&remote, &uri(), None).await.expect("fetch");
        assert_eq!(fetched, Some(head));
        // Fetch moves objects, not branches.
        assert_eq!(store.head().await.unwrap(), None);

        // The objects arrived; a detached handle can read them.
        let pinned: Store<Basic, Backend> =
            Store::of_head(local.clone(), Config::new(), Task::new("tester"), head);
        assert_eq!(pinned.read(&key(["k"])).await.unwrap(), Some("v".to_string()));
    });
}

#[test]
fn push_publishes_the_local_branch() {
    block_on(async {
        let local = Backend::new();
        let mut store = master(&local);
        let head = store.update(&key(["k"]), "v".to_string()).await.unwrap();

        let upstream = Backend::new();
        let remote: LocalRemote<Basic, Backend> =
            LocalRemote::new(local.clone(), upstream.clone());

        let pushed = store.push(&remote, &uri(), None).await.expect("push");
        assert_eq!(pushed, Some(head));

        let published = master(&upstream);
        assert_eq!(published.head().await.unwrap(), Some(head));
        assert_eq!(
            published.read(&key(["k"])).await.unwrap(),
            Some("v".to_string())
        );
    });
}

#[test]
fn pull_merge_joins_diverged_stores() {
    block_on(async {
        let upstream = Backend::new();
        let mut origin = master(&upstream);
        origin.update(&key(["seed"]), "0".to_string()).await.unwrap();

        // Replicate the seed, then let both sides diverge.
        let local = Backend::new();
        let remote: LocalRemote<Basic, Backend> =
            LocalRemote::new(local.clone(), upstream.clone());
        let mut store = master(&local);
        store.pull(&remote, &uri(), None).await.expect("initial pull");

        origin.update(&key(["theirs"]), "1".to_string()).await.unwrap();
        store.update(&key(["mine"]), "2".to_string()).await.unwrap();

        store.pull_merge(&remote, &uri(), None).await.expect("pull with merge");

        assert_eq!(store.read(&key(["seed"])).await.unwrap(), Some("0".to_string()));
        assert_eq!(store.read(&key(["theirs"])).await.unwrap(), Some("1".to_string()));
        assert_eq!(store.read(&key(["mine"])).await.unwrap(), Some("2".to_string()));
    });
}
