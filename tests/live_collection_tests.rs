use futures::StreamExt;
use soapstock::backend::DocumentStore;
use soapstock::{
    AuthBootstrap, CollectionPath, DocumentId, Fields, LiveCollections, MemoryBackend, Snapshot,
    StoreError, Value,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

async fn setup() -> (MemoryBackend, LiveCollections) {
    let backend = MemoryBackend::new();
    let auth = AuthBootstrap::new(Arc::new(backend.clone()), None);
    let identity = auth.ensure_ready().await.unwrap();
    let store: Arc<dyn DocumentStore> = Arc::new(backend.clone());
    (backend, LiveCollections::new(store, identity))
}

fn stores() -> CollectionPath {
    CollectionPath::parse("stores").unwrap()
}

fn fields(pairs: &[(&str, &str)]) -> Fields {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Value::from(*v)))
        .collect()
}

async fn next(subscription: &mut soapstock::Subscription) -> Snapshot {
    timeout(WAIT, subscription.next_snapshot())
        .await
        .expect("snapshot should arrive")
        .expect("subscription should be open")
        .expect("snapshot should not be an error")
}

async fn wait_for_listeners(backend: &MemoryBackend, path: &CollectionPath, expected: usize) {
    for _ in 0..200 {
        if backend.listener_count(path) == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "expected {} listeners on {}, found {}",
        expected,
        path,
        backend.listener_count(path)
    );
}

#[tokio::test]
async fn anonymous_identity_and_empty_opening_snapshot() {
    let (_backend, live) = setup().await;
    assert!(live.identity().as_str().starts_with("anon-"));

    let mut subscription = live.subscribe(&stores());
    let opening = next(&mut subscription).await;
    assert!(opening.is_empty());
    assert_eq!(opening.sequence, 1);
    assert_eq!(subscription.latest().map(|s| s.sequence), Some(1));
}

#[tokio::test]
async fn create_update_delete_flow_through_snapshots() {
    let (_backend, live) = setup().await;
    let path = stores();
    let mut subscription = live.subscribe(&path);
    next(&mut subscription).await;

    let id = live
        .create(&path, fields(&[("nombre", "Tienda A"), ("direccion", "Calle 1")]))
        .await
        .unwrap();
    let created = next(&mut subscription).await;
    assert_eq!(created.len(), 1);
    assert_eq!(created.get(&id).unwrap().text("nombre"), Some("Tienda A"));

    live.update(&path, &id, fields(&[("direccion", "Calle 2")]))
        .await
        .unwrap();
    let updated = next(&mut subscription).await;
    let item = updated.get(&id).unwrap();
    assert_eq!(item.text("direccion"), Some("Calle 2"));
    assert_eq!(item.text("nombre"), Some("Tienda A"));

    live.delete(&path, &id).await.unwrap();
    let deleted = next(&mut subscription).await;
    assert!(!deleted.contains(&id));
    assert_eq!(deleted.sequence, 4);
}

#[tokio::test]
async fn every_snapshot_is_the_full_collection() {
    let (_backend, live) = setup().await;
    let path = stores();
    let mut subscription = live.subscribe(&path);
    next(&mut subscription).await;

    let mut ids = Vec::new();
    for n in 0..5 {
        let name = format!("Tienda {n}");
        ids.push(live.create(&path, fields(&[("nombre", &name)])).await.unwrap());
        let snapshot = next(&mut subscription).await;
        assert_eq!(snapshot.len(), ids.len());
        assert!(ids.iter().all(|id| snapshot.contains(id)));
    }
}

#[tokio::test]
async fn missing_targets_are_not_found_without_snapshots() {
    let (_backend, live) = setup().await;
    let path = stores();
    let mut subscription = live.subscribe(&path);
    next(&mut subscription).await;

    let missing = DocumentId::from("nonexistent-id");
    let err = live
        .update(&path, &missing, fields(&[("nombre", "x")]))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(live.delete(&path, &missing).await.unwrap_err().is_not_found());
    assert!(live.get_by_id(&path, &missing).await.unwrap().is_none());

    assert!(
        timeout(Duration::from_millis(100), subscription.next_snapshot())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn cancelled_subscription_goes_silent_and_releases_listener() {
    let (backend, live) = setup().await;
    let path = stores();
    let mut subscription = live.subscribe(&path);
    next(&mut subscription).await;
    assert_eq!(backend.listener_count(&path), 1);

    subscription.cancel();
    subscription.cancel();
    assert!(subscription.is_closed());

    live.create(&path, fields(&[("nombre", "late")])).await.unwrap();
    assert!(subscription.next_snapshot().await.is_none());
    wait_for_listeners(&backend, &path, 0).await;
}

#[tokio::test]
async fn independent_subscriptions_on_one_path() {
    let (backend, live) = setup().await;
    let path = stores();
    let mut first = live.subscribe(&path);
    let mut second = live.subscribe(&path);
    next(&mut first).await;
    next(&mut second).await;

    live.create(&path, fields(&[("nombre", "A")])).await.unwrap();
    assert_eq!(next(&mut first).await.len(), 1);
    assert_eq!(next(&mut second).await.len(), 1);

    drop(first);
    wait_for_listeners(&backend, &path, 1).await;

    live.create(&path, fields(&[("nombre", "B")])).await.unwrap();
    assert_eq!(next(&mut second).await.len(), 2);
}

#[tokio::test]
async fn callback_form_delivers_until_cancelled() {
    let (backend, live) = setup().await;
    let path = stores();
    let (sender, mut received) = mpsc::unbounded_channel();
    let errors = Arc::new(Mutex::new(Vec::new()));
    let error_sink = Arc::clone(&errors);

    let handle = live.subscribe_with(
        &path,
        move |snapshot| {
            let _ = sender.send(snapshot.len());
        },
        move |err| error_sink.lock().unwrap().push(err),
    );

    assert_eq!(timeout(WAIT, received.recv()).await.unwrap(), Some(0));
    live.create(&path, fields(&[("nombre", "A")])).await.unwrap();
    assert_eq!(timeout(WAIT, received.recv()).await.unwrap(), Some(1));

    handle.cancel();
    assert!(handle.is_cancelled());
    live.create(&path, fields(&[("nombre", "B")])).await.unwrap();

    // The sender lives in the aborted task, so the channel closes without
    // another delivery.
    assert_eq!(timeout(WAIT, received.recv()).await.unwrap(), None);
    assert!(errors.lock().unwrap().is_empty());
    wait_for_listeners(&backend, &path, 0).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_waits_for_in_flight_callback() {
    let (_backend, live) = setup().await;
    let path = stores();
    let calls = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));
    let (started, mut in_callback) = mpsc::unbounded_channel();

    let counter = Arc::clone(&calls);
    let done = Arc::clone(&finished);
    let handle = live.subscribe_with(
        &path,
        move |snapshot| {
            counter.fetch_add(1, Ordering::SeqCst);
            if snapshot.len() == 1 {
                let _ = started.send(());
                std::thread::sleep(Duration::from_millis(200));
                done.store(true, Ordering::SeqCst);
            }
        },
        |_| {},
    );

    live.create(&path, fields(&[("nombre", "A")])).await.unwrap();
    timeout(WAIT, in_callback.recv()).await.unwrap();

    handle.cancel();
    assert!(finished.load(Ordering::SeqCst));

    let seen = calls.load(Ordering::SeqCst);
    live.create(&path, fields(&[("nombre", "B")])).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), seen);
}

#[tokio::test]
async fn backend_error_is_delivered_once_then_closes() {
    let (backend, live) = setup().await;
    let path = stores();
    let mut subscription = live.subscribe(&path);
    next(&mut subscription).await;

    backend.fail_listeners(&path, StoreError::NetworkFailure("connection reset".into()));
    let event = timeout(WAIT, subscription.next()).await.unwrap().unwrap();
    assert_eq!(event.unwrap_err(), StoreError::NetworkFailure("connection reset".into()));
    assert!(subscription.next().await.is_none());
    assert!(subscription.is_closed());
}

#[tokio::test]
async fn denied_path_reports_permission_error_to_callback() {
    let (backend, live) = setup().await;
    backend.deny_prefix("secret");
    let path = CollectionPath::parse("secret/stores").unwrap();
    let (sender, mut errors) = mpsc::unbounded_channel();
    let snapshots = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&snapshots);

    let _handle = live.subscribe_with(
        &path,
        move |_| *counter.lock().unwrap() += 1,
        move |err| {
            let _ = sender.send(err);
        },
    );

    let err = timeout(WAIT, errors.recv()).await.unwrap().unwrap();
    assert!(matches!(err, StoreError::PermissionDenied(_)));
    assert_eq!(*snapshots.lock().unwrap(), 0);
}

#[tokio::test]
async fn foreign_private_collection_is_denied() {
    let (_backend, live) = setup().await;
    let foreign = CollectionPath::parse("artifacts/app/users/someone-else/jabones").unwrap();

    let err = live.create(&foreign, fields(&[("nombre", "x")])).await.unwrap_err();
    assert!(matches!(err, StoreError::PermissionDenied(_)));

    let own = CollectionPath::parse(&format!("artifacts/app/users/{}/jabones", live.identity()))
        .unwrap();
    assert!(live.create(&own, fields(&[("nombre", "x")])).await.is_ok());
}

#[tokio::test]
async fn fetch_reads_current_items_and_releases_listener() {
    let (backend, live) = setup().await;
    let path = stores();
    live.create(&path, fields(&[("nombre", "A")])).await.unwrap();

    let snapshot = live.fetch(&path).await.unwrap();
    assert_eq!(snapshot.len(), 1);
    wait_for_listeners(&backend, &path, 0).await;
}

#[tokio::test]
async fn replace_drops_fields_not_supplied() {
    let (_backend, live) = setup().await;
    let path = stores();
    let id = live
        .create(&path, fields(&[("nombre", "A"), ("direccion", "Calle 1")]))
        .await
        .unwrap();

    live.replace(&path, &id, fields(&[("nombre", "B")])).await.unwrap();
    let item = live.get_by_id(&path, &id).await.unwrap().unwrap();
    assert_eq!(item.text("nombre"), Some("B"));
    assert!(item.get("direccion").is_none());
}
