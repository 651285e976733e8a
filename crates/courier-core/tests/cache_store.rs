mod common;

use std::time::Duration;

use common::{FakeTransport, Route};
use courier_core::{CacheError, CacheRegistry, Headers, ResponseHandle};

const LIB_URL: &str = "https://cdn.example/lib.js";

#[tokio::test]
async fn unwritten_key_fetches_once_and_writes_once() {
    let transport = FakeTransport::new();
    transport.route(LIB_URL, Route::ok("console.log(1)"));
    let libs = common::registry(&transport).bucket("libs");
    libs.open().await.unwrap();

    assert!(!libs.has(LIB_URL).await.unwrap());
    let res = libs.get(LIB_URL).await.unwrap();

    assert_eq!(res.text(), "console.log(1)");
    assert!(!res.is_cached());
    assert_eq!(transport.calls(), 1);
    assert_eq!(libs.keys().await.unwrap(), vec![LIB_URL.to_string()]);

    let again = libs.get(LIB_URL).await.unwrap();
    assert!(again.is_cached());
    assert_eq!(again.body(), res.body());
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn set_then_get_has_no_network_activity() {
    let transport = FakeTransport::new();
    let libs = common::registry(&transport).bucket("libs");
    libs.open().await.unwrap();

    libs.set(LIB_URL, &ResponseHandle::live(200, Headers::new(), "v1"))
        .await
        .unwrap();
    assert_eq!(libs.get(LIB_URL).await.unwrap().text(), "v1");

    libs.set(LIB_URL, &ResponseHandle::live(200, Headers::new(), "v2"))
        .await
        .unwrap();
    assert_eq!(libs.get(LIB_URL).await.unwrap().text(), "v2");
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn del_forces_a_fresh_fetch() {
    let transport = FakeTransport::new();
    transport.route(LIB_URL, Route::ok("fresh"));
    let libs = common::registry(&transport).bucket("libs");
    libs.open().await.unwrap();
    libs.set(LIB_URL, &ResponseHandle::live(200, Headers::new(), "stale"))
        .await
        .unwrap();

    assert!(libs.del(LIB_URL).await.unwrap());
    assert_eq!(libs.get(LIB_URL).await.unwrap().text(), "fresh");
    assert_eq!(transport.calls(), 1);

    assert!(libs.del(LIB_URL).await.unwrap());
    libs.get(LIB_URL).await.unwrap();
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn no_store_is_honored_unless_forced() {
    let transport = FakeTransport::new();
    transport.route(
        LIB_URL,
        Route::ok("private").with_header("cache-control", "no-store"),
    );
    let registry = common::registry(&transport);

    let normal = registry.bucket("libs");
    normal.open().await.unwrap();
    normal.get(LIB_URL).await.unwrap();
    assert!(!normal.has(LIB_URL).await.unwrap());

    let forced = registry.bucket("video").with_force_cache();
    forced.open().await.unwrap();
    forced.get(LIB_URL).await.unwrap();
    assert!(forced.has(LIB_URL).await.unwrap());
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn error_status_is_returned_but_not_stored() {
    let transport = FakeTransport::new();
    let libs = common::registry(&transport).bucket("libs");
    libs.open().await.unwrap();

    let err = libs.get("https://cdn.example/missing.js").await.unwrap_err();
    assert!(matches!(err, CacheError::Status { status: 404, .. }), "{err}");
    assert_eq!(err.status_code(), Some(404));
    assert!(libs.entries().await.unwrap().is_empty());
}

#[tokio::test]
async fn get_before_open_is_rejected() {
    let transport = FakeTransport::new();
    let libs = common::registry(&transport).bucket("libs");

    let err = libs.get(LIB_URL).await.unwrap_err();
    assert!(matches!(err, CacheError::NotOpen { .. }));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn concurrent_misses_share_one_fetch() {
    let transport = FakeTransport::new();
    transport.route(
        LIB_URL,
        Route::ok("slow").with_delay(Duration::from_millis(100)),
    );
    let libs = common::registry(&transport).bucket("libs");
    libs.open().await.unwrap();

    let (a, b, c) = tokio::join!(libs.get(LIB_URL), libs.get(LIB_URL), libs.get(LIB_URL));

    let results = [a.unwrap(), b.unwrap(), c.unwrap()];
    assert!(results.iter().all(|r| r.text() == "slow"));
    assert_eq!(results.iter().filter(|r| !r.is_cached()).count(), 1);
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn disk_buckets_survive_a_new_registry() {
    let dir = tempfile::TempDir::new().unwrap();
    let transport = FakeTransport::new();
    transport.route(LIB_URL, Route::ok("persisted"));

    let first = CacheRegistry::persistent(common::engine(&transport), dir.path()).bucket("libs");
    first.open().await.unwrap();
    first.get(LIB_URL).await.unwrap();

    let second = CacheRegistry::persistent(common::engine(&transport), dir.path()).bucket("libs");
    second.open().await.unwrap();
    let res = second.get(LIB_URL).await.unwrap();

    assert!(res.is_cached());
    assert_eq!(res.text(), "persisted");
    assert_eq!(transport.calls(), 1);
    assert_eq!(second.clear().await.unwrap(), 1);
    assert!(!second.has(LIB_URL).await.unwrap());
}
