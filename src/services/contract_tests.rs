//! Behaviour every `BlobStorage` backend must exhibit. Each backend's test
//! module calls [`run_all`] with a fresh, empty store.

use crate::{
    models::object::PutObject,
    services::blob_storage::{BlobStorage, BlobResult},
};
use bytes::Bytes;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;

pub async fn run_all<S: BlobStorage + ?Sized>(store: &S) {
    missing_key_is_not_found(store).await;
    put_then_get_round_trips(store).await;
    empty_body_round_trips(store).await;
    overwrite_replaces_body_and_metadata(store).await;
    delete_is_idempotent(store).await;
    remove_directory_matches_literal_prefix(store).await;
    remove_directory_is_idempotent(store).await;
    prefix_is_not_a_pattern(store).await;
    cancelled_put_is_not_observable(store).await;
    cancelled_delete_has_no_effect(store).await;
    cancelled_get_fails(store).await;
    concurrent_puts_to_one_key_leave_one_write(store).await;
}

async fn put<S: BlobStorage + ?Sized>(store: &S, key: &str, body: &'static [u8]) {
    store
        .put_object(
            PutObject::new(key, Bytes::from_static(body), "application/octet-stream"),
            None,
        )
        .await
        .unwrap();
}

async fn read<S: BlobStorage + ?Sized>(store: &S, key: &str) -> BlobResult<Bytes> {
    store.get_object(key, None).await?.into_bytes().await
}

async fn missing_key_is_not_found<S: BlobStorage + ?Sized>(store: &S) {
    let err = store.get_object("never/written", None).await.unwrap_err();
    assert!(err.is_not_found(), "unexpected error: {err}");
}

async fn put_then_get_round_trips<S: BlobStorage + ?Sized>(store: &S) {
    let body: Vec<u8> = (0..=255u8).cycle().take(200_000).collect();
    let stored = store
        .put_object(
            PutObject::new("round/trip.bin", body.clone(), "application/x-test")
                .with_metadata("origin", "contract"),
            None,
        )
        .await
        .unwrap();
    assert_eq!(stored.key, "round/trip.bin");
    assert_eq!(stored.size_bytes, body.len() as u64);

    let object = store.get_object("round/trip.bin", None).await.unwrap();
    assert_eq!(object.info.etag, stored.etag);
    assert_eq!(object.info.content_type, "application/x-test");
    assert_eq!(object.info.size_bytes, body.len() as u64);
    assert_eq!(object.info.metadata["origin"], "contract");
    assert_eq!(object.into_bytes().await.unwrap(), Bytes::from(body));

    store.delete_object("round/trip.bin", None).await.unwrap();
}

async fn empty_body_round_trips<S: BlobStorage + ?Sized>(store: &S) {
    put(store, "empty", b"").await;
    assert!(read(store, "empty").await.unwrap().is_empty());
    store.delete_object("empty", None).await.unwrap();
}

async fn overwrite_replaces_body_and_metadata<S: BlobStorage + ?Sized>(store: &S) {
    store
        .put_object(
            PutObject::new("over/write", "a much longer first body", "text/plain")
                .with_metadata("v", "1")
                .with_metadata("stale", "yes"),
            None,
        )
        .await
        .unwrap();
    store
        .put_object(
            PutObject::new("over/write", "short", "text/csv").with_metadata("v", "2"),
            None,
        )
        .await
        .unwrap();

    let object = store.get_object("over/write", None).await.unwrap();
    assert_eq!(object.info.content_type, "text/csv");
    assert_eq!(object.info.metadata.len(), 1);
    assert_eq!(object.info.metadata["v"], "2");
    assert_eq!(object.into_bytes().await.unwrap(), Bytes::from("short"));

    store.delete_object("over/write", None).await.unwrap();
}

async fn delete_is_idempotent<S: BlobStorage + ?Sized>(store: &S) {
    put(store, "del/me", b"bye").await;
    store.delete_object("del/me", None).await.unwrap();
    store.delete_object("del/me", None).await.unwrap();
    assert!(read(store, "del/me").await.unwrap_err().is_not_found());
}

async fn remove_directory_matches_literal_prefix<S: BlobStorage + ?Sized>(store: &S) {
    put(store, "a/1", b"1").await;
    put(store, "a/2", b"2").await;
    put(store, "b/1", b"3").await;
    put(store, "ab/1", b"4").await;

    assert_eq!(store.remove_directory("a/", None).await.unwrap(), 2);
    assert!(read(store, "a/1").await.unwrap_err().is_not_found());
    assert!(read(store, "a/2").await.unwrap_err().is_not_found());
    assert_eq!(read(store, "b/1").await.unwrap(), Bytes::from("3"));
    assert_eq!(read(store, "ab/1").await.unwrap(), Bytes::from("4"));

    assert_eq!(store.remove_directory("", None).await.unwrap(), 2);
}

async fn remove_directory_is_idempotent<S: BlobStorage + ?Sized>(store: &S) {
    put(store, "tmp/x", b"x").await;
    assert_eq!(store.remove_directory("tmp/", None).await.unwrap(), 1);
    assert_eq!(store.remove_directory("tmp/", None).await.unwrap(), 0);
}

async fn prefix_is_not_a_pattern<S: BlobStorage + ?Sized>(store: &S) {
    put(store, "logs/2024", b"x").await;
    put(store, "logs%/1", b"y").await;
    put(store, "logs_/1", b"z").await;

    assert_eq!(store.remove_directory("logs%", None).await.unwrap(), 1);
    assert_eq!(store.remove_directory("logs*", None).await.unwrap(), 0);
    assert_eq!(store.remove_directory("logs_", None).await.unwrap(), 1);
    assert_eq!(read(store, "logs/2024").await.unwrap(), Bytes::from("x"));

    store.delete_object("logs/2024", None).await.unwrap();
}

async fn cancelled_put_is_not_observable<S: BlobStorage + ?Sized>(store: &S) {
    let token = CancellationToken::new();
    token.cancel();

    let err = store
        .put_object(PutObject::new("cancel/put", "data", "text/plain"), Some(&token))
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(read(store, "cancel/put").await.unwrap_err().is_not_found());

    put(store, "cancel/put", b"old").await;
    let err = store
        .put_object(PutObject::new("cancel/put", "new", "text/plain"), Some(&token))
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(read(store, "cancel/put").await.unwrap(), Bytes::from("old"));
    store.delete_object("cancel/put", None).await.unwrap();
}

async fn cancelled_delete_has_no_effect<S: BlobStorage + ?Sized>(store: &S) {
    let token = CancellationToken::new();
    token.cancel();
    put(store, "cancel/del", b"kept").await;

    assert!(
        store
            .delete_object("cancel/del", Some(&token))
            .await
            .unwrap_err()
            .is_cancelled()
    );
    assert!(
        store
            .remove_directory("cancel/", Some(&token))
            .await
            .unwrap_err()
            .is_cancelled()
    );
    assert_eq!(read(store, "cancel/del").await.unwrap(), Bytes::from("kept"));
    store.delete_object("cancel/del", None).await.unwrap();
}

async fn cancelled_get_fails<S: BlobStorage + ?Sized>(store: &S) {
    put(store, "cancel/get", b"body").await;

    let token = CancellationToken::new();
    token.cancel();
    assert!(
        store
            .get_object("cancel/get", Some(&token))
            .await
            .unwrap_err()
            .is_cancelled()
    );

    let token = CancellationToken::new();
    let object = store.get_object("cancel/get", Some(&token)).await.unwrap();
    token.cancel();
    assert!(object.into_bytes().await.unwrap_err().is_cancelled());

    store.delete_object("cancel/get", None).await.unwrap();
}

async fn concurrent_puts_to_one_key_leave_one_write<S: BlobStorage + ?Sized>(store: &S) {
    const WRITERS: usize = 8;
    let body_for = |writer: usize| format!("writer-{writer};").repeat(4_000 + writer * 97);

    let results = join_all((0..WRITERS).map(|writer| {
        store.put_object(
            PutObject::new("race/one", body_for(writer), format!("text/x-writer-{writer}"))
                .with_metadata("writer", writer.to_string()),
            None,
        )
    }))
    .await;
    for result in results {
        result.unwrap();
    }

    let object = store.get_object("race/one", None).await.unwrap();
    let writer: usize = object.info.metadata["writer"].parse().unwrap();
    assert!(writer < WRITERS);
    assert_eq!(object.info.content_type, format!("text/x-writer-{writer}"));
    let expected = body_for(writer);
    assert_eq!(object.info.size_bytes, expected.len() as u64);
    assert_eq!(object.into_bytes().await.unwrap(), Bytes::from(expected));

    store.delete_object("race/one", None).await.unwrap();
}
