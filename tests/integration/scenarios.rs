//! End-to-end flows a WebDAV server drives through the store.

use super::support::Harness;
use davattr::backend::cloud::MemoryObjectClient;
use davattr::backend::{NativeStreamBackend, ShadowTreeBackend};
use davattr::config::DavAttrConfig;
use davattr::selector::SelectionReason;
use davattr::{AttributeKeyCodec, AttributeStore, BackendKind, BackendSelector, ItemPath};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// A client saves a document, the server copies it as "Save As" would, and
/// the lock token recorded on the original shows up on the copy.
#[tokio::test]
async fn lock_token_follows_copy() {
    for h in Harness::all() {
        h.create_item("/docs/report.docx");
        h.create_item("/docs/report - Copy.docx");

        h.store.set("/docs/report.docx", "lock-token", "abc123").await.unwrap();
        h.store
            .copy("/docs/report.docx", "/docs/report - Copy.docx")
            .await
            .unwrap();

        assert_eq!(
            h.store
                .get("/docs/report - Copy.docx", "lock-token")
                .await
                .unwrap()
                .as_deref(),
            Some("abc123"),
            "{} backend",
            h.kind()
        );
        assert_eq!(
            h.store.get("/docs/report.docx", "lock-token").await.unwrap().as_deref(),
            Some("abc123")
        );
    }
}

/// Rename on the data volume followed by the attribute move, in the order a
/// MOVE handler runs them.
#[tokio::test]
async fn rename_then_move_attributes() {
    for h in Harness::hierarchical() {
        h.create_item("/inbox/draft.txt");
        h.store.set("/inbox/draft.txt", "author", "kim").await.unwrap();

        h.rename_item("/inbox/draft.txt", "/archive/draft.txt");
        h.store
            .move_to("/inbox/draft.txt", "/archive/draft.txt")
            .await
            .unwrap();

        assert_eq!(
            h.store
                .get("/archive/draft.txt", "author")
                .await
                .unwrap()
                .as_deref(),
            Some("kim"),
            "{} backend",
            h.kind()
        );
        assert!(h.store.list("/inbox/draft.txt").await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn shadow_attributes_survive_restart() {
    let temp = TempDir::new().unwrap();
    let repo = temp.path().join("repo");
    let attrs = temp.path().join("attrs");
    std::fs::create_dir_all(&repo).unwrap();

    let open = || {
        let codec = AttributeKeyCodec::default();
        let backend = ShadowTreeBackend::new(repo.clone(), attrs.clone(), codec.clone());
        AttributeStore::new(Arc::new(backend), codec)
    };

    let first = open();
    first.set("/notes.md", "snippet", "first draft").await.unwrap();
    first.set("/notes.md", "Snippet", "case matters").await.unwrap();
    drop(first);

    let second = open();
    assert_eq!(
        second.get("/notes.md", "snippet").await.unwrap().as_deref(),
        Some("first draft")
    );
    assert_eq!(
        second.get("/notes.md", "Snippet").await.unwrap().as_deref(),
        Some("case matters")
    );
}

#[tokio::test]
async fn volume_without_native_attributes_falls_back_to_shadow() {
    let temp = TempDir::new().unwrap();
    assert!(!NativeStreamBackend::probe(
        &temp.path().join("does-not-exist"),
        &AttributeKeyCodec::default()
    ));

    let mut config = DavAttrConfig::default();
    config.store.repository_root = temp.path().to_path_buf();
    let selection = BackendSelector::with_probe(|_, _| false)
        .select(&config)
        .unwrap();
    assert_eq!(selection.reason, SelectionReason::TempFallback);
    assert_eq!(selection.store.kind(), BackendKind::Shadow);

    // The fallback store is fully usable, with or without a host file.
    selection.store.set("/a.txt", "n", "v").await.unwrap();
    assert_eq!(
        selection.store.get("/a.txt", "n").await.unwrap().as_deref(),
        Some("v")
    );
    selection.store.delete_all("/").await.unwrap();
}

#[tokio::test]
async fn concurrent_cloud_writers_keep_every_attribute() {
    let h = Harness::cloud_with(MemoryObjectClient::with_latency(Duration::from_millis(3)));
    h.create_item("/shared.bin");

    let mut tasks = Vec::new();
    for i in 0..10 {
        let store = h.store.clone();
        tasks.push(tokio::spawn(async move {
            store
                .set("/shared.bin", &format!("writer-{}", i), &i.to_string())
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let listed = h.store.list("/shared.bin").await.unwrap();
    assert_eq!(listed.len(), 10);
    let client = h.cloud.as_ref().unwrap();
    assert_eq!(client.replace_count(), 10);
    assert!(client
        .metadata(&ItemPath::parse("/shared.bin").unwrap())
        .unwrap()
        .keys()
        .all(|key| key.starts_with("webdav")));
}

#[tokio::test]
async fn cloud_copy_keeps_foreign_metadata_on_destination() {
    let h = Harness::cloud();
    let client = h.cloud.as_ref().unwrap();
    let source = ItemPath::parse("/a.bin").unwrap();
    let destination = ItemPath::parse("/b.bin").unwrap();
    client.create_object(&source);
    client.create_object(&destination);
    client.insert_raw(&destination, "contenttype", "image/png");

    h.store.set("/a.bin", "lock-token", "abc123").await.unwrap();
    h.store.copy("/a.bin", "/b.bin").await.unwrap();

    let raw = client.metadata(&destination).unwrap();
    assert_eq!(raw.get("contenttype").map(String::as_str), Some("image/png"));
    assert_eq!(
        h.store.get("/b.bin", "lock-token").await.unwrap().as_deref(),
        Some("abc123")
    );
}
