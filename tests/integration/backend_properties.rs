//! Store properties that hold on every backend.

use super::support::Harness;
use davattr::{AttrError, BackendKind, ItemPath};
use proptest::prelude::*;

const VALUES: &[&str] = &[
    "hello",
    "",
    " padded ",
    "line one\nline two",
    "naïve ☃ 日本語",
    "100% <xml attr=\"x\"/>",
];

const NAMES: &[&str] = &[
    "snippet",
    "lock-token",
    "Win32FileAttributes",
    "with space",
    "@at",
    "~tilde",
    "dotted.name",
    "Ünïcödé",
];

#[tokio::test]
async fn set_then_get_returns_value() {
    for h in Harness::all() {
        h.create_item("/docs/file.txt");
        for (i, value) in VALUES.iter().enumerate() {
            let name = format!("attr{}", i);
            h.store.set("/docs/file.txt", &name, value).await.unwrap();
            assert_eq!(
                h.store.get("/docs/file.txt", &name).await.unwrap().as_deref(),
                Some(*value),
                "{} backend",
                h.kind()
            );
        }
        for name in NAMES {
            h.store.set("/docs/file.txt", name, name).await.unwrap();
            assert_eq!(
                h.store.get("/docs/file.txt", name).await.unwrap().as_deref(),
                Some(*name),
                "{} backend, name {:?}",
                h.kind(),
                name
            );
        }
        let listed = h.store.list("/docs/file.txt").await.unwrap();
        assert_eq!(listed.len(), VALUES.len() + NAMES.len(), "{} backend", h.kind());
    }
}

#[tokio::test]
async fn set_overwrites_previous_value() {
    for h in Harness::all() {
        h.create_item("/a.txt");
        h.store.set("/a.txt", "n", "first").await.unwrap();
        h.store.set("/a.txt", "n", "second").await.unwrap();
        assert_eq!(h.store.get("/a.txt", "n").await.unwrap().as_deref(), Some("second"));
        assert_eq!(h.store.list("/a.txt").await.unwrap().len(), 1);
    }
}

#[tokio::test]
async fn never_set_is_absent() {
    for h in Harness::all() {
        h.create_item("/a.txt");
        assert!(!h.store.has("/a.txt", "never").await.unwrap());
        assert_eq!(h.store.get("/a.txt", "never").await.unwrap(), None);
        assert!(h.store.get_required("/a.txt", "never").await.unwrap_err().is_not_found());

        // Same for an item that does not exist at all.
        assert!(!h.store.has("/missing.txt", "never").await.unwrap());
        assert!(h.store.list("/missing.txt").await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn empty_value_is_not_absent() {
    for h in Harness::all() {
        h.create_item("/a.txt");
        h.store.set("/a.txt", "empty", "").await.unwrap();
        assert!(h.store.has("/a.txt", "empty").await.unwrap(), "{} backend", h.kind());
        assert_eq!(h.store.get("/a.txt", "empty").await.unwrap().as_deref(), Some(""));
    }
}

#[tokio::test]
async fn delete_is_idempotent() {
    for h in Harness::all() {
        h.create_item("/a.txt");
        h.store.delete("/a.txt", "nothing").await.unwrap();
        assert!(!h.store.has("/a.txt", "nothing").await.unwrap());

        h.store.set("/a.txt", "n", "v").await.unwrap();
        h.store.delete("/a.txt", "n").await.unwrap();
        h.store.delete("/a.txt", "n").await.unwrap();
        assert!(!h.store.has("/a.txt", "n").await.unwrap());

        h.store.delete("/missing.txt", "n").await.unwrap();
    }
}

#[tokio::test]
async fn delete_all_removes_every_name() {
    for h in Harness::all() {
        h.create_item("/a.txt");
        for name in NAMES {
            h.store.set("/a.txt", name, "v").await.unwrap();
        }
        h.store.delete_all("/a.txt").await.unwrap();
        for name in NAMES {
            assert!(!h.store.has("/a.txt", name).await.unwrap(), "{} backend", h.kind());
        }
        // No attributes left is not an error.
        h.store.delete_all("/a.txt").await.unwrap();
        h.store.delete_all("/missing.txt").await.unwrap();
    }
}

#[tokio::test]
async fn copy_duplicates_and_keeps_source() {
    for h in Harness::all() {
        h.create_item("/src.txt");
        h.create_item("/dst.txt");
        for name in NAMES {
            h.store.set("/src.txt", name, &format!("value of {}", name)).await.unwrap();
        }

        h.store.copy("/src.txt", "/dst.txt").await.unwrap();

        for name in NAMES {
            let source = h.store.get("/src.txt", name).await.unwrap();
            assert_eq!(source, Some(format!("value of {}", name)), "{} backend", h.kind());
            assert_eq!(h.store.get("/dst.txt", name).await.unwrap(), source);
        }
    }
}

#[tokio::test]
async fn copy_replaces_destination_set() {
    for h in Harness::all() {
        h.create_item("/src.txt");
        h.create_item("/dst.txt");
        h.store.set("/src.txt", "keep", "1").await.unwrap();
        h.store.set("/dst.txt", "stale", "x").await.unwrap();

        h.store.copy("/src.txt", "/dst.txt").await.unwrap();

        let listed = h.store.list("/dst.txt").await.unwrap();
        assert_eq!(listed.len(), 1, "{} backend", h.kind());
        assert!(!h.store.has("/dst.txt", "stale").await.unwrap());
    }
}

#[tokio::test]
async fn move_relocates_set() {
    for h in Harness::all() {
        h.create_item("/src.txt");
        h.create_item("/dst.txt");
        for name in NAMES {
            h.store.set("/src.txt", name, name).await.unwrap();
        }

        h.store.move_to("/src.txt", "/dst.txt").await.unwrap();

        for name in NAMES {
            assert!(!h.store.has("/src.txt", name).await.unwrap(), "{} backend", h.kind());
            assert_eq!(
                h.store.get("/dst.txt", name).await.unwrap().as_deref(),
                Some(*name)
            );
        }
    }
}

#[tokio::test]
async fn copy_onto_itself_is_noop() {
    for h in Harness::all() {
        h.create_item("/a.txt");
        h.store.set("/a.txt", "n", "v").await.unwrap();
        h.store.copy("/a.txt", "/a.txt").await.unwrap();
        h.store.move_to("/a.txt", "/a.txt").await.unwrap();
        assert_eq!(h.store.get("/a.txt", "n").await.unwrap().as_deref(), Some("v"));
    }
}

#[tokio::test]
async fn invalid_names_fail_before_io() {
    for h in Harness::all() {
        for bad in ["", "a/b", "a\\b", "DAV:owner", "nul\0byte", "tab\tname"] {
            let err = h.store.set("/a.txt", bad, "v").await.unwrap_err();
            assert!(matches!(err, AttrError::InvalidName { .. }), "{:?}", bad);
        }
        let too_long = "x".repeat(256);
        assert!(matches!(
            h.store.get("/a.txt", &too_long).await.unwrap_err(),
            AttrError::InvalidName { .. }
        ));
        assert!(matches!(
            h.store.set("/a/../b", "n", "v").await.unwrap_err(),
            AttrError::InvalidPath { .. }
        ));
    }
}

#[tokio::test]
async fn targets_must_exist_where_backend_requires() {
    for h in Harness::all() {
        h.create_item("/src.txt");
        h.store.set("/src.txt", "n", "v").await.unwrap();
        let result = h.store.copy("/src.txt", "/nowhere.txt").await;
        match h.kind() {
            BackendKind::Shadow => result.unwrap(),
            BackendKind::Native | BackendKind::Cloud => {
                assert!(matches!(result.unwrap_err(), AttrError::TargetMissing { .. }));
                // The failed copy left the source alone.
                assert_eq!(h.store.get("/src.txt", "n").await.unwrap().as_deref(), Some("v"));
            }
        }
    }
}

#[tokio::test]
async fn folder_operations_cover_descendants() {
    for h in Harness::hierarchical() {
        h.create_dir("/folder");
        h.create_item("/folder/child.txt");
        h.create_dir("/copy");
        h.create_item("/copy/child.txt");
        h.store.set("/folder", "own", "1").await.unwrap();
        h.store.set("/folder/child.txt", "nested", "2").await.unwrap();

        h.store.copy("/folder", "/copy").await.unwrap();
        assert_eq!(h.store.get("/copy", "own").await.unwrap().as_deref(), Some("1"));
        assert_eq!(
            h.store.get("/copy/child.txt", "nested").await.unwrap().as_deref(),
            Some("2"),
            "{} backend",
            h.kind()
        );

        h.store.delete_all("/folder").await.unwrap();
        assert!(h.store.list("/folder").await.unwrap().is_empty());
        assert!(h.store.list("/folder/child.txt").await.unwrap().is_empty());
        assert_eq!(h.store.list("/copy/child.txt").await.unwrap().len(), 1);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_shadow_set_get(
        segment in "[a-zA-Z0-9 ._@~%-]{1,16}",
        name in "[a-zA-Z0-9 ._@~%-]{1,32}",
        value in "\\PC{0,64}",
    ) {
        prop_assume!(segment != "." && segment != "..");
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let h = Harness::shadow();
        let path = ItemPath::from_segments([segment.as_str()]).unwrap().to_string();
        runtime.block_on(async {
            h.store.set(&path, &name, &value).await.unwrap();
            let read = h.store.get(&path, &name).await.unwrap();
            prop_assert_eq!(read.as_deref(), Some(value.as_str()));
            h.store.delete(&path, &name).await.unwrap();
            prop_assert!(!h.store.has(&path, &name).await.unwrap());
            Ok(())
        })?;
    }
}
