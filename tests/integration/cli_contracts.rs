//! Output contracts of the `davattr` command line. Scripts parse the JSON
//! forms, so their shape is pinned here.

use clap::Parser;
use davattr::config::{CloudSection, DavAttrConfig};
use davattr::tooling::{Cli, CliContext, Commands, OutputFormat};
use davattr::{AttrError, BackendSelector};
use serde_json::Value;
use tempfile::TempDir;

fn shadow_config(temp: &TempDir) -> DavAttrConfig {
    let repo = temp.path().join("repo");
    std::fs::create_dir_all(&repo).unwrap();
    let mut config = DavAttrConfig::default();
    config.store.repository_root = repo;
    config.store.attr_storage_path = Some(temp.path().join("attrs"));
    config.validate().unwrap();
    config
}

fn cloud_config(temp: &TempDir) -> DavAttrConfig {
    let mut config = DavAttrConfig::default();
    config.store.repository_root = temp.path().to_path_buf();
    config.cloud = Some(CloudSection {
        account: String::new(),
        container: "docs".to_string(),
        sas_token: Some("sv=2021&sig=secret".to_string()),
        endpoint: Some("memory:".to_string()),
        timeout_ms: 2000,
    });
    config.validate().unwrap();
    config
}

fn context(config: DavAttrConfig) -> CliContext {
    CliContext::new(config, &BackendSelector::with_probe(|_, _| false)).unwrap()
}

fn command(args: &[&str]) -> Commands {
    let mut argv = vec!["davattr"];
    argv.extend_from_slice(args);
    Cli::try_parse_from(argv).unwrap().command
}

async fn json(context: &CliContext, args: &[&str]) -> Value {
    let out = context.execute(&command(args)).await.unwrap();
    serde_json::from_str(&out).unwrap()
}

#[tokio::test]
async fn backend_json_shape() {
    let temp = TempDir::new().unwrap();
    let shadow = context(shadow_config(&temp));
    let out = json(&shadow, &["backend", "--format", "json"]).await;
    assert_eq!(out["backend"], "shadow");
    assert_eq!(out["reason"], "shadow-configured");
    assert_eq!(out["namespace"], "webdav");
    assert_eq!(out["capabilities"]["per_attribute_delete"], true);
    assert_eq!(out["capabilities"]["atomic_copy"], true);
    assert_eq!(out["capabilities"]["atomic_move"], true);

    let cloud = context(cloud_config(&temp));
    let out = json(&cloud, &["backend", "--format", "json"]).await;
    assert_eq!(out["backend"], "cloud");
    assert_eq!(out["reason"], "cloud-configured");
    assert_eq!(out["capabilities"]["atomic_move"], false);
}

#[tokio::test]
async fn backend_text_names_selection_reason() {
    let temp = TempDir::new().unwrap();
    let mut config = DavAttrConfig::default();
    config.store.repository_root = temp.path().to_path_buf();
    config.validate().unwrap();
    let out = context(config)
        .execute(&command(&["backend"]))
        .await
        .unwrap();
    assert!(out.starts_with("Backend: shadow (native probe failed"));
    assert!(out.contains("Atomic move: yes"));
}

#[tokio::test]
async fn list_json_is_a_flat_name_value_object() {
    let temp = TempDir::new().unwrap();
    let ctx = context(shadow_config(&temp));
    ctx.execute(&command(&["set", "/docs/a.txt", "snippet", "hello"]))
        .await
        .unwrap();
    ctx.execute(&command(&["set", "/docs/a.txt", "empty", ""]))
        .await
        .unwrap();

    let out = json(&ctx, &["list", "/docs/a.txt", "--format", "json"]).await;
    let object = out.as_object().unwrap();
    assert_eq!(object.len(), 2);
    assert_eq!(out["snippet"], "hello");
    assert_eq!(out["empty"], "");

    let out = json(&ctx, &["list", "/docs/none.txt", "--format", "json"]).await;
    assert!(out.as_object().unwrap().is_empty());
}

#[tokio::test]
async fn list_text_renders_a_table() {
    let temp = TempDir::new().unwrap();
    let ctx = context(shadow_config(&temp));
    ctx.store().set("/a.txt", "author", "kim").await.unwrap();

    let out = ctx.execute(&command(&["list", "/a.txt"])).await.unwrap();
    assert!(out.contains("Name"));
    assert!(out.contains("author"));
    assert!(out.contains("kim"));
}

#[tokio::test]
async fn check_json_reports_orphans_and_removals() {
    let temp = TempDir::new().unwrap();
    let ctx = context(shadow_config(&temp));
    ctx.store().set("/gone.txt", "n", "1").await.unwrap();

    let out = json(&ctx, &["check", "--format", "json"]).await;
    assert!(out["report"]["scanned_sets"].as_u64().unwrap() >= 1);
    assert_eq!(out["report"]["orphaned"][0], "/gone.txt");
    assert!(out["report"]["leftovers"].as_array().unwrap().is_empty());
    assert!(out["removed"].is_null());

    let out = json(&ctx, &["check", "--purge", "--format", "json"]).await;
    assert_eq!(out["removed"], 1);

    let out = json(&ctx, &["check", "--format", "json"]).await;
    assert!(out["report"]["orphaned"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn atomic_move_is_refused_on_cloud() {
    let temp = TempDir::new().unwrap();
    let ctx = context(cloud_config(&temp));
    let err = ctx
        .execute(&command(&["move", "/a.bin", "/b.bin", "--atomic"]))
        .await
        .unwrap_err();
    assert!(matches!(err, AttrError::Unsupported { .. }));
}

#[tokio::test]
async fn invalid_input_surfaces_typed_errors() {
    let temp = TempDir::new().unwrap();
    let ctx = context(shadow_config(&temp));
    let err = ctx
        .execute(&command(&["set", "/a.txt", "DAV:owner", "x"]))
        .await
        .unwrap_err();
    assert!(matches!(err, AttrError::InvalidName { .. }));

    let err = ctx
        .execute(&command(&["get", "/a.txt", "missing"]))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn config_output_redacts_sas_token() {
    let temp = TempDir::new().unwrap();
    let ctx = context(cloud_config(&temp));
    let out = ctx.execute(&command(&["config"])).await.unwrap();
    assert!(out.contains("[cloud]"));
    assert!(out.contains("<redacted>"));
    assert!(!out.contains("sig=secret"));

    let parsed: DavAttrConfig = toml::from_str(&out).unwrap();
    assert_eq!(parsed.cloud.unwrap().container, "docs");
}

#[test]
fn output_format_defaults_to_text() {
    assert!(matches!(
        command(&["check"]),
        Commands::Check {
            purge: false,
            format: OutputFormat::Text
        }
    ));
}
