//! Failure handling: escape rejection, scratch hygiene, and corruption
//! recovery.

mod harness;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use harness::{Counting, Escaping, Failing, TestEnv, cfg};
use ox_engine::{EngineError, StoreError};
use serde_json::json;

#[tokio::test]
async fn escaping_entries_are_rejected_and_nothing_is_published() {
    let env = TestEnv::new();
    env.engine.register("escape", Arc::new(Escaping)).unwrap();

    let err = env.engine.execute(&cfg("escape", json!({}))).await.unwrap_err();
    assert!(
        matches!(err, EngineError::Store(StoreError::InvalidPath { .. })),
        "got {err:?}"
    );

    assert!(env.engine.peek("escape", &json!({})).await.unwrap().is_none());
    assert!(env.scratch_dirs().is_empty());
}

#[tokio::test]
async fn failed_fn_surfaces_and_leaves_no_scratch() {
    let env = TestEnv::new();
    env.engine.register("bad", Arc::new(Failing)).unwrap();

    let err = env.engine.execute(&cfg("bad", json!({}))).await.unwrap_err();
    match err {
        EngineError::UserFn { kind, report, .. } => {
            assert_eq!(kind, "bad");
            assert!(report.to_string().contains("blew up"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    assert!(env.engine.peek("bad", &json!({})).await.unwrap().is_none());
    assert!(env.scratch_dirs().is_empty());
}

#[tokio::test]
async fn keep_scratch_policy_preserves_failed_scratch() {
    let env = TestEnv::with_config(|config| config.keep_scratch(true));
    env.engine.register("bad", Arc::new(Failing)).unwrap();

    env.engine.execute(&cfg("bad", json!({}))).await.unwrap_err();

    let scratches = env.scratch_dirs();
    assert_eq!(scratches.len(), 1, "failed scratch is kept for inspection");
    assert!(scratches[0].join("workspace/partial.txt").is_file());
    // Still nothing published.
    assert!(env.engine.peek("bad", &json!({})).await.unwrap().is_none());
}

#[tokio::test]
async fn corrupt_descriptor_surfaces_until_forgotten() {
    let env = TestEnv::new();
    let (counting, runs) = Counting::new("x");
    env.engine.register("k", counting).unwrap();

    let input = json!({});
    let path = env.engine.execute(&cfg("k", input.clone())).await.unwrap();
    let artifact_dir = path.parent().unwrap().to_owned();

    std::fs::write(artifact_dir.join(".manifest.json"), "not json {").unwrap();

    let err = env.engine.execute(&cfg("k", input.clone())).await.unwrap_err();
    assert!(
        matches!(err, EngineError::Store(StoreError::CorruptDescriptor { .. })),
        "got {err:?}"
    );

    // The caller decides: forget, then retry.
    env.engine.forget("k", &input).await.unwrap();
    env.engine.execute(&cfg("k", input)).await.unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn missing_entry_link_triggers_a_rebuild() {
    let env = TestEnv::new();
    let (counting, runs) = Counting::new("x");
    env.engine.register("k", counting).unwrap();

    let path = env.engine.execute(&cfg("k", json!({}))).await.unwrap();
    std::fs::remove_file(&path).unwrap();

    let rebuilt = env.engine.execute(&cfg("k", json!({}))).await.unwrap();
    assert_eq!(rebuilt, path);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(std::fs::read_to_string(&rebuilt).unwrap(), "x");
}

#[tokio::test]
async fn escaping_entry_link_on_disk_triggers_a_rebuild() {
    let env = TestEnv::new();
    let (counting, runs) = Counting::new("x");
    env.engine.register("k", counting).unwrap();

    let path = env.engine.execute(&cfg("k", json!({}))).await.unwrap();
    std::fs::remove_file(&path).unwrap();
    std::os::unix::fs::symlink("../../outside", &path).unwrap();

    let rebuilt = env.engine.execute(&cfg("k", json!({}))).await.unwrap();
    assert_eq!(rebuilt, path);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(
        std::fs::read_link(&rebuilt).unwrap(),
        std::path::PathBuf::from("workspace/out.txt")
    );
}

#[tokio::test]
async fn unserializable_inputs_fail_at_config_construction() {
    use std::collections::HashMap;

    // Maps with non-string keys have no JSON representation.
    let mut bad = HashMap::new();
    bad.insert(vec![1u8], "x");

    let err = ox_engine::ExecutorConfig::new("k", &bad).unwrap_err();
    assert!(
        matches!(err, EngineError::Store(StoreError::Unserializable { .. })),
        "got {err:?}"
    );
}
