//! Two-stage pipeline demo: a `greeting` artifact mounted into a
//! `shout` artifact, executed twice to show the cache hit.
//!
//! Run with: cargo run -p ox-engine --example pipeline

use std::sync::Arc;

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use eyre::Result;
use ox_engine::{DependencyMap, Engine, EngineConfig, ExecOutput, Executor, ExecutorConfig};
use serde_json::{Value, json};

struct Greeting;

#[async_trait]
impl Executor for Greeting {
    async fn run(&self, input: &Value, workspace: &Utf8Path) -> Result<ExecOutput> {
        let name = input.get("name").and_then(Value::as_str).unwrap_or("world");
        tokio::fs::write(workspace.join("greeting.txt"), format!("hello, {name}")).await?;
        Ok(ExecOutput::new("greeting.txt"))
    }
}

struct Shout;

#[async_trait]
impl Executor for Shout {
    fn dependencies(&self, input: &Value) -> Result<DependencyMap> {
        Ok(DependencyMap::from([(
            Utf8PathBuf::from("in/greeting"),
            ExecutorConfig::from_value("greeting", input.clone()),
        )]))
    }

    async fn run(&self, _input: &Value, workspace: &Utf8Path) -> Result<ExecOutput> {
        let quiet = tokio::fs::read_to_string(workspace.join("in/greeting")).await?;
        tokio::fs::write(workspace.join("loud.txt"), quiet.to_uppercase()).await?;
        Ok(ExecOutput::new("loud.txt"))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("ox_engine=debug")),
        )
        .init();

    let store = tempfile::TempDir::new()?;
    let root = Utf8PathBuf::from_path_buf(store.path().to_path_buf())
        .map_err(|p| eyre::eyre!("store root is not UTF-8: {}", p.display()))?;

    let engine = Engine::new(EngineConfig::new(root));
    engine.register("greeting", Arc::new(Greeting))?;
    engine.register("shout", Arc::new(Shout))?;

    let request = ExecutorConfig::from_value("shout", json!({"name": "oxbow"}));

    let path = engine.execute(&request).await?;
    tracing::info!(entry = %path, "first execute (miss)");
    tracing::info!("contents: {}", tokio::fs::read_to_string(&path).await?);

    let again = engine.execute(&request).await?;
    tracing::info!(entry = %again, "second execute (hit, same path: {})", path == again);

    Ok(())
}
