//! # Storage Demo
//!
//! Walks one storage configuration end to end: connect, write, read,
//! sync, print status, clean up.
//!
//! ## Usage
//! ```bash
//! # Hybrid mode against an in-process cloud store
//! cargo run -p strata-sync --bin storage-demo
//!
//! # Pick a mode
//! cargo run -p strata-sync --bin storage-demo -- --mode local
//!
//! # Load a TOML config
//! cargo run -p strata-sync --bin storage-demo -- --config ./storage.toml
//! ```
//!
//! Without a `CLOUD_DATABASE_URL`/`DATABASE_URL` the cloud side runs on an
//! in-process memory store, so hybrid mode works offline.

use std::env;
use std::path::PathBuf;

use chrono::Utc;
use serde_json::json;
use strata_sync::{
    Fields, Query, RecordOps, SortDirection, StorageConfig, StorageError, StorageManager,
    StorageMode,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEMO_CLOUD_URL: &str = "memory:demo-cloud";
const DEMO_LOCAL_URL: &str = "memory:demo-local";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args: Vec<String> = env::args().collect();

    let mut config_path: Option<PathBuf> = None;
    let mut mode: Option<StorageMode> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--mode" | "-m" => {
                if i + 1 < args.len() {
                    match args[i + 1].parse() {
                        Ok(parsed) => mode = Some(parsed),
                        Err(e) => warn!(error = %e, "Ignoring --mode"),
                    }
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Strata Storage Demo");
                println!();
                println!("Usage: storage-demo [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --config <PATH>  Storage config file (TOML)");
                println!("  -m, --mode <MODE>    local | cloud | hybrid (default: from config)");
                println!("  -h, --help           Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    let mut config = match config_path {
        Some(path) => StorageConfig::load(Some(path))?,
        None => StorageConfig::default(),
    };
    if let Some(mode) = mode {
        config.mode = mode;
    }
    if config.local.options.connection_string.is_none() {
        config.local.options.connection_string = Some(DEMO_LOCAL_URL.into());
    }
    if config.cloud.options.base.connection_string.is_none()
        && env::var("CLOUD_DATABASE_URL").is_err()
        && env::var("DATABASE_URL").is_err()
    {
        info!(url = DEMO_CLOUD_URL, "No cloud URL configured, using an in-process store");
        config.cloud.options.base.connection_string = Some(DEMO_CLOUD_URL.into());
    }

    let manager = StorageManager::new(config)?;
    manager.connect().await?;
    info!(mode = %manager.mode(), "Connected");

    let stamp = Utc::now().timestamp_millis();
    let user = manager
        .create(
            "user",
            fields(json!({
                "email": format!("demo.{stamp}@example.com"),
                "username": "demo",
            })),
        )
        .await?;
    let user_id = user.id().unwrap_or_default().to_string();

    manager
        .create(
            "chatSession",
            fields(json!({ "userId": user_id, "title": "Storage demo" })),
        )
        .await?;

    let recent = manager
        .find_many(
            "chatSession",
            &Query::all()
                .order_by("updatedAt", SortDirection::Desc)
                .take(5),
        )
        .await?;
    info!(sessions = recent.len(), "Read back recent sessions");

    match manager.sync().await {
        Ok(result) => info!(
            success = result.success,
            records = result.records_synced,
            conflicts = result.conflicts_resolved,
            "Sync pass finished"
        ),
        Err(StorageError::SyncUnavailable(reason)) => info!(%reason, "Sync skipped"),
        Err(e) => warn!(error = %e, "Sync failed"),
    }

    let status = manager.status().await;
    println!("{}", serde_json::to_string_pretty(&status)?);

    manager.cleanup().await?;
    info!("Done");
    Ok(())
}

fn fields(value: serde_json::Value) -> Fields {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Fields::new(),
    }
}

/// Initialize tracing subscriber for logging.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,strata_sync=debug,strata_db=info,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
