//! # Seed Data Generator
//!
//! Populates a local store with demo users, chat sessions and messages.
//!
//! ## Usage
//! ```bash
//! # Generate 50 users (default)
//! cargo run -p strata-db --bin seed
//!
//! # Generate custom amount
//! cargo run -p strata-db --bin seed -- --count 200
//!
//! # Specify database
//! cargo run -p strata-db --bin seed -- --db sqlite:./data/strata.db
//! ```
//!
//! ## Generated Records
//! - `user`: unique email `{name}.{index}@example.com`
//! - `chatSession`: one or two per user
//! - `message`: a short exchange per session
//!
//! Every record is stamped `syncStatus = pending`, as if written offline,
//! so the next hybrid sync pushes all of it.

use std::env;

use chrono::Utc;
use serde_json::{json, Value};
use strata_core::{fields, timestamp, Fields, Query, SyncStatus};
use strata_db::{open_store, RecordRepository, RecordStore};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const NAMES: &[&str] = &[
    "alice", "bruno", "chen", "dana", "emeka", "farah", "goran", "hana", "ivan", "jules",
];

const TOPICS: &[&str] = &[
    "Deploy checklist",
    "Disk usage on web-01",
    "Nginx reload failing",
    "Rotate SSH keys",
    "Backup verification",
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args: Vec<String> = env::args().collect();

    let mut count: usize = 50;
    let mut db_url = String::from("sqlite:./strata_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--count" | "-c" => {
                if i + 1 < args.len() {
                    count = args[i + 1].parse().unwrap_or(50);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_url = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Strata Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --count <N>    Number of users to generate (default: 50)");
                println!("  -d, --db <URL>     Store connection string (default: sqlite:./strata_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    info!(db = %db_url, users = count, "Seeding store");

    let store = open_store(&db_url, 1)?;
    store.open().await?;

    let mut session = store.begin().await?;
    let mut repo = RecordRepository::new(&mut *session, store.models());

    let existing = repo.find_many("user", &Query::all()).await?.len();
    if existing > 0 {
        warn!(existing, "Store already has users; skipping seed to avoid duplicates");
        return Ok(());
    }

    let start = std::time::Instant::now();
    let mut sessions = 0usize;
    let mut messages = 0usize;

    for n in 0..count {
        let name = NAMES[n % NAMES.len()];
        let user = repo
            .create(
                "user",
                stamped(json!({
                    "email": format!("{name}.{n}@example.com"),
                    "username": format!("{name}{n}"),
                })),
            )
            .await?;
        let user_id = user.id().unwrap_or_default().to_string();

        for s in 0..(1 + n % 2) {
            let title = TOPICS[(n + s) % TOPICS.len()];
            let chat = repo
                .create(
                    "chatSession",
                    stamped(json!({ "userId": user_id, "title": title })),
                )
                .await?;
            let chat_id = chat.id().unwrap_or_default().to_string();
            sessions += 1;

            let exchange = vec![
                stamped(json!({ "sessionId": chat_id, "role": "user", "content": title })),
                stamped(json!({ "sessionId": chat_id, "role": "assistant", "content": "On it." })),
            ];
            messages += repo.create_many("message", exchange).await? as usize;
        }
    }

    session.commit().await?;
    store.close().await;

    info!(
        users = count,
        sessions,
        messages,
        elapsed = ?start.elapsed(),
        "Seed complete"
    );
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,strata=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Adds the bookkeeping a local write would carry.
fn stamped(value: Value) -> Fields {
    let now = timestamp(Utc::now());
    let mut data = match value {
        Value::Object(map) => map,
        _ => Fields::new(),
    };
    data.insert(fields::CREATED_AT.into(), now.clone());
    data.insert(fields::UPDATED_AT.into(), now);
    data.insert(fields::SYNC_STATUS.into(), SyncStatus::Pending.into());
    data
}
