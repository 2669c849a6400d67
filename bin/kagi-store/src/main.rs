use std::path::PathBuf;

use clap::{Parser, Subcommand};
use kagi::{
    storage::SessionStorage,
    store::{clean_old_stored_persistent_info, PersistentSessionsStore},
    KagiStorage,
};

#[derive(Parser, Debug, Clone)]
#[clap(version, author)]
/// Inspects the persistent MediaKeySession information stored by kagi.
struct KagiStoreArgs {
    /// Path of the persisted sessions file.
    #[clap(short, long, env = "KAGI_SESSION_STORE")]
    storage: PathBuf,

    #[clap(subcommand)]
    command: KagiStoreCommand,
}

#[derive(Subcommand, Debug, Clone)]
enum KagiStoreCommand {
    /// List the stored sessions, least recently used first.
    List {
        /// Print the raw entries as JSON
        #[clap(long)]
        json: bool,
    },
    /// Delete the least recently used sessions.
    Prune {
        /// Number of sessions to keep
        #[clap(long)]
        max: usize,
    },
    /// Delete every stored session.
    Clear,
}

async fn list(storage: KagiStorage, json: bool) -> anyhow::Result<()> {
    let entries = storage.load().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for entry in entries {
        let key_ids = entry
            .key_ids
            .as_ref()
            .map(|ids| ids.join(","))
            .unwrap_or_else(|| "-".to_string());
        let readable = if entry.to_record().is_ok() {
            ""
        } else {
            " (unreadable)"
        };
        println!(
            "{}\tv{}\t{}\t{} value(s)\tkeys: {key_ids}{readable}",
            entry.session_id,
            entry.version,
            entry.init_data_type.as_deref().unwrap_or("-"),
            entry.values.len(),
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .try_from_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = KagiStoreArgs::parse();
    let storage = KagiStorage::file(args.storage);

    match args.command {
        KagiStoreCommand::List { json } => list(storage, json).await?,
        KagiStoreCommand::Prune { max } => {
            let mut store = PersistentSessionsStore::load(storage).await;
            let before = store.len();
            clean_old_stored_persistent_info(&mut store, max).await;
            tracing::info!("Removed {} session(s), {} left", before - store.len(), store.len());
        }
        KagiStoreCommand::Clear => {
            let mut store = PersistentSessionsStore::load(storage).await;
            store.clear().await;
            tracing::info!("Cleared stored sessions");
        }
    }

    Ok(())
}
