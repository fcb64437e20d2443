use clap::{value_parser, Arg, Command};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use univrs_docstore::sample;
use univrs_docstore::{ClientConfig, DocumentClient, DocumentStore, MemoryStore, SqliteStore};

fn build_cli() -> Command {
    Command::new("docstore-demo")
        .about("Run the sample document operations against a store")
        .arg(
            Arg::new("sqlite")
                .long("sqlite")
                .value_name("PATH")
                .help("Store documents in a SQLite database (default: in memory)")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .help("Load client configuration from a JSON file")
                .value_parser(value_parser!(PathBuf)),
        )
}

/// Report a failed step and keep going.
fn report<T>(step: &str, result: univrs_docstore::Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            error!(step, error = %e, "step failed");
            None
        }
    }
}

#[tokio::main]
async fn main() -> univrs_docstore::Result<()> {
    // Default to INFO level, can be overridden with RUST_LOG
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();

    let matches = build_cli().get_matches();
    let sqlite_path = matches.get_one::<PathBuf>("sqlite").cloned();
    let config = match matches.get_one::<PathBuf>("config") {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };

    let store: Arc<dyn DocumentStore> = match &sqlite_path {
        Some(path) => {
            Arc::new(SqliteStore::open(path).await?.with_watch_capacity(config.watch_capacity))
        }
        None => Arc::new(MemoryStore::with_watch_capacity(config.watch_capacity)),
    };
    let client = DocumentClient::with_config(store, config);
    info!(sqlite = ?sqlite_path, "document client ready");

    let listener = report("watch", sample::watch_san_francisco(&client).await);

    report("add user", sample::add_user(&client).await);
    report("list users", sample::list_users(&client).await);
    report("get SF", sample::get_san_francisco(&client).await);
    report("set LA", sample::set_los_angeles(&client).await);
    report("update LA", sample::update_los_angeles(&client).await);
    report("timestamp LA", sample::touch_los_angeles(&client).await);
    report("update frank", sample::update_frank(&client).await);

    report(
        "seed SF",
        client
            .set_document(
                sample::CITIES,
                "SF",
                &serde_json::json!({"name": "San Francisco", "population": 999_999}),
            )
            .await,
    );
    report("increment SF", sample::increment_population(&client, "SF").await);
    // Second increment hits the bound and aborts
    report("increment SF", sample::increment_population(&client, "SF").await);
    report("delete DC", sample::delete_washington(&client).await);

    // Give the listener a moment to drain before removing it
    tokio::time::sleep(Duration::from_millis(50)).await;
    if let Some(listener) = listener {
        listener.remove();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_store_options() {
        let matches = build_cli()
            .try_get_matches_from(["docstore-demo", "--sqlite", "docs.db", "--config", "c.json"])
            .unwrap();
        assert_eq!(
            matches.get_one::<PathBuf>("sqlite"),
            Some(&PathBuf::from("docs.db"))
        );
        assert_eq!(
            matches.get_one::<PathBuf>("config"),
            Some(&PathBuf::from("c.json"))
        );
    }

    #[test]
    fn test_cli_rejects_unknown_flag() {
        let result = build_cli().try_get_matches_from(["docstore-demo", "--sqlit", "docs.db"]);
        assert_eq!(
            result.unwrap_err().kind(),
            clap::error::ErrorKind::UnknownArgument
        );
    }

    #[test]
    fn test_cli_defaults_to_memory() {
        let matches = build_cli().try_get_matches_from(["docstore-demo"]).unwrap();
        assert!(matches.get_one::<PathBuf>("sqlite").is_none());
        build_cli().debug_assert();
    }
}
