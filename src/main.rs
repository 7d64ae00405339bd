mod agent;
mod airtable;
mod config;
mod error;
mod pending;
mod prompt;
mod providers;
mod schema;
mod server;
mod store;
mod tools;
mod traits;
mod types;

#[cfg(test)]
mod integration_tests;
#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use crate::airtable::AirtableClient;
use crate::config::AppConfig;
use crate::pending::PendingMessages;
use crate::providers::OpenAiCompatibleProvider;
use crate::schema::{SchemaCache, SchemaFetcher};
use crate::server::AppState;
use crate::store::SqliteChatStore;

fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 {
        match args[1].as_str() {
            "--version" | "-V" => {
                println!("basechat {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" => {
                println!("basechat {}", env!("CARGO_PKG_VERSION"));
                println!("{}\n", env!("CARGO_PKG_DESCRIPTION"));
                println!("Usage: basechat [OPTIONS]\n");
                println!("Options:");
                println!("  -h, --help       Print help");
                println!("  -V, --version    Print version");
                println!("\nConfiguration is read from basechat.toml; secrets can also");
                println!("come from AIRTABLE_API_KEY, AIRTABLE_BASE_ID and OPENAI_API_KEY.");
                return Ok(());
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                std::process::exit(1);
            }
        }
    }

    let config = AppConfig::load(&PathBuf::from("basechat.toml"))?;

    if config.airtable.api_key.is_empty() || config.airtable.base_id.is_empty() {
        anyhow::bail!(
            "Airtable credentials missing: set airtable.api_key and airtable.base_id \
             in basechat.toml, or AIRTABLE_API_KEY / AIRTABLE_BASE_ID in the environment"
        );
    }
    if config.provider.api_key.is_empty() {
        anyhow::bail!(
            "Model provider key missing: set provider.api_key in basechat.toml \
             or OPENAI_API_KEY in the environment"
        );
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(config))
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    if config.auth.tokens.is_empty() {
        tracing::warn!("No auth tokens configured; every API request will be rejected");
    }

    let client = Arc::new(AirtableClient::new(&config.airtable)?);
    let schema_cache = Arc::new(SchemaCache::new(
        client.clone() as Arc<dyn SchemaFetcher>,
        Duration::from_secs(config.chat.schema_ttl_secs),
    ));
    let store = Arc::new(SqliteChatStore::new(&config.state.db_path).await?);
    let provider = Arc::new(OpenAiCompatibleProvider::new(
        &config.provider.base_url,
        &config.provider.api_key,
    )?);
    let tools = tools::build_registry(client);

    let state = Arc::new(AppState {
        config,
        store,
        provider,
        schema_cache,
        tools,
        pending: PendingMessages::new(),
    });

    server::serve(state).await
}
