//! ODESEC triage bot entry point.
//!
//! Long-polls Telegram for proof submissions, runs each proof through the
//! external verifier and the impact heuristics, and routes accepted reports
//! to the project's contact chat. A background task keeps the local project
//! cache in step with the on-chain registry.

mod cache;
mod config;
mod conversation;
mod dispatcher;
mod errors;
mod impact;
mod project;
mod registry;
mod sync;
mod telegram;
mod triage;
mod verifier;

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cache::ProjectCache;
use config::Config;
use conversation::ConversationStore;
use impact::ProfitabilityConfig;
use registry::EthRegistry;
use telegram::{TelegramClient, TelegramInbox};
use triage::Triage;
use verifier::VerifierCommand;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    // Telegram long polls set their own per-request timeout.
    let client = Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;

    let telegram = Arc::new(TelegramClient::new(
        client,
        &config.telegram_api_url,
        &config.bot_token,
    ));
    let registry = EthRegistry::connect(&config.rpc_url, &config.registry_address)?;
    let cache = ProjectCache::new();

    let triage = Arc::new(Triage {
        transport: telegram.clone(),
        verifier: VerifierCommand {
            bin: config.verifier_bin.clone(),
            rpc_url: config.rpc_url.clone(),
            timeout: Duration::from_secs(config.verifier_timeout_secs),
        },
        cache: cache.clone(),
        conversations: ConversationStore::new(),
        profitability: ProfitabilityConfig {
            default_poc_address: config.default_poc_address.clone(),
            famous_balance_slots: config.famous_balance_slots.clone(),
        },
        bot_id: config.bot_id.clone(),
    });

    info!(
        "Triage bot starting — registry: {}, verifier: {}",
        config.registry_address,
        config.verifier_bin.display()
    );

    dispatcher::run(
        TelegramInbox::new(telegram, config.poll_timeout_secs),
        triage,
        registry,
        cache,
        config.sync_interval_secs,
    )
    .await;

    Ok(())
}
