//! Application configuration loaded from environment variables.

use std::path::PathBuf;

use crate::errors::{Result, TriageError};
use crate::project::{Address, FamousSlotRule};

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the proof verifier binary
    pub verifier_bin: PathBuf,
    /// Full-node JSON-RPC endpoint, shared by the verifier and the registry client
    pub rpc_url: String,
    /// Telegram bot token
    pub bot_token: String,
    /// Telegram Bot API base URL
    pub telegram_api_url: String,
    /// Address of the project registry contract
    pub registry_address: Address,
    /// Attacker account whose balance signals a profitable exploit
    pub default_poc_address: Address,
    /// Well-known (token, balance slot) pairs checked for profitability
    pub famous_balance_slots: Vec<FamousSlotRule>,
    /// Bot username, used to build contact strings (`tg:<bot_id>/<chat_id>`)
    pub bot_id: String,
    /// How often (in seconds) to pull new projects from the registry
    pub sync_interval_secs: u64,
    /// Hard limit on a single verifier run
    pub verifier_timeout_secs: u64,
    /// Long-poll timeout for `getUpdates`
    pub poll_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            verifier_bin: env_var("VERIFIER_BIN")
                .map_err(|_| {
                    TriageError::Config("VERIFIER_BIN environment variable is required".to_string())
                })?
                .into(),
            rpc_url: env_var("RPC_URL").unwrap_or_else(|_| "http://127.0.0.1:8545".to_string()),
            bot_token: env_var("BOT_TOKEN").map_err(|_| {
                TriageError::Config("BOT_TOKEN environment variable is required".to_string())
            })?,
            telegram_api_url: env_var("TELEGRAM_API_URL")
                .unwrap_or_else(|_| "https://api.telegram.org".to_string()),
            registry_address: env_var("REGISTRY_CONTRACT_ADDRESS")
                .map_err(|_| {
                    TriageError::Config(
                        "REGISTRY_CONTRACT_ADDRESS environment variable is required".to_string(),
                    )
                })?
                .into(),
            default_poc_address: env_var("DEFAULT_POC_ADDRESS")
                .map_err(|_| {
                    TriageError::Config(
                        "DEFAULT_POC_ADDRESS environment variable is required".to_string(),
                    )
                })?
                .into(),
            famous_balance_slots: parse_slot_rules(
                &env_var("FAMOUS_BALANCE_SLOTS").unwrap_or_default(),
            )?,
            bot_id: env_var("BOT_ID").unwrap_or_else(|_| "odesec_bot".to_string()),
            sync_interval_secs: env_var("SYNC_INTERVAL_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| TriageError::Config("Invalid SYNC_INTERVAL_SECS".to_string()))?,
            verifier_timeout_secs: env_var("VERIFIER_TIMEOUT_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .map_err(|_| TriageError::Config("Invalid VERIFIER_TIMEOUT_SECS".to_string()))?,
            poll_timeout_secs: env_var("POLL_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| TriageError::Config("Invalid POLL_TIMEOUT_SECS".to_string()))?,
        })
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| TriageError::Config(format!("Missing env var: {key}")))
}

/// Parse `token:slot,token:slot` into ordered rules. Blank input yields no rules.
pub fn parse_slot_rules(raw: &str) -> Result<Vec<FamousSlotRule>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (token, slot) = entry.split_once(':').ok_or_else(|| {
                TriageError::Config(format!("Invalid FAMOUS_BALANCE_SLOTS entry: {entry}"))
            })?;
            let (token, slot) = (token.trim(), slot.trim());
            if token.is_empty() || slot.is_empty() {
                return Err(TriageError::Config(format!(
                    "Invalid FAMOUS_BALANCE_SLOTS entry: {entry}"
                )));
            }
            Ok(FamousSlotRule {
                token: token.into(),
                slot: slot.to_string(),
            })
        })
        .collect()
}
