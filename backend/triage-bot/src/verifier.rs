//! Runs the external proof verifier and parses what it reports.
//!
//! The verifier is invoked as `<bin> verify -r <rpc_url> <artifact>`. Exit
//! status 0 means the proof checked out and stdout carries a JSON state diff
//! keyed by account address; any other status is a rejection with a reason on
//! stderr.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::debug;

use crate::errors::{Result, TriageError};
use crate::project::Address;

/// File name the staged proof is written under.
const ARTIFACT_FILE_NAME: &str = "proof.zkp";

// ─────────────────────────────────────────────────────────
// Verifier output schema
// ─────────────────────────────────────────────────────────

/// Per-account entry of the verifier's state diff.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AccountRecord {
    #[serde(default)]
    pub balance: Option<Value>,
    #[serde(default)]
    pub storage: Option<BTreeMap<String, Value>>,
}

/// The verifier's state diff. Address keys are normalized while parsing.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct VerifierResult(BTreeMap<Address, Option<AccountRecord>>);

impl VerifierResult {
    pub fn parse(raw: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(raw)
    }

    pub fn contains(&self, addr: &Address) -> bool {
        self.0.contains_key(addr)
    }

    /// True when `addr` has an entry whose balance is present and truthy.
    pub fn has_balance(&self, addr: &Address) -> bool {
        self.0
            .get(addr)
            .and_then(Option::as_ref)
            .and_then(|record| record.balance.as_ref())
            .is_some_and(is_truthy)
    }

    /// True when `addr` has an entry whose storage map contains `slot`.
    pub fn touches_slot(&self, addr: &Address, slot: &str) -> bool {
        self.0
            .get(addr)
            .and_then(Option::as_ref)
            .and_then(|record| record.storage.as_ref())
            .is_some_and(|storage| storage.contains_key(slot))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// JSON truthiness: null, false, zero, and empty strings/collections are falsy.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

// ─────────────────────────────────────────────────────────
// Invocation
// ─────────────────────────────────────────────────────────

/// What the verifier concluded about a proof.
#[derive(Debug, Clone, PartialEq)]
pub enum VerifierOutcome {
    Accepted(VerifierResult),
    /// Nonzero exit; carries the captured stderr.
    Rejected { stderr: String },
}

#[async_trait]
pub trait Verify: Send + Sync {
    async fn verify(&self, artifact: &Path) -> Result<VerifierOutcome>;
}

/// Runs the verifier binary as a child process.
#[derive(Debug, Clone)]
pub struct VerifierCommand {
    pub bin: PathBuf,
    pub rpc_url: String,
    pub timeout: Duration,
}

#[async_trait]
impl Verify for VerifierCommand {
    async fn verify(&self, artifact: &Path) -> Result<VerifierOutcome> {
        let child = Command::new(&self.bin)
            .arg("verify")
            .arg("-r")
            .arg(&self.rpc_url)
            .arg(artifact)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(TriageError::VerifierSpawn)?;

        // Dropping the pending future drops the child, which kills it.
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| TriageError::VerifierTimeout(self.timeout.as_secs()))??;

        debug!(
            "Verifier exited with {} ({} bytes stdout)",
            output.status,
            output.stdout.len()
        );

        if !output.status.success() {
            return Ok(VerifierOutcome::Rejected {
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        VerifierResult::parse(&output.stdout)
            .map(VerifierOutcome::Accepted)
            .map_err(TriageError::VerifierOutputIntegrity)
    }
}

/// A submitted proof staged on disk for the verifier.
///
/// The backing directory is removed when the artifact is dropped, whatever
/// the verification outcome was.
#[derive(Debug)]
pub struct ProofArtifact {
    _dir: TempDir,
    path: PathBuf,
}

impl ProofArtifact {
    pub async fn stage(bytes: &[u8]) -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("odesec-").tempdir()?;
        let path = dir.path().join(ARTIFACT_FILE_NAME);
        tokio::fs::write(&path, bytes).await?;
        Ok(Self { _dir: dir, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
