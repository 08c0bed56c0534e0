//! Message handlers: proof submission, impact triage, and the incident
//! description follow-up.

use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::cache::ProjectCache;
use crate::conversation::{ConversationStore, Phase};
use crate::dispatcher::EventHandler;
use crate::errors::{Result, TriageError};
use crate::impact::{self, ImpactDecision, ProfitabilityConfig};
use crate::project::Project;
use crate::telegram::{
    escape_markdown_v2, quote_markdown_v2, ChatId, ChatTransport, Inbound, InboundEvent, ParseMode,
};
use crate::verifier::{ProofArtifact, VerifierOutcome, Verify};

/// Required extension of submitted proof files.
pub const PROOF_EXTENSION: &str = ".zkp";

const WELCOME_MESSAGE: &str = "Welcome to ODESEC bot!

You can send me a proof file and I will verify it for you.

Your contact info is: {contact}";

const MSG_WRONG_EXTENSION: &str = "Only .zkp files are allowed";
const MSG_MISSING_CAPTION: &str = "Please send me a caption with contact info";
const MSG_PROJECT_NOT_FOUND: &str = "Project not found";
const MSG_CONTACT_UNREACHABLE: &str = "Project contact is not reachable";
const MSG_DOWNLOADING: &str = "<i>Download your proof...</i>";
const MSG_DOWNLOAD_FAILED: &str = "<i>Failed to download your proof.</i>";
const MSG_VERIFYING: &str = "<i>Verifying your proof...</i>";
const MSG_VALID: &str = "<i>Proof is valid!</i>";
const MSG_INVALID: &str = "<i>Proof is invalid!</i>";
const MSG_INTERNAL: &str =
    "<i>Proof could not be checked due to an internal error. Please try again later.</i>";
const MSG_ASK_DESCRIPTION: &str = "Please make a short description of the emergency.";
const MSG_THANKS: &str =
    "Thank you for your submission! The project team will contact you as soon as possible.";

pub struct Triage<T, V> {
    pub transport: T,
    pub verifier: V,
    pub cache: ProjectCache,
    pub conversations: ConversationStore,
    pub profitability: ProfitabilityConfig,
    pub bot_id: String,
}

impl<T: ChatTransport, V: Verify> Triage<T, V> {
    /// Entry point for one inbound event.
    pub async fn handle(&self, inbound: Inbound) -> Result<()> {
        match &inbound.event {
            InboundEvent::Command { name, text } => {
                self.handle_command(&inbound, name, text).await
            }
            InboundEvent::Document {
                file_id,
                file_name,
                caption,
            } => {
                self.handle_document(
                    &inbound,
                    file_id,
                    file_name.as_deref(),
                    caption.as_deref(),
                )
                .await
            }
            InboundEvent::Text(text) => self.handle_text(&inbound, text).await,
        }
    }

    async fn handle_command(&self, inbound: &Inbound, name: &str, text: &str) -> Result<()> {
        match name {
            "start" | "help" => {
                let contact = format!("tg:{}/{}", self.bot_id, inbound.key.chat_id);
                let text = WELCOME_MESSAGE.replace("{contact}", &contact);
                self.transport
                    .reply_to(&inbound.chat(), inbound.message_id, &text)
                    .await
            }
            // A pending description may itself start with `/`, e.g. `/withdraw()`.
            _ if self.conversations.phase(inbound.key) == Phase::AwaitingDescription => {
                self.handle_text(inbound, text).await
            }
            other => {
                debug!("Ignoring unknown command /{other}");
                Ok(())
            }
        }
    }

    /// Check a submitted document against the submission rules, returning
    /// the targeted project or the message to reply with.
    fn check_submission(
        &self,
        file_name: Option<&str>,
        caption: Option<&str>,
    ) -> std::result::Result<Project, &'static str> {
        if !file_name.is_some_and(|name| name.ends_with(PROOF_EXTENSION)) {
            return Err(MSG_WRONG_EXTENSION);
        }
        let caption = caption.map(str::trim).unwrap_or_default();
        if caption.is_empty() {
            return Err(MSG_MISSING_CAPTION);
        }
        let project = self
            .cache
            .find_by_contact(caption)
            .ok_or(MSG_PROJECT_NOT_FOUND)?;
        if project.contact_chat_id().is_none() {
            return Err(MSG_CONTACT_UNREACHABLE);
        }
        Ok(project)
    }

    async fn handle_document(
        &self,
        inbound: &Inbound,
        file_id: &str,
        file_name: Option<&str>,
        caption: Option<&str>,
    ) -> Result<()> {
        let chat = inbound.chat();
        let project = match self.check_submission(file_name, caption) {
            Ok(project) => project,
            Err(reply) => {
                return self
                    .transport
                    .reply_to(&chat, inbound.message_id, reply)
                    .await;
            }
        };

        let status = self
            .transport
            .send_message(&chat, MSG_DOWNLOADING, Some(ParseMode::Html))
            .await?;

        let artifact = match self.fetch_artifact(file_id).await {
            Ok(artifact) => artifact,
            Err(e) => {
                self.transport
                    .edit_message(&chat, status, MSG_DOWNLOAD_FAILED, Some(ParseMode::Html))
                    .await?;
                return Err(e);
            }
        };

        self.transport
            .edit_message(&chat, status, MSG_VERIFYING, Some(ParseMode::Html))
            .await?;
        info!(
            "Received a new proof from user {}, name: {}, project: {}",
            inbound.username.as_deref().unwrap_or("<unknown>"),
            file_name.unwrap_or_default(),
            project.domain
        );

        let decision = match self.triage_proof(&project, artifact.path()).await {
            Ok(decision) => decision,
            Err(e) => {
                error!(
                    "Verification pipeline fault for project {}: {e}",
                    project.domain
                );
                return self
                    .transport
                    .edit_message(&chat, status, MSG_INTERNAL, Some(ParseMode::Html))
                    .await;
            }
        };
        drop(artifact);

        if !decision.accepted {
            info!(
                "Proof for {} rejected: {}",
                project.domain,
                decision.reason.as_str()
            );
            return self
                .transport
                .edit_message(&chat, status, MSG_INVALID, Some(ParseMode::Html))
                .await;
        }

        let domain = project.domain.clone();
        if let Some(previous) = self.conversations.begin_description(inbound.key, project) {
            warn!(
                "User {} replaced pending submission for {} with one for {domain}",
                inbound.key.user_id, previous.domain
            );
        }
        debug!(
            "{} conversations awaiting a description",
            self.conversations.active()
        );

        if let Err(e) = self
            .transport
            .edit_message(&chat, status, MSG_VALID, Some(ParseMode::Html))
            .await
        {
            warn!("Failed to update status message for {domain}: {e}");
        }

        self.transport
            .send_message(&chat, MSG_ASK_DESCRIPTION, None)
            .await?;
        Ok(())
    }

    async fn fetch_artifact(&self, file_id: &str) -> Result<ProofArtifact> {
        let bytes = self.transport.download_file(file_id).await?;
        ProofArtifact::stage(&bytes).await
    }

    /// Run the verifier on a staged proof and judge its impact on `project`.
    ///
    /// Errors are pipeline faults (broken verifier output, timeout), never
    /// ordinary rejections.
    pub async fn triage_proof(&self, project: &Project, artifact: &Path) -> Result<ImpactDecision> {
        let outcome = match self.verifier.verify(artifact).await {
            Ok(outcome) => outcome,
            Err(TriageError::VerifierSpawn(e)) => {
                warn!("Verifier could not be started: {e}");
                VerifierOutcome::Rejected {
                    stderr: e.to_string(),
                }
            }
            Err(e) => return Err(e),
        };

        let decision = match &outcome {
            VerifierOutcome::Accepted(result) => {
                debug!("Verifier touched {} accounts", result.len());
                impact::evaluate(Some(result), true, project, &self.profitability)
            }
            VerifierOutcome::Rejected { stderr } => {
                info!("zkp is invalid: {stderr}");
                impact::evaluate(None, false, project, &self.profitability)
            }
        };
        Ok(decision)
    }

    async fn handle_text(&self, inbound: &Inbound, text: &str) -> Result<()> {
        let Some(project) = self.conversations.take_pending(inbound.key) else {
            debug!(
                "Message from {} in chat {}: {text}",
                inbound.username.as_deref().unwrap_or("<unknown>"),
                inbound.key.chat_id
            );
            return Ok(());
        };

        if let Err(e) = self.forward_report(inbound, &project, text).await {
            warn!(
                "Failed to forward incident report to {}: {e}",
                project.domain
            );
        }

        self.transport
            .send_message(&inbound.chat(), MSG_THANKS, None)
            .await?;
        Ok(())
    }

    async fn forward_report(&self, inbound: &Inbound, project: &Project, text: &str) -> Result<()> {
        let chat_id = project.contact_chat_id().ok_or_else(|| {
            TriageError::Telegram(format!("contact {:?} has no chat id", project.contact))
        })?;
        let report = format_incident_report(inbound, text);
        self.transport
            .send_message(&ChatId::parse(chat_id), &report, Some(ParseMode::MarkdownV2))
            .await?;
        info!("Forwarded incident report to {}", project.domain);
        Ok(())
    }
}

#[async_trait]
impl<T: ChatTransport, V: Verify> EventHandler for Triage<T, V> {
    async fn handle(&self, inbound: Inbound) -> Result<()> {
        Triage::handle(self, inbound).await
    }
}

fn format_incident_report(inbound: &Inbound, text: &str) -> String {
    let reporter = match &inbound.username {
        Some(name) => format!("@{name}"),
        None => format!("user {}", inbound.key.user_id),
    };
    format!(
        "{}\n{}",
        escape_markdown_v2(&format!("New emergency from {reporter},")),
        quote_markdown_v2(text)
    )
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
