//! crates/revision_core/src/chat.rs
//!
//! The conversation-scoped teacher chat: the same metering, gateway and
//! failure contract as grading, with a different prompt shape and a
//! synchronous caller. Chat messages are capped per UTC day rather than
//! priced against the credit balance.

const TEACHER_PERSONA: &str = r#"You are a patient subject teacher helping a student revise for an exam.

- Answer the student's question directly, then briefly point out what they should revise next.
- Keep answers short enough to read between practice questions: a few sentences, not an essay.
- If the student asks for the answer to a live practice question, guide them with a hint instead of giving the answer away."#;

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::domain::MeteredAction;
use crate::error::PracticeError;
use crate::ledger::UsageLedger;
use crate::ports::{ChatMessage, CompletionRequest, CompletionService};

/// Gateway call settings for chat turns.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 800,
        }
    }
}

pub struct ChatOrchestrator {
    gateway: Arc<dyn CompletionService>,
    ledger: UsageLedger,
    settings: ChatSettings,
}

impl ChatOrchestrator {
    pub fn new(
        gateway: Arc<dyn CompletionService>,
        ledger: UsageLedger,
        settings: ChatSettings,
    ) -> Self {
        Self {
            gateway,
            ledger,
            settings,
        }
    }

    /// Answers one chat turn. The daily allowance is checked before the
    /// gateway is called; a denied turn costs nothing and never reaches the
    /// gateway. The usage record is appended only after a successful reply.
    pub async fn send_message(
        &self,
        user_id: Uuid,
        session_id: Option<Uuid>,
        history: &[ChatMessage],
        message: &str,
    ) -> Result<String, PracticeError> {
        if message.trim().is_empty() {
            return Err(PracticeError::Validation {
                field: "message",
                reason: "must not be empty".to_string(),
            });
        }

        self.ledger
            .check_daily_allowance(user_id, MeteredAction::ChatMessage)
            .await?;

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(TEACHER_PERSONA));
        messages.extend(history.iter().cloned());
        messages.push(ChatMessage::user(message));

        let completion = self
            .gateway
            .complete(CompletionRequest {
                messages,
                temperature: self.settings.temperature,
                max_tokens: self.settings.max_tokens,
            })
            .await
            .map_err(|e| PracticeError::GatewayFailure(e.to_string()))?;

        self.ledger
            .record(user_id, MeteredAction::ChatMessage, session_id)
            .await?;
        info!(%user_id, tokens = completion.total_tokens, "Chat turn answered.");

        Ok(completion.content)
    }
}
