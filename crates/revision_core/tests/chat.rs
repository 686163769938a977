//! Teacher-chat scenarios: the allowance gate and the usage-record trail.

mod common;

use std::sync::Arc;

use uuid::Uuid;

use common::{InMemoryRepository, ScriptedGateway};
use revision_core::chat::{ChatOrchestrator, ChatSettings};
use revision_core::domain::{MeteredAction, UsageRecord};
use revision_core::error::PracticeError;
use revision_core::ledger::{CreditPolicy, UsageLedger};
use revision_core::ports::ChatMessage;

fn orchestrator(
    repo: Arc<InMemoryRepository>,
    gateway: Arc<ScriptedGateway>,
    policy: CreditPolicy,
) -> ChatOrchestrator {
    ChatOrchestrator::new(
        gateway,
        UsageLedger::new(repo, policy),
        ChatSettings::default(),
    )
}

#[tokio::test]
async fn answered_turn_appends_a_usage_record() {
    let repo = Arc::new(InMemoryRepository::new());
    let gateway = Arc::new(ScriptedGateway::new());
    gateway.push_reply("Mitosis has four stages: prophase, metaphase, anaphase and telophase.");
    let chat = orchestrator(repo.clone(), gateway.clone(), CreditPolicy::default());
    let user = Uuid::new_v4();

    let reply = chat
        .send_message(user, None, &[], "What are the stages of mitosis?")
        .await
        .unwrap();
    assert!(reply.contains("prophase"));
    assert_eq!(repo.usage_len(), 1);
}

#[tokio::test]
async fn conversation_history_is_forwarded_in_order() {
    let repo = Arc::new(InMemoryRepository::new());
    let gateway = Arc::new(ScriptedGateway::new());
    gateway.push_reply("As I said, osmosis needs a gradient.");
    let chat = orchestrator(repo.clone(), gateway.clone(), CreditPolicy::default());

    let history = vec![
        ChatMessage::user("What is osmosis?"),
        ChatMessage::assistant("Movement of water across a membrane."),
    ];
    chat.send_message(Uuid::new_v4(), None, &history, "Why does it need a gradient?")
        .await
        .unwrap();
    assert_eq!(gateway.call_count(), 1);
}

#[tokio::test]
async fn daily_cap_blocks_before_the_gateway() {
    let repo = Arc::new(InMemoryRepository::new());
    let gateway = Arc::new(ScriptedGateway::new());
    gateway.push_reply("unused");
    let policy = CreditPolicy {
        chat_cost: 1,
        chat_daily_cap: 2,
        ..CreditPolicy::default()
    };
    let chat = orchestrator(repo.clone(), gateway.clone(), policy);
    let user = Uuid::new_v4();

    for _ in 0..2 {
        repo.push_usage(UsageRecord::new(user, MeteredAction::ChatMessage, 1, None));
    }

    let err = chat
        .send_message(user, None, &[], "One more question?")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PracticeError::QuotaExceeded(MeteredAction::ChatMessage)
    ));
    assert_eq!(gateway.call_count(), 0);
    assert_eq!(repo.usage_len(), 2);
}

#[tokio::test]
async fn gateway_failure_records_no_usage() {
    let repo = Arc::new(InMemoryRepository::new());
    let gateway = Arc::new(ScriptedGateway::new());
    gateway.push_failure("upstream timeout");
    let chat = orchestrator(repo.clone(), gateway, CreditPolicy::default());

    let err = chat
        .send_message(Uuid::new_v4(), None, &[], "Hello?")
        .await
        .unwrap_err();
    assert!(matches!(err, PracticeError::GatewayFailure(_)));
    assert_eq!(repo.usage_len(), 0);
}

#[tokio::test]
async fn blank_messages_are_rejected() {
    let repo = Arc::new(InMemoryRepository::new());
    let gateway = Arc::new(ScriptedGateway::new());
    let chat = orchestrator(repo, gateway.clone(), CreditPolicy::default());

    let err = chat
        .send_message(Uuid::new_v4(), None, &[], "   ")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PracticeError::Validation { field: "message", .. }
    ));
    assert_eq!(gateway.call_count(), 0);
}
