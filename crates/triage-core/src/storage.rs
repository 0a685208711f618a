use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::TriageError;
use crate::types::{
    Account, Actor, AgentTrace, Alert, AlertStatus, Card, CardStatus, Case, CaseEvent, CaseType,
    Customer, KbDoc, Transaction, TriageRun,
};

/// A page of transactions returned by a keyset-paginated read.
#[derive(Debug, Clone)]
pub struct TransactionPage {
    pub items: Vec<Transaction>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

/// Request shape for a keyset-paginated transaction read.
#[derive(Debug, Clone, Default)]
pub struct TransactionQuery {
    pub cursor: Option<String>,
    pub limit: u32,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Outcome of `apply_dispute`: either the dispute `Case` was freshly opened, or
/// an open/investigating dispute already existed for the transaction and the
/// attempted insert was rejected in favor of it.
#[derive(Debug, Clone)]
pub enum DisputeOutcome {
    Opened,
    AlreadyExists(Case),
}

/// Typed reads/writes over the relational store. Implemented by a Postgres-backed
/// adapter (via `sqlx`) and an in-memory test double in `triage-adapters`; the
/// orchestrator and action handlers depend only on this contract.
///
/// Mutation discipline: the orchestrator writes `TriageRun`/`AgentTrace` only;
/// action handlers write `Card`/`Alert`/`Case`/`CaseEvent` only. No implementation
/// is expected to enforce this split — it is a caller-side invariant documented
/// here because it shapes which methods exist on this trait.
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    async fn get_customer(&self, customer_id: Uuid) -> Result<Customer, TriageError>;

    async fn list_open_alerts(&self, limit: u32) -> Result<Vec<(Alert, Customer)>, TriageError>;
    async fn get_alert(&self, alert_id: Uuid) -> Result<Alert, TriageError>;
    async fn set_alert_status(
        &self,
        alert_id: Uuid,
        status: AlertStatus,
    ) -> Result<(), TriageError>;

    async fn list_cards_for_customer(&self, customer_id: Uuid) -> Result<Vec<Card>, TriageError>;
    async fn get_card(&self, card_id: Uuid) -> Result<Card, TriageError>;
    async fn set_card_status(&self, card_id: Uuid, status: CardStatus) -> Result<(), TriageError>;

    async fn list_accounts_for_customer(
        &self,
        customer_id: Uuid,
    ) -> Result<Vec<Account>, TriageError>;
    async fn primary_account_balance_minor(
        &self,
        customer_id: Uuid,
    ) -> Result<i64, TriageError>;

    async fn get_transaction(&self, transaction_id: Uuid) -> Result<Transaction, TriageError>;
    async fn recent_transactions(
        &self,
        customer_id: Uuid,
        limit: u32,
    ) -> Result<Vec<Transaction>, TriageError>;
    async fn paginate_transactions(
        &self,
        customer_id: Uuid,
        query: TransactionQuery,
    ) -> Result<TransactionPage, TriageError>;
    async fn insert_transactions(
        &self,
        transactions: Vec<Transaction>,
    ) -> Result<(), TriageError>;

    async fn list_kb_docs(&self, limit: u32) -> Result<Vec<KbDoc>, TriageError>;

    async fn insert_triage_run(
        &self,
        run: TriageRun,
        traces: Vec<AgentTrace>,
    ) -> Result<(), TriageError>;

    async fn find_open_dispute_for_transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<Case>, TriageError>;
    async fn insert_case(&self, case: Case) -> Result<(), TriageError>;

    async fn append_case_event(&self, event: CaseEvent) -> Result<(), TriageError>;
    async fn list_case_events(&self, case_id: Uuid) -> Result<Vec<CaseEvent>, TriageError>;

    /// Freezes a card and records its `card_frozen` case and ledger event as a
    /// single transactional unit. Fails as a whole if the card does not exist;
    /// never leaves a frozen card without its completing case/event.
    async fn apply_card_freeze(
        &self,
        card_id: Uuid,
        case: Case,
        event: CaseEvent,
    ) -> Result<(), TriageError>;

    /// Opens a dispute case and its `dispute_opened` event as a single
    /// transactional unit. If an open/investigating dispute already exists for
    /// the case's transaction, the attempt is rejected in favor of it rather
    /// than racing a separate check-then-insert.
    async fn apply_dispute(
        &self,
        case: Case,
        event: CaseEvent,
    ) -> Result<DisputeOutcome, TriageError>;

    /// Marks an alert a false positive and records its case and ledger event
    /// as a single transactional unit.
    async fn apply_false_positive(
        &self,
        alert_id: Uuid,
        case: Case,
        event: CaseEvent,
    ) -> Result<(), TriageError>;

    /// Create any tables/indexes the adapter needs, if they do not already exist.
    /// A no-op for adapters with no schema to own (e.g. the in-memory double).
    async fn ensure_schema(&self) -> Result<(), TriageError>;
}

/// Convenience constructor for a fresh `Actor::Operator` from an API-key principal,
/// kept here because every action handler needs it when appending a `CaseEvent`.
pub fn operator_actor(principal: impl Into<String>) -> Actor {
    Actor::Operator(principal.into())
}

pub fn dispute_case(
    customer_id: Uuid,
    transaction_id: Uuid,
    reason_code: impl Into<String>,
) -> Case {
    Case {
        id: Uuid::new_v4(),
        customer_id,
        transaction_id: Some(transaction_id),
        case_type: CaseType::Dispute,
        status: crate::types::CaseStatus::Open,
        reason_code: reason_code.into(),
        created_at: Utc::now(),
    }
}

pub fn card_freeze_case(customer_id: Uuid, reason_code: impl Into<String>) -> Case {
    Case {
        id: Uuid::new_v4(),
        customer_id,
        transaction_id: None,
        case_type: CaseType::CardFreeze,
        status: crate::types::CaseStatus::Completed,
        reason_code: reason_code.into(),
        created_at: Utc::now(),
    }
}

pub fn false_positive_case(customer_id: Uuid, reason_code: impl Into<String>) -> Case {
    Case {
        id: Uuid::new_v4(),
        customer_id,
        transaction_id: None,
        case_type: CaseType::FalsePositive,
        status: crate::types::CaseStatus::Closed,
        reason_code: reason_code.into(),
        created_at: Utc::now(),
    }
}
