use async_trait::async_trait;
use uuid::Uuid;

use triage_core::{
    Account, AgentTrace, Alert, AlertStatus, Card, CardStatus, Case, CaseEvent, CoordinationStore,
    Customer, DisputeOutcome, KbDoc, PersistenceAdapter, Transaction, TransactionPage,
    TransactionQuery, TriageError, TriageRun,
};

use crate::memory::{InMemoryCoordinationStore, InMemoryPersistenceAdapter};
use crate::postgres::PostgresPersistenceAdapter;
use crate::redis_store::RedisCoordinationStore;

/// Relational store backend selected at startup. One running instance picks a
/// single variant; the enum exists so `triage-service` can depend on one
/// concrete type instead of threading a generic parameter through every
/// handler and router builder.
pub enum PersistenceBackend {
    Memory(InMemoryPersistenceAdapter),
    Postgres(PostgresPersistenceAdapter),
}

#[async_trait]
impl PersistenceAdapter for PersistenceBackend {
    async fn get_customer(&self, customer_id: Uuid) -> Result<Customer, TriageError> {
        match self {
            Self::Memory(a) => a.get_customer(customer_id).await,
            Self::Postgres(a) => a.get_customer(customer_id).await,
        }
    }

    async fn list_open_alerts(&self, limit: u32) -> Result<Vec<(Alert, Customer)>, TriageError> {
        match self {
            Self::Memory(a) => a.list_open_alerts(limit).await,
            Self::Postgres(a) => a.list_open_alerts(limit).await,
        }
    }

    async fn get_alert(&self, alert_id: Uuid) -> Result<Alert, TriageError> {
        match self {
            Self::Memory(a) => a.get_alert(alert_id).await,
            Self::Postgres(a) => a.get_alert(alert_id).await,
        }
    }

    async fn set_alert_status(
        &self,
        alert_id: Uuid,
        status: AlertStatus,
    ) -> Result<(), TriageError> {
        match self {
            Self::Memory(a) => a.set_alert_status(alert_id, status).await,
            Self::Postgres(a) => a.set_alert_status(alert_id, status).await,
        }
    }

    async fn list_cards_for_customer(&self, customer_id: Uuid) -> Result<Vec<Card>, TriageError> {
        match self {
            Self::Memory(a) => a.list_cards_for_customer(customer_id).await,
            Self::Postgres(a) => a.list_cards_for_customer(customer_id).await,
        }
    }

    async fn get_card(&self, card_id: Uuid) -> Result<Card, TriageError> {
        match self {
            Self::Memory(a) => a.get_card(card_id).await,
            Self::Postgres(a) => a.get_card(card_id).await,
        }
    }

    async fn set_card_status(&self, card_id: Uuid, status: CardStatus) -> Result<(), TriageError> {
        match self {
            Self::Memory(a) => a.set_card_status(card_id, status).await,
            Self::Postgres(a) => a.set_card_status(card_id, status).await,
        }
    }

    async fn list_accounts_for_customer(
        &self,
        customer_id: Uuid,
    ) -> Result<Vec<Account>, TriageError> {
        match self {
            Self::Memory(a) => a.list_accounts_for_customer(customer_id).await,
            Self::Postgres(a) => a.list_accounts_for_customer(customer_id).await,
        }
    }

    async fn primary_account_balance_minor(&self, customer_id: Uuid) -> Result<i64, TriageError> {
        match self {
            Self::Memory(a) => a.primary_account_balance_minor(customer_id).await,
            Self::Postgres(a) => a.primary_account_balance_minor(customer_id).await,
        }
    }

    async fn get_transaction(&self, transaction_id: Uuid) -> Result<Transaction, TriageError> {
        match self {
            Self::Memory(a) => a.get_transaction(transaction_id).await,
            Self::Postgres(a) => a.get_transaction(transaction_id).await,
        }
    }

    async fn recent_transactions(
        &self,
        customer_id: Uuid,
        limit: u32,
    ) -> Result<Vec<Transaction>, TriageError> {
        match self {
            Self::Memory(a) => a.recent_transactions(customer_id, limit).await,
            Self::Postgres(a) => a.recent_transactions(customer_id, limit).await,
        }
    }

    async fn paginate_transactions(
        &self,
        customer_id: Uuid,
        query: TransactionQuery,
    ) -> Result<TransactionPage, TriageError> {
        match self {
            Self::Memory(a) => a.paginate_transactions(customer_id, query).await,
            Self::Postgres(a) => a.paginate_transactions(customer_id, query).await,
        }
    }

    async fn insert_transactions(
        &self,
        transactions: Vec<Transaction>,
    ) -> Result<(), TriageError> {
        match self {
            Self::Memory(a) => a.insert_transactions(transactions).await,
            Self::Postgres(a) => a.insert_transactions(transactions).await,
        }
    }

    async fn list_kb_docs(&self, limit: u32) -> Result<Vec<KbDoc>, TriageError> {
        match self {
            Self::Memory(a) => a.list_kb_docs(limit).await,
            Self::Postgres(a) => a.list_kb_docs(limit).await,
        }
    }

    async fn insert_triage_run(
        &self,
        run: TriageRun,
        traces: Vec<AgentTrace>,
    ) -> Result<(), TriageError> {
        match self {
            Self::Memory(a) => a.insert_triage_run(run, traces).await,
            Self::Postgres(a) => a.insert_triage_run(run, traces).await,
        }
    }

    async fn find_open_dispute_for_transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<Case>, TriageError> {
        match self {
            Self::Memory(a) => a.find_open_dispute_for_transaction(transaction_id).await,
            Self::Postgres(a) => a.find_open_dispute_for_transaction(transaction_id).await,
        }
    }

    async fn insert_case(&self, case: Case) -> Result<(), TriageError> {
        match self {
            Self::Memory(a) => a.insert_case(case).await,
            Self::Postgres(a) => a.insert_case(case).await,
        }
    }

    async fn append_case_event(&self, event: CaseEvent) -> Result<(), TriageError> {
        match self {
            Self::Memory(a) => a.append_case_event(event).await,
            Self::Postgres(a) => a.append_case_event(event).await,
        }
    }

    async fn list_case_events(&self, case_id: Uuid) -> Result<Vec<CaseEvent>, TriageError> {
        match self {
            Self::Memory(a) => a.list_case_events(case_id).await,
            Self::Postgres(a) => a.list_case_events(case_id).await,
        }
    }

    async fn apply_card_freeze(
        &self,
        card_id: Uuid,
        case: Case,
        event: CaseEvent,
    ) -> Result<(), TriageError> {
        match self {
            Self::Memory(a) => a.apply_card_freeze(card_id, case, event).await,
            Self::Postgres(a) => a.apply_card_freeze(card_id, case, event).await,
        }
    }

    async fn apply_dispute(
        &self,
        case: Case,
        event: CaseEvent,
    ) -> Result<DisputeOutcome, TriageError> {
        match self {
            Self::Memory(a) => a.apply_dispute(case, event).await,
            Self::Postgres(a) => a.apply_dispute(case, event).await,
        }
    }

    async fn apply_false_positive(
        &self,
        alert_id: Uuid,
        case: Case,
        event: CaseEvent,
    ) -> Result<(), TriageError> {
        match self {
            Self::Memory(a) => a.apply_false_positive(alert_id, case, event).await,
            Self::Postgres(a) => a.apply_false_positive(alert_id, case, event).await,
        }
    }

    async fn ensure_schema(&self) -> Result<(), TriageError> {
        match self {
            Self::Memory(a) => a.ensure_schema().await,
            Self::Postgres(a) => a.ensure_schema().await,
        }
    }
}

/// Coordination store backend selected at startup, mirroring `PersistenceBackend`.
pub enum CoordinationBackend {
    Memory(InMemoryCoordinationStore),
    Redis(RedisCoordinationStore),
}

#[async_trait]
impl CoordinationStore for CoordinationBackend {
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), TriageError> {
        match self {
            Self::Memory(s) => s.zadd(key, member, score).await,
            Self::Redis(s) => s.zadd(key, member, score).await,
        }
    }

    async fn zremrangebyscore(&self, key: &str, min_score: f64) -> Result<(), TriageError> {
        match self {
            Self::Memory(s) => s.zremrangebyscore(key, min_score).await,
            Self::Redis(s) => s.zremrangebyscore(key, min_score).await,
        }
    }

    async fn zcard(&self, key: &str) -> Result<u64, TriageError> {
        match self {
            Self::Memory(s) => s.zcard(key).await,
            Self::Redis(s) => s.zcard(key).await,
        }
    }

    async fn zmin_score(&self, key: &str) -> Result<Option<f64>, TriageError> {
        match self {
            Self::Memory(s) => s.zmin_score(key).await,
            Self::Redis(s) => s.zmin_score(key).await,
        }
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), TriageError> {
        match self {
            Self::Memory(s) => s.expire(key, ttl_secs).await,
            Self::Redis(s) => s.expire(key, ttl_secs).await,
        }
    }
}
