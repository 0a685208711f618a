use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use triage_core::{
    Account, AgentTrace, Alert, AlertStatus, Card, CardStatus, Case, CaseEvent, CoordinationStore,
    Customer, DisputeOutcome, KbDoc, PersistenceAdapter, Transaction, TransactionPage,
    TransactionQuery, TriageError, TriageRun,
};

/// In-memory `PersistenceAdapter` double. Used for local development without a
/// database and for integration tests that exercise the service layer above
/// `triage-core`; `triage-core`'s own unit tests use a narrower fake scoped to
/// the orchestrator alone.
#[derive(Default)]
pub struct InMemoryPersistenceAdapter {
    customers: DashMap<Uuid, Customer>,
    cards: DashMap<Uuid, Card>,
    accounts: DashMap<Uuid, Account>,
    transactions: DashMap<Uuid, Transaction>,
    alerts: DashMap<Uuid, Alert>,
    cases: DashMap<Uuid, Case>,
    case_events: RwLock<Vec<CaseEvent>>,
    kb_docs: RwLock<Vec<KbDoc>>,
    triage_runs: RwLock<Vec<(TriageRun, Vec<AgentTrace>)>>,
    /// Serializes the compound `apply_*` action writes so a case, its event,
    /// and its mutation land (or are checked) as one unit, the same guarantee
    /// the Postgres adapter gets from `pool.begin()`.
    write_lock: AsyncMutex<()>,
}

impl InMemoryPersistenceAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_customer(&self, customer: Customer) {
        self.customers.insert(customer.id, customer);
    }

    pub fn seed_card(&self, card: Card) {
        self.cards.insert(card.id, card);
    }

    pub fn seed_account(&self, account: Account) {
        self.accounts.insert(account.id, account);
    }

    pub fn seed_transaction(&self, transaction: Transaction) {
        self.transactions.insert(transaction.id, transaction);
    }

    pub fn seed_alert(&self, alert: Alert) {
        self.alerts.insert(alert.id, alert);
    }

    pub fn seed_kb_doc(&self, doc: KbDoc) {
        self.kb_docs.write().unwrap().push(doc);
    }
}

#[async_trait]
impl PersistenceAdapter for InMemoryPersistenceAdapter {
    async fn get_customer(&self, customer_id: Uuid) -> Result<Customer, TriageError> {
        self.customers
            .get(&customer_id)
            .map(|c| c.clone())
            .ok_or_else(|| TriageError::NotFound(format!("customer '{customer_id}'")))
    }

    async fn list_open_alerts(&self, limit: u32) -> Result<Vec<(Alert, Customer)>, TriageError> {
        let mut open: Vec<Alert> = self
            .alerts
            .iter()
            .filter(|a| a.status == AlertStatus::Open)
            .map(|a| a.clone())
            .collect();
        open.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        open.truncate(limit as usize);

        let mut out = Vec::with_capacity(open.len());
        for alert in open {
            let customer = self.get_customer(alert.customer_id).await?;
            out.push((alert, customer));
        }
        Ok(out)
    }

    async fn get_alert(&self, alert_id: Uuid) -> Result<Alert, TriageError> {
        self.alerts
            .get(&alert_id)
            .map(|a| a.clone())
            .ok_or_else(|| TriageError::NotFound(format!("alert '{alert_id}'")))
    }

    async fn set_alert_status(
        &self,
        alert_id: Uuid,
        status: AlertStatus,
    ) -> Result<(), TriageError> {
        let mut entry = self
            .alerts
            .get_mut(&alert_id)
            .ok_or_else(|| TriageError::NotFound(format!("alert '{alert_id}'")))?;
        entry.status = status;
        Ok(())
    }

    async fn list_cards_for_customer(&self, customer_id: Uuid) -> Result<Vec<Card>, TriageError> {
        Ok(self
            .cards
            .iter()
            .filter(|c| c.customer_id == customer_id)
            .map(|c| c.clone())
            .collect())
    }

    async fn get_card(&self, card_id: Uuid) -> Result<Card, TriageError> {
        self.cards
            .get(&card_id)
            .map(|c| c.clone())
            .ok_or_else(|| TriageError::NotFound(format!("card '{card_id}'")))
    }

    async fn set_card_status(&self, card_id: Uuid, status: CardStatus) -> Result<(), TriageError> {
        let mut entry = self
            .cards
            .get_mut(&card_id)
            .ok_or_else(|| TriageError::NotFound(format!("card '{card_id}'")))?;
        entry.status = status;
        Ok(())
    }

    async fn list_accounts_for_customer(
        &self,
        customer_id: Uuid,
    ) -> Result<Vec<Account>, TriageError> {
        Ok(self
            .accounts
            .iter()
            .filter(|a| a.customer_id == customer_id)
            .map(|a| a.clone())
            .collect())
    }

    async fn primary_account_balance_minor(&self, customer_id: Uuid) -> Result<i64, TriageError> {
        let mut accounts = self.list_accounts_for_customer(customer_id).await?;
        accounts.sort_by_key(|a| a.id);
        Ok(accounts.first().map(|a| a.balance_minor).unwrap_or(0))
    }

    async fn get_transaction(&self, transaction_id: Uuid) -> Result<Transaction, TriageError> {
        self.transactions
            .get(&transaction_id)
            .map(|t| t.clone())
            .ok_or_else(|| TriageError::NotFound(format!("transaction '{transaction_id}'")))
    }

    async fn recent_transactions(
        &self,
        customer_id: Uuid,
        limit: u32,
    ) -> Result<Vec<Transaction>, TriageError> {
        let mut txns: Vec<Transaction> = self
            .transactions
            .iter()
            .filter(|t| t.customer_id == customer_id)
            .map(|t| t.clone())
            .collect();
        txns.sort_by(|a, b| (b.timestamp, b.id).cmp(&(a.timestamp, a.id)));
        txns.truncate(limit as usize);
        Ok(txns)
    }

    async fn paginate_transactions(
        &self,
        customer_id: Uuid,
        query: TransactionQuery,
    ) -> Result<TransactionPage, TriageError> {
        let limit = triage_core::clamp_limit(Some(query.limit));
        let cursor = query
            .cursor
            .as_deref()
            .map(triage_core::Cursor::decode)
            .transpose()?;

        let mut txns: Vec<Transaction> = self
            .transactions
            .iter()
            .filter(|t| t.customer_id == customer_id)
            .filter(|t| query.from.map(|from| t.timestamp >= from).unwrap_or(true))
            .filter(|t| query.to.map(|to| t.timestamp <= to).unwrap_or(true))
            .filter(|t| match cursor {
                Some(c) => (t.timestamp, t.id) < (c.timestamp, c.id),
                None => true,
            })
            .map(|t| t.clone())
            .collect();
        txns.sort_by(|a, b| (b.timestamp, b.id).cmp(&(a.timestamp, a.id)));

        let page = triage_core::paginate(txns, limit, |t| (t.timestamp, t.id));
        Ok(TransactionPage {
            items: page.items,
            next_cursor: page.next_cursor,
            has_more: page.has_more,
        })
    }

    async fn insert_transactions(
        &self,
        transactions: Vec<Transaction>,
    ) -> Result<(), TriageError> {
        for txn in transactions {
            self.transactions.insert(txn.id, txn);
        }
        Ok(())
    }

    async fn list_kb_docs(&self, limit: u32) -> Result<Vec<KbDoc>, TriageError> {
        let docs = self.kb_docs.read().unwrap();
        Ok(docs.iter().take(limit as usize).cloned().collect())
    }

    async fn insert_triage_run(
        &self,
        run: TriageRun,
        traces: Vec<AgentTrace>,
    ) -> Result<(), TriageError> {
        self.triage_runs.write().unwrap().push((run, traces));
        Ok(())
    }

    async fn find_open_dispute_for_transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<Case>, TriageError> {
        Ok(self
            .cases
            .iter()
            .find(|c| {
                c.transaction_id == Some(transaction_id)
                    && c.case_type == triage_core::CaseType::Dispute
                    && matches!(
                        c.status,
                        triage_core::CaseStatus::Open | triage_core::CaseStatus::Investigating
                    )
            })
            .map(|c| c.clone()))
    }

    async fn insert_case(&self, case: Case) -> Result<(), TriageError> {
        self.cases.insert(case.id, case);
        Ok(())
    }

    async fn append_case_event(&self, event: CaseEvent) -> Result<(), TriageError> {
        self.case_events.write().unwrap().push(event);
        Ok(())
    }

    async fn list_case_events(&self, case_id: Uuid) -> Result<Vec<CaseEvent>, TriageError> {
        Ok(self
            .case_events
            .read()
            .unwrap()
            .iter()
            .filter(|e| e.case_id == case_id)
            .cloned()
            .collect())
    }

    async fn apply_card_freeze(
        &self,
        card_id: Uuid,
        case: Case,
        event: CaseEvent,
    ) -> Result<(), TriageError> {
        let _guard = self.write_lock.lock().await;
        self.set_card_status(card_id, CardStatus::Frozen).await?;
        self.cases.insert(case.id, case);
        self.case_events.write().unwrap().push(event);
        Ok(())
    }

    async fn apply_dispute(
        &self,
        case: Case,
        event: CaseEvent,
    ) -> Result<DisputeOutcome, TriageError> {
        let _guard = self.write_lock.lock().await;
        let transaction_id = case
            .transaction_id
            .ok_or_else(|| TriageError::Internal("dispute case missing transaction_id".to_string()))?;
        if let Some(existing) = self.find_open_dispute_for_transaction(transaction_id).await? {
            return Ok(DisputeOutcome::AlreadyExists(existing));
        }
        self.cases.insert(case.id, case);
        self.case_events.write().unwrap().push(event);
        Ok(DisputeOutcome::Opened)
    }

    async fn apply_false_positive(
        &self,
        alert_id: Uuid,
        case: Case,
        event: CaseEvent,
    ) -> Result<(), TriageError> {
        let _guard = self.write_lock.lock().await;
        self.set_alert_status(alert_id, AlertStatus::FalsePositive).await?;
        self.cases.insert(case.id, case);
        self.case_events.write().unwrap().push(event);
        Ok(())
    }

    async fn ensure_schema(&self) -> Result<(), TriageError> {
        Ok(())
    }
}

/// In-memory `CoordinationStore` double: one sorted set per key, held as a
/// plain `Vec<(member, score)>` behind a mutex. No TTL enforcement — `expire`
/// is a no-op, since nothing ever evicts a process-local dev instance anyway.
#[derive(Default)]
pub struct InMemoryCoordinationStore {
    sets: DashMap<String, Mutex<Vec<(String, f64)>>>,
}

impl InMemoryCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CoordinationStore for InMemoryCoordinationStore {
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), TriageError> {
        self.sets
            .entry(key.to_string())
            .or_default()
            .lock()
            .unwrap()
            .push((member.to_string(), score));
        Ok(())
    }

    async fn zremrangebyscore(&self, key: &str, min_score: f64) -> Result<(), TriageError> {
        if let Some(set) = self.sets.get(key) {
            set.lock().unwrap().retain(|(_, score)| *score >= min_score);
        }
        Ok(())
    }

    async fn zcard(&self, key: &str) -> Result<u64, TriageError> {
        Ok(self
            .sets
            .get(key)
            .map(|set| set.lock().unwrap().len() as u64)
            .unwrap_or(0))
    }

    async fn zmin_score(&self, key: &str) -> Result<Option<f64>, TriageError> {
        Ok(self.sets.get(key).and_then(|set| {
            set.lock()
                .unwrap()
                .iter()
                .map(|(_, score)| *score)
                .fold(None, |acc, score| match acc {
                    None => Some(score),
                    Some(min) => Some(min.min(score)),
                })
        }))
    }

    async fn expire(&self, _key: &str, _ttl_secs: u64) -> Result<(), TriageError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customer() -> Customer {
        Customer {
            id: Uuid::new_v4(),
            display_name: "Jane Doe".to_string(),
            email: "jane@example.com".to_string(),
            phone: "+911234567890".to_string(),
            kyc_level: 2,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn get_customer_round_trips_seeded_value() {
        let store = InMemoryPersistenceAdapter::new();
        let customer = customer();
        store.seed_customer(customer.clone());

        let fetched = store.get_customer(customer.id).await.unwrap();
        assert_eq!(fetched.id, customer.id);
    }

    #[tokio::test]
    async fn get_customer_missing_is_not_found() {
        let store = InMemoryPersistenceAdapter::new();
        let err = store.get_customer(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, TriageError::NotFound(_)));
    }

    #[tokio::test]
    async fn paginate_transactions_drops_extra_row_and_sets_cursor() {
        let store = InMemoryPersistenceAdapter::new();
        let customer = customer();
        store.seed_customer(customer.clone());

        for i in 0..6 {
            store.seed_transaction(Transaction {
                id: Uuid::new_v4(),
                customer_id: customer.id,
                card_id: Uuid::new_v4(),
                timestamp: Utc::now() - chrono::Duration::seconds(i),
                amount_minor: 1000,
                merchant: "Merchant".to_string(),
                mcc: "5411".to_string(),
                currency: "INR".to_string(),
                device_id: None,
                city: None,
                country: "IN".to_string(),
                status: triage_core::TransactionStatus::Posted,
            });
        }

        let page = store
            .paginate_transactions(
                customer.id,
                TransactionQuery {
                    cursor: None,
                    limit: 5,
                    from: None,
                    to: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(page.items.len(), 5);
        assert!(page.has_more);
        assert!(page.next_cursor.is_some());
    }

    #[tokio::test]
    async fn set_card_status_updates_in_place() {
        let store = InMemoryPersistenceAdapter::new();
        let customer = customer();
        let card = Card {
            id: Uuid::new_v4(),
            customer_id: customer.id,
            last_four: "4242".to_string(),
            network: triage_core::CardNetwork::Visa,
            status: CardStatus::Active,
        };
        store.seed_customer(customer);
        store.seed_card(card.clone());

        store.set_card_status(card.id, CardStatus::Frozen).await.unwrap();
        let fetched = store.get_card(card.id).await.unwrap();
        assert_eq!(fetched.status, CardStatus::Frozen);
    }
}
