use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, QueryBuilder, Row};
use uuid::Uuid;

use triage_core::{
    Account, Actor, AgentTrace, Alert, AlertRisk, AlertStatus, Card, CardNetwork, CardStatus,
    Case, CaseEvent, CaseStatus, CaseType, Customer, DisputeOutcome, KbDoc, PersistenceAdapter,
    Transaction, TransactionPage, TransactionQuery, TransactionStatus, TriageError, TriageRun,
};

/// `sqlx`-backed `PersistenceAdapter` over PostgreSQL. Mirrors `PersistentLedger`'s
/// bootstrap-then-query shape from the teacher's ledger store: connect, ensure
/// schema, then typed reads/writes with `Row::try_get` decoding rather than
/// `query_as`/derive, so every column read carries its own error context.
#[derive(Debug, Clone)]
pub struct PostgresPersistenceAdapter {
    pool: PgPool,
}

impl PostgresPersistenceAdapter {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, TriageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(|e| TriageError::Upstream(format!("postgres connect failed: {e}")))?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn card_status_to_str(status: CardStatus) -> &'static str {
    match status {
        CardStatus::Active => "active",
        CardStatus::Frozen => "frozen",
        CardStatus::Blocked => "blocked",
    }
}

fn parse_card_status(value: &str) -> Result<CardStatus, TriageError> {
    match value {
        "active" => Ok(CardStatus::Active),
        "frozen" => Ok(CardStatus::Frozen),
        "blocked" => Ok(CardStatus::Blocked),
        other => Err(TriageError::Internal(format!("unknown card status '{other}'"))),
    }
}

fn card_network_to_str(network: CardNetwork) -> &'static str {
    match network {
        CardNetwork::Visa => "visa",
        CardNetwork::Mastercard => "mastercard",
        CardNetwork::Rupay => "rupay",
    }
}

fn parse_card_network(value: &str) -> Result<CardNetwork, TriageError> {
    match value {
        "visa" => Ok(CardNetwork::Visa),
        "mastercard" => Ok(CardNetwork::Mastercard),
        "rupay" => Ok(CardNetwork::Rupay),
        other => Err(TriageError::Internal(format!("unknown card network '{other}'"))),
    }
}

fn transaction_status_to_str(status: TransactionStatus) -> &'static str {
    match status {
        TransactionStatus::Posted => "posted",
        TransactionStatus::Pending => "pending",
        TransactionStatus::Reversed => "reversed",
    }
}

fn parse_transaction_status(value: &str) -> Result<TransactionStatus, TriageError> {
    match value {
        "posted" => Ok(TransactionStatus::Posted),
        "pending" => Ok(TransactionStatus::Pending),
        "reversed" => Ok(TransactionStatus::Reversed),
        other => Err(TriageError::Internal(format!(
            "unknown transaction status '{other}'"
        ))),
    }
}

fn alert_risk_to_str(risk: AlertRisk) -> &'static str {
    match risk {
        AlertRisk::Low => "low",
        AlertRisk::Medium => "medium",
        AlertRisk::High => "high",
    }
}

fn parse_alert_risk(value: &str) -> Result<AlertRisk, TriageError> {
    match value {
        "low" => Ok(AlertRisk::Low),
        "medium" => Ok(AlertRisk::Medium),
        "high" => Ok(AlertRisk::High),
        other => Err(TriageError::Internal(format!("unknown alert risk '{other}'"))),
    }
}

fn alert_status_to_str(status: AlertStatus) -> &'static str {
    match status {
        AlertStatus::Open => "open",
        AlertStatus::FalsePositive => "false_positive",
        AlertStatus::Resolved => "resolved",
    }
}

fn parse_alert_status(value: &str) -> Result<AlertStatus, TriageError> {
    match value {
        "open" => Ok(AlertStatus::Open),
        "false_positive" => Ok(AlertStatus::FalsePositive),
        "resolved" => Ok(AlertStatus::Resolved),
        other => Err(TriageError::Internal(format!("unknown alert status '{other}'"))),
    }
}

fn case_type_to_str(case_type: CaseType) -> &'static str {
    match case_type {
        CaseType::CardFreeze => "card_freeze",
        CaseType::Dispute => "dispute",
        CaseType::FalsePositive => "false_positive",
    }
}

fn parse_case_type(value: &str) -> Result<CaseType, TriageError> {
    match value {
        "card_freeze" => Ok(CaseType::CardFreeze),
        "dispute" => Ok(CaseType::Dispute),
        "false_positive" => Ok(CaseType::FalsePositive),
        other => Err(TriageError::Internal(format!("unknown case type '{other}'"))),
    }
}

fn case_status_to_str(status: CaseStatus) -> &'static str {
    match status {
        CaseStatus::Open => "open",
        CaseStatus::Investigating => "investigating",
        CaseStatus::Completed => "completed",
        CaseStatus::Closed => "closed",
    }
}

fn parse_case_status(value: &str) -> Result<CaseStatus, TriageError> {
    match value {
        "open" => Ok(CaseStatus::Open),
        "investigating" => Ok(CaseStatus::Investigating),
        "completed" => Ok(CaseStatus::Completed),
        "closed" => Ok(CaseStatus::Closed),
        other => Err(TriageError::Internal(format!("unknown case status '{other}'"))),
    }
}

fn actor_to_parts(actor: &Actor) -> (&'static str, Option<String>) {
    match actor {
        Actor::System => ("system", None),
        Actor::Operator(id) => ("operator", Some(id.clone())),
    }
}

fn parse_actor(kind: &str, operator_id: Option<String>) -> Result<Actor, TriageError> {
    match kind {
        "system" => Ok(Actor::System),
        "operator" => operator_id
            .map(Actor::Operator)
            .ok_or_else(|| TriageError::Internal("operator actor missing operator_id".to_string())),
        other => Err(TriageError::Internal(format!("unknown actor kind '{other}'"))),
    }
}

fn row_to_customer(row: &sqlx::postgres::PgRow) -> Result<Customer, TriageError> {
    let kyc_level: i16 = row.try_get("kyc_level").map_err(pg_err("kyc_level"))?;
    Ok(Customer {
        id: row.try_get("id").map_err(pg_err("id"))?,
        display_name: row.try_get("display_name").map_err(pg_err("display_name"))?,
        email: row.try_get("email").map_err(pg_err("email"))?,
        phone: row.try_get("phone").map_err(pg_err("phone"))?,
        kyc_level: kyc_level as u8,
        created_at: row.try_get("created_at").map_err(pg_err("created_at"))?,
    })
}

fn row_to_card(row: &sqlx::postgres::PgRow) -> Result<Card, TriageError> {
    let network: String = row.try_get("network").map_err(pg_err("network"))?;
    let status: String = row.try_get("status").map_err(pg_err("status"))?;
    Ok(Card {
        id: row.try_get("id").map_err(pg_err("id"))?,
        customer_id: row.try_get("customer_id").map_err(pg_err("customer_id"))?,
        last_four: row.try_get("last_four").map_err(pg_err("last_four"))?,
        network: parse_card_network(&network)?,
        status: parse_card_status(&status)?,
    })
}

fn row_to_account(row: &sqlx::postgres::PgRow) -> Result<Account, TriageError> {
    Ok(Account {
        id: row.try_get("id").map_err(pg_err("id"))?,
        customer_id: row.try_get("customer_id").map_err(pg_err("customer_id"))?,
        balance_minor: row.try_get("balance_minor").map_err(pg_err("balance_minor"))?,
        currency: row.try_get("currency").map_err(pg_err("currency"))?,
    })
}

fn row_to_transaction(row: &sqlx::postgres::PgRow) -> Result<Transaction, TriageError> {
    let status: String = row.try_get("status").map_err(pg_err("status"))?;
    Ok(Transaction {
        id: row.try_get("id").map_err(pg_err("id"))?,
        customer_id: row.try_get("customer_id").map_err(pg_err("customer_id"))?,
        card_id: row.try_get("card_id").map_err(pg_err("card_id"))?,
        timestamp: row.try_get("ts").map_err(pg_err("ts"))?,
        amount_minor: row.try_get("amount_minor").map_err(pg_err("amount_minor"))?,
        merchant: row.try_get("merchant").map_err(pg_err("merchant"))?,
        mcc: row.try_get("mcc").map_err(pg_err("mcc"))?,
        currency: row.try_get("currency").map_err(pg_err("currency"))?,
        device_id: row.try_get("device_id").map_err(pg_err("device_id"))?,
        city: row.try_get("city").map_err(pg_err("city"))?,
        country: row.try_get("country").map_err(pg_err("country"))?,
        status: parse_transaction_status(&status)?,
    })
}

fn row_to_alert(row: &sqlx::postgres::PgRow) -> Result<Alert, TriageError> {
    let risk: String = row.try_get("risk").map_err(pg_err("risk"))?;
    let status: String = row.try_get("status").map_err(pg_err("status"))?;
    Ok(Alert {
        id: row.try_get("id").map_err(pg_err("id"))?,
        customer_id: row.try_get("customer_id").map_err(pg_err("customer_id"))?,
        suspect_transaction_id: row
            .try_get("suspect_transaction_id")
            .map_err(pg_err("suspect_transaction_id"))?,
        risk: parse_alert_risk(&risk)?,
        status: parse_alert_status(&status)?,
        reason_tag: row.try_get("reason_tag").map_err(pg_err("reason_tag"))?,
        created_at: row.try_get("created_at").map_err(pg_err("created_at"))?,
    })
}

fn row_to_case(row: &sqlx::postgres::PgRow) -> Result<Case, TriageError> {
    let case_type: String = row.try_get("case_type").map_err(pg_err("case_type"))?;
    let status: String = row.try_get("status").map_err(pg_err("status"))?;
    Ok(Case {
        id: row.try_get("id").map_err(pg_err("id"))?,
        customer_id: row.try_get("customer_id").map_err(pg_err("customer_id"))?,
        transaction_id: row.try_get("transaction_id").map_err(pg_err("transaction_id"))?,
        case_type: parse_case_type(&case_type)?,
        status: parse_case_status(&status)?,
        reason_code: row.try_get("reason_code").map_err(pg_err("reason_code"))?,
        created_at: row.try_get("created_at").map_err(pg_err("created_at"))?,
    })
}

fn row_to_case_event(row: &sqlx::postgres::PgRow) -> Result<CaseEvent, TriageError> {
    let actor_kind: String = row.try_get("actor_kind").map_err(pg_err("actor_kind"))?;
    let operator_id: Option<String> = row.try_get("operator_id").map_err(pg_err("operator_id"))?;
    Ok(CaseEvent {
        id: row.try_get("id").map_err(pg_err("id"))?,
        case_id: row.try_get("case_id").map_err(pg_err("case_id"))?,
        timestamp: row.try_get("ts").map_err(pg_err("ts"))?,
        actor: parse_actor(&actor_kind, operator_id)?,
        action: row.try_get("action").map_err(pg_err("action"))?,
        payload: row.try_get("payload").map_err(pg_err("payload"))?,
        previous_hash: row.try_get("previous_hash").map_err(pg_err("previous_hash"))?,
        entry_hash: row.try_get("entry_hash").map_err(pg_err("entry_hash"))?,
    })
}

fn row_to_kb_doc(row: &sqlx::postgres::PgRow) -> Result<KbDoc, TriageError> {
    let tags: serde_json::Value = row.try_get("tags").map_err(pg_err("tags"))?;
    let tags: Vec<String> = serde_json::from_value(tags)?;
    Ok(KbDoc {
        id: row.try_get("id").map_err(pg_err("id"))?,
        title: row.try_get("title").map_err(pg_err("title"))?,
        tags,
        body: row.try_get("body").map_err(pg_err("body"))?,
    })
}

fn pg_err(column: &'static str) -> impl Fn(sqlx::Error) -> TriageError {
    move |e| TriageError::Internal(format!("postgres decode '{column}' failed: {e}"))
}

/// Shared by every `apply_*` transactional write: inserts a `Case` row bound
/// to the caller's open transaction rather than `self.pool` directly.
async fn insert_case_row(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    case: &Case,
) -> Result<(), TriageError> {
    sqlx::query(
        r#"
        INSERT INTO cases (id, customer_id, transaction_id, case_type, status, reason_code, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(case.id)
    .bind(case.customer_id)
    .bind(case.transaction_id)
    .bind(case_type_to_str(case.case_type))
    .bind(case_status_to_str(case.status))
    .bind(&case.reason_code)
    .bind(case.created_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| TriageError::Upstream(format!("postgres insert failed: {e}")))?;
    Ok(())
}

/// Shared by every `apply_*` transactional write: appends a `CaseEvent` row
/// bound to the caller's open transaction rather than `self.pool` directly.
async fn insert_case_event_row(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    event: &CaseEvent,
) -> Result<(), TriageError> {
    let (actor_kind, operator_id) = actor_to_parts(&event.actor);
    sqlx::query(
        r#"
        INSERT INTO case_events (
            id, case_id, ts, actor_kind, operator_id, action, payload, previous_hash, entry_hash
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(event.id)
    .bind(event.case_id)
    .bind(event.timestamp)
    .bind(actor_kind)
    .bind(operator_id)
    .bind(&event.action)
    .bind(&event.payload)
    .bind(&event.previous_hash)
    .bind(&event.entry_hash)
    .execute(&mut **tx)
    .await
    .map_err(|e| TriageError::Upstream(format!("postgres insert failed: {e}")))?;
    Ok(())
}

#[async_trait]
impl PersistenceAdapter for PostgresPersistenceAdapter {
    async fn get_customer(&self, customer_id: Uuid) -> Result<Customer, TriageError> {
        let row = sqlx::query("SELECT * FROM customers WHERE id = $1")
            .bind(customer_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| TriageError::Upstream(format!("postgres query failed: {e}")))?
            .ok_or_else(|| TriageError::NotFound(format!("customer '{customer_id}'")))?;
        row_to_customer(&row)
    }

    async fn list_open_alerts(&self, limit: u32) -> Result<Vec<(Alert, Customer)>, TriageError> {
        let rows = sqlx::query(
            r#"
            SELECT a.*, c.display_name, c.email, c.phone, c.kyc_level, c.created_at AS customer_created_at
            FROM alerts a
            JOIN customers c ON c.id = a.customer_id
            WHERE a.status = 'open'
            ORDER BY a.created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| TriageError::Upstream(format!("postgres query failed: {e}")))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let alert = row_to_alert(&row)?;
            let kyc_level: i16 = row.try_get("kyc_level").map_err(pg_err("kyc_level"))?;
            let customer = Customer {
                id: alert.customer_id,
                display_name: row.try_get("display_name").map_err(pg_err("display_name"))?,
                email: row.try_get("email").map_err(pg_err("email"))?,
                phone: row.try_get("phone").map_err(pg_err("phone"))?,
                kyc_level: kyc_level as u8,
                created_at: row
                    .try_get("customer_created_at")
                    .map_err(pg_err("customer_created_at"))?,
            };
            out.push((alert, customer));
        }
        Ok(out)
    }

    async fn get_alert(&self, alert_id: Uuid) -> Result<Alert, TriageError> {
        let row = sqlx::query("SELECT * FROM alerts WHERE id = $1")
            .bind(alert_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| TriageError::Upstream(format!("postgres query failed: {e}")))?
            .ok_or_else(|| TriageError::NotFound(format!("alert '{alert_id}'")))?;
        row_to_alert(&row)
    }

    async fn set_alert_status(
        &self,
        alert_id: Uuid,
        status: AlertStatus,
    ) -> Result<(), TriageError> {
        let result = sqlx::query("UPDATE alerts SET status = $1 WHERE id = $2")
            .bind(alert_status_to_str(status))
            .bind(alert_id)
            .execute(&self.pool)
            .await
            .map_err(|e| TriageError::Upstream(format!("postgres update failed: {e}")))?;
        if result.rows_affected() == 0 {
            return Err(TriageError::NotFound(format!("alert '{alert_id}'")));
        }
        Ok(())
    }

    async fn list_cards_for_customer(&self, customer_id: Uuid) -> Result<Vec<Card>, TriageError> {
        let rows = sqlx::query("SELECT * FROM cards WHERE customer_id = $1 ORDER BY id")
            .bind(customer_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| TriageError::Upstream(format!("postgres query failed: {e}")))?;
        rows.iter().map(row_to_card).collect()
    }

    async fn get_card(&self, card_id: Uuid) -> Result<Card, TriageError> {
        let row = sqlx::query("SELECT * FROM cards WHERE id = $1")
            .bind(card_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| TriageError::Upstream(format!("postgres query failed: {e}")))?
            .ok_or_else(|| TriageError::NotFound(format!("card '{card_id}'")))?;
        row_to_card(&row)
    }

    async fn set_card_status(&self, card_id: Uuid, status: CardStatus) -> Result<(), TriageError> {
        let result = sqlx::query("UPDATE cards SET status = $1 WHERE id = $2")
            .bind(card_status_to_str(status))
            .bind(card_id)
            .execute(&self.pool)
            .await
            .map_err(|e| TriageError::Upstream(format!("postgres update failed: {e}")))?;
        if result.rows_affected() == 0 {
            return Err(TriageError::NotFound(format!("card '{card_id}'")));
        }
        Ok(())
    }

    async fn list_accounts_for_customer(
        &self,
        customer_id: Uuid,
    ) -> Result<Vec<Account>, TriageError> {
        let rows = sqlx::query("SELECT * FROM accounts WHERE customer_id = $1 ORDER BY id")
            .bind(customer_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| TriageError::Upstream(format!("postgres query failed: {e}")))?;
        rows.iter().map(row_to_account).collect()
    }

    async fn primary_account_balance_minor(&self, customer_id: Uuid) -> Result<i64, TriageError> {
        let row = sqlx::query(
            "SELECT balance_minor FROM accounts WHERE customer_id = $1 ORDER BY id LIMIT 1",
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| TriageError::Upstream(format!("postgres query failed: {e}")))?;

        match row {
            Some(row) => row.try_get("balance_minor").map_err(pg_err("balance_minor")),
            None => Ok(0),
        }
    }

    async fn get_transaction(&self, transaction_id: Uuid) -> Result<Transaction, TriageError> {
        let row = sqlx::query("SELECT * FROM transactions WHERE id = $1")
            .bind(transaction_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| TriageError::Upstream(format!("postgres query failed: {e}")))?
            .ok_or_else(|| TriageError::NotFound(format!("transaction '{transaction_id}'")))?;
        row_to_transaction(&row)
    }

    async fn recent_transactions(
        &self,
        customer_id: Uuid,
        limit: u32,
    ) -> Result<Vec<Transaction>, TriageError> {
        let rows = sqlx::query(
            "SELECT * FROM transactions WHERE customer_id = $1 ORDER BY ts DESC, id DESC LIMIT $2",
        )
        .bind(customer_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| TriageError::Upstream(format!("postgres query failed: {e}")))?;
        rows.iter().map(row_to_transaction).collect()
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

        let mut builder: QueryBuilder<sqlx::Postgres> =
            QueryBuilder::new("SELECT * FROM transactions WHERE customer_id = ");
        builder.push_bind(customer_id);

        if let Some(cursor) = cursor {
            builder.push(" AND (ts, id) < (");
            builder.push_bind(cursor.timestamp);
            builder.push(", ");
            builder.push_bind(cursor.id);
            builder.push(")");
        }
        if let Some(from) = query.from {
            builder.push(" AND ts >= ");
            builder.push_bind(from);
        }
        if let Some(to) = query.to {
            builder.push(" AND ts <= ");
            builder.push_bind(to);
        }
        builder.push(" ORDER BY ts DESC, id DESC LIMIT ");
        builder.push_bind((limit + 1) as i64);

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| TriageError::Upstream(format!("postgres query failed: {e}")))?;

        let transactions = rows
            .iter()
            .map(row_to_transaction)
            .collect::<Result<Vec<_>, _>>()?;

        let page = triage_core::paginate(transactions, limit, |t| (t.timestamp, t.id));
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
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| TriageError::Upstream(format!("postgres begin failed: {e}")))?;

        for txn in &transactions {
            sqlx::query(
                r#"
                INSERT INTO transactions (
                    id, customer_id, card_id, ts, amount_minor, merchant, mcc, currency,
                    device_id, city, country, status
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(txn.id)
            .bind(txn.customer_id)
            .bind(txn.card_id)
            .bind(txn.timestamp)
            .bind(txn.amount_minor)
            .bind(&txn.merchant)
            .bind(&txn.mcc)
            .bind(&txn.currency)
            .bind(&txn.device_id)
            .bind(&txn.city)
            .bind(&txn.country)
            .bind(transaction_status_to_str(txn.status))
            .execute(&mut *tx)
            .await
            .map_err(|e| TriageError::Upstream(format!("postgres insert failed: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| TriageError::Upstream(format!("postgres commit failed: {e}")))?;
        Ok(())
    }

    async fn list_kb_docs(&self, limit: u32) -> Result<Vec<KbDoc>, TriageError> {
        let rows = sqlx::query("SELECT * FROM kb_docs ORDER BY id LIMIT $1")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| TriageError::Upstream(format!("postgres query failed: {e}")))?;
        rows.iter().map(row_to_kb_doc).collect()
    }

    async fn insert_triage_run(
        &self,
        run: TriageRun,
        traces: Vec<AgentTrace>,
    ) -> Result<(), TriageError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| TriageError::Upstream(format!("postgres begin failed: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO triage_runs (
                id, alert_id, started_at, ended_at, final_risk, reasons, fallback_used,
                total_duration_ms
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(run.id)
        .bind(run.alert_id)
        .bind(run.started_at)
        .bind(run.ended_at)
        .bind(run.final_risk.map(alert_risk_to_str))
        .bind(serde_json::to_value(&run.reasons)?)
        .bind(run.fallback_used)
        .bind(run.total_duration_ms as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| TriageError::Upstream(format!("postgres insert failed: {e}")))?;

        for trace in &traces {
            sqlx::query(
                r#"
                INSERT INTO agent_traces (run_id, seq, step, ok, duration_ms, detail)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(trace.run_id)
            .bind(trace.seq as i32)
            .bind(&trace.step)
            .bind(trace.ok)
            .bind(trace.duration_ms as i64)
            .bind(&trace.detail)
            .execute(&mut *tx)
            .await
            .map_err(|e| TriageError::Upstream(format!("postgres insert failed: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| TriageError::Upstream(format!("postgres commit failed: {e}")))?;
        Ok(())
    }

    async fn find_open_dispute_for_transaction(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<Case>, TriageError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM cases
            WHERE transaction_id = $1 AND case_type = 'dispute' AND status IN ('open', 'investigating')
            LIMIT 1
            "#,
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| TriageError::Upstream(format!("postgres query failed: {e}")))?;

        row.as_ref().map(row_to_case).transpose()
    }

    async fn insert_case(&self, case: Case) -> Result<(), TriageError> {
        sqlx::query(
            r#"
            INSERT INTO cases (id, customer_id, transaction_id, case_type, status, reason_code, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(case.id)
        .bind(case.customer_id)
        .bind(case.transaction_id)
        .bind(case_type_to_str(case.case_type))
        .bind(case_status_to_str(case.status))
        .bind(&case.reason_code)
        .bind(case.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| TriageError::Upstream(format!("postgres insert failed: {e}")))?;
        Ok(())
    }

    async fn append_case_event(&self, event: CaseEvent) -> Result<(), TriageError> {
        let (actor_kind, operator_id) = actor_to_parts(&event.actor);
        sqlx::query(
            r#"
            INSERT INTO case_events (
                id, case_id, ts, actor_kind, operator_id, action, payload, previous_hash, entry_hash
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(event.id)
        .bind(event.case_id)
        .bind(event.timestamp)
        .bind(actor_kind)
        .bind(operator_id)
        .bind(&event.action)
        .bind(&event.payload)
        .bind(&event.previous_hash)
        .bind(&event.entry_hash)
        .execute(&self.pool)
        .await
        .map_err(|e| TriageError::Upstream(format!("postgres insert failed: {e}")))?;
        Ok(())
    }

    async fn list_case_events(&self, case_id: Uuid) -> Result<Vec<CaseEvent>, TriageError> {
        let rows = sqlx::query("SELECT * FROM case_events WHERE case_id = $1 ORDER BY ts ASC")
            .bind(case_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| TriageError::Upstream(format!("postgres query failed: {e}")))?;
        rows.iter().map(row_to_case_event).collect()
    }

    async fn apply_card_freeze(
        &self,
        card_id: Uuid,
        case: Case,
        event: CaseEvent,
    ) -> Result<(), TriageError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| TriageError::Upstream(format!("postgres begin failed: {e}")))?;

        let updated = sqlx::query("UPDATE cards SET status = $1 WHERE id = $2")
            .bind(card_status_to_str(CardStatus::Frozen))
            .bind(card_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| TriageError::Upstream(format!("postgres update failed: {e}")))?;
        if updated.rows_affected() == 0 {
            return Err(TriageError::NotFound(format!("card '{card_id}'")));
        }

        insert_case_row(&mut tx, &case).await?;
        insert_case_event_row(&mut tx, &event).await?;

        tx.commit()
            .await
            .map_err(|e| TriageError::Upstream(format!("postgres commit failed: {e}")))?;
        Ok(())
    }

    async fn apply_dispute(
        &self,
        case: Case,
        event: CaseEvent,
    ) -> Result<DisputeOutcome, TriageError> {
        let transaction_id = case.transaction_id.ok_or_else(|| {
            TriageError::Internal("dispute case missing transaction_id".to_string())
        })?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| TriageError::Upstream(format!("postgres begin failed: {e}")))?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO cases (id, customer_id, transaction_id, case_type, status, reason_code, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (transaction_id) WHERE case_type = 'dispute' AND status IN ('open', 'investigating')
            DO NOTHING
            "#,
        )
        .bind(case.id)
        .bind(case.customer_id)
        .bind(transaction_id)
        .bind(case_type_to_str(case.case_type))
        .bind(case_status_to_str(case.status))
        .bind(&case.reason_code)
        .bind(case.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| TriageError::Upstream(format!("postgres insert failed: {e}")))?;

        if inserted.rows_affected() == 0 {
            let existing = sqlx::query(
                r#"
                SELECT * FROM cases
                WHERE transaction_id = $1 AND case_type = 'dispute' AND status IN ('open', 'investigating')
                LIMIT 1
                "#,
            )
            .bind(transaction_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| TriageError::Upstream(format!("postgres query failed: {e}")))?;
            tx.commit()
                .await
                .map_err(|e| TriageError::Upstream(format!("postgres commit failed: {e}")))?;
            return Ok(DisputeOutcome::AlreadyExists(row_to_case(&existing)?));
        }

        insert_case_event_row(&mut tx, &event).await?;

        tx.commit()
            .await
            .map_err(|e| TriageError::Upstream(format!("postgres commit failed: {e}")))?;
        Ok(DisputeOutcome::Opened)
    }

    async fn apply_false_positive(
        &self,
        alert_id: Uuid,
        case: Case,
        event: CaseEvent,
    ) -> Result<(), TriageError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| TriageError::Upstream(format!("postgres begin failed: {e}")))?;

        let updated = sqlx::query("UPDATE alerts SET status = $1 WHERE id = $2")
            .bind(alert_status_to_str(AlertStatus::FalsePositive))
            .bind(alert_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| TriageError::Upstream(format!("postgres update failed: {e}")))?;
        if updated.rows_affected() == 0 {
            return Err(TriageError::NotFound(format!("alert '{alert_id}'")));
        }

        insert_case_row(&mut tx, &case).await?;
        insert_case_event_row(&mut tx, &event).await?;

        tx.commit()
            .await
            .map_err(|e| TriageError::Upstream(format!("postgres commit failed: {e}")))?;
        Ok(())
    }

    async fn ensure_schema(&self) -> Result<(), TriageError> {
        let statements = [
            r#"CREATE TABLE IF NOT EXISTS customers (
                id UUID PRIMARY KEY,
                display_name TEXT NOT NULL,
                email TEXT NOT NULL,
                phone TEXT NOT NULL,
                kyc_level SMALLINT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS cards (
                id UUID PRIMARY KEY,
                customer_id UUID NOT NULL REFERENCES customers(id),
                last_four TEXT NOT NULL,
                network TEXT NOT NULL,
                status TEXT NOT NULL
            )"#,
            "CREATE INDEX IF NOT EXISTS idx_cards_customer_id ON cards (customer_id)",
            r#"CREATE TABLE IF NOT EXISTS accounts (
                id UUID PRIMARY KEY,
                customer_id UUID NOT NULL REFERENCES customers(id),
                balance_minor BIGINT NOT NULL,
                currency TEXT NOT NULL
            )"#,
            "CREATE INDEX IF NOT EXISTS idx_accounts_customer_id ON accounts (customer_id)",
            r#"CREATE TABLE IF NOT EXISTS transactions (
                id UUID PRIMARY KEY,
                customer_id UUID NOT NULL REFERENCES customers(id),
                card_id UUID NOT NULL,
                ts TIMESTAMPTZ NOT NULL,
                amount_minor BIGINT NOT NULL,
                merchant TEXT NOT NULL,
                mcc TEXT NOT NULL,
                currency TEXT NOT NULL,
                device_id TEXT NULL,
                city TEXT NULL,
                country TEXT NOT NULL,
                status TEXT NOT NULL
            )"#,
            "CREATE INDEX IF NOT EXISTS idx_txn_customer_ts ON transactions (customer_id, ts DESC)",
            "CREATE INDEX IF NOT EXISTS idx_txn_merchant ON transactions (merchant)",
            "CREATE INDEX IF NOT EXISTS idx_txn_mcc ON transactions (mcc)",
            "CREATE INDEX IF NOT EXISTS idx_txn_ts ON transactions (ts)",
            r#"CREATE TABLE IF NOT EXISTS alerts (
                id UUID PRIMARY KEY,
                customer_id UUID NOT NULL REFERENCES customers(id),
                suspect_transaction_id UUID NULL,
                risk TEXT NOT NULL,
                status TEXT NOT NULL,
                reason_tag TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )"#,
            "CREATE INDEX IF NOT EXISTS idx_alerts_status_created ON alerts (status, created_at DESC)",
            r#"CREATE TABLE IF NOT EXISTS cases (
                id UUID PRIMARY KEY,
                customer_id UUID NOT NULL REFERENCES customers(id),
                transaction_id UUID NULL,
                case_type TEXT NOT NULL,
                status TEXT NOT NULL,
                reason_code TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )"#,
            "CREATE INDEX IF NOT EXISTS idx_cases_transaction_id ON cases (transaction_id)",
            r#"CREATE UNIQUE INDEX IF NOT EXISTS idx_cases_open_dispute_per_txn
                ON cases (transaction_id)
                WHERE case_type = 'dispute' AND status IN ('open', 'investigating')"#,
            r#"CREATE TABLE IF NOT EXISTS case_events (
                id UUID PRIMARY KEY,
                case_id UUID NOT NULL REFERENCES cases(id),
                ts TIMESTAMPTZ NOT NULL,
                actor_kind TEXT NOT NULL,
                operator_id TEXT NULL,
                action TEXT NOT NULL,
                payload JSONB NOT NULL,
                previous_hash TEXT NULL,
                entry_hash TEXT NOT NULL
            )"#,
            "CREATE INDEX IF NOT EXISTS idx_case_events_case_id ON case_events (case_id)",
            r#"CREATE TABLE IF NOT EXISTS triage_runs (
                id UUID PRIMARY KEY,
                alert_id UUID NOT NULL,
                started_at TIMESTAMPTZ NOT NULL,
                ended_at TIMESTAMPTZ NULL,
                final_risk TEXT NULL,
                reasons JSONB NOT NULL,
                fallback_used BOOLEAN NOT NULL,
                total_duration_ms BIGINT NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS agent_traces (
                run_id UUID NOT NULL,
                seq INTEGER NOT NULL,
                step TEXT NOT NULL,
                ok BOOLEAN NOT NULL,
                duration_ms BIGINT NOT NULL,
                detail JSONB NOT NULL,
                PRIMARY KEY (run_id, seq)
            )"#,
            r#"CREATE TABLE IF NOT EXISTS kb_docs (
                id UUID PRIMARY KEY,
                title TEXT NOT NULL,
                tags JSONB NOT NULL,
                body TEXT NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS policies (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL,
                config JSONB NOT NULL
            )"#,
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| TriageError::Upstream(format!("postgres schema create failed: {e}")))?;
        }
        Ok(())
    }
}
