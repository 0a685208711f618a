use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// KYC verification tier. Higher tiers are more trusted but require stronger
/// authentication (OTP) before destructive actions are allowed.
pub type KycLevel = u8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: Uuid,
    pub display_name: String,
    pub email: String,
    pub phone: String,
    pub kyc_level: KycLevel,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CardStatus {
    Active,
    Frozen,
    Blocked,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CardNetwork {
    Visa,
    Mastercard,
    Rupay,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Card {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub last_four: String,
    pub network: CardNetwork,
    pub status: CardStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub balance_minor: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Posted,
    Pending,
    Reversed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub card_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub amount_minor: i64,
    pub merchant: String,
    pub mcc: String,
    pub currency: String,
    pub device_id: Option<String>,
    pub city: Option<String>,
    pub country: String,
    pub status: TransactionStatus,
}

impl Transaction {
    pub const DEFAULT_COUNTRY: &'static str = "IN";
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertRisk {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Open,
    FalsePositive,
    Resolved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub suspect_transaction_id: Option<Uuid>,
    pub risk: AlertRisk,
    pub status: AlertStatus,
    pub reason_tag: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaseType {
    CardFreeze,
    Dispute,
    FalsePositive,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Open,
    Investigating,
    Completed,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Case {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub transaction_id: Option<Uuid>,
    pub case_type: CaseType,
    pub status: CaseStatus,
    pub reason_code: String,
    pub created_at: DateTime<Utc>,
}

/// An actor that can append a `CaseEvent`: either the system itself or a named operator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    System,
    Operator(String),
}

impl Actor {
    pub fn label(&self) -> String {
        match self {
            Actor::System => "system".to_string(),
            Actor::Operator(id) => id.clone(),
        }
    }
}

/// One entry in the case audit ledger. Immutable and append-only; `previous_hash`
/// and `entry_hash` form the BLAKE3 hash chain so a tampered row fails verification
/// on reload. No mutation API is exposed anywhere in this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseEvent {
    pub id: Uuid,
    pub case_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub actor: Actor,
    pub action: String,
    pub payload: Value,
    pub previous_hash: Option<String>,
    pub entry_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageRun {
    pub id: Uuid,
    pub alert_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub final_risk: Option<AlertRisk>,
    pub reasons: Vec<String>,
    pub fallback_used: bool,
    pub total_duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTrace {
    pub run_id: Uuid,
    pub seq: u32,
    pub step: String,
    pub ok: bool,
    pub duration_ms: u64,
    pub detail: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbDoc {
    pub id: Uuid,
    pub title: String,
    pub tags: Vec<String>,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRow {
    pub id: Uuid,
    pub name: String,
    pub config: Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    FreezeCard,
    ContactCustomer,
    MarkFalsePositive,
}

/// Terminal outcome of a completed triage run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageResult {
    pub risk: AlertRisk,
    pub recommendation: Recommendation,
    pub reasons: Vec<String>,
    pub confidence: f32,
    pub steps: Vec<AgentStep>,
    pub fallback_used: bool,
    pub total_duration_ms: u64,
    pub requires_otp: bool,
}

/// The in-memory counterpart of `AgentTrace`, produced while a run is executing
/// and persisted as `AgentTrace` rows once the run completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStep {
    pub seq: u32,
    pub name: String,
    pub ok: bool,
    pub duration_ms: u64,
    pub outcome: StepOutcome,
}

/// Closed sum of every step's typed result. Serialized to JSON only at the
/// persistence boundary; the pipeline itself never treats these as opaque records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepOutcome {
    Profile {
        customer: Customer,
        card_count: u32,
        primary_account_balance_minor: i64,
        suspect_transaction: Option<Transaction>,
    },
    RecentTransactions {
        count: u32,
        total_spend_minor: i64,
        unique_merchants: u32,
        average_amount_minor: i64,
    },
    RiskSignals {
        signals: Vec<String>,
        score: f32,
        fallback: bool,
    },
    KbLookup {
        docs: Vec<KbDoc>,
    },
    Decision {
        result: Box<TriageResult>,
    },
    Error {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actor_label_distinguishes_system_and_operator() {
        assert_eq!(Actor::System.label(), "system");
        assert_eq!(Actor::Operator("agent-7".to_string()).label(), "agent-7");
    }

    #[test]
    fn step_outcome_round_trips_through_json() {
        let outcome = StepOutcome::RiskSignals {
            signals: vec!["high_velocity".to_string()],
            score: 0.25,
            fallback: false,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        let parsed: StepOutcome = serde_json::from_value(json).unwrap();
        match parsed {
            StepOutcome::RiskSignals { signals, .. } => {
                assert_eq!(signals, vec!["high_velocity".to_string()]);
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }
}
