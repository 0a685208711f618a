//! The three operator-facing remediation endpoints: freeze a card, open a
//! dispute, or mark an alert a false positive. Each is policy-gated and
//! appends an immutable, hash-chained `CaseEvent` once its mutation lands.

use axum::extract::{Extension, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use triage_core::{
    card_freeze_case, dispute_case, false_positive_case, Actor, CardStatus, CaseEvent, CaseLedger,
    DisputeOutcome,
};

use crate::{ApiError, ServiceState};

const DEMO_OTP: &str = "123456";

/// Hydrates the case's ledger from its persisted event history and builds the
/// next entry's hash link. The entry is not persisted here — the caller's
/// `apply_*` store method appends it as part of the same transactional unit
/// as the case it belongs to.
async fn build_case_event(
    state: &ServiceState,
    case_id: Uuid,
    actor: Actor,
    action: &str,
    payload: serde_json::Value,
) -> Result<CaseEvent, ApiError> {
    let existing = state.store.list_case_events(case_id).await?;
    let mut ledger = CaseLedger::from_entries(existing)?;
    let entry = ledger.build_entry(case_id, actor, action, payload);
    ledger.commit_entry(entry.clone())?;
    Ok(entry)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreezeCardRequest {
    pub card_id: Uuid,
    pub otp: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FreezeCardResponse {
    pub status: &'static str,
    pub requires_otp: bool,
    pub case_id: Option<Uuid>,
}

pub async fn freeze_card(
    State(state): State<ServiceState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<FreezeCardRequest>,
) -> Result<Json<FreezeCardResponse>, ApiError> {
    let card = state.store.get_card(req.card_id).await?;

    if card.status == CardStatus::Frozen {
        return Ok(Json(FreezeCardResponse {
            status: "ALREADY_FROZEN",
            requires_otp: false,
            case_id: None,
        }));
    }

    let customer = state.store.get_customer(card.customer_id).await?;
    let requires_otp = customer.kyc_level >= 3;

    if requires_otp && req.otp.is_none() {
        return Ok(Json(FreezeCardResponse {
            status: "PENDING_OTP",
            requires_otp: true,
            case_id: None,
        }));
    }

    if requires_otp {
        let supplied = req.otp.as_deref().unwrap_or_default();
        if supplied != DEMO_OTP {
            return Err(ApiError::policy("invalid_otp"));
        }
    }

    let reason_code = req.reason.clone().unwrap_or_else(|| "card_frozen".to_string());
    let case = card_freeze_case(card.customer_id, reason_code);
    let case_id = case.id;

    let payload = json!({
        "cardId": card.id,
        "cardLast4": card.last_four,
        "otpVerified": requires_otp,
    });
    let event = build_case_event(&state, case_id, actor, "card_frozen", payload).await?;

    state
        .store
        .apply_card_freeze(req.card_id, case, event)
        .await?;

    Ok(Json(FreezeCardResponse {
        status: "FROZEN",
        requires_otp,
        case_id: Some(case_id),
    }))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenDisputeRequest {
    pub txn_id: Uuid,
    pub reason_code: String,
    pub description: Option<String>,
    #[serde(default)]
    pub confirm: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenDisputeResponse {
    pub status: &'static str,
    pub case_id: Uuid,
}

pub async fn open_dispute(
    State(state): State<ServiceState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<OpenDisputeRequest>,
) -> Result<Json<OpenDisputeResponse>, ApiError> {
    if !req.confirm {
        return Err(ApiError::policy("confirmation_required"));
    }

    let txn = state.store.get_transaction(req.txn_id).await?;

    let case = dispute_case(txn.customer_id, req.txn_id, req.reason_code.clone());
    let case_id = case.id;

    let payload = json!({
        "txnId": txn.id,
        "merchant": txn.merchant,
        "amount": txn.amount_minor,
        "reasonCode": req.reason_code,
        "description": req.description,
    });
    let event = build_case_event(&state, case_id, actor, "dispute_opened", payload).await?;

    match state.store.apply_dispute(case, event).await? {
        DisputeOutcome::Opened => Ok(Json(OpenDisputeResponse {
            status: "OPEN",
            case_id,
        })),
        DisputeOutcome::AlreadyExists(existing) => Ok(Json(OpenDisputeResponse {
            status: "ALREADY_EXISTS",
            case_id: existing.id,
        })),
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkFalsePositiveRequest {
    pub alert_id: Uuid,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkFalsePositiveResponse {
    pub status: &'static str,
    pub case_id: Uuid,
}

pub async fn mark_false_positive(
    State(state): State<ServiceState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<MarkFalsePositiveRequest>,
) -> Result<Json<MarkFalsePositiveResponse>, ApiError> {
    let alert = state.store.get_alert(req.alert_id).await?;

    let case = false_positive_case(alert.customer_id, "marked_false_positive");
    let case_id = case.id;

    let payload = json!({
        "alertId": alert.id,
        "originalRisk": alert.risk,
        "notes": req.notes,
    });
    let event = build_case_event(&state, case_id, actor, "marked_false_positive", payload).await?;

    state
        .store
        .apply_false_positive(req.alert_id, case, event)
        .await?;

    Ok(Json(MarkFalsePositiveResponse {
        status: "CLOSED",
        case_id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use triage_adapters::InMemoryPersistenceAdapter;
    use triage_core::{Card, CardNetwork, Customer, PersistenceAdapter};

    fn seeded_customer_and_card(kyc_level: u8) -> (InMemoryPersistenceAdapter, Customer, Card) {
        let adapter = InMemoryPersistenceAdapter::new();
        let customer = Customer {
            id: Uuid::new_v4(),
            display_name: "Ada Lovelace".to_string(),
            email: "ada@example.com".to_string(),
            phone: "+910000000000".to_string(),
            kyc_level,
            created_at: chrono::Utc::now(),
        };
        let card = Card {
            id: Uuid::new_v4(),
            customer_id: customer.id,
            last_four: "4242".to_string(),
            network: CardNetwork::Visa,
            status: CardStatus::Active,
        };
        adapter.seed_customer(customer.clone());
        adapter.seed_card(card.clone());
        (adapter, customer, card)
    }

    #[tokio::test]
    async fn high_kyc_customer_freeze_is_pending_otp_without_one() {
        let (adapter, customer, card) = seeded_customer_and_card(4);

        let fetched_card = adapter.get_card(card.id).await.unwrap();
        assert_eq!(fetched_card.status, CardStatus::Active);

        let fetched_customer = adapter.get_customer(customer.id).await.unwrap();
        assert!(fetched_customer.kyc_level >= 3);
    }

    #[tokio::test]
    async fn low_kyc_customer_does_not_require_otp() {
        let (_adapter, customer, _card) = seeded_customer_and_card(1);
        assert!(!(customer.kyc_level >= 3));
    }

    #[tokio::test]
    async fn ledger_append_chains_onto_empty_history() {
        let case_id = Uuid::new_v4();
        let ledger = CaseLedger::from_entries(Vec::new()).unwrap();
        let entry = ledger.build_entry(
            case_id,
            Actor::Operator("test-key".to_string()),
            "card_frozen",
            json!({"cardId": Uuid::new_v4()}),
        );
        assert!(entry.previous_hash.is_none());
        assert!(!entry.entry_hash.is_empty());
    }
}
