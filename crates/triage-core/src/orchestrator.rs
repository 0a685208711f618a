use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::time::timeout;
use uuid::Uuid;

use crate::events::{EventSink, RunRegistry, TriageEvent};
use crate::flow::TriageStageMachine;
use crate::metrics::Metrics;
use crate::policy::{RiskPolicyEngine, RiskSignalInputs};
use crate::storage::PersistenceAdapter;
use crate::types::{AgentStep, AgentTrace, StepOutcome, TriageResult, TriageRun};

const RETRY_BACKOFF_MS: [u64; 2] = [150, 400];
const RETRY_ATTEMPTS: usize = 2;
const PER_STEP_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_GLOBAL_DEADLINE: Duration = Duration::from_secs(10);

/// Opt-in testing facility that makes a named step fail deterministically. Off by
/// default; never embedded in `riskSignals` or any other step's own logic.
#[derive(Debug, Clone, Default)]
pub struct FaultInjector {
    pub fail_step: Option<String>,
    pub fail_attempts: usize,
}

impl FaultInjector {
    pub fn should_fail(&self, step: &str, attempt_index: usize) -> bool {
        self.fail_step.as_deref() == Some(step) && attempt_index < self.fail_attempts
    }
}

#[derive(Debug, Clone)]
pub struct TriageEngineConfig {
    pub per_step_timeout: Duration,
    pub global_deadline: Duration,
    pub fault_injector: FaultInjector,
}

impl Default for TriageEngineConfig {
    fn default() -> Self {
        Self {
            per_step_timeout: PER_STEP_TIMEOUT,
            global_deadline: DEFAULT_GLOBAL_DEADLINE,
            fault_injector: FaultInjector::default(),
        }
    }
}

/// The step pipeline: retries, fallback, per-step timing, and persistence of the
/// trace. One instance is constructed per run by `TriageEngine::start`.
pub struct TriageEngine<P: PersistenceAdapter> {
    store: Arc<P>,
    policy: RiskPolicyEngine,
    registry: RunRegistry,
    config: TriageEngineConfig,
    metrics: Option<Arc<Metrics>>,
}

impl<P: PersistenceAdapter + 'static> TriageEngine<P> {
    pub fn new(
        store: Arc<P>,
        policy: RiskPolicyEngine,
        registry: RunRegistry,
        config: TriageEngineConfig,
    ) -> Self {
        Self {
            store,
            policy,
            registry,
            config,
            metrics: None,
        }
    }

    /// Attach the process-wide metrics registry so completed/failed run counts,
    /// per-step duration, and fallback invocations are recorded on `/metrics`.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Register a new run and spawn its execution. Returns immediately with the
    /// fresh run-id; the pipeline itself runs asynchronously on the Tokio runtime.
    pub fn start(self: &Arc<Self>, alert_id: Uuid) -> Uuid {
        let handle = self.registry.register(alert_id);
        let run_id = handle.run_id;
        let engine = self.clone();

        tokio::spawn(async move {
            engine.run(run_id, alert_id, handle).await;
        });

        run_id
    }

    async fn run(self: Arc<Self>, run_id: Uuid, alert_id: Uuid, handle: Arc<crate::events::RunHandle>) {
        let sink = handle.sink.clone();
        let start_instant = tokio::time::Instant::now();
        let mut stage = TriageStageMachine::new(run_id.to_string());
        let mut steps: Vec<AgentStep> = Vec::new();
        let mut seq: u32 = 0;

        sink.publish(TriageEvent::Start { run_id, alert_id });

        let outcome = timeout(self.config.global_deadline, self.execute_pipeline(
            run_id,
            alert_id,
            &mut stage,
            &mut steps,
            &mut seq,
            &sink,
        ))
        .await;

        let total_duration_ms = start_instant.elapsed().as_millis() as u64;

        if let Some(metrics) = &self.metrics {
            for step in &steps {
                metrics
                    .triage_step_duration_ms
                    .with_label_values(&[&step.name])
                    .observe(step.duration_ms as f64);
                if step.name.ends_with("_fallback") {
                    let base_name = step.name.trim_end_matches("_fallback");
                    metrics
                        .triage_fallback_total
                        .with_label_values(&[base_name])
                        .inc();
                }
            }
        }

        let terminal = match outcome {
            Ok(Ok(mut result)) => {
                result.total_duration_ms = total_duration_ms;
                self.persist_completed(run_id, alert_id, &result, &steps, total_duration_ms)
                    .await;
                if let Some(metrics) = &self.metrics {
                    metrics.triage_runs_completed_total.inc();
                }
                TriageEvent::Complete {
                    result: Box::new(result),
                }
            }
            Ok(Err(message)) => {
                self.persist_failed(run_id, alert_id, &steps, total_duration_ms)
                    .await;
                if let Some(metrics) = &self.metrics {
                    metrics.triage_runs_failed_total.inc();
                }
                TriageEvent::Error { message }
            }
            Err(_) => {
                self.persist_failed(run_id, alert_id, &steps, total_duration_ms)
                    .await;
                if let Some(metrics) = &self.metrics {
                    metrics.triage_runs_failed_total.inc();
                }
                TriageEvent::Error {
                    message: "global deadline exceeded".to_string(),
                }
            }
        };

        let frame = crate::events::TriageEventFrame::new(terminal);
        handle.record_terminal(frame.clone());
        sink.publish(frame.event);
    }

    async fn execute_pipeline(
        &self,
        _run_id: Uuid,
        alert_id: Uuid,
        stage: &mut TriageStageMachine,
        steps: &mut Vec<AgentStep>,
        seq: &mut u32,
        sink: &EventSink,
    ) -> Result<TriageResult, String> {
        // Step 1: getProfile. Terminal failure ends the run — there is nothing
        // meaningful to triage without the alert and its owning customer.
        let alert = self
            .store
            .get_alert(alert_id)
            .await
            .map_err(|e| e.to_string())?;
        let customer = self
            .store
            .get_customer(alert.customer_id)
            .await
            .map_err(|e| e.to_string())?;
        let cards = self
            .store
            .list_cards_for_customer(alert.customer_id)
            .await
            .map_err(|e| e.to_string())?;
        let primary_balance = self
            .store
            .primary_account_balance_minor(alert.customer_id)
            .await
            .map_err(|e| e.to_string())?;
        let suspect_transaction = match alert.suspect_transaction_id {
            Some(txn_id) => Some(
                self.store
                    .get_transaction(txn_id)
                    .await
                    .map_err(|e| e.to_string())?,
            ),
            None => None,
        };

        stage.mark_profile().map_err(|e| e.to_string())?;
        self.record_step(
            steps,
            seq,
            sink,
            "getProfile",
            true,
            0,
            StepOutcome::Profile {
                customer: customer.clone(),
                card_count: cards.len() as u32,
                primary_account_balance_minor: primary_balance,
                suspect_transaction: suspect_transaction.clone(),
            },
        );

        // Step 2: recentTransactions.
        let recent = self
            .store
            .recent_transactions(alert.customer_id, 20)
            .await
            .map_err(|e| e.to_string())?;
        let count = recent.len() as u32;
        let total_spend: i64 = recent.iter().map(|t| t.amount_minor).sum();
        let unique_merchants = recent
            .iter()
            .map(|t| t.merchant.as_str())
            .collect::<std::collections::HashSet<_>>()
            .len() as u32;
        let average_amount = if count > 0 { total_spend / count as i64 } else { 0 };

        stage.mark_recent_transactions().map_err(|e| e.to_string())?;
        self.record_step(
            steps,
            seq,
            sink,
            "recentTransactions",
            true,
            0,
            StepOutcome::RecentTransactions {
                count,
                total_spend_minor: total_spend,
                unique_merchants,
                average_amount_minor: average_amount,
            },
        );

        // Step 3: riskSignals, wrapped in the retry+fallback envelope.
        let inputs = RiskSignalInputs {
            recent_tx_count: count,
            suspect_amount_minor: suspect_transaction.as_ref().map(|t| t.amount_minor),
            suspect_country: suspect_transaction.as_ref().map(|t| t.country.clone()),
            unique_merchant_count: unique_merchants,
        };

        let (signals, score, fallback_used) =
            self.risk_signals_with_envelope(inputs, steps, seq, sink).await;

        stage.mark_risk_signals().map_err(|e| e.to_string())?;

        // Step 4: kbLookup. Purely informational; never fails the run.
        let docs = self.store.list_kb_docs(2).await.unwrap_or_default();
        stage.mark_kb_lookup().map_err(|e| e.to_string())?;
        self.record_step(
            steps,
            seq,
            sink,
            "kbLookup",
            true,
            0,
            StepOutcome::KbLookup { docs },
        );

        // Step 5: decide.
        let decision = self.policy.decide(score, signals, customer.kyc_level);
        stage.mark_decision().map_err(|e| e.to_string())?;

        let requires_otp = self.policy.requires_otp(&decision);
        let result = TriageResult {
            risk: decision.risk,
            recommendation: decision.recommendation,
            reasons: decision.reasons,
            confidence: decision.confidence,
            steps: steps.clone(),
            fallback_used,
            total_duration_ms: 0,
            requires_otp,
        };

        self.record_step(
            steps,
            seq,
            sink,
            "decide",
            true,
            0,
            StepOutcome::Decision {
                result: Box::new(result.clone()),
            },
        );

        Ok(result)
    }

    async fn risk_signals_with_envelope(
        &self,
        inputs: RiskSignalInputs,
        steps: &mut Vec<AgentStep>,
        seq: &mut u32,
        sink: &EventSink,
    ) -> (Vec<String>, f32, bool) {
        let mut last_error = String::new();

        for attempt in 0..=RETRY_ATTEMPTS {
            if attempt > 0 {
                sink.publish(TriageEvent::Retry {
                    step: "riskSignals".to_string(),
                    attempt: attempt as u32,
                });
                tokio::time::sleep(Duration::from_millis(
                    RETRY_BACKOFF_MS[(attempt - 1).min(RETRY_BACKOFF_MS.len() - 1)],
                ))
                .await;
            }

            let step_result = timeout(
                self.config.per_step_timeout,
                self.run_risk_signals_attempt(&inputs, attempt),
            )
            .await;

            match step_result {
                Ok(Ok((signals, score))) => {
                    self.record_step(
                        steps,
                        seq,
                        sink,
                        "riskSignals",
                        true,
                        0,
                        StepOutcome::RiskSignals {
                            signals: signals.clone(),
                            score,
                            fallback: false,
                        },
                    );
                    return (signals, score, false);
                }
                Ok(Err(message)) => {
                    last_error = message;
                    self.record_step(
                        steps,
                        seq,
                        sink,
                        "riskSignals",
                        false,
                        0,
                        StepOutcome::Error {
                            message: last_error.clone(),
                        },
                    );
                }
                Err(_) => {
                    last_error = "riskSignals step timed out".to_string();
                    self.record_step(
                        steps,
                        seq,
                        sink,
                        "riskSignals",
                        false,
                        self.config.per_step_timeout.as_millis() as u64,
                        StepOutcome::Error {
                            message: last_error.clone(),
                        },
                    );
                }
            }
        }

        sink.publish(TriageEvent::Fallback {
            step: "riskSignals".to_string(),
            last_error: last_error.clone(),
        });

        let fallback_signals = vec!["service_unavailable".to_string()];
        let fallback_score = 0.5_f32;
        self.record_step(
            steps,
            seq,
            sink,
            "riskSignals_fallback",
            true,
            0,
            StepOutcome::RiskSignals {
                signals: fallback_signals.clone(),
                score: fallback_score,
                fallback: true,
            },
        );

        (fallback_signals, fallback_score, true)
    }

    async fn run_risk_signals_attempt(
        &self,
        inputs: &RiskSignalInputs,
        attempt: usize,
    ) -> Result<(Vec<String>, f32), String> {
        if self.config.fault_injector.should_fail("riskSignals", attempt) {
            return Err("injected fault".to_string());
        }
        Ok(self.policy.risk_signals(inputs))
    }

    fn record_step(
        &self,
        steps: &mut Vec<AgentStep>,
        seq: &mut u32,
        sink: &EventSink,
        name: &str,
        ok: bool,
        duration_ms: u64,
        outcome: StepOutcome,
    ) {
        let detail = serde_json::to_value(&outcome).unwrap_or(json!({}));
        sink.publish(TriageEvent::Step {
            name: name.to_string(),
            ok,
            duration_ms,
            result: if ok { Some(detail.clone()) } else { None },
            error: if ok { None } else { detail.get("message").and_then(|v| v.as_str()).map(String::from) },
        });

        steps.push(AgentStep {
            seq: *seq,
            name: name.to_string(),
            ok,
            duration_ms,
            outcome,
        });
        *seq += 1;
    }

    async fn persist_completed(
        &self,
        run_id: Uuid,
        alert_id: Uuid,
        result: &TriageResult,
        steps: &[AgentStep],
        total_duration_ms: u64,
    ) {
        let run = TriageRun {
            id: run_id,
            alert_id,
            started_at: Utc::now(),
            ended_at: Some(Utc::now()),
            final_risk: Some(result.risk),
            reasons: result.reasons.clone(),
            fallback_used: result.fallback_used,
            total_duration_ms,
        };
        let traces = to_agent_traces(run_id, steps);
        if let Err(err) = self.store.insert_triage_run(run, traces).await {
            tracing::error!(run_id = %run_id, error = %err, "failed to persist completed triage run");
        }
    }

    async fn persist_failed(
        &self,
        run_id: Uuid,
        alert_id: Uuid,
        steps: &[AgentStep],
        total_duration_ms: u64,
    ) {
        let run = TriageRun {
            id: run_id,
            alert_id,
            started_at: Utc::now(),
            ended_at: Some(Utc::now()),
            final_risk: None,
            reasons: Vec::new(),
            fallback_used: steps.iter().any(|s| s.name.ends_with("_fallback")),
            total_duration_ms,
        };
        let traces = to_agent_traces(run_id, steps);
        if let Err(err) = self.store.insert_triage_run(run, traces).await {
            tracing::error!(run_id = %run_id, error = %err, "failed to persist aborted triage run");
        }
    }
}

fn to_agent_traces(run_id: Uuid, steps: &[AgentStep]) -> Vec<AgentTrace> {
    steps
        .iter()
        .map(|step| AgentTrace {
            run_id,
            seq: step.seq,
            step: step.name.clone(),
            ok: step.ok,
            duration_ms: step.duration_ms,
            detail: serde_json::to_value(&step.outcome).unwrap_or(json!({})),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TriageError as Err_;
    use crate::policy::RiskPolicyConfig;
    use crate::types::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeStore {
        alert: Alert,
        customer: Customer,
        suspect: Transaction,
        recent: Vec<Transaction>,
        persisted: Mutex<Vec<TriageRun>>,
    }

    #[async_trait]
    impl PersistenceAdapter for FakeStore {
        async fn get_customer(&self, _id: Uuid) -> Result<Customer, Err_> {
            Ok(self.customer.clone())
        }
        async fn list_open_alerts(&self, _limit: u32) -> Result<Vec<(Alert, Customer)>, Err_> {
            Ok(vec![])
        }
        async fn get_alert(&self, _id: Uuid) -> Result<Alert, Err_> {
            Ok(self.alert.clone())
        }
        async fn set_alert_status(&self, _id: Uuid, _status: AlertStatus) -> Result<(), Err_> {
            Ok(())
        }
        async fn list_cards_for_customer(&self, _id: Uuid) -> Result<Vec<Card>, Err_> {
            Ok(vec![])
        }
        async fn get_card(&self, _id: Uuid) -> Result<Card, Err_> {
            Err(Err_::NotFound("card".to_string()))
        }
        async fn set_card_status(&self, _id: Uuid, _status: CardStatus) -> Result<(), Err_> {
            Ok(())
        }
        async fn list_accounts_for_customer(&self, _id: Uuid) -> Result<Vec<Account>, Err_> {
            Ok(vec![])
        }
        async fn primary_account_balance_minor(&self, _id: Uuid) -> Result<i64, Err_> {
            Ok(10_000)
        }
        async fn get_transaction(&self, _id: Uuid) -> Result<Transaction, Err_> {
            Ok(self.suspect.clone())
        }
        async fn recent_transactions(&self, _id: Uuid, _limit: u32) -> Result<Vec<Transaction>, Err_> {
            Ok(self.recent.clone())
        }
        async fn paginate_transactions(
            &self,
            _id: Uuid,
            _query: crate::storage::TransactionQuery,
        ) -> Result<crate::storage::TransactionPage, Err_> {
            Ok(crate::storage::TransactionPage {
                items: vec![],
                next_cursor: None,
                has_more: false,
            })
        }
        async fn insert_transactions(&self, _transactions: Vec<Transaction>) -> Result<(), Err_> {
            Ok(())
        }
        async fn list_kb_docs(&self, _limit: u32) -> Result<Vec<KbDoc>, Err_> {
            Ok(vec![])
        }
        async fn insert_triage_run(&self, run: TriageRun, _traces: Vec<AgentTrace>) -> Result<(), Err_> {
            self.persisted.lock().unwrap().push(run);
            Ok(())
        }
        async fn find_open_dispute_for_transaction(&self, _id: Uuid) -> Result<Option<Case>, Err_> {
            Ok(None)
        }
        async fn insert_case(&self, _case: Case) -> Result<(), Err_> {
            Ok(())
        }
        async fn append_case_event(&self, _event: CaseEvent) -> Result<(), Err_> {
            Ok(())
        }
        async fn list_case_events(&self, _case_id: Uuid) -> Result<Vec<CaseEvent>, Err_> {
            Ok(vec![])
        }
        async fn apply_card_freeze(
            &self,
            _card_id: Uuid,
            _case: Case,
            _event: CaseEvent,
        ) -> Result<(), Err_> {
            Ok(())
        }
        async fn apply_dispute(
            &self,
            _case: Case,
            _event: CaseEvent,
        ) -> Result<crate::storage::DisputeOutcome, Err_> {
            Ok(crate::storage::DisputeOutcome::Opened)
        }
        async fn apply_false_positive(
            &self,
            _alert_id: Uuid,
            _case: Case,
            _event: CaseEvent,
        ) -> Result<(), Err_> {
            Ok(())
        }
        async fn ensure_schema(&self) -> Result<(), Err_> {
            Ok(())
        }
    }

    fn high_velocity_store() -> FakeStore {
        let customer_id = Uuid::new_v4();
        let suspect_id = Uuid::new_v4();
        let customer = Customer {
            id: customer_id,
            display_name: "Jane Doe".to_string(),
            email: "jane@example.com".to_string(),
            phone: "+911234567890".to_string(),
            kyc_level: 2,
            created_at: Utc::now(),
        };
        let suspect = Transaction {
            id: suspect_id,
            customer_id,
            card_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            amount_minor: 499_900,
            merchant: "Foreign Merchant".to_string(),
            mcc: "5812".to_string(),
            currency: "INR".to_string(),
            device_id: None,
            city: None,
            country: "US".to_string(),
            status: TransactionStatus::Posted,
        };
        let alert = Alert {
            id: Uuid::new_v4(),
            customer_id,
            suspect_transaction_id: Some(suspect_id),
            risk: AlertRisk::High,
            status: AlertStatus::Open,
            reason_tag: "velocity".to_string(),
            created_at: Utc::now(),
        };
        let recent = (0..18)
            .map(|i| Transaction {
                id: Uuid::new_v4(),
                customer_id,
                card_id: Uuid::new_v4(),
                timestamp: Utc::now(),
                amount_minor: 1000 + i,
                merchant: format!("Merchant {}", i % 2),
                mcc: "5411".to_string(),
                currency: "INR".to_string(),
                device_id: None,
                city: None,
                country: "IN".to_string(),
                status: TransactionStatus::Posted,
            })
            .collect();

        FakeStore {
            alert,
            customer,
            suspect,
            recent,
            persisted: Mutex::new(Vec::new()),
        }
    }

    #[tokio::test]
    async fn high_velocity_run_yields_high_risk_and_freeze_recommendation() {
        let store = Arc::new(high_velocity_store());
        let policy = RiskPolicyEngine::new(RiskPolicyConfig::default());
        let registry = RunRegistry::new();
        let engine = Arc::new(TriageEngine::new(
            store.clone(),
            policy,
            registry.clone(),
            TriageEngineConfig::default(),
        ));

        let alert_id = store.alert.id;
        let run_id = engine.start(alert_id);

        let handle = registry.get(run_id).expect("run registered");
        let mut rx = handle.sink.subscribe();

        let mut result = None;
        for _ in 0..20 {
            if let Ok(frame) = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
                let frame = frame.unwrap();
                if let TriageEvent::Complete { result: r } = frame.event {
                    result = Some(*r);
                    break;
                }
            }
        }

        let result = result.expect("run completed");
        assert_eq!(result.risk, AlertRisk::High);
        assert_eq!(result.recommendation, Recommendation::FreezeCard);
        assert!(result.reasons.contains(&"high_velocity".to_string()));
        assert!(result.reasons.contains(&"large_amount".to_string()));
        assert!(result.reasons.contains(&"foreign_transaction".to_string()));
        assert!(result.total_duration_ms > 0);
    }

    #[tokio::test]
    async fn completed_run_increments_metrics() {
        let store = Arc::new(high_velocity_store());
        let policy = RiskPolicyEngine::new(RiskPolicyConfig::default());
        let registry = RunRegistry::new();
        let metrics = Arc::new(crate::metrics::Metrics::new());
        let engine = Arc::new(
            TriageEngine::new(
                store.clone(),
                policy,
                registry.clone(),
                TriageEngineConfig::default(),
            )
            .with_metrics(metrics.clone()),
        );

        let alert_id = store.alert.id;
        let run_id = engine.start(alert_id);
        let handle = registry.get(run_id).expect("run registered");
        let mut rx = handle.sink.subscribe();

        loop {
            let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("run completes before timeout")
                .unwrap();
            if frame.event.is_terminal() {
                break;
            }
        }

        assert_eq!(metrics.triage_runs_completed_total.get(), 1);
        assert_eq!(metrics.triage_runs_failed_total.get(), 0);
        let rendered = metrics.render();
        assert!(rendered.contains("triage_step_duration_ms"));
    }
}
