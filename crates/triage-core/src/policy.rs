use crate::types::{AlertRisk, Recommendation};

/// Deterministic risk policy configuration for the `riskSignals` and `decide` steps.
///
/// All thresholds are exposed so tests and ops can reason about the mapping without
/// digging into the evaluation code; the defaults match the tuning this pipeline
/// ships with.
#[derive(Debug, Clone)]
pub struct RiskPolicyConfig {
    pub high_velocity_tx_count: u32,
    pub large_amount_minor: i64,
    pub merchant_concentration_unique_merchants: u32,
    pub merchant_concentration_min_tx_count: u32,
    pub high_risk_score: f32,
    pub medium_risk_score: f32,
    pub otp_kyc_level_threshold: u8,
}

impl Default for RiskPolicyConfig {
    fn default() -> Self {
        Self {
            high_velocity_tx_count: 15,
            large_amount_minor: 50_000,
            merchant_concentration_unique_merchants: 3,
            merchant_concentration_min_tx_count: 10,
            high_risk_score: 0.6,
            medium_risk_score: 0.3,
            otp_kyc_level_threshold: 3,
        }
    }
}

/// Inputs the `riskSignals` step derives its tags from.
#[derive(Debug, Clone)]
pub struct RiskSignalInputs {
    pub recent_tx_count: u32,
    pub suspect_amount_minor: Option<i64>,
    pub suspect_country: Option<String>,
    pub unique_merchant_count: u32,
}

/// Full decision for the terminal `decide` step.
#[derive(Debug, Clone)]
pub struct RiskDecision {
    pub risk: AlertRisk,
    pub recommendation: Recommendation,
    pub confidence: f32,
    pub reasons: Vec<String>,
    pub requires_otp_if_high_risk: bool,
}

/// Rule-based, deterministic risk policy engine: same inputs always yield the
/// same signals and the same decision. No probabilistic component anywhere.
#[derive(Debug, Clone)]
pub struct RiskPolicyEngine {
    config: RiskPolicyConfig,
}

impl RiskPolicyEngine {
    pub fn new(config: RiskPolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskPolicyConfig {
        &self.config
    }

    /// Derive risk signal tags and the aggregate score from profile + recent-tx data.
    pub fn risk_signals(&self, inputs: &RiskSignalInputs) -> (Vec<String>, f32) {
        let mut signals = Vec::new();

        if inputs.recent_tx_count > self.config.high_velocity_tx_count {
            signals.push("high_velocity".to_string());
        }

        if let Some(amount) = inputs.suspect_amount_minor {
            if amount > self.config.large_amount_minor {
                signals.push("large_amount".to_string());
            }
        }

        if let Some(country) = inputs.suspect_country.as_deref() {
            if country != "IN" {
                signals.push("foreign_transaction".to_string());
            }
        }

        if inputs.unique_merchant_count < self.config.merchant_concentration_unique_merchants
            && inputs.recent_tx_count > self.config.merchant_concentration_min_tx_count
        {
            signals.push("merchant_concentration".to_string());
        }

        let score = (0.25 * signals.len() as f32).min(1.0);
        (signals, score)
    }

    /// Map a `riskSignals` score (and its reasons) to the terminal decision.
    pub fn decide(&self, score: f32, signals: Vec<String>, kyc_level: u8) -> RiskDecision {
        let reasons = if signals.is_empty() {
            vec!["no_clear_risk".to_string()]
        } else {
            signals
        };

        let (risk, recommendation, confidence) = if score >= self.config.high_risk_score {
            (AlertRisk::High, Recommendation::FreezeCard, 0.92)
        } else if score >= self.config.medium_risk_score {
            (AlertRisk::Medium, Recommendation::ContactCustomer, 0.78)
        } else {
            (AlertRisk::Low, Recommendation::MarkFalsePositive, 0.65)
        };

        let requires_otp_if_high_risk = kyc_level < self.config.otp_kyc_level_threshold;

        RiskDecision {
            risk,
            recommendation,
            confidence,
            reasons,
            requires_otp_if_high_risk,
        }
    }

    /// `requires_otp = (risk == high) && (kyc_level < otp_kyc_level_threshold)`.
    pub fn requires_otp(&self, decision: &RiskDecision) -> bool {
        decision.risk == AlertRisk::High && decision.requires_otp_if_high_risk
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> RiskPolicyEngine {
        RiskPolicyEngine::new(RiskPolicyConfig::default())
    }

    #[test]
    fn high_velocity_triggers_signal() {
        let (signals, score) = engine().risk_signals(&RiskSignalInputs {
            recent_tx_count: 18,
            suspect_amount_minor: None,
            suspect_country: None,
            unique_merchant_count: 10,
        });
        assert!(signals.contains(&"high_velocity".to_string()));
        assert_eq!(score, 0.25);
    }

    #[test]
    fn high_velocity_plus_large_amount_plus_foreign_yields_high_risk() {
        let engine = engine();
        let (signals, score) = engine.risk_signals(&RiskSignalInputs {
            recent_tx_count: 18,
            suspect_amount_minor: Some(499_900),
            suspect_country: Some("US".to_string()),
            unique_merchant_count: 10,
        });
        assert_eq!(signals.len(), 3);
        assert!(score >= 0.6);

        let decision = engine.decide(score, signals, 2);
        assert_eq!(decision.risk, AlertRisk::High);
        assert_eq!(decision.recommendation, Recommendation::FreezeCard);
        assert!(engine.requires_otp(&decision));
    }

    #[test]
    fn no_signals_yields_low_risk_with_default_reason() {
        let engine = engine();
        let (signals, score) = engine.risk_signals(&RiskSignalInputs {
            recent_tx_count: 2,
            suspect_amount_minor: Some(500),
            suspect_country: Some("IN".to_string()),
            unique_merchant_count: 5,
        });
        assert!(signals.is_empty());

        let decision = engine.decide(score, signals, 3);
        assert_eq!(decision.risk, AlertRisk::Low);
        assert_eq!(decision.reasons, vec!["no_clear_risk".to_string()]);
    }

    #[test]
    fn high_kyc_level_does_not_require_otp() {
        let engine = engine();
        let decision = engine.decide(0.75, vec!["large_amount".to_string()], 3);
        assert!(!engine.requires_otp(&decision));
    }

    #[test]
    fn merchant_concentration_requires_both_conditions() {
        let engine = engine();
        let (signals, _) = engine.risk_signals(&RiskSignalInputs {
            recent_tx_count: 11,
            suspect_amount_minor: None,
            suspect_country: None,
            unique_merchant_count: 2,
        });
        assert!(signals.contains(&"merchant_concentration".to_string()));

        let (signals, _) = engine.risk_signals(&RiskSignalInputs {
            recent_tx_count: 5,
            suspect_amount_minor: None,
            suspect_country: None,
            unique_merchant_count: 2,
        });
        assert!(!signals.contains(&"merchant_concentration".to_string()));
    }
}
