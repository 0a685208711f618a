use crate::error::TriageError;

/// Strict execution stages for a triage run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriageStage {
    Initialized,
    Profile,
    RecentTransactions,
    RiskSignals,
    KbLookup,
    Decision,
}

impl TriageStage {
    pub fn name(self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Profile => "profile",
            Self::RecentTransactions => "recent_transactions",
            Self::RiskSignals => "risk_signals",
            Self::KbLookup => "kb_lookup",
            Self::Decision => "decision",
        }
    }
}

/// Enforces getProfile->recentTransactions->riskSignals->kbLookup->decide ordering.
///
/// No step may be skipped or reordered; every transition is explicit so a missing
/// upstream call fails loudly instead of silently producing a partial decision.
#[derive(Debug, Clone)]
pub struct TriageStageMachine {
    run_id: String,
    stage: TriageStage,
}

impl TriageStageMachine {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            stage: TriageStage::Initialized,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn stage(&self) -> TriageStage {
        self.stage
    }

    pub fn mark_profile(&mut self) -> Result<(), TriageError> {
        self.advance(TriageStage::Initialized, TriageStage::Profile)
    }

    pub fn mark_recent_transactions(&mut self) -> Result<(), TriageError> {
        self.advance(TriageStage::Profile, TriageStage::RecentTransactions)
    }

    pub fn mark_risk_signals(&mut self) -> Result<(), TriageError> {
        self.advance(TriageStage::RecentTransactions, TriageStage::RiskSignals)
    }

    pub fn mark_kb_lookup(&mut self) -> Result<(), TriageError> {
        self.advance(TriageStage::RiskSignals, TriageStage::KbLookup)
    }

    pub fn mark_decision(&mut self) -> Result<(), TriageError> {
        self.advance(TriageStage::KbLookup, TriageStage::Decision)
    }

    fn advance(
        &mut self,
        expected_current: TriageStage,
        next: TriageStage,
    ) -> Result<(), TriageError> {
        if self.stage != expected_current {
            return Err(TriageError::stage_violation(
                expected_current.name(),
                self.stage.name(),
            ));
        }
        self.stage = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enforces_stage_order() {
        let mut machine = TriageStageMachine::new("run-a");
        assert!(machine.mark_profile().is_ok());
        assert!(machine.mark_recent_transactions().is_ok());
        assert!(machine.mark_risk_signals().is_ok());
        assert!(machine.mark_kb_lookup().is_ok());
        assert!(machine.mark_decision().is_ok());
    }

    #[test]
    fn rejects_skipping_risk_signals() {
        let mut machine = TriageStageMachine::new("run-b");
        machine.mark_profile().unwrap();

        let err = machine.mark_kb_lookup().unwrap_err();
        assert!(err
            .to_string()
            .contains("expected 'risk_signals', got 'profile'"));
    }
}
