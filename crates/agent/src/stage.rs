//! Intake stages
//!
//! Stages walk the intake fields in a fixed order. A stage is done when
//! none of its fields are outstanding; `Clarifying` is tracked as a
//! sub-state on top of whichever stage owns the failing field.

use serde::{Deserialize, Serialize};

use crate::intake::FieldKey;
use crate::AgentError;

/// Intake stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum IntakeStage {
    #[default]
    Greeting,
    CollectingName,
    CollectingDob,
    CollectingInsurance,
    CollectingReferral,
    CollectingComplaint,
    CollectingAddress,
    CollectingContact,
    OfferingSlots,
    Confirming,
    Complete,
}

impl IntakeStage {
    /// Collection stages in intake order
    pub const COLLECTING: [IntakeStage; 8] = [
        IntakeStage::CollectingName,
        IntakeStage::CollectingDob,
        IntakeStage::CollectingInsurance,
        IntakeStage::CollectingReferral,
        IntakeStage::CollectingComplaint,
        IntakeStage::CollectingAddress,
        IntakeStage::CollectingContact,
        IntakeStage::OfferingSlots,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            IntakeStage::Greeting => "Greeting",
            IntakeStage::CollectingName => "Collecting Name",
            IntakeStage::CollectingDob => "Collecting Date of Birth",
            IntakeStage::CollectingInsurance => "Collecting Insurance",
            IntakeStage::CollectingReferral => "Collecting Referral",
            IntakeStage::CollectingComplaint => "Collecting Complaint",
            IntakeStage::CollectingAddress => "Collecting Address",
            IntakeStage::CollectingContact => "Collecting Contact",
            IntakeStage::OfferingSlots => "Offering Slots",
            IntakeStage::Confirming => "Confirming",
            IntakeStage::Complete => "Complete",
        }
    }

    /// Fields collected in this stage
    pub fn fields(&self) -> &'static [FieldKey] {
        match self {
            IntakeStage::CollectingName => &[FieldKey::FirstName, FieldKey::LastName],
            IntakeStage::CollectingDob => &[FieldKey::DateOfBirth],
            IntakeStage::CollectingInsurance => &[FieldKey::PayerName, FieldKey::InsuranceId],
            IntakeStage::CollectingReferral => &[FieldKey::Referral, FieldKey::ReferringPhysician],
            IntakeStage::CollectingComplaint => &[FieldKey::ChiefComplaint],
            IntakeStage::CollectingAddress => &[FieldKey::Address],
            IntakeStage::CollectingContact => &[FieldKey::Phone, FieldKey::Email],
            IntakeStage::OfferingSlots => &[FieldKey::AppointmentSlot],
            IntakeStage::Greeting | IntakeStage::Confirming | IntakeStage::Complete => &[],
        }
    }

    /// The stage that owns a field
    pub fn for_field(key: FieldKey) -> IntakeStage {
        match key {
            FieldKey::FirstName | FieldKey::LastName => IntakeStage::CollectingName,
            FieldKey::DateOfBirth => IntakeStage::CollectingDob,
            FieldKey::PayerName | FieldKey::InsuranceId => IntakeStage::CollectingInsurance,
            FieldKey::Referral | FieldKey::ReferringPhysician => IntakeStage::CollectingReferral,
            FieldKey::ChiefComplaint => IntakeStage::CollectingComplaint,
            FieldKey::Address => IntakeStage::CollectingAddress,
            FieldKey::Phone | FieldKey::Email => IntakeStage::CollectingContact,
            FieldKey::AppointmentSlot => IntakeStage::OfferingSlots,
        }
    }

    pub fn is_collecting(&self) -> bool {
        !self.fields().is_empty()
    }

    /// Get all valid transitions from this stage
    pub fn valid_transitions(&self) -> Vec<IntakeStage> {
        match self {
            IntakeStage::Greeting => vec![IntakeStage::CollectingName],
            IntakeStage::Confirming => {
                let mut stages = Self::COLLECTING.to_vec();
                stages.push(IntakeStage::Complete);
                stages
            }
            IntakeStage::Complete => vec![],
            collecting => {
                let position = Self::COLLECTING
                    .iter()
                    .position(|s| s == collecting)
                    .unwrap_or(Self::COLLECTING.len());
                let mut stages: Vec<IntakeStage> = Self::COLLECTING[position + 1..].to_vec();
                stages.push(IntakeStage::Confirming);
                stages
            }
        }
    }
}

/// Stage transition
#[derive(Debug, Clone, PartialEq)]
pub struct StageTransition {
    pub from: IntakeStage,
    pub to: IntakeStage,
    pub reason: TransitionReason,
}

/// Reason for stage transition
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionReason {
    /// Call started
    Started,
    /// Every field of the previous stage settled
    StageCompleted,
    /// Caller asked to change a field during readback
    Correction(FieldKey),
    /// Caller confirmed the readback
    Confirmed,
}

/// Tracks the current stage, the clarifying sub-state and transition history
#[derive(Debug, Default)]
pub struct StageManager {
    current: IntakeStage,
    clarifying: Option<FieldKey>,
    history: Vec<StageTransition>,
}

impl StageManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> IntakeStage {
        self.current
    }

    /// Field currently being re-asked, if any
    pub fn clarifying(&self) -> Option<FieldKey> {
        self.clarifying
    }

    pub fn enter_clarifying(&mut self, key: FieldKey) {
        if self.clarifying != Some(key) {
            tracing::debug!(stage = self.current.display_name(), field = key.name(), "Clarifying");
        }
        self.clarifying = Some(key);
    }

    pub fn clear_clarifying(&mut self) {
        self.clarifying = None;
    }

    /// Move to a new stage. Staying in place is a no-op.
    pub fn transition(&mut self, to: IntakeStage, reason: TransitionReason) -> Result<Option<StageTransition>, AgentError> {
        let from = self.current;
        if to == from {
            return Ok(None);
        }
        if !from.valid_transitions().contains(&to) {
            return Err(AgentError::InvalidTransition { from, to });
        }

        let transition = StageTransition { from, to, reason };
        tracing::debug!(from = from.display_name(), to = to.display_name(), "Stage transition");
        self.current = to;
        self.clarifying = None;
        self.history.push(transition.clone());
        Ok(Some(transition))
    }

    pub fn history(&self) -> &[StageTransition] {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_transitions() {
        let mut manager = StageManager::new();
        assert_eq!(manager.current(), IntakeStage::Greeting);

        let result = manager.transition(IntakeStage::CollectingName, TransitionReason::Started);
        assert!(result.unwrap().is_some());
        assert_eq!(manager.current(), IntakeStage::CollectingName);

        // staying put records nothing
        let result = manager.transition(IntakeStage::CollectingName, TransitionReason::StageCompleted);
        assert!(result.unwrap().is_none());
        assert_eq!(manager.history().len(), 1);
    }

    #[test]
    fn test_invalid_transition() {
        let mut manager = StageManager::new();
        let result = manager.transition(IntakeStage::Complete, TransitionReason::Confirmed);
        assert!(matches!(result, Err(AgentError::InvalidTransition { .. })));

        manager.transition(IntakeStage::CollectingName, TransitionReason::Started).unwrap();
        manager
            .transition(IntakeStage::CollectingDob, TransitionReason::StageCompleted)
            .unwrap();
        // no going backwards outside of a correction
        let result = manager.transition(IntakeStage::CollectingName, TransitionReason::StageCompleted);
        assert!(result.is_err());
    }

    #[test]
    fn test_confirming_reaches_any_collecting_stage() {
        let transitions = IntakeStage::Confirming.valid_transitions();
        for stage in IntakeStage::COLLECTING {
            assert!(transitions.contains(&stage));
        }
        assert!(transitions.contains(&IntakeStage::Complete));
        assert!(IntakeStage::Complete.valid_transitions().is_empty());
    }

    #[test]
    fn test_every_field_has_one_stage() {
        for key in FieldKey::ALL {
            let stage = IntakeStage::for_field(key);
            assert!(stage.fields().contains(&key));
        }
    }

    #[test]
    fn test_clarifying_cleared_on_transition() {
        let mut manager = StageManager::new();
        manager.transition(IntakeStage::CollectingName, TransitionReason::Started).unwrap();
        manager.enter_clarifying(FieldKey::FirstName);
        assert_eq!(manager.clarifying(), Some(FieldKey::FirstName));

        manager
            .transition(IntakeStage::CollectingDob, TransitionReason::StageCompleted)
            .unwrap();
        assert_eq!(manager.clarifying(), None);
    }
}
