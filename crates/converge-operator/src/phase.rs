// AgentRuntime phase machine.
//
// Pending → Starting → Ready ↔ Degraded → Terminating → Terminated.
// The phase is a pure function of deletion state, child readiness, and
// condition aggregation; Terminated is only reached once the finalizer
// has released the owned children.

use crate::conditions::{get_condition, Condition};
use crate::resources::AgentPhase;

/// Inputs the phase derives from.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseInputs<'a> {
    /// deletionTimestamp is set
    pub deleting: bool,
    /// Owned pods/Service are gone and the finalizer released
    pub children_released: bool,
    /// The agent pod reports ready
    pub pod_ready: bool,
    /// Phase observed on the previous pass
    pub previous: AgentPhase,
    pub conditions: Option<&'a [Condition]>,
}

/// Derive the current phase.
pub fn derive_phase(inputs: PhaseInputs<'_>) -> AgentPhase {
    if inputs.deleting {
        return if inputs.children_released {
            AgentPhase::Terminated
        } else {
            AgentPhase::Terminating
        };
    }
    let conditions = inputs.conditions.unwrap_or(&[]);
    let provider_bound = get_condition(conditions, "ProviderBound")
        .map(Condition::is_true)
        .unwrap_or(false);
    let pack_valid = get_condition(conditions, "PackContentValid")
        .map(Condition::is_true)
        .unwrap_or(false);

    if !provider_bound || !pack_valid {
        // Prerequisites broken: an agent that has served traffic degrades,
        // one that never became ready stays pending
        return match inputs.previous {
            AgentPhase::Ready | AgentPhase::Degraded => AgentPhase::Degraded,
            _ => AgentPhase::Pending,
        };
    }
    if inputs.pod_ready {
        AgentPhase::Ready
    } else {
        match inputs.previous {
            AgentPhase::Ready | AgentPhase::Degraded => AgentPhase::Degraded,
            _ => AgentPhase::Starting,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::ConditionStatus;

    fn conditions(provider: bool, pack: bool) -> Vec<Condition> {
        vec![
            Condition::new(
                "ProviderBound",
                if provider {
                    ConditionStatus::True
                } else {
                    ConditionStatus::False
                },
                "Test",
                "",
                1,
            ),
            Condition::new(
                "PackContentValid",
                if pack {
                    ConditionStatus::True
                } else {
                    ConditionStatus::False
                },
                "Test",
                "",
                1,
            ),
        ]
    }

    #[test]
    fn test_happy_path_progression() {
        // Fresh object with unresolved refs
        let phase = derive_phase(PhaseInputs {
            conditions: Some(&conditions(false, false)),
            ..Default::default()
        });
        assert_eq!(phase, AgentPhase::Pending);

        // Refs resolved, pod still coming up
        let phase = derive_phase(PhaseInputs {
            previous: AgentPhase::Pending,
            conditions: Some(&conditions(true, true)),
            ..Default::default()
        });
        assert_eq!(phase, AgentPhase::Starting);

        // Pod ready
        let phase = derive_phase(PhaseInputs {
            previous: AgentPhase::Starting,
            pod_ready: true,
            conditions: Some(&conditions(true, true)),
            ..Default::default()
        });
        assert_eq!(phase, AgentPhase::Ready);
    }

    #[test]
    fn test_ready_degrades_and_recovers() {
        // A previously ready agent loses its provider
        let phase = derive_phase(PhaseInputs {
            previous: AgentPhase::Ready,
            pod_ready: true,
            conditions: Some(&conditions(false, true)),
            ..Default::default()
        });
        assert_eq!(phase, AgentPhase::Degraded);

        // Provider restored
        let phase = derive_phase(PhaseInputs {
            previous: AgentPhase::Degraded,
            pod_ready: true,
            conditions: Some(&conditions(true, true)),
            ..Default::default()
        });
        assert_eq!(phase, AgentPhase::Ready);
    }

    #[test]
    fn test_pod_loss_degrades_ready_agent() {
        let phase = derive_phase(PhaseInputs {
            previous: AgentPhase::Ready,
            pod_ready: false,
            conditions: Some(&conditions(true, true)),
            ..Default::default()
        });
        assert_eq!(phase, AgentPhase::Degraded);
    }

    #[test]
    fn test_termination() {
        let phase = derive_phase(PhaseInputs {
            deleting: true,
            previous: AgentPhase::Ready,
            ..Default::default()
        });
        assert_eq!(phase, AgentPhase::Terminating);

        let phase = derive_phase(PhaseInputs {
            deleting: true,
            children_released: true,
            previous: AgentPhase::Terminating,
            ..Default::default()
        });
        assert_eq!(phase, AgentPhase::Terminated);
    }

    #[test]
    fn test_never_ready_agent_stays_pending_on_breakage() {
        let phase = derive_phase(PhaseInputs {
            previous: AgentPhase::Starting,
            conditions: Some(&conditions(true, false)),
            ..Default::default()
        });
        assert_eq!(phase, AgentPhase::Pending);
    }
}
