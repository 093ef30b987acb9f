//! Lifecycle phases of one supervised run.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Phase of a run as tracked by the supervisor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunPhase {
    /// Context accepted, nothing acquired yet.
    #[default]
    Init,
    /// Execution environment being acquired.
    AcquiringResource,
    /// Worker spawned, relay being drained.
    Running,
    /// Worker complete; remaining relay contents and the result being collected.
    Draining,
    /// Artifacts being compared against the run start.
    Reconciling,
    /// Final result being computed and the terminal event emitted.
    Finalizing,
    /// Terminal event yielded; release scheduled.
    Closed,
    /// Unhandled failure; a terminal error event follows.
    Failed,
}

impl RunPhase {
    /// Returns true once the run can no longer emit events.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Returns true if `next` is a legal successor of this phase.
    pub fn can_transition_to(&self, next: RunPhase) -> bool {
        use RunPhase::*;
        match (self, next) {
            (Closed, _) => false,
            (Failed, Closed) => true,
            (Failed, _) => false,
            (_, Failed) => true,
            (Init, AcquiringResource) => true,
            // Acquisition failures skip straight to Closed.
            (AcquiringResource, Running | Closed) => true,
            (Running, Draining) => true,
            (Draining, Reconciling) => true,
            (Reconciling, Finalizing) => true,
            (Finalizing, Closed) => true,
            _ => false,
        }
    }

    /// Move to `next`, rejecting illegal transitions.
    pub fn advance(&mut self, next: RunPhase) -> Result<(), CoreError> {
        if !self.can_transition_to(next) {
            return Err(CoreError::InvalidStateTransition {
                from: self.to_string(),
                to: next.to_string(),
            });
        }
        *self = next;
        Ok(())
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::AcquiringResource => "acquiring_resource",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Reconciling => "reconciling",
            Self::Finalizing => "finalizing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut phase = RunPhase::Init;
        for next in [
            RunPhase::AcquiringResource,
            RunPhase::Running,
            RunPhase::Draining,
            RunPhase::Reconciling,
            RunPhase::Finalizing,
            RunPhase::Closed,
        ] {
            phase.advance(next).unwrap();
        }
        assert!(phase.is_terminal());
    }

    #[test]
    fn test_acquisition_failure_closes_directly() {
        let mut phase = RunPhase::AcquiringResource;
        assert!(phase.advance(RunPhase::Closed).is_ok());
    }

    #[test]
    fn test_failed_reachable_from_non_terminal() {
        for from in [
            RunPhase::Init,
            RunPhase::Running,
            RunPhase::Draining,
            RunPhase::Reconciling,
            RunPhase::Finalizing,
        ] {
            assert!(from.can_transition_to(RunPhase::Failed), "{from}");
        }
        assert!(!RunPhase::Closed.can_transition_to(RunPhase::Failed));
        assert!(RunPhase::Failed.can_transition_to(RunPhase::Closed));
    }

    #[test]
    fn test_illegal_transition() {
        let mut phase = RunPhase::Running;
        let err = phase.advance(RunPhase::Finalizing).unwrap_err();
        assert!(matches!(err, CoreError::InvalidStateTransition { .. }));
        assert_eq!(phase, RunPhase::Running);
    }
}
