use serde::{Deserialize, Serialize};

use crate::RemiError;

/// The attach state of a target process.
///
/// Transitions are owned by whichever component holds the OS-level attach
/// relationship (for the ptrace driver, its watcher thread). Reads are only
/// meaningful in the [`Attached`] state.
///
/// ```text
/// Detached -> Attaching -> Attached -> Detaching -> Detached
///                 |                                    ^
///                 +------------------------------------+
///                          (attach failed)
/// ```
///
/// [`Attached`]: Self::Attached
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttachState {
    /// No attach relationship exists.
    #[default]
    Detached,

    /// An attach request is in flight.
    Attaching,

    /// The target is attached and can be inspected.
    Attached,

    /// A detach request is in flight.
    Detaching,
}

impl AttachState {
    /// Checks whether the transition from `self` to `to` is allowed.
    pub fn can_transition(self, to: AttachState) -> bool {
        use AttachState::*;

        matches!(
            (self, to),
            (Detached, Attaching)
                | (Attaching, Attached)
                | (Attaching, Detached)
                | (Attached, Detaching)
                | (Detaching, Detached)
        )
    }

    /// Returns the new state, or [`RemiError::InvalidTransition`] if the
    /// transition is not allowed.
    pub fn transition(self, to: AttachState) -> Result<AttachState, RemiError> {
        if !self.can_transition(to) {
            return Err(RemiError::InvalidTransition { from: self, to });
        }

        tracing::trace!(from = ?self, ?to, "attach state transition");
        Ok(to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn full_cycle() -> Result<(), RemiError> {
        let state = AttachState::default();
        let state = state.transition(AttachState::Attaching)?;
        let state = state.transition(AttachState::Attached)?;
        let state = state.transition(AttachState::Detaching)?;
        let state = state.transition(AttachState::Detached)?;
        assert_eq!(state, AttachState::Detached);
        Ok(())
    }

    #[test]
    fn failed_attach_returns_to_detached() -> Result<(), RemiError> {
        let state = AttachState::Detached.transition(AttachState::Attaching)?;
        assert_eq!(
            state.transition(AttachState::Detached)?,
            AttachState::Detached
        );
        Ok(())
    }

    #[test]
    fn rejects_shortcuts() {
        let err = AttachState::Detached
            .transition(AttachState::Attached)
            .unwrap_err();
        assert!(err.is_programming_error());
        assert_eq!(err.kind(), ErrorKind::InspectionFailure);

        assert!(
            AttachState::Attached
                .transition(AttachState::Attaching)
                .is_err()
        );
        assert!(
            AttachState::Detaching
                .transition(AttachState::Attached)
                .is_err()
        );
    }
}
