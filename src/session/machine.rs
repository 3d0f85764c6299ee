//! Session status transition rules.
//!
//! Terminal statuses are monotonic, transitions are idempotent on the
//! receiving side, and only the transitions in the table are legal.

use crate::error::{Error, Result};

use super::types::SessionStatus;

/// Whether `from -> to` is a legal transition.
///
/// Repeating the current status is always legal and treated as a no-op by
/// [`apply_transition`].
pub fn can_transition(from: SessionStatus, to: SessionStatus) -> bool {
    use SessionStatus::*;
    if from == to {
        return true;
    }
    matches!(
        (from, to),
        (Pending, Queued)
            | (Queued, Processing)
            | (Queued, Cancelled)
            | (Processing, Completed)
            | (Processing, Failed)
            | (Processing, Cancelled)
            | (Processing, TimedOut)
    )
}

/// Outcome of applying a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The status changed
    Applied(SessionStatus),
    /// Same status applied twice; nothing to do
    NoOp,
}

/// Validate and apply a transition.
pub fn apply_transition(from: SessionStatus, to: SessionStatus) -> Result<Transition> {
    if from == to {
        return Ok(Transition::NoOp);
    }
    if !can_transition(from, to) {
        return Err(Error::Internal(format!(
            "illegal session transition {from} -> {to}"
        )));
    }
    Ok(Transition::Applied(to))
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionStatus::*;

    #[test]
    fn test_legal_path() {
        assert!(can_transition(Pending, Queued));
        assert!(can_transition(Queued, Processing));
        assert!(can_transition(Processing, Completed));
        assert!(can_transition(Processing, Failed));
        assert!(can_transition(Processing, TimedOut));
        assert!(can_transition(Queued, Cancelled));
        assert!(can_transition(Processing, Cancelled));
    }

    #[test]
    fn test_terminal_statuses_are_monotonic() {
        for terminal in [Completed, Failed, Cancelled, TimedOut] {
            for next in [Pending, Queued, Processing, Completed, Failed, Cancelled, TimedOut] {
                if next != terminal {
                    assert!(
                        !can_transition(terminal, next),
                        "{terminal} -> {next} must be illegal"
                    );
                }
            }
        }
    }

    #[test]
    fn test_no_skipping_queued() {
        assert!(!can_transition(Pending, Processing));
        assert!(!can_transition(Pending, Completed));
        assert!(!can_transition(Queued, Completed));
    }

    #[test]
    fn test_idempotent_transition_is_noop() {
        assert_eq!(
            apply_transition(Cancelled, Cancelled).unwrap(),
            Transition::NoOp
        );
        assert_eq!(
            apply_transition(Processing, Processing).unwrap(),
            Transition::NoOp
        );
    }

    #[test]
    fn test_illegal_transition_is_internal_error() {
        let err = apply_transition(Completed, Processing).unwrap_err();
        assert_eq!(err.code(), "internal");
    }
}
