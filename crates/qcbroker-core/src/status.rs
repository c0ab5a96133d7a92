//! Record state machine. `apply` is the single place a
//! transition is legal or not; every caller — record store, task queue,
//! service engine — routes through it instead of setting status directly.

use qcbroker_types::RecordStatus;

use crate::error::BrokerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    Claim,
    HeartbeatLost,
    SuccessReturn,
    ErrorReturn,
    Cancel,
    Uncancel,
    Reset,
    Invalidate,
    Uninvalidate,
    SoftDelete,
    /// Carries the status to restore to, recorded at soft-delete time.
    Undelete(RecordStatus),
}

/// Exhaustive match, no catch-all arm: adding a `RecordStatus` or
/// `StatusEvent` variant without updating this table is a compile error
///.
pub fn apply(current: RecordStatus, event: StatusEvent) -> Result<RecordStatus, BrokerError> {
    use RecordStatus::*;
    use StatusEvent::*;

    let result = match (current, event) {
        (Waiting, Claim) => Running,
        (Running, HeartbeatLost) => Waiting,
        (Running, SuccessReturn) => Complete,
        (Running, ErrorReturn) => Error,
        (Waiting, Cancel) | (Running, Cancel) => Cancelled,
        (Cancelled, Uncancel) => Waiting,
        (Error, Reset) => Waiting,
        (Complete, Invalidate) => Invalid,
        (Invalid, Uninvalidate) => Complete,
        (_, SoftDelete) => Deleted,
        (Deleted, Undelete(previous)) => previous,

        (from, event) => {
            return Err(BrokerError::InvalidTransition(format!(
                "cannot apply {event:?} from status {from}"
            )));
        }
    };
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_moves_waiting_to_running() {
        assert_eq!(apply(RecordStatus::Waiting, StatusEvent::Claim).unwrap(), RecordStatus::Running);
    }

    #[test]
    fn heartbeat_loss_returns_running_to_waiting() {
        assert_eq!(
            apply(RecordStatus::Running, StatusEvent::HeartbeatLost).unwrap(),
            RecordStatus::Waiting
        );
    }

    #[test]
    fn reset_only_valid_from_error() {
        assert!(apply(RecordStatus::Waiting, StatusEvent::Reset).is_err());
        assert_eq!(
            apply(RecordStatus::Error, StatusEvent::Reset).unwrap(),
            RecordStatus::Waiting
        );
    }

    #[test]
    fn invalidate_round_trips_through_complete() {
        let invalid = apply(RecordStatus::Complete, StatusEvent::Invalidate).unwrap();
        assert_eq!(invalid, RecordStatus::Invalid);
        assert_eq!(
            apply(invalid, StatusEvent::Uninvalidate).unwrap(),
            RecordStatus::Complete
        );
    }

    #[test]
    fn soft_delete_applies_from_any_status_and_undelete_restores_it() {
        for status in [
            RecordStatus::Waiting,
            RecordStatus::Running,
            RecordStatus::Complete,
            RecordStatus::Error,
        ] {
            let deleted = apply(status, StatusEvent::SoftDelete).unwrap();
            assert_eq!(deleted, RecordStatus::Deleted);
            assert_eq!(apply(deleted, StatusEvent::Undelete(status)).unwrap(), status);
        }
    }

    #[test]
    fn invalid_transition_is_rejected() {
        assert!(apply(RecordStatus::Complete, StatusEvent::Claim).is_err());
    }
}
