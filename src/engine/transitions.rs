use crate::model::*;

use super::EngineError;

/// Who may move a reservation into a target status, and from where.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRule {
    pub target: ReservationStatus,
    pub actor: PartyRole,
    pub from: ReservationStatus,
}

pub const TRANSITIONS: [TransitionRule; 4] = [
    TransitionRule {
        target: ReservationStatus::Accepted,
        actor: PartyRole::Owner,
        from: ReservationStatus::Pending,
    },
    TransitionRule {
        target: ReservationStatus::Rejected,
        actor: PartyRole::Owner,
        from: ReservationStatus::Pending,
    },
    TransitionRule {
        target: ReservationStatus::Cancelled,
        actor: PartyRole::Requester,
        from: ReservationStatus::Pending,
    },
    // Returned requires a prior accept; marking a never-lent tool as
    // returned is refused.
    TransitionRule {
        target: ReservationStatus::Returned,
        actor: PartyRole::Owner,
        from: ReservationStatus::Accepted,
    },
];

impl TransitionRule {
    pub fn for_target(target: ReservationStatus) -> Option<&'static TransitionRule> {
        TRANSITIONS.iter().find(|r| r.target == target)
    }

    /// Role first, then state: an unauthorized actor gets a role error no
    /// matter what state the reservation is in.
    pub fn check(&self, reservation: &Reservation, actor: &PartyId) -> Result<(), EngineError> {
        if reservation.party_for(self.actor) != *actor {
            return Err(EngineError::RoleMismatch {
                required: Some(self.actor),
            });
        }
        if reservation.status != self.from {
            return Err(EngineError::InvalidState {
                required: self.from,
                actual: reservation.status,
            });
        }
        Ok(())
    }
}
