use crate::model::{PartyId, Reservation, ReservationId};

/// Where validated ratings go. No rating schema exists yet, so the only
/// implementation drops them.
pub trait RatingSink: Send + Sync {
    fn record(&self, reservation: &Reservation, rater: PartyId, rating: u8);

    fn has_rated(&self, reservation_id: &ReservationId, rater: &PartyId) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRatings;

impl RatingSink for NoopRatings {
    fn record(&self, reservation: &Reservation, rater: PartyId, rating: u8) {
        tracing::debug!(reservation = %reservation.id, %rater, rating, "rating accepted, not stored");
    }

    fn has_rated(&self, _reservation_id: &ReservationId, _rater: &PartyId) -> bool {
        false
    }
}
