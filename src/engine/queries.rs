use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    pub fn get_reservation(&self, id: ReservationId) -> Result<Reservation, EngineError> {
        self.store.find_by_id(&id).ok_or(EngineError::NotFound(id))
    }

    /// Outgoing requests: reservations where `party` is the requester.
    pub fn get_requests(&self, party: PartyId) -> Vec<Reservation> {
        self.store.find_by_party(&party, PartyRole::Requester)
    }

    /// Incoming petitions: reservations where `party` is the owner.
    pub fn get_petitions(&self, party: PartyId) -> Vec<Reservation> {
        self.store.find_by_party(&party, PartyRole::Owner)
    }

    /// Returned reservations involving `party` that `party` has not rated yet.
    pub fn get_pending_ratings(&self, party: PartyId) -> Vec<Reservation> {
        [PartyRole::Requester, PartyRole::Owner]
            .into_iter()
            .flat_map(|role| self.store.find_by_party(&party, role))
            .filter(|r| r.status == ReservationStatus::Returned)
            .filter(|r| !self.ratings.has_rated(&r.id, &party))
            .collect()
    }

    pub fn get_tool_reservations(&self, tool_id: ToolId) -> Vec<Reservation> {
        self.store.find_by_tool(&tool_id)
    }

    pub fn get_tool(&self, id: ToolId) -> Result<ToolInfo, EngineError> {
        self.store.find_tool(&id).ok_or(EngineError::NotFound(id))
    }

    pub fn list_tools(&self) -> Vec<ToolInfo> {
        self.store.tools()
    }

    /// Would `[start, end)` collide with an accepted reservation on the tool?
    pub fn has_conflict(&self, tool_id: ToolId, start: Ms, end: Ms) -> bool {
        super::has_conflict(self.store.as_ref(), &tool_id, start, end)
    }
}
