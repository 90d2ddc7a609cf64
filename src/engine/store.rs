use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ulid::Ulid;

use crate::model::*;

/// Record-level persistence for tools and reservations.
///
/// Every method is atomic with respect to a single record. Multi-record
/// invariants (no two accepted reservations overlap on a tool) are the
/// engine's job, not the store's.
pub trait ReservationStore: Send + Sync {
    fn find_by_id(&self, id: &ReservationId) -> Option<Reservation>;

    /// Reservations for a tool, in insertion order.
    fn find_by_tool(&self, tool_id: &ToolId) -> Vec<Reservation>;

    /// Reservations where `party_id` plays `role`, in insertion order.
    fn find_by_party(&self, party_id: &PartyId, role: PartyRole) -> Vec<Reservation>;

    /// Returns `None` if the identifier is already taken.
    fn insert(&self, reservation: Reservation) -> Option<ReservationId>;

    /// Only used to undo an insert whose WAL append failed.
    fn remove(&self, id: &ReservationId) -> Option<Reservation>;

    /// Set `status` to `new` and `updated_at` to `at` iff the current status is
    /// `expected`. Returns whether the write happened.
    fn compare_and_set_status(
        &self,
        id: &ReservationId,
        expected: ReservationStatus,
        new: ReservationStatus,
        at: Ms,
    ) -> bool;

    fn find_tool(&self, id: &ToolId) -> Option<ToolInfo>;
    /// Returns `false` if the tool already exists.
    fn insert_tool(&self, tool: ToolInfo) -> bool;
    fn remove_tool(&self, id: &ToolId) -> Option<ToolInfo>;
    fn tool_count(&self) -> usize;
    fn tools(&self) -> Vec<ToolInfo>;

    /// Every reservation, grouped by tool and in insertion order within a tool.
    fn reservations(&self) -> Vec<Reservation>;
}

pub struct InMemoryStore {
    reservations: DashMap<ReservationId, Reservation>,
    tools: DashMap<ToolId, ToolInfo>,
    by_tool: DashMap<ToolId, Vec<ReservationId>>,
    by_requester: DashMap<PartyId, Vec<ReservationId>>,
    by_owner: DashMap<PartyId, Vec<ReservationId>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            reservations: DashMap::new(),
            tools: DashMap::new(),
            by_tool: DashMap::new(),
            by_requester: DashMap::new(),
            by_owner: DashMap::new(),
        }
    }

    fn resolve(&self, ids: &[ReservationId]) -> Vec<Reservation> {
        ids.iter()
            .filter_map(|id| self.reservations.get(id).map(|e| e.value().clone()))
            .collect()
    }

    fn index(&self, role: PartyRole) -> &DashMap<PartyId, Vec<ReservationId>> {
        match role {
            PartyRole::Requester => &self.by_requester,
            PartyRole::Owner => &self.by_owner,
        }
    }
}

fn unindex(map: &DashMap<Ulid, Vec<ReservationId>>, key: &Ulid, id: &ReservationId) {
    if let Some(mut ids) = map.get_mut(key) {
        ids.retain(|r| r != id);
    }
}

impl ReservationStore for InMemoryStore {
    fn find_by_id(&self, id: &ReservationId) -> Option<Reservation> {
        self.reservations.get(id).map(|e| e.value().clone())
    }

    fn find_by_tool(&self, tool_id: &ToolId) -> Vec<Reservation> {
        // Clone the id list first so no index shard lock is held while
        // reading the records.
        let ids = self
            .by_tool
            .get(tool_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        self.resolve(&ids)
    }

    fn find_by_party(&self, party_id: &PartyId, role: PartyRole) -> Vec<Reservation> {
        let ids = self
            .index(role)
            .get(party_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        self.resolve(&ids)
    }

    fn insert(&self, reservation: Reservation) -> Option<ReservationId> {
        let id = reservation.id;
        let (tool_id, requester_id, owner_id) =
            (reservation.tool_id, reservation.requester_id, reservation.owner_id);
        match self.reservations.entry(id) {
            Entry::Occupied(_) => return None,
            Entry::Vacant(slot) => {
                slot.insert(reservation);
            }
        }
        self.by_tool.entry(tool_id).or_default().push(id);
        self.by_requester.entry(requester_id).or_default().push(id);
        self.by_owner.entry(owner_id).or_default().push(id);
        Some(id)
    }

    fn remove(&self, id: &ReservationId) -> Option<Reservation> {
        let (_, r) = self.reservations.remove(id)?;
        unindex(&self.by_tool, &r.tool_id, id);
        unindex(&self.by_requester, &r.requester_id, id);
        unindex(&self.by_owner, &r.owner_id, id);
        Some(r)
    }

    fn compare_and_set_status(
        &self,
        id: &ReservationId,
        expected: ReservationStatus,
        new: ReservationStatus,
        at: Ms,
    ) -> bool {
        match self.reservations.get_mut(id) {
            Some(mut r) if r.status == expected => {
                r.status = new;
                r.updated_at = at;
                true
            }
            _ => false,
        }
    }

    fn find_tool(&self, id: &ToolId) -> Option<ToolInfo> {
        self.tools.get(id).map(|e| e.value().clone())
    }

    fn insert_tool(&self, tool: ToolInfo) -> bool {
        match self.tools.entry(tool.id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(tool);
                true
            }
        }
    }

    fn remove_tool(&self, id: &ToolId) -> Option<ToolInfo> {
        self.tools.remove(id).map(|(_, t)| t)
    }

    fn tool_count(&self) -> usize {
        self.tools.len()
    }

    fn tools(&self) -> Vec<ToolInfo> {
        self.tools.iter().map(|e| e.value().clone()).collect()
    }

    fn reservations(&self) -> Vec<Reservation> {
        let tool_ids: Vec<ToolId> = self.by_tool.iter().map(|e| *e.key()).collect();
        tool_ids
            .iter()
            .flat_map(|tid| self.find_by_tool(tid))
            .collect()
    }
}
