use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds.
pub type Ms = i64;

pub type ToolId = Ulid;
pub type PartyId = Ulid;
pub type ReservationId = Ulid;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Checked constructor for untrusted input.
    pub fn try_new(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Accepted,
    Rejected,
    Cancelled,
    Returned,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Accepted => "accepted",
            ReservationStatus::Rejected => "rejected",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Returned => "returned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(ReservationStatus::Pending),
            "accepted" => Some(ReservationStatus::Accepted),
            "rejected" | "denied" => Some(ReservationStatus::Rejected),
            "cancelled" | "canceled" => Some(ReservationStatus::Cancelled),
            "returned" => Some(ReservationStatus::Returned),
            _ => None,
        }
    }

    /// Only accepted reservations hold the tool.
    pub fn is_blocking(&self) -> bool {
        matches!(self, ReservationStatus::Accepted)
    }

    /// Pending or accepted: the reservation still has a say over the tool.
    pub fn is_live(&self) -> bool {
        matches!(self, ReservationStatus::Pending | ReservationStatus::Accepted)
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of a reservation a party is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartyRole {
    /// The party asking to borrow the tool (`fromUser`).
    Requester,
    /// The tool's owner (`toUser`).
    Owner,
}

impl std::fmt::Display for PartyRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartyRole::Requester => f.write_str("requester"),
            PartyRole::Owner => f.write_str("owner"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub id: ToolId,
    pub owner_id: PartyId,
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub tool_id: ToolId,
    pub requester_id: PartyId,
    pub owner_id: PartyId,
    pub span: Span,
    pub status: ReservationStatus,
    pub contact: String,
    pub comment: String,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Reservation {
    pub fn party_for(&self, role: PartyRole) -> PartyId {
        match role {
            PartyRole::Requester => self.requester_id,
            PartyRole::Owner => self.owner_id,
        }
    }

    pub fn involves(&self, party: &PartyId) -> bool {
        self.requester_id == *party || self.owner_id == *party
    }
}

/// Input to reservation creation. The owner is not part of it: it is taken
/// from the tool record at creation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub id: ReservationId,
    pub tool_id: ToolId,
    pub requester_id: PartyId,
    pub span: Span,
    pub contact: String,
    pub comment: String,
}

/// WAL record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ToolRegistered {
        id: ToolId,
        owner_id: PartyId,
        title: Option<String>,
    },
    ToolRemoved {
        id: ToolId,
    },
    ReservationCreated {
        id: ReservationId,
        tool_id: ToolId,
        requester_id: PartyId,
        owner_id: PartyId,
        span: Span,
        contact: String,
        comment: String,
        created_at: Ms,
    },
    StatusChanged {
        id: ReservationId,
        tool_id: ToolId,
        from: ReservationStatus,
        to: ReservationStatus,
        at: Ms,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_overlap_is_half_open() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn span_containing_other_overlaps() {
        let outer = Span::new(0, 1000);
        let inner = Span::new(400, 500);
        assert!(outer.overlaps(&inner));
        assert!(inner.overlaps(&outer));
    }

    #[test]
    fn span_try_new_rejects_empty_and_inverted() {
        assert!(Span::try_new(100, 100).is_none());
        assert!(Span::try_new(200, 100).is_none());
        assert_eq!(Span::try_new(100, 101), Some(Span { start: 100, end: 101 }));
    }

    #[test]
    fn status_parse_accepts_aliases() {
        assert_eq!(ReservationStatus::parse("ACCEPTED"), Some(ReservationStatus::Accepted));
        assert_eq!(ReservationStatus::parse("denied"), Some(ReservationStatus::Rejected));
        assert_eq!(ReservationStatus::parse("canceled"), Some(ReservationStatus::Cancelled));
        assert_eq!(ReservationStatus::parse("lost"), None);
    }

    #[test]
    fn only_accepted_blocks() {
        assert!(ReservationStatus::Accepted.is_blocking());
        for s in [
            ReservationStatus::Pending,
            ReservationStatus::Rejected,
            ReservationStatus::Cancelled,
            ReservationStatus::Returned,
        ] {
            assert!(!s.is_blocking(), "{s} must not block");
        }
    }

    #[test]
    fn reservation_party_lookup() {
        let r = Reservation {
            id: Ulid::new(),
            tool_id: Ulid::new(),
            requester_id: Ulid::new(),
            owner_id: Ulid::new(),
            span: Span::new(0, 10),
            status: ReservationStatus::Pending,
            contact: String::new(),
            comment: String::new(),
            created_at: 1,
            updated_at: 1,
        };
        assert_eq!(r.party_for(PartyRole::Requester), r.requester_id);
        assert_eq!(r.party_for(PartyRole::Owner), r.owner_id);
        assert!(r.involves(&r.owner_id));
        assert!(!r.involves(&Ulid::new()));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::StatusChanged {
            id: Ulid::new(),
            tool_id: Ulid::new(),
            from: ReservationStatus::Pending,
            to: ReservationStatus::Accepted,
            at: 42,
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
