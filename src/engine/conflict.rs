use std::sync::atomic::{AtomicI64, Ordering};

use crate::model::*;

use super::store::ReservationStore;
use super::EngineError;

/// Source of "now" for timestamps.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> Ms;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Ms {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as Ms)
            .unwrap_or(0)
    }
}

/// Clock that only moves when told to. Used by tests and benches.
#[derive(Debug)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(start: Ms) -> Self {
        Self(AtomicI64::new(start))
    }

    pub fn advance(&self, by: Ms) {
        self.0.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Ms {
        self.0.load(Ordering::SeqCst)
    }
}

pub(crate) fn validate_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    use crate::limits::*;
    let span = Span::try_new(start, end).ok_or(EngineError::InvalidRange)?;
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_RESERVATION_DURATION_MS {
        return Err(EngineError::LimitExceeded("reservation too long"));
    }
    Ok(span)
}

/// First accepted reservation overlapping `span`, skipping `exclude`.
/// Pending, rejected, cancelled and returned reservations never conflict.
pub(crate) fn find_conflict<'a>(
    reservations: impl IntoIterator<Item = &'a Reservation>,
    span: &Span,
    exclude: Option<ReservationId>,
) -> Option<ReservationId> {
    reservations
        .into_iter()
        .filter(|r| Some(r.id) != exclude)
        .find(|r| r.status.is_blocking() && r.span.overlaps(span))
        .map(|r| r.id)
}

pub(crate) fn check_no_conflict(
    store: &dyn ReservationStore,
    tool_id: &ToolId,
    span: &Span,
    exclude: Option<ReservationId>,
) -> Result<(), EngineError> {
    let existing = store.find_by_tool(tool_id);
    match find_conflict(&existing, span, exclude) {
        Some(id) => {
            metrics::counter!(crate::observability::DATE_CONFLICTS_TOTAL).increment(1);
            Err(EngineError::DatesConflict(id))
        }
        None => Ok(()),
    }
}

/// `hasConflict(tool, start, end)`.
pub fn has_conflict(store: &dyn ReservationStore, tool_id: &ToolId, start: Ms, end: Ms) -> bool {
    let Some(span) = Span::try_new(start, end) else {
        return false;
    };
    find_conflict(&store.find_by_tool(tool_id), &span, None).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::store::InMemoryStore;
    use crate::limits::*;
    use ulid::Ulid;

    const DAY: Ms = 86_400_000;
    const T0: Ms = 1_800_000_000_000;

    fn res(start: Ms, end: Ms, status: ReservationStatus) -> Reservation {
        Reservation {
            id: Ulid::new(),
            tool_id: Ulid::nil(),
            requester_id: Ulid::new(),
            owner_id: Ulid::new(),
            span: Span::new(start, end),
            status,
            contact: String::new(),
            comment: String::new(),
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn accepted_overlap_conflicts() {
        let existing = [res(T0 + DAY, T0 + 2 * DAY, ReservationStatus::Accepted)];
        let hit = find_conflict(&existing, &Span::new(T0 + DAY, T0 + 2 * DAY), None);
        assert_eq!(hit, Some(existing[0].id));
    }

    #[test]
    fn touching_endpoints_do_not_conflict() {
        let existing = [res(T0, T0 + DAY, ReservationStatus::Accepted)];
        assert!(find_conflict(&existing, &Span::new(T0 + DAY, T0 + 2 * DAY), None).is_none());
        assert!(find_conflict(&existing, &Span::new(T0 - DAY, T0), None).is_none());
    }

    #[test]
    fn non_accepted_statuses_never_conflict() {
        let existing = [
            res(T0, T0 + DAY, ReservationStatus::Pending),
            res(T0, T0 + DAY, ReservationStatus::Rejected),
            res(T0, T0 + DAY, ReservationStatus::Cancelled),
            res(T0, T0 + DAY, ReservationStatus::Returned),
        ];
        assert!(find_conflict(&existing, &Span::new(T0, T0 + DAY), None).is_none());
    }

    #[test]
    fn excluded_reservation_is_skipped() {
        let existing = [res(T0, T0 + DAY, ReservationStatus::Accepted)];
        let id = existing[0].id;
        assert!(find_conflict(&existing, &Span::new(T0, T0 + DAY), Some(id)).is_none());
    }

    #[test]
    fn one_ms_overlap_conflicts() {
        let existing = [res(T0, T0 + DAY + 1, ReservationStatus::Accepted)];
        assert!(find_conflict(&existing, &Span::new(T0 + DAY, T0 + 2 * DAY), None).is_some());
    }

    #[test]
    fn has_conflict_is_scoped_to_tool() {
        let store = InMemoryStore::new();
        let tool_a = Ulid::new();
        let tool_b = Ulid::new();
        let mut r = res(T0, T0 + DAY, ReservationStatus::Accepted);
        r.tool_id = tool_a;
        store.insert(r);

        assert!(has_conflict(&store, &tool_a, T0, T0 + DAY));
        assert!(!has_conflict(&store, &tool_b, T0, T0 + DAY));
        assert!(!has_conflict(&store, &tool_a, T0 + DAY, T0 + 2 * DAY));
    }

    #[test]
    fn has_conflict_with_inverted_range_is_false() {
        let store = InMemoryStore::new();
        assert!(!has_conflict(&store, &Ulid::new(), T0 + DAY, T0));
    }

    #[test]
    fn validate_span_rejects_bad_ranges() {
        assert!(matches!(validate_span(T0, T0), Err(EngineError::InvalidRange)));
        assert!(matches!(validate_span(T0 + 1, T0), Err(EngineError::InvalidRange)));
        assert!(matches!(
            validate_span(0, 1000),
            Err(EngineError::LimitExceeded("timestamp out of range"))
        ));
        assert!(matches!(
            validate_span(T0, T0 + MAX_RESERVATION_DURATION_MS + 1),
            Err(EngineError::LimitExceeded("reservation too long"))
        ));
        assert_eq!(validate_span(T0, T0 + DAY).unwrap(), Span::new(T0, T0 + DAY));
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(T0);
        assert_eq!(clock.now_ms(), T0);
        clock.advance(5);
        assert_eq!(clock.now_ms(), T0 + 5);
    }
}
