use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, validate_span};
use super::transitions::TransitionRule;
use super::{Engine, EngineError, WalCommand, apply_event};

impl Engine {
    pub async fn register_tool(
        &self,
        id: ToolId,
        owner_id: PartyId,
        title: Option<String>,
    ) -> Result<ToolInfo, EngineError> {
        if let Some(ref t) = title
            && t.len() > MAX_TITLE_LEN {
                return Err(EngineError::LimitExceeded("tool title too long"));
            }
        if self.store.tool_count() >= MAX_TOOLS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many tools"));
        }

        let _gate = self.compaction_gate.read().await;
        let _tool = self.lock_tool(id).await;

        let event = Event::ToolRegistered { id, owner_id, title: title.clone() };
        if !apply_event(self.store.as_ref(), &event) {
            return Err(EngineError::AlreadyExists(id));
        }
        if let Err(e) = self.wal_append(&event).await {
            self.store.remove_tool(&id);
            self.forget_tool_lock(id);
            return Err(e);
        }
        self.notify.send(id, &event);
        Ok(ToolInfo { id, owner_id, title })
    }

    /// Refused while the tool has pending or accepted reservations.
    pub async fn remove_tool(&self, id: ToolId) -> Result<ToolInfo, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let (_tool, _) = self.lock_registered_tool(id).await?;

        if self.store.find_by_tool(&id).iter().any(|r| r.status.is_live()) {
            return Err(EngineError::ToolBusy(id));
        }

        let removed = self.store.remove_tool(&id).ok_or(EngineError::NotFound(id))?;
        let event = Event::ToolRemoved { id };
        if let Err(e) = self.wal_append(&event).await {
            self.store.insert_tool(removed);
            return Err(e);
        }
        self.forget_tool_lock(id);
        self.notify.send(id, &event);
        Ok(removed)
    }

    /// Create a pending reservation. The owner is the tool's current owner.
    ///
    /// Only accepted reservations block creation, so competing pending
    /// requests for the same dates are all admitted; the first one accepted
    /// wins.
    pub async fn create_reservation(
        &self,
        new: NewReservation,
    ) -> Result<Reservation, EngineError> {
        if new.contact.len() > MAX_CONTACT_LEN {
            return Err(EngineError::LimitExceeded("contact too long"));
        }
        if new.comment.len() > MAX_COMMENT_LEN {
            return Err(EngineError::LimitExceeded("comment too long"));
        }
        let span = validate_span(new.span.start, new.span.end)?;

        let _gate = self.compaction_gate.read().await;
        let (_tool, tool) = self.lock_registered_tool(new.tool_id).await?;
        if tool.owner_id == new.requester_id {
            return Err(EngineError::SelfBooking);
        }
        if self.store.find_by_id(&new.id).is_some() {
            return Err(EngineError::AlreadyExists(new.id));
        }
        let existing = self.store.find_by_tool(&new.tool_id);
        if existing.len() >= MAX_RESERVATIONS_PER_TOOL {
            return Err(EngineError::LimitExceeded("too many reservations on tool"));
        }

        check_no_conflict(self.store.as_ref(), &new.tool_id, &span, None)?;

        let now = self.clock.now_ms();
        let event = Event::ReservationCreated {
            id: new.id,
            tool_id: new.tool_id,
            requester_id: new.requester_id,
            owner_id: tool.owner_id,
            span,
            contact: new.contact,
            comment: new.comment,
            created_at: now,
        };
        if !apply_event(self.store.as_ref(), &event) {
            return Err(EngineError::AlreadyExists(new.id));
        }
        if let Err(e) = self.wal_append(&event).await {
            self.store.remove(&new.id);
            return Err(e);
        }

        metrics::counter!(crate::observability::RESERVATIONS_CREATED_TOTAL).increment(1);
        self.notify.send(new.tool_id, &event);
        debug!(reservation = %new.id, tool = %new.tool_id, "reservation created");
        self.store
            .find_by_id(&new.id)
            .ok_or(EngineError::NotFound(new.id))
    }

    /// Move a reservation to `target` on behalf of `actor`.
    ///
    /// The actor's role is checked before the current state. Accepting
    /// re-runs the conflict check against the reservation's own range. The
    /// status write is a compare-and-set against the state that was
    /// validated; a lost race is retried a bounded number of times.
    pub async fn transition(
        &self,
        id: ReservationId,
        actor: PartyId,
        target: ReservationStatus,
    ) -> Result<Reservation, EngineError> {
        let result = self.try_transition(id, actor, target).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => match e.kind() {
                super::ErrorKind::Validation => "invalid",
                super::ErrorKind::Conflict => "conflict",
                super::ErrorKind::NotFound => "not_found",
                super::ErrorKind::Role => "role",
                super::ErrorKind::State => "state",
                super::ErrorKind::Internal => "internal",
            },
        };
        metrics::counter!(
            crate::observability::TRANSITIONS_TOTAL,
            "target" => target.as_str(),
            "outcome" => outcome
        )
        .increment(1);
        result
    }

    async fn try_transition(
        &self,
        id: ReservationId,
        actor: PartyId,
        target: ReservationStatus,
    ) -> Result<Reservation, EngineError> {
        let rule = TransitionRule::for_target(target).ok_or(EngineError::InvalidTarget(target))?;
        let tool_id = self
            .store
            .find_by_id(&id)
            .ok_or(EngineError::NotFound(id))?
            .tool_id;

        let _gate = self.compaction_gate.read().await;
        // A removed tool had no pending or accepted reservations, so every
        // transition on it fails the rule check and no lock is needed.
        let _tool = self
            .lock_registered_tool(tool_id)
            .await
            .ok()
            .map(|(guard, _)| guard);

        let mut attempts = 0usize;
        let (before, at) = loop {
            let current = self.store.find_by_id(&id).ok_or(EngineError::NotFound(id))?;
            rule.check(&current, &actor)?;
            if target == ReservationStatus::Accepted {
                check_no_conflict(self.store.as_ref(), &tool_id, &current.span, Some(id))?;
            }

            let at = self.clock.now_ms();
            if self
                .store
                .compare_and_set_status(&id, current.status, target, at)
            {
                break (current, at);
            }

            attempts += 1;
            metrics::counter!(crate::observability::CAS_RETRIES_TOTAL).increment(1);
            debug!(reservation = %id, attempts, "status compare-and-set lost, retrying");
            if attempts > MAX_CAS_RETRIES {
                return Err(EngineError::Contention(id));
            }
        };

        let event = Event::StatusChanged {
            id,
            tool_id,
            from: before.status,
            to: target,
            at,
        };
        if let Err(e) = self.wal_append(&event).await {
            self.store
                .compare_and_set_status(&id, target, before.status, before.updated_at);
            return Err(e);
        }

        self.notify.send(tool_id, &event);
        debug!(reservation = %id, from = %before.status, to = %target, "reservation transitioned");
        Ok(Reservation {
            status: target,
            updated_at: at,
            ..before
        })
    }

    pub async fn accept(&self, id: ReservationId, actor: PartyId) -> Result<Reservation, EngineError> {
        self.transition(id, actor, ReservationStatus::Accepted).await
    }

    pub async fn deny(&self, id: ReservationId, actor: PartyId) -> Result<Reservation, EngineError> {
        self.transition(id, actor, ReservationStatus::Rejected).await
    }

    pub async fn cancel(&self, id: ReservationId, actor: PartyId) -> Result<Reservation, EngineError> {
        self.transition(id, actor, ReservationStatus::Cancelled).await
    }

    pub async fn mark_returned(
        &self,
        id: ReservationId,
        actor: PartyId,
    ) -> Result<Reservation, EngineError> {
        self.transition(id, actor, ReservationStatus::Returned).await
    }

    /// Validate a rating and hand it to the rating collaborator.
    pub async fn rate(
        &self,
        id: ReservationId,
        actor: PartyId,
        rating: i64,
    ) -> Result<(), EngineError> {
        let reservation = self.store.find_by_id(&id).ok_or(EngineError::NotFound(id))?;
        if !reservation.involves(&actor) {
            return Err(EngineError::RoleMismatch { required: None });
        }
        let rating = u8::try_from(rating)
            .ok()
            .filter(|r| (1..=5).contains(r))
            .ok_or(EngineError::InvalidRating(rating))?;
        self.ratings.record(&reservation, actor, rating);
        Ok(())
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.write().await;

        let mut events: Vec<Event> = self
            .store
            .tools()
            .into_iter()
            .map(|t| Event::ToolRegistered {
                id: t.id,
                owner_id: t.owner_id,
                title: t.title,
            })
            .collect();

        for r in self.store.reservations() {
            events.push(Event::ReservationCreated {
                id: r.id,
                tool_id: r.tool_id,
                requester_id: r.requester_id,
                owner_id: r.owner_id,
                span: r.span,
                contact: r.contact.clone(),
                comment: r.comment.clone(),
                created_at: r.created_at,
            });
            if r.status != ReservationStatus::Pending {
                events.push(Event::StatusChanged {
                    id: r.id,
                    tool_id: r.tool_id,
                    from: ReservationStatus::Pending,
                    to: r.status,
                    at: r.updated_at,
                });
            }
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!(events = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
