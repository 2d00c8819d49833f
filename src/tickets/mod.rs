//! Support-ticket lifecycle.
//!
//! Tickets are user-scoped support sessions with exactly one active
//! instance per owner. The one-open-ticket invariant is enforced by a
//! compare-and-swap on the `owner -> open ticket id` index, taken before
//! the first suspension point of `create`, so two concurrent creates for
//! the same owner can never both pass the check.

use crate::audit::{LogCategory, LogPayload};
use crate::error::{OpError, OpResult};
use crate::gateway::ChannelHandle;
use crate::ids;
use crate::ledger::UserId;
use crate::state::Warden;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketCategory {
    Technical,
    Billing,
    General,
}

impl TicketCategory {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Technical => "Technical Support",
            Self::Billing => "Billing Support",
            Self::General => "General Questions",
        }
    }
}

impl std::str::FromStr for TicketCategory {
    type Err = OpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "technical" => Ok(Self::Technical),
            "billing" => Ok(Self::Billing),
            "general" => Ok(Self::General),
            other => Err(OpError::Validation(format!("unknown ticket category: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Open,
    /// Terminal. A closed ticket is never reopened; a new one is created.
    Closed,
}

/// One support session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: String,
    pub owner_user_id: UserId,
    pub category: TicketCategory,
    pub status: TicketStatus,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_by_user_id: Option<UserId>,
    /// External channel handle backing the session.
    pub channel_ref: String,
}

/// Working copy of the ticket table plus the open-ticket index.
pub struct Tickets {
    pub all: DashMap<String, Ticket>,
    /// owner -> id of their open (or being-created) ticket. Entries are
    /// inserted before channel provisioning and removed on close or on a
    /// failed create.
    open_index: DashMap<UserId, String>,
}

impl Tickets {
    /// Build from the loaded table, deriving the open index.
    pub fn from_table(table: HashMap<String, Ticket>) -> Self {
        let open_index = DashMap::new();
        for ticket in table.values() {
            if ticket.status == TicketStatus::Open {
                open_index.insert(ticket.owner_user_id.clone(), ticket.id.clone());
            }
        }
        Self {
            all: table.into_iter().collect(),
            open_index,
        }
    }

    /// Reserve the owner's open-ticket slot for `ticket_id`.
    ///
    /// Fails with the existing ticket's id if the slot is taken by a
    /// ticket that is still open; a stale reservation (closed or missing
    /// ticket) is replaced.
    fn reserve(&self, owner: &str, ticket_id: &str) -> OpResult<()> {
        match self.open_index.entry(owner.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(ticket_id.to_string());
                Ok(())
            }
            Entry::Occupied(mut slot) => {
                let existing = slot.get().clone();
                // Missing from the table means a concurrent create holds
                // the reservation and has not persisted yet; it blocks too.
                let still_open = self
                    .all
                    .get(&existing)
                    .map(|t| t.status == TicketStatus::Open)
                    .unwrap_or(true);
                if still_open {
                    Err(OpError::AlreadyOpen { ticket_id: existing })
                } else {
                    slot.insert(ticket_id.to_string());
                    Ok(())
                }
            }
        }
    }

    /// Drop a reservation, but only if it still belongs to `ticket_id`.
    fn release(&self, owner: &str, ticket_id: &str) {
        self.open_index
            .remove_if(owner, |_, reserved| reserved == ticket_id);
    }

    fn record_open(&self, ticket: Ticket) {
        self.all.insert(ticket.id.clone(), ticket);
    }

    /// Transition a ticket to CLOSED. Fails if it does not exist or has
    /// already been closed; never touches `closed_at` twice.
    fn record_close(&self, ticket_id: &str, actor_id: &str, now: DateTime<Utc>) -> OpResult<Ticket> {
        let closed = {
            let Some(mut ticket) = self.all.get_mut(ticket_id) else {
                return Err(OpError::NotFound("ticket does not exist or is already closed".into()));
            };
            if ticket.status == TicketStatus::Closed {
                return Err(OpError::NotFound("ticket does not exist or is already closed".into()));
            }
            ticket.status = TicketStatus::Closed;
            ticket.closed_at = Some(now);
            ticket.closed_by_user_id = Some(actor_id.to_string());
            ticket.clone()
        };
        self.release(&closed.owner_user_id, ticket_id);
        Ok(closed)
    }

    pub fn total_count(&self) -> usize {
        self.all.len()
    }

    pub fn open_count(&self) -> usize {
        self.all
            .iter()
            .filter(|t| t.status == TicketStatus::Open)
            .count()
    }
}

impl Warden {
    /// Open a ticket for a user.
    ///
    /// Rejected with [`OpError::AlreadyOpen`] (carrying the existing id)
    /// when the user already has an open ticket. On success a dedicated
    /// channel has been provisioned and the ticket persisted.
    pub async fn create_ticket(&self, user_id: &str, category: TicketCategory) -> OpResult<Ticket> {
        let ticket_id = format!("ticket-{}", ids::opaque(8));
        self.tickets.reserve(user_id, &ticket_id)?;

        let channel_name = format!("ticket-{user_id}-{}", ids::opaque(2));
        let handle = match self
            .provisioner
            .create_channel(
                &channel_name,
                self.config.tickets.parent_category.as_deref(),
                user_id,
            )
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                self.tickets.release(user_id, &ticket_id);
                warn!(user = %user_id, error = %e, "Ticket channel creation failed");
                return Err(OpError::External(format!("channel creation failed: {e}")));
            }
        };

        let ticket = Ticket {
            id: ticket_id.clone(),
            owner_user_id: user_id.to_string(),
            category,
            status: TicketStatus::Open,
            created_at: Utc::now(),
            closed_at: None,
            closed_by_user_id: None,
            channel_ref: handle.0.clone(),
        };
        self.tickets.record_open(ticket.clone());
        self.flush_tickets().await;

        self.audit.record(
            LogCategory::Tickets,
            LogPayload::fields(vec![
                ("action", "created".to_string()),
                ("ticket", ticket_id),
                ("category", category.display_name().to_string()),
            ]),
            Some(user_id),
        );
        Ok(ticket)
    }

    /// Close a ticket.
    ///
    /// Authorization (support-or-admin) is the dispatcher's job; this
    /// component has no notion of roles. Transcript capture is
    /// best-effort and never blocks the transition. The backing channel
    /// is deleted after a grace delay, fire-and-forget: a restart inside
    /// the window leaks the channel, and a deletion failure is logged,
    /// not retried.
    pub async fn close_ticket(&self, ticket_id: &str, actor_id: &str) -> OpResult<Ticket> {
        let ticket = self.tickets.record_close(ticket_id, actor_id, Utc::now())?;
        self.flush_tickets().await;

        let handle = ChannelHandle(ticket.channel_ref.clone());
        match self
            .provisioner
            .fetch_recent_messages(&handle, self.config.tickets.transcript_limit)
            .await
        {
            Ok(messages) => {
                let lines: Vec<String> = messages
                    .iter()
                    .map(|m| format!("[{}] {}", m.author, m.content))
                    .collect();
                if let Err(e) = self.store.save_transcript(ticket_id, &lines).await {
                    warn!(ticket = %ticket_id, error = %e, "Transcript write failed");
                }
            }
            Err(e) => {
                warn!(ticket = %ticket_id, error = %e, "Transcript capture failed");
            }
        }

        let provisioner = Arc::clone(&self.provisioner);
        let grace = Duration::from_secs(self.config.tickets.close_grace_secs);
        let deferred_id = ticket_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Err(e) = provisioner.delete_channel(&handle).await {
                warn!(ticket = %deferred_id, error = %e, "Deferred channel deletion failed");
            }
        });

        info!(ticket = %ticket_id, by = %actor_id, "Ticket closed");
        self.audit.record(
            LogCategory::Tickets,
            LogPayload::fields(vec![
                ("action", "closed".to_string()),
                ("ticket", ticket_id.to_string()),
                ("by", actor_id.to_string()),
            ]),
            Some(&ticket.owner_user_id),
        );
        Ok(ticket)
    }
}
