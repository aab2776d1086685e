//! Guarded order state machine over the orders tree.
//!
//! Buyer, admin and the background expiration sweep may all try to move the
//! same order at once. Every transition is therefore one atomic
//! compare-and-swap of the order document: status, `expires_at`, the
//! denormalized history entry and `updated_at` land together or not at all.
//! The audit-ledger append happens after the swap and is deliberately
//! decoupled - a failed append is reported, never rolled back into the
//! transition.

use crate::config::StoreConfig;
use crate::error::{StorageError, TransitionError};
use crate::ledger::{AuditLedger, HistoryEntry};
use crate::order::{Order, OrderStatus};
use crate::types::{Actor, TimeStamp};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// Operational events the host wants to hear about: lost ledger entries and
/// rejected transitions. Hook this up to whatever alerting the deployment has.
pub trait NotificationSink: Send + Sync {
    fn ledger_write_failed(&self, entry: &HistoryEntry, error: &StorageError) {
        let _ = (entry, error);
    }
    fn illegal_transition(&self, order_id: &str, from: OrderStatus, to: OrderStatus) {
        let _ = (order_id, from, to);
    }
}

struct NoopSink;
impl NotificationSink for NoopSink {}

/// Outcome of an observer's lazy expiration check.
#[derive(Debug, PartialEq, Eq)]
pub enum ExpireOutcome {
    /// Deadline passed; this call applied the transition.
    Expired,
    /// Someone else got there first; nothing to do.
    AlreadyExpired,
    /// Still inside the payment window.
    StillPending,
    /// Not a pending order; expiration does not apply.
    NotPending(OrderStatus),
}

const MAX_CAS_ATTEMPTS: u32 = 5;

pub struct OrderService {
    orders: sled::Tree,
    ledger: AuditLedger,
    config: StoreConfig,
    sink: Box<dyn NotificationSink>,
}

impl OrderService {
    pub fn new(db: &Arc<sled::Db>, config: StoreConfig) -> Result<Self, StorageError> {
        Ok(Self {
            orders: db.open_tree("orders")?,
            ledger: AuditLedger::open(db)?,
            config,
            sink: Box::new(NoopSink),
        })
    }

    pub fn with_sink(mut self, sink: Box<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn ledger(&self) -> &AuditLedger {
        &self.ledger
    }

    pub fn get(&self, order_id: &str) -> Result<Order, TransitionError> {
        let (_, order) = self.load(order_id)?;
        Ok(order)
    }

    pub fn history_for(&self, order_id: &str) -> Result<Vec<HistoryEntry>, TransitionError> {
        Ok(self.ledger.history_for(order_id)?)
    }

    fn load(&self, order_id: &str) -> Result<(sled::IVec, Order), TransitionError> {
        let raw = self
            .orders
            .get(order_id.as_bytes())
            .map_err(StorageError::from)?
            .ok_or_else(|| TransitionError::NotFound(order_id.to_string()))?;
        let order: Order = minicbor::decode(raw.as_ref()).map_err(StorageError::from)?;
        Ok((raw, order))
    }

    /// Insert a brand-new order document. Returns `false` when the id is
    /// already taken (checkout retries with a fresh suffix). The swap against
    /// an absent key makes two racing checkouts unable to both claim the id.
    pub(crate) fn try_insert(&self, order: &Order) -> Result<bool, StorageError> {
        let cbor = minicbor::to_vec(order).map_err(StorageError::encode)?;
        let swap = self
            .orders
            .compare_and_swap(order.order_id.as_bytes(), None as Option<&[u8]>, Some(cbor))?;
        Ok(swap.is_ok())
    }

    /// Record the creation entry for a freshly inserted draft. Runs through
    /// the same commit path as every later transition so the ledger sees the
    /// draft the same way it sees everything else.
    pub(crate) fn record_creation(
        &self,
        order_id: &str,
        actor: Actor,
        now: TimeStamp<Utc>,
    ) -> Result<Order, TransitionError> {
        self.apply(order_id, OrderStatus::Draft, actor, now, None, None, true, &|_| {})
    }

    /// Move an order along the allowed transition table. Exactly one of any
    /// set of racing callers wins; the rest observe the new current status
    /// and get `Illegal` (or the expired no-op below).
    pub fn transition(
        &self,
        order_id: &str,
        target: OrderStatus,
        actor: Actor,
        now: TimeStamp<Utc>,
        proof_ref: Option<String>,
    ) -> Result<Order, TransitionError> {
        self.apply(order_id, target, actor, now, proof_ref, None, false, &|_| {})
    }

    /// Buyer uploads payment proof: `pending -> waiting_verification`. If the
    /// deadline already passed this call applies the expiration itself and
    /// reports the order as expired.
    pub fn upload_proof(
        &self,
        order_id: &str,
        proof_ref: &str,
        actor: Actor,
        now: TimeStamp<Utc>,
    ) -> Result<Order, TransitionError> {
        let proof = proof_ref.to_string();
        self.apply(
            order_id,
            OrderStatus::WaitingVerification,
            actor,
            now,
            Some(proof.clone()),
            None,
            false,
            &move |order| order.payment_proof = Some(proof.clone()),
        )
    }

    /// Buyer confirms receipt: `shipped -> delivered`, optionally with a
    /// received-goods photo.
    pub fn confirm_receipt(
        &self,
        order_id: &str,
        actor: Actor,
        now: TimeStamp<Utc>,
        photo_ref: Option<String>,
    ) -> Result<Order, TransitionError> {
        self.apply(
            order_id,
            OrderStatus::Delivered,
            actor,
            now,
            photo_ref,
            None,
            false,
            &|_| {},
        )
    }

    /// Any observer may call this on a pending order. Idempotent: the second
    /// racing caller sees `AlreadyExpired` and exactly one `expired` entry
    /// ever reaches the history.
    pub fn expire_if_due(
        &self,
        order_id: &str,
        now: TimeStamp<Utc>,
    ) -> Result<ExpireOutcome, TransitionError> {
        let (_, order) = self.load(order_id)?;
        match order.status {
            OrderStatus::Expired => Ok(ExpireOutcome::AlreadyExpired),
            OrderStatus::Pending if order.is_past_deadline(now) => {
                match self.apply(
                    order_id,
                    OrderStatus::Expired,
                    Actor::System,
                    now,
                    None,
                    None,
                    false,
                    &|_| {},
                ) {
                    // only the caller that actually appended the entry wins
                    Ok(applied) if applied.history.len() > order.history.len() => {
                        Ok(ExpireOutcome::Expired)
                    }
                    // a racing observer applied it between our read and swap
                    Ok(_) => Ok(ExpireOutcome::AlreadyExpired),
                    // a proof upload won the race instead
                    Err(TransitionError::Illegal { from, .. }) => {
                        Ok(ExpireOutcome::NotPending(from))
                    }
                    Err(err) => Err(err),
                }
            }
            OrderStatus::Pending => Ok(ExpireOutcome::StillPending),
            other => Ok(ExpireOutcome::NotPending(other)),
        }
    }

    /// Periodic sweep over pending orders (just another observer under the
    /// idempotent-expiration rule). Returns the ids it expired.
    pub fn sweep_expired(&self, now: TimeStamp<Utc>) -> Result<Vec<String>, TransitionError> {
        let mut expired = Vec::new();
        for item in self.orders.iter() {
            let (_, raw) = item.map_err(StorageError::from)?;
            let order: Order = minicbor::decode(raw.as_ref()).map_err(StorageError::from)?;
            if order.status == OrderStatus::Pending
                && order.is_past_deadline(now)
                && self.expire_if_due(&order.order_id, now)? == ExpireOutcome::Expired
            {
                expired.push(order.order_id);
            }
        }
        Ok(expired)
    }

    /// Admin manual override: force an arbitrary jump outside the table.
    /// Exceptional path; the history entry always carries the note explaining
    /// the override.
    pub fn force_transition(
        &self,
        order_id: &str,
        target: OrderStatus,
        admin_id: &str,
        note: &str,
        now: TimeStamp<Utc>,
    ) -> Result<Order, TransitionError> {
        self.apply(
            order_id,
            target,
            Actor::Admin(admin_id.to_string()),
            now,
            None,
            Some(note.to_string()),
            true,
            &|_| {},
        )
    }

    pub(crate) fn transition_with(
        &self,
        order_id: &str,
        target: OrderStatus,
        actor: Actor,
        now: TimeStamp<Utc>,
        mutate: &dyn Fn(&mut Order),
    ) -> Result<Order, TransitionError> {
        self.apply(order_id, target, actor, now, None, None, false, mutate)
    }

    /// The single atomic read-modify-write every path funnels through.
    #[allow(clippy::too_many_arguments)]
    fn apply(
        &self,
        order_id: &str,
        target: OrderStatus,
        actor: Actor,
        now: TimeStamp<Utc>,
        proof_ref: Option<String>,
        note: Option<String>,
        is_override: bool,
        mutate: &dyn Fn(&mut Order),
    ) -> Result<Order, TransitionError> {
        let mut attempts = 0;
        loop {
            let (raw, order) = self.load(order_id)?;

            // two observers racing to expire: the loser is a no-op
            if target == OrderStatus::Expired && order.status == OrderStatus::Expired {
                return Ok(order);
            }

            if !is_override {
                if target == OrderStatus::WaitingVerification
                    && order.status == OrderStatus::Pending
                    && order.is_past_deadline(now)
                {
                    // the deadline beat the proof upload; apply the
                    // expiration on behalf of this observer
                    self.apply(
                        order_id,
                        OrderStatus::Expired,
                        Actor::System,
                        now,
                        None,
                        None,
                        false,
                        &|_| {},
                    )?;
                    return Err(TransitionError::Expired(order_id.to_string()));
                }

                if target == OrderStatus::Expired
                    && order.status == OrderStatus::Pending
                    && !order.is_past_deadline(now)
                {
                    return Err(TransitionError::NotDue(order_id.to_string()));
                }

                if !order.status.can_become(target) {
                    tracing::warn!(
                        order_id,
                        from = ?order.status,
                        to = ?target,
                        "illegal transition attempt"
                    );
                    self.sink.illegal_transition(order_id, order.status, target);
                    return Err(TransitionError::Illegal {
                        order_id: order_id.to_string(),
                        from: order.status,
                        to: target,
                    });
                }
            }

            let mut next = order.clone();
            next.status = target;
            next.expires_at = if target == OrderStatus::Pending {
                Some(now + self.config.pending_window)
            } else {
                None
            };
            mutate(&mut next);

            let entry = HistoryEntry {
                order_id: order_id.to_string(),
                status: target,
                actor: actor.clone(),
                timestamp: now,
                proof_ref: proof_ref.clone(),
                note: note.clone(),
            };
            next.history.push(entry.clone());
            next.updated_at = now;

            let cbor = minicbor::to_vec(&next).map_err(StorageError::encode)?;
            let swap = self
                .orders
                .compare_and_swap(order_id.as_bytes(), Some(raw), Some(cbor))
                .map_err(StorageError::from)?;

            match swap {
                Ok(()) => {
                    tracing::debug!(order_id, from = ?order.status, to = ?target, "transition applied");
                    let seq = (next.history.len() - 1) as u64;
                    if let Err(err) = self.ledger.append(&entry, seq) {
                        tracing::warn!(order_id, error = %err, "ledger append failed");
                        self.sink.ledger_write_failed(&entry, &err);
                    }
                    return Ok(next);
                }
                Err(_) => {
                    attempts += 1;
                    if attempts >= MAX_CAS_ATTEMPTS {
                        return Err(TransitionError::Contended {
                            order_id: order_id.to_string(),
                            attempts,
                        });
                    }
                    std::thread::sleep(Duration::from_millis(1 << attempts));
                }
            }
        }
    }
}
