//! Delivery tracking: correlates outgoing requests with incoming replies.
//!
//! The tracker holds one [`Receipt`] per outstanding request and matches
//! incoming frames against them. It reports which receipts are overdue but
//! leaves resending and timers to the caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::time::{Duration, Instant};

use jaus_core::codec::Packet;
use jaus_core::config::DeliveryConfig;
use jaus_core::message::Message;
use jaus_core::wire::{AckNack, Header, WireError, HEADER_SIZE};

use crate::catalog::MessageCatalog;
use crate::receipt::{Receipt, ReceiptStatus};

pub type ReceiptId = u64;

/// Retry budget applied by [`DeliveryTracker::overdue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryPolicy {
    /// Total transmissions allowed, the first one included.
    pub max_sends: u32,
    /// Wait after each transmission before it counts as unanswered.
    pub timeout: Duration,
}

impl From<&DeliveryConfig> for DeliveryPolicy {
    fn from(config: &DeliveryConfig) -> Self {
        Self {
            max_sends: config.max_sends,
            timeout: config.timeout(),
        }
    }
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self::from(&DeliveryConfig::default())
    }
}

/// What the caller should do about an unanswered receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overdue {
    /// Send again, then call [`DeliveryTracker::record_retry`].
    Resend,
    /// Out of transmissions; call [`DeliveryTracker::mark_timeout`].
    Exhausted,
}

#[derive(Clone)]
pub struct DeliveryTracker {
    receipts: Arc<DashMap<ReceiptId, Receipt>>,
    next_id: Arc<AtomicU64>,
    catalog: MessageCatalog,
}

impl DeliveryTracker {
    /// Responses are decoded through `catalog` when their code is known.
    pub fn new(catalog: MessageCatalog) -> Self {
        Self {
            receipts: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
            catalog,
        }
    }

    /// Track a message that has just been sent once.
    pub fn register(
        &self,
        sent: Bytes,
        acceptable: impl IntoIterator<Item = u16>,
    ) -> Result<ReceiptId, WireError> {
        let receipt = Receipt::new(sent, acceptable)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(
            id,
            code = receipt.sent_message_code(),
            destination = %receipt.destination(),
            "receipt registered"
        );
        self.receipts.insert(id, receipt);
        Ok(id)
    }

    /// Offer an incoming frame to the pending receipts.
    ///
    /// Ack/nack frames go to the oldest pending, not yet acknowledged receipt
    /// that asked for an acknowledgement of the same command code from that
    /// source. Other frames settle the oldest pending receipt from that
    /// source that accepts their command code, acknowledged or not. Returns
    /// the receipt the frame was recorded against, if any.
    pub fn on_incoming(&self, raw: Bytes) -> Option<ReceiptId> {
        let header = match Header::parse(&raw) {
            Ok(header) => header,
            Err(e) => {
                tracing::trace!(error = %e, "ignoring unparseable frame");
                return None;
            }
        };
        let reply = header.ack_nack.is_reply();
        let id = self.oldest_pending(|receipt| {
            if !receipt.destination().matches(&header.source) {
                return false;
            }
            if reply {
                receipt.sent_ack_nack() == AckNack::Request
                    && !receipt.is_acknowledged()
                    && receipt.sent_message_code() == header.command_code
            } else {
                receipt.accepts(header.command_code)
            }
        })?;

        let now = Instant::now();
        let recorded = if reply {
            self.receipts
                .get_mut(&id)
                .map(|mut r| r.record_ack_nack(header.ack_nack, now))
        } else {
            let decoded = self.decode_response(&raw);
            self.receipts
                .get_mut(&id)
                .map(|mut r| r.record_response(raw, decoded, now))
        };
        recorded.filter(|done| *done).map(|_| id)
    }

    fn oldest_pending(&self, mut matches: impl FnMut(&Receipt) -> bool) -> Option<ReceiptId> {
        self.receipts
            .iter()
            .filter(|entry| entry.value().is_pending() && matches(entry.value()))
            .map(|entry| *entry.key())
            .min()
    }

    fn decode_response(&self, raw: &Bytes) -> Option<Box<dyn Message>> {
        let mut packet = Packet::from(raw.clone());
        match self.catalog.decode(&mut packet) {
            Ok(decoded) => decoded.map(|(_, message)| message),
            Err(e) => {
                tracing::debug!(error = %e, "response kept undecoded");
                None
            }
        }
    }

    /// Note another transmission of a pending receipt.
    pub fn record_retry(&self, id: ReceiptId) -> bool {
        match self.receipts.get_mut(&id) {
            Some(mut receipt) if receipt.is_pending() => {
                receipt.record_send(Instant::now());
                true
            }
            _ => false,
        }
    }

    pub fn mark_timeout(&self, id: ReceiptId) -> bool {
        self.receipts
            .get_mut(&id)
            .map(|mut receipt| receipt.mark_timeout(Instant::now()))
            .unwrap_or(false)
    }

    /// Pending receipts whose last transmission is at least `policy.timeout`
    /// old at `now`, in registration order.
    pub fn overdue(&self, policy: &DeliveryPolicy, now: Instant) -> Vec<(ReceiptId, Overdue)> {
        let mut overdue: Vec<(ReceiptId, Overdue)> = self
            .receipts
            .iter()
            .filter(|entry| {
                let receipt = entry.value();
                receipt.is_pending()
                    && now.saturating_duration_since(receipt.send_time()) >= policy.timeout
            })
            .map(|entry| {
                let action = if entry.value().send_count() >= policy.max_sends {
                    Overdue::Exhausted
                } else {
                    Overdue::Resend
                };
                (*entry.key(), action)
            })
            .collect();
        overdue.sort_unstable_by_key(|(id, _)| *id);
        overdue
    }

    pub fn status(&self, id: ReceiptId) -> Option<ReceiptStatus> {
        self.receipts.get(&id).map(|r| r.status())
    }

    /// Copy of a receipt.
    pub fn get(&self, id: ReceiptId) -> Option<Receipt> {
        self.receipts.get(&id).map(|r| r.clone())
    }

    /// Stop tracking a receipt and hand it back.
    pub fn remove(&self, id: ReceiptId) -> Option<Receipt> {
        self.receipts.remove(&id).map(|(_, receipt)| receipt)
    }

    pub fn len(&self) -> usize {
        self.receipts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receipts.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.receipts.iter().filter(|r| r.value().is_pending()).count()
    }

    /// Log counts per status, and each timed-out request.
    pub fn print_stats(&self) {
        let mut counts: HashMap<ReceiptStatus, usize> = HashMap::new();
        let mut retried = 0;
        for entry in self.receipts.iter() {
            *counts.entry(entry.value().status()).or_default() += 1;
            if entry.value().send_count() > 1 {
                retried += 1;
            }
        }

        if self.receipts.is_empty() {
            return;
        }
        let count = |status| counts.get(&status).copied().unwrap_or(0);
        tracing::info!(
            total = self.receipts.len(),
            pending = count(ReceiptStatus::Pending),
            success = count(ReceiptStatus::Success),
            nack = count(ReceiptStatus::Nack),
            timeout = count(ReceiptStatus::Timeout),
            retried,
            "delivery tracker stats"
        );

        for entry in self.receipts.iter() {
            let receipt = entry.value();
            if receipt.status() == ReceiptStatus::Timeout {
                let sent = receipt.sent_bytes();
                let header = hex::encode(&sent[..HEADER_SIZE.min(sent.len())]);
                tracing::info!(
                    id = *entry.key(),
                    destination = %receipt.destination(),
                    sends = receipt.send_count(),
                    header = %header,
                    "request timed out"
                );
            }
        }
    }
}
