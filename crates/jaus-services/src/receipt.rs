//! Receipt: passive record of one sent request and its eventual response.
//!
//! A receipt never sends, waits or retries. The tracker (or any other
//! scheduler) feeds it events; once it leaves `Pending` it stays put until
//! [`Receipt::clear`].

use std::collections::BTreeSet;

use bytes::Bytes;
use tokio::time::{Duration, Instant};

use jaus_core::message::Message;
use jaus_core::wire::{AckNack, Address, Header, WireError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReceiptStatus {
    Pending,
    /// A response arrived, or an ACK when no response was expected.
    Success,
    Nack,
    Timeout,
}

#[derive(Debug, Clone)]
pub struct Receipt {
    sent_header: Header,
    sent: Bytes,
    acceptable: BTreeSet<u16>,
    send_time: Instant,
    update_time: Instant,
    send_count: u32,
    received_ack_nack: AckNack,
    status: ReceiptStatus,
    response_bytes: Option<Bytes>,
    response: Option<Box<dyn Message>>,
}

impl Receipt {
    /// Start tracking `sent`, an encoded message, that has just gone out once.
    ///
    /// `acceptable` lists the command codes that count as a response. It may
    /// be empty when only an acknowledgement is expected.
    pub fn new(sent: Bytes, acceptable: impl IntoIterator<Item = u16>) -> Result<Self, WireError> {
        let sent_header = Header::parse(&sent)?;
        let now = Instant::now();
        Ok(Self {
            sent_header,
            sent,
            acceptable: acceptable.into_iter().collect(),
            send_time: now,
            update_time: now,
            send_count: 1,
            received_ack_nack: AckNack::None,
            status: ReceiptStatus::Pending,
            response_bytes: None,
            response: None,
        })
    }

    pub fn status(&self) -> ReceiptStatus {
        self.status
    }

    pub fn is_pending(&self) -> bool {
        self.status == ReceiptStatus::Pending
    }

    pub fn destination(&self) -> Address {
        self.sent_header.destination
    }

    pub fn sent_bytes(&self) -> &Bytes {
        &self.sent
    }

    pub fn sent_message_code(&self) -> u16 {
        self.sent_header.command_code
    }

    /// Ack/nack mode the request was sent with.
    pub fn sent_ack_nack(&self) -> AckNack {
        self.sent_header.ack_nack
    }

    pub fn received_ack_nack(&self) -> AckNack {
        self.received_ack_nack
    }

    pub fn acceptable_codes(&self) -> &BTreeSet<u16> {
        &self.acceptable
    }

    pub fn accepts(&self, code: u16) -> bool {
        self.acceptable.contains(&code)
    }

    pub fn send_count(&self) -> u32 {
        self.send_count
    }

    /// Time of the most recent transmission.
    pub fn send_time(&self) -> Instant {
        self.send_time
    }

    pub fn update_time(&self) -> Instant {
        self.update_time
    }

    /// Time between the most recent transmission and the last update.
    pub fn response_time(&self) -> Duration {
        self.update_time.saturating_duration_since(self.send_time)
    }

    pub fn response(&self) -> Option<&dyn Message> {
        self.response.as_deref()
    }

    pub fn response_bytes(&self) -> Option<&Bytes> {
        self.response_bytes.as_ref()
    }

    /// Code of the response: the decoded message's, else the raw response
    /// header's, else the lowest acceptable code.
    pub fn response_message_code(&self) -> Option<u16> {
        if let Some(message) = &self.response {
            return Some(message.command_code());
        }
        if let Some(code) = self
            .response_bytes
            .as_ref()
            .and_then(|raw| Header::peek_command_code(raw))
        {
            return Some(code);
        }
        self.acceptable.first().copied()
    }

    /// An acknowledgement was requested and a positive one came back.
    pub fn received_acknowledge(&self) -> bool {
        self.sent_ack_nack() == AckNack::Request && self.received_ack_nack == AckNack::Ack
    }

    /// An ACK or NACK has been recorded for this transmission.
    pub fn is_acknowledged(&self) -> bool {
        self.received_ack_nack.is_reply()
    }

    /// Reset to `Pending` with no transmissions recorded.
    ///
    /// With `release_captured` the decoded response is handed back to the
    /// caller; otherwise it is dropped. The raw response is always dropped.
    pub fn clear(&mut self, release_captured: bool) -> Option<Box<dyn Message>> {
        let now = Instant::now();
        self.send_time = now;
        self.update_time = now;
        self.send_count = 0;
        self.received_ack_nack = AckNack::None;
        self.status = ReceiptStatus::Pending;
        self.response_bytes = None;
        let captured = self.response.take();
        if release_captured {
            captured
        } else {
            None
        }
    }

    // ── Events ───────────────────────────────────────────────────────────────

    pub(crate) fn record_send(&mut self, now: Instant) {
        self.send_count = self.send_count.saturating_add(1);
        self.send_time = now;
        self.update_time = now;
    }

    /// An ACK or NACK frame for the request. Returns `false` if the receipt
    /// was already settled or the frame is neither.
    ///
    /// A NACK settles the receipt. An ACK settles it only when no response
    /// is expected; otherwise it stays pending for the response.
    pub(crate) fn record_ack_nack(&mut self, ack_nack: AckNack, now: Instant) -> bool {
        if !ack_nack.is_reply() || !self.is_pending() {
            return false;
        }
        self.received_ack_nack = ack_nack;
        self.update_time = now;
        match ack_nack {
            AckNack::Nack => self.settle(ReceiptStatus::Nack, now),
            _ if self.acceptable.is_empty() => self.settle(ReceiptStatus::Success, now),
            _ => tracing::trace!(
                code = self.sent_header.command_code,
                destination = %self.sent_header.destination,
                "acknowledged, awaiting response"
            ),
        }
        true
    }

    pub(crate) fn record_response(
        &mut self,
        raw: Bytes,
        decoded: Option<Box<dyn Message>>,
        now: Instant,
    ) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.response_bytes = Some(raw);
        self.response = decoded;
        self.settle(ReceiptStatus::Success, now);
        true
    }

    pub(crate) fn mark_timeout(&mut self, now: Instant) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.settle(ReceiptStatus::Timeout, now);
        true
    }

    fn settle(&mut self, status: ReceiptStatus, now: Instant) {
        tracing::debug!(
            code = self.sent_header.command_code,
            destination = %self.sent_header.destination,
            from = ?self.status,
            to = ?status,
            sends = self.send_count,
            "receipt settled"
        );
        self.status = status;
        self.update_time = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{codes, QueryTime, ReportTime};
    use jaus_core::message::encode;

    fn sent(ack_nack: AckNack) -> Bytes {
        let mut header = Header::new(0, Address::new(1, 1, 5, 1), Address::new(1, 1, 2, 1));
        header.ack_nack = ack_nack;
        encode(&QueryTime::default(), &header).unwrap().freeze()
    }

    fn response() -> Bytes {
        let header = Header::new(0, Address::new(1, 1, 2, 1), Address::new(1, 1, 5, 1));
        encode(&ReportTime::default(), &header).unwrap().freeze()
    }

    #[test]
    fn new_receipt_is_pending() {
        let receipt = Receipt::new(sent(AckNack::None), [codes::REPORT_TIME]).unwrap();
        assert_eq!(receipt.status(), ReceiptStatus::Pending);
        assert_eq!(receipt.send_count(), 1);
        assert_eq!(receipt.sent_message_code(), codes::QUERY_TIME);
        assert_eq!(receipt.destination(), Address::new(1, 1, 5, 1));
        assert_eq!(receipt.response_message_code(), Some(codes::REPORT_TIME));
        assert!(!receipt.received_acknowledge());
    }

    #[test]
    fn malformed_sent_buffer_is_rejected() {
        assert!(Receipt::new(Bytes::from_static(&[0x03]), []).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn response_settles_and_times_itself() {
        let mut receipt = Receipt::new(sent(AckNack::None), [codes::REPORT_TIME]).unwrap();
        tokio::time::advance(Duration::from_millis(40)).await;
        assert!(receipt.record_response(response(), None, Instant::now()));

        assert_eq!(receipt.status(), ReceiptStatus::Success);
        assert_eq!(receipt.response_time(), Duration::from_millis(40));
        // Falls back to the raw header when nothing was decoded.
        assert_eq!(receipt.response_message_code(), Some(codes::REPORT_TIME));

        // Terminal: later events are ignored.
        assert!(!receipt.mark_timeout(Instant::now()));
        assert!(!receipt.record_ack_nack(AckNack::Nack, Instant::now()));
        assert_eq!(receipt.status(), ReceiptStatus::Success);
    }

    #[test]
    fn acknowledge_requires_request_and_ack() {
        let mut receipt = Receipt::new(sent(AckNack::Request), []).unwrap();
        assert!(!receipt.record_ack_nack(AckNack::Request, Instant::now()));
        assert!(receipt.record_ack_nack(AckNack::Ack, Instant::now()));
        assert!(receipt.received_acknowledge());
        assert_eq!(receipt.response_message_code(), None);

        let mut receipt = Receipt::new(sent(AckNack::Request), []).unwrap();
        receipt.record_ack_nack(AckNack::Nack, Instant::now());
        assert_eq!(receipt.status(), ReceiptStatus::Nack);
        assert!(!receipt.received_acknowledge());

        let mut receipt = Receipt::new(sent(AckNack::None), []).unwrap();
        receipt.record_ack_nack(AckNack::Ack, Instant::now());
        assert!(!receipt.received_acknowledge());
    }

    #[test]
    fn ack_keeps_receipt_pending_until_response() {
        let mut receipt = Receipt::new(sent(AckNack::Request), [codes::REPORT_TIME]).unwrap();
        assert!(receipt.record_ack_nack(AckNack::Ack, Instant::now()));
        assert_eq!(receipt.status(), ReceiptStatus::Pending);
        assert!(receipt.is_acknowledged());
        assert!(receipt.received_acknowledge());

        assert!(receipt.record_response(response(), None, Instant::now()));
        assert_eq!(receipt.status(), ReceiptStatus::Success);
        assert!(receipt.response_bytes().is_some());
        assert!(receipt.received_acknowledge());
    }

    #[test]
    fn nack_settles_even_when_response_expected() {
        let mut receipt = Receipt::new(sent(AckNack::Request), [codes::REPORT_TIME]).unwrap();
        assert!(receipt.record_ack_nack(AckNack::Nack, Instant::now()));
        assert_eq!(receipt.status(), ReceiptStatus::Nack);
        assert!(!receipt.record_response(response(), None, Instant::now()));
        assert!(receipt.response_bytes().is_none());
    }

    #[test]
    fn timeout_is_terminal() {
        let mut receipt = Receipt::new(sent(AckNack::None), [codes::REPORT_TIME]).unwrap();
        receipt.record_send(Instant::now());
        assert_eq!(receipt.send_count(), 2);
        assert!(receipt.mark_timeout(Instant::now()));
        assert!(!receipt.record_response(response(), None, Instant::now()));
        assert_eq!(receipt.status(), ReceiptStatus::Timeout);
        assert!(receipt.response_bytes().is_none());
    }

    #[test]
    fn clear_resets_and_optionally_releases_response() {
        let mut receipt = Receipt::new(sent(AckNack::None), [codes::REPORT_TIME]).unwrap();
        let decoded: Box<dyn Message> = Box::new(ReportTime::default());
        receipt.record_response(response(), Some(decoded.clone()), Instant::now());
        assert_eq!(
            receipt.response().map(|m| m.command_code()),
            Some(codes::REPORT_TIME)
        );

        let released = receipt.clear(true).unwrap();
        assert_eq!(released.command_code(), codes::REPORT_TIME);
        assert_eq!(receipt.status(), ReceiptStatus::Pending);
        assert_eq!(receipt.send_count(), 0);
        assert!(receipt.response().is_none());
        assert!(receipt.response_bytes().is_none());

        receipt.record_response(response(), Some(decoded), Instant::now());
        assert!(receipt.clear(false).is_none());
        assert!(receipt.response().is_none());
    }
}
