//! SMS retrieval.
//!
//! `+CMTI:` notifications queue message-store indices. Messages are read
//! back one at a time with `AT+CMGR=<index>`; the next read is issued only
//! after the reply to the previous one has been processed, so retrieval
//! follows notification order.
//!
//! A `+CMGR:` header arrives as its own frame. The lines after it, up to
//! the final result code, are the message body; the observer asks the
//! demultiplexer to collect them so a body reading "OK" or "RING" is not
//! mistaken for modem traffic. A body inside the header frame is accepted
//! too. Messages routed straight to the terminal (`+CMT:`) carry a one-line
//! body and are not queued.

use std::collections::VecDeque;

use gsmlink_core::{ModemEvent, SmsMessage};

use crate::commands::{self, SmsHeader};
use crate::observer::{BodyEnd, Observer, ObserverContext};
use crate::protocol::Frame;
use crate::ucs2::decode_ucs2_or_raw;

/// Where a header whose body has not arrived yet came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// Read back with `AT+CMGR=<index>`.
    Store(u32),
    /// Routed directly with `+CMT:`.
    Direct,
}

/// A header waiting for its body. `header` is `None` when the body is
/// collected only to be discarded (already-read or unparseable replies).
#[derive(Debug)]
struct AwaitingBody {
    origin: Origin,
    header: Option<SmsHeader>,
}

#[derive(Debug, Default)]
pub struct SmsObserver {
    queue: VecDeque<u32>,
    in_flight: Option<u32>,
    awaiting_body: Option<AwaitingBody>,
    direct_count: u64,
}

impl SmsObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indices waiting to be read, excluding the one in flight.
    pub fn queued(&self) -> Vec<u32> {
        self.queue.iter().copied().collect()
    }

    pub fn in_flight(&self) -> Option<u32> {
        self.in_flight
    }

    /// Issue the next read if none is outstanding.
    fn advance(&mut self, ctx: &mut ObserverContext<'_>) {
        if self.in_flight.is_some() {
            return;
        }
        if let Some(index) = self.queue.pop_front() {
            tracing::debug!(index, remaining = self.queue.len(), "reading SMS");
            ctx.send(commands::read_sms(index));
            self.in_flight = Some(index);
        }
    }

    /// Give up on the read in flight and move on.
    fn release(&mut self, ctx: &mut ObserverContext<'_>) {
        self.awaiting_body = None;
        self.in_flight = None;
        self.advance(ctx);
    }

    fn on_header(
        &mut self,
        origin: Origin,
        header: Option<SmsHeader>,
        body: Option<&str>,
        ctx: &mut ObserverContext<'_>,
    ) {
        match (header, body) {
            (Some(header), Some(body)) => self.complete(origin, header, body, ctx),
            (None, Some(_)) => self.release(ctx),
            (header, None) => {
                let end = match origin {
                    Origin::Store(_) => BodyEnd::FinalResult,
                    Origin::Direct => BodyEnd::NextLine,
                };
                self.awaiting_body = Some(AwaitingBody { origin, header });
                ctx.collect_body(end);
            }
        }
    }

    fn on_body(&mut self, body: &str, ctx: &mut ObserverContext<'_>) {
        let Some(AwaitingBody { origin, header }) = self.awaiting_body.take() else {
            return;
        };
        match (origin, header) {
            (Origin::Store(index), Some(_)) if body.is_empty() => {
                tracing::warn!(index, "SMS read returned no body");
                self.release(ctx);
            }
            (Origin::Store(index), None) => {
                tracing::debug!(index, "message is not unread, skipping");
                self.release(ctx);
            }
            (origin, Some(header)) => self.complete(origin, header, body, ctx),
            (Origin::Direct, None) => {}
        }
    }

    fn complete(
        &mut self,
        origin: Origin,
        header: SmsHeader,
        body: &str,
        ctx: &mut ObserverContext<'_>,
    ) {
        let (index, name) = match origin {
            Origin::Store(index) => (Some(index), format!("sms-{index}")),
            Origin::Direct => {
                self.direct_count += 1;
                (None, format!("sms-direct-{}", self.direct_count))
            }
        };

        let message = SmsMessage {
            index,
            sender: header.sender,
            timestamp: header.timestamp,
            body: decode_ucs2_or_raw(body),
        };
        tracing::info!(
            sender = %message.sender,
            timestamp = %message.timestamp,
            body = %message.body,
            "SMS received"
        );

        if let Err(e) = ctx.artifacts().write_text(&name, &message.body) {
            tracing::warn!(artifact = %name, error = %e, "failed to store SMS");
        }
        ctx.emit(ModemEvent::SmsReceived(message));

        if matches!(origin, Origin::Store(_)) {
            self.in_flight = None;
            self.advance(ctx);
        }
    }
}

impl Observer for SmsObserver {
    fn name(&self) -> &'static str {
        "sms"
    }

    fn handle(&mut self, frame: &Frame<'_>, ctx: &mut ObserverContext<'_>) {
        match frame {
            Frame::NewSms { index: Some(index) } => {
                tracing::debug!(index, "new SMS notification");
                self.queue.push_back(*index);
                self.advance(ctx);
            }
            Frame::NewSms { index: None } => {
                tracing::warn!("+CMTI notification without a readable index");
            }
            Frame::SmsRead { header, body } => {
                let Some(index) = self.in_flight else {
                    tracing::debug!("+CMGR reply with no read in flight");
                    return;
                };
                let header = header.clone().filter(SmsHeader::is_unread);
                self.on_header(Origin::Store(index), header, *body, ctx);
            }
            Frame::SmsDelivery {
                header: Some(header),
                body,
            } => {
                self.on_header(Origin::Direct, Some(header.clone()), *body, ctx);
            }
            Frame::SmsBody(body) => self.on_body(body, ctx),
            Frame::ExtendedError(text) if text.starts_with("+CMS ERROR") => {
                if let Some(index) = self.in_flight {
                    tracing::warn!(index, error = %text, "SMS read failed");
                    self.release(ctx);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observers::testing::Harness;

    const UNREAD_5: &str = r#"+CMGR: "REC UNREAD","+84901234567",,"24/05/01,10:00:00+28""#;
    const UNREAD_7: &str = r#"+CMGR: "REC UNREAD","0987654321",,"24/05/01,10:00:05+28""#;

    #[test]
    fn notification_triggers_read() {
        let mut h = Harness::new();
        let mut sms = SmsObserver::new();
        h.line(&mut sms, r#"+CMTI: "ME",5"#);
        assert_eq!(h.sent(), vec!["AT+CMGR=5"]);
        assert_eq!(sms.in_flight(), Some(5));
    }

    #[test]
    fn header_asks_for_body_up_to_final_result() {
        let mut h = Harness::new();
        let mut sms = SmsObserver::new();
        h.line(&mut sms, r#"+CMTI: "ME",5"#);
        h.line(&mut sms, UNREAD_5);
        assert_eq!(h.body_request, Some(BodyEnd::FinalResult));
    }

    #[test]
    fn second_read_waits_for_first_reply() {
        let mut h = Harness::new();
        let mut sms = SmsObserver::new();
        h.line(&mut sms, r#"+CMTI: "ME",5"#);
        h.line(&mut sms, r#"+CMTI: "ME",7"#);
        assert_eq!(h.sent(), vec!["AT+CMGR=5"]);
        assert_eq!(sms.queued(), vec![7]);

        // Header alone does not finish the read.
        h.line(&mut sms, UNREAD_5);
        assert!(h.sent().is_empty());

        h.body(&mut sms, "Hello");
        assert_eq!(h.sent(), vec!["AT+CMGR=7"]);
        assert_eq!(sms.in_flight(), Some(7));

        h.line(&mut sms, UNREAD_7);
        h.body(&mut sms, "World");
        assert!(h.sent().is_empty());
        assert_eq!(sms.in_flight(), None);

        let texts = h.sink.texts();
        assert_eq!(
            texts,
            vec![
                ("sms-5".to_string(), "Hello".to_string()),
                ("sms-7".to_string(), "World".to_string()),
            ]
        );
    }

    #[test]
    fn body_text_is_not_reinterpreted() {
        let mut h = Harness::new();
        let mut sms = SmsObserver::new();
        h.line(&mut sms, r#"+CMTI: "ME",5"#);
        h.line(&mut sms, UNREAD_5);
        h.body(&mut sms, "+CMTI: \"ME\",9");
        assert_eq!(sms.queued(), Vec::<u32>::new());
        assert_eq!(
            h.sink.texts(),
            vec![("sms-5".to_string(), "+CMTI: \"ME\",9".to_string())]
        );
    }

    #[test]
    fn ucs2_body_is_decoded_and_published() {
        let mut h = Harness::new();
        let mut sms = SmsObserver::new();
        h.line(&mut sms, r#"+CMTI: "SM",1"#);
        h.line(&mut sms, UNREAD_5);
        h.body(&mut sms, "00480069");

        let events = h.drain_events();
        match events.as_slice() {
            [ModemEvent::SmsReceived(msg)] => {
                assert_eq!(msg.index, Some(1));
                assert_eq!(msg.sender, "+84901234567");
                assert_eq!(msg.timestamp, "24/05/01,10:00:00+28");
                assert_eq!(msg.body, "Hi");
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn odd_length_body_is_kept_raw() {
        let mut h = Harness::new();
        let mut sms = SmsObserver::new();
        h.line(&mut sms, r#"+CMTI: "SM",2"#);
        h.line(&mut sms, UNREAD_5);
        h.body(&mut sms, "004");
        assert_eq!(h.sink.texts(), vec![("sms-2".to_string(), "004".to_string())]);
    }

    #[test]
    fn inline_body_completes_immediately() {
        let mut h = Harness::new();
        let mut sms = SmsObserver::new();
        h.line(&mut sms, r#"+CMTI: "ME",3"#);
        h.sent();
        h.line(&mut sms, &format!("{UNREAD_5}\r\nline one\r\nline two"));
        assert_eq!(
            h.sink.texts(),
            vec![("sms-3".to_string(), "line one\r\nline two".to_string())]
        );
        assert_eq!(sms.in_flight(), None);
        assert_eq!(h.body_request, None);
    }

    #[test]
    fn empty_body_releases_slot() {
        let mut h = Harness::new();
        let mut sms = SmsObserver::new();
        h.line(&mut sms, r#"+CMTI: "ME",5"#);
        h.line(&mut sms, r#"+CMTI: "ME",7"#);
        h.sent();
        h.line(&mut sms, UNREAD_5);
        h.body(&mut sms, "");
        assert_eq!(h.sent(), vec!["AT+CMGR=7"]);
        assert!(h.sink.texts().is_empty());
    }

    #[test]
    fn read_message_body_is_discarded() {
        let mut h = Harness::new();
        let mut sms = SmsObserver::new();
        h.line(&mut sms, r#"+CMTI: "ME",5"#);
        h.line(&mut sms, r#"+CMTI: "ME",7"#);
        h.sent();
        h.line(&mut sms, r#"+CMGR: "REC READ","+84901234567",,"24/05/01,10:00:00+28""#);
        assert!(h.sent().is_empty());
        h.body(&mut sms, "seen before");
        assert_eq!(h.sent(), vec!["AT+CMGR=7"]);
        assert!(h.sink.texts().is_empty());
    }

    #[test]
    fn cms_error_releases_slot() {
        let mut h = Harness::new();
        let mut sms = SmsObserver::new();
        h.line(&mut sms, r#"+CMTI: "ME",5"#);
        h.line(&mut sms, r#"+CMTI: "ME",7"#);
        h.sent();
        h.line(&mut sms, "+CMS ERROR: invalid memory index");
        assert_eq!(h.sent(), vec!["AT+CMGR=7"]);
    }

    #[test]
    fn body_without_header_is_ignored() {
        let mut h = Harness::new();
        let mut sms = SmsObserver::new();
        h.line(&mut sms, "stray text");
        h.body(&mut sms, "stray body");
        assert!(h.sent().is_empty());
        assert!(h.sink.texts().is_empty());
    }

    #[test]
    fn direct_delivery_does_not_touch_queue() {
        let mut h = Harness::new();
        let mut sms = SmsObserver::new();
        h.line(&mut sms, r#"+CMTI: "ME",5"#);
        h.sent();
        h.line(&mut sms, r#"+CMT: "+84911111111",,"24/05/01,11:00:00+28""#);
        assert_eq!(h.body_request, Some(BodyEnd::NextLine));
        h.body(&mut sms, "pushed");
        assert_eq!(sms.in_flight(), Some(5));
        assert_eq!(
            h.sink.texts(),
            vec![("sms-direct-1".to_string(), "pushed".to_string())]
        );
    }

    #[test]
    fn bad_index_is_not_queued() {
        let mut h = Harness::new();
        let mut sms = SmsObserver::new();
        h.line(&mut sms, r#"+CMTI: "ME",abc"#);
        assert!(h.sent().is_empty());
        assert!(sms.queued().is_empty());
    }
}
