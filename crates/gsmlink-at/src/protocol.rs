//! Line framing and frame classification for the AT byte stream.
//!
//! The modem speaks CRLF-terminated text lines. [`next_frame`] cuts one
//! frame off the front of the read buffer; [`classify`] turns the frame's
//! text into a tagged [`Frame`] so that the registry and the observers
//! consume one parsed variant instead of each re-scanning substrings.

use bytes::{Buf, Bytes, BytesMut};

use crate::commands::{self, SmsHeader};

/// The CRLF sequence that terminates every frame.
pub const CRLF: &[u8] = b"\r\n";

/// Remove and return the first complete frame from `buf`.
///
/// The returned frame excludes its terminator. Returns `None` when no
/// terminator is present; the buffer is then left untouched so the partial
/// line can be completed by the next read.
pub fn next_frame(buf: &mut BytesMut) -> Option<Bytes> {
    let pos = find(buf, CRLF)?;
    let frame = buf.split_to(pos).freeze();
    buf.advance(CRLF.len());
    Some(frame)
}

/// Position of the first occurrence of `needle` in `haystack`.
pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// A classified frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame<'a> {
    /// Final result code `OK`.
    Ok,
    /// Final result code `ERROR`.
    Error,
    /// `+CME ERROR: ...` or `+CMS ERROR: ...`.
    ExtendedError(&'a str),
    /// Incoming call indication.
    Ring,
    /// Call ended.
    NoCarrier,
    /// `+CLCC:` current-call listing.
    CallList(&'a str),
    /// `+CMTI:` new message stored at `index`. `None` if the index was
    /// unreadable.
    NewSms { index: Option<u32> },
    /// `+CMGR:` read-message reply.
    SmsRead {
        header: Option<SmsHeader>,
        /// Body lines carried in the same frame, if any.
        body: Option<&'a str>,
    },
    /// `+CMT:` message routed directly to the terminal.
    SmsDelivery {
        header: Option<SmsHeader>,
        body: Option<&'a str>,
    },
    /// `+CSQ:` signal report. `raw` is `None` if the field was not numeric.
    SignalQuality { raw: Option<u8> },
    /// `+CCID:` with the trimmed ICCID.
    Iccid(&'a str),
    /// `+COPS:` operator report.
    Operator(&'a str),
    /// Raw `+CUSD:` line, before reassembly.
    Ussd(&'a str),
    /// A complete, reassembled USSD reply text.
    UssdReply(&'a str),
    /// Body collected after a `+CMGR:` or `+CMT:` header, lines joined
    /// with `\n`. Empty when the reply carried no body.
    SmsBody(&'a str),
    /// Anything else (message bodies, vendor lines).
    Text(&'a str),
}

/// Split a frame into its first line and whatever follows the first CRLF.
fn split_body(line: &str) -> (&str, Option<&str>) {
    match line.split_once("\r\n") {
        Some((head, body)) => (head, Some(body)),
        None => (line, None),
    }
}

/// Classify one frame of text.
pub fn classify(line: &str) -> Frame<'_> {
    match line {
        "OK" => return Frame::Ok,
        "ERROR" => return Frame::Error,
        "RING" => return Frame::Ring,
        "NO CARRIER" => return Frame::NoCarrier,
        _ => {}
    }

    if line.starts_with("+CME ERROR") || line.starts_with("+CMS ERROR") {
        Frame::ExtendedError(line)
    } else if line.starts_with("+CLCC:") {
        Frame::CallList(line)
    } else if line.contains("+CMTI:") {
        Frame::NewSms {
            index: commands::parse_new_sms_index(line).ok(),
        }
    } else if line.contains("+CMGR:") {
        let (head, body) = split_body(line);
        Frame::SmsRead {
            header: commands::parse_sms_header(head),
            body,
        }
    } else if line.contains("+CMT:") {
        let (head, body) = split_body(line);
        Frame::SmsDelivery {
            header: commands::parse_sms_delivery(head),
            body,
        }
    } else if line.contains("+CSQ:") {
        Frame::SignalQuality {
            raw: commands::parse_signal_quality(line).ok(),
        }
    } else if let Some((_, iccid)) = line.split_once("+CCID:") {
        Frame::Iccid(iccid.trim())
    } else if line.contains("+CUSD:") {
        Frame::Ussd(line)
    } else if line.starts_with("+COPS:") {
        Frame::Operator(line)
    } else {
        Frame::Text(line)
    }
}
