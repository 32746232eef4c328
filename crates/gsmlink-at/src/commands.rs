//! AT command builders and response parsers.
//!
//! This module provides the AT command strings the session and observers
//! send, and pure parsers for the replies they care about. Nothing here
//! performs I/O; builders return the command text without the line
//! terminator, which the façade appends via [`encode_command`].
//!
//! The vocabulary targets Quectel-style modules (`AT+QAUDRD` recording,
//! `AT+QFDWL` file download) in SMS text mode.

use std::sync::LazyLock;

use gsmlink_core::{Error, Result};
use regex::Regex;

/// Line terminator appended to every outbound command.
pub const TERMINATOR: &str = "\r\n";

// ---------------------------------------------------------------
// Fixed commands
// ---------------------------------------------------------------

/// Report errors as verbose `+CME ERROR: <text>`.
pub const VERBOSE_ERRORS: &str = "AT+CMEE=2";
/// Put SMS handling into text mode.
pub const SMS_TEXT_MODE: &str = "AT+CMGF=1";
/// Route new-message indications to the terminal.
pub const NEW_MESSAGE_INDICATIONS: &str = "AT+CNMI=2,2,0,0,0";
/// Enable calling-line identification (`+CLIP:` after `RING`).
pub const CALLER_ID: &str = "AT+CLIP=1";
/// Query the SIM ICCID.
pub const QUERY_ICCID: &str = "AT+CCID";
/// Query the registered operator.
pub const QUERY_OPERATOR: &str = "AT+COPS?";
/// Answer an incoming call.
pub const ANSWER: &str = "ATA";
/// Hang up.
pub const HANG_UP: &str = "ATH";
/// Stop device-side call recording.
pub const STOP_RECORDING: &str = "AT+QAUDRD=0";
/// List current calls.
pub const LIST_CALLS: &str = "AT+CLCC";
/// Query signal quality.
pub const SIGNAL_QUALITY: &str = "AT+CSQ";

// ---------------------------------------------------------------
// Command builders
// ---------------------------------------------------------------

/// Build a USSD request (`AT+CUSD=1,"<code>",15`).
pub fn ussd(code: &str) -> String {
    format!("AT+CUSD=1,\"{code}\",15")
}

/// Build a "read message" command (`AT+CMGR=<index>`).
pub fn read_sms(index: u32) -> String {
    format!("AT+CMGR={index}")
}

/// Build a "start recording" command (`AT+QAUDRD=1,"<path>",<duration>[,<flag>]`).
pub fn start_recording(path: &str, duration_secs: u32, flag: Option<u8>) -> String {
    match flag {
        Some(flag) => format!("AT+QAUDRD=1,\"{path}\",{duration_secs},{flag}"),
        None => format!("AT+QAUDRD=1,\"{path}\",{duration_secs}"),
    }
}

/// Build a file download command (`AT+QFDWL="<name>.wav";`).
pub fn download_file(name: &str) -> String {
    format!("AT+QFDWL=\"{name}.wav\";")
}

/// Validate a command and append the line terminator.
///
/// # Errors
///
/// Returns [`Error::InvalidParameter`] if the command is empty or already
/// contains CR or LF, which would split it into several commands on the wire.
pub fn encode_command(command: &str) -> Result<Vec<u8>> {
    if command.is_empty() {
        return Err(Error::InvalidParameter("empty command".into()));
    }
    if command.contains(['\r', '\n']) {
        return Err(Error::InvalidParameter(format!(
            "command contains a line terminator: {command:?}"
        )));
    }
    let mut bytes = Vec::with_capacity(command.len() + TERMINATOR.len());
    bytes.extend_from_slice(command.as_bytes());
    bytes.extend_from_slice(TERMINATOR.as_bytes());
    Ok(bytes)
}

// ---------------------------------------------------------------
// Response parsers
// ---------------------------------------------------------------

/// Header of a `+CMGR:` reply in text mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmsHeader {
    /// Storage status, e.g. `REC UNREAD`.
    pub status: String,
    pub sender: String,
    pub timestamp: String,
}

impl SmsHeader {
    /// Whether this is a message the modem has not delivered before.
    pub fn is_unread(&self) -> bool {
        self.status == "REC UNREAD"
    }
}

static CMGR_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\+CMGR: "([^"]*)","([^"]*)",(?:"[^"]*")?,"([^"]*)""#)
        .expect("+CMGR header pattern is valid")
});

static CMT_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\+CMT: "([^"]*)",(?:"[^"]*")?,"([^"]*)""#)
        .expect("+CMT header pattern is valid")
});

static PHONE_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\+\d{10,12}|\d{10,}").expect("phone number pattern is valid")
});

/// Parse the header line of a `+CMGR:` reply.
///
/// Accepts both an empty and a quoted alpha field between sender and
/// timestamp: `+CMGR: "REC UNREAD","+84901234567",,"24/05/01,10:00:00+28"`.
pub fn parse_sms_header(line: &str) -> Option<SmsHeader> {
    let caps = CMGR_HEADER.captures(line)?;
    Some(SmsHeader {
        status: caps[1].to_string(),
        sender: caps[2].to_string(),
        timestamp: caps[3].to_string(),
    })
}

/// Parse the header line of a directly routed `+CMT:` message.
pub fn parse_sms_delivery(line: &str) -> Option<SmsHeader> {
    let caps = CMT_HEADER.captures(line)?;
    Some(SmsHeader {
        status: "REC UNREAD".to_string(),
        sender: caps[1].to_string(),
        timestamp: caps[2].to_string(),
    })
}

/// Parse the message-store index from a `+CMTI: "<mem>",<index>` line.
pub fn parse_new_sms_index(line: &str) -> Result<u32> {
    let field = line
        .rsplit(',')
        .next()
        .map(str::trim)
        .unwrap_or_default();
    field
        .parse::<u32>()
        .map_err(|e| Error::Decode(format!("invalid +CMTI index {field:?} ({e})")))
}

/// Parse the raw RSSI (0-31, 99 = unknown) from a `+CSQ: <rssi>,<ber>` line.
pub fn parse_signal_quality(line: &str) -> Result<u8> {
    let rest = line
        .split_once("+CSQ:")
        .map(|(_, rest)| rest)
        .ok_or_else(|| Error::Decode(format!("not a +CSQ line: {line:?}")))?;
    let field = rest.split(',').next().unwrap_or_default().trim();
    field
        .parse::<u8>()
        .map_err(|e| Error::Decode(format!("invalid +CSQ value {field:?} ({e})")))
}

/// Rescale a raw RSSI value (0-31) to a 0-5 bar bucket.
pub fn rescale_signal(raw: u8) -> u8 {
    ((u32::from(raw) * 5) / 31) as u8
}

/// Extract the ICCID from a `+CCID: <iccid>` line.
pub fn parse_iccid(line: &str) -> String {
    match line.split_once("+CCID:") {
        Some((_, rest)) => rest.trim().to_string(),
        None => line.trim().to_string(),
    }
}

/// Text between the first and last `"` of a line.
///
/// Returns `None` unless the line has at least two quote characters.
pub fn quoted_payload(line: &str) -> Option<&str> {
    let first = line.find('"')?;
    let last = line.rfind('"')?;
    (last > first).then(|| &line[first + 1..last])
}

/// Extract the operator name from a `+COPS: 0,0,"<name>",7` reply.
pub fn parse_operator(line: &str) -> Option<String> {
    quoted_payload(line).map(|name| name.trim().to_string())
}

/// Find a subscriber phone number in free text (USSD reply bodies).
///
/// Matches either ten or more consecutive digits, or `+` followed by a
/// country code and nine subscriber digits.
pub fn find_phone_number(text: &str) -> Option<&str> {
    PHONE_NUMBER.find(text).map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ussd_command() {
        assert_eq!(ussd("*101#"), "AT+CUSD=1,\"*101#\",15");
    }

    #[test]
    fn read_sms_command() {
        assert_eq!(read_sms(5), "AT+CMGR=5");
    }

    #[test]
    fn start_recording_with_and_without_flag() {
        assert_eq!(
            start_recording("RAM:record.wav", 600, None),
            "AT+QAUDRD=1,\"RAM:record.wav\",600"
        );
        assert_eq!(
            start_recording("RAM:record.wav", 600, Some(1)),
            "AT+QAUDRD=1,\"RAM:record.wav\",600,1"
        );
    }

    #[test]
    fn download_file_command() {
        assert_eq!(download_file("RAM:record"), "AT+QFDWL=\"RAM:record.wav\";");
    }

    #[test]
    fn encode_appends_terminator() {
        assert_eq!(encode_command("AT+CSQ").unwrap(), b"AT+CSQ\r\n");
    }

    #[test]
    fn encode_rejects_embedded_terminators() {
        assert!(matches!(
            encode_command("AT\r\nATH"),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(encode_command(""), Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn sms_header_with_empty_alpha() {
        let header =
            parse_sms_header(r#"+CMGR: "REC UNREAD","+84901234567",,"24/05/01,10:00:00+28""#)
                .unwrap();
        assert_eq!(header.status, "REC UNREAD");
        assert_eq!(header.sender, "+84901234567");
        assert_eq!(header.timestamp, "24/05/01,10:00:00+28");
        assert!(header.is_unread());
    }

    #[test]
    fn sms_header_with_quoted_alpha() {
        let header = parse_sms_header(r#"+CMGR: "REC READ","111","","22/01/10,20:50:06+12""#)
            .unwrap();
        assert_eq!(header.sender, "111");
        assert!(!header.is_unread());
    }

    #[test]
    fn sms_header_rejects_garbage() {
        assert!(parse_sms_header("+CMGR: 0,,25").is_none());
    }

    #[test]
    fn sms_delivery_header() {
        let header = parse_sms_delivery(r#"+CMT: "+84901234567",,"24/05/01,10:00:00+28""#)
            .unwrap();
        assert_eq!(header.sender, "+84901234567");
        assert!(header.is_unread());
    }

    #[test]
    fn new_sms_index() {
        assert_eq!(parse_new_sms_index(r#"+CMTI: "ME",5"#).unwrap(), 5);
        assert_eq!(parse_new_sms_index(r#"+CMTI: "SM", 12 "#).unwrap(), 12);
        assert!(matches!(
            parse_new_sms_index(r#"+CMTI: "ME","#),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn signal_quality_parsing() {
        assert_eq!(parse_signal_quality("+CSQ: 24,99").unwrap(), 24);
        assert_eq!(parse_signal_quality("+CSQ: 31,0").unwrap(), 31);
        assert!(parse_signal_quality("+CSQ: xx,99").is_err());
        assert!(parse_signal_quality("+CREG: 1").is_err());
    }

    #[test]
    fn signal_rescale() {
        assert_eq!(rescale_signal(31), 5);
        assert_eq!(rescale_signal(0), 0);
        assert_eq!(rescale_signal(24), 3);
        assert_eq!(rescale_signal(99), 15);
    }

    #[test]
    fn iccid_parsing() {
        assert_eq!(parse_iccid("+CCID: 89840480000000000000 "), "89840480000000000000");
        assert_eq!(parse_iccid("8984048"), "8984048");
    }

    #[test]
    fn quoted_payload_extraction() {
        assert_eq!(quoted_payload(r#"+CUSD: 0,"Balance: 1000",15"#), Some("Balance: 1000"));
        assert_eq!(quoted_payload(r#"+CUSD: 1,"open"#), None);
        assert_eq!(quoted_payload("no quotes"), None);
    }

    #[test]
    fn operator_parsing() {
        assert_eq!(
            parse_operator(r#"+COPS: 0,0,"Viettel Mobile",7"#),
            Some("Viettel Mobile".to_string())
        );
        assert_eq!(parse_operator("+COPS: 0"), None);
    }

    #[test]
    fn phone_number_detection() {
        assert_eq!(
            find_phone_number("So thue bao cua ban la 84901234567."),
            Some("84901234567")
        );
        assert_eq!(find_phone_number("Your number: +84901234567"), Some("+84901234567"));
        assert_eq!(find_phone_number("Balance: 1000 VND"), None);
    }
}
