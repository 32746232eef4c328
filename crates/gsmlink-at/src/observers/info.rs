//! Signal strength, ICCID and operator tracking.

use gsmlink_core::{Carrier, ModemEvent};

use crate::commands;
use crate::observer::{Observer, ObserverContext};
use crate::protocol::Frame;

/// Highest meaningful raw `+CSQ` value. 99 means "not known".
const MAX_RAW_SIGNAL: u8 = 31;

#[derive(Debug, Default)]
pub struct InfoObserver;

impl InfoObserver {
    pub fn new() -> Self {
        InfoObserver
    }
}

impl Observer for InfoObserver {
    fn name(&self) -> &'static str {
        "info"
    }

    fn handle(&mut self, frame: &Frame<'_>, ctx: &mut ObserverContext<'_>) {
        match frame {
            Frame::SignalQuality { raw: Some(raw) } if *raw <= MAX_RAW_SIGNAL => {
                let bars = commands::rescale_signal(*raw);
                let previous = ctx.update_info(|info| info.signal.replace(bars));
                if previous != Some(bars) {
                    tracing::debug!(raw, bars, "signal changed");
                    ctx.emit(ModemEvent::SignalChanged { bars });
                }
            }
            Frame::SignalQuality { raw } => {
                tracing::debug!(?raw, "signal unknown, keeping previous value");
            }
            Frame::Iccid(iccid) if !iccid.is_empty() => {
                let iccid = iccid.to_string();
                let previous = ctx.update_info(|info| info.iccid.replace(iccid.clone()));
                if previous.as_deref() != Some(iccid.as_str()) {
                    tracing::info!(%iccid, "ICCID");
                    ctx.emit(ModemEvent::IccidChanged { iccid });
                }
            }
            Frame::Operator(line) => {
                if let Some(name) = commands::parse_operator(line) {
                    let carrier = Carrier::from_operator(&name);
                    tracing::debug!(operator = %name, %carrier, "operator");
                    ctx.update_info(|info| {
                        info.operator = Some(name);
                        info.carrier = Some(carrier);
                    });
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

    #[test]
    fn full_signal_is_five_bars() {
        let mut h = Harness::new();
        let mut info = InfoObserver::new();
        h.line(&mut info, "+CSQ: 31,99");
        assert_eq!(h.info.snapshot().signal, Some(5));
        assert!(matches!(
            h.drain_events().as_slice(),
            [ModemEvent::SignalChanged { bars: 5 }]
        ));
    }

    #[test]
    fn zero_signal_is_zero_bars() {
        let mut h = Harness::new();
        let mut info = InfoObserver::new();
        h.line(&mut info, "+CSQ: 0,0");
        assert_eq!(h.info.snapshot().signal, Some(0));
    }

    #[test]
    fn mid_signal_rounds_down() {
        let mut h = Harness::new();
        let mut info = InfoObserver::new();
        h.line(&mut info, "+CSQ: 18,99");
        assert_eq!(h.info.snapshot().signal, Some(2));
    }

    #[test]
    fn malformed_signal_keeps_previous_value() {
        let mut h = Harness::new();
        let mut info = InfoObserver::new();
        h.line(&mut info, "+CSQ: 20,99");
        h.line(&mut info, "+CSQ: ,99");
        h.line(&mut info, "+CSQ: 99,99");
        assert_eq!(h.info.snapshot().signal, Some(3));
    }

    #[test]
    fn unchanged_signal_emits_once() {
        let mut h = Harness::new();
        let mut info = InfoObserver::new();
        h.line(&mut info, "+CSQ: 31,99");
        h.line(&mut info, "+CSQ: 31,99");
        assert_eq!(h.drain_events().len(), 1);
    }

    #[test]
    fn iccid_is_trimmed_and_stored() {
        let mut h = Harness::new();
        let mut info = InfoObserver::new();
        h.line(&mut info, "+CCID: 89840480000000000001  ");
        assert_eq!(
            h.info.snapshot().iccid.as_deref(),
            Some("89840480000000000001")
        );
        assert!(matches!(
            h.drain_events().as_slice(),
            [ModemEvent::IccidChanged { .. }]
        ));
    }

    #[test]
    fn operator_maps_to_carrier() {
        let mut h = Harness::new();
        let mut info = InfoObserver::new();
        h.line(&mut info, r#"+COPS: 0,0,"VINAPHONE",7"#);
        let snapshot = h.info.snapshot();
        assert_eq!(snapshot.operator.as_deref(), Some("VINAPHONE"));
        assert_eq!(snapshot.carrier, Some(Carrier::Vinaphone));
    }
}
