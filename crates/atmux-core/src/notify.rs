//! Response and unsolicited notification types.
//!
//! Every line the port engine matches is reported as a [`Notification`]
//! through an mpsc channel: intermediate and final responses on a
//! per-command event stream, unsolicited lines on per-subscription
//! channels. This replaces ad hoc callback registration with explicit,
//! testable message passing.

/// A matched line reported by a port.
///
/// Within one port, notifications are delivered strictly in byte-arrival
/// order; an unsolicited notification can never be reordered relative to a
/// command's intermediate or final notification. No ordering is guaranteed
/// across ports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A line matching one of the in-flight command's intermediate
    /// patterns (e.g. `+CREG: 0,1` before the final `OK`).
    Intermediate {
        /// The matched line, terminators stripped.
        line: String,
    },

    /// The line that ended the in-flight command: a final-pattern match or
    /// the synthesized `TIMEOUT` pseudo-line.
    Final {
        /// The final line.
        line: String,
    },

    /// A line matching a standing subscription, emitted by the modem
    /// without being prompted by a command (e.g. `+CREG: 1` on a network
    /// registration change).
    Unsolicited {
        /// The matched line.
        line: String,
        /// One additional raw payload line, present when the subscription
        /// was registered with extra data (e.g. the PDU line after
        /// `+CMT:`).
        extra: Option<String>,
    },
}

impl Notification {
    /// The matched line, whichever variant this is.
    pub fn line(&self) -> &str {
        match self {
            Notification::Intermediate { line } => line,
            Notification::Final { line } => line,
            Notification::Unsolicited { line, .. } => line,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_accessor_covers_all_variants() {
        let i = Notification::Intermediate {
            line: "+CREG: 0,1".into(),
        };
        assert_eq!(i.line(), "+CREG: 0,1");

        let f = Notification::Final { line: "OK".into() };
        assert_eq!(f.line(), "OK");

        let u = Notification::Unsolicited {
            line: "+CMT: \"+15551234567\"".into(),
            extra: Some("07914400000000F1".into()),
        };
        assert_eq!(u.line(), "+CMT: \"+15551234567\"");
    }

    #[test]
    fn notification_is_clone_and_eq() {
        let n = Notification::Final { line: "OK".into() };
        assert_eq!(n.clone(), n);
    }
}
