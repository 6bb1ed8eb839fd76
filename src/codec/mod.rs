//! Wire grammar for the door channel: plain text frames with literal
//! prefixes and `=` as the key/value separator.

/// A typed outbound message, produced by command dispatch and turned into a
/// wire string by [`encode`]. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundIntent {
    KeepAlive,
    /// Open-door cycle length in seconds; command parsing guarantees 1..=9.
    SecurityUnlock(u8),
    SecurityLock,
    SystemUnlock,
    SystemLock,
    Ping,
    Broadcast(String),
    /// Sent to the peer unmodified.
    RawMessage(String),
}

/// A classified inbound frame. Whether a response is latency-timed is a
/// property of the request that is waiting for it, not of the wire string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Broadcast(String),
    Response(String),
    /// Keep-alive acknowledgement traffic; payload is ignored.
    ConnectionNotice,
    Raw(String),
}

pub fn encode(intent: &OutboundIntent) -> String {
    match intent {
        OutboundIntent::KeepAlive => "#connection=keep-alive".to_string(),
        OutboundIntent::SecurityUnlock(seconds) => {
            format!("#command=!security:unlock {seconds}")
        }
        OutboundIntent::SecurityLock => "#command=!security:lock".to_string(),
        OutboundIntent::SystemUnlock => "#command=!security:system:unlock".to_string(),
        OutboundIntent::SystemLock => "#command=!security:system:lock".to_string(),
        OutboundIntent::Ping => "#ping".to_string(),
        OutboundIntent::Broadcast(text) => format!("#broadcast={text}"),
        OutboundIntent::RawMessage(text) => text.clone(),
    }
}

/// Classifies a wire string by prefix, most specific first. Total: anything
/// unrecognized becomes [`InboundMessage::Raw`], never an error.
pub fn decode(wire: &str) -> InboundMessage {
    let text = wire.trim();
    if text.starts_with("#broadcast") {
        InboundMessage::Broadcast(payload(text))
    } else if text.starts_with("#response") {
        InboundMessage::Response(payload(text))
    } else if text.starts_with("#connection") {
        InboundMessage::ConnectionNotice
    } else {
        InboundMessage::Raw(text.to_string())
    }
}

// Payload is everything after the first '='; a prefixed frame without one
// carries an empty payload.
fn payload(text: &str) -> String {
    match text.split_once('=') {
        Some((_, rest)) => rest.to_string(),
        None => String::new(),
    }
}
