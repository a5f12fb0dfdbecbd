use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dispatch::BboBroadcast;

/// WebSocket message types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// Throttled best bid/offer update
    Bbo {
        channel: String,
        data: BboBroadcast,
    },
    /// Latest known values, sent once right after a subscribe
    Snapshot {
        channel: String,
        data: Vec<BboBroadcast>,
    },
    /// Subscription confirmation
    Subscribed {
        channel: String,
        symbol: Option<String>,
    },
    /// Unsubscription confirmation
    Unsubscribed {
        channel: String,
        symbol: Option<String>,
    },
    /// Error message
    Error {
        message: String,
    },
    /// Heartbeat/Ping
    Ping {
        timestamp: DateTime<Utc>,
    },
    /// Pong response
    Pong {
        timestamp: DateTime<Utc>,
    },
}

/// Client subscription request
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        channel: String,
        symbol: Option<String>,
    },
    Unsubscribe {
        channel: String,
        symbol: Option<String>,
    },
    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_parsing() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"action":"subscribe","channel":"bbo","symbol":"BTCUSDT"}"#).unwrap();
        assert!(matches!(
            msg,
            ClientMessage::Subscribe { ref channel, symbol: Some(ref s) } if channel == "bbo" && s == "BTCUSDT"
        ));

        let msg: ClientMessage = serde_json::from_str(r#"{"action":"unsubscribe","channel":"bbo"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Unsubscribe { symbol: None, .. }));

        assert!(serde_json::from_str::<ClientMessage>(r#"{"action":"dance"}"#).is_err());
    }

    #[test]
    fn test_server_message_tagging() {
        let json = serde_json::to_value(WsMessage::Subscribed {
            channel: "bbo".into(),
            symbol: Some("ETHUSDT".into()),
        })
        .unwrap();
        assert_eq!(json["type"], "subscribed");
        assert_eq!(json["symbol"], "ETHUSDT");

        let json = serde_json::to_value(WsMessage::Error { message: "nope".into() }).unwrap();
        assert_eq!(json["type"], "error");
    }
}
