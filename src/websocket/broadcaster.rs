use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

use super::messages::WsMessage;
use crate::dispatch::{BboBroadcast, FanoutSink};

/// WebSocket broadcaster for pub/sub pattern
#[derive(Clone)]
pub struct Broadcaster {
    /// One broadcast channel per topic (e.g. "bbo:BTCUSDT", "bbo:*")
    channels: Arc<DashMap<String, broadcast::Sender<WsMessage>>>,
    /// Per-topic buffer; slow clients lag and skip rather than block senders
    capacity: usize,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            capacity,
        }
    }

    fn get_or_create_channel(&self, topic: &str) -> broadcast::Sender<WsMessage> {
        self.channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<WsMessage> {
        self.get_or_create_channel(topic).subscribe()
    }

    /// Send to a topic; a topic nobody subscribed to is skipped
    pub fn broadcast(&self, topic: &str, message: WsMessage) {
        if let Some(sender) = self.channels.get(topic) {
            let _ = sender.send(message);
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.channels
            .get(topic)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Remove channels without subscribers
    pub fn cleanup_empty_channels(&self) {
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl FanoutSink for Broadcaster {
    fn dispatch(&self, channel: &str, payload: &BboBroadcast) {
        let message = WsMessage::Bbo {
            channel: channel.to_string(),
            data: payload.clone(),
        };
        self.broadcast(topics::all_bbo(), message.clone());
        self.broadcast(channel, message);
    }
}

/// Helper functions for topic naming
pub mod topics {
    pub fn bbo(symbol: &str) -> String {
        crate::dispatch::channel_for(symbol)
    }

    pub fn all_bbo() -> &'static str {
        "bbo:*"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TickRecord;
    use rust_decimal_macros::dec;

    fn payload(symbol: &str) -> BboBroadcast {
        let record = TickRecord::new(symbol, 1_000, 1_002, dec!(10), dec!(1), dec!(11), dec!(2));
        BboBroadcast::from_record(&record, 1_005)
    }

    #[tokio::test]
    async fn test_dispatch_reaches_symbol_and_wildcard_topics() {
        let broadcaster = Broadcaster::new();
        let mut btc = broadcaster.subscribe(&topics::bbo("BTCUSDT"));
        let mut all = broadcaster.subscribe(topics::all_bbo());
        let mut eth = broadcaster.subscribe(&topics::bbo("ETHUSDT"));

        broadcaster.dispatch("bbo:BTCUSDT", &payload("BTCUSDT"));

        match btc.recv().await.unwrap() {
            WsMessage::Bbo { channel, data } => {
                assert_eq!(channel, "bbo:BTCUSDT");
                assert_eq!(data.symbol, "BTCUSDT");
            }
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(matches!(all.recv().await.unwrap(), WsMessage::Bbo { .. }));
        assert!(eth.try_recv().is_err());
    }

    #[test]
    fn test_unsubscribed_topics_are_skipped() {
        let broadcaster = Broadcaster::new();
        broadcaster.dispatch("bbo:BTCUSDT", &payload("BTCUSDT"));
        assert_eq!(broadcaster.subscriber_count("bbo:BTCUSDT"), 0);

        let rx = broadcaster.subscribe("bbo:BTCUSDT");
        assert_eq!(broadcaster.subscriber_count("bbo:BTCUSDT"), 1);
        drop(rx);
        broadcaster.cleanup_empty_channels();
        assert_eq!(broadcaster.subscriber_count("bbo:BTCUSDT"), 0);
    }
}
