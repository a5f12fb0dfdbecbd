use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{sink::SinkExt, stream::SplitSink, stream::StreamExt};
use std::sync::Arc;
use tokio::select;
use tokio::time::{interval, Duration};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tokio_stream::StreamMap;
use tracing::{debug, error, info, warn};

use super::{
    broadcaster::{topics, Broadcaster},
    messages::{ClientMessage, WsMessage},
};
use crate::dispatch::{BboBroadcast, BroadcastDispatcher};
use crate::utils::validation::is_valid_symbol;

type WsSender = SplitSink<WebSocket, Message>;
type WsError = Box<dyn std::error::Error + Send + Sync>;

/// WebSocket connection state
pub struct WsState {
    pub broadcaster: Broadcaster,
    pub dispatcher: Arc<BroadcastDispatcher>,
}

/// Handle WebSocket upgrade request
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<Arc<WsState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<WsState>) {
    let (mut sender, mut receiver) = socket.split();

    // Live updates for this client, keyed by topic
    let mut subscriptions: StreamMap<String, BroadcastStream<WsMessage>> = StreamMap::new();

    let mut heartbeat = interval(Duration::from_secs(30));

    info!("WebSocket client connected");

    loop {
        select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = handle_client_message(&text, &mut subscriptions, &mut sender, &state).await {
                            warn!("Rejected client message: {}", e);
                            let reply = WsMessage::Error { message: e.to_string() };
                            if send_json(&mut sender, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("WebSocket client disconnected");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }

            Some((topic, update)) = subscriptions.next(), if !subscriptions.is_empty() => {
                match update {
                    Ok(ws_msg) => {
                        if send_json(&mut sender, &ws_msg).await.is_err() {
                            break;
                        }
                    }
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        debug!("Client lagging on {}, skipped {} updates", topic, skipped);
                    }
                }
            }

            _ = heartbeat.tick() => {
                let ping = WsMessage::Ping { timestamp: chrono::Utc::now() };
                if send_json(&mut sender, &ping).await.is_err() {
                    break;
                }
            }
        }
    }

    drop(subscriptions);
    state.broadcaster.cleanup_empty_channels();
    info!("WebSocket connection closed");
}

/// Handle client messages (subscribe/unsubscribe/ping)
async fn handle_client_message(
    text: &str,
    subscriptions: &mut StreamMap<String, BroadcastStream<WsMessage>>,
    sender: &mut WsSender,
    state: &WsState,
) -> Result<(), WsError> {
    let client_msg: ClientMessage = serde_json::from_str(text)?;

    match client_msg {
        ClientMessage::Subscribe { channel, symbol } => {
            let symbol = symbol.map(|s| s.trim().to_uppercase());
            let topic = build_topic(&channel, symbol.as_deref())?;

            let rx = state.broadcaster.subscribe(&topic);
            subscriptions.insert(topic.clone(), BroadcastStream::new(rx));

            send_json(
                sender,
                &WsMessage::Subscribed {
                    channel: channel.clone(),
                    symbol: symbol.clone(),
                },
            )
            .await?;

            // Latest known value(s) right away, live updates follow
            let data: Vec<BboBroadcast> = match &symbol {
                Some(sym) => state.dispatcher.latest_for_symbol(sym).into_iter().collect(),
                None => state.dispatcher.latest_all(),
            };
            if !data.is_empty() {
                send_json(sender, &WsMessage::Snapshot { channel: topic.clone(), data }).await?;
            }

            info!("Client subscribed to: {}", topic);
        }
        ClientMessage::Unsubscribe { channel, symbol } => {
            let symbol = symbol.map(|s| s.trim().to_uppercase());
            let topic = build_topic(&channel, symbol.as_deref())?;

            subscriptions.remove(&topic);

            send_json(sender, &WsMessage::Unsubscribed { channel, symbol }).await?;

            info!("Client unsubscribed from: {}", topic);
        }
        ClientMessage::Ping => {
            send_json(sender, &WsMessage::Pong { timestamp: chrono::Utc::now() }).await?;
        }
    }

    Ok(())
}

async fn send_json(sender: &mut WsSender, message: &WsMessage) -> Result<(), WsError> {
    let json = serde_json::to_string(message)?;
    sender.send(Message::Text(json)).await?;
    Ok(())
}

/// Build topic string from channel and symbol
fn build_topic(channel: &str, symbol: Option<&str>) -> Result<String, String> {
    match (channel, symbol) {
        ("bbo", Some(sym)) if is_valid_symbol(sym) => Ok(topics::bbo(sym)),
        ("bbo", Some(sym)) => Err(format!("Invalid symbol: {}", sym)),
        ("bbo", None) => Ok(topics::all_bbo().to_string()),
        _ => Err(format!("Unknown channel: {}", channel)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_topic() {
        assert_eq!(build_topic("bbo", Some("BTCUSDT")).unwrap(), "bbo:BTCUSDT");
        assert_eq!(build_topic("bbo", None).unwrap(), "bbo:*");
        assert!(build_topic("bbo", Some("../x")).is_err());
        assert!(build_topic("trades", Some("BTCUSDT")).is_err());
    }
}
