// =============================================================================
// WebSocket handler — live candle/orderbook push per spec §4.4/§10
// =============================================================================
//
// `GET /ws?symbol=&timeframe=&type=candles|orderbook`. `symbol=all` is only
// legal when `timeframe=1`, since the wildcard fans out raw closed
// 1-minute candles rather than aggregating. Orderbook subscriptions always
// register on the fixed `"1"` timeframe slot regardless of the query
// value, matching `hub::fanout`'s dispatch convention — orderbook
// snapshots never aggregate by timeframe.
//
// Grounded on the teacher's push/recv `tokio::select!` connection loop;
// the push side here forwards whatever the hub fans into this socket's
// channel instead of a periodic full-state snapshot.
// =============================================================================

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::app_state::AppState;
use crate::hub::liveness;
use crate::hub::registry::Subscription;
use crate::timeframe::Timeframe;
use crate::types::SubscriptionKind;

const ORDERBOOK_TIMEFRAME_SLOT: &str = "1";
const WILDCARD_SYMBOL: &str = "all";

#[derive(Deserialize)]
pub struct WsQuery {
    symbol: String,
    timeframe: String,
    #[serde(rename = "type")]
    kind: String,
}

/// 1008 is the WebSocket "policy violation" close code — used here for any
/// subscription request this server will never be able to satisfy.
const POLICY_VIOLATION: u16 = 1008;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>, Query(query): Query<WsQuery>) -> impl IntoResponse {
    let Some(kind) = SubscriptionKind::parse(&query.kind) else {
        warn!(kind = query.kind, "rejecting ws upgrade: unknown subscription type");
        return ws.on_upgrade(move |socket| reject(socket, "unknown subscription type"));
    };

    let timeframe = match kind {
        SubscriptionKind::Orderbook => ORDERBOOK_TIMEFRAME_SLOT.to_string(),
        SubscriptionKind::Candles => {
            let Some(tf) = Timeframe::parse(&query.timeframe) else {
                warn!(timeframe = query.timeframe, "rejecting ws upgrade: unknown timeframe");
                return ws.on_upgrade(move |socket| reject(socket, "unknown timeframe"));
            };
            if query.symbol == WILDCARD_SYMBOL && tf != Timeframe::M1 {
                warn!("rejecting ws upgrade: wildcard symbol only legal with timeframe 1");
                return ws.on_upgrade(move |socket| reject(socket, "symbol=all requires timeframe=1"));
            }
            tf.label().to_string()
        }
    };

    let symbol = query.symbol;
    info!(symbol, timeframe, kind = query.kind, "ws subscription accepted");
    ws.on_upgrade(move |socket| handle_connection(socket, state, symbol, timeframe, kind))
}

async fn reject(socket: WebSocket, reason: &'static str) {
    let (mut sender, _) = socket.split();
    let _ = sender.send(Message::Close(Some(axum::extract::ws::CloseFrame {
        code: POLICY_VIOLATION,
        reason: reason.into(),
    }))).await;
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>, symbol: String, timeframe: String, kind: SubscriptionKind) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let now_ms = chrono::Utc::now().timestamp_millis();
    let sub = Subscription::new(symbol.clone(), timeframe.clone(), kind, tx, now_ms);
    let key = sub.fingerprint();
    state.registry.add(sub.clone());

    // If this is the first non-wildcard candle subscriber, push whatever
    // in-progress candle `ensure_aggregator`'s hydration path already
    // built so the client isn't blind until the next close.
    if kind == SubscriptionKind::Candles && symbol != WILDCARD_SYMBOL {
        if let Some(candle) = state.registry.peek(&key) {
            let _ = sender.send(Message::Text(serde_json::to_string(&candle).unwrap_or_default().into())).await;
        }
    }

    loop {
        tokio::select! {
            forwarded = rx.recv() => {
                match forwarded {
                    Some(payload) => {
                        if let Err(e) = sender.send(Message::Text(payload.to_string().into())).await {
                            debug!(error = %e, "ws send failed, disconnecting");
                            break;
                        }
                    }
                    None => break,
                }
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => handle_client_text(&sub, &text),
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => liveness::handle_pong(&sub),
                    Some(Ok(Message::Close(_))) => {
                        info!(symbol, "ws close frame received");
                        break;
                    }
                    Some(Ok(Message::Binary(_))) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "ws receive error, disconnecting");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    state.registry.remove(&key, sub.id);
    info!(symbol, timeframe, "ws subscription removed");
}

fn handle_client_text(sub: &Subscription, text: &str) {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(v) if v.get("type").and_then(|t| t.as_str()) == Some("pong") => liveness::handle_pong(sub),
        _ => debug!(text, "ignoring unrecognized ws text frame"),
    }
}
