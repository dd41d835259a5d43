// WebSocket 传输：只负责帧收发，连接语义全部交给连接管理器
use crate::AppState;
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, HeaderMap},
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;
use vigil_realtime::{CloseReason, Outbound};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// `GET /ws?token=<jwt>`，也接受 `Authorization: Bearer <jwt>`
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let token = query.token.or_else(|| bearer_token(&headers));
    ws.on_upgrade(move |socket| handle_socket(socket, state, token))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.trim().to_string())
}

fn close_message(code: u16, reason: String) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>, token: Option<String>) {
    let manager = &state.connections;
    let handle = match manager.connect(token.as_deref()).await {
        Ok(handle) => handle,
        Err(e) => {
            let reason = e.close_reason();
            let _ = socket
                .send(close_message(reason.code(), reason.as_str().to_string()))
                .await;
            return;
        }
    };
    let id = handle.id;
    let (mut sender, mut receiver) = socket.split();

    // 出站：队列报文 + 协议层 ping
    let writer = async {
        let mut ping = tokio::time::interval(manager.settings().heartbeat_interval());
        ping.tick().await;
        loop {
            tokio::select! {
                item = handle.next_outbound() => match item {
                    Some(Outbound::Text(json)) => {
                        if sender.send(Message::Text(json.to_string())).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Close { code, reason }) => {
                        let _ = sender.send(close_message(code, reason)).await;
                        break;
                    }
                    None => break,
                },
                _ = ping.tick() => {
                    if sender.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    };

    // 入站：任何数据都刷新心跳
    let reader = async {
        while let Some(message) = receiver.next().await {
            match message {
                Ok(Message::Text(text)) => manager.handle_client_text(id, &text).await,
                Ok(Message::Close(_)) => break,
                Ok(_) => manager.touch(id).await,
                Err(e) => {
                    debug!(connection_id = %id, error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = writer => {}
        _ = reader => {}
    }

    // 服务端已主动断开时这里是空操作
    manager.disconnect(id, CloseReason::ClientClosed).await;
}
