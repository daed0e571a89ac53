//! One WebSocket session from handshake to disconnect.
//!
//! The protocol of connecting is:
//! Client -> WebSocket: [`ClientCommand::Authenticate`] as the first text frame.
//! WebSocket -> Client: [`ServerMessage::Authenticated`], then the session is live.
//!
//! After the handshake two paired tasks run until either side ends: one
//! drains the outbound queue into the socket, the other reads client
//! frames and dispatches them. When one task finishes the other is
//! aborted and the disconnect path runs (grace window, deferred eviction).

use crate::app::AppState;
use crate::hub::{Hub, connection, dispatch};
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use protocol::{ClientCommand, ServerMessage};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Outbound queue length per connection.
const OUTBOUND_BUFFER: usize = 100;

/// The per-connection context the dispatcher works with.
pub struct Session {
    pub user_id: Uuid,
    pub user_name: String,
    outbound: mpsc::Sender<Arc<str>>,
    /// One forwarder task per subscribed room.
    forwarders: HashMap<String, JoinHandle<()>>,
    lobby_task: Option<JoinHandle<()>>,
}

impl Session {
    fn new(user_id: Uuid, user_name: String, outbound: mpsc::Sender<Arc<str>>) -> Self {
        Self {
            user_id,
            user_name,
            outbound,
            forwarders: HashMap::new(),
            lobby_task: None,
        }
    }

    /// Sends a message to this client only.
    pub async fn send(&self, message: &ServerMessage) {
        let serialized: Arc<str> = message.to_json().into();
        // A closed queue means the connection is going away; nothing to do.
        let _ = self.outbound.send(serialized).await;
    }

    /// Follows a room's broadcasts. Replaces an existing subscription.
    pub async fn subscribe(&mut self, hub: &Hub, room_id: &str) {
        let receiver = hub.subscribe_room(room_id).await;
        let task = spawn_forwarder(self.outbound.clone(), receiver);
        if let Some(old) = self.forwarders.insert(room_id.to_string(), task) {
            old.abort();
        }
    }

    pub fn unsubscribe(&mut self, room_id: &str) {
        if let Some(task) = self.forwarders.remove(room_id) {
            task.abort();
        }
    }

    pub fn is_subscribed(&self, room_id: &str) -> bool {
        self.forwarders.contains_key(room_id)
    }

    fn attach_lobby(&mut self, receiver: broadcast::Receiver<Arc<str>>) {
        self.lobby_task = Some(spawn_forwarder(self.outbound.clone(), receiver));
    }

    fn abort_all(&mut self) {
        for (_, task) in self.forwarders.drain() {
            task.abort();
        }
        if let Some(task) = self.lobby_task.take() {
            task.abort();
        }
    }
}

/// Copies a broadcast channel into the connection's outbound queue. On lag
/// the forwarder keeps going; clients reconcile with a state snapshot,
/// the pushed events are advisory.
fn spawn_forwarder(
    outbound: mpsc::Sender<Arc<str>>,
    mut receiver: broadcast::Receiver<Arc<str>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(message) => {
                    if outbound.send(message).await.is_err() {
                        // Connection gone.
                        return;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped_messages = skipped, "Subscriber lagging.");
                }
                Err(RecvError::Closed) => return,
            }
        }
    })
}

/// This function gets immediately called and upgrades the web response to
/// a web socket.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(app): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| websocket(socket, app))
}

/// Sends a final protocol error and closes.
async fn send_closing_message(sender: &mut SplitSink<WebSocket, Message>, message: String) {
    let closing = ServerMessage::ProtocolError { message };
    let _ = sender
        .send(Message::Text(closing.to_json().into()))
        .await;
    let _ = sender.send(Message::Close(None)).await;
}

struct Handshake {
    user_id: Uuid,
    user_name: String,
}

/// Reads frames until the authenticate command arrives and verifies it.
async fn await_authentication(
    sender: &mut SplitSink<WebSocket, Message>,
    receiver: &mut SplitStream<WebSocket>,
    app: &Arc<AppState>,
) -> Option<Handshake> {
    let raw = loop {
        let Some(frame) = receiver.next().await else {
            tracing::debug!("WebSocket closed before the handshake completed.");
            return None;
        };
        match frame {
            Ok(Message::Text(text)) => break text,
            Ok(Message::Close(_)) => return None,
            // Ping/pong and binary noise before the handshake are ignored.
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(?err, "Error during handshake.");
                return None;
            }
        }
    };

    let command = match serde_json::from_str::<ClientCommand>(&raw) {
        Ok(command) => command,
        Err(err) => {
            tracing::debug!(?err, "Unparsable handshake frame.");
            send_closing_message(sender, "expected an authenticate frame".into()).await;
            return None;
        }
    };
    let ClientCommand::Authenticate {
        user_id,
        user_name,
        token,
    } = command
    else {
        send_closing_message(sender, "the first frame must authenticate".into()).await;
        return None;
    };

    if !app.verifier.verify(user_id, &token).await {
        tracing::info!(%user_id, "Rejected session token.");
        send_closing_message(sender, "authentication failed".into()).await;
        return None;
    }
    Some(Handshake { user_id, user_name })
}

/// Does the whole handling from start to finish: handshake -> connection
/// bookkeeping -> paired send/receive tasks -> disconnect processing.
async fn websocket(stream: WebSocket, app: Arc<AppState>) {
    // By splitting, we can send and receive at the same time.
    let (mut sender, mut receiver) = stream.split();

    let Some(handshake) = await_authentication(&mut sender, &mut receiver, &app).await else {
        return;
    };
    let user_id = handshake.user_id;

    if let Err(reason) = connection::register_connection(&app, user_id).await {
        send_closing_message(&mut sender, reason.to_string()).await;
        return;
    }

    let (out_tx, mut out_rx) = mpsc::channel::<Arc<str>>(OUTBOUND_BUFFER);
    let mut session = Session::new(user_id, handshake.user_name, out_tx);
    session.attach_lobby(app.hub.subscribe_lobby());
    session.send(&ServerMessage::Authenticated { user_id }).await;

    // A held grace slot means this user dropped out of a room moments ago;
    // give the seat back and tell the room.
    if let Some(room_id) = connection::reclaim_grace(&app, user_id).await {
        session.subscribe(&app.hub, &room_id).await;
    }

    let mut send_task = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if sender.send(Message::Text(message.as_ref().into())).await.is_err() {
                return;
            }
        }
    });

    let recv_app = app.clone();
    let mut receive_task = tokio::spawn(async move {
        while let Some(frame) = receiver.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    match serde_json::from_str::<ClientCommand>(&text) {
                        Ok(command) => {
                            dispatch::handle_command(&recv_app, &mut session, command).await;
                        }
                        Err(err) => {
                            tracing::debug!(?err, %user_id, "Unparsable client frame.");
                            session
                                .send(&ServerMessage::ProtocolError {
                                    message: "unparsable frame".into(),
                                })
                                .await;
                        }
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {} // Ignore other messages.
                Err(_) => break,
            }
        }
        session.abort_all();
    });

    // If any one of the tasks runs to completion, we abort the other.
    tokio::select! {
        _ = &mut send_task => { receive_task.abort(); }
        _ = &mut receive_task => { send_task.abort(); }
    }

    connection::handle_disconnect(&app, user_id).await;
}
