// src/ws.rs

use std::time::{Duration, Instant};

use actix::prelude::*;
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use log::{debug, info, warn};
use serde::Deserialize;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::auth::{validate_jwt, AuthUser};
use crate::chat_server::{
    user_room, ChatServer, Connect, Disconnect, Emit, Join, LeaveAll, ServerEvent, WsMessage,
    ADMINS_ROOM,
};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Frames a client may send, shaped `{"event": ..., "data": ...}`.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    Authenticate {
        token: String,
    },
    Typing {
        #[serde(default)]
        receiver_id: Option<String>,
        is_typing: bool,
    },
}

/// Rooms a session joins once authenticated as `user`.
pub fn session_rooms(user: &AuthUser) -> Vec<String> {
    let mut rooms = vec![user_room(&user.id)];
    if user.is_admin() {
        rooms.push(ADMINS_ROOM.to_string());
    }
    rooms
}

/// Rooms that should see a typing indicator from `sender`. Customers only
/// talk to support, so their indicator always goes to the admins room.
pub fn typing_rooms(sender: &AuthUser, receiver_id: Option<&str>) -> Vec<String> {
    if !sender.is_admin() {
        return vec![ADMINS_ROOM.to_string()];
    }
    match receiver_id.map(str::trim).filter(|id| !id.is_empty()) {
        Some(receiver) if receiver != sender.id => vec![user_room(receiver)],
        _ => Vec::new(),
    }
}

pub struct WsSession {
    pub id: Uuid,
    pub hb: Instant,
    pub server: Addr<ChatServer>,
    jwt_secret: String,
    identity: Option<AuthUser>,
}

impl WsSession {
    pub fn new(server: Addr<ChatServer>, jwt_secret: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            hb: Instant::now(),
            server,
            jwt_secret,
            identity: None,
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                warn!("WebSocket session {} heartbeat failed, disconnecting", act.id);
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn reply(ctx: &mut ws::WebsocketContext<Self>, event: ServerEvent) {
        if let Some(frame) = event.to_frame() {
            ctx.text(frame.0.to_string());
        }
    }

    fn authenticate(&mut self, token: &str, ctx: &mut ws::WebsocketContext<Self>) {
        if let Some(previous) = self.identity.take() {
            debug!("WebSocket session {} re-authenticating, was {}", self.id, previous.id);
            self.server.do_send(LeaveAll { session_id: self.id });
        }
        let claims = match validate_jwt(token, &self.jwt_secret) {
            Ok(claims) => claims,
            Err(e) => {
                debug!("WebSocket session {} rejected token: {}", self.id, e);
                Self::reply(
                    ctx,
                    ServerEvent::AuthError {
                        message: "Invalid or expired token".to_string(),
                    },
                );
                return;
            }
        };
        let user = AuthUser {
            id: claims.sub,
            role: claims.role,
        };

        for room in session_rooms(&user) {
            self.server.do_send(Join {
                session_id: self.id,
                room,
            });
        }
        info!("WebSocket session {} authenticated as {}", self.id, user.id);
        Self::reply(
            ctx,
            ServerEvent::Authenticated {
                user_id: user.id.clone(),
                role: user.role,
            },
        );
        self.identity = Some(user);
    }

    fn typing(&self, receiver_id: Option<String>, is_typing: bool, ctx: &mut ws::WebsocketContext<Self>) {
        let sender = match &self.identity {
            Some(sender) => sender,
            None => {
                Self::reply(
                    ctx,
                    ServerEvent::Error {
                        message: "Authenticate before sending events".to_string(),
                    },
                );
                return;
            }
        };
        let rooms = typing_rooms(sender, receiver_id.as_deref());
        if rooms.is_empty() {
            return;
        }
        self.server.do_send(Emit {
            rooms,
            event: ServerEvent::Typing {
                user_id: sender.id.clone(),
                is_typing,
            },
        });
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.hb(ctx);

        let addr = ctx.address();
        self.server
            .send(Connect {
                session_id: self.id,
                addr: addr.recipient(),
            })
            .into_actor(self)
            .then(|res, act, ctx| {
                if res.is_err() {
                    warn!("WebSocket session {} failed to register with chat server", act.id);
                    ctx.stop();
                }
                fut::ready(())
            })
            .wait(ctx);
    }

    fn stopped(&mut self, _: &mut Self::Context) {
        self.server.do_send(Disconnect { session_id: self.id });
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(ClientEvent::Authenticate { token }) => self.authenticate(&token, ctx),
                    Ok(ClientEvent::Typing { receiver_id, is_typing }) => {
                        self.typing(receiver_id, is_typing, ctx)
                    }
                    Err(e) => {
                        debug!("WebSocket session {} sent unparseable frame: {}", self.id, e);
                        Self::reply(
                            ctx,
                            ServerEvent::Error {
                                message: "Unrecognized event".to_string(),
                            },
                        );
                    }
                }
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                warn!("WebSocket session {} protocol error: {}", self.id, e);
                ctx.stop();
            }
            _ => {}
        }
    }
}

impl Handler<WsMessage> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: WsMessage, ctx: &mut Self::Context) {
        ctx.text(msg.0.to_string());
    }
}

// GET /ws
pub async fn ws_index(
    req: HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let session = WsSession::new(data.chat_server.clone(), data.config.jwt_secret.clone());
    ws::start(session, &req, stream)
}
