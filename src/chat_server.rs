use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use actix::prelude::*;
use log::{debug, error, info};
use serde::Serialize;
use uuid::Uuid;

use crate::models::{MessageView, Role};

/// Room every admin connection joins.
pub const ADMINS_ROOM: &str = "admins";

/// Personal room of a user; all of that user's connections join it.
pub fn user_room(user_id: &str) -> String {
    format!("user:{}", user_id)
}

/// Frames pushed to clients, serialized as `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Authenticated { user_id: String, role: Role },
    AuthError { message: String },
    NewMessage { message: MessageView },
    BroadcastMessage { message: MessageView },
    MessagesRead {
        reader_id: String,
        message_ids: Vec<String>,
        read_at: String,
    },
    Typing { user_id: String, is_typing: bool },
    Error { message: String },
}

impl ServerEvent {
    pub fn to_frame(&self) -> Option<WsMessage> {
        match serde_json::to_string(self) {
            Ok(json) => Some(WsMessage(Arc::from(json))),
            Err(e) => {
                error!("Failed to serialize server event: {}", e);
                None
            }
        }
    }
}

/// A serialized frame delivered to one connection.
#[derive(Message, Clone, Debug)]
#[rtype(result = "()")]
pub struct WsMessage(pub Arc<str>);

#[derive(Message)]
#[rtype(result = "()")]
pub struct Connect {
    pub session_id: Uuid,
    pub addr: Recipient<WsMessage>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Disconnect {
    pub session_id: Uuid,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Join {
    pub session_id: Uuid,
    pub room: String,
}

/// Drop a session from every room it joined; it stays connected.
#[derive(Message)]
#[rtype(result = "()")]
pub struct LeaveAll {
    pub session_id: Uuid,
}

/// Deliver to every connection in any of `rooms`, once per connection.
#[derive(Message)]
#[rtype(result = "usize")]
pub struct Emit {
    pub rooms: Vec<String>,
    pub event: ServerEvent,
}

/// Deliver to every connected session.
#[derive(Message)]
#[rtype(result = "usize")]
pub struct BroadcastAll {
    pub event: ServerEvent,
}

/// Ids of users with at least one authenticated connection.
#[derive(Message)]
#[rtype(result = "Vec<String>")]
pub struct OnlineUsers;

#[derive(Message)]
#[rtype(result = "usize")]
pub struct RoomSize {
    pub room: String,
}

#[derive(Default)]
pub struct ChatServer {
    sessions: HashMap<Uuid, Recipient<WsMessage>>,
    rooms: HashMap<String, HashSet<Uuid>>,
}

impl ChatServer {
    pub fn new() -> Self {
        Self::default()
    }

    fn deliver<'a, I>(&self, targets: I, event: &ServerEvent) -> usize
    where
        I: IntoIterator<Item = &'a Uuid>,
    {
        let frame = match event.to_frame() {
            Some(frame) => frame,
            None => return 0,
        };
        let mut sent = 0;
        for id in targets {
            if let Some(addr) = self.sessions.get(id) {
                addr.do_send(frame.clone());
                sent += 1;
            }
        }
        sent
    }
}

impl Actor for ChatServer {
    type Context = Context<Self>;
}

impl Handler<Connect> for ChatServer {
    type Result = ();

    fn handle(&mut self, msg: Connect, _: &mut Context<Self>) {
        debug!("Session {} connected (WS)", msg.session_id);
        self.sessions.insert(msg.session_id, msg.addr);
    }
}

impl ChatServer {
    fn leave_rooms(&mut self, session_id: &Uuid) {
        self.rooms.retain(|_, members| {
            members.remove(session_id);
            !members.is_empty()
        });
    }
}

impl Handler<Disconnect> for ChatServer {
    type Result = ();

    fn handle(&mut self, msg: Disconnect, _: &mut Context<Self>) {
        debug!("Session {} disconnected (WS)", msg.session_id);
        self.sessions.remove(&msg.session_id);
        self.leave_rooms(&msg.session_id);
    }
}

impl Handler<LeaveAll> for ChatServer {
    type Result = ();

    fn handle(&mut self, msg: LeaveAll, _: &mut Context<Self>) {
        self.leave_rooms(&msg.session_id);
    }
}

impl Handler<Join> for ChatServer {
    type Result = ();

    fn handle(&mut self, msg: Join, _: &mut Context<Self>) {
        if !self.sessions.contains_key(&msg.session_id) {
            return;
        }
        info!("Session {} joined room {}", msg.session_id, msg.room);
        self.rooms.entry(msg.room).or_default().insert(msg.session_id);
    }
}

impl Handler<Emit> for ChatServer {
    type Result = usize;

    fn handle(&mut self, msg: Emit, _: &mut Context<Self>) -> usize {
        let targets: HashSet<Uuid> = msg
            .rooms
            .iter()
            .filter_map(|room| self.rooms.get(room))
            .flatten()
            .copied()
            .collect();
        self.deliver(&targets, &msg.event)
    }
}

impl Handler<BroadcastAll> for ChatServer {
    type Result = usize;

    fn handle(&mut self, msg: BroadcastAll, _: &mut Context<Self>) -> usize {
        self.deliver(self.sessions.keys(), &msg.event)
    }
}

impl Handler<OnlineUsers> for ChatServer {
    type Result = MessageResult<OnlineUsers>;

    fn handle(&mut self, _: OnlineUsers, _: &mut Context<Self>) -> Self::Result {
        let mut users: Vec<String> = self
            .rooms
            .keys()
            .filter_map(|room| room.strip_prefix("user:"))
            .map(str::to_string)
            .collect();
        users.sort();
        MessageResult(users)
    }
}

impl Handler<RoomSize> for ChatServer {
    type Result = usize;

    fn handle(&mut self, msg: RoomSize, _: &mut Context<Self>) -> usize {
        self.rooms.get(&msg.room).map_or(0, HashSet::len)
    }
}
