// src/messages.rs
//
// Support chat over HTTP. Every write is persisted first and then pushed to
// the live rooms through the ChatServer actor; delivery is fire-and-forget.

use actix_web::{web, HttpResponse};
use chrono::{Duration, Utc};
use futures::stream::TryStreamExt;
use log::{debug, info};
use mongodb::bson::{doc, from_document, Document};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::auth::{AdminUser, AuthUser};
use crate::chat_server::{user_room, BroadcastAll, Emit, OnlineUsers, ServerEvent, ADMINS_ROOM};
use crate::db::MESSAGES;
use crate::error::{AppError, AppResult};
use crate::models::message::conversation_key;
use crate::models::{timestamp, Message, MessageType, MessageView, Page, PageQuery, Role};
use crate::validation;

pub const MAX_CONTENT_CHARS: usize = 2000;

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    /// Omit for a broadcast.
    pub receiver_id: Option<String>,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

impl PageParams {
    fn paging(&self) -> PageQuery {
        PageQuery::new(self.page, self.limit)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationSummary {
    #[serde(rename(deserialize = "_id"))]
    pub conversation_key: String,
    pub last_message: Message,
    pub message_count: i64,
    pub unread_count: i64,
    #[serde(default)]
    pub participants: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct AdminContact {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Default, Serialize, PartialEq)]
pub struct MessageStats {
    pub total_messages: i64,
    pub private_messages: i64,
    pub broadcast_messages: i64,
    pub unread_messages: i64,
    pub messages_last_24h: u64,
    pub conversations: i64,
    pub online_users: usize,
}

#[derive(Debug, Deserialize)]
struct TypeBucket {
    #[serde(rename = "_id")]
    message_type: MessageType,
    count: i64,
    unread: i64,
}

impl MessageStats {
    fn add_bucket(&mut self, bucket: TypeBucket) {
        self.total_messages += bucket.count;
        match bucket.message_type {
            MessageType::Private => {
                self.private_messages += bucket.count;
                self.unread_messages += bucket.unread;
            }
            MessageType::Broadcast => self.broadcast_messages += bucket.count,
        }
    }
}

/// Rooms a private message is pushed to: both participants, plus the admin
/// group when a customer writes in so every admin sees support traffic.
pub fn delivery_rooms(sender_id: &str, sender_role: Role, receiver_id: &str) -> Vec<String> {
    let mut rooms = vec![user_room(receiver_id), user_room(sender_id)];
    if !sender_role.is_admin() {
        rooms.push(ADMINS_ROOM.to_string());
    }
    rooms
}

/// Messages waiting on `user_id`: those addressed to them, plus every
/// support message when the caller is an admin.
pub fn inbox_filter(user_id: &str, is_admin: bool) -> Document {
    if is_admin {
        doc! { "$or": [ { "receiver_id": user_id }, { "to_support": true } ] }
    } else {
        doc! { "receiver_id": user_id }
    }
}

/// Which messages make up the conversation `other` as seen by `caller`.
/// Admins open a customer's whole support thread, whichever admin answered,
/// or any conversation directly by its key.
pub fn conversation_filter(caller: &AuthUser, other: &str, other_is_admin: bool) -> Document {
    if caller.is_admin() {
        if other.contains(':') {
            return doc! { "conversation_key": other };
        }
        if !other_is_admin {
            return doc! {
                "message_type": MessageType::Private.as_str(),
                "$or": [ { "sender_id": other }, { "receiver_id": other } ],
            };
        }
    }
    doc! { "conversation_key": conversation_key(&caller.id, other) }
}

/// Conversation summaries: newest message per conversation key with totals.
/// Admins see every private conversation, users only their own.
pub fn conversations_pipeline(user_id: &str, is_admin: bool) -> Vec<Document> {
    let mut matcher = doc! { "message_type": MessageType::Private.as_str() };
    let mut waiting_on_caller = vec![doc! { "$eq": ["$receiver_id", user_id] }];
    if is_admin {
        waiting_on_caller.push(doc! { "$eq": ["$to_support", true] });
    }
    if !is_admin {
        matcher.insert(
            "$or",
            vec![doc! { "sender_id": user_id }, doc! { "receiver_id": user_id }],
        );
    }
    vec![
        doc! { "$match": matcher },
        doc! { "$sort": { "created_at": -1 } },
        doc! { "$group": {
            "_id": "$conversation_key",
            "last_message": { "$first": "$$ROOT" },
            "message_count": { "$sum": 1 },
            "unread_count": { "$sum": { "$cond": [
                { "$and": [
                    { "$or": waiting_on_caller },
                    { "$eq": ["$is_read", false] },
                ] },
                1,
                0,
            ] } },
        } },
        doc! { "$sort": { "last_message.created_at": -1 } },
    ]
}

fn unread_filter(auth: &AuthUser) -> Document {
    let mut filter = inbox_filter(&auth.id, auth.is_admin());
    filter.insert("is_read", false);
    filter
}

#[derive(Debug, Deserialize)]
struct FacetCount {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct Facet<T> {
    items: Vec<T>,
    total: Vec<FacetCount>,
}

/// Runs `pipeline` and pages its output inside the database with `$facet`.
async fn aggregate_page<T: DeserializeOwned>(
    data: &AppState,
    mut pipeline: Vec<Document>,
    paging: PageQuery,
) -> AppResult<Page<T>> {
    pipeline.push(doc! { "$facet": {
        "items": [ { "$skip": paging.skip() as i64 }, { "$limit": paging.limit as i64 } ],
        "total": [ { "$count": "count" } ],
    } });
    let mut rows: Vec<Document> = data
        .mongodb
        .raw(MESSAGES)
        .aggregate(pipeline)
        .await?
        .try_collect()
        .await?;
    let facet: Facet<T> = match rows.pop() {
        Some(row) => from_document(row)?,
        None => return Ok(Page::new(Vec::new(), paging, 0)),
    };
    let total = facet.total.first().map_or(0, |c| c.count);
    Ok(Page::new(facet.items, paging, total))
}

async fn find_message(data: &AppState, message_id: &str) -> AppResult<Message> {
    data.mongodb
        .messages()
        .find_one(doc! { "_id": message_id })
        .await?
        .ok_or_else(|| AppError::not_found("Message"))
}

async fn page_of_messages(data: &AppState, filter: Document, paging: PageQuery) -> AppResult<Page<Message>> {
    let messages = data.mongodb.messages();
    let total = messages.count_documents(filter.clone()).await?;
    let items: Vec<Message> = messages
        .find(filter)
        .sort(doc! { "created_at": -1 })
        .skip(paging.skip())
        .limit(paging.limit as i64)
        .await?
        .try_collect()
        .await?;
    Ok(Page::new(items, paging, total))
}

// POST /api/messages
pub async fn send_message(
    data: web::Data<AppState>,
    auth: AuthUser,
    payload: web::Json<SendMessageRequest>,
) -> AppResult<HttpResponse> {
    validation::text("Message content", &payload.content, 1, MAX_CONTENT_CHARS)?;
    let receiver_id = payload
        .receiver_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty());
    match receiver_id {
        None if !auth.is_admin() => {
            return Err(AppError::forbidden("Only admins can broadcast messages"));
        }
        Some(id) if id == auth.id => {
            return Err(AppError::validation("Cannot send a message to yourself"));
        }
        _ => {}
    }

    let users = data.mongodb.users();
    let sender = users
        .find_one(doc! { "_id": &auth.id })
        .await?
        .ok_or_else(|| AppError::not_found("User"))?;

    let message = match receiver_id {
        None => Message::broadcast(&auth.id, &payload.content),
        Some(receiver_id) => {
            let receiver = users
                .find_one(doc! { "_id": receiver_id })
                .await?
                .ok_or_else(|| AppError::not_found("Receiver"))?;
            if !auth.is_admin() && !receiver.is_admin {
                return Err(AppError::forbidden("Users can only message support"));
            }
            if auth.is_admin() {
                Message::private(&auth.id, &receiver.id, &payload.content)
            } else {
                Message::support(&auth.id, &receiver.id, &payload.content)
            }
        }
    };

    data.mongodb.messages().insert_one(&message).await?;

    let view = MessageView {
        message,
        sender_name: Some(sender.name),
    };
    match view.message.receiver_id.clone() {
        None => {
            data.chat_server.do_send(BroadcastAll {
                event: ServerEvent::BroadcastMessage {
                    message: view.clone(),
                },
            });
            info!("Broadcast {} sent by {}", view.message.id, auth.id);
        }
        Some(receiver_id) => {
            data.chat_server.do_send(Emit {
                rooms: delivery_rooms(&auth.id, auth.role, &receiver_id),
                event: ServerEvent::NewMessage {
                    message: view.clone(),
                },
            });
            debug!("Message {} sent {} -> {}", view.message.id, auth.id, receiver_id);
        }
    }

    Ok(HttpResponse::Created().json(view))
}

// GET /api/messages/conversations
pub async fn list_conversations(
    data: web::Data<AppState>,
    auth: AuthUser,
    query: web::Query<PageParams>,
) -> AppResult<HttpResponse> {
    let pipeline = conversations_pipeline(&auth.id, auth.is_admin());
    let page: Page<ConversationSummary> = aggregate_page(&data, pipeline, query.paging()).await?;
    let page = page.map(|mut summary| {
        summary.participants = summary
            .conversation_key
            .split(':')
            .map(str::to_string)
            .collect();
        summary
    });
    Ok(HttpResponse::Ok().json(page))
}

// GET /api/messages/conversation/{user_id}
pub async fn get_conversation(
    data: web::Data<AppState>,
    auth: AuthUser,
    other_id: web::Path<String>,
    query: web::Query<PageParams>,
) -> AppResult<HttpResponse> {
    let other_is_admin = if auth.is_admin() && !other_id.contains(':') {
        data.mongodb
            .users()
            .find_one(doc! { "_id": &*other_id })
            .await?
            .map_or(true, |u| u.is_admin)
    } else {
        true
    };
    let filter = conversation_filter(&auth, &other_id, other_is_admin);
    let page = page_of_messages(&data, filter, query.paging()).await?;
    Ok(HttpResponse::Ok().json(page))
}

// GET /api/messages/broadcasts
pub async fn list_broadcasts(
    data: web::Data<AppState>,
    _auth: AuthUser,
    query: web::Query<PageParams>,
) -> AppResult<HttpResponse> {
    let filter = doc! { "message_type": MessageType::Broadcast.as_str() };
    let page = page_of_messages(&data, filter, query.paging()).await?;
    Ok(HttpResponse::Ok().json(page))
}

// GET /api/messages/unread-count
pub async fn unread_count(data: web::Data<AppState>, auth: AuthUser) -> AppResult<HttpResponse> {
    let count = data
        .mongodb
        .messages()
        .count_documents(unread_filter(&auth))
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "unread": count })))
}

// PUT /api/messages/conversation/{user_id}/read
pub async fn mark_conversation_read(
    data: web::Data<AppState>,
    auth: AuthUser,
    other_id: web::Path<String>,
) -> AppResult<HttpResponse> {
    let mut filter = unread_filter(&auth);
    filter.insert("sender_id", other_id.as_str());
    let unread: Vec<Document> = data
        .mongodb
        .raw(MESSAGES)
        .find(filter)
        .projection(doc! { "_id": 1 })
        .await?
        .try_collect()
        .await?;
    let ids: Vec<String> = unread
        .iter()
        .filter_map(|d| d.get_str("_id").ok().map(str::to_string))
        .collect();

    if ids.is_empty() {
        return Ok(HttpResponse::Ok().json(serde_json::json!({ "updated": 0 })));
    }

    let read_at = timestamp::format(&Utc::now());
    let result = data
        .mongodb
        .messages()
        .update_many(
            doc! { "_id": { "$in": ids.clone() } },
            doc! { "$set": { "is_read": true, "read_at": read_at.clone() } },
        )
        .await?;

    data.chat_server.do_send(Emit {
        rooms: vec![user_room(&other_id)],
        event: ServerEvent::MessagesRead {
            reader_id: auth.id.clone(),
            message_ids: ids,
            read_at,
        },
    });

    Ok(HttpResponse::Ok().json(serde_json::json!({ "updated": result.modified_count })))
}

// PUT /api/messages/{id}/read
pub async fn mark_read(
    data: web::Data<AppState>,
    auth: AuthUser,
    message_id: web::Path<String>,
) -> AppResult<HttpResponse> {
    let mut message = find_message(&data, &message_id).await?;
    if !message.readable_by(&auth.id, auth.is_admin()) {
        return Err(AppError::forbidden("Only the receiver can mark a message as read"));
    }
    if message.is_read {
        return Ok(HttpResponse::Ok().json(message));
    }

    let now = Utc::now();
    data.mongodb
        .messages()
        .update_one(
            doc! { "_id": &message.id },
            doc! { "$set": { "is_read": true, "read_at": timestamp::format(&now) } },
        )
        .await?;
    message.is_read = true;
    message.read_at = Some(now);

    data.chat_server.do_send(Emit {
        rooms: vec![user_room(&message.sender_id)],
        event: ServerEvent::MessagesRead {
            reader_id: auth.id.clone(),
            message_ids: vec![message.id.clone()],
            read_at: timestamp::format(&now),
        },
    });
    Ok(HttpResponse::Ok().json(message))
}

// DELETE /api/messages/{id}
pub async fn delete_message(
    data: web::Data<AppState>,
    auth: AuthUser,
    message_id: web::Path<String>,
) -> AppResult<HttpResponse> {
    let message = find_message(&data, &message_id).await?;
    auth.ensure_owner_or_admin(&message.sender_id)?;
    data.mongodb
        .messages()
        .delete_one(doc! { "_id": &message.id })
        .await?;
    info!("Message {} deleted by {}", message.id, auth.id);
    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Message deleted" })))
}

// GET /api/messages/admins
pub async fn list_admins(data: web::Data<AppState>, _auth: AuthUser) -> AppResult<HttpResponse> {
    let admins: Vec<AdminContact> = data
        .mongodb
        .users()
        .find(doc! { "role": Role::Admin.as_str() })
        .sort(doc! { "name": 1 })
        .await?
        .map_ok(|u| AdminContact { id: u.id, name: u.name })
        .try_collect()
        .await?;
    Ok(HttpResponse::Ok().json(admins))
}

// GET /api/messages/stats
pub async fn message_stats(data: web::Data<AppState>, _admin: AdminUser) -> AppResult<HttpResponse> {
    let raw = data.mongodb.raw(MESSAGES);
    let mut stats = MessageStats::default();

    let buckets: Vec<Document> = raw
        .aggregate(vec![doc! { "$group": {
            "_id": "$message_type",
            "count": { "$sum": 1 },
            "unread": { "$sum": { "$cond": [ { "$eq": ["$is_read", false] }, 1, 0 ] } },
        } }])
        .await?
        .try_collect()
        .await?;
    for bucket in buckets {
        stats.add_bucket(from_document(bucket)?);
    }

    let since = timestamp::format(&(Utc::now() - Duration::hours(24)));
    stats.messages_last_24h = data
        .mongodb
        .messages()
        .count_documents(doc! { "created_at": { "$gte": since } })
        .await?;

    let conversations: Vec<Document> = raw
        .aggregate(vec![
            doc! { "$match": { "message_type": MessageType::Private.as_str() } },
            doc! { "$group": { "_id": "$conversation_key" } },
            doc! { "$count": "count" },
        ])
        .await?
        .try_collect()
        .await?;
    stats.conversations = conversations
        .first()
        .and_then(|d| d.get("count"))
        .and_then(|c| c.as_i32().map(i64::from).or_else(|| c.as_i64()))
        .unwrap_or(0);

    stats.online_users = data
        .chat_server
        .send(OnlineUsers)
        .await
        .map_err(|e| AppError::Internal(format!("Chat server unavailable: {}", e)))?
        .len();

    Ok(HttpResponse::Ok().json(stats))
}
