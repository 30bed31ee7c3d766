#![allow(dead_code)]

use std::env;
use std::process::Command;
use std::sync::Arc;

use actix::Actor;
use shopline::app_state::AppState;
use shopline::auth::create_jwt;
use shopline::chat_server::ChatServer;
use shopline::config::Config;
use shopline::db::MongoDB;
use shopline::models::Role;
use testcontainers::clients::Cli;
use testcontainers::Container;
use testcontainers_modules::mongo::Mongo;

pub const SECRET: &str = "test-secret";

pub fn config() -> Config {
    Config {
        mongo_uri: "mongodb://127.0.0.1:27017".into(),
        database_name: "shopline_test".into(),
        jwt_secret: SECRET.into(),
        jwt_expiry_hours: 1,
        bind_addr: "127.0.0.1:0".into(),
        frontend_origin: "http://localhost:3000".into(),
        bcrypt_cost: 4,
    }
}

/// State whose Mongo client never connects unless a handler reaches the
/// database, which lets guard and validation paths run without a server.
pub async fn state() -> AppState {
    let config = config();
    state_on(&config.mongo_uri, &config.database_name).await
}

pub async fn state_on(uri: &str, database: &str) -> AppState {
    let mut config = config();
    config.mongo_uri = uri.to_string();
    config.database_name = database.to_string();
    let mongodb = MongoDB::init(&config.mongo_uri, &config.database_name)
        .await
        .unwrap();
    AppState {
        chat_server: ChatServer::new().start(),
        mongodb: Arc::new(mongodb),
        config,
    }
}

pub fn token(user_id: &str, role: Role) -> String {
    create_jwt(user_id, role, SECRET, 1).unwrap()
}

pub fn bearer(user_id: &str, role: Role) -> (&'static str, String) {
    ("Authorization", format!("Bearer {}", token(user_id, role)))
}

/// A MongoDB to run against: `MONGO_TEST_URI` when set, otherwise a
/// throwaway container.
pub struct TestStore<'d> {
    _node: Option<Container<'d, Mongo>>,
    pub uri: String,
}

impl TestStore<'_> {
    /// A database name no other test shares.
    pub fn database(&self) -> String {
        format!("shopline_{}", uuid::Uuid::new_v4().simple())
    }
}

fn docker_available() -> bool {
    Command::new("docker")
        .arg("info")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// Returns `None` (and the caller skips) when neither an external MongoDB
/// nor Docker is available.
pub fn start_store(docker: &Cli) -> Option<TestStore<'_>> {
    if let Ok(uri) = env::var("MONGO_TEST_URI") {
        return Some(TestStore { _node: None, uri });
    }
    if !docker_available() {
        eprintln!("skipping: set MONGO_TEST_URI or start Docker to run store-backed tests");
        return None;
    }
    let node = docker.run(Mongo::default());
    let uri = format!("mongodb://127.0.0.1:{}", node.get_host_port_ipv4(27017));
    Some(TestStore {
        _node: Some(node),
        uri,
    })
}
