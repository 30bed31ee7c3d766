pub mod app_state;
pub mod auth;
pub mod cart;
pub mod chat_server;
pub mod config;
pub mod db;
pub mod error;
pub mod messages;
pub mod models;
pub mod orders;
pub mod products;
pub mod profile;
pub mod routes;
pub mod validation;
pub mod ws;
