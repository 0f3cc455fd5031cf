pub mod agent;
pub mod ai_sdk;
pub mod client;
pub mod config;
pub mod decoder;
pub mod error;
pub mod framer;
pub mod protocol;
pub mod server;
pub mod transcript;
pub mod ui;
pub mod uploads;
