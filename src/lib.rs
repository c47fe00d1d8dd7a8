pub mod auth;
pub mod cache;
pub mod config;
pub mod credential;
pub mod crypto;
pub mod document;
pub mod gateway;
pub mod invoice;
pub mod ksef;
pub mod render;
pub mod telemetry;
