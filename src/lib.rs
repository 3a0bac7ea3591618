pub mod auth;
pub mod billing;
pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod export;
pub mod handlers;
pub mod mail;
pub mod middleware;
pub mod rate_limit;
pub mod routes;
pub mod services;
pub mod types;
pub mod workflow;

pub use routes::app;
