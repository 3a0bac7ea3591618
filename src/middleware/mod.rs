//! Request context layers, applied per route tier in `routes`.
//!
//! Tenant API: `session_auth` → `validate_user` → `csrf_guard`.
//! Back office: `admin_auth` → `csrf_guard`. Cron: `cron_auth`.

pub mod admin;
pub mod auth;
pub mod client;
pub mod cron;
pub mod csrf;
pub mod response;
pub mod validate_user;

pub use admin::{admin_auth, AdminUser};
pub use auth::{session_auth, AuthUser};
pub use client::ClientInfo;
pub use cron::cron_auth;
pub use csrf::csrf_guard;
pub use response::{ApiResponse, ApiResult};
pub use validate_user::{validate_user, ValidatedUser};
