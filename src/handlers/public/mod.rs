// handlers/public/mod.rs - Tier 1: no session required

pub mod admin;
pub mod auth;
pub mod meta;
pub mod webhooks;

pub use meta::{health, root};
pub use webhooks::stripe as stripe_webhook;
