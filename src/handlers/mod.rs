// handlers/mod.rs - handler tiers
//
// public    no session (/, /health, /auth/*, admin login, Stripe webhook)
// protected tenant session (/api/*)
// elevated  super-admin session (/api/admin/*)
// cron      shared bearer secret (/api/cron/*)

pub mod cookies;
pub mod cron;
pub mod elevated;
pub mod protected;
pub mod public;
