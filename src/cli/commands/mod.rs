pub mod admin;
pub mod cron;
pub mod migrate;
pub mod totp;
