// handlers/protected/mod.rs - Tier 2: tenant session required (/api/*)
//
// Every handler here runs behind session_auth → validate_user → csrf_guard
// and reads the caller from `Extension<ValidatedUser>`.

pub mod attendance;
pub mod audit;
pub mod clients;
pub mod dashboard;
pub mod documents;
pub mod equipment;
pub mod leave;
pub mod me;
pub mod notifications;
pub mod password;
pub mod projects;
pub mod sites;
pub mod suppliers;
pub mod tools;
pub mod users;
