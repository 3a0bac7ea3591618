// handlers/elevated/mod.rs - Tier 3: super-admin session required (/api/admin/*)
//
// Handlers read `Extension<AdminUser>`. Sales admins only reach the CRM;
// everything else calls `require_owner` first.

pub mod billing;
pub mod contracts;
pub mod logs;
pub mod organizations;
pub mod sales;
pub mod session;
