pub mod admin;
pub mod attendance;
pub mod client;
pub mod contract;
pub mod document;
pub mod equipment;
pub mod leave;
pub mod notification;
pub mod organization;
pub mod project;
pub mod site;
pub mod supplier;
pub mod tool;
pub mod user;

pub use admin::{SalesActivity, SalesLead, SuperAdmin, SuperAdminLog};
pub use attendance::AttendanceRecord;
pub use client::Client;
pub use contract::{BillingInvoice, Contract};
pub use document::{Document, HistoryEntry, LineItem, Payment};
pub use equipment::Equipment;
pub use leave::LeaveRecord;
pub use notification::{AuditLog, Notification};
pub use organization::Organization;
pub use project::Project;
pub use site::Site;
pub use supplier::Supplier;
pub use tool::{Tool, ToolItem, ToolMovement};
pub use user::User;
