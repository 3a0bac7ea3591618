//! Business operations over the shared pool. Handlers stay thin: they pull
//! request context out of extensions and call into one of these.

pub mod admin_service;
pub mod attendance_service;
pub mod audit_service;
pub mod billing_service;
pub mod client_service;
pub mod contract_service;
pub mod cron_service;
pub mod dashboard_service;
pub mod document_service;
pub mod equipment_service;
pub mod impersonation_service;
pub mod leave_service;
pub mod notification_service;
pub mod organization_service;
pub mod password_service;
pub mod project_service;
pub mod sales_service;
pub mod site_service;
pub mod supplier_service;
pub mod tool_service;
pub mod user_service;

pub use admin_service::AdminService;
pub use attendance_service::AttendanceService;
pub use audit_service::AuditService;
pub use billing_service::BillingService;
pub use client_service::ClientService;
pub use contract_service::ContractService;
pub use cron_service::CronService;
pub use dashboard_service::DashboardService;
pub use document_service::DocumentService;
pub use equipment_service::EquipmentService;
pub use impersonation_service::ImpersonationService;
pub use leave_service::LeaveService;
pub use notification_service::NotificationService;
pub use organization_service::OrganizationService;
pub use password_service::PasswordService;
pub use project_service::ProjectService;
pub use sales_service::SalesService;
pub use site_service::SiteService;
pub use supplier_service::SupplierService;
pub use tool_service::ToolService;
pub use user_service::UserService;
