use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub security: SecurityConfig,
    pub workflow: WorkflowConfig,
    pub attendance: AttendanceConfig,
    pub mail: MailConfig,
    pub billing: BillingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub max_connections: u32,
    pub connection_timeout: u64,
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub port: u16,
    pub public_url: String,
    pub max_request_size_bytes: usize,
    pub default_page_size: i64,
    pub max_page_size: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub jwt_secret: String,
    pub session_hours: u64,
    pub admin_session_hours: u64,
    pub impersonation_ttl_minutes: u64,
    /// Length of the tenant session a redeemed impersonation token starts.
    pub impersonation_session_minutes: u64,
    pub two_factor_challenge_minutes: u64,
    pub csrf_secret: String,
    pub secure_cookies: bool,
    pub enable_cors: bool,
    pub cors_origins: Vec<String>,
    pub cron_secret: String,
    pub two_factor_encryption_key: String,
    pub login_rate_limit: u32,
    pub login_rate_window_secs: i64,
    pub login_block_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Purchase orders at or above this total (yen) need an admin to approve.
    pub admin_approval_threshold: i64,
    pub bulk_approve_max: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceConfig {
    pub utc_offset_hours: i32,
    pub night_shift_boundary_hour: u32,
    pub night_shift_late_clock_in_hour: u32,
    pub duplicate_punch_minutes: i64,
    pub standard_work_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    pub resend_api_key: Option<String>,
    pub from_address: String,
    pub system_notify_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    pub stripe_secret_key: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    pub webhook_tolerance_secs: i64,
    /// Consumption tax, percent.
    pub tax_rate_percent: u32,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        // Database overrides
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout = v.parse().unwrap_or(self.database.connection_timeout);
        }
        if let Ok(v) = env::var("DATABASE_RUN_MIGRATIONS") {
            self.database.run_migrations = v.parse().unwrap_or(self.database.run_migrations);
        }

        // API overrides
        if let Some(v) = env::var("GENBA_API_PORT").ok().or_else(|| env::var("PORT").ok()) {
            self.api.port = v.parse().unwrap_or(self.api.port);
        }
        if let Ok(v) = env::var("API_PUBLIC_URL") {
            self.api.public_url = v.trim_end_matches('/').to_string();
        }
        if let Ok(v) = env::var("API_MAX_REQUEST_SIZE_BYTES") {
            self.api.max_request_size_bytes = v.parse().unwrap_or(self.api.max_request_size_bytes);
        }
        if let Ok(v) = env::var("API_MAX_PAGE_SIZE") {
            self.api.max_page_size = v.parse().unwrap_or(self.api.max_page_size);
        }

        // Security overrides
        if let Ok(v) = env::var("JWT_SECRET") {
            self.security.jwt_secret = v;
        }
        if let Ok(v) = env::var("SECURITY_SESSION_HOURS") {
            self.security.session_hours = v.parse().unwrap_or(self.security.session_hours);
        }
        if let Ok(v) = env::var("SECURITY_ADMIN_SESSION_HOURS") {
            self.security.admin_session_hours = v.parse().unwrap_or(self.security.admin_session_hours);
        }
        if let Ok(v) = env::var("SECURITY_IMPERSONATION_TTL_MINUTES") {
            self.security.impersonation_ttl_minutes = v.parse().unwrap_or(self.security.impersonation_ttl_minutes);
        }
        if let Ok(v) = env::var("SECURITY_IMPERSONATION_SESSION_MINUTES") {
            self.security.impersonation_session_minutes =
                v.parse().unwrap_or(self.security.impersonation_session_minutes);
        }
        if let Ok(v) = env::var("CSRF_SECRET") {
            self.security.csrf_secret = v;
        }
        if let Ok(v) = env::var("SECURITY_SECURE_COOKIES") {
            self.security.secure_cookies = v.parse().unwrap_or(self.security.secure_cookies);
        }
        if let Ok(v) = env::var("SECURITY_ENABLE_CORS") {
            self.security.enable_cors = v.parse().unwrap_or(self.security.enable_cors);
        }
        if let Ok(v) = env::var("SECURITY_CORS_ORIGINS") {
            self.security.cors_origins = v.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(v) = env::var("CRON_SECRET") {
            self.security.cron_secret = v;
        }
        if let Ok(v) = env::var("TWO_FACTOR_ENCRYPTION_KEY") {
            self.security.two_factor_encryption_key = v;
        }
        if let Ok(v) = env::var("SECURITY_LOGIN_RATE_LIMIT") {
            self.security.login_rate_limit = v.parse().unwrap_or(self.security.login_rate_limit);
        }

        // Workflow overrides
        if let Ok(v) = env::var("WORKFLOW_ADMIN_APPROVAL_THRESHOLD") {
            self.workflow.admin_approval_threshold = v.parse().unwrap_or(self.workflow.admin_approval_threshold);
        }

        // Attendance overrides
        if let Ok(v) = env::var("ATTENDANCE_UTC_OFFSET_HOURS") {
            self.attendance.utc_offset_hours = v.parse().unwrap_or(self.attendance.utc_offset_hours);
        }

        // Mail overrides
        if let Ok(v) = env::var("RESEND_API_KEY") {
            self.mail.resend_api_key = Some(v).filter(|k| !k.is_empty());
        }
        if let Ok(v) = env::var("MAIL_FROM_ADDRESS") {
            self.mail.from_address = v;
        }
        if let Ok(v) = env::var("MAIL_SYSTEM_NOTIFY_ADDRESS") {
            self.mail.system_notify_address = v;
        }

        // Billing overrides
        if let Ok(v) = env::var("STRIPE_SECRET_KEY") {
            self.billing.stripe_secret_key = Some(v).filter(|k| !k.is_empty());
        }
        if let Ok(v) = env::var("STRIPE_WEBHOOK_SECRET") {
            self.billing.stripe_webhook_secret = Some(v).filter(|k| !k.is_empty());
        }
        if let Ok(v) = env::var("BILLING_TAX_RATE_PERCENT") {
            self.billing.tax_rate_percent = v.parse().unwrap_or(self.billing.tax_rate_percent);
        }

        self
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            database: DatabaseConfig {
                max_connections: 10,
                connection_timeout: 30,
                run_migrations: true,
            },
            api: ApiConfig {
                port: 3000,
                public_url: "http://localhost:3000".to_string(),
                max_request_size_bytes: 10 * 1024 * 1024, // 10MB
                default_page_size: 50,
                max_page_size: 500,
            },
            security: SecurityConfig {
                jwt_secret: "dev-jwt-secret-change-me".to_string(),
                session_hours: 24 * 7,
                admin_session_hours: 8,
                impersonation_ttl_minutes: 10,
                impersonation_session_minutes: 60,
                two_factor_challenge_minutes: 5,
                csrf_secret: "dev-csrf-secret-change-me".to_string(),
                secure_cookies: false,
                enable_cors: true,
                cors_origins: vec!["http://localhost:3000".to_string(), "http://localhost:5173".to_string()],
                cron_secret: "dev-cron-secret".to_string(),
                two_factor_encryption_key: "dev-two-factor-key".to_string(),
                login_rate_limit: 20,
                login_rate_window_secs: 300,
                login_block_secs: 600,
            },
            workflow: WorkflowConfig::default(),
            attendance: AttendanceConfig::default(),
            mail: MailConfig {
                resend_api_key: None,
                from_address: "no-reply@localhost".to_string(),
                system_notify_address: "system@localhost".to_string(),
            },
            billing: BillingConfig {
                stripe_secret_key: None,
                stripe_webhook_secret: None,
                webhook_tolerance_secs: 300,
                tax_rate_percent: 10,
            },
        }
    }

    fn staging() -> Self {
        let mut config = Self::development();
        config.environment = Environment::Staging;
        config.database = DatabaseConfig {
            max_connections: 20,
            connection_timeout: 10,
            run_migrations: true,
        };
        config.api.public_url = "https://staging.example.com".to_string();
        config.api.max_request_size_bytes = 5 * 1024 * 1024; // 5MB
        config.api.max_page_size = 200;
        config.security.session_hours = 24;
        config.security.secure_cookies = true;
        config.security.cors_origins = vec!["https://staging.example.com".to_string()];
        config.security.login_rate_limit = 5;
        config
    }

    fn production() -> Self {
        let mut config = Self::staging();
        config.environment = Environment::Production;
        config.database = DatabaseConfig {
            max_connections: 50,
            connection_timeout: 5,
            run_migrations: false,
        };
        config.api.public_url = "https://app.example.com".to_string();
        config.api.max_request_size_bytes = 2 * 1024 * 1024; // 2MB
        config.api.max_page_size = 100;
        config.security.session_hours = 12;
        config.security.admin_session_hours = 4;
        config.security.impersonation_session_minutes = 30;
        config.security.cors_origins = vec!["https://app.example.com".to_string()];
        config.security.login_rate_limit = 3;
        config
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            admin_approval_threshold: 1_000_000,
            bulk_approve_max: 100,
        }
    }
}

impl Default for AttendanceConfig {
    fn default() -> Self {
        Self {
            utc_offset_hours: 9,
            night_shift_boundary_hour: 5,
            night_shift_late_clock_in_hour: 16,
            duplicate_punch_minutes: 5,
            standard_work_minutes: 8 * 60,
        }
    }
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}

#[macro_export]
macro_rules! is_production {
    () => {
        matches!($crate::config::CONFIG.environment, $crate::config::Environment::Production)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_development_config() {
        let config = AppConfig::development();
        assert!(!config.security.secure_cookies);
        assert!(config.database.run_migrations);
        assert_eq!(config.workflow.admin_approval_threshold, 1_000_000);
        assert_eq!(config.attendance.utc_offset_hours, 9);
    }

    #[test]
    fn test_default_production_config() {
        let config = AppConfig::production();
        assert_eq!(config.environment, Environment::Production);
        assert!(config.security.secure_cookies);
        assert!(!config.database.run_migrations);
        assert_eq!(config.api.max_page_size, 100);
        assert_eq!(config.security.login_rate_limit, 3);
    }

    #[test]
    fn staging_inherits_workflow_defaults() {
        let config = AppConfig::staging();
        assert_eq!(config.workflow.bulk_approve_max, 100);
        assert_eq!(config.security.session_hours, 24);
    }
}
