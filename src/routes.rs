//! Router assembly: one router per security tier, merged into `app()`.

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderName, HeaderValue, Method},
    middleware::from_fn,
    routing::{get, patch, post, put},
    Extension, Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::auth::csrf::CSRF_HEADER;
use crate::config;
use crate::error::ApiError;
use crate::handlers::{cron, elevated, protected, public};
use crate::middleware::{admin_auth, cron_auth, csrf_guard, session_auth, validate_user};
use crate::workflow::DocumentKind;

pub fn app() -> Router {
    Router::new()
        // Public
        .route("/", get(public::root))
        .route("/health", get(public::health))
        .merge(auth_public_routes())
        // Tenant API
        .merge(tenant_routes())
        // Back office
        .merge(admin_routes())
        .merge(cron_routes())
        .fallback(not_found)
        // Global middleware
        .layer(DefaultBodyLimit::max(config::config().api.max_request_size_bytes))
        .layer(cors())
        .layer(TraceLayer::new_for_http())
}

async fn not_found() -> ApiError {
    ApiError::not_found("Route not found")
}

fn cors() -> CorsLayer {
    let security = &config::config().security;
    if !security.enable_cors {
        return CorsLayer::new();
    }

    let origins: Vec<HeaderValue> = security
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    // Cookies need explicit origins; a wildcard is not allowed with credentials.
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, HeaderName::from_static(CSRF_HEADER)])
}

fn auth_public_routes() -> Router {
    use public::{admin, auth};

    Router::new()
        .route("/auth/login", post(auth::login_post))
        .route("/auth/logout", post(auth::logout_post))
        .route("/auth/csrf", get(auth::csrf_get))
        .route("/auth/impersonate", get(auth::impersonate_get))
        .route("/auth/forgot-password", post(auth::forgot_password_post))
        .route("/auth/reset-password", post(auth::reset_password_post))
        .route("/api/admin/login", post(admin::login_post))
        .route("/api/admin/login/verify-2fa", post(admin::verify_two_factor_post))
        .route("/api/webhooks/stripe", post(public::stripe_webhook))
}

/// `/api/*` behind session → user validation → CSRF.
fn tenant_routes() -> Router {
    use protected::{
        attendance, audit, clients, dashboard, equipment, leave, me, notifications, password, projects, sites,
        suppliers, tools, users,
    };

    Router::new()
        .route("/api/auth/me", get(me::get))
        // Users and sites
        .route("/api/users", get(users::list).post(users::create))
        .route("/api/users/:id", patch(users::update))
        .route("/api/users/password/request-change", post(password::request_change))
        .route("/api/users/password/verify-and-change", post(password::confirm_change))
        .route("/api/sites", get(sites::list).post(sites::create))
        .route("/api/sites/:id", put(sites::update))
        .route("/api/sites/:id/qr", get(sites::qr))
        // Clients
        .route("/api/clients", get(clients::list).post(clients::create))
        .route("/api/clients/export", get(clients::export))
        .route("/api/clients/import", post(clients::import))
        .route(
            "/api/clients/:id",
            get(clients::get).put(clients::update).delete(clients::delete),
        )
        // Projects and suppliers
        .route("/api/projects", get(projects::list).post(projects::create))
        .route(
            "/api/projects/:id",
            get(projects::get).put(projects::update).delete(projects::delete),
        )
        .route("/api/suppliers", get(suppliers::list).post(suppliers::create))
        .route(
            "/api/suppliers/:id",
            get(suppliers::get).put(suppliers::update).delete(suppliers::delete),
        )
        // Documents
        .nest("/api/estimates", document_routes(DocumentKind::Estimate))
        .nest("/api/invoices", document_routes(DocumentKind::Invoice))
        .nest("/api/purchase-orders", document_routes(DocumentKind::PurchaseOrder))
        // Attendance
        .route("/api/attendance", get(attendance::list))
        .route("/api/attendance/clock-in", post(attendance::clock_in))
        .route("/api/attendance/clock-out", post(attendance::clock_out))
        .route("/api/attendance/export", get(attendance::export))
        .route("/api/attendance/summary", get(attendance::summary))
        .route("/api/attendance/office-qr", get(attendance::office_qr))
        .route("/api/leave", get(leave::list).post(leave::create))
        .route("/api/leave/:id", get(leave::get).put(leave::update).delete(leave::delete))
        // Tools and equipment
        .route("/api/tools", get(tools::list).post(tools::create))
        .route("/api/tools/low-stock", get(tools::low_stock))
        .route("/api/tools/:id/stock", post(tools::adjust_stock))
        .route("/api/tools/:id/items", post(tools::create_item))
        .route("/api/tool-items", get(tools::list_items))
        .route("/api/tool-items/scan/:qr", get(tools::scan))
        .route("/api/tool-items/:id/qr", get(tools::item_qr))
        .route("/api/tool-items/:id/move", post(tools::move_item))
        .route("/api/tool-items/:id/movements", get(tools::movements))
        .route("/api/tool-items/:id/status", put(tools::change_status))
        .route("/api/equipment", get(equipment::list).post(equipment::create))
        .route(
            "/api/equipment/:id",
            get(equipment::get).put(equipment::update).delete(equipment::delete),
        )
        // Dashboard
        .route("/api/dashboard/stats", get(dashboard::stats))
        .route("/api/dashboard/alerts", get(dashboard::alerts))
        // Notifications and audit
        .route("/api/notifications", get(notifications::list))
        .route("/api/notifications/read-all", post(notifications::mark_all_read))
        .route("/api/notifications/:id/read", post(notifications::mark_read))
        .route("/api/audit-logs", get(audit::list))
        .route_layer(
            ServiceBuilder::new()
                .layer(from_fn(session_auth))
                .layer(from_fn(validate_user))
                .layer(from_fn(csrf_guard)),
        )
}

fn document_routes(kind: DocumentKind) -> Router {
    use protected::documents;

    let mut router = Router::new()
        .route("/", get(documents::list).post(documents::create))
        .route(
            "/:id",
            get(documents::get).put(documents::update).delete(documents::delete),
        )
        .route("/:id/pdf", get(documents::pdf))
        .route("/:id/:action", post(documents::transition));

    match kind {
        DocumentKind::Invoice => {
            router = router.route("/:id/payments", post(documents::record_payment));
        }
        DocumentKind::PurchaseOrder => {
            router = router.route("/bulk-approve", post(documents::bulk_approve));
        }
        DocumentKind::Estimate => {}
    }

    router.layer(Extension(kind))
}

/// `/api/admin/*` behind the admin session and CSRF.
fn admin_routes() -> Router {
    use elevated::{billing, contracts, logs, organizations, sales, session};

    Router::new()
        .route("/api/admin/me", get(session::me))
        .route("/api/admin/logout", post(session::logout))
        .route("/api/admin/2fa/setup", post(session::setup_two_factor))
        .route("/api/admin/2fa/enable", post(session::enable_two_factor))
        // Organizations
        .route("/api/admin/organizations", get(organizations::list).post(organizations::create))
        .route("/api/admin/organizations/:id", get(organizations::get))
        .route("/api/admin/organizations/:id/activate", post(organizations::activate))
        .route("/api/admin/organizations/:id/deactivate", post(organizations::deactivate))
        .route("/api/admin/organizations/:id/impersonate", post(organizations::impersonate))
        // Contracts and billing
        .route("/api/admin/contracts", get(contracts::list).post(contracts::create))
        .route("/api/admin/contracts/:id", put(contracts::update))
        .route("/api/admin/contracts/:id/complete", post(contracts::complete))
        .route("/api/admin/contracts/:id/plan-change", post(contracts::plan_change))
        .route("/api/admin/billing-invoices", get(billing::list))
        .route("/api/admin/billing-invoices/:id/mark-paid", post(billing::mark_paid))
        // Sales CRM
        .route("/api/admin/leads", get(sales::list).post(sales::create))
        .route("/api/admin/leads/:id/status", put(sales::update_status))
        .route("/api/admin/leads/:id/activities", get(sales::activities).post(sales::add_activity))
        .route("/api/admin/logs", get(logs::list))
        .route_layer(
            ServiceBuilder::new()
                .layer(from_fn(admin_auth))
                .layer(from_fn(csrf_guard)),
        )
}

/// `/api/cron/:job`, bearer secret only. GET is accepted for schedulers
/// that cannot POST.
fn cron_routes() -> Router {
    Router::new()
        .route("/api/cron/:job", get(cron::run).post(cron::run))
        .route_layer(from_fn(cron_auth))
}
