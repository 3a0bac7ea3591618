// handlers/public/auth/impersonate.rs - GET /auth/impersonate handler

use axum::{extract::Query, response::Redirect};
use axum_extra::extract::CookieJar;
use serde::Deserialize;

use crate::auth::{csrf, SESSION_COOKIE};
use crate::database::DatabaseManager;
use crate::error::ApiError;
use crate::handlers::cookies;
use crate::services::ImpersonationService;

#[derive(Debug, Deserialize)]
pub struct ImpersonateQuery {
    pub token: String,
}

/// Redeem a single-use impersonation link and land on the app as that user.
pub async fn get(jar: CookieJar, Query(query): Query<ImpersonateQuery>) -> Result<(CookieJar, Redirect), ApiError> {
    let service = ImpersonationService::new(DatabaseManager::pool()?);
    let session = service.redeem(&query.token).await?;

    let jar = jar
        .add(cookies::session(SESSION_COOKIE, session.token))
        .add(cookies::csrf(csrf::generate_token()?));
    Ok((jar, Redirect::to("/")))
}
