//! Customer and supplier master data, with CSV import/export.

use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::database::models::Client;
use crate::error::ApiError;
use crate::export::csv::{cell, read_csv, write_csv};
use crate::export::Attachment;
use crate::types::{business_today, Listing, Page};

use super::audit_service::{AuditEntry, AuditService};

const CLIENT_TYPES: [&str; 3] = ["customer", "supplier", "both"];

const CSV_HEADERS: [&str; 11] = [
    "client_code",
    "name",
    "name_kana",
    "client_type",
    "email",
    "phone",
    "postal_code",
    "address",
    "contact_person",
    "notes",
    "is_active",
];

/// Fields accepted on create, update and CSV import. Column names of the
/// import file match these field names.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientInput {
    pub client_code: String,
    pub name: String,
    pub name_kana: Option<String>,
    pub client_type: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub postal_code: Option<String>,
    pub address: Option<String>,
    pub contact_person: Option<String>,
    pub notes: Option<String>,
    pub is_active: Option<bool>,
}

impl ClientInput {
    /// Trim, blank-to-None, and check required fields and enums.
    pub fn normalize(mut self) -> Result<Self, ApiError> {
        fn blank(v: Option<String>) -> Option<String> {
            v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        }

        self.client_code = self.client_code.trim().to_string();
        self.name = self.name.trim().to_string();
        if self.client_code.is_empty() {
            return Err(ApiError::field("client_code", "Client code is required"));
        }
        if self.name.is_empty() {
            return Err(ApiError::field("name", "Name is required"));
        }

        self.client_type = Some(blank(self.client_type).unwrap_or_else(|| "customer".to_string()));
        if let Some(kind) = &self.client_type {
            if !CLIENT_TYPES.contains(&kind.as_str()) {
                return Err(ApiError::field(
                    "client_type",
                    format!("Must be one of {}", CLIENT_TYPES.join(", ")),
                ));
            }
        }

        self.email = blank(self.email);
        if let Some(email) = &self.email {
            if !email.contains('@') {
                return Err(ApiError::field("email", "Invalid email address"));
            }
        }
        self.name_kana = blank(self.name_kana);
        self.phone = blank(self.phone);
        self.postal_code = blank(self.postal_code);
        self.address = blank(self.address);
        self.contact_person = blank(self.contact_person);
        self.notes = blank(self.notes);
        Ok(self)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ClientQuery {
    pub search: Option<String>,
    pub client_type: Option<String>,
    pub active: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ImportFailure {
    pub line: usize,
    pub client_code: Option<String>,
    pub error: String,
}

#[derive(Debug, Default, Serialize)]
pub struct ImportReport {
    pub created: usize,
    pub failed: Vec<ImportFailure>,
}

pub struct ClientService {
    pool: PgPool,
}

impl ClientService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list(&self, organization_id: Uuid, query: &ClientQuery) -> Result<Listing<Client>, ApiError> {
        let (limit, offset) = Page {
            limit: query.limit,
            offset: query.offset,
        }
        .resolve();
        let search = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(|s| format!("%{}%", s));

        let filter = r#"
            WHERE organization_id = $1 AND deleted_at IS NULL
              AND ($2::text IS NULL OR name ILIKE $2 OR name_kana ILIKE $2 OR client_code ILIKE $2)
              AND ($3::text IS NULL OR client_type = $3)
              AND ($4::bool IS NULL OR is_active = $4)
        "#;
        let items: Vec<Client> = sqlx::query_as(&format!(
            "SELECT * FROM clients {} ORDER BY client_code LIMIT $5 OFFSET $6",
            filter
        ))
        .bind(organization_id)
        .bind(&search)
        .bind(&query.client_type)
        .bind(query.active)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM clients {}", filter))
            .bind(organization_id)
            .bind(&search)
            .bind(&query.client_type)
            .bind(query.active)
            .fetch_one(&self.pool)
            .await?;

        Ok(Listing {
            items,
            count,
            limit,
            offset,
        })
    }

    pub async fn fetch(&self, organization_id: Uuid, id: Uuid) -> Result<Client, ApiError> {
        sqlx::query_as("SELECT * FROM clients WHERE id = $1 AND organization_id = $2 AND deleted_at IS NULL")
            .bind(id)
            .bind(organization_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::not_found("Client not found"))
    }

    async fn insert(&self, organization_id: Uuid, input: &ClientInput) -> Result<Client, sqlx::Error> {
        sqlx::query_as(
            r#"
            INSERT INTO clients (organization_id, client_code, name, name_kana, client_type, email, phone,
                                 postal_code, address, contact_person, notes, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(organization_id)
        .bind(&input.client_code)
        .bind(&input.name)
        .bind(&input.name_kana)
        .bind(&input.client_type)
        .bind(&input.email)
        .bind(&input.phone)
        .bind(&input.postal_code)
        .bind(&input.address)
        .bind(&input.contact_person)
        .bind(&input.notes)
        .bind(input.is_active.unwrap_or(true))
        .fetch_one(&self.pool)
        .await
    }

    pub async fn create(&self, organization_id: Uuid, user_id: Uuid, input: ClientInput) -> Result<Client, ApiError> {
        let input = input.normalize()?;
        let client = self.insert(organization_id, &input).await.map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                ApiError::field("client_code", format!("Client code '{}' is already in use", input.client_code))
            }
            other => other.into(),
        })?;

        info!("Client {} created in org {}", client.client_code, organization_id);
        AuditService::new(self.pool.clone())
            .record(
                AuditEntry::new(organization_id, user_id, "create", "client")
                    .entity(client.id)
                    .change(None, Some(json!({ "client_code": client.client_code, "name": client.name }))),
            )
            .await;
        Ok(client)
    }

    pub async fn update(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        id: Uuid,
        input: ClientInput,
    ) -> Result<Client, ApiError> {
        let input = input.normalize()?;
        let before = self.fetch(organization_id, id).await?;

        let client: Client = sqlx::query_as(
            r#"
            UPDATE clients SET client_code = $3, name = $4, name_kana = $5, client_type = $6, email = $7,
                phone = $8, postal_code = $9, address = $10, contact_person = $11, notes = $12,
                is_active = $13, updated_at = now()
            WHERE id = $1 AND organization_id = $2 AND deleted_at IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(organization_id)
        .bind(&input.client_code)
        .bind(&input.name)
        .bind(&input.name_kana)
        .bind(&input.client_type)
        .bind(&input.email)
        .bind(&input.phone)
        .bind(&input.postal_code)
        .bind(&input.address)
        .bind(&input.contact_person)
        .bind(&input.notes)
        .bind(input.is_active.unwrap_or(before.is_active))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                ApiError::field("client_code", format!("Client code '{}' is already in use", input.client_code))
            }
            other => other.into(),
        })?
        .ok_or_else(|| ApiError::not_found("Client not found"))?;

        AuditService::new(self.pool.clone())
            .record(
                AuditEntry::new(organization_id, user_id, "update", "client")
                    .entity(id)
                    .change(serde_json::to_value(&before).ok(), serde_json::to_value(&client).ok()),
            )
            .await;
        Ok(client)
    }

    pub async fn delete(&self, organization_id: Uuid, user_id: Uuid, id: Uuid) -> Result<(), ApiError> {
        let done = sqlx::query(
            "UPDATE clients SET deleted_at = now() WHERE id = $1 AND organization_id = $2 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(organization_id)
        .execute(&self.pool)
        .await?;
        if done.rows_affected() == 0 {
            return Err(ApiError::not_found("Client not found"));
        }

        info!("Client {} deleted in org {}", id, organization_id);
        AuditService::new(self.pool.clone())
            .record(AuditEntry::new(organization_id, user_id, "delete", "client").entity(id))
            .await;
        Ok(())
    }

    pub async fn export_csv(&self, organization_id: Uuid) -> Result<Attachment, ApiError> {
        let clients: Vec<Client> = sqlx::query_as(
            "SELECT * FROM clients WHERE organization_id = $1 AND deleted_at IS NULL ORDER BY client_code",
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;

        let rows = clients.into_iter().map(|c| {
            vec![
                c.client_code,
                c.name,
                cell(&c.name_kana),
                c.client_type,
                cell(&c.email),
                cell(&c.phone),
                cell(&c.postal_code),
                cell(&c.address),
                cell(&c.contact_person),
                cell(&c.notes),
                c.is_active.to_string(),
            ]
        });
        let body = write_csv(&CSV_HEADERS, rows)?;
        Ok(Attachment::csv(format!("clients-{}.csv", business_today()), body))
    }

    /// Import rows one by one. A bad row is reported and skipped; the rest
    /// of the file still goes in.
    pub async fn import_csv(&self, organization_id: Uuid, user_id: Uuid, input: &[u8]) -> Result<ImportReport, ApiError> {
        let rows = read_csv::<ClientInput>(input)?;
        let mut report = ImportReport::default();

        for (line, parsed) in rows {
            let input = match parsed.map_err(ApiError::bad_request).and_then(ClientInput::normalize) {
                Ok(input) => input,
                Err(e) => {
                    report.failed.push(ImportFailure {
                        line,
                        client_code: None,
                        error: describe(&e),
                    });
                    continue;
                }
            };

            match self.insert(organization_id, &input).await {
                Ok(_) => report.created += 1,
                Err(sqlx::Error::Database(db)) if db.is_unique_violation() => report.failed.push(ImportFailure {
                    line,
                    client_code: Some(input.client_code),
                    error: "Client code is already in use".to_string(),
                }),
                Err(e) => {
                    warn!("Client import row {} failed: {}", line, e);
                    report.failed.push(ImportFailure {
                        line,
                        client_code: Some(input.client_code),
                        error: "Could not save row".to_string(),
                    });
                }
            }
        }

        info!(
            "Client import in org {}: {} created, {} failed",
            organization_id,
            report.created,
            report.failed.len()
        );
        AuditService::new(self.pool.clone())
            .record(
                AuditEntry::new(organization_id, user_id, "import", "client")
                    .change(None, Some(json!({ "created": report.created, "failed": report.failed.len() }))),
            )
            .await;
        Ok(report)
    }
}

/// Row-level message for the import report, naming the field when there is one.
fn describe(err: &ApiError) -> String {
    match err {
        ApiError::ValidationError {
            field_errors: Some(fields),
            ..
        } => fields
            .iter()
            .map(|(field, problem)| format!("{}: {}", field, problem))
            .collect::<Vec<_>>()
            .join("; "),
        other => other.message().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(code: &str, name: &str) -> ClientInput {
        ClientInput {
            client_code: code.to_string(),
            name: name.to_string(),
            name_kana: Some("  ".to_string()),
            client_type: None,
            email: None,
            phone: Some(" 03-1234-5678 ".to_string()),
            postal_code: None,
            address: None,
            contact_person: None,
            notes: None,
            is_active: None,
        }
    }

    #[test]
    fn normalize_trims_and_defaults_type() {
        let c = input(" C001 ", "Tanaka Kensetsu").normalize().unwrap();
        assert_eq!(c.client_code, "C001");
        assert_eq!(c.client_type.as_deref(), Some("customer"));
        assert_eq!(c.name_kana, None);
        assert_eq!(c.phone.as_deref(), Some("03-1234-5678"));
    }

    #[test]
    fn normalize_rejects_missing_name_and_bad_type() {
        let err = input("C001", " ").normalize().unwrap_err();
        assert_eq!(describe(&err), "name: Name is required");

        let mut bad = input("C002", "Sato");
        bad.client_type = Some("partner".to_string());
        assert!(bad.normalize().is_err());
    }

    #[test]
    fn import_rows_parse_from_csv_headers() {
        let csv = "client_code,name,client_type,email\nC001,Tanaka,supplier,a@example.jp\nC002,,customer,\n";
        let rows = read_csv::<ClientInput>(csv.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        let first = rows[0].1.clone().unwrap().normalize().unwrap();
        assert_eq!(first.client_type.as_deref(), Some("supplier"));
        let second = rows[1].1.clone().unwrap().normalize();
        assert!(second.is_err());
    }
}
