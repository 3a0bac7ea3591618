//! Suppliers that purchase orders are placed with.

use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::database::models::Supplier;
use crate::error::ApiError;
use crate::types::{Listing, Page};

use super::audit_service::{AuditEntry, AuditService};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SupplierInput {
    /// Generated as `SUP-NNN` on create when omitted. Fixed once created.
    pub supplier_code: Option<String>,
    pub name: String,
    pub name_kana: Option<String>,
    pub postal_code: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub fax: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub contact_person: Option<String>,
    pub payment_terms: Option<String>,
    pub bank_name: Option<String>,
    pub branch_name: Option<String>,
    pub account_type: Option<String>,
    pub account_number: Option<String>,
    pub account_holder: Option<String>,
    pub notes: Option<String>,
    pub is_active: Option<bool>,
}

impl SupplierInput {
    pub fn normalize(mut self) -> Result<Self, ApiError> {
        fn blank(v: Option<String>) -> Option<String> {
            v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        }

        self.name = self.name.trim().to_string();
        if self.name.is_empty() {
            return Err(ApiError::field("name", "Name is required"));
        }
        self.supplier_code = blank(self.supplier_code);
        self.email = blank(self.email);
        if self.email.as_deref().is_some_and(|e| !e.contains('@')) {
            return Err(ApiError::field("email", "Invalid email address"));
        }
        for field in [
            &mut self.name_kana,
            &mut self.postal_code,
            &mut self.address,
            &mut self.phone,
            &mut self.fax,
            &mut self.website,
            &mut self.contact_person,
            &mut self.payment_terms,
            &mut self.bank_name,
            &mut self.branch_name,
            &mut self.account_type,
            &mut self.account_number,
            &mut self.account_holder,
            &mut self.notes,
        ] {
            *field = blank(field.take());
        }
        Ok(self)
    }
}

/// Code following the highest existing `SUP-NNN` code.
pub fn next_supplier_code(highest: Option<&str>) -> String {
    let last = highest
        .and_then(|code| code.strip_prefix("SUP-"))
        .and_then(|n| n.parse::<u32>().ok())
        .unwrap_or(0);
    format!("SUP-{:03}", last + 1)
}

#[derive(Debug, Default, Deserialize)]
pub struct SupplierQuery {
    pub search: Option<String>,
    pub is_active: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub struct SupplierService {
    pool: PgPool,
}

impl SupplierService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list(&self, organization_id: Uuid, query: &SupplierQuery) -> Result<Listing<Supplier>, ApiError> {
        let (limit, offset) = Page {
            limit: query.limit,
            offset: query.offset,
        }
        .resolve();
        let search = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(|s| format!("%{}%", s));

        let filter = r#"
            WHERE organization_id = $1
              AND ($2::text IS NULL OR name ILIKE $2 OR name_kana ILIKE $2 OR supplier_code ILIKE $2
                   OR address ILIKE $2 OR phone ILIKE $2)
              AND ($3::bool IS NULL OR is_active = $3)
        "#;
        let items: Vec<Supplier> = sqlx::query_as(&format!(
            "SELECT * FROM suppliers {} ORDER BY created_at DESC LIMIT $4 OFFSET $5",
            filter
        ))
        .bind(organization_id)
        .bind(&search)
        .bind(query.is_active)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM suppliers {}", filter))
            .bind(organization_id)
            .bind(&search)
            .bind(query.is_active)
            .fetch_one(&self.pool)
            .await?;

        Ok(Listing {
            items,
            count,
            limit,
            offset,
        })
    }

    pub async fn fetch(&self, organization_id: Uuid, id: Uuid) -> Result<Supplier, ApiError> {
        sqlx::query_as("SELECT * FROM suppliers WHERE id = $1 AND organization_id = $2")
            .bind(id)
            .bind(organization_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ApiError::not_found("Supplier not found"))
    }

    pub async fn create(&self, organization_id: Uuid, user_id: Uuid, input: SupplierInput) -> Result<Supplier, ApiError> {
        let input = input.normalize()?;

        let mut tx = self.pool.begin().await?;
        let code = match &input.supplier_code {
            Some(code) => code.clone(),
            None => {
                // Serializes generated codes within the organization.
                sqlx::query("SELECT pg_advisory_xact_lock(hashtext('suppliers:' || $1::text))")
                    .bind(organization_id)
                    .execute(&mut *tx)
                    .await?;
                let highest: Option<(String,)> = sqlx::query_as(
                    r#"
                    SELECT supplier_code FROM suppliers
                    WHERE organization_id = $1 AND supplier_code ~ '^SUP-[0-9]+$'
                    ORDER BY substring(supplier_code FROM 5)::int DESC
                    LIMIT 1
                    "#,
                )
                .bind(organization_id)
                .fetch_optional(&mut *tx)
                .await?;
                next_supplier_code(highest.as_ref().map(|(c,)| c.as_str()))
            }
        };

        let supplier: Supplier = sqlx::query_as(
            r#"
            INSERT INTO suppliers (organization_id, supplier_code, name, name_kana, postal_code, address, phone, fax,
                                   email, website, contact_person, payment_terms, bank_name, branch_name,
                                   account_type, account_number, account_holder, notes, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            RETURNING *
            "#,
        )
        .bind(organization_id)
        .bind(&code)
        .bind(&input.name)
        .bind(&input.name_kana)
        .bind(&input.postal_code)
        .bind(&input.address)
        .bind(&input.phone)
        .bind(&input.fax)
        .bind(&input.email)
        .bind(&input.website)
        .bind(&input.contact_person)
        .bind(&input.payment_terms)
        .bind(&input.bank_name)
        .bind(&input.branch_name)
        .bind(&input.account_type)
        .bind(&input.account_number)
        .bind(&input.account_holder)
        .bind(&input.notes)
        .bind(input.is_active.unwrap_or(true))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                ApiError::field("supplier_code", format!("Supplier code '{}' is already in use", code))
            }
            other => other.into(),
        })?;
        tx.commit().await?;

        info!("Supplier {} created in org {}", supplier.supplier_code, organization_id);
        AuditService::new(self.pool.clone())
            .record(
                AuditEntry::new(organization_id, user_id, "create", "supplier")
                    .entity(supplier.id)
                    .change(None, Some(json!({ "supplier_code": supplier.supplier_code, "name": supplier.name }))),
            )
            .await;
        Ok(supplier)
    }

    /// Replace every field except the code.
    pub async fn update(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        id: Uuid,
        input: SupplierInput,
    ) -> Result<Supplier, ApiError> {
        let input = input.normalize()?;
        let before = self.fetch(organization_id, id).await?;

        let supplier: Supplier = sqlx::query_as(
            r#"
            UPDATE suppliers SET name = $3, name_kana = $4, postal_code = $5, address = $6, phone = $7, fax = $8,
                email = $9, website = $10, contact_person = $11, payment_terms = $12, bank_name = $13,
                branch_name = $14, account_type = $15, account_number = $16, account_holder = $17, notes = $18,
                is_active = $19, updated_at = now()
            WHERE id = $1 AND organization_id = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(organization_id)
        .bind(&input.name)
        .bind(&input.name_kana)
        .bind(&input.postal_code)
        .bind(&input.address)
        .bind(&input.phone)
        .bind(&input.fax)
        .bind(&input.email)
        .bind(&input.website)
        .bind(&input.contact_person)
        .bind(&input.payment_terms)
        .bind(&input.bank_name)
        .bind(&input.branch_name)
        .bind(&input.account_type)
        .bind(&input.account_number)
        .bind(&input.account_holder)
        .bind(&input.notes)
        .bind(input.is_active.unwrap_or(before.is_active))
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Supplier not found"))?;

        AuditService::new(self.pool.clone())
            .record(
                AuditEntry::new(organization_id, user_id, "update", "supplier")
                    .entity(id)
                    .change(
                        Some(json!({ "name": before.name, "is_active": before.is_active })),
                        Some(json!({ "name": supplier.name, "is_active": supplier.is_active })),
                    ),
            )
            .await;
        Ok(supplier)
    }

    /// Hard delete, refused while any purchase order names the supplier.
    pub async fn delete(&self, organization_id: Uuid, user_id: Uuid, id: Uuid) -> Result<(), ApiError> {
        let done = sqlx::query(
            r#"
            DELETE FROM suppliers s
            WHERE s.id = $1 AND s.organization_id = $2
              AND NOT EXISTS (SELECT 1 FROM purchase_orders po WHERE po.supplier_id = s.id)
            "#,
        )
        .bind(id)
        .bind(organization_id)
        .execute(&self.pool)
        .await?;
        if done.rows_affected() == 0 {
            // Distinguish a missing supplier from one still in use.
            self.fetch(organization_id, id).await?;
            return Err(ApiError::bad_request(
                "This supplier has purchase orders and cannot be deleted; deactivate it instead",
            ));
        }

        info!("Supplier {} deleted in org {}", id, organization_id);
        AuditService::new(self.pool.clone())
            .record(AuditEntry::new(organization_id, user_id, "delete", "supplier").entity(id))
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_continue_from_the_highest() {
        assert_eq!(next_supplier_code(None), "SUP-001");
        assert_eq!(next_supplier_code(Some("SUP-009")), "SUP-010");
        assert_eq!(next_supplier_code(Some("SUP-1234")), "SUP-1235");
        assert_eq!(next_supplier_code(Some("ACME")), "SUP-001");
    }

    #[test]
    fn blank_optional_fields_are_dropped() {
        let input = SupplierInput {
            name: " Kanto Steel ".to_string(),
            supplier_code: Some("  ".to_string()),
            fax: Some(" ".to_string()),
            phone: Some(" 03-1234-5678 ".to_string()),
            ..Default::default()
        }
        .normalize()
        .unwrap();
        assert_eq!(input.name, "Kanto Steel");
        assert_eq!(input.supplier_code, None);
        assert_eq!(input.fax, None);
        assert_eq!(input.phone.as_deref(), Some("03-1234-5678"));
    }

    #[test]
    fn name_and_email_are_checked() {
        let err = SupplierInput::default().normalize().unwrap_err();
        assert_eq!(err.status_code(), 400);

        let err = SupplierInput {
            name: "Kanto Steel".to_string(),
            email: Some("sales.example.jp".to_string()),
            ..Default::default()
        }
        .normalize()
        .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}
