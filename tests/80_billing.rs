mod common;

use genba_api::services::billing_service::WebhookOutcome;
use genba_api::services::BillingService;
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use sqlx::PgPool;
use uuid::Uuid;

fn sign(payload: &[u8]) -> String {
    let t = chrono::Utc::now().timestamp();
    let mut mac = Hmac::<Sha256>::new_from_slice(common::STRIPE_WEBHOOK_SECRET.as_bytes()).unwrap();
    mac.update(format!("{}.", t).as_bytes());
    mac.update(payload);
    format!("t={},v1={}", t, hex::encode(mac.finalize().into_bytes()))
}

fn paid_event(event_id: &str, stripe_invoice_id: &str, billing_invoice_id: Uuid) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": event_id,
        "type": "invoice.paid",
        "data": { "object": {
            "id": stripe_invoice_id,
            "metadata": { "billing_invoice_id": billing_invoice_id.to_string() }
        } }
    }))
    .unwrap()
}

/// A sent billing invoice whose Stripe id was never stored.
async fn unlinked_invoice(pool: &PgPool) -> Uuid {
    let org = common::organization(pool, 10).await;
    let (contract,): (Uuid,) = sqlx::query_as(
        "INSERT INTO contracts (organization_id, plan, start_date, billing_day, payment_method) VALUES ($1, 'basic', CURRENT_DATE, 1, 'card') RETURNING id",
    )
    .bind(org)
    .fetch_one(pool)
    .await
    .unwrap();
    let (id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO billing_invoices (contract_id, organization_id, invoice_number, billing_period_start,
                                      billing_period_end, subtotal, tax, total, due_date)
        VALUES ($1, $2, $3, CURRENT_DATE, CURRENT_DATE + 30, 30000, 3000, 33000, CURRENT_DATE + 30)
        RETURNING id
        "#,
    )
    .bind(contract)
    .bind(org)
    .bind(format!("INV-{}", Uuid::new_v4().simple()))
    .fetch_one(pool)
    .await
    .unwrap();
    id
}

async fn processed_at_is_set(pool: &PgPool, event_id: &str) -> bool {
    let (set,): (bool,) = sqlx::query_as("SELECT processed_at IS NOT NULL FROM stripe_events WHERE id = $1")
        .bind(event_id)
        .fetch_one(pool)
        .await
        .unwrap();
    set
}

#[tokio::test]
async fn metadata_links_a_payment_to_an_unlinked_invoice() {
    let Some(pool) = common::database().await else { return };
    let invoice = unlinked_invoice(&pool).await;
    let event_id = format!("evt_{}", Uuid::new_v4().simple());
    let stripe_invoice_id = format!("in_{}", Uuid::new_v4().simple());
    let payload = paid_event(&event_id, &stripe_invoice_id, invoice);

    let service = BillingService::new(pool.clone());
    let outcome = service.handle_webhook(&payload, &sign(&payload)).await.unwrap();
    assert_eq!(outcome, WebhookOutcome::Processed);

    let (status, linked): (String, Option<String>) =
        sqlx::query_as("SELECT status, stripe_invoice_id FROM billing_invoices WHERE id = $1")
            .bind(invoice)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status, "paid");
    assert_eq!(linked.as_deref(), Some(stripe_invoice_id.as_str()));
    assert!(processed_at_is_set(&pool, &event_id).await);

    let again = service.handle_webhook(&payload, &sign(&payload)).await.unwrap();
    assert_eq!(again, WebhookOutcome::Duplicate);
}

#[tokio::test]
async fn unmatched_payment_stays_open_for_redelivery() {
    let Some(pool) = common::database().await else { return };
    let event_id = format!("evt_{}", Uuid::new_v4().simple());
    let payload = paid_event(&event_id, &format!("in_{}", Uuid::new_v4().simple()), Uuid::new_v4());

    let service = BillingService::new(pool.clone());
    let err = service.handle_webhook(&payload, &sign(&payload)).await.unwrap_err();
    assert_eq!(err.status_code(), 409);
    assert!(!processed_at_is_set(&pool, &event_id).await);

    let (error_message,): (Option<String>,) = sqlx::query_as("SELECT error_message FROM stripe_events WHERE id = $1")
        .bind(&event_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(error_message.is_some());
}

#[tokio::test]
async fn bad_signature_is_refused_before_anything_is_stored() {
    let Some(pool) = common::database().await else { return };
    let event_id = format!("evt_{}", Uuid::new_v4().simple());
    let payload = paid_event(&event_id, "in_forged", Uuid::new_v4());
    let forged = format!("t={},v1={}", chrono::Utc::now().timestamp(), "0".repeat(64));

    let err = BillingService::new(pool.clone()).handle_webhook(&payload, &forged).await.unwrap_err();
    assert_eq!(err.status_code(), 400);

    let (stored,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM stripe_events WHERE id = $1")
        .bind(&event_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(stored, 0);
}
