mod common;

use genba_api::services::document_service::{DocumentInput, LineItemInput};
use genba_api::services::DocumentService;
use genba_api::types::Role;
use genba_api::workflow::{Actor, DocumentKind};
use rust_decimal::Decimal;
use uuid::Uuid;

fn estimate_for(client_id: Uuid) -> DocumentInput {
    DocumentInput {
        number: None,
        client_id: Some(client_id),
        project_id: None,
        estimate_id: None,
        supplier_id: None,
        title: "Scaffolding rental".to_string(),
        issue_date: None,
        due_date: None,
        notes: None,
        items: vec![LineItemInput {
            item_type: None,
            custom_type: None,
            description: "Scaffolding, 2 weeks".to_string(),
            quantity: Decimal::from(1),
            unit: None,
            unit_price: Decimal::from(120_000),
            tax_rate: None,
        }],
    }
}

#[tokio::test]
async fn another_tenants_client_cannot_be_attached() {
    let Some(pool) = common::database().await else { return };
    let ours = common::organization(&pool, 10).await;
    let theirs = common::organization(&pool, 10).await;
    let manager = Actor {
        user_id: common::user(&pool, ours, "manager", true).await,
        role: Role::Manager,
    };
    let foreign_client = common::client(&pool, theirs, "Rival Kensetsu").await;
    let service = DocumentService::new(pool.clone(), DocumentKind::Estimate);

    let err = service
        .create(ours, &manager, estimate_for(foreign_client))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);

    let own_client = common::client(&pool, ours, "Yamada Koumuten").await;
    let created = service.create(ours, &manager, estimate_for(own_client)).await.unwrap();
    assert_eq!(created.document.client_name.as_deref(), Some("Yamada Koumuten"));

    let err = service
        .update(ours, &manager, created.document.id, estimate_for(foreign_client))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn client_names_never_cross_tenants() {
    let Some(pool) = common::database().await else { return };
    let ours = common::organization(&pool, 10).await;
    let theirs = common::organization(&pool, 10).await;
    let manager = Actor {
        user_id: common::user(&pool, ours, "manager", true).await,
        role: Role::Manager,
    };
    let own_client = common::client(&pool, ours, "Yamada Koumuten").await;
    let service = DocumentService::new(pool.clone(), DocumentKind::Estimate);
    let created = service.create(ours, &manager, estimate_for(own_client)).await.unwrap();

    // A row pointing across tenants, as a pre-existing bad link would.
    let foreign_client = common::client(&pool, theirs, "Rival Kensetsu").await;
    sqlx::query("UPDATE estimates SET client_id = $2 WHERE id = $1")
        .bind(created.document.id)
        .bind(foreign_client)
        .execute(&pool)
        .await
        .unwrap();

    let fetched = service.fetch(ours, created.document.id).await.unwrap();
    assert_eq!(fetched.client_name, None);
}

#[tokio::test]
async fn concurrent_creates_get_distinct_numbers() {
    let Some(pool) = common::database().await else { return };
    let org = common::organization(&pool, 10).await;
    let manager = Actor {
        user_id: common::user(&pool, org, "manager", true).await,
        role: Role::Manager,
    };
    let client = common::client(&pool, org, "Yamada Koumuten").await;

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let service = DocumentService::new(pool.clone(), DocumentKind::Estimate);
            tokio::spawn(async move { service.create(org, &manager, estimate_for(client)).await })
        })
        .collect();

    let mut numbers = Vec::new();
    for handle in handles {
        numbers.push(handle.await.unwrap().unwrap().document.number);
    }
    numbers.sort();
    numbers.dedup();
    assert_eq!(numbers.len(), 6);
}
