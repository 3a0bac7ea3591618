//! Minimal Stripe REST client and webhook verification.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::info;

use crate::config;

const API_BASE: &str = "https://api.stripe.com/v1";

#[derive(Debug, Error)]
pub enum StripeError {
    #[error("Stripe is not configured")]
    NotConfigured,

    #[error("{0}")]
    Signature(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("Stripe API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Unexpected Stripe payload: {0}")]
    Payload(String),
}

#[derive(Debug, Deserialize)]
pub struct StripeObject {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    message: String,
}

/// How a Stripe invoice is collected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Collection {
    /// Charge the customer's default card.
    ChargeAutomatically,
    /// Email the invoice and wait for a transfer.
    SendInvoice { days_until_due: i64 },
}

pub struct StripeClient {
    http: reqwest::Client,
    secret_key: String,
}

impl StripeClient {
    /// Client from configuration, or `NotConfigured` when no key is set.
    pub fn from_config() -> Result<Self, StripeError> {
        let secret_key = config::config()
            .billing
            .stripe_secret_key
            .clone()
            .ok_or(StripeError::NotConfigured)?;
        Ok(Self {
            http: reqwest::Client::new(),
            secret_key,
        })
    }

    async fn post(&self, path: &str, form: &[(&str, String)]) -> Result<StripeObject, StripeError> {
        let response = self
            .http
            .post(format!("{}{}", API_BASE, path))
            .bearer_auth(&self.secret_key)
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<StripeErrorBody>()
                .await
                .map(|b| b.error.message)
                .unwrap_or_else(|_| status.to_string());
            return Err(StripeError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<StripeObject>()
            .await
            .map_err(|e| StripeError::Payload(e.to_string()))
    }

    pub async fn create_invoice_item(
        &self,
        customer: &str,
        amount_yen: i64,
        description: &str,
    ) -> Result<StripeObject, StripeError> {
        self.post(
            "/invoiceitems",
            &[
                ("customer", customer.to_string()),
                ("amount", amount_yen.to_string()),
                ("currency", "jpy".to_string()),
                ("description", description.to_string()),
            ],
        )
        .await
    }

    /// Create and finalize an invoice for the customer's pending items.
    pub async fn create_invoice(
        &self,
        customer: &str,
        description: &str,
        collection: Collection,
        metadata: &[(&str, String)],
    ) -> Result<StripeObject, StripeError> {
        let metadata_keys: Vec<String> = metadata.iter().map(|(k, _)| format!("metadata[{}]", k)).collect();
        let mut form = vec![
            ("customer", customer.to_string()),
            ("description", description.to_string()),
            ("pending_invoice_items_behavior", "include".to_string()),
        ];
        match collection {
            Collection::ChargeAutomatically => {
                form.push(("collection_method", "charge_automatically".to_string()));
            }
            Collection::SendInvoice { days_until_due } => {
                form.push(("collection_method", "send_invoice".to_string()));
                form.push(("days_until_due", days_until_due.to_string()));
            }
        }
        for (key, (_, value)) in metadata_keys.iter().zip(metadata) {
            form.push((key.as_str(), value.clone()));
        }

        let invoice = self.post("/invoices", &form).await?;
        let finalized = self
            .post(&format!("/invoices/{}/finalize", invoice.id), &[])
            .await?;
        info!("Stripe invoice {} finalized", finalized.id);
        Ok(finalized)
    }

    pub async fn pay_invoice(&self, invoice_id: &str) -> Result<StripeObject, StripeError> {
        self.post(&format!("/invoices/{}/pay", invoice_id), &[]).await
    }
}

/// A webhook delivery, with the object left untyped.
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookData,
}

#[derive(Debug, Deserialize)]
pub struct WebhookData {
    pub object: serde_json::Value,
}

impl WebhookEvent {
    pub fn object_id(&self) -> Option<&str> {
        self.data.object.get("id").and_then(|v| v.as_str())
    }

    /// `metadata[key]` of the event object.
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.data
            .object
            .get("metadata")
            .and_then(|m| m.get(key))
            .and_then(|v| v.as_str())
    }
}

/// Verify a `Stripe-Signature` header (`t=<unix>,v1=<hex hmac>[,v1=...]`)
/// against the raw body.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_secs: i64,
    now: i64,
) -> Result<(), StripeError> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<&str> = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| StripeError::Signature("Missing signature timestamp".to_string()))?;
    if signatures.is_empty() {
        return Err(StripeError::Signature("No v1 signature present".to_string()));
    }
    if (now - timestamp).abs() > tolerance_secs {
        return Err(StripeError::Signature("Signature timestamp outside tolerance".to_string()));
    }

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| StripeError::Signature(e.to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    let expected = hex::encode(mac.finalize().into_bytes());

    let matched = signatures
        .iter()
        .any(|sig| sig.len() == expected.len() && bool::from(sig.as_bytes().ct_eq(expected.as_bytes())));
    if matched {
        Ok(())
    } else {
        Err(StripeError::Signature("Signature mismatch".to_string()))
    }
}

/// Verify and parse a webhook delivery using the configured secret.
pub fn construct_event(payload: &[u8], header: &str) -> Result<WebhookEvent, StripeError> {
    let billing = &config::config().billing;
    let secret = billing
        .stripe_webhook_secret
        .as_deref()
        .ok_or(StripeError::NotConfigured)?;
    verify_signature(payload, header, secret, billing.webhook_tolerance_secs, chrono::Utc::now().timestamp())?;
    serde_json::from_slice(payload).map_err(|e| StripeError::Payload(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(payload: &[u8], secret: &str, t: i64) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}.", t).as_bytes());
        mac.update(payload);
        format!("t={},v1={}", t, hex::encode(mac.finalize().into_bytes()))
    }

    const BODY: &[u8] = br#"{"id":"evt_1","type":"invoice.paid","data":{"object":{"id":"in_1"}}}"#;

    #[test]
    fn valid_signature_passes() {
        let header = sign(BODY, "whsec_test", 1_700_000_000);
        assert!(verify_signature(BODY, &header, "whsec_test", 300, 1_700_000_100).is_ok());
    }

    #[test]
    fn stale_timestamp_fails() {
        let header = sign(BODY, "whsec_test", 1_700_000_000);
        assert!(verify_signature(BODY, &header, "whsec_test", 300, 1_700_000_301).is_err());
    }

    #[test]
    fn wrong_secret_or_body_fails() {
        let header = sign(BODY, "whsec_other", 1_700_000_000);
        assert!(verify_signature(BODY, &header, "whsec_test", 300, 1_700_000_000).is_err());

        let header = sign(BODY, "whsec_test", 1_700_000_000);
        assert!(verify_signature(b"{}", &header, "whsec_test", 300, 1_700_000_000).is_err());
    }

    #[test]
    fn any_v1_may_match() {
        let good = sign(BODY, "whsec_test", 1_700_000_000);
        let header = format!("t=1700000000,v1=deadbeef,{}", good.split_once(',').unwrap().1);
        assert!(verify_signature(BODY, &header, "whsec_test", 300, 1_700_000_000).is_ok());
    }

    #[test]
    fn malformed_header_fails() {
        assert!(verify_signature(BODY, "v1=abc", "whsec_test", 300, 0).is_err());
        assert!(verify_signature(BODY, "t=1", "whsec_test", 300, 1).is_err());
    }

    #[test]
    fn event_exposes_object_id() {
        let event: WebhookEvent = serde_json::from_slice(BODY).unwrap();
        assert_eq!(event.event_type, "invoice.paid");
        assert_eq!(event.object_id(), Some("in_1"));
        assert_eq!(event.metadata("billing_invoice_id"), None);
    }

    #[test]
    fn event_exposes_metadata() {
        let body = br#"{"id":"evt_2","type":"invoice.paid","data":{"object":{"id":"in_2","metadata":{"invoice_number":"GB-1"}}}}"#;
        let event: WebhookEvent = serde_json::from_slice(body).unwrap();
        assert_eq!(event.metadata("invoice_number"), Some("GB-1"));
        assert_eq!(event.metadata("missing"), None);
    }
}
