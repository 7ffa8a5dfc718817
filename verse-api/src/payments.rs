//! Outbound payment calls.
//!
//! The only provider call the API makes is creating a Stripe payment intent
//! for tips and VerseCoin packs. Everything else arrives through webhooks.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use verse_core::OrderKind;

use crate::error::{ApiError, ApiResult};

/// Parameters of a payment intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntentRequest {
    pub amount_cents: i64,
    pub currency: String,
    pub kind: OrderKind,
    /// Copied to the intent's metadata; the webhook reads it back.
    pub metadata: BTreeMap<String, String>,
    pub description: Option<String>,
    pub idempotency_key: Option<String>,
}

impl PaymentIntentRequest {
    pub fn new(kind: OrderKind, amount_cents: i64) -> Self {
        Self {
            amount_cents,
            currency: "usd".to_string(),
            kind,
            metadata: BTreeMap::new(),
            description: None,
            idempotency_key: None,
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl ToString) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Form fields in Stripe's bracket notation.
    pub fn form_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("amount".to_string(), self.amount_cents.to_string()),
            ("currency".to_string(), self.currency.clone()),
            (
                "automatic_payment_methods[enabled]".to_string(),
                "true".to_string(),
            ),
            ("metadata[kind]".to_string(), self.kind.as_str().to_string()),
        ];
        if let Some(description) = &self.description {
            fields.push(("description".to_string(), description.clone()));
        }
        for (key, value) in &self.metadata {
            if key != "kind" {
                fields.push((format!("metadata[{}]", key), value.clone()));
            }
        }
        fields
    }
}

/// A created payment intent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment_intent(&self, request: &PaymentIntentRequest) -> ApiResult<PaymentIntent>;
}

/// Stripe REST gateway.
pub struct StripeGateway {
    client: reqwest::Client,
    api_base: String,
    secret_key: Option<SecretString>,
}

impl StripeGateway {
    pub fn new(api_base: impl Into<String>, secret_key: Option<SecretString>) -> ApiResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ApiError::internal_error(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            secret_key,
        })
    }

    fn payment_intents_url(&self) -> String {
        format!("{}/v1/payment_intents", self.api_base)
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_payment_intent(&self, request: &PaymentIntentRequest) -> ApiResult<PaymentIntent> {
        let secret_key = self
            .secret_key
            .as_ref()
            .ok_or_else(|| ApiError::service_unavailable("Payments are not configured"))?;

        let mut builder = self
            .client
            .post(self.payment_intents_url())
            .bearer_auth(secret_key.expose_secret())
            .form(&request.form_fields());
        if let Some(key) = &request.idempotency_key {
            builder = builder.header("Idempotency-Key", key);
        }

        let response = builder.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!(
                status = %status,
                error = %error_text,
                kind = request.kind.as_str(),
                "Stripe payment intent creation failed"
            );
            return Err(ApiError::upstream_error("Failed to create payment"));
        }

        let intent: PaymentIntent = response.json().await?;
        tracing::info!(
            payment_intent = %intent.id,
            kind = request.kind.as_str(),
            amount_cents = request.amount_cents,
            "Payment intent created"
        );
        Ok(intent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_form_fields_use_bracket_metadata() {
        let request = PaymentIntentRequest::new(OrderKind::Tip, 500)
            .with_metadata("tip_id", "abc")
            .with_metadata("character_key", "lexi")
            .with_description("Tip for Lexi");
        let fields = request.form_fields();

        assert!(fields.contains(&("amount".into(), "500".into())));
        assert!(fields.contains(&("currency".into(), "usd".into())));
        assert!(fields.contains(&("metadata[kind]".into(), "tip".into())));
        assert!(fields.contains(&("metadata[tip_id]".into(), "abc".into())));
        assert!(fields.contains(&("metadata[character_key]".into(), "lexi".into())));
        assert!(fields.contains(&("description".into(), "Tip for Lexi".into())));
    }

    #[test]
    fn test_kind_metadata_cannot_be_overridden() {
        let request = PaymentIntentRequest::new(OrderKind::VerseCoins, 999).with_metadata("kind", "tip");
        let kinds: Vec<_> = request
            .form_fields()
            .into_iter()
            .filter(|(k, _)| k == "metadata[kind]")
            .collect();
        assert_eq!(kinds, vec![("metadata[kind]".to_string(), "versecoins".to_string())]);
    }

    #[tokio::test]
    async fn test_unconfigured_gateway_is_unavailable() {
        let gateway = StripeGateway::new("https://api.stripe.com", None).unwrap();
        let err = gateway
            .create_payment_intent(&PaymentIntentRequest::new(OrderKind::Tip, 100))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::SERVICE_UNAVAILABLE);
    }
}
