//! Downstream notification of newly ingested products
//!
//! At the end of a session the ingested products are POSTed once as a JSON
//! array. Delivery is best effort: failures are logged and reported in the
//! session summary, never raised.

use crate::config::NotificationConfig;
use crate::storage::CatalogProduct;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// One element of the notification payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductNotification {
    pub product_id: i64,
    pub product_name: String,
    pub product_price: String,
    pub image_url: Option<String>,
    pub stock: u32,
}

impl From<&CatalogProduct> for ProductNotification {
    fn from(product: &CatalogProduct) -> Self {
        Self {
            product_id: product.id,
            product_name: product.name.clone(),
            product_price: product.price.to_string(),
            image_url: product.primary_image_url.clone(),
            stock: product.stock,
        }
    }
}

/// What happened to a session's notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationOutcome {
    /// The batch was accepted by the endpoint
    Sent { count: usize },
    /// Nothing to send (empty batch or aborted session)
    Skipped,
    /// Notifications are turned off
    Disabled,
    /// Delivery failed; the message says why
    Failed(String),
}

/// Delivers a batch of product notifications
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends a non-empty batch
    async fn notify(&self, batch: &[ProductNotification]) -> NotificationOutcome;
}

/// Creates the notifier described by the configuration
pub fn build_notifier(config: &NotificationConfig) -> Result<Arc<dyn Notifier>, reqwest::Error> {
    if !config.enabled {
        return Ok(Arc::new(NoopNotifier));
    }
    Ok(Arc::new(HttpNotifier::new(
        &config.endpoint,
        Duration::from_secs(config.timeout_secs),
    )?))
}

/// POSTs batches to an HTTP endpoint
pub struct HttpNotifier {
    client: Client,
    endpoint: String,
}

impl HttpNotifier {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, batch: &[ProductNotification]) -> NotificationOutcome {
        tracing::info!(
            "Notifying {} of {} new products",
            self.endpoint,
            batch.len()
        );

        match self.client.post(&self.endpoint).json(batch).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::info!("Notification accepted ({})", response.status());
                NotificationOutcome::Sent { count: batch.len() }
            }
            Ok(response) => {
                let message = format!("endpoint answered HTTP {}", response.status().as_u16());
                tracing::warn!("Notification rejected: {}", message);
                NotificationOutcome::Failed(message)
            }
            Err(e) => {
                tracing::warn!("Notification to {} failed: {}", self.endpoint, e);
                NotificationOutcome::Failed(e.to_string())
            }
        }
    }
}

/// Notifier used when notifications are disabled
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, batch: &[ProductNotification]) -> NotificationOutcome {
        tracing::debug!("Notifications disabled; dropping batch of {}", batch.len());
        NotificationOutcome::Disabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn product() -> CatalogProduct {
        CatalogProduct {
            id: 3,
            name: "Gelang".to_string(),
            price: Decimal::new(15000050, 2),
            category_id: None,
            brand_id: Some(1),
            source_url: Some("https://s.example.com/p/1".to_string()),
            primary_image_url: None,
            stock: 12,
        }
    }

    #[test]
    fn test_payload_shape() {
        let payload = ProductNotification::from(&product());
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "product_id": 3,
                "product_name": "Gelang",
                "product_price": "150000.50",
                "image_url": null,
                "stock": 12
            })
        );
    }

    #[tokio::test]
    async fn test_posts_batch() {
        let server = MockServer::start().await;
        let batch = vec![ProductNotification::from(&product())];
        Mock::given(method("POST"))
            .and(path("/api/new_product_batch"))
            .and(body_json(&batch))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = HttpNotifier::new(
            &format!("{}/api/new_product_batch", server.uri()),
            Duration::from_secs(5),
        )
        .unwrap();

        assert_eq!(
            notifier.notify(&batch).await,
            NotificationOutcome::Sent { count: 1 }
        );
    }

    #[tokio::test]
    async fn test_rejected_batch_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let notifier = HttpNotifier::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let outcome = notifier
            .notify(&[ProductNotification::from(&product())])
            .await;
        assert_eq!(
            outcome,
            NotificationOutcome::Failed("endpoint answered HTTP 500".to_string())
        );
    }

    #[tokio::test]
    async fn test_disabled_notifier() {
        let config = NotificationConfig {
            enabled: false,
            ..NotificationConfig::default()
        };
        let notifier = build_notifier(&config).unwrap();
        let outcome = notifier
            .notify(&[ProductNotification::from(&product())])
            .await;
        assert_eq!(outcome, NotificationOutcome::Disabled);
    }
}
