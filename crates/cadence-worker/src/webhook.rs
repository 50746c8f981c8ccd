//! Delivery handlers used by the worker binary.
//!
//! [`WebhookDelivery`] POSTs each occurrence as JSON to the configured
//! delivery endpoint, signed GitHub-style with `X-Cadence-Signature:
//! sha256=<hex>`. The endpoint answers:
//!
//! - 2xx: delivered; an optional `{"result_ref": "..."}` body is recorded.
//! - 422: intentionally skipped; the body text becomes the reason.
//! - anything else: failed, retried by the engine.

use std::time::Duration;

use async_trait::async_trait;
use cadence_scheduler::{DeliveryHandler, DeliveryOutcome, DeliveryRequest};
use hmac::{Hmac, Mac};
use reqwest::StatusCode;
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, info, warn};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-cadence-signature";

/// Longest response body excerpt kept in an error message.
const MAX_ERROR_BODY: usize = 512;

pub struct WebhookDelivery {
    client: reqwest::Client,
    url: String,
    secret: Option<String>,
}

impl WebhookDelivery {
    pub fn new(url: String, secret: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url, secret })
    }
}

#[async_trait]
impl DeliveryHandler for WebhookDelivery {
    async fn deliver(&self, request: DeliveryRequest) -> DeliveryOutcome {
        let body = match serde_json::to_vec(&request) {
            Ok(b) => b,
            Err(e) => {
                return DeliveryOutcome::Failed {
                    error: format!("encode request: {e}"),
                }
            }
        };

        let mut req = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(secret) = &self.secret {
            match sign(secret, &body) {
                Ok(sig) => req = req.header(SIGNATURE_HEADER, sig),
                Err(e) => {
                    return DeliveryOutcome::Failed {
                        error: format!("sign request: {e}"),
                    }
                }
            }
        }

        debug!(occurrence_id = %request.occurrence_id, url = %self.url, "posting occurrence");
        let resp = match req.body(body).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(occurrence_id = %request.occurrence_id, error = %e, "webhook request failed");
                return DeliveryOutcome::Failed {
                    error: format!("request failed: {e}"),
                };
            }
        };
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        outcome_from_response(status, &text)
    }
}

#[derive(Deserialize)]
struct Receipt {
    result_ref: Option<String>,
}

/// Map an HTTP answer from the delivery endpoint to an outcome.
fn outcome_from_response(status: StatusCode, body: &str) -> DeliveryOutcome {
    if status.is_success() {
        let result_ref = serde_json::from_str::<Receipt>(body)
            .ok()
            .and_then(|r| r.result_ref);
        return DeliveryOutcome::Delivered { result_ref };
    }
    let excerpt = truncate(body.trim(), MAX_ERROR_BODY);
    if status == StatusCode::UNPROCESSABLE_ENTITY {
        let reason = if excerpt.is_empty() {
            "rejected by delivery endpoint".to_string()
        } else {
            excerpt.to_string()
        };
        return DeliveryOutcome::Skipped { reason };
    }
    DeliveryOutcome::Failed {
        error: format!("HTTP {}: {}", status.as_u16(), excerpt),
    }
}

/// `sha256=<hex>` HMAC of `body`.
pub fn sign(secret: &str, body: &[u8]) -> anyhow::Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("HMAC init: {e}"))?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Stand-in used when no webhook URL is configured: logs each occurrence
/// and reports it delivered.
pub struct LogDelivery;

#[async_trait]
impl DeliveryHandler for LogDelivery {
    async fn deliver(&self, request: DeliveryRequest) -> DeliveryOutcome {
        info!(
            schedule_id = %request.schedule_id,
            occurrence_id = %request.occurrence_id,
            seq = request.sequence_number,
            scheduled_at = %request.scheduled_at,
            "occurrence due (no webhook configured)"
        );
        DeliveryOutcome::Delivered { result_ref: None }
    }
}
