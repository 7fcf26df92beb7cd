//! SendGrid v3 mail client.
//!
//! Uses reqwest with Bearer token auth against
//! `https://api.sendgrid.com/v3/mail/send`. One request per message, no retries.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::ReminderError;
use crate::notification::{MailSender, OutgoingMessage};

const SENDGRID_API_URL: &str = "https://api.sendgrid.com/v3/mail/send";

pub struct SendGridClient {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl SendGridClient {
    pub fn new(api_key: &str) -> Self {
        Self::with_endpoint(api_key, SENDGRID_API_URL)
    }

    pub fn with_endpoint(api_key: &str, endpoint: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.to_string(),
            endpoint: endpoint.to_string(),
        }
    }
}

/// Build the `mail/send` request body.
///
/// SendGrid rejects an empty `cc` array and any cc address that repeats the
/// `to` address, so both are dropped here.
pub fn mail_send_payload(message: &OutgoingMessage) -> Value {
    let cc: Vec<Value> = message
        .cc
        .iter()
        .map(|addr| addr.trim())
        .filter(|addr| !addr.is_empty() && !addr.eq_ignore_ascii_case(message.to.trim()))
        .map(|addr| json!({ "email": addr }))
        .collect();

    let mut personalization = json!({ "to": [{ "email": message.to }] });
    if !cc.is_empty() {
        personalization["cc"] = Value::Array(cc);
    }

    json!({
        "personalizations": [personalization],
        "from": { "email": message.from },
        "subject": message.subject,
        "content": [{ "type": "text/plain", "value": message.body }],
    })
}

#[async_trait]
impl MailSender for SendGridClient {
    async fn send(&self, message: &OutgoingMessage) -> Result<(), ReminderError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&mail_send_payload(message))
            .send()
            .await
            .map_err(|e| ReminderError::NetworkError(format!("SendGrid request failed: {}", e)))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ReminderError::RateLimited);
        }

        let text = resp.text().await.unwrap_or_default();
        Err(ReminderError::DeliveryError(format!(
            "SendGrid API error {}: {}",
            status, text
        )))
    }
}

/// Stand-in used when no API key is configured: every send fails, so the
/// pass still records which recipients would have been mailed.
pub struct UnconfiguredSender;

#[async_trait]
impl MailSender for UnconfiguredSender {
    async fn send(&self, _message: &OutgoingMessage) -> Result<(), ReminderError> {
        Err(ReminderError::ConfigurationError(
            "SendGrid API key is not configured".to_string(),
        ))
    }
}
