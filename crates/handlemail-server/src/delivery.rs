//! `EmailDeliverer`: hands a finished reply (or rejection) to the outbound
//! transport. SMTP/SES wire mechanics are explicitly out of scope — this
//! models delivery as one capability with an HTTP-relay-backed
//! implementation, the same shape `handlemail_tools::capability` uses for
//! search/fetch/scheduler capabilities, and the same shared-`HttpClient`
//! pattern `handlemail-agent`'s `RoutedModelClient` dispatches LLM calls
//! through.

use std::time::Duration;

use asupersync::Cx;
use asupersync::http::h1::{HttpClient, Method};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use handlemail_core::config::TIMEOUT_DELIVERY_SECS;
use handlemail_core::{Error, Result};
use handlemail_tools::BoxFuture;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct OutgoingAttachment {
    pub filename: String,
    pub content_type: String,
    pub bytes_base64: String,
}

impl OutgoingAttachment {
    #[must_use]
    pub fn new(filename: impl Into<String>, content_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self { filename: filename.into(), content_type: content_type.into(), bytes_base64: BASE64.encode(bytes) }
    }
}

/// A fully-formed outbound message: either the agent's reply or a
/// validators-pipeline rejection notice.
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingReply {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    pub text: String,
    pub html: String,
    #[serde(default)]
    pub attachments: Vec<OutgoingAttachment>,
}

pub trait EmailDeliverer: Send + Sync {
    fn send<'a>(&'a self, cx: &'a Cx, reply: &'a OutgoingReply) -> BoxFuture<'a, Result<()>>;
}

/// Dry-run deliverer: logs instead of sending. Used for addresses in
/// `Config::skip_email_delivery` and in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingDeliverer;

impl EmailDeliverer for LoggingDeliverer {
    fn send<'a>(&'a self, _cx: &'a Cx, reply: &'a OutgoingReply) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            tracing::info!(to = %reply.to, subject = %reply.subject, attachments = reply.attachments.len(), "delivery skipped (dry-run)");
            Ok(())
        })
    }
}

/// Posts the reply as JSON to a configured outbound relay (an SMTP/SES
/// bridge deployed alongside this service). Kept deliberately thin: the
/// relay owns provider-specific mechanics.
pub struct WebhookDeliverer {
    client: HttpClient,
    endpoint: String,
    api_key: Option<String>,
}

impl WebhookDeliverer {
    #[must_use]
    pub fn new(endpoint: String, api_key: Option<String>) -> Self {
        Self { client: HttpClient::new(), endpoint, api_key }
    }
}

impl EmailDeliverer for WebhookDeliverer {
    fn send<'a>(&'a self, _cx: &'a Cx, reply: &'a OutgoingReply) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let body = serde_json::to_vec(reply)?;
            let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
            if let Some(key) = &self.api_key {
                headers.push(("x-api-key".to_string(), key.clone()));
            }

            let request = Box::pin(self.client.request(Method::Post, &self.endpoint, headers, body));
            let response = match asupersync::time::timeout(
                asupersync::time::wall_now(),
                Duration::from_secs(TIMEOUT_DELIVERY_SECS),
                request,
            )
            .await
            {
                Ok(Ok(resp)) => resp,
                Ok(Err(e)) => {
                    return Err(Error::DeliveryError(format!("transport failure posting to {}: {e}", self.endpoint)));
                }
                Err(_) => {
                    return Err(Error::DeliveryError(format!("delivery webhook timed out after {TIMEOUT_DELIVERY_SECS}s")));
                }
            };

            if response.status >= 300 {
                return Err(Error::DeliveryError(format!(
                    "delivery webhook {} returned status {}: {}",
                    self.endpoint,
                    response.status,
                    String::from_utf8_lossy(&response.body)
                )));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_reply() -> OutgoingReply {
        OutgoingReply {
            to: "sender@example.com".to_string(),
            from: "ask@handlemail.example".to_string(),
            subject: "Re: hello".to_string(),
            in_reply_to: Some("abc@1".to_string()),
            references: vec!["abc@1".to_string()],
            text: "hi".to_string(),
            html: "<p>hi</p>".to_string(),
            attachments: Vec::new(),
        }
    }

    #[test]
    fn outgoing_attachment_encodes_base64() {
        let att = OutgoingAttachment::new("a.txt", "text/plain", b"hello");
        assert_eq!(att.bytes_base64, BASE64.encode(b"hello"));
    }

    #[test]
    fn logging_deliverer_never_fails_to_construct_reply() {
        let reply = sample_reply();
        assert_eq!(reply.to, "sender@example.com");
    }
}
