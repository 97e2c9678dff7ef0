//! Idempotency markers guarding against double-processing the same
//! inbound message (e.g. a retried webhook delivery).
//!
//! Keys: `email_queued:<message_id>` (TTL 1h) and
//! `email_processed:<message_id>` (TTL 24h). KV errors fail open (treated as
//! "not yet seen") since an idempotency-store outage must not block mail
//! delivery.

use crate::client::KvClient;
use asupersync::Cx;
use handlemail_core::config::{IDEMPOTENCY_PROCESSED_TTL_SECS, IDEMPOTENCY_QUEUED_TTL_SECS};

fn queued_key(message_id: &str) -> String {
    format!("email_queued:{message_id}")
}

fn processed_key(message_id: &str) -> String {
    format!("email_processed:{message_id}")
}

pub struct IdempotencyStore {
    client: KvClient,
}

impl IdempotencyStore {
    #[must_use]
    pub const fn new(client: KvClient) -> Self {
        Self { client }
    }

    async fn try_mark(&self, cx: &Cx, key: &str, ttl_secs: u64) -> bool {
        match self.client.set_nx(cx, key).await {
            Ok(created) => {
                if created
                    && let Err(e) = self.client.expire(cx, key, ttl_secs).await
                {
                    tracing::warn!(error = %e, key, "idempotency EXPIRE failed; marker may persist longer than intended");
                }
                created
            }
            Err(e) => {
                tracing::warn!(error = %e, key, "idempotency KV error; failing open (treating as not yet seen)");
                true
            }
        }
    }

    /// Returns `true` if this message was not already queued (caller should
    /// proceed to enqueue it), `false` if it was already queued.
    pub async fn try_mark_queued(&self, cx: &Cx, message_id: &str) -> bool {
        self.try_mark(cx, &queued_key(message_id), IDEMPOTENCY_QUEUED_TTL_SECS).await
    }

    /// Returns `true` if this message was not already marked processed
    /// (caller should proceed to process it), `false` otherwise.
    pub async fn try_mark_processed(&self, cx: &Cx, message_id: &str) -> bool {
        self.try_mark(cx, &processed_key(message_id), IDEMPOTENCY_PROCESSED_TTL_SECS).await
    }

    pub async fn is_queued(&self, cx: &Cx, message_id: &str) -> bool {
        self.client.exists(cx, &queued_key(message_id)).await.unwrap_or(false)
    }

    pub async fn is_processed(&self, cx: &Cx, message_id: &str) -> bool {
        self.client.exists(cx, &processed_key(message_id)).await.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_formats_match_spec() {
        assert_eq!(queued_key("abc@1"), "email_queued:abc@1");
        assert_eq!(processed_key("abc@1"), "email_processed:abc@1");
    }
}
