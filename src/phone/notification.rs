//! The outbound notification sink trait. The production WhatsApp
//! HSM client is out of scope — this is the interface the state
//! machine depends on plus a thin HTTP default adapter.

use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Mutex;

/// Sends a verification code to a phone number.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver `code` to `phone`. Any failure is a hard error — the caller
    /// must not stage the pending phone if this fails.
    async fn send_code(&self, phone: &str, code: &str) -> CoreResult<()>;
}

/// HTTP-based default adapter, posting `{phone, code}` to a configured
/// endpoint. The real outbound transport (a specific HSM vendor's API) is
/// an external collaborator's concern; this is enough to exercise the
/// state machine end-to-end.
pub struct HttpNotificationSink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpNotificationSink {
    /// Post notifications to `endpoint`.
    pub fn new(endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl NotificationSink for HttpNotificationSink {
    async fn send_code(&self, phone: &str, code: &str) -> CoreResult<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({"phone": phone, "code": code}))
            .send()
            .await
            .map_err(|err| CoreError::Transient(err.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(CoreError::Transient(format!(
                "notification sink returned {}",
                response.status()
            )))
        }
    }
}

/// An in-memory sink recording sent codes, for tests.
#[derive(Default)]
pub struct MemoryNotificationSink {
    sent: Mutex<Vec<(String, String)>>,
}

impl MemoryNotificationSink {
    /// The most recent code sent to `phone`, if any.
    pub fn last_code(&self, phone: &str) -> Option<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(p, _)| p == phone)
            .map(|(_, code)| code.clone())
    }
}

#[async_trait]
impl NotificationSink for MemoryNotificationSink {
    async fn send_code(&self, phone: &str, code: &str) -> CoreResult<()> {
        self.sent.lock().unwrap().push((phone.to_string(), code.to_string()));
        Ok(())
    }
}
