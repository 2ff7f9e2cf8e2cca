//! Outbound side effects of rule actions.
//!
//! The rule engine never talks to SMTP or HTTP directly; everything goes
//! through a [`NotificationSink`] so tests can substitute a mock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use super::email::EmailService;
use crate::config::{IntegrationConfig, SmtpConfig};
use crate::error::{ApiResult, AppError};

/// In-app / chat notification produced by send_notification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub recipient: String,
    pub title: String,
    pub message: String,
}

/// Calendar entry produced by create_calendar_event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalendarEvent {
    pub title: String,
    pub starts_at: DateTime<Utc>,
    pub duration_minutes: i64,
    pub attendees: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> ApiResult<()>;

    async fn notify(&self, notification: &Notification) -> ApiResult<()>;

    /// Returns the id the calendar assigned to the event
    async fn schedule_event(&self, event: &CalendarEvent) -> ApiResult<String>;

    async fn http_request(&self, request: &HttpRequest) -> ApiResult<HttpResponse>;

    /// GET the url and report the status code
    async fn check_status(&self, url: &str) -> ApiResult<u16>;

    async fn generate_text(&self, prompt: &str) -> ApiResult<String>;
}

/// Production sink: reqwest for HTTP, lettre for email
pub struct DefaultSink {
    client: reqwest::Client,
    email: Option<EmailService>,
    integrations: IntegrationConfig,
}

impl DefaultSink {
    pub fn new(
        smtp: &SmtpConfig,
        integrations: IntegrationConfig,
        timeout: Duration,
    ) -> ApiResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::InternalError(format!("http client: {}", e)))?;

        let email = if smtp.is_configured() {
            Some(EmailService::new(smtp)?)
        } else {
            warn!("SMTP not configured; send_email actions will fail");
            None
        };
        if integrations.notification_webhook_url.is_none() {
            warn!("Notification webhook not configured; send_notification and create_calendar_event actions will fail");
        }

        Ok(Self {
            client,
            email,
            integrations,
        })
    }

    async fn post_to_notification_hook(&self, kind: &str, body: serde_json::Value) -> ApiResult<()> {
        let Some(url) = self.integrations.notification_webhook_url.as_deref() else {
            return Err(AppError::ExternalServiceError {
                service: "notification_webhook".to_string(),
                message: format!("no notification webhook is configured to deliver {}", kind),
            });
        };

        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({ "kind": kind, "data": body }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::ExternalServiceError {
                service: "notification_webhook".to_string(),
                message: format!("responded with {}", response.status()),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for DefaultSink {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> ApiResult<()> {
        match &self.email {
            Some(service) => service.send_email(to, subject, body).await,
            None => Err(AppError::ExternalServiceError {
                service: "smtp".to_string(),
                message: "SMTP is not configured".to_string(),
            }),
        }
    }

    async fn notify(&self, notification: &Notification) -> ApiResult<()> {
        self.post_to_notification_hook("notification", serde_json::to_value(notification).unwrap_or_default())
            .await
    }

    async fn schedule_event(&self, event: &CalendarEvent) -> ApiResult<String> {
        let event_id = Uuid::new_v4().to_string();
        let mut body = serde_json::to_value(event).unwrap_or_default();
        body["event_id"] = serde_json::json!(event_id);

        self.post_to_notification_hook("calendar_event", body).await?;
        info!(event_id = %event_id, "Calendar event delivered");
        Ok(event_id)
    }

    async fn http_request(&self, request: &HttpRequest) -> ApiResult<HttpResponse> {
        let method = reqwest::Method::from_bytes(request.method.to_uppercase().as_bytes())
            .map_err(|_| crate::error::validation_error("method", "unsupported HTTP method"))?;

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        let body = serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text));

        Ok(HttpResponse { status, body })
    }

    async fn check_status(&self, url: &str) -> ApiResult<u16> {
        let response = self.client.get(url).send().await?;
        Ok(response.status().as_u16())
    }

    async fn generate_text(&self, prompt: &str) -> ApiResult<String> {
        let Some(url) = self.integrations.ai_endpoint_url.as_deref() else {
            return Err(AppError::ExternalServiceError {
                service: "ai".to_string(),
                message: "no text generation provider is configured".to_string(),
            });
        };

        let mut builder = self.client.post(url).json(&serde_json::json!({ "prompt": prompt }));
        if let Some(key) = &self.integrations.ai_api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        if !response.status().is_success() {
            return Err(AppError::ExternalServiceError {
                service: "ai".to_string(),
                message: format!("responded with {}", response.status()),
            });
        }

        let body: serde_json::Value = response.json().await?;
        body.get("text")
            .and_then(|t| t.as_str())
            .map(str::to_string)
            .ok_or_else(|| AppError::ExternalServiceError {
                service: "ai".to_string(),
                message: "response has no 'text' field".to_string(),
            })
    }
}
