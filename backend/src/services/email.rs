use crate::config::SmtpConfig;
use crate::error::{ApiResult, AppError};
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::{authentication::Credentials, PoolConfig},
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::time::Duration;
use tracing::{error, info};

/// SMTP delivery for the send_email action
#[derive(Debug, Clone)]
pub struct EmailService {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_email: String,
    from_name: String,
}

impl EmailService {
    pub fn new(smtp_config: &SmtpConfig) -> ApiResult<Self> {
        let creds = Credentials::new(smtp_config.username.clone(), smtp_config.password.clone());

        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp_config.host)
            .map_err(|e| smtp_error(e.to_string()))?
            .port(smtp_config.port)
            .credentials(creds)
            .pool_config(PoolConfig::new().max_size(10))
            .timeout(Some(Duration::from_secs(10)))
            .build();

        Ok(EmailService {
            transport,
            from_email: smtp_config.from_email.clone(),
            from_name: smtp_config.from_name.clone(),
        })
    }

    /// Send a plain-text message with an HTML alternative built from it.
    pub async fn send_email(&self, to_email: &str, subject: &str, body: &str) -> ApiResult<()> {
        let from = format!("{} <{}>", self.from_name, self.from_email)
            .parse::<Mailbox>()
            .map_err(|e| smtp_error(format!("invalid sender: {}", e)))?;
        let to = to_email
            .parse::<Mailbox>()
            .map_err(|_| crate::error::validation_error("to", "recipient is not a valid address"))?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(body.to_string()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body(body)),
                    ),
            )
            .map_err(|e| smtp_error(e.to_string()))?;

        match self.transport.send(message).await {
            Ok(_) => {
                info!(to = %to_email, "Email sent");
                Ok(())
            }
            Err(e) => {
                error!(to = %to_email, error = %e, "Failed to send email");
                Err(smtp_error(e.to_string()))
            }
        }
    }
}

fn smtp_error(message: String) -> AppError {
    AppError::ExternalServiceError {
        service: "smtp".to_string(),
        message,
    }
}

fn html_body(text: &str) -> String {
    let escaped = text
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;");
    let paragraphs: Vec<String> = escaped
        .split("\n\n")
        .map(|p| format!("<p>{}</p>", p.replace('\n', "<br>")))
        .collect();

    format!(
        r#"<html><body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333;">{}</body></html>"#,
        paragraphs.join("")
    )
}
