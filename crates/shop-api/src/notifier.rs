//! # Download Link Notifiers
//!
//! `SmtpNotifier` mails the customer through an SMTP relay (Lettre).
//! `LoggingNotifier` stands in when no relay is configured and just logs
//! the delivery.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use shop_core::{redact, DownloadDelivery, Notifier, ShopError, ShopResult};
use tracing::{info, instrument};

/// Subject line of the delivery email
pub const DELIVERY_SUBJECT: &str = "Your RecipeRush E-Book is Ready! 📚";

/// SMTP relay settings
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_email: String,
    pub from_name: String,
}

/// Sends download links by email.
#[derive(Clone)]
pub struct SmtpNotifier {
    config: SmtpConfig,
    from: Mailbox,
    credentials: Credentials,
}

impl SmtpNotifier {
    pub fn new(config: SmtpConfig) -> ShopResult<Self> {
        let from = format!("{} <{}>", config.from_name, config.from_email)
            .parse::<Mailbox>()
            .map_err(|e| ShopError::Configuration(format!("Invalid EMAIL_FROM: {}", e)))?;
        let credentials = Credentials::new(config.username.clone(), config.password.clone());

        Ok(Self {
            config,
            from,
            credentials,
        })
    }

    /// A fresh transport per message; deliveries are rare.
    fn build_transport(&self) -> ShopResult<SmtpTransport> {
        Ok(SmtpTransport::starttls_relay(&self.config.host)
            .map_err(|e| ShopError::NotifierError(format!("SMTP relay error: {}", e)))?
            .port(self.config.port)
            .credentials(self.credentials.clone())
            .build())
    }

    fn build_message(&self, delivery: &DownloadDelivery) -> ShopResult<Message> {
        let to = delivery
            .customer_email
            .parse::<Mailbox>()
            .map_err(|e| ShopError::NotifierError(format!("Invalid to address: {}", e)))?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(DELIVERY_SUBJECT)
            .header(ContentType::TEXT_HTML)
            .body(delivery_html(delivery))
            .map_err(|e| ShopError::NotifierError(format!("Failed to build email: {}", e)))
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    #[instrument(skip(self, delivery), fields(order_id = %delivery.order_id))]
    async fn send_download_link(&self, delivery: &DownloadDelivery) -> ShopResult<()> {
        let email = self.build_message(delivery)?;
        let mailer = self.build_transport()?;

        tokio::task::spawn_blocking(move || {
            mailer
                .send(&email)
                .map_err(|e| ShopError::NotifierError(format!("Failed to send email: {}", e)))
        })
        .await
        .map_err(|e| ShopError::NotifierError(format!("Email task failed: {}", e)))??;

        info!(to = %delivery.customer_email, "Download email sent");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "smtp"
    }
}

/// Logs deliveries instead of sending them (development).
#[derive(Debug, Clone, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn send_download_link(&self, delivery: &DownloadDelivery) -> ShopResult<()> {
        let token = delivery
            .download_url
            .rsplit('/')
            .next()
            .unwrap_or_default();
        info!(
            order_id = %delivery.order_id,
            to = %delivery.customer_email,
            token = %redact(token),
            "Email delivery not configured, download link not sent"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// HTML body of the delivery email
pub fn delivery_html(delivery: &DownloadDelivery) -> String {
    let name = escape_html(&delivery.customer_name);
    let url = escape_html(&delivery.download_url);
    let order_id = escape_html(&delivery.order_id);
    let days = delivery.expires_in_days;
    let uses = delivery.max_downloads;

    format!(
        r#"
<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
    <div style="background: linear-gradient(135deg, #667eea 0%, #764ba2 100%); color: white; padding: 2rem; text-align: center; border-radius: 10px 10px 0 0;">
        <h1 style="margin: 0; font-size: 2rem;">🎉 Thank You for Your Purchase!</h1>
        <p style="margin: 1rem 0 0 0; font-size: 1.1rem;">Your Complete Recipe Collection is ready for download</p>
    </div>
    <div style="padding: 2rem; background: #f8f9fa; border-radius: 0 0 10px 10px;">
        <h2 style="color: #2c3e50;">Hello {name}!</h2>
        <p style="color: #555; line-height: 1.6;">
            Thank you for purchasing <strong>The Complete Recipe Collection</strong> from RecipeRush!
            Your e-book is now ready for download.
        </p>
        <div style="text-align: center; margin: 2rem 0;">
            <a href="{url}" style="background: linear-gradient(135deg, #667eea 0%, #764ba2 100%); color: white; padding: 1rem 2rem; text-decoration: none; border-radius: 8px; font-weight: 600; display: inline-block;">
                📥 Download Your E-Book
            </a>
        </div>
        <div style="background: #fff3cd; border: 1px solid #ffeaa7; padding: 1rem; border-radius: 6px;">
            <p style="margin: 0; color: #856404; font-size: 0.9rem;">
                <strong>Important:</strong> This download link expires in {days} days and can be used up to {uses} times.
                Please save your e-book to your device for future access.
            </p>
        </div>
        <p style="color: #999; font-size: 0.8rem; margin-top: 2rem;">Order: {order_id}</p>
    </div>
</div>
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delivery() -> DownloadDelivery {
        DownloadDelivery {
            customer_email: "cook@example.com".to_string(),
            customer_name: "Ada <Cook>".to_string(),
            download_url: "https://shop.example/download/abcdef0123456789".to_string(),
            order_id: "ord_1".to_string(),
            max_downloads: 5,
            expires_in_days: 7,
        }
    }

    fn smtp_config() -> SmtpConfig {
        SmtpConfig {
            host: "smtp.example.com".to_string(),
            port: 587,
            username: "user".to_string(),
            password: "pass".to_string(),
            from_email: "orders@example.com".to_string(),
            from_name: "RecipeRush".to_string(),
        }
    }

    #[test]
    fn test_html_contains_link_and_policy() {
        let html = delivery_html(&delivery());

        assert!(html.contains("https://shop.example/download/abcdef0123456789"));
        assert!(html.contains("expires in 7 days"));
        assert!(html.contains("up to 5 times"));
        assert!(html.contains("Ada &lt;Cook&gt;"));
    }

    #[test]
    fn test_message_builds() {
        let notifier = SmtpNotifier::new(smtp_config()).unwrap();
        assert!(notifier.build_message(&delivery()).is_ok());
    }

    #[test]
    fn test_invalid_recipient_rejected() {
        let notifier = SmtpNotifier::new(smtp_config()).unwrap();
        let mut bad = delivery();
        bad.customer_email = "not an address".to_string();

        assert!(matches!(
            notifier.build_message(&bad),
            Err(ShopError::NotifierError(_))
        ));
    }

    #[test]
    fn test_invalid_sender_rejected() {
        let mut config = smtp_config();
        config.from_email = "nope".to_string();

        assert!(SmtpNotifier::new(config).is_err());
    }

    #[tokio::test]
    async fn test_logging_notifier_succeeds() {
        assert!(LoggingNotifier.send_download_link(&delivery()).await.is_ok());
    }
}
