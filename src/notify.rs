//! OTP delivery: message rendering and the gateway seam.
//!
//! Delivery is fire-and-forget from the core's perspective. The code is
//! already persisted and verifiable before the gateway is called, so a slow
//! or failing provider never blocks the "sent" response; the session layer
//! logs the error and moves on.

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

const OTP_EXPIRES_IN_MINUTES: i64 = 10;

/// A rendered OTP message, ready for an email/SMS provider.
#[derive(Clone, Debug)]
pub struct OtpEmail {
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Render the verification-code message, personalized with the shop name
/// when one is available.
#[must_use]
pub fn render_otp_email(code: &str, shop_name: Option<&str>) -> OtpEmail {
    let title = shop_name.map_or_else(
        || "Your Login Code".to_string(),
        |name| format!("{name} Login Code"),
    );
    let subject = format!("Your verification code is {code}");
    let html = format!(
        r#"<div style="font-family: Arial, sans-serif; line-height: 1.5;">
  <h2>{title}</h2>
  <p>Use the code below to complete your login. It expires in {OTP_EXPIRES_IN_MINUTES} minutes.</p>
  <div style="font-size: 24px; font-weight: bold; letter-spacing: 4px; margin: 16px 0;">{code}</div>
  <p>If you didn't request this, you can safely ignore this email.</p>
</div>"#
    );
    let text = format!(
        "Your verification code is {code}. It expires in {OTP_EXPIRES_IN_MINUTES} minutes."
    );
    OtpEmail {
        subject,
        html,
        text,
    }
}

/// Outbound delivery abstraction.
///
/// Implementations receive the raw code and render with [`render_otp_email`]
/// (or their own template) before handing off to a provider.
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    /// Deliver a code, or return an error for the caller to log.
    async fn send_otp(&self, to: &str, code: &str, shop_name: Option<&str>) -> Result<()>;
}

/// Development gateway: logs the rendered message instead of sending it.
/// This is the only place the code itself is ever visible outside delivery.
#[derive(Clone, Debug)]
pub struct LogGateway;

#[async_trait]
impl NotificationGateway for LogGateway {
    async fn send_otp(&self, to: &str, code: &str, shop_name: Option<&str>) -> Result<()> {
        let message = render_otp_email(code, shop_name);
        info!(to_email = %to, subject = %message.subject, code = %code, "otp delivery stub");
        Ok(())
    }
}
