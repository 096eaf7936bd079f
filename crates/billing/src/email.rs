//! Email notifications for billing events
//!
//! Sends transactional emails via Resend API for billing-related events.

use crate::error::BillingResult;

/// Email configuration
#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// Resend API key
    pub resend_api_key: String,
    /// From address for emails
    pub email_from: String,
    /// App name for branding
    pub app_name: String,
    /// Support email
    pub support_email: String,
    /// Dashboard URL
    pub dashboard_url: String,
}

impl EmailConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self {
            resend_api_key: std::env::var("RESEND_API_KEY").unwrap_or_default(),
            email_from: std::env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "Plume <noreply@plume.app>".to_string()),
            app_name: std::env::var("APP_NAME").unwrap_or_else(|_| "Plume".to_string()),
            support_email: std::env::var("SUPPORT_EMAIL")
                .unwrap_or_else(|_| "support@plume.app".to_string()),
            dashboard_url: std::env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
        }
    }

    /// Check if email sending is enabled
    pub fn is_enabled(&self) -> bool {
        !self.resend_api_key.is_empty()
    }
}

/// Billing email notification service
#[derive(Clone)]
pub struct BillingEmailService {
    config: EmailConfig,
    client: reqwest::Client,
}

impl BillingEmailService {
    /// Create a new email service
    pub fn new(config: EmailConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Self {
        Self::new(EmailConfig::from_env())
    }

    /// Send an email via Resend API
    ///
    /// Returns `Ok(true)` if the email was sent successfully,
    /// `Ok(false)` if sending failed (non-fatal - doesn't propagate error),
    /// `Err` only for critical configuration issues.
    ///
    /// The `Ok(false)` return allows callers to track email delivery status
    /// while not failing webhook processing due to email errors.
    async fn send_email(&self, to: &str, subject: &str, html: &str) -> BillingResult<bool> {
        if !self.config.is_enabled() {
            tracing::warn!(
                to = %to,
                subject = %subject,
                "Email not configured, skipping"
            );
            return Ok(false);
        }

        #[allow(clippy::disallowed_methods)]
        // json! macro uses unwrap internally, safe for primitive types
        let body = serde_json::json!({
            "from": self.config.email_from,
            "to": [to],
            "subject": subject,
            "html": html
        });

        let response = self
            .client
            .post("https://api.resend.com/emails")
            .header(
                "Authorization",
                format!("Bearer {}", self.config.resend_api_key),
            )
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(to = %to, subject = %subject, "Billing email sent");
                Ok(true)
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                tracing::error!(
                    to = %to,
                    subject = %subject,
                    status = %status,
                    body = %body,
                    "Failed to send billing email - non-fatal"
                );
                Ok(false) // Don't fail webhooks due to email errors
            }
            Err(e) => {
                tracing::error!(
                    to = %to,
                    subject = %subject,
                    error = %e,
                    "Failed to send billing email - non-fatal"
                );
                Ok(false) // Don't fail webhooks due to email errors
            }
        }
    }

    /// Send subscription welcome email (after first successful checkout)
    pub async fn send_subscription_welcome(
        &self,
        to: &str,
        plan_name: &str,
    ) -> BillingResult<bool> {
        let billing_link = format!("{}/account/billing", self.config.dashboard_url);

        let html = format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h2 style="color: #16a34a;">Welcome to {plan_name}!</h2>
    <p>Hi there,</p>
    <p>Your subscription to the <strong>{plan_name}</strong> plan is now active. Thanks for supporting {app_name}!</p>
    <p>You can review your plan, invoices, and payment method anytime from your billing page.</p>
    <p>
        <a href="{billing_link}" style="display: inline-block; padding: 12px 24px; background-color: #6366f1; color: white; text-decoration: none; border-radius: 6px; font-weight: bold;">
            Manage Billing
        </a>
    </p>
    <p style="color: #666; font-size: 14px;">
        If you have any questions, please contact us at <a href="mailto:{support_email}">{support_email}</a>
    </p>
    <hr style="border: none; border-top: 1px solid #eee; margin: 20px 0;">
    <p style="color: #999; font-size: 12px;">{app_name}</p>
</body>
</html>"#,
            plan_name = plan_name,
            billing_link = billing_link,
            support_email = self.config.support_email,
            app_name = self.config.app_name,
        );

        self.send_email(
            to,
            &format!("Your {} subscription is active", self.config.app_name),
            &html,
        )
        .await
    }

    /// Send payment receipt for a paid invoice
    pub async fn send_payment_succeeded(
        &self,
        to: &str,
        amount_cents: i64,
        invoice_url: Option<&str>,
    ) -> BillingResult<bool> {
        let amount = format!("${:.2}", amount_cents as f64 / 100.0);
        let invoice_section = invoice_url
            .map(|url| {
                format!(
                    r#"<p><a href="{}" style="color: #6366f1;">View Invoice</a></p>"#,
                    url
                )
            })
            .unwrap_or_default();

        let html = format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h2 style="color: #16a34a;">Payment Received</h2>
    <p>Hi there,</p>
    <p>We've received your payment of <strong>{amount}</strong>. Thank you!</p>
    {invoice_section}
    <p style="color: #666; font-size: 14px;">
        If you have any questions, please contact us at <a href="mailto:{support_email}">{support_email}</a>
    </p>
    <hr style="border: none; border-top: 1px solid #eee; margin: 20px 0;">
    <p style="color: #999; font-size: 12px;">{app_name}</p>
</body>
</html>"#,
            amount = amount,
            invoice_section = invoice_section,
            support_email = self.config.support_email,
            app_name = self.config.app_name,
        );

        self.send_email(
            to,
            &format!("Payment Received - {}", self.config.app_name),
            &html,
        )
        .await
    }

    /// Send payment failed notification (with optional invoice URL)
    pub async fn send_payment_failed(
        &self,
        to: &str,
        amount_cents: i64,
        invoice_url: Option<&str>,
    ) -> BillingResult<bool> {
        let amount = format!("${:.2}", amount_cents as f64 / 100.0);
        let update_link = format!("{}/account/billing", self.config.dashboard_url);
        let invoice_section = invoice_url
            .map(|url| {
                format!(
                    r#"<p><a href="{}" style="color: #6366f1;">View Invoice</a></p>"#,
                    url
                )
            })
            .unwrap_or_default();

        let html = format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h2 style="color: #dc2626;">Payment Failed</h2>
    <p>Hi there,</p>
    <p>We weren't able to process your payment of <strong>{amount}</strong>.</p>
    <p>Please update your payment method to avoid any interruption to your service.</p>
    <p>
        <a href="{update_link}" style="display: inline-block; padding: 12px 24px; background-color: #6366f1; color: white; text-decoration: none; border-radius: 6px; font-weight: bold;">
            Update Payment Method
        </a>
    </p>
    {invoice_section}
    <p style="color: #666; font-size: 14px;">
        If you have any questions, please contact us at <a href="mailto:{support_email}">{support_email}</a>
    </p>
    <hr style="border: none; border-top: 1px solid #eee; margin: 20px 0;">
    <p style="color: #999; font-size: 12px;">{app_name}</p>
</body>
</html>"#,
            amount = amount,
            update_link = update_link,
            invoice_section = invoice_section,
            support_email = self.config.support_email,
            app_name = self.config.app_name,
        );

        self.send_email(
            to,
            &format!("Payment Failed - {}", self.config.app_name),
            &html,
        )
        .await
    }

    /// Send trial ending reminder (a few days before expiry)
    pub async fn send_trial_ending(&self, to: &str, days_left: u32) -> BillingResult<bool> {
        let plans_link = format!("{}/pricing", self.config.dashboard_url);
        let days_phrase = if days_left == 1 {
            "1 day".to_string()
        } else {
            format!("{} days", days_left)
        };

        let html = format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h2 style="color: #d97706;">Your trial ends in {days_phrase}</h2>
    <p>Hi there,</p>
    <p>Your free trial of {app_name} ends in <strong>{days_phrase}</strong>. Pick a plan now to keep publishing without interruption.</p>
    <p>
        <a href="{plans_link}" style="display: inline-block; padding: 12px 24px; background-color: #6366f1; color: white; text-decoration: none; border-radius: 6px; font-weight: bold;">
            Choose a Plan
        </a>
    </p>
    <p style="color: #666; font-size: 14px;">
        If you have any questions, please contact us at <a href="mailto:{support_email}">{support_email}</a>
    </p>
    <hr style="border: none; border-top: 1px solid #eee; margin: 20px 0;">
    <p style="color: #999; font-size: 12px;">{app_name}</p>
</body>
</html>"#,
            days_phrase = days_phrase,
            plans_link = plans_link,
            support_email = self.config.support_email,
            app_name = self.config.app_name,
        );

        self.send_email(
            to,
            &format!("Your {} trial ends soon", self.config.app_name),
            &html,
        )
        .await
    }

    /// Send last-day trial warning (trial ends today)
    pub async fn send_trial_last_day(&self, to: &str) -> BillingResult<bool> {
        let plans_link = format!("{}/pricing", self.config.dashboard_url);

        let html = format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h2 style="color: #dc2626;">Your trial ends today</h2>
    <p>Hi there,</p>
    <p>Today is the last day of your {app_name} trial. Subscribe now to keep access to all your content and settings.</p>
    <p>
        <a href="{plans_link}" style="display: inline-block; padding: 12px 24px; background-color: #6366f1; color: white; text-decoration: none; border-radius: 6px; font-weight: bold;">
            Choose a Plan
        </a>
    </p>
    <p style="color: #666; font-size: 14px;">
        If you have any questions, please contact us at <a href="mailto:{support_email}">{support_email}</a>
    </p>
    <hr style="border: none; border-top: 1px solid #eee; margin: 20px 0;">
    <p style="color: #999; font-size: 12px;">{app_name}</p>
</body>
</html>"#,
            plans_link = plans_link,
            support_email = self.config.support_email,
            app_name = self.config.app_name,
        );

        self.send_email(
            to,
            &format!("Last day of your {} trial", self.config.app_name),
            &html,
        )
        .await
    }

    /// Send trial-ended notification
    pub async fn send_trial_ended(&self, to: &str) -> BillingResult<bool> {
        let plans_link = format!("{}/pricing", self.config.dashboard_url);

        let html = format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h2 style="color: #dc2626;">Your trial has ended</h2>
    <p>Hi there,</p>
    <p>Your free trial of {app_name} has ended. Your content is safe, but publishing is paused until you choose a plan.</p>
    <p>
        <a href="{plans_link}" style="display: inline-block; padding: 12px 24px; background-color: #6366f1; color: white; text-decoration: none; border-radius: 6px; font-weight: bold;">
            Choose a Plan
        </a>
    </p>
    <p style="color: #666; font-size: 14px;">
        If you have any questions, please contact us at <a href="mailto:{support_email}">{support_email}</a>
    </p>
    <hr style="border: none; border-top: 1px solid #eee; margin: 20px 0;">
    <p style="color: #999; font-size: 12px;">{app_name}</p>
</body>
</html>"#,
            plans_link = plans_link,
            support_email = self.config.support_email,
            app_name = self.config.app_name,
        );

        self.send_email(
            to,
            &format!("Your {} trial has ended", self.config.app_name),
            &html,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_disabled_without_key() {
        let config = EmailConfig {
            resend_api_key: String::new(),
            email_from: "Plume <noreply@plume.app>".to_string(),
            app_name: "Plume".to_string(),
            support_email: "support@plume.app".to_string(),
            dashboard_url: "http://localhost:3000".to_string(),
        };
        assert!(!config.is_enabled());
    }

    #[tokio::test]
    async fn test_send_without_key_is_noop() {
        let service = BillingEmailService::new(EmailConfig {
            resend_api_key: String::new(),
            email_from: "Plume <noreply@plume.app>".to_string(),
            app_name: "Plume".to_string(),
            support_email: "support@plume.app".to_string(),
            dashboard_url: "http://localhost:3000".to_string(),
        });

        let sent = service
            .send_trial_ending("user@example.com", 3)
            .await
            .unwrap();
        assert!(!sent);
    }
}
