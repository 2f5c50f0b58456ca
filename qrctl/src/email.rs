//! Transactional email: payment receipts, dunning notices and organization invitations.

use lettre::{
    AsyncFileTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use std::path::Path;

use crate::{
    config::{Config, EmailTransportConfig},
    errors::Error,
};

/// Receipt details for a paid invoice
#[derive(Debug, Clone)]
pub struct ReceiptDetails {
    pub invoice_id: String,
    /// Major currency units, e.g. rupees
    pub amount: f64,
    pub currency: String,
    pub plan: Option<String>,
}

/// Details of a failed charge
#[derive(Debug, Clone)]
pub struct DunningDetails {
    pub payment_id: String,
    pub amount: f64,
    pub currency: String,
    pub due_date: String,
}

pub struct EmailService {
    transport: EmailTransport,
    from_email: String,
    from_name: String,
    base_url: String,
}

enum EmailTransport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    File(AsyncFileTransport<Tokio1Executor>),
}

impl EmailService {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let email_config = &config.email;

        let transport = match &email_config.transport {
            EmailTransportConfig::Smtp {
                host,
                port,
                username,
                password,
                use_tls,
            } => {
                if !use_tls {
                    tracing::warn!("SMTP TLS is disabled - this is not recommended for production");
                }

                let smtp_builder = if *use_tls {
                    AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                } else {
                    Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host))
                }
                .map_err(|e| Error::Internal {
                    operation: format!("create SMTP transport: {e}"),
                })?
                .port(*port)
                .credentials(Credentials::new(username.clone(), password.clone()));

                EmailTransport::Smtp(smtp_builder.build())
            }
            EmailTransportConfig::File { path } => {
                let emails_dir = Path::new(path);
                if !emails_dir.exists() {
                    std::fs::create_dir_all(emails_dir).map_err(|e| Error::Internal {
                        operation: format!("create emails directory: {e}"),
                    })?;
                }
                EmailTransport::File(AsyncFileTransport::<Tokio1Executor>::new(emails_dir))
            }
        };

        Ok(Self {
            transport,
            from_email: email_config.from_email.clone(),
            from_name: email_config.from_name.clone(),
            base_url: config.public_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn send_receipt_email(&self, to_email: &str, to_name: Option<&str>, receipt: &ReceiptDetails) -> Result<(), Error> {
        let subject = format!("Payment receipt {}", receipt.invoice_id);
        let body = self.receipt_body(to_name, receipt);
        self.send_email(to_email, to_name, &subject, &body).await
    }

    pub async fn send_dunning_email(&self, to_email: &str, to_name: Option<&str>, dunning: &DunningDetails) -> Result<(), Error> {
        let body = self.dunning_body(to_name, dunning);
        self.send_email(to_email, to_name, "Action required: payment failed", &body).await
    }

    pub async fn send_invitation_email(&self, to_email: &str, organization_name: &str, invite_link: &str) -> Result<(), Error> {
        let subject = format!("You've been invited to join {organization_name}");
        let body = self.invitation_body(organization_name, invite_link);
        self.send_email(to_email, None, &subject, &body).await
    }

    async fn send_email(&self, to_email: &str, to_name: Option<&str>, subject: &str, body: &str) -> Result<(), Error> {
        let from = format!("{} <{}>", self.from_name, self.from_email)
            .parse::<Mailbox>()
            .map_err(|e| Error::Internal {
                operation: format!("parse from email: {e}"),
            })?;

        let to = if let Some(name) = to_name {
            format!("{name} <{to_email}>")
        } else {
            to_email.to_string()
        }
        .parse::<Mailbox>()
        .map_err(|e| Error::Internal {
            operation: format!("parse to email: {e}"),
        })?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(body.to_string())
            .map_err(|e| Error::Internal {
                operation: format!("build email message: {e}"),
            })?;

        match &self.transport {
            EmailTransport::Smtp(smtp) => {
                smtp.send(message).await.map_err(|e| Error::Internal {
                    operation: format!("send SMTP email: {e}"),
                })?;
            }
            EmailTransport::File(file) => {
                file.send(message).await.map_err(|e| Error::Internal {
                    operation: format!("send file email: {e}"),
                })?;
            }
        }

        tracing::debug!(subject = %subject, "Email sent");
        Ok(())
    }

    fn greeting(to_name: Option<&str>) -> String {
        match to_name {
            Some(name) => format!("Hello {name},"),
            None => "Hello,".to_string(),
        }
    }

    fn wrap(title: &str, content: &str) -> String {
        format!(
            r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>{title}</title>
    <style>
        body {{ font-family: Arial, sans-serif; line-height: 1.6; color: #333; }}
        .container {{ max-width: 600px; margin: 0 auto; padding: 20px; }}
        .footer {{ margin-top: 30px; font-size: 12px; color: #666; }}
    </style>
</head>
<body>
    <div class="container">
        <h2>{title}</h2>
{content}
        <div class="footer">
            <p>This is an automated message, please do not reply to this email.</p>
        </div>
    </div>
</body>
</html>"#
        )
    }

    fn receipt_body(&self, to_name: Option<&str>, receipt: &ReceiptDetails) -> String {
        let greeting = Self::greeting(to_name);
        let plan_line = receipt
            .plan
            .as_deref()
            .map(|plan| format!("        <p>Plan: <strong>{plan}</strong></p>\n"))
            .unwrap_or_default();
        let content = format!(
            r#"        <p>{greeting}</p>
        <p>Thanks for your payment. Here are the details:</p>
        <p>Invoice: {invoice}</p>
        <p>Amount: <strong>{amount:.2} {currency}</strong></p>
{plan_line}        <p><a href="{base}/dashboard/settings/billing">View your billing history</a></p>
"#,
            invoice = receipt.invoice_id,
            amount = receipt.amount,
            currency = receipt.currency,
            base = self.base_url,
        );
        Self::wrap("Payment Receipt", &content)
    }

    fn dunning_body(&self, to_name: Option<&str>, dunning: &DunningDetails) -> String {
        let greeting = Self::greeting(to_name);
        let content = format!(
            r#"        <p>{greeting}</p>
        <p>We couldn't process your payment of <strong>{amount:.2} {currency}</strong> (reference {payment}).</p>
        <p>Please update your payment method before {due} to keep your subscription active.</p>
        <p><a href="{base}/dashboard/settings/billing">Update payment method</a></p>
"#,
            amount = dunning.amount,
            currency = dunning.currency,
            payment = dunning.payment_id,
            due = dunning.due_date,
            base = self.base_url,
        );
        Self::wrap("Payment Failed", &content)
    }

    fn invitation_body(&self, organization_name: &str, invite_link: &str) -> String {
        let content = format!(
            r#"        <p>Hello,</p>
        <p>You've been invited to join <strong>{organization_name}</strong>.</p>
        <p><a href="{invite_link}">Accept invitation</a></p>
        <p>Or copy and paste this link into your browser:</p>
        <p>{invite_link}</p>
        <p>This invitation expires in 7 days.</p>
"#
        );
        Self::wrap("Organization Invitation", &content)
    }
}
