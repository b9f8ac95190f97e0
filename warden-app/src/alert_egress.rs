//! Outbound alert delivery: JSONL log file, webhook, and SMTP email.
//!
//! Every emitted alert is appended to the log file. Webhook and email are
//! attempted only through the `/api/alerts` surface; each channel reports
//! its own outcome so the caller sees exactly what was delivered.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};
use warden_core::config_loader::AlertsConfig;
use warden_core::types::Alert;

/// Outbound webhook timeout.
const WEBHOOK_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelResult {
    pub channel: String,
    pub delivered: bool,
    pub detail: String,
}

struct SmtpChannel {
    host: String,
    port: u16,
    username: String,
    password: String,
    from: String,
    to: String,
}

pub struct AlertEgress {
    log_path: PathBuf,
    webhook_url: Option<String>,
    smtp: Option<SmtpChannel>,
    http: reqwest::Client,
    alerts_logged: AtomicU64,
}

impl AlertEgress {
    pub fn new(config: &AlertsConfig, data_dir: &str) -> Self {
        let webhook_url =
            if config.webhook_url.is_empty() { None } else { Some(config.webhook_url.clone()) };
        let smtp = if config.email_to.is_empty() {
            None
        } else {
            Some(SmtpChannel {
                host: config.smtp_host.clone(),
                port: config.smtp_port,
                username: config.smtp_username.clone(),
                password: config.smtp_password.clone(),
                from: config.email_from.clone(),
                to: config.email_to.clone(),
            })
        };
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(WEBHOOK_TIMEOUT_SECS))
            .user_agent("ContestWarden/0.3")
            .build()
            .unwrap_or_default();
        Self {
            log_path: PathBuf::from(data_dir).join(&config.log_file),
            webhook_url,
            smtp,
            http,
            alerts_logged: AtomicU64::new(0),
        }
    }

    /// Append the alert to the JSONL log. Failures are logged and swallowed;
    /// the log is an audit convenience, not a delivery guarantee.
    pub fn log_alert(&self, alert: &Alert) {
        let Ok(line) = serde_json::to_string(alert) else { return };
        if let Some(parent) = self.log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        use std::io::Write;
        match std::fs::OpenOptions::new().create(true).append(true).open(&self.log_path) {
            Ok(mut f) => {
                if writeln!(f, "{}", line).is_ok() {
                    self.alerts_logged.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(e) => warn!(path = %self.log_path.display(), error = %e, "Alert log write failed"),
        }
    }

    /// Attempt delivery to every configured outbound channel.
    pub async fn dispatch(&self, alert: &Alert) -> Vec<ChannelResult> {
        let mut results = Vec::new();
        if let Some(ref url) = self.webhook_url {
            results.push(self.send_webhook(url, alert).await);
        }
        if let Some(ref smtp) = self.smtp {
            results.push(self.send_email(smtp, alert).await);
        }
        if results.is_empty() {
            info!("No outbound alert channels configured");
        }
        results
    }

    async fn send_webhook(&self, url: &str, alert: &Alert) -> ChannelResult {
        match self.http.post(url).json(alert).send().await {
            Ok(resp) if resp.status().is_success() => ChannelResult {
                channel: "webhook".into(),
                delivered: true,
                detail: resp.status().to_string(),
            },
            Ok(resp) => {
                warn!(status = %resp.status(), "Webhook response not OK");
                ChannelResult {
                    channel: "webhook".into(),
                    delivered: false,
                    detail: resp.status().to_string(),
                }
            }
            Err(e) => {
                warn!(error = %e, "Webhook delivery failed");
                ChannelResult { channel: "webhook".into(), delivered: false, detail: e.to_string() }
            }
        }
    }

    async fn send_email(&self, smtp: &SmtpChannel, alert: &Alert) -> ChannelResult {
        match self.build_and_send(smtp, alert).await {
            Ok(()) => ChannelResult { channel: "email".into(), delivered: true, detail: "sent".into() },
            Err(e) => {
                warn!(error = %e, "Alert email failed");
                ChannelResult { channel: "email".into(), delivered: false, detail: e }
            }
        }
    }

    async fn build_and_send(&self, smtp: &SmtpChannel, alert: &Alert) -> Result<(), String> {
        use lettre::message::header::ContentType;
        use lettre::transport::smtp::authentication::Credentials;
        use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

        let subject = format!(
            "[Contest Warden] {:?} alert for {}",
            alert.level, alert.display_name
        );
        let body = format!(
            "Participant: {}\nLevel: {:?}\nScore: {:.3}\nReasons:\n{}\n\nTimestamp: {}\n",
            alert.display_name,
            alert.level,
            alert.score,
            alert.reasons.iter().map(|r| format!("  - {}", r)).collect::<Vec<_>>().join("\n"),
            alert.timestamp,
        );

        let email = Message::builder()
            .from(smtp.from.parse().map_err(|e| format!("from address error: {}", e))?)
            .to(smtp.to.parse().map_err(|e| format!("to address error: {}", e))?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| format!("email build error: {}", e))?;

        let creds = Credentials::new(smtp.username.clone(), smtp.password.clone());
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)
            .map_err(|e| format!("smtp relay error: {}", e))?
            .port(smtp.port)
            .credentials(creds)
            .build();

        mailer.send(email).await.map_err(|e| format!("smtp send error: {}", e))?;
        Ok(())
    }

    pub fn alerts_logged(&self) -> u64 {
        self.alerts_logged.load(Ordering::Relaxed)
    }
}
