//! Completion hook
//!
//! Called once per call that reaches `Complete`. Downstream systems (EHR,
//! scheduling) plug in here; the default just logs the summary, and the
//! email notifier also sends the caller an appointment confirmation.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;

use intake_config::EmailProviderConfig;

use crate::call_session::CallSummary;
use crate::intake::{FieldKey, FieldState};
use crate::AgentError;

#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    async fn notify(&self, summary: &CallSummary) -> Result<(), AgentError>;
}

/// Logs the completed intake as a structured event
#[derive(Debug, Default, Clone)]
pub struct LoggingNotifier;

#[async_trait]
impl CompletionNotifier for LoggingNotifier {
    async fn notify(&self, summary: &CallSummary) -> Result<(), AgentError> {
        tracing::info!(
            call_id = %summary.call_id,
            call_sid = ?summary.call_sid,
            unverified = ?summary.unverified_fields,
            utterances = summary.utterance_count,
            duration_ms = summary.duration_ms,
            record = %summary.record,
            "Intake completed"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmationEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

fn collected(summary: &CallSummary, key: FieldKey) -> Option<String> {
    let field = &summary.record[key.name()];
    let state: FieldState = serde_json::from_value(field["state"].clone()).ok()?;
    if state != FieldState::Collected {
        return None;
    }
    field["value"].as_str().map(str::to_string)
}

/// Confirmation for a completed intake. `None` unless the caller gave a
/// verified email address and booked a slot.
pub fn confirmation_email(summary: &CallSummary, practice_name: &str) -> Option<ConfirmationEmail> {
    let to = collected(summary, FieldKey::Email).filter(|e| e.contains('@'))?;
    let slot = collected(summary, FieldKey::AppointmentSlot)?;
    let first_name = collected(summary, FieldKey::FirstName).unwrap_or_else(|| "Patient".to_string());

    let body = format!(
        "Dear {first_name},\n\n\
         This email confirms your upcoming appointment with {practice}.\n\n\
         Appointment: {slot}\n\n\
         If you have any questions or need to reschedule, please call our office.\n\n\
         Thank you,\n\
         {practice}\n",
        first_name = first_name,
        practice = practice_name,
        slot = slot,
    );

    Some(ConfirmationEmail {
        to,
        subject: "Your Upcoming Appointment Confirmation".to_string(),
        body,
    })
}

/// Logs the intake, then emails the caller a confirmation over SMTP with
/// STARTTLS
pub struct EmailNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
    practice_name: String,
}

impl EmailNotifier {
    pub fn new(config: &EmailProviderConfig, practice_name: &str) -> Result<Self, AgentError> {
        let (Some(sender), Some(password)) = (&config.sender_email, &config.sender_password) else {
            return Err(AgentError::Provider(
                "providers.email.sender_email and sender_password are required".to_string(),
            ));
        };
        let mailbox: Mailbox = sender
            .parse()
            .map_err(|e| AgentError::Provider(format!("invalid sender address: {}", e)))?;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_server)
            .map_err(|e| AgentError::Provider(e.to_string()))?
            .port(config.smtp_port)
            .credentials(Credentials::new(sender.clone(), password.clone()))
            .timeout(Some(Duration::from_millis(config.timeout_ms)))
            .build();

        Ok(Self {
            transport,
            sender: mailbox,
            practice_name: practice_name.to_string(),
        })
    }
}

#[async_trait]
impl CompletionNotifier for EmailNotifier {
    async fn notify(&self, summary: &CallSummary) -> Result<(), AgentError> {
        LoggingNotifier.notify(summary).await?;

        let Some(email) = confirmation_email(summary, &self.practice_name) else {
            tracing::info!(call_id = %summary.call_id, "No email address on file, skipping confirmation");
            return Ok(());
        };

        let recipient: Mailbox = email
            .to
            .parse()
            .map_err(|e| AgentError::Notify(format!("invalid recipient address: {}", e)))?;
        let message = Message::builder()
            .from(self.sender.clone())
            .to(recipient)
            .subject(email.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(email.body)
            .map_err(|e| AgentError::Notify(e.to_string()))?;

        self.transport.send(message).await.map_err(|e| {
            metrics::counter!("intake_agent_errors_total", "kind" => "email").increment(1);
            AgentError::Notify(e.to_string())
        })?;
        tracing::info!(call_id = %summary.call_id, "Appointment confirmation emailed");
        metrics::counter!("intake_agent_confirmations_sent_total").increment(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::EndReason;

    fn summary(email: serde_json::Value) -> CallSummary {
        CallSummary {
            call_id: "call-1".to_string(),
            stream_sid: None,
            call_sid: None,
            end_reason: EndReason::Completed,
            completed: true,
            record: serde_json::json!({
                "first_name": {"value": "Jane", "state": "collected"},
                "email": email,
                "appointment_slot": {"value": "Dr. Jones on Tuesday at 2:30 PM", "state": "collected"},
            }),
            unverified_fields: Vec::new(),
            missing_fields: Vec::new(),
            utterance_count: 24,
            transcript: Vec::new(),
            duration_ms: 180_000,
        }
    }

    #[test]
    fn test_confirmation_names_the_slot() {
        let email = confirmation_email(
            &summary(serde_json::json!({"value": "jane@example.com", "state": "collected"})),
            "Riverside Clinic",
        )
        .unwrap();
        assert_eq!(email.to, "jane@example.com");
        assert!(email.body.starts_with("Dear Jane,"));
        assert!(email.body.contains("Dr. Jones on Tuesday at 2:30 PM"));
        assert!(email.body.contains("Riverside Clinic"));
    }

    #[test]
    fn test_no_confirmation_without_usable_email() {
        let declined = summary(serde_json::json!({"value": "none given", "state": "collected"}));
        assert!(confirmation_email(&declined, "Clinic").is_none());

        let unverified = summary(serde_json::json!({"value": "jane at example", "state": "unverified"}));
        assert!(confirmation_email(&unverified, "Clinic").is_none());
    }

    #[test]
    fn test_email_notifier_needs_credentials() {
        let config = EmailProviderConfig::default();
        assert!(matches!(
            EmailNotifier::new(&config, "Clinic"),
            Err(AgentError::Provider(_))
        ));

        let config = EmailProviderConfig {
            sender_email: Some("front-desk@example.com".to_string()),
            sender_password: Some("app-password".to_string()),
            ..EmailProviderConfig::default()
        };
        assert!(EmailNotifier::new(&config, "Clinic").is_ok());
    }
}
