//! Summary email composition and sequential dispatch.
//!
//! One message per recipient. Sends are awaited one at a time; a failure is
//! logged and recorded in that recipient's `DeliveryReport`, and the next
//! recipient is still attempted.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::ReminderError;
use crate::reminder::{NotificationGroups, ReminderSettings};
use crate::types::{DeliveryOutcome, DeliveryReport};

/// A plain-text email ready for the provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutgoingMessage {
    pub to: String,
    pub cc: Vec<String>,
    pub from: String,
    pub subject: String,
    pub body: String,
}

/// Delivery backend. Implementations must not retry.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, message: &OutgoingMessage) -> Result<(), ReminderError>;
}

pub fn summary_subject(deal_count: usize) -> String {
    format!("Reminder: Follow up on {} inactive deals", deal_count)
}

pub fn summary_body(deal_names: &[String], threshold_days: u32) -> String {
    let lines = deal_names
        .iter()
        .map(|name| format!("- {}", name))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Please contact the following deals:\n\n{}\n\nLast activity was over {} days ago.",
        lines, threshold_days
    )
}

pub fn build_summary_message(
    recipient: &str,
    deal_names: &[String],
    settings: &ReminderSettings,
) -> OutgoingMessage {
    OutgoingMessage {
        to: recipient.to_string(),
        cc: settings.cc.clone(),
        from: settings.sender.clone(),
        subject: summary_subject(deal_names.len()),
        body: summary_body(deal_names, settings.threshold_days),
    }
}

/// Send every group in order and report the outcome per recipient.
pub async fn dispatch_groups(
    groups: &NotificationGroups,
    settings: &ReminderSettings,
    sender: &dyn MailSender,
) -> Vec<DeliveryReport> {
    let mut reports = Vec::with_capacity(groups.len());

    for group in groups.iter() {
        let message = build_summary_message(&group.recipient, &group.deal_names, settings);
        let deal_count = group.deal_names.len();

        let outcome = match sender.send(&message).await {
            Ok(()) => {
                log::info!(
                    "Summary email sent to {} for {} deals",
                    group.recipient,
                    deal_count
                );
                DeliveryOutcome::Sent
            }
            Err(e) => {
                log::error!("Error sending summary email to {}: {}", group.recipient, e);
                DeliveryOutcome::Failed(e.to_string())
            }
        };

        reports.push(DeliveryReport {
            recipient: group.recipient.clone(),
            deal_count,
            outcome,
        });
    }

    reports
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_subject_counts_deals() {
        assert_eq!(summary_subject(1), "Reminder: Follow up on 1 inactive deals");
        assert_eq!(summary_subject(12), "Reminder: Follow up on 12 inactive deals");
    }

    #[test]
    fn test_summary_body_lists_each_deal() {
        let names = vec!["Acme renewal".to_string(), "Globex pilot".to_string()];
        assert_eq!(
            summary_body(&names, 10),
            "Please contact the following deals:\n\n- Acme renewal\n- Globex pilot\n\nLast activity was over 10 days ago."
        );
    }

    #[test]
    fn test_build_summary_message_uses_settings() {
        let settings = ReminderSettings {
            threshold_days: 7,
            cc: vec!["lead@xstak.com".to_string()],
            sender: "crm@xstak.com".to_string(),
            ..ReminderSettings::default()
        };
        let message =
            build_summary_message("omer.zia@xstak.com", &["Acme".to_string()], &settings);

        assert_eq!(message.to, "omer.zia@xstak.com");
        assert_eq!(message.from, "crm@xstak.com");
        assert_eq!(message.cc, vec!["lead@xstak.com".to_string()]);
        assert!(message.body.ends_with("Last activity was over 7 days ago."));
    }
}
