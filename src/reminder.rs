//! Stale-deal reminder pass.
//!
//! A pass runs three steps over deals already loaded from the store:
//! 1. keep deals whose last activity predates `now - threshold_days` and whose
//!    stage is not `Closed`
//! 2. resolve each kept deal to exactly one recipient address
//! 3. group deal names per address and hand one summary email per address to
//!    the mail sender, sequentially
//!
//! Steps 1 and 2 are pure so they can be tested with fixed clocks.

use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::notification::{dispatch_groups, MailSender};
use crate::types::{Deal, DeliveryReport};

/// The only deal stage that ends follow-up.
pub const TERMINAL_STAGE: &str = "Closed";

/// Owner identifier → email address.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OwnerDirectory(HashMap<String, String>);

impl OwnerDirectory {
    /// Look up an owner's address. Blank identifiers never resolve.
    pub fn resolve(&self, owner: &str) -> Option<&str> {
        let owner = owner.trim();
        if owner.is_empty() {
            return None;
        }
        self.0
            .get(owner)
            .map(String::as_str)
            .filter(|email| !email.trim().is_empty())
    }

    /// True when no owner has a usable address.
    pub fn is_empty(&self) -> bool {
        self.0.values().all(|email| email.trim().is_empty())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for OwnerDirectory {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(owner, email)| (owner.into(), email.into()))
                .collect(),
        )
    }
}

/// Everything a pass reads from configuration.
#[derive(Debug, Clone, Default)]
pub struct ReminderSettings {
    pub directory: OwnerDirectory,
    pub threshold_days: u32,
    pub cc: Vec<String>,
    pub sender: String,
}

/// Where a deal's reminder goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    Routed(String),
    /// Neither owner is in the directory; the deal is skipped without error.
    Unroutable,
}

/// Cutoff instant: activity strictly before this is stale.
///
/// `None` when `now - threshold_days` falls outside the representable range.
pub fn stale_cutoff(threshold_days: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    TimeDelta::try_days(i64::from(threshold_days))
        .and_then(|span| now.checked_sub_signed(span))
}

/// A cutoff before the earliest representable instant matches nothing.
pub fn is_stale(deal: &Deal, threshold_days: u32, now: DateTime<Utc>) -> bool {
    if deal.deal_stage == TERMINAL_STAGE {
        return false;
    }
    match (deal.last_activity_date, stale_cutoff(threshold_days, now)) {
        (Some(last_activity), Some(cutoff)) => last_activity < cutoff,
        _ => false,
    }
}

/// Deals that need a follow-up, in their original order.
pub fn filter_stale(deals: &[Deal], threshold_days: u32, now: DateTime<Utc>) -> Vec<&Deal> {
    deals
        .iter()
        .filter(|deal| is_stale(deal, threshold_days, now))
        .collect()
}

/// Second owner wins only when it is itself a known identity; otherwise the
/// primary owner is used.
pub fn resolve_recipient(deal: &Deal, directory: &OwnerDirectory) -> Recipient {
    let second = deal
        .second_owner
        .as_deref()
        .and_then(|owner| directory.resolve(owner));

    match second.or_else(|| directory.resolve(&deal.deal_owner)) {
        Some(email) => Recipient::Routed(email.to_string()),
        None => Recipient::Unroutable,
    }
}

/// Deal names waiting for one recipient, in encounter order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationGroup {
    pub recipient: String,
    pub deal_names: Vec<String>,
}

/// Per-recipient aggregation built for one pass.
///
/// Recipients keep first-seen order and names keep deal order; duplicate
/// names are kept.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationGroups {
    groups: Vec<NotificationGroup>,
    #[serde(skip)]
    index: HashMap<String, usize>,
    unroutable: usize,
}

impl NotificationGroups {
    fn push(&mut self, recipient: String, deal_name: &str) {
        let slot = match self.index.get(&recipient) {
            Some(&slot) => slot,
            None => {
                self.groups.push(NotificationGroup {
                    recipient: recipient.clone(),
                    deal_names: Vec::new(),
                });
                self.index.insert(recipient, self.groups.len() - 1);
                self.groups.len() - 1
            }
        };
        self.groups[slot].deal_names.push(deal_name.to_string());
    }

    pub fn get(&self, recipient: &str) -> Option<&[String]> {
        self.index
            .get(recipient)
            .map(|&slot| self.groups[slot].deal_names.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = &NotificationGroup> {
        self.groups.iter()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Deals dropped because no owner resolved.
    pub fn unroutable(&self) -> usize {
        self.unroutable
    }
}

pub fn group_by_recipient<'a>(
    deals: impl IntoIterator<Item = &'a Deal>,
    directory: &OwnerDirectory,
) -> NotificationGroups {
    let mut groups = NotificationGroups::default();
    for deal in deals {
        match resolve_recipient(deal, directory) {
            Recipient::Routed(email) => groups.push(email, &deal.deal_name),
            Recipient::Unroutable => {
                log::debug!(
                    "Skipping deal '{}' ({}): no address for owner '{}'",
                    deal.deal_name,
                    deal.record_id,
                    deal.deal_owner
                );
                groups.unroutable += 1;
            }
        }
    }
    groups
}

/// Filter and group without sending anything.
pub fn plan_reminders(
    deals: &[Deal],
    settings: &ReminderSettings,
    now: DateTime<Utc>,
) -> NotificationGroups {
    let stale = filter_stale(deals, settings.threshold_days, now);
    group_by_recipient(stale, &settings.directory)
}

/// Outcome of one pass.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderReport {
    pub deals_considered: usize,
    pub stale_deals: usize,
    pub unroutable_deals: usize,
    pub deliveries: Vec<DeliveryReport>,
}

impl ReminderReport {
    pub fn failed_deliveries(&self) -> usize {
        self.deliveries.iter().filter(|d| !d.is_sent()).count()
    }
}

/// Run one reminder pass over `deals` as of `now`.
///
/// Never fails as a whole: unroutable deals are counted, delivery failures are
/// recorded per recipient and later recipients are still attempted.
pub async fn run_reminder_pass(
    deals: &[Deal],
    settings: &ReminderSettings,
    now: DateTime<Utc>,
    sender: &dyn MailSender,
) -> ReminderReport {
    let stale = filter_stale(deals, settings.threshold_days, now);
    let stale_deals = stale.len();
    let groups = group_by_recipient(stale, &settings.directory);

    log::info!(
        "Reminder pass: {} deals, {} stale, {} recipients, {} unroutable",
        deals.len(),
        stale_deals,
        groups.len(),
        groups.unroutable()
    );

    let deliveries = dispatch_groups(&groups, settings, sender).await;

    ReminderReport {
        deals_considered: deals.len(),
        stale_deals,
        unroutable_deals: groups.unroutable(),
        deliveries,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReminderError;
    use crate::notification::OutgoingMessage;
    use crate::types::DeliveryOutcome;
    use chrono::TimeZone;
    use std::sync::Mutex;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn deal(
        name: &str,
        owner: &str,
        second: Option<&str>,
        last: Option<DateTime<Utc>>,
        stage: &str,
    ) -> Deal {
        Deal {
            record_id: format!("rec-{}", name),
            deal_name: name.to_string(),
            deal_owner: owner.to_string(),
            second_owner: second.map(str::to_string),
            last_activity_date: last,
            deal_stage: stage.to_string(),
        }
    }

    fn directory() -> OwnerDirectory {
        OwnerDirectory::from_iter([
            ("Omer Zia", "omer.zia@xstak.com"),
            ("Sara Khan", "sara.khan@xstak.com"),
            ("Ali Raza", "ali.raza@xstak.com"),
        ])
    }

    fn settings() -> ReminderSettings {
        ReminderSettings {
            directory: directory(),
            threshold_days: 10,
            cc: vec!["sales-lead@xstak.com".to_string()],
            sender: "crm@xstak.com".to_string(),
        }
    }

    fn summary_for(names: &[&str]) -> String {
        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        crate::notification::summary_body(&names, 10)
    }

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<OutgoingMessage>>,
        fail_for: Option<String>,
    }

    #[async_trait::async_trait]
    impl MailSender for RecordingSender {
        async fn send(&self, message: &OutgoingMessage) -> Result<(), ReminderError> {
            self.sent.lock().unwrap().push(message.clone());
            if self.fail_for.as_deref() == Some(message.to.as_str()) {
                return Err(ReminderError::DeliveryError("HTTP 500".to_string()));
            }
            Ok(())
        }
    }

    #[test]
    fn test_worked_example() {
        let now = at(2024, 3, 20);
        let deals = vec![
            deal("Deal A name", "Omer Zia", Some(""), Some(at(2024, 3, 1)), "Open"),
            deal("Deal B name", "Omer Zia", None, Some(at(2024, 3, 19)), "Open"),
            deal("Deal C name", "Omer Zia", None, Some(at(2024, 2, 1)), "Closed"),
        ];

        let groups = plan_reminders(&deals, &settings(), now);

        assert_eq!(groups.len(), 1);
        assert_eq!(
            groups.get("omer.zia@xstak.com"),
            Some(&["Deal A name".to_string()][..])
        );
    }

    #[test]
    fn test_missing_activity_date_never_stale() {
        let now = at(2024, 3, 20);
        let deals = vec![
            deal("No date open", "Omer Zia", None, None, "Open"),
            deal("No date closed", "Omer Zia", None, None, "Closed"),
        ];
        assert!(filter_stale(&deals, 10, now).is_empty());
    }

    #[test]
    fn test_closed_deals_excluded_regardless_of_date() {
        let now = at(2024, 3, 20);
        let deals = vec![deal("Ancient", "Omer Zia", None, Some(at(2019, 1, 1)), "Closed")];
        assert!(filter_stale(&deals, 0, now).is_empty());
    }

    #[test]
    fn test_stage_match_is_exact() {
        let now = at(2024, 3, 20);
        let deals = vec![
            deal("Lower", "Omer Zia", None, Some(at(2024, 1, 1)), "closed"),
            deal("Won", "Omer Zia", None, Some(at(2024, 1, 1)), "Closed Won"),
        ];
        assert_eq!(filter_stale(&deals, 10, now).len(), 2);
    }

    #[test]
    fn test_cutoff_is_strict() {
        let now = at(2024, 3, 20);
        let exactly = deal("Boundary", "Omer Zia", None, Some(at(2024, 3, 10)), "Open");
        let just_before = deal(
            "Before",
            "Omer Zia",
            None,
            Some(at(2024, 3, 10) - TimeDelta::seconds(1)),
            "Open",
        );
        assert!(!is_stale(&exactly, 10, now));
        assert!(is_stale(&just_before, 10, now));
    }

    #[test]
    fn test_resolvable_second_owner_wins() {
        let d = deal("Shared", "Omer Zia", Some("Sara Khan"), None, "Open");
        assert_eq!(
            resolve_recipient(&d, &directory()),
            Recipient::Routed("sara.khan@xstak.com".to_string())
        );
    }

    #[test]
    fn test_unknown_second_owner_falls_back_to_primary() {
        let d = deal("Shared", "Omer Zia", Some("Former Employee"), None, "Open");
        assert_eq!(
            resolve_recipient(&d, &directory()),
            Recipient::Routed("omer.zia@xstak.com".to_string())
        );
    }

    #[test]
    fn test_neither_owner_resolvable() {
        let d = deal("Orphan", "Nobody", Some("Also Nobody"), None, "Open");
        assert_eq!(resolve_recipient(&d, &directory()), Recipient::Unroutable);

        let blank = deal("Blank", "", None, None, "Open");
        assert_eq!(resolve_recipient(&blank, &directory()), Recipient::Unroutable);
    }

    #[test]
    fn test_unroutable_deals_are_counted_not_grouped() {
        let deals = vec![
            deal("Orphan", "Nobody", None, None, "Open"),
            deal("Routed", "Omer Zia", None, None, "Open"),
        ];
        let groups = group_by_recipient(&deals, &directory());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups.unroutable(), 1);
        assert!(groups.iter().all(|g| !g.deal_names.contains(&"Orphan".to_string())));
    }

    #[test]
    fn test_same_recipient_grouped_in_encounter_order() {
        let deals = vec![
            deal("First", "Omer Zia", None, None, "Open"),
            deal("Other", "Sara Khan", None, None, "Open"),
            deal("Second", "Nobody", Some("Omer Zia"), None, "Open"),
            deal("First", "Omer Zia", None, None, "Open"),
        ];
        let groups = group_by_recipient(&deals, &directory());

        let recipients: Vec<&str> = groups.iter().map(|g| g.recipient.as_str()).collect();
        assert_eq!(recipients, vec!["omer.zia@xstak.com", "sara.khan@xstak.com"]);
        assert_eq!(
            groups.get("omer.zia@xstak.com").unwrap(),
            &["First".to_string(), "Second".to_string(), "First".to_string()]
        );
    }

    #[tokio::test]
    async fn test_pass_sends_one_email_per_recipient() {
        let now = at(2024, 3, 20);
        let deals = vec![
            deal("Acme", "Omer Zia", None, Some(at(2024, 1, 5)), "Open"),
            deal("Globex", "Omer Zia", None, Some(at(2024, 2, 5)), "Negotiation"),
            deal("Initech", "Sara Khan", None, Some(at(2024, 2, 5)), "Open"),
            deal("Fresh", "Sara Khan", None, Some(at(2024, 3, 18)), "Open"),
            deal("Orphan", "Nobody", None, Some(at(2024, 1, 5)), "Open"),
        ];
        let sender = RecordingSender::default();

        let report = run_reminder_pass(&deals, &settings(), now, &sender).await;

        assert_eq!(report.deals_considered, 5);
        assert_eq!(report.stale_deals, 4);
        assert_eq!(report.unroutable_deals, 1);
        assert_eq!(report.deliveries.len(), 2);
        assert_eq!(report.failed_deliveries(), 0);

        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].to, "omer.zia@xstak.com");
        assert_eq!(sent[0].subject, "Reminder: Follow up on 2 inactive deals");
        assert_eq!(sent[1].to, "sara.khan@xstak.com");
        assert_eq!(sent[1].cc, vec!["sales-lead@xstak.com".to_string()]);
    }

    #[tokio::test]
    async fn test_delivery_failure_does_not_stop_batch() {
        let now = at(2024, 3, 20);
        let deals = vec![
            deal("Acme", "Omer Zia", None, Some(at(2024, 1, 5)), "Open"),
            deal("Initech", "Sara Khan", None, Some(at(2024, 1, 5)), "Open"),
        ];
        let sender = RecordingSender {
            fail_for: Some("omer.zia@xstak.com".to_string()),
            ..RecordingSender::default()
        };

        let report = run_reminder_pass(&deals, &settings(), now, &sender).await;

        assert_eq!(report.deliveries.len(), 2);
        assert!(matches!(report.deliveries[0].outcome, DeliveryOutcome::Failed(_)));
        assert_eq!(report.deliveries[1].outcome, DeliveryOutcome::Sent);
        assert_eq!(report.failed_deliveries(), 1);

        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].to, "sara.khan@xstak.com");
        assert_eq!(sent[1].body, summary_for(&["Initech"]));
    }

    #[tokio::test]
    async fn test_middle_failure_still_attempts_later_recipients() {
        let now = at(2024, 3, 20);
        let deals = vec![
            deal("Acme", "Omer Zia", None, Some(at(2024, 1, 5)), "Open"),
            deal("Initech", "Sara Khan", None, Some(at(2024, 1, 5)), "Open"),
            deal("Hooli", "Ali Raza", None, Some(at(2024, 1, 5)), "Open"),
            deal("Globex", "Ali Raza", None, Some(at(2024, 2, 1)), "Open"),
        ];
        let sender = RecordingSender {
            fail_for: Some("sara.khan@xstak.com".to_string()),
            ..RecordingSender::default()
        };

        let report = run_reminder_pass(&deals, &settings(), now, &sender).await;

        let outcomes: Vec<(&str, bool)> = report
            .deliveries
            .iter()
            .map(|d| (d.recipient.as_str(), d.is_sent()))
            .collect();
        assert_eq!(
            outcomes,
            vec![
                ("omer.zia@xstak.com", true),
                ("sara.khan@xstak.com", false),
                ("ali.raza@xstak.com", true),
            ]
        );

        let sent = sender.sent.lock().unwrap();
        let recipients: Vec<&str> = sent.iter().map(|m| m.to.as_str()).collect();
        assert_eq!(
            recipients,
            vec!["omer.zia@xstak.com", "sara.khan@xstak.com", "ali.raza@xstak.com"]
        );
        assert_eq!(sent[2].subject, "Reminder: Follow up on 2 inactive deals");
        assert_eq!(sent[2].body, summary_for(&["Hooli", "Globex"]));
        assert_eq!(report.deliveries[2].deal_count, 2);
    }

    #[test]
    fn test_huge_threshold_matches_nothing() {
        let now = at(2024, 3, 20);
        assert_eq!(stale_cutoff(u32::MAX, now), None);

        let deals = vec![deal("Ancient", "Omer Zia", None, Some(at(1970, 1, 1)), "Open")];
        let settings = ReminderSettings {
            threshold_days: 200_000_000,
            ..settings()
        };
        let groups = plan_reminders(&deals, &settings, now);
        assert!(groups.is_empty());
        assert_eq!(groups.unroutable(), 0);
    }

    #[test]
    fn test_directory_with_only_blank_addresses_is_empty() {
        assert!(OwnerDirectory::default().is_empty());
        assert!(OwnerDirectory::from_iter([("Omer Zia", " ")]).is_empty());
        assert!(!directory().is_empty());
    }

    #[tokio::test]
    async fn test_nothing_stale_sends_nothing() {
        let sender = RecordingSender::default();
        let report = run_reminder_pass(&[], &settings(), at(2024, 3, 20), &sender).await;
        assert!(report.deliveries.is_empty());
        assert!(sender.sent.lock().unwrap().is_empty());
    }
}
