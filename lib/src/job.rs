//! Send jobs: one-off newsletters and standing autoresponder rules.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::db::{Collectable, Identifiable};
use crate::email::list::ListId;
use crate::template::TemplateId;
use crate::{ErrorKind, Result};

pub type JobId = Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobKind {
    Newsletter,
    Autoresponder,
}

/// Observable state of a newsletter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum JobState {
    Idle,
    InProgress,
    /// Terminal, the newsletter won't be picked up again.
    Sent,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Newsletter {
    pub id: JobId,

    pub list_id_to_include: ListId,
    /// JSON encoded array of list ids whose contacts must not receive this
    /// newsletter. Lists in here may since have been deleted.
    pub list_ids_to_exclude: String,

    pub template_id: TemplateId,

    /// Earliest time the newsletter may go out.
    pub to_send_after: DateTime<Utc>,

    pub is_sending: bool,
    pub sending_started_at: Option<DateTime<Utc>>,
    /// Last sign of life from the run holding `is_sending`.
    #[serde(default)]
    pub sending_updated_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

impl Collectable for Newsletter {
    fn get_collection_name() -> &'static str {
        "newsletter"
    }
}

impl Identifiable for Newsletter {
    fn get_id(&self) -> Uuid {
        self.id
    }
}

impl Newsletter {
    pub fn new(
        include: ListId,
        exclude: &[ListId],
        template_id: TemplateId,
        to_send_after: DateTime<Utc>,
    ) -> Result<Self> {
        Ok(Self {
            id: crate::db::new_id(),
            list_id_to_include: include,
            list_ids_to_exclude: serde_json::to_string(exclude)?,
            template_id,
            to_send_after,
            is_sending: false,
            sending_started_at: None,
            sending_updated_at: None,
            sent_at: None,
            created_at: Utc::now(),
        })
    }

    pub fn excluded_lists(&self) -> Result<Vec<ListId>> {
        serde_json::from_str(&self.list_ids_to_exclude).map_err(|e| {
            ErrorKind::Resolution(format!(
                "newsletter {} has malformed exclusion list: {e}",
                self.id
            ))
            .into()
        })
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.sent_at.is_none() && self.to_send_after <= now
    }

    pub fn state(&self) -> JobState {
        if self.sent_at.is_some() {
            JobState::Sent
        } else if self.is_sending {
            JobState::InProgress
        } else {
            JobState::Idle
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Autoresponder {
    pub id: JobId,
    pub list_id: ListId,
    /// Days between a contact confirming and receiving the message.
    pub delay_days: u32,
    pub template_id: TemplateId,
    pub created_at: DateTime<Utc>,
}

impl Collectable for Autoresponder {
    fn get_collection_name() -> &'static str {
        "autoresponder"
    }
}

impl Identifiable for Autoresponder {
    fn get_id(&self) -> Uuid {
        self.id
    }
}

impl Autoresponder {
    pub fn new(list_id: ListId, delay_days: u32, template_id: TemplateId) -> Self {
        Self {
            id: crate::db::new_id(),
            list_id,
            delay_days,
            template_id,
            created_at: Utc::now(),
        }
    }

    /// Confirmation times eligible at `now`, both ends inclusive.
    ///
    /// The window is one day wider than strictly needed, so a delay
    /// boundary falling between two triggers doesn't skip anybody.
    pub fn window(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let delay = i64::from(self.delay_days);
        (now - Duration::days(delay + 1), now - Duration::days(delay))
    }

    pub fn in_window(&self, confirmed_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let (from, to) = self.window(now);
        confirmed_at >= from && confirmed_at <= to
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newsletter_state_follows_flags() {
        let now = Utc::now();
        let mut newsletter = Newsletter::new(Uuid::now_v7(), &[], Uuid::now_v7(), now).unwrap();
        assert_eq!(newsletter.state(), JobState::Idle);
        assert!(newsletter.is_due(now));
        assert!(!newsletter.is_due(now - Duration::seconds(1)));

        newsletter.is_sending = true;
        assert_eq!(newsletter.state(), JobState::InProgress);

        newsletter.is_sending = false;
        newsletter.sent_at = Some(now);
        assert_eq!(newsletter.state(), JobState::Sent);
        assert!(!newsletter.is_due(now));
    }

    #[test]
    fn exclusions_roundtrip_through_json() {
        let excluded = vec![Uuid::now_v7(), Uuid::now_v7()];
        let mut newsletter =
            Newsletter::new(Uuid::now_v7(), &excluded, Uuid::now_v7(), Utc::now()).unwrap();
        assert_eq!(newsletter.excluded_lists().unwrap(), excluded);

        newsletter.list_ids_to_exclude = "[oops".to_string();
        let err = newsletter.excluded_lists().unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Resolution(_)));
    }

    #[test]
    fn autoresponder_window_is_inclusive() {
        let now = Utc::now();
        let responder = Autoresponder::new(Uuid::now_v7(), 5, Uuid::now_v7());
        assert!(responder.in_window(now - Duration::days(5), now));
        assert!(responder.in_window(now - Duration::days(6), now));
        assert!(responder.in_window(now - Duration::hours(5 * 24 + 12), now));
        assert!(!responder.in_window(now - Duration::days(4), now));
        assert!(!responder.in_window(now - Duration::days(6) - Duration::seconds(1), now));
    }
}
