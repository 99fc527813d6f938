//! Sending flags preventing overlapping runs of the same job kind.
//!
//! Newsletters carry their own `is_sending` flag, but only one newsletter may
//! hold it at a time. Autoresponders share a single `sending_status`
//! setting. Both are plain read-then-write checks, not locks: two triggers
//! racing each other may both get through. The ledger's unique
//! (job, email) rows keep that from producing duplicate sends.
//!
//! A run keeps its flag fresh as it makes progress. A flag that hasn't been
//! refreshed within the configured staleness threshold is assumed to be
//! left over from a crashed run and gets taken over by the next trigger.

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::db::Database;
use crate::job::Newsletter;
use crate::{ErrorKind, Result};

pub const SENDING_STATUS: &str = "sending_status";

const SETTINGS: &str = "setting";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Status {
    Idle,
    InProgress,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct SendingStatus {
    pub status: Status,
    /// Time of the last transition.
    pub since: DateTime<Utc>,
    /// Last sign of life from the run holding the flag.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl SendingStatus {
    pub fn last_seen(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.since)
    }
}

impl Default for SendingStatus {
    fn default() -> Self {
        Self {
            status: Status::Idle,
            since: DateTime::<Utc>::UNIX_EPOCH,
            updated_at: None,
        }
    }
}

pub fn get_setting<T: DeserializeOwned>(db: &Database, name: &str) -> Result<Option<T>> {
    db.get_at(SETTINGS, name)
}

pub fn set_setting<T: Serialize>(db: &Database, name: &str, value: &T) -> Result<()> {
    db.set_raw_at(SETTINGS, name, value)
}

#[derive(Clone, Debug)]
pub struct StateMachine {
    db: Database,
    stale_after: Duration,
}

impl StateMachine {
    pub fn new(db: Database, stale_after: Duration) -> Self {
        Self { db, stale_after }
    }

    fn is_stale(&self, since: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - since > self.stale_after
    }

    /// Fails with `StateConflict` while any newsletter is being sent.
    ///
    /// Abandoned flags are cleared on the way, their newsletters stay unsent
    /// and get picked up again like any other due newsletter.
    pub fn check_newsletters_idle(&self, now: DateTime<Utc>) -> Result<()> {
        let sending = self
            .db
            .get_collection::<Newsletter>()?
            .into_iter()
            .filter(|n| n.is_sending);
        for mut newsletter in sending {
            let last_seen = newsletter
                .sending_updated_at
                .or(newsletter.sending_started_at)
                .unwrap_or(newsletter.created_at);
            if !self.is_stale(last_seen, now) {
                return Err(ErrorKind::StateConflict(format!(
                    "newsletter {} sending, last seen {last_seen}",
                    newsletter.id
                ))
                .into());
            }
            tracing::warn!(
                newsletter = %newsletter.id,
                %last_seen,
                "taking over newsletter abandoned in progress"
            );
            self.release_newsletter(&mut newsletter)?;
        }
        Ok(())
    }

    /// Durably flags the newsletter as being sent. Must happen before the
    /// first message goes out.
    pub fn begin_newsletter(&self, newsletter: &mut Newsletter, now: DateTime<Utc>) -> Result<()> {
        newsletter.is_sending = true;
        newsletter.sending_started_at = Some(now);
        newsletter.sending_updated_at = Some(now);
        self.db.set(&*newsletter)
    }

    /// Refreshes the flag of a newsletter that is still being sent.
    pub fn keep_newsletter_alive(
        &self,
        newsletter: &mut Newsletter,
        now: DateTime<Utc>,
    ) -> Result<()> {
        newsletter.sending_updated_at = Some(now);
        self.db.set(&*newsletter)
    }

    /// Marks the newsletter as sent and clears its flag.
    pub fn complete_newsletter(
        &self,
        newsletter: &mut Newsletter,
        now: DateTime<Utc>,
    ) -> Result<()> {
        newsletter.is_sending = false;
        newsletter.sending_started_at = None;
        newsletter.sending_updated_at = None;
        newsletter.sent_at = Some(now);
        self.db.set(&*newsletter)
    }

    /// Clears the flag without marking the newsletter sent, so that a later
    /// trigger retries it.
    pub fn release_newsletter(&self, newsletter: &mut Newsletter) -> Result<()> {
        newsletter.is_sending = false;
        newsletter.sending_started_at = None;
        newsletter.sending_updated_at = None;
        self.db.set(&*newsletter)
    }

    pub fn autoresponder_status(&self) -> Result<SendingStatus> {
        Ok(get_setting(&self.db, SENDING_STATUS)?.unwrap_or_default())
    }

    /// Flips the shared autoresponder flag to in progress, failing with
    /// `StateConflict` if another run holds it.
    pub fn begin_autoresponders(&self, now: DateTime<Utc>) -> Result<()> {
        let current = self.autoresponder_status()?;
        if current.status == Status::InProgress {
            let last_seen = current.last_seen();
            if !self.is_stale(last_seen, now) {
                return Err(ErrorKind::StateConflict(format!(
                    "autoresponders sending since {}, last seen {last_seen}",
                    current.since
                ))
                .into());
            }
            tracing::warn!(%last_seen, "taking over autoresponders abandoned in progress");
        }
        set_setting(
            &self.db,
            SENDING_STATUS,
            &SendingStatus {
                status: Status::InProgress,
                since: now,
                updated_at: Some(now),
            },
        )
    }

    /// Refreshes the shared autoresponder flag while a run is in progress.
    pub fn keep_autoresponders_alive(&self, now: DateTime<Utc>) -> Result<()> {
        let current = self.autoresponder_status()?;
        set_setting(
            &self.db,
            SENDING_STATUS,
            &SendingStatus {
                status: Status::InProgress,
                updated_at: Some(now),
                ..current
            },
        )
    }

    pub fn finish_autoresponders(&self, now: DateTime<Utc>) -> Result<()> {
        set_setting(
            &self.db,
            SENDING_STATUS,
            &SendingStatus {
                status: Status::Idle,
                since: now,
                updated_at: None,
            },
        )
    }

    /// Forces every flag back to idle regardless of age. Returns the number
    /// of flags that were set.
    pub fn reset(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut cleared = 0;
        for mut newsletter in self.db.get_collection::<Newsletter>()? {
            if newsletter.is_sending {
                self.release_newsletter(&mut newsletter)?;
                cleared += 1;
            }
        }
        if self.autoresponder_status()?.status == Status::InProgress {
            self.finish_autoresponders(now)?;
            cleared += 1;
        }
        Ok(cleared)
    }
}
