//! Durable per-recipient record of send attempts.
//!
//! Each job gets its own collection keyed by recipient address, so there is
//! at most one row per (job, email). A row with `sent_at == None` means the
//! message was attempted but never confirmed sent, e.g. the transport failed
//! or the process died mid-send.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::{CollectableAt, Database};
use crate::job::{JobId, JobKind};
use crate::{ErrorKind, Result};

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct SendingLogEntry {
    pub job_id: JobId,
    pub kind: JobKind,
    pub email: String,
    /// Start of the latest attempt.
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    /// Number of times sending was attempted, starting at 1.
    pub attempts: u32,
}

impl CollectableAt for SendingLogEntry {
    fn get_collection_name_at(job: Uuid) -> String {
        format!("sending_log_{job}")
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LedgerStats {
    pub attempted: usize,
    pub sent: usize,
    /// Attempted but not confirmed sent.
    pub pending: usize,
}

#[derive(Clone, Debug)]
pub struct Ledger {
    db: Database,
}

impl Ledger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Records that sending to `email` is about to be attempted.
    ///
    /// Fails with `DuplicateAttempt` if the job already has a row for this
    /// address, which callers should treat as "already handled".
    pub fn record_attempt(&self, job_id: JobId, kind: JobKind, email: &str) -> Result<SendingLogEntry> {
        let entry = SendingLogEntry {
            job_id,
            kind,
            email: email.to_string(),
            created_at: Utc::now(),
            sent_at: None,
            attempts: 1,
        };
        let inserted = self.db.insert_new_at(
            SendingLogEntry::get_collection_name_at(job_id),
            email,
            &entry,
        )?;
        if !inserted {
            return Err(ErrorKind::DuplicateAttempt {
                job: job_id,
                email: email.to_string(),
            }
            .into());
        }
        Ok(entry)
    }

    /// Starts another attempt on a row that was never confirmed sent.
    pub fn record_retry(&self, job_id: JobId, email: &str) -> Result<SendingLogEntry> {
        self.update(job_id, email, |entry| {
            entry.attempts += 1;
            entry.created_at = Utc::now();
        })
    }

    pub fn mark_sent(&self, job_id: JobId, email: &str) -> Result<SendingLogEntry> {
        self.update(job_id, email, |entry| entry.sent_at = Some(Utc::now()))
    }

    fn update(
        &self,
        job_id: JobId,
        email: &str,
        f: impl FnOnce(&mut SendingLogEntry),
    ) -> Result<SendingLogEntry> {
        let collection = SendingLogEntry::get_collection_name_at(job_id);
        let mut entry: SendingLogEntry = self.db.get_at(&collection, email)?.ok_or_else(|| {
            ErrorKind::NotFound(format!("no ledger entry for {email} in job {job_id}"))
        })?;
        f(&mut entry);
        self.db.set_raw_at(&collection, email, &entry)?;
        Ok(entry)
    }

    /// Single address lookup, for callers outside a dispatch run. The
    /// dispatcher loads everything at once through `attempts`.
    pub fn has_attempted(&self, job_id: JobId, email: &str) -> Result<bool> {
        Ok(self
            .db
            .get_at::<SendingLogEntry>(SendingLogEntry::get_collection_name_at(job_id), email)?
            .is_some())
    }

    /// Every row of the job keyed by address. Meant to be loaded once per
    /// dispatch run instead of asking per recipient.
    pub fn attempts(&self, job_id: JobId) -> Result<HashMap<String, SendingLogEntry>> {
        Ok(self
            .entries(job_id)?
            .into_iter()
            .map(|entry| (entry.email.clone(), entry))
            .collect())
    }

    pub fn entries(&self, job_id: JobId) -> Result<Vec<SendingLogEntry>> {
        self.db
            .get_collection_at(SendingLogEntry::get_collection_name_at(job_id))
    }

    pub fn stats(&self, job_id: JobId) -> Result<LedgerStats> {
        let entries = self.entries(job_id)?;
        let sent = entries.iter().filter(|e| e.sent_at.is_some()).count();
        Ok(LedgerStats {
            attempted: entries.len(),
            sent,
            pending: entries.len() - sent,
        })
    }
}
