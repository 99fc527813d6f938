//! Bulk sending of newsletters and autoresponders.
//!
//! Both entry points are meant to be called by a periodic trigger, and
//! triggers may overlap. Each run checks the relevant sending flag, resolves
//! recipients, then walks them in order: skip what the ledger already
//! covers, render, record the attempt, send, mark sent, pace. Failures are
//! contained per recipient (transport) or per job (everything else).

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::db::Database;
use crate::email::list::{self, Contact, ContactId, List, ListId};
use crate::email::{Mailer, OutgoingMessage};
use crate::job::{Autoresponder, JobId, JobKind, Newsletter};
use crate::ledger::{Ledger, LedgerStats};
use crate::pacer::Pacer;
use crate::resolve;
use crate::state::{SendingStatus, StateMachine};
use crate::template::{self, Template, TemplateId};
use crate::{Config, ErrorKind, Result};

#[derive(Clone, Debug)]
pub struct ScheduleNewsletter {
    pub list_id: ListId,
    pub exclude: Vec<ListId>,
    pub subject: String,
    pub html: String,
    /// Earliest time the newsletter may go out.
    pub to_send_after: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewAutoresponder {
    pub list_id: ListId,
    pub delay_days: u32,
    pub subject: String,
    pub html: String,
}

/// Per-job counters of a single run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Tally {
    pub sent: usize,
    pub failed: usize,
    /// Recipients the ledger already covered.
    pub skipped: usize,
    /// Failed recipients that will be tried again on a later run.
    pub retryable: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    /// Every recipient was handled, some possibly for good after running out
    /// of attempts.
    Completed(Tally),
    /// Some recipients failed and will be retried, the job stays due.
    Incomplete(Tally),
    /// Newsletter had nobody left to send to after exclusions.
    Empty,
    /// The job couldn't be processed, see the logs.
    Failed(String),
}

impl Display for JobOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            JobOutcome::Completed(t) | JobOutcome::Incomplete(t) => {
                let label = if matches!(self, JobOutcome::Completed(_)) {
                    "completed"
                } else {
                    "incomplete"
                };
                write!(
                    f,
                    "{label}: {} sent, {} failed ({} to retry), {} skipped",
                    t.sent, t.failed, t.retryable, t.skipped
                )
            }
            JobOutcome::Empty => write!(f, "no recipients, marked as sent"),
            JobOutcome::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobReport {
    pub job_id: JobId,
    pub outcome: JobOutcome,
}

/// Result of one dispatch run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchReport {
    pub kind: JobKind,
    /// Another run held the sending flag, nothing was done.
    pub busy: bool,
    pub jobs: Vec<JobReport>,
}

impl DispatchReport {
    fn new(kind: JobKind) -> Self {
        Self {
            kind,
            busy: false,
            jobs: Vec::new(),
        }
    }

    fn busy(kind: JobKind) -> Self {
        Self {
            busy: true,
            ..Self::new(kind)
        }
    }

    /// Messages sent across all jobs of the run.
    pub fn sent(&self) -> usize {
        self.jobs
            .iter()
            .map(|job| match &job.outcome {
                JobOutcome::Completed(t) | JobOutcome::Incomplete(t) => t.sent,
                _ => 0,
            })
            .sum()
    }
}

impl Display for DispatchReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.busy {
            return write!(f, "{} sending busy, nothing done", self.kind);
        }
        write!(f, "{} run: {} job(s)", self.kind, self.jobs.len())?;
        for job in &self.jobs {
            write!(f, "\n  {}: {}", job.job_id, job.outcome)?;
        }
        Ok(())
    }
}

/// Snapshot of sending state for operators.
#[derive(Clone, Debug)]
pub struct Overview {
    pub newsletters: Vec<(Newsletter, LedgerStats)>,
    pub autoresponders: Vec<(Autoresponder, LedgerStats)>,
    pub autoresponder_status: SendingStatus,
}

/// Sending flag owned by the run in progress.
enum Held<'a> {
    Newsletter(&'a mut Newsletter),
    Autoresponders,
}

pub struct Dispatcher {
    db: Database,
    mailer: Arc<dyn Mailer>,
    ledger: Ledger,
    state: StateMachine,
    pacer: Pacer,
    max_attempts: u32,
    base_url: String,
}

impl Dispatcher {
    pub fn new(db: Database, mailer: Arc<dyn Mailer>, config: &Config) -> Self {
        Self {
            ledger: Ledger::new(db.clone()),
            state: StateMachine::new(db.clone(), config.sending.stale_after()),
            pacer: Pacer::from_config(&config.sending),
            max_attempts: config.sending.max_attempts.max(1),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            mailer,
            db,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn state(&self) -> &StateMachine {
        &self.state
    }

    /// Stores a newsletter along with its template. The include list must
    /// exist, exclude lists are taken as given.
    pub fn schedule_newsletter(&self, schedule: ScheduleNewsletter) -> Result<Newsletter> {
        if self.db.get::<List>(schedule.list_id)?.is_none() {
            return Err(ErrorKind::Resolution(format!("list {} does not exist", schedule.list_id)).into());
        }
        let template = template::create_template(&self.db, schedule.subject, schedule.html)?;
        let newsletter = Newsletter::new(
            schedule.list_id,
            &schedule.exclude,
            template.id,
            schedule.to_send_after,
        )?;
        self.db.set(&newsletter)?;
        info!(
            newsletter = %newsletter.id,
            list = %newsletter.list_id_to_include,
            after = %newsletter.to_send_after,
            "scheduled newsletter"
        );
        Ok(newsletter)
    }

    pub fn create_autoresponder(&self, new: NewAutoresponder) -> Result<Autoresponder> {
        if self.db.get::<List>(new.list_id)?.is_none() {
            return Err(ErrorKind::Resolution(format!("list {} does not exist", new.list_id)).into());
        }
        let template = template::create_template(&self.db, new.subject, new.html)?;
        let autoresponder = Autoresponder::new(new.list_id, new.delay_days, template.id);
        self.db.set(&autoresponder)?;
        info!(
            autoresponder = %autoresponder.id,
            list = %autoresponder.list_id,
            delay_days = autoresponder.delay_days,
            "created autoresponder"
        );
        Ok(autoresponder)
    }

    /// Adds an unconfirmed contact and sends the list's opt-in message, if
    /// the list has one. A failed confirmation send is logged, the contact
    /// is kept.
    pub async fn subscribe(&self, list_id: ListId, email: &str) -> Result<Contact> {
        let contact = list::add_contact(&self.db, list_id, email)?;
        let list = self
            .db
            .get::<List>(list_id)?
            .ok_or_else(|| ErrorKind::NotFound(format!("list {list_id}")))?;

        if let Some(template_id) = list.confirmation_template {
            let template = self.template(template_id)?;
            let mut vars = self.variables(&contact);
            vars.insert(
                "confirmation",
                self.contact_link(list_id, contact.id, "confirm"),
            );
            let rendered = template.render(&vars);
            let message = OutgoingMessage {
                to: contact.email.clone(),
                from: None,
                subject: rendered.subject,
                html: rendered.html,
                text: rendered.text,
            };
            if let Err(e) = self.mailer.send(message).await {
                error!(email = %contact.email, list = %list_id, "failed sending confirmation: {e}");
            }
        }
        Ok(contact)
    }

    /// Confirms the contact, returning where to redirect the visitor.
    pub fn confirm(&self, list_id: ListId, contact: ContactId) -> Result<String> {
        list::confirm_contact(&self.db, list_id, contact)?;
        Ok(self.list(list_id)?.confirmation_redirect)
    }

    /// Unsubscribes the contact, returning where to redirect the visitor.
    pub fn unsubscribe(&self, list_id: ListId, contact: ContactId) -> Result<String> {
        list::unsubscribe_contact(&self.db, list_id, contact)?;
        Ok(self.list(list_id)?.unsubscribe_redirect)
    }

    /// Forces all sending flags back to idle. For operators recovering from
    /// a crash without waiting for the staleness threshold.
    pub fn reset(&self) -> Result<usize> {
        let cleared = self.state.reset(Utc::now())?;
        warn!(cleared, "sending flags reset");
        Ok(cleared)
    }

    pub fn overview(&self) -> Result<Overview> {
        let mut newsletters = Vec::new();
        for newsletter in self.db.get_collection::<Newsletter>()? {
            let stats = self.ledger.stats(newsletter.id)?;
            newsletters.push((newsletter, stats));
        }
        let mut autoresponders = Vec::new();
        for autoresponder in self.db.get_collection::<Autoresponder>()? {
            let stats = self.ledger.stats(autoresponder.id)?;
            autoresponders.push((autoresponder, stats));
        }
        Ok(Overview {
            newsletters,
            autoresponders,
            autoresponder_status: self.state.autoresponder_status()?,
        })
    }

    /// Sends every newsletter that is due and not yet sent, oldest schedule
    /// first. Does nothing while another newsletter is being sent.
    pub async fn run_newsletter_dispatch(&self) -> Result<DispatchReport> {
        let now = Utc::now();
        match self.state.check_newsletters_idle(now) {
            Err(e) if e.is_state_conflict() => {
                info!("busy, skipping newsletter run: {}", e.kind);
                return Ok(DispatchReport::busy(JobKind::Newsletter));
            }
            other => other?,
        }

        let mut due: Vec<Newsletter> = self
            .db
            .get_collection::<Newsletter>()?
            .into_iter()
            .filter(|n| n.is_due(now))
            .collect();
        due.sort_by_key(|n| (n.to_send_after, n.created_at));

        let mut report = DispatchReport::new(JobKind::Newsletter);
        for newsletter in due {
            let job_id = newsletter.id;
            let outcome = match self
                .send_newsletter(newsletter)
                .instrument(info_span!("newsletter", id = %job_id))
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(newsletter = %job_id, "newsletter dispatch failed: {e}");
                    JobOutcome::Failed(e.kind.to_string())
                }
            };
            report.jobs.push(JobReport { job_id, outcome });
        }
        Ok(report)
    }

    async fn send_newsletter(&self, mut newsletter: Newsletter) -> Result<JobOutcome> {
        let exclude = newsletter.excluded_lists()?;
        let recipients =
            resolve::resolve_recipients(&self.db, newsletter.list_id_to_include, &exclude)?;
        let template = self.template(newsletter.template_id)?;

        if recipients.is_empty() {
            self.state.complete_newsletter(&mut newsletter, Utc::now())?;
            warn!("no recipients left after exclusions, newsletter marked as sent");
            return Ok(JobOutcome::Empty);
        }

        self.state.begin_newsletter(&mut newsletter, Utc::now())?;
        info!(recipients = recipients.len(), "sending newsletter");

        let job_id = newsletter.id;
        let sent = self
            .send_to_recipients(
                job_id,
                JobKind::Newsletter,
                &template,
                &recipients,
                &mut Held::Newsletter(&mut newsletter),
            )
            .await;
        let tally = match sent {
            Ok(tally) => tally,
            Err(e) => {
                // Leave it unsent so that a later trigger picks it up again.
                if let Err(release) = self.state.release_newsletter(&mut newsletter) {
                    error!("failed releasing newsletter sending flag: {release}");
                }
                return Err(e);
            }
        };

        if tally.retryable > 0 {
            self.state.release_newsletter(&mut newsletter)?;
            warn!(
                sent = tally.sent,
                retryable = tally.retryable,
                "newsletter run incomplete, failed recipients will be retried"
            );
            return Ok(JobOutcome::Incomplete(tally));
        }

        self.state.complete_newsletter(&mut newsletter, Utc::now())?;
        info!(sent = tally.sent, failed = tally.failed, skipped = tally.skipped, "newsletter sent");
        Ok(JobOutcome::Completed(tally))
    }

    /// Evaluates every autoresponder against contacts confirmed within its
    /// window. Does nothing while another autoresponder run is in progress.
    pub async fn run_autoresponder_dispatch(&self) -> Result<DispatchReport> {
        let now = Utc::now();
        match self.state.begin_autoresponders(now) {
            Err(e) if e.is_state_conflict() => {
                info!("busy, skipping autoresponder run: {}", e.kind);
                return Ok(DispatchReport::busy(JobKind::Autoresponder));
            }
            other => other?,
        }

        let mut report = DispatchReport::new(JobKind::Autoresponder);
        let autoresponders = match self.db.get_collection::<Autoresponder>() {
            Ok(autoresponders) => autoresponders,
            Err(e) => {
                self.state.finish_autoresponders(Utc::now())?;
                return Err(e);
            }
        };

        for autoresponder in autoresponders {
            let job_id = autoresponder.id;
            let outcome = match self
                .send_autoresponder(&autoresponder, now)
                .instrument(info_span!("autoresponder", id = %job_id))
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(autoresponder = %job_id, "autoresponder dispatch failed: {e}");
                    JobOutcome::Failed(e.kind.to_string())
                }
            };
            report.jobs.push(JobReport { job_id, outcome });
        }

        self.state.finish_autoresponders(Utc::now())?;
        Ok(report)
    }

    async fn send_autoresponder(
        &self,
        autoresponder: &Autoresponder,
        now: DateTime<Utc>,
    ) -> Result<JobOutcome> {
        let recipients = resolve::resolve_autoresponder_recipients(&self.db, autoresponder, now)?;
        let template = self.template(autoresponder.template_id)?;
        debug!(recipients = recipients.len(), "evaluated autoresponder");

        let tally = self
            .send_to_recipients(
                autoresponder.id,
                JobKind::Autoresponder,
                &template,
                &recipients,
                &mut Held::Autoresponders,
            )
            .await?;
        if tally.retryable > 0 {
            Ok(JobOutcome::Incomplete(tally))
        } else {
            Ok(JobOutcome::Completed(tally))
        }
    }

    /// Sends the job's message to each recipient not yet covered by the
    /// ledger, pacing after every attempt and refreshing the held flag.
    async fn send_to_recipients(
        &self,
        job_id: JobId,
        kind: JobKind,
        template: &Template,
        recipients: &[Contact],
        held: &mut Held<'_>,
    ) -> Result<Tally> {
        let mut known = self.ledger.attempts(job_id)?;
        let mut tally = Tally::default();

        for contact in recipients {
            let retry = match known.remove(&contact.email) {
                Some(entry) if entry.sent_at.is_some() || entry.attempts >= self.max_attempts => {
                    tally.skipped += 1;
                    continue;
                }
                Some(_) => true,
                None => false,
            };

            let rendered = template.render(&self.variables(contact));

            let entry = if retry {
                self.ledger.record_retry(job_id, &contact.email)?
            } else {
                match self.ledger.record_attempt(job_id, kind, &contact.email) {
                    Ok(entry) => entry,
                    Err(e) if e.is_duplicate_attempt() => {
                        // Another run got to this recipient in the meantime.
                        debug!(email = %contact.email, "already attempted, skipping");
                        tally.skipped += 1;
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            };

            let message = OutgoingMessage {
                to: contact.email.clone(),
                from: None,
                subject: rendered.subject,
                html: rendered.html,
                text: rendered.text,
            };
            match self.mailer.send(message).await {
                Ok(()) => {
                    self.ledger.mark_sent(job_id, &contact.email)?;
                    tally.sent += 1;
                }
                Err(e) => {
                    warn!(
                        email = %contact.email,
                        attempt = entry.attempts,
                        "failed sending message: {}",
                        e.kind
                    );
                    tally.failed += 1;
                    if entry.attempts < self.max_attempts {
                        tally.retryable += 1;
                    }
                }
            }

            self.pacer.pace(kind).await;
            self.keep_alive(held)?;
        }

        Ok(tally)
    }

    fn keep_alive(&self, held: &mut Held<'_>) -> Result<()> {
        let now = Utc::now();
        match held {
            Held::Newsletter(newsletter) => self.state.keep_newsletter_alive(newsletter, now),
            Held::Autoresponders => self.state.keep_autoresponders_alive(now),
        }
    }

    fn template(&self, id: TemplateId) -> Result<Template> {
        template::get_template(&self.db, id)
            .map_err(|e| ErrorKind::Resolution(format!("failed fetching template {id}: {e}")))?
            .ok_or_else(|| ErrorKind::Resolution(format!("template {id} does not exist")).into())
    }

    fn list(&self, id: ListId) -> Result<List> {
        self.db
            .get::<List>(id)?
            .ok_or_else(|| ErrorKind::NotFound(format!("list {id}")).into())
    }

    fn variables(&self, contact: &Contact) -> HashMap<&'static str, String> {
        let mut vars = HashMap::new();
        vars.insert("email", contact.email.clone());
        vars.insert(
            "unsubscribe",
            self.contact_link(contact.list_id, contact.id, "unsubscribe"),
        );
        vars
    }

    fn contact_link(&self, list: ListId, contact: ContactId, action: &str) -> String {
        format!(
            "{}/lists/{list}/contacts/{contact}/{action}",
            self.base_url
        )
    }
}
