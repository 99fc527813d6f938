#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;

use letterbox::config::Sending;
use letterbox::db::CollectableAt;
use letterbox::dispatch::{ScheduleNewsletter, Tally};
use letterbox::email::list::{self, ListId, NewList};
use letterbox::email::OutgoingMessage;
use letterbox::{Config, Contact, Database, Dispatcher, ErrorKind, JobOutcome, Mailer, Newsletter};

/// Mailer keeping everything it's asked to send, failing for selected
/// addresses.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<(OutgoingMessage, Instant)>>,
    /// Every call, failed ones included.
    attempts: Mutex<Vec<(String, Instant)>>,
    failing: Mutex<HashSet<String>>,
    /// Time each send takes.
    latency: Duration,
}

impl RecordingMailer {
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Default::default()
        }
    }

    pub fn fail_for(&self, email: &str) {
        self.failing.lock().unwrap().insert(email.to_string());
    }

    pub fn recover(&self, email: &str) {
        self.failing.lock().unwrap().remove(email);
    }

    pub fn attempted_at(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().iter().map(|(_, at)| *at).collect()
    }

    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(message, _)| message.clone())
            .collect()
    }

    pub fn recipients(&self) -> Vec<String> {
        self.sent().into_iter().map(|m| m.to).collect()
    }

    pub fn sent_at(&self) -> Vec<Instant> {
        self.sent.lock().unwrap().iter().map(|(_, at)| *at).collect()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: OutgoingMessage) -> letterbox::Result<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.attempts
            .lock()
            .unwrap()
            .push((message.to.clone(), Instant::now()));
        if self.failing.lock().unwrap().contains(&message.to) {
            return Err(ErrorKind::Transport(format!("relay refused {}", message.to)).into());
        }
        self.sent.lock().unwrap().push((message, Instant::now()));
        Ok(())
    }
}

/// Config without pacing, suitable for most tests.
pub fn config() -> Config {
    Config {
        sending: Sending {
            newsletter_rate: 0,
            autoresponder_rate: 0,
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn setup() -> (Dispatcher, Arc<RecordingMailer>) {
    setup_with(config())
}

pub fn setup_with(config: Config) -> (Dispatcher, Arc<RecordingMailer>) {
    let db = Database::temporary().unwrap();
    let mailer = Arc::new(RecordingMailer::default());
    let dispatcher = Dispatcher::new(db, mailer.clone(), &config);
    (dispatcher, mailer)
}

pub fn create_list(db: &Database, name: &str) -> ListId {
    list::create_list(
        db,
        NewList {
            name: name.to_string(),
            ..Default::default()
        },
    )
    .unwrap()
    .id
}

/// Stores a contact in the given state directly, bypassing the signup flow.
pub fn add_contact(
    db: &Database,
    list_id: ListId,
    email: &str,
    confirmed_at: Option<DateTime<Utc>>,
    unsubscribed: bool,
) -> Contact {
    let mut contact = Contact::new(list_id, email.to_string());
    contact.confirmed_at = confirmed_at;
    if unsubscribed {
        contact.unsubscribed_at = Some(Utc::now());
    }
    db.set_at(Contact::get_collection_name_at(list_id), &contact)
        .unwrap();
    contact
}

pub fn add_confirmed(db: &Database, list_id: ListId, email: &str) -> Contact {
    add_contact(db, list_id, email, Some(Utc::now()), false)
}

pub fn schedule(dispatcher: &Dispatcher, list_id: ListId, exclude: Vec<ListId>) -> Newsletter {
    dispatcher
        .schedule_newsletter(ScheduleNewsletter {
            list_id,
            exclude,
            subject: "News for {{email}}".to_string(),
            html: "<p>Hello</p><p><a href=\"{{unsubscribe}}\">unsubscribe</a></p>".to_string(),
            to_send_after: Utc::now() - chrono::Duration::minutes(1),
        })
        .unwrap()
}

pub fn tally(outcome: &JobOutcome) -> Tally {
    match outcome {
        JobOutcome::Completed(tally) | JobOutcome::Incomplete(tally) => *tally,
        other => panic!("expected a tally, got {other:?}"),
    }
}
