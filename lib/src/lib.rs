//! Bulk email sending for mailing lists.
//!
//! Newsletters go out once to a list, minus the contacts of any excluded
//! lists. Autoresponders keep going out to contacts a set number of days
//! after they confirmed. Every attempt lands in a per-job ledger so that
//! overlapping or repeated runs never send the same job twice to the same
//! address.

#[macro_use]
extern crate serde_derive;

pub mod config;
pub mod db;
pub mod dispatch;
pub mod email;
pub mod error;
pub mod job;
pub mod ledger;
pub mod pacer;
pub mod resolve;
pub mod state;
pub mod template;
pub mod tracing;

pub use config::Config;
pub use db::Database;
pub use dispatch::{DispatchReport, Dispatcher, JobOutcome};
pub use email::list::{Contact, List};
pub use email::{LogMailer, Mailer, SmtpMailer};
pub use error::{Error, ErrorKind, Result};
pub use job::{Autoresponder, JobKind, Newsletter};
