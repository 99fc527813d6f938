//! Works out who receives a send job.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::db::Database;
use crate::email::list::{self, Contact, ListId};
use crate::job::Autoresponder;
use crate::{ErrorKind, Result};

/// Eligible contacts of the `include` list whose address isn't on any of the
/// `exclude` lists, in the include list's storage order.
///
/// Every contact of an exclude list counts, confirmed or not. Exclude lists
/// that no longer exist contribute nothing.
pub fn resolve_recipients(
    db: &Database,
    include: ListId,
    exclude: &[ListId],
) -> Result<Vec<Contact>> {
    let included = list::get_list(db, include)
        .map_err(|e| ErrorKind::Resolution(format!("failed fetching list {include}: {e}")))?
        .ok_or_else(|| ErrorKind::Resolution(format!("list {include} does not exist")))?;

    let excluded = exclusion_set(db, exclude)?;

    Ok(included
        .contacts
        .into_iter()
        .filter(|c| c.is_eligible() && !excluded.contains(&c.email))
        .collect())
}

/// Recipients of an autoresponder at `now`: eligible contacts of its list
/// who confirmed within the autoresponder's delay window.
pub fn resolve_autoresponder_recipients(
    db: &Database,
    autoresponder: &Autoresponder,
    now: DateTime<Utc>,
) -> Result<Vec<Contact>> {
    let mut contacts = resolve_recipients(db, autoresponder.list_id, &[])?;
    contacts.retain(|c| {
        c.confirmed_at
            .is_some_and(|confirmed| autoresponder.in_window(confirmed, now))
    });
    Ok(contacts)
}

fn exclusion_set(db: &Database, lists: &[ListId]) -> Result<HashSet<String>> {
    let mut emails = HashSet::new();
    for id in lists {
        match list::get_list(db, *id) {
            Ok(Some(excluded)) => emails.extend(excluded.contacts.into_iter().map(|c| c.email)),
            Ok(None) => tracing::debug!(list = %id, "excluded list no longer exists, ignoring"),
            Err(e) => {
                return Err(ErrorKind::Resolution(format!(
                    "failed fetching excluded list {id}: {e}"
                ))
                .into())
            }
        }
    }
    Ok(emails)
}
