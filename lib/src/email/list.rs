//! Mailing lists and their contacts.
//!
//! A contact is a single (email, list) subscription. The same address can be
//! subscribed to many lists, each subscription with its own confirmation and
//! unsubscribe state. Contacts of a list are kept in a dedicated collection
//! so that reading a list yields its contacts in signup order.

use chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::ValidateEmail;

use crate::db::{Collectable, CollectableAt, Database, Identifiable};
use crate::template::TemplateId;
use crate::{ErrorKind, Result};

pub type ListId = Uuid;
pub type ContactId = Uuid;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct List {
    pub id: ListId,
    pub name: String,

    /// Template of the opt-in message sent on signup. Lists without one
    /// don't send anything on signup.
    pub confirmation_template: Option<TemplateId>,

    /// Where to send the visitor after a successful signup.
    pub signup_redirect: String,
    /// Where to send the visitor after confirming their subscription.
    pub confirmation_redirect: String,
    /// Where to send the visitor after unsubscribing.
    pub unsubscribe_redirect: String,

    pub created_at: DateTime<Utc>,
}

impl Collectable for List {
    fn get_collection_name() -> &'static str {
        "list"
    }
}

impl Identifiable for List {
    fn get_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Clone, Debug, Default)]
pub struct NewList {
    pub name: String,
    pub confirmation_template: Option<TemplateId>,
    pub signup_redirect: String,
    pub confirmation_redirect: String,
    pub unsubscribe_redirect: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Contact {
    pub id: ContactId,
    pub list_id: ListId,
    pub email: String,

    /// Signup time.
    pub created_at: DateTime<Utc>,
    /// Set once the contact opts in.
    pub confirmed_at: Option<DateTime<Utc>>,
    /// Set once the contact opts out.
    pub unsubscribed_at: Option<DateTime<Utc>>,
}

impl CollectableAt for Contact {
    fn get_collection_name_at(list: Uuid) -> String {
        format!("contact_{list}")
    }
}

impl Identifiable for Contact {
    fn get_id(&self) -> Uuid {
        self.id
    }
}

impl Contact {
    pub fn new(list_id: ListId, email: String) -> Self {
        Self {
            id: crate::db::new_id(),
            list_id,
            email,
            created_at: Utc::now(),
            confirmed_at: None,
            unsubscribed_at: None,
        }
    }

    /// Confirmed and still subscribed.
    pub fn is_eligible(&self) -> bool {
        self.confirmed_at.is_some() && self.unsubscribed_at.is_none()
    }

    pub fn confirm(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.confirmed_at.is_some() {
            return Err(ErrorKind::AlreadyConfirmed.into());
        }
        self.confirmed_at = Some(now);
        Ok(())
    }

    pub fn unsubscribe(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.unsubscribed_at.is_some() {
            return Err(ErrorKind::AlreadyUnsubscribed.into());
        }
        self.unsubscribed_at = Some(now);
        Ok(())
    }
}

/// A list along with all of its contacts, in storage order.
#[derive(Clone, Debug)]
pub struct ListWithContacts {
    pub list: List,
    pub contacts: Vec<Contact>,
}

/// Lowercases and trims the address, rejecting anything that doesn't look
/// like an email.
pub fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    if !email.validate_email() {
        return Err(ErrorKind::BadInput(format!("invalid email address: {email}")).into());
    }
    Ok(email)
}

pub fn create_list(db: &Database, new: NewList) -> Result<List> {
    if new.name.trim().is_empty() {
        return Err(ErrorKind::BadInput("list name must not be empty".to_string()).into());
    }
    let list = List {
        id: crate::db::new_id(),
        name: new.name,
        confirmation_template: new.confirmation_template,
        signup_redirect: new.signup_redirect,
        confirmation_redirect: new.confirmation_redirect,
        unsubscribe_redirect: new.unsubscribe_redirect,
        created_at: Utc::now(),
    };
    db.set(&list)?;
    Ok(list)
}

pub fn get_lists(db: &Database) -> Result<Vec<List>> {
    db.get_collection()
}

/// Fetches a list with its contacts. A list that doesn't exist is `None`.
pub fn get_list(db: &Database, id: ListId) -> Result<Option<ListWithContacts>> {
    let Some(list) = db.get::<List>(id)? else {
        return Ok(None);
    };
    let contacts = get_contacts(db, id)?;
    Ok(Some(ListWithContacts { list, contacts }))
}

pub fn get_contacts(db: &Database, list: ListId) -> Result<Vec<Contact>> {
    db.get_collection_at(Contact::get_collection_name_at(list))
}

pub fn get_contact(db: &Database, list: ListId, id: ContactId) -> Result<Option<Contact>> {
    db.get_at(Contact::get_collection_name_at(list), id)
}

/// Adds a new, unconfirmed contact to the list.
pub fn add_contact(db: &Database, list_id: ListId, email: &str) -> Result<Contact> {
    let email = normalize_email(email)?;
    if db.get::<List>(list_id)?.is_none() {
        return Err(ErrorKind::NotFound(format!("list {list_id}")).into());
    }
    if get_contacts(db, list_id)?.iter().any(|c| c.email == email) {
        return Err(ErrorKind::ContactExists {
            email,
            list: list_id,
        }
        .into());
    }
    let contact = Contact::new(list_id, email);
    db.set_at(Contact::get_collection_name_at(list_id), &contact)?;
    Ok(contact)
}

pub fn confirm_contact(db: &Database, list: ListId, id: ContactId) -> Result<Contact> {
    update_contact(db, list, id, |c| c.confirm(Utc::now()))
}

pub fn unsubscribe_contact(db: &Database, list: ListId, id: ContactId) -> Result<Contact> {
    update_contact(db, list, id, |c| c.unsubscribe(Utc::now()))
}

fn update_contact(
    db: &Database,
    list: ListId,
    id: ContactId,
    f: impl FnOnce(&mut Contact) -> Result<()>,
) -> Result<Contact> {
    let mut contact = get_contact(db, list, id)?
        .ok_or_else(|| ErrorKind::NotFound(format!("contact {id} on list {list}")))?;
    f(&mut contact)?;
    db.set_at(Contact::get_collection_name_at(list), &contact)?;
    Ok(contact)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(db: &Database) -> List {
        create_list(
            db,
            NewList {
                name: "main".to_string(),
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn addresses_are_normalized_and_unique_per_list() {
        let db = Database::temporary().unwrap();
        let main = list(&db);
        let other = list(&db);

        let contact = add_contact(&db, main.id, "  Ann@Example.com ").unwrap();
        assert_eq!(contact.email, "ann@example.com");

        let err = add_contact(&db, main.id, "ann@example.com").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::ContactExists { .. }));

        // Same address on another list is a separate subscription.
        add_contact(&db, other.id, "ann@example.com").unwrap();
    }

    #[test]
    fn rejects_invalid_address_and_unknown_list() {
        let db = Database::temporary().unwrap();
        let main = list(&db);
        let err = add_contact(&db, main.id, "not-an-email").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::BadInput(_)));

        let err = add_contact(&db, Uuid::now_v7(), "ann@example.com").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::NotFound(_)));
    }

    #[test]
    fn confirmation_and_unsubscribe_happen_once() {
        let db = Database::temporary().unwrap();
        let main = list(&db);
        let contact = add_contact(&db, main.id, "ann@example.com").unwrap();
        assert!(!contact.is_eligible());

        let contact = confirm_contact(&db, main.id, contact.id).unwrap();
        assert!(contact.is_eligible());
        let err = confirm_contact(&db, main.id, contact.id).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::AlreadyConfirmed));

        let contact = unsubscribe_contact(&db, main.id, contact.id).unwrap();
        assert!(!contact.is_eligible());
        let err = unsubscribe_contact(&db, main.id, contact.id).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::AlreadyUnsubscribed));
    }

    #[test]
    fn list_contacts_keep_signup_order() {
        let db = Database::temporary().unwrap();
        let main = list(&db);
        for email in ["c@x.io", "a@x.io", "b@x.io"] {
            add_contact(&db, main.id, email).unwrap();
        }
        let fetched = get_list(&db, main.id).unwrap().unwrap();
        let emails: Vec<_> = fetched.contacts.iter().map(|c| c.email.as_str()).collect();
        assert_eq!(emails, ["c@x.io", "a@x.io", "b@x.io"]);

        assert!(get_list(&db, Uuid::now_v7()).unwrap().is_none());
    }
}
