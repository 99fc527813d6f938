use anyhow::{Error, Result};
use clap::{Arg, ArgMatches, Command};

use letterbox::email::list::{self, NewList};
use letterbox::Database;

use crate::util::uuid_arg;

pub fn cmd() -> Command {
    Command::new("list")
        .subcommand_required(true)
        .display_order(20)
        .about("Manage mailing lists")
        .subcommand(
            Command::new("create")
                .arg_required_else_help(true)
                .about("Create a new mailing list")
                .arg(Arg::new("name").required(true))
                .arg(
                    Arg::new("confirmation-template")
                        .long("confirmation-template")
                        .value_name("TEMPLATE_ID")
                        .help("Template sent to new contacts asking to confirm"),
                )
                .arg(Arg::new("signup-redirect").long("signup-redirect").value_name("URL"))
                .arg(
                    Arg::new("confirmation-redirect")
                        .long("confirmation-redirect")
                        .value_name("URL"),
                )
                .arg(
                    Arg::new("unsubscribe-redirect")
                        .long("unsubscribe-redirect")
                        .value_name("URL"),
                ),
        )
        .subcommand(
            Command::new("show")
                .about("Show all lists, or the contacts of one")
                .arg(Arg::new("list").value_name("LIST_ID").num_args(0..=1)),
        )
}

pub fn run(matches: &ArgMatches, db: &Database) -> Result<()> {
    match matches.subcommand() {
        Some(("create", m)) => {
            let confirmation_template = match m.contains_id("confirmation-template") {
                true => Some(uuid_arg(m, "confirmation-template")?),
                false => None,
            };
            let redirect = |name: &str| m.get_one::<String>(name).cloned().unwrap_or_default();
            let created = list::create_list(
                db,
                NewList {
                    name: m.get_one::<String>("name").cloned().unwrap_or_default(),
                    confirmation_template,
                    signup_redirect: redirect("signup-redirect"),
                    confirmation_redirect: redirect("confirmation-redirect"),
                    unsubscribe_redirect: redirect("unsubscribe-redirect"),
                },
            )?;
            println!("Created list `{}` with id {}", created.name, created.id);
        }
        Some(("show", m)) if m.contains_id("list") => {
            let id = uuid_arg(m, "list")?;
            let found = list::get_list(db, id)?
                .ok_or_else(|| Error::msg(format!("list {id} does not exist")))?;
            println!(
                "List `{}` has {} contact(s):",
                found.list.name,
                found.contacts.len()
            );
            for contact in found.contacts {
                let state = if contact.unsubscribed_at.is_some() {
                    "unsubscribed"
                } else if contact.confirmed_at.is_some() {
                    "confirmed"
                } else {
                    "unconfirmed"
                };
                println!("  {} {} ({state})", contact.id, contact.email);
            }
        }
        Some(("show", _)) => {
            for found in list::get_lists(db)? {
                println!("{} {}", found.id, found.name);
            }
        }
        _ => unreachable!("subcommand is required"),
    }

    Ok(())
}
