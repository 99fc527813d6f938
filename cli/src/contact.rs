use anyhow::Result;
use clap::{Arg, ArgMatches, Command};

use letterbox::Dispatcher;

use crate::util::uuid_arg;

pub fn cmd() -> Command {
    let list = Arg::new("list").required(true).value_name("LIST_ID");
    let contact = Arg::new("contact").required(true).value_name("CONTACT_ID");
    Command::new("contact")
        .subcommand_required(true)
        .display_order(21)
        .about("Manage contacts of a mailing list")
        .subcommand(
            Command::new("add")
                .arg_required_else_help(true)
                .about("Subscribe an address, sending the list's confirmation message")
                .arg(list.clone())
                .arg(Arg::new("email").required(true)),
        )
        .subcommand(
            Command::new("confirm")
                .arg_required_else_help(true)
                .about("Confirm a contact on their behalf")
                .arg(list.clone())
                .arg(contact.clone()),
        )
        .subcommand(
            Command::new("unsubscribe")
                .arg_required_else_help(true)
                .about("Unsubscribe a contact")
                .arg(list)
                .arg(contact),
        )
}

pub async fn run(matches: &ArgMatches, dispatcher: &Dispatcher) -> Result<()> {
    match matches.subcommand() {
        Some(("add", m)) => {
            let list = uuid_arg(m, "list")?;
            let email = m.get_one::<String>("email").cloned().unwrap_or_default();
            let contact = dispatcher.subscribe(list, &email).await?;
            println!("Added {} with id {}", contact.email, contact.id);
        }
        Some(("confirm", m)) => {
            dispatcher.confirm(uuid_arg(m, "list")?, uuid_arg(m, "contact")?)?;
            println!("Confirmed");
        }
        Some(("unsubscribe", m)) => {
            dispatcher.unsubscribe(uuid_arg(m, "list")?, uuid_arg(m, "contact")?)?;
            println!("Unsubscribed");
        }
        _ => unreachable!("subcommand is required"),
    }

    Ok(())
}
