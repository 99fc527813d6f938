use anyhow::Result;
use clap::{Arg, ArgAction, ArgMatches, Command};

use letterbox::dispatch::{NewAutoresponder, ScheduleNewsletter};
use letterbox::Dispatcher;

use crate::util::{read_html, time_arg, uuid_arg, uuid_args};

fn content_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("subject")
            .long("subject")
            .short('s')
            .required(true)
            .help("Subject line, may use {{email}}"),
    )
    .arg(
        Arg::new("file")
            .long("file")
            .short('f')
            .required(true)
            .value_name("PATH")
            .help("Html body, may use {{email}} and {{unsubscribe}}"),
    )
}

pub fn newsletter_cmd() -> Command {
    Command::new("newsletter")
        .subcommand_required(true)
        .display_order(30)
        .about("Manage newsletters")
        .subcommand(content_args(
            Command::new("schedule")
                .arg_required_else_help(true)
                .about("Schedule a newsletter for a list")
                .arg(Arg::new("list").required(true).value_name("LIST_ID"))
                .arg(
                    Arg::new("exclude")
                        .long("exclude")
                        .short('x')
                        .value_name("LIST_ID")
                        .action(ArgAction::Append)
                        .help("Skip contacts on this list, may be repeated"),
                )
                .arg(
                    Arg::new("after")
                        .long("after")
                        .value_name("RFC3339")
                        .help("Don't send before this time, defaults to now"),
                ),
        ))
}

pub fn autoresponder_cmd() -> Command {
    Command::new("autoresponder")
        .subcommand_required(true)
        .display_order(31)
        .about("Manage autoresponders")
        .subcommand(content_args(
            Command::new("create")
                .arg_required_else_help(true)
                .about("Send a message a number of days after contacts confirm")
                .arg(Arg::new("list").required(true).value_name("LIST_ID"))
                .arg(
                    Arg::new("delay")
                        .long("delay")
                        .short('d')
                        .required(true)
                        .value_name("DAYS")
                        .value_parser(clap::value_parser!(u32)),
                ),
        ))
}

pub async fn newsletter(matches: &ArgMatches, dispatcher: &Dispatcher) -> Result<()> {
    match matches.subcommand() {
        Some(("schedule", m)) => {
            let newsletter = dispatcher.schedule_newsletter(ScheduleNewsletter {
                list_id: uuid_arg(m, "list")?,
                exclude: uuid_args(m, "exclude")?,
                subject: m.get_one::<String>("subject").cloned().unwrap_or_default(),
                html: read_html(m, "file").await?,
                to_send_after: time_arg(m, "after")?,
            })?;
            println!(
                "Scheduled newsletter {} for {}",
                newsletter.id, newsletter.to_send_after
            );
        }
        _ => unreachable!("subcommand is required"),
    }
    Ok(())
}

pub async fn autoresponder(matches: &ArgMatches, dispatcher: &Dispatcher) -> Result<()> {
    match matches.subcommand() {
        Some(("create", m)) => {
            let autoresponder = dispatcher.create_autoresponder(NewAutoresponder {
                list_id: uuid_arg(m, "list")?,
                delay_days: m.get_one::<u32>("delay").copied().unwrap_or_default(),
                subject: m.get_one::<String>("subject").cloned().unwrap_or_default(),
                html: read_html(m, "file").await?,
            })?;
            println!("Created autoresponder {}", autoresponder.id);
        }
        _ => unreachable!("subcommand is required"),
    }
    Ok(())
}
