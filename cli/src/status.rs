use anyhow::Result;
use clap::{Arg, ArgMatches, Command};

use letterbox::Dispatcher;

use crate::util::uuid_arg;

pub fn report_cmd() -> Command {
    Command::new("report")
        .arg_required_else_help(true)
        .about("Show the sending log of a single job")
        .arg(Arg::new("job").required(true).value_name("JOB_ID"))
        .arg(
            Arg::new("email")
                .long("email")
                .short('e')
                .help("Only tell whether this address was attempted"),
        )
}

pub fn reset(dispatcher: &Dispatcher) -> Result<()> {
    let cleared = dispatcher.reset()?;
    println!("Cleared {cleared} sending flag(s)");
    Ok(())
}

pub fn status(dispatcher: &Dispatcher) -> Result<()> {
    let overview = dispatcher.overview()?;

    println!("Newsletters:");
    for (newsletter, stats) in &overview.newsletters {
        println!(
            "  {} [{}] after {}: {} sent, {} pending",
            newsletter.id,
            newsletter.state(),
            newsletter.to_send_after,
            stats.sent,
            stats.pending,
        );
    }

    println!(
        "Autoresponders ({} since {}):",
        overview.autoresponder_status.status, overview.autoresponder_status.since
    );
    for (autoresponder, stats) in &overview.autoresponders {
        println!(
            "  {} list {} after {} day(s): {} sent, {} pending",
            autoresponder.id,
            autoresponder.list_id,
            autoresponder.delay_days,
            stats.sent,
            stats.pending,
        );
    }

    Ok(())
}

pub fn report(matches: &ArgMatches, dispatcher: &Dispatcher) -> Result<()> {
    let job = uuid_arg(matches, "job")?;
    if let Some(email) = matches.get_one::<String>("email") {
        let email = email.trim().to_lowercase();
        match dispatcher.ledger().has_attempted(job, &email)? {
            true => println!("{email} was attempted for job {job}"),
            false => println!("{email} was not attempted for job {job}"),
        }
        return Ok(());
    }
    let entries = dispatcher.ledger().entries(job)?;
    if entries.is_empty() {
        println!("Nothing attempted for job {job}");
        return Ok(());
    }
    for entry in entries {
        match entry.sent_at {
            Some(sent_at) => println!("{} sent at {sent_at}", entry.email),
            None => println!(
                "{} pending after {} attempt(s), last at {}",
                entry.email, entry.attempts, entry.created_at
            ),
        }
    }
    Ok(())
}
