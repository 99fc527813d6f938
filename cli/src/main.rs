mod contact;
mod job;
mod list;
mod run;
mod status;

mod util;

use std::sync::Arc;

use clap::{Arg, ArgAction, Command};
use letterbox::{config, tracing::Level, Config, Database, Dispatcher, LogMailer, Mailer, SmtpMailer};
use tokio_util::sync::CancellationToken;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cancel = CancellationToken::new();

    // Without a config file in the working directory we go with defaults,
    // the `--config` argument can still point to one elsewhere.
    let mut config: Config = config::load().unwrap_or_default();

    let matches = cmd().get_matches();

    if let Some(config_path) = matches.get_one::<String>("config") {
        config = config::load_from(config_path)?;
    }
    if let Some(verbosity) = matches.get_one::<String>("verbosity") {
        config.tracing.level = verbosity.parse::<Level>()?;
    }
    letterbox::tracing::init(&config)?;

    let db = Database::open(&config.db.path)?;
    let mailer: Arc<dyn Mailer> = if matches.get_flag("dry-run") {
        Arc::new(LogMailer)
    } else {
        Arc::new(SmtpMailer::new(&config.email)?)
    };
    let dispatcher = Arc::new(Dispatcher::new(db.clone(), mailer, &config));

    // Long running subcommands listen for ctrl_c themselves, everything else
    // is done by the time it returns.
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("Initiating graceful shutdown...");
            watcher.cancel();
        }
    });

    match matches.subcommand() {
        Some(("run", m)) => run::run(m, dispatcher.clone(), &config, cancel.clone()).await?,
        Some(("send", m)) => run::send(m, &dispatcher).await?,
        Some(("reset", _)) => status::reset(&dispatcher)?,
        Some(("status", _)) => status::status(&dispatcher)?,
        Some(("report", m)) => status::report(m, &dispatcher)?,
        Some(("list", m)) => list::run(m, &db)?,
        Some(("contact", m)) => contact::run(m, &dispatcher).await?,
        Some(("newsletter", m)) => job::newsletter(m, &dispatcher).await?,
        Some(("autoresponder", m)) => job::autoresponder(m, &dispatcher).await?,
        _ => unreachable!("subcommand is required"),
    }

    db.flush()?;

    Ok(())
}

pub fn cmd() -> Command {
    Command::new("letterbox")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .infer_subcommands(true)
        .version(VERSION)
        .about("Newsletters and autoresponders for mailing lists.")
        .subcommand(run::cmd())
        .subcommand(run::send_cmd())
        .subcommand(Command::new("reset").about("Force all sending flags back to idle"))
        .subcommand(Command::new("status").about("Show sending progress of all jobs"))
        .subcommand(status::report_cmd())
        .subcommand(list::cmd())
        .subcommand(contact::cmd())
        .subcommand(job::newsletter_cmd())
        .subcommand(job::autoresponder_cmd())
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_name("PATH")
                .global(true)
                .help("Path to the config file"),
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Log messages instead of sending them"),
        )
        .arg(
            Arg::new("verbosity")
                .long("verbosity")
                .short('v')
                .display_order(100)
                .value_name("level")
                .value_parser(["trace", "debug", "info", "warn", "error", "none"])
                .global(true)
                .help("Set the verbosity of the log output"),
        )
}
