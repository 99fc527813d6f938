use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Arg, ArgAction, ArgMatches, Command};
use tokio_util::sync::CancellationToken;

use letterbox::{Config, DispatchReport, Dispatcher, JobKind};

pub fn cmd() -> Command {
    Command::new("run")
        .display_order(1)
        .about("Keep dispatching newsletters and autoresponders until interrupted")
        .arg(
            Arg::new("interval")
                .long("interval")
                .value_name("SECS")
                .value_parser(clap::value_parser!(u64))
                .help("Seconds between triggers, overrides the config"),
        )
        .arg(
            Arg::new("once")
                .long("once")
                .action(ArgAction::SetTrue)
                .help("Trigger both dispatchers a single time and exit"),
        )
}

pub fn send_cmd() -> Command {
    Command::new("send")
        .display_order(2)
        .arg_required_else_help(true)
        .about("Trigger a single dispatch run")
        .arg(
            Arg::new("kind")
                .required(true)
                .value_parser(["newsletters", "autoresponders"]),
        )
}

pub async fn run(
    matches: &ArgMatches,
    dispatcher: Arc<Dispatcher>,
    config: &Config,
    cancel: CancellationToken,
) -> Result<()> {
    let interval = matches
        .get_one::<u64>("interval")
        .map(|secs| Duration::from_secs(*secs))
        .unwrap_or(config.sending.interval());

    if matches.get_flag("once") {
        log_report(JobKind::Newsletter, dispatcher.run_newsletter_dispatch().await);
        log_report(
            JobKind::Autoresponder,
            dispatcher.run_autoresponder_dispatch().await,
        );
        return Ok(());
    }

    tracing::info!(?interval, "dispatching");

    // The two kinds run as separate loops so a long newsletter doesn't hold
    // up autoresponders.
    let newsletters = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(repeat(JobKind::Newsletter, interval, cancel.clone(), move || {
            let dispatcher = dispatcher.clone();
            async move { dispatcher.run_newsletter_dispatch().await }
        }))
    };
    let autoresponders = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(repeat(JobKind::Autoresponder, interval, cancel.clone(), move || {
            let dispatcher = dispatcher.clone();
            async move { dispatcher.run_autoresponder_dispatch().await }
        }))
    };

    newsletters.await?;
    autoresponders.await?;
    Ok(())
}

pub async fn send(matches: &ArgMatches, dispatcher: &Dispatcher) -> Result<()> {
    let report = match matches.get_one::<String>("kind").map(String::as_str) {
        Some("newsletters") => dispatcher.run_newsletter_dispatch().await?,
        Some("autoresponders") => dispatcher.run_autoresponder_dispatch().await?,
        _ => unreachable!("kind is required"),
    };
    println!("{report}");
    Ok(())
}

/// Triggers `dispatch` every `interval` until cancelled. A run in progress
/// is always finished before checking for cancellation.
async fn repeat<F, Fut>(kind: JobKind, interval: Duration, cancel: CancellationToken, dispatch: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = letterbox::Result<DispatchReport>>,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => log_report(kind, dispatch().await),
            _ = cancel.cancelled() => break,
        }
    }
    tracing::debug!(%kind, "dispatch loop stopped");
}

fn log_report(kind: JobKind, report: letterbox::Result<DispatchReport>) {
    match report {
        Ok(report) if report.busy || !report.jobs.is_empty() => {
            tracing::info!(%kind, sent = report.sent(), "{report}")
        }
        Ok(_) => (),
        Err(e) => tracing::error!(%kind, "dispatch run failed: {e}"),
    }
}
