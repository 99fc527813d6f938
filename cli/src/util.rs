use anyhow::{Error, Result};
use chrono::{DateTime, Utc};
use clap::ArgMatches;
use uuid::Uuid;

pub fn uuid_arg(matches: &ArgMatches, name: &str) -> Result<Uuid> {
    let value = matches
        .get_one::<String>(name)
        .ok_or_else(|| Error::msg(format!("missing argument `{name}`")))?;
    value
        .parse()
        .map_err(|e| Error::msg(format!("`{value}` is not a valid id: {e}")))
}

pub fn uuid_args(matches: &ArgMatches, name: &str) -> Result<Vec<Uuid>> {
    matches
        .get_many::<String>(name)
        .unwrap_or_default()
        .map(|value| {
            value
                .parse()
                .map_err(|e| Error::msg(format!("`{value}` is not a valid id: {e}")))
        })
        .collect()
}

/// Parses an RFC 3339 timestamp, defaulting to now when absent.
pub fn time_arg(matches: &ArgMatches, name: &str) -> Result<DateTime<Utc>> {
    match matches.get_one::<String>(name) {
        Some(value) => Ok(DateTime::parse_from_rfc3339(value)
            .map_err(|e| Error::msg(format!("`{value}` is not an RFC 3339 time: {e}")))?
            .with_timezone(&Utc)),
        None => Ok(Utc::now()),
    }
}

/// Reads an html body from the file given under `name`.
pub async fn read_html(matches: &ArgMatches, name: &str) -> Result<String> {
    let path = matches
        .get_one::<String>(name)
        .ok_or_else(|| Error::msg(format!("missing argument `{name}`")))?;
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::msg(format!("failed reading {path}: {e}")))
}
