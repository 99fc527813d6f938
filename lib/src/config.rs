use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::Result;

pub static CONFIG_FILE: &str = "letterbox.toml";

/// Application configuration.
///
/// # Sensible defaults
///
/// `Config::default()` gives a setup usable for local development: a
/// database in `./db`, formatted logging and a relay on localhost. Using
/// the *struct update syntax* one can override just a few sections.
///
/// ```ignore
/// let cfg = Config {
///     sending: Sending {
///         newsletter_rate: 0,
///         ..Default::default()
///     },
///     ..Default::default()
/// }
/// ```
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub name: String,
    pub version: String,

    /// Public address of the application, used as the base of confirmation
    /// and unsubscribe links put into outgoing messages.
    pub base_url: String,

    pub db: Db,
    pub tracing: Tracing,
    pub email: Email,
    pub sending: Sending,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            base_url: "http://localhost:8080".to_string(),
            db: Db::default(),
            tracing: Tracing::default(),
            email: Email::default(),
            sending: Sending::default(),
        }
    }
}

/// Loads application config from toml file at default location.
pub fn load<T: DeserializeOwned>() -> Result<T> {
    load_from(CONFIG_FILE)
}

/// Loads application config from toml file at standard path using provided
/// name.
///
/// For example for `name` == `letterbox.toml` we will load both
/// `letterbox.toml` and `secret.letterbox.toml`. Environment variables
/// using `__` as separator (e.g. `EMAIL__SMTP_PASSWORD`) take precedence.
pub fn load_from<T: DeserializeOwned>(name: impl AsRef<str>) -> Result<T> {
    let config = config::Config::builder()
        .add_source(config::File::with_name(name.as_ref()))
        .add_source(config::File::with_name(&format!("secret.{}", name.as_ref())).required(false))
        .add_source(
            config::Environment::default()
                .separator("__")
                .prefix_separator("__"),
        )
        .build()?;

    let config: T = config.try_deserialize()?;

    Ok(config)
}

/// Loads application config from multiple toml files at given paths.
pub fn load_from_many<T: DeserializeOwned>(paths: &[impl AsRef<str>]) -> Result<T> {
    let mut builder = config::Config::builder();
    for path in paths {
        builder = builder.add_source(config::File::with_name(path.as_ref()));
    }
    let config = builder
        .add_source(
            config::Environment::default()
                .separator("__")
                .prefix_separator("__"),
        )
        .build()?;

    let config: T = config.try_deserialize()?;

    Ok(config)
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Db {
    /// Path to the sled database directory, relative to the current working
    /// directory.
    pub path: String,
}

impl Default for Db {
    fn default() -> Self {
        Self {
            path: "db".to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Tracing {
    pub enabled: bool,

    pub mode: crate::tracing::Mode,
    pub level: crate::tracing::Level,

    pub loki_address: String,
    pub loki_token: String,
}

impl Default for Tracing {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: crate::tracing::Mode::default(),
            level: crate::tracing::Level::default(),
            loki_address: "".to_string(),
            loki_token: "".to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Email {
    /// Address used in the `From` header of every outgoing message.
    pub address: String,
    /// Display name paired with `address`.
    pub sender_name: String,

    // Smtp relay and credentials.
    pub smtp_server: String,
    pub smtp_port: u16,
    pub smtp_user: String,
    pub smtp_password: String,

    /// Text appended to every message body by the transport.
    pub footer: String,
    /// Mailbox receiving `mailto:` unsubscribe requests. The link is left
    /// out when empty.
    pub unsubscribe_mailbox: String,
}

impl Default for Email {
    fn default() -> Self {
        Self {
            address: "newsletter@localhost".to_string(),
            sender_name: env!("CARGO_PKG_NAME").to_string(),
            smtp_server: "localhost".to_string(),
            smtp_port: 587,
            smtp_user: "".to_string(),
            smtp_password: "".to_string(),
            footer: "".to_string(),
            unsubscribe_mailbox: "".to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Sending {
    /// Messages per second for newsletter jobs. Zero disables pacing.
    pub newsletter_rate: u32,
    /// Messages per second for autoresponders. Kept below the newsletter
    /// rate so both loops together stay within the relay's budget.
    pub autoresponder_rate: u32,

    /// Seconds between two dispatch triggers when running as a daemon.
    pub interval_secs: u64,
    /// Attempts per recipient. Recipients whose message was never
    /// confirmed sent are retried on later triggers until this is reached.
    /// A retry may resend a message the relay did accept before a crash.
    pub max_attempts: u32,

    /// Seconds after which a sending flag is considered abandoned by a
    /// crashed run and may be taken over.
    pub stale_after_secs: u64,
}

impl Default for Sending {
    fn default() -> Self {
        Self {
            newsletter_rate: 10,
            autoresponder_rate: 2,
            interval_secs: 10,
            max_attempts: 3,
            stale_after_secs: 6 * 60 * 60,
        }
    }
}

impl Sending {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_after_secs as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_reserve_headroom_for_autoresponders() {
        let sending = Sending::default();
        assert!(sending.autoresponder_rate < sending.newsletter_rate);
    }

    #[test]
    fn failed_sends_are_retried_by_default() {
        assert!(Sending::default().max_attempts > 1);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(
                "base_url = \"https://news.example.com\"\n\
                 [sending]\n\
                 newsletter_rate = 14\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.base_url, "https://news.example.com");
        assert_eq!(config.sending.newsletter_rate, 14);
        assert_eq!(config.sending.autoresponder_rate, 2);
        assert_eq!(config.db.path, "db");
    }
}
