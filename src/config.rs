use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Unset → in-memory store and bus (single process only).
    pub database_url: Option<String>,
    pub bus_channel: String,
    pub bus_reconnect_delay: Duration,
    pub handshake_timeout: Duration,
    pub admin_key: Option<String>,
    /// Read notifications older than this are purged by the cleanup job.
    pub retention_days: i64,
    /// Browser origin allowed by CORS besides localhost.
    pub cors_origin: Option<String>,
    pub production: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            database_url: None,
            bus_channel: "notifications".into(),
            bus_reconnect_delay: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(15),
            admin_key: None,
            retention_days: 30,
            cors_origin: None,
            production: false,
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    from_lookup(|key| std::env::var(key).ok())
}

fn from_lookup(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Config> {
    let defaults = Config::default();

    let production = var("NOTIFIER_ENV")
        .or_else(|| var("RUST_ENV"))
        .is_some_and(|v| v == "production");

    let admin_key = var("NOTIFIER_ADMIN_KEY").filter(|k| !k.trim().is_empty());

    let channel = var("NOTIFIER_BUS_CHANNEL").unwrap_or(defaults.bus_channel);
    if !valid_channel(&channel) {
        anyhow::bail!(
            "NOTIFIER_BUS_CHANNEL '{}' is not a valid channel identifier",
            channel
        );
    }

    Ok(Config {
        port: var("NOTIFIER_PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.port),
        database_url: var("DATABASE_URL").filter(|u| !u.trim().is_empty()),
        bus_channel: channel,
        bus_reconnect_delay: var("NOTIFIER_BUS_RECONNECT_SECS")
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.bus_reconnect_delay),
        handshake_timeout: var("NOTIFIER_HANDSHAKE_TIMEOUT_SECS")
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.handshake_timeout),
        admin_key,
        retention_days: var("NOTIFIER_RETENTION_DAYS")
            .and_then(|v| v.parse().ok())
            .filter(|d: &i64| *d > 0)
            .unwrap_or(defaults.retention_days),
        cors_origin: var("NOTIFIER_CORS_ORIGIN"),
        production,
    })
}

impl Config {
    /// Checked by `serve` only; the one-shot CLI commands never expose the API.
    pub fn require_api_auth(&self) -> anyhow::Result<()> {
        if self.admin_key.is_some() {
            return Ok(());
        }
        if self.production {
            anyhow::bail!(
                "NOTIFIER_ADMIN_KEY is not set. \
                 The REST API cannot run unauthenticated in production."
            );
        }
        tracing::warn!("NOTIFIER_ADMIN_KEY is not set; /api/v1 is open. Set it for production.");
        Ok(())
    }
}

/// LISTEN takes an identifier, not a bind parameter.
fn valid_channel(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.port, 8080);
        assert!(cfg.database_url.is_none());
        assert_eq!(cfg.bus_channel, "notifications");
        assert_eq!(cfg.bus_reconnect_delay, Duration::from_secs(5));
        assert_eq!(cfg.handshake_timeout, Duration::from_secs(15));
        assert_eq!(cfg.retention_days, 30);
        assert!(!cfg.production);
    }

    #[test]
    fn test_overrides() {
        let cfg = from_lookup(lookup(&[
            ("NOTIFIER_PORT", "9000"),
            ("DATABASE_URL", "postgres://localhost/notifier"),
            ("NOTIFIER_BUS_RECONNECT_SECS", "1"),
            ("NOTIFIER_ADMIN_KEY", "secret"),
            ("NOTIFIER_RETENTION_DAYS", "7"),
        ]))
        .unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/notifier"));
        assert_eq!(cfg.bus_reconnect_delay, Duration::from_secs(1));
        assert_eq!(cfg.admin_key.as_deref(), Some("secret"));
        assert_eq!(cfg.retention_days, 7);
    }

    #[test]
    fn test_garbage_numbers_fall_back() {
        let cfg = from_lookup(lookup(&[
            ("NOTIFIER_PORT", "eighty"),
            ("NOTIFIER_RETENTION_DAYS", "-3"),
        ]))
        .unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.retention_days, 30);
    }

    #[test]
    fn test_production_requires_admin_key_to_serve() {
        let cfg = from_lookup(lookup(&[("NOTIFIER_ENV", "production")])).unwrap();
        assert!(cfg.production);
        assert!(cfg.require_api_auth().is_err());

        let cfg = from_lookup(lookup(&[
            ("NOTIFIER_ENV", "production"),
            ("NOTIFIER_ADMIN_KEY", "k"),
        ]))
        .unwrap();
        tokio_test::assert_ok!(cfg.require_api_auth());
    }

    #[test]
    fn test_missing_admin_key_only_warns_outside_production() {
        let cfg = from_lookup(lookup(&[])).unwrap();
        assert!(cfg.admin_key.is_none());
        tokio_test::assert_ok!(cfg.require_api_auth());
    }

    #[test]
    fn test_channel_must_be_identifier() {
        assert!(from_lookup(lookup(&[("NOTIFIER_BUS_CHANNEL", "drop table; --")])).is_err());
        tokio_test::assert_ok!(from_lookup(lookup(&[("NOTIFIER_BUS_CHANNEL", "team_events")])));
    }
}
