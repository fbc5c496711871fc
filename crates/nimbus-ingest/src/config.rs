//! Worker configuration.
//!
//! Everything is read once at startup from the environment (a `.env`
//! file is honored through dotenvy in `main`). Missing required
//! variables are fatal; malformed values are reported, never silently
//! defaulted.

use crate::error::{Error, Result};
use crate::parse::Units;
use crate::retry::RetryConfig;
use crate::source::{FileSource, HttpSource, RecordSource};
use chrono::{DateTime, NaiveDate, Utc};
use nimbus_core::ValidationWindow;
use std::str::FromStr;
use std::time::Duration;

/// One configured source: `name=url` with optional `;units=` suffix.
///
/// The URL scheme picks the adapter: `http://` and `https://` poll a
/// remote feed, `file://` reads a local path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    pub name: String,
    pub url: String,
    pub units: Units,
}

impl SourceSpec {
    /// Parse one `NIMBUS_SOURCES` entry.
    pub fn parse(entry: &str) -> Result<Self> {
        let (name, rest) = entry
            .split_once('=')
            .ok_or_else(|| Error::Config(format!("source entry '{entry}' must be name=url")))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Config(format!("source entry '{entry}' has an empty name")));
        }

        let mut parts = rest.split(';');
        let url = parts
            .next()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Error::Config(format!("source '{name}' has an empty url")))?
            .to_string();

        let mut units = Units::Si;
        for option in parts {
            let option = option.trim();
            if option.is_empty() {
                continue;
            }
            let (key, value) = option.split_once('=').ok_or_else(|| {
                Error::Config(format!("source '{name}': option '{option}' must be key=value"))
            })?;
            match key.trim() {
                "units" => {
                    units = value
                        .trim()
                        .parse()
                        .map_err(|e| Error::Config(format!("source '{name}': {e}")))?;
                }
                other => {
                    return Err(Error::Config(format!(
                        "source '{name}': unknown option '{other}'"
                    )));
                }
            }
        }

        let spec = Self { name: name.to_string(), url, units };
        spec.check_scheme()?;
        Ok(spec)
    }

    fn check_scheme(&self) -> Result<()> {
        let supported = ["http://", "https://", "file://"];
        if supported.iter().any(|scheme| self.url.starts_with(scheme)) {
            Ok(())
        } else {
            Err(Error::Config(format!(
                "source '{}': url '{}' must start with http://, https://, or file://",
                self.name, self.url
            )))
        }
    }

    /// Build the adapter for this spec.
    pub fn build(&self, client: &reqwest::Client) -> Box<dyn RecordSource> {
        match self.url.strip_prefix("file://") {
            Some(path) => Box::new(FileSource::new(&self.name, path)),
            None => Box::new(HttpSource::new(&self.name, &self.url, client.clone())),
        }
    }
}

/// Worker settings, one value per environment variable.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub sources: Vec<SourceSpec>,
    pub poll_interval: Duration,
    pub fetch_timeout: Duration,
    pub retry: RetryConfig,
    pub window: ValidationWindow,
    pub db_pool_size: usize,
    pub db_timeout: Duration,
}

impl Config {
    /// Read the full worker configuration from the environment.
    pub fn from_env() -> Result<Self> {
        let database_url = require("NIMBUS_DATABASE_URL")?;
        let sources = parse_sources(&require("NIMBUS_SOURCES")?)?;

        let retry = RetryConfig::new(
            env_or("NIMBUS_RETRY_MAX_ATTEMPTS", 3u32)?,
            Duration::from_millis(env_or("NIMBUS_RETRY_BASE_MS", 500u64)?),
            Duration::from_millis(env_or("NIMBUS_RETRY_CAP_MS", 30_000u64)?),
        );

        let min_date = match std::env::var("NIMBUS_MIN_DATE") {
            Ok(raw) => parse_date("NIMBUS_MIN_DATE", &raw)?,
            Err(_) => ValidationWindow::default().min,
        };
        let max_date = match std::env::var("NIMBUS_MAX_DATE") {
            Ok(raw) => Some(parse_date("NIMBUS_MAX_DATE", &raw)?),
            Err(_) => None,
        };

        Ok(Self {
            database_url,
            sources,
            poll_interval: Duration::from_secs(env_or("NIMBUS_POLL_INTERVAL_SECS", 120u64)?),
            fetch_timeout: Duration::from_secs(env_or("NIMBUS_FETCH_TIMEOUT_SECS", 30u64)?),
            retry,
            window: ValidationWindow::new(min_date, max_date),
            db_pool_size: env_or("NIMBUS_DB_POOL_SIZE", 16usize)?,
            db_timeout: Duration::from_secs(env_or("NIMBUS_DB_TIMEOUT_SECS", 30u64)?),
        })
    }
}

/// Parse the comma-separated `NIMBUS_SOURCES` value.
pub fn parse_sources(raw: &str) -> Result<Vec<SourceSpec>> {
    let specs: Vec<SourceSpec> = raw
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(SourceSpec::parse)
        .collect::<Result<_>>()?;

    if specs.is_empty() {
        return Err(Error::Config("NIMBUS_SOURCES contains no sources".into()));
    }
    for (i, spec) in specs.iter().enumerate() {
        if specs[..i].iter().any(|other| other.name == spec.name) {
            return Err(Error::Config(format!(
                "duplicate source name '{}' in NIMBUS_SOURCES",
                spec.name
            )));
        }
    }
    Ok(specs)
}

fn require(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| Error::Config(format!("{name} is not set")))
}

fn env_or<T: FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{name}: cannot parse '{raw}'"))),
        Err(_) => Ok(default),
    }
}

/// Accepts RFC 3339 or a plain `YYYY-MM-DD` (midnight UTC).
fn parse_date(name: &str, raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    if let Ok(day) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(t) = day.and_hms_opt(0, 0, 0) {
            return Ok(t.and_utc());
        }
    }
    Err(Error::Config(format!("{name}: cannot parse '{raw}' as a date")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_source() {
        let spec = SourceSpec::parse("dwd=https://feed.example/records").unwrap();
        assert_eq!(spec.name, "dwd");
        assert_eq!(spec.url, "https://feed.example/records");
        assert_eq!(spec.units, Units::Si);
    }

    #[test]
    fn test_parse_source_with_units() {
        let spec = SourceSpec::parse("legacy=http://feed.example/v1;units=conventional").unwrap();
        assert_eq!(spec.units, Units::Conventional);
    }

    #[test]
    fn test_parse_file_source() {
        let spec = SourceSpec::parse("replay=file:///data/records.jsonl").unwrap();
        assert_eq!(spec.url, "file:///data/records.jsonl");
    }

    #[test]
    fn test_parse_rejects_bad_entries() {
        assert!(SourceSpec::parse("no-equals-sign").is_err());
        assert!(SourceSpec::parse("=https://feed.example").is_err());
        assert!(SourceSpec::parse("name=").is_err());
        assert!(SourceSpec::parse("name=ftp://feed.example").is_err());
        assert!(SourceSpec::parse("name=https://ok;units=imperial").is_err());
        assert!(SourceSpec::parse("name=https://ok;bogus=1").is_err());
    }

    #[test]
    fn test_parse_sources_list() {
        let specs = parse_sources(
            "dwd=https://a.example/records, replay=file:///tmp/r.jsonl;units=conventional",
        )
        .unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].name, "dwd");
        assert_eq!(specs[1].units, Units::Conventional);
    }

    #[test]
    fn test_parse_sources_rejects_duplicates_and_empty() {
        assert!(parse_sources("").is_err());
        assert!(parse_sources(" , ").is_err());
        assert!(parse_sources("a=https://x.example,a=https://y.example").is_err());
    }

    #[test]
    fn test_parse_date_formats() {
        let t = parse_date("X", "2010-01-01").unwrap();
        assert_eq!(t.timestamp(), 1262304000);

        let t = parse_date("X", "2024-06-01T12:30:00+02:00").unwrap();
        assert_eq!(t.to_rfc3339(), "2024-06-01T10:30:00+00:00");

        assert!(parse_date("X", "June 1st").is_err());
    }
}
