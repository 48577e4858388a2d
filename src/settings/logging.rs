// SPDX-License-Identifier: GPL-3.0-or-later
use std::fs::{File, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use serde::Deserialize;
use tracing::Dispatch;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub(crate) struct LoggingSettings {
    /// The default filter, in `RUST_LOG` syntax. `RUST_LOG` takes priority if it's set.
    #[serde(default = "LoggingSettings::default_level")]
    pub(crate) level: String,

    /// Append logs to this file instead of writing them to stderr.
    #[serde(default)]
    pub(crate) destination: Option<PathBuf>,
}

/// A log file shared between every writer the subscriber makes.
#[derive(Clone, Debug)]
struct SharedFile(Arc<File>);

impl io::Write for SharedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (&*self.0).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        (&*self.0).flush()
    }
}

impl LoggingSettings {
    fn default_level() -> String {
        "info".to_string()
    }

    fn configured_filter(&self) -> anyhow::Result<EnvFilter> {
        EnvFilter::try_new(&self.level)
            .with_context(|| format!("invalid log level '{}'", self.level))
    }

    fn filter(&self) -> anyhow::Result<EnvFilter> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => self.configured_filter(),
        }
    }

    /// Build the subscriber described by these settings.
    ///
    /// The log file (if any) is closed once every clone of the returned [`Dispatch`] is dropped.
    pub(crate) fn dispatch(&self) -> anyhow::Result<Dispatch> {
        let filter = self.filter()?;
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_thread_names(true);
        let dispatch = match &self.destination {
            None => Dispatch::new(builder.with_writer(io::stderr).finish()),
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("unable to open log file {}", path.display()))?;
                let shared = SharedFile(Arc::new(file));
                let subscriber = builder
                    .with_ansi(false)
                    .with_writer(move || shared.clone())
                    .finish();
                Dispatch::new(subscriber)
            }
        };
        Ok(dispatch)
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            destination: None,
        }
    }
}

#[cfg(test)]
mod test {
    use std::fs;

    use super::LoggingSettings;

    #[test]
    fn defaults() {
        let parsed: Result<LoggingSettings, _> = toml::from_str("");
        assert!(parsed.is_ok(), "Failed to parse empty TOML");
        let parsed = parsed.unwrap();
        assert_eq!(parsed, LoggingSettings::default());
        assert_eq!(parsed.level, "info");
        assert!(parsed.destination.is_none());
    }

    #[test]
    fn stderr_dispatch() {
        let settings: LoggingSettings = toml::from_str("level = \"thermocast=debug\"").unwrap();
        assert!(settings.dispatch().is_ok());
    }

    #[test]
    fn directive_filters() {
        for level in &[
            "warn",
            "thermocast=debug,warp=info",
            "thermocast[acquisition]=trace",
            "thermocast::source[connect{namespace=Lab}]=debug",
        ] {
            let settings = LoggingSettings {
                level: level.to_string(),
                destination: None,
            };
            assert!(
                settings.configured_filter().is_ok(),
                "rejected filter '{}'",
                level
            );
            assert!(settings.dispatch().is_ok());
        }
    }

    #[test]
    fn invalid_filter() {
        let settings = LoggingSettings {
            level: "thermocast=loudest".to_string(),
            destination: None,
        };
        assert!(settings.configured_filter().is_err());
    }

    #[test]
    fn file_destination() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("thermocast.log");
        let settings = LoggingSettings {
            level: "trace".to_string(),
            destination: Some(path.clone()),
        };
        let dispatch = settings.dispatch().unwrap();
        tracing::dispatcher::with_default(&dispatch, || {
            tracing::error!(answer = 42, "written to the log file");
        });
        drop(dispatch);
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("written to the log file"));
        assert!(contents.contains("answer=42"));
        // No color codes in files
        assert!(!contents.contains('\u{1b}'));
    }

    #[test]
    fn missing_log_directory() {
        let dir = tempfile::tempdir().unwrap();
        let settings = LoggingSettings {
            destination: Some(dir.path().join("missing").join("thermocast.log")),
            ..LoggingSettings::default()
        };
        assert!(settings.dispatch().is_err());
    }
}
