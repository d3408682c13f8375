// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interfaces for parsing configuration files and building the root logger.

use camino::Utf8Path;
use camino::Utf8PathBuf;
use serde::Deserialize;
use slog::o;
use slog::Drain;
use slog::Level;
use slog::Logger;
use std::fs::OpenOptions;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

/// Configuration for a process that embeds the allocator.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Where the range and owner tables live.
    pub database: DatabaseConfig,
    /// Process-wide logging configuration.
    pub log: ConfigLogging,
}

#[derive(Debug, Deserialize)]
pub struct DatabaseConfig {
    /// Path of the SQLite database file, or `:memory:`.
    pub path: String,
    /// How long a transaction waits for another writer to release the
    /// database before failing with a retryable error.
    #[serde(default = "DatabaseConfig::default_busy_timeout_ms")]
    pub busy_timeout_ms: u32,
}

impl DatabaseConfig {
    fn default_busy_timeout_ms() -> u32 {
        5000
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("read \"{path}\": {err}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("parse \"{path}\": {err}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        err: toml::de::Error,
    },
}

impl Config {
    /// Load a `Config` from the given TOML file.
    pub fn from_file(path: &Utf8Path) -> Result<Config, LoadError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|err| LoadError::Io { path: path.to_owned(), err })?;
        toml::from_str(&contents)
            .map_err(|err| LoadError::Parse { path: path.to_owned(), err })
    }
}

/// Represents the logging configuration (the "log" top-level object in the
/// configuration file).
#[derive(Debug, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum ConfigLogging {
    StderrTerminal {
        level: ConfigLoggingLevel,
    },
    File {
        level: ConfigLoggingLevel,
        path: Utf8PathBuf,
        if_exists: ConfigLoggingIfExists,
    },
    /// Writes one log file per logger into `directory`, named with the program
    /// name, the process id and a counter.  Not suitable for multiple
    /// processes sharing one file.
    TestSuite {
        level: ConfigLoggingLevel,
        directory: Utf8PathBuf,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigLoggingIfExists {
    Fail,
    Truncate,
    Append,
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigLoggingLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl From<ConfigLoggingLevel> for Level {
    fn from(config_level: ConfigLoggingLevel) -> Level {
        match config_level {
            ConfigLoggingLevel::Trace => Level::Trace,
            ConfigLoggingLevel::Debug => Level::Debug,
            ConfigLoggingLevel::Info => Level::Info,
            ConfigLoggingLevel::Warn => Level::Warning,
            ConfigLoggingLevel::Error => Level::Error,
            ConfigLoggingLevel::Critical => Level::Critical,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("open log file \"{path}\": {err}")]
pub struct LogInitError {
    path: Utf8PathBuf,
    #[source]
    err: std::io::Error,
}

static TEST_SUITE_LOGGER_ID: AtomicU32 = AtomicU32::new(0);

impl ConfigLogging {
    /// Create the root logger based on the requested configuration.
    pub fn to_logger(
        &self,
        name: &'static str,
    ) -> Result<Logger, LogInitError> {
        match self {
            ConfigLogging::StderrTerminal { level } => {
                let decorator = slog_term::TermDecorator::new().build();
                let drain =
                    slog_term::FullFormat::new(decorator).build().fuse();
                Ok(async_root_logger(*level, drain))
            }

            ConfigLogging::File { level, path, if_exists } => {
                let mut open_options = OpenOptions::new();
                open_options.write(true);
                open_options.create(true);

                match if_exists {
                    ConfigLoggingIfExists::Fail => {
                        open_options.create_new(true);
                    }
                    ConfigLoggingIfExists::Append => {
                        open_options.append(true);
                    }
                    ConfigLoggingIfExists::Truncate => {
                        open_options.truncate(true);
                    }
                }

                file_root_logger(*level, name, &open_options, path)
            }

            ConfigLogging::TestSuite { level, directory } => {
                let mut open_options = OpenOptions::new();
                open_options.write(true).create_new(true);

                let arg0 = std::env::args()
                    .next()
                    .and_then(|arg0| {
                        Utf8Path::new(&arg0).file_name().map(str::to_owned)
                    })
                    .unwrap_or_else(|| name.to_owned());
                let pid = std::process::id();
                let id = TEST_SUITE_LOGGER_ID.fetch_add(1, Ordering::SeqCst);
                let path =
                    directory.join(format!("{}.{}.{}.log", arg0, pid, id));
                file_root_logger(*level, name, &open_options, &path)
            }
        }
    }
}

// The terminal and file drains are not synchronized on their own; the async
// drain serializes records onto one worker thread.
fn async_root_logger<T>(level: ConfigLoggingLevel, drain: T) -> Logger
where
    T: Drain + Send + 'static,
    <T as Drain>::Err: std::fmt::Debug,
{
    let pid = std::process::id();
    let level_drain = slog::LevelFilter(drain, Level::from(level)).fuse();
    let async_drain = slog_async::Async::new(level_drain).build().fuse();
    Logger::root(async_drain, o!("pid" => pid))
}

fn file_root_logger(
    level: ConfigLoggingLevel,
    name: &'static str,
    open_options: &OpenOptions,
    path: &Utf8Path,
) -> Result<Logger, LogInitError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|err| LogInitError { path: path.to_owned(), err })?;
    }

    let file = open_options
        .open(path)
        .map_err(|err| LogInitError { path: path.to_owned(), err })?;

    // Tell a reader who doesn't know how logging is configured where the rest
    // of the messages went.
    eprintln!("note: configured to log to \"{}\"", path);
    let drain = slog_bunyan::with_name(name, file).build().fuse();
    Ok(async_root_logger(level, drain))
}
