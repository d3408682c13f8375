// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared integration testing facilities

use camino::Utf8PathBuf;
use camino_tempfile::Utf8TempDir;
use ipam_range_pool::config::Config;
use ipam_range_pool::db::Db;
use slog::Logger;

/// A file-backed database and logger set up from a generated config file.
pub struct PoolTestContext {
    pub log: Logger,
    pub config: Config,
    pub db: Db,
    pub db_path: Utf8PathBuf,
    // Kept alive so the database and log files outlive the test body.
    _tmpdir: Utf8TempDir,
}

impl PoolTestContext {
    /// Opens a second connection to the same database file.
    pub fn reopen(&self) -> Db {
        Db::from_config(&self.log, &self.config.database)
            .expect("failed to reopen database")
    }
}

pub fn test_setup(test_name: &'static str) -> PoolTestContext {
    let tmpdir = camino_tempfile::tempdir().expect("failed to create tmpdir");
    let db_path = tmpdir.path().join("pools.sqlite");
    let config_path = tmpdir.path().join("config.toml");
    let contents = format!(
        r#"
        [database]
        path = "{}"
        busy_timeout_ms = 200

        [log]
        mode = "test-suite"
        level = "debug"
        directory = "{}"
        "#,
        db_path,
        tmpdir.path().join("logs"),
    );
    std::fs::write(&config_path, contents).expect("failed to write config");

    let config = Config::from_file(&config_path).expect("bad test config");
    let log = config.log.to_logger(test_name).expect("failed to set up log");
    let db =
        Db::from_config(&log, &config.database).expect("failed to open db");
    PoolTestContext { log, config, db, db_path, _tmpdir: tmpdir }
}
