// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Facilities intended for development tools and the test suite.  These should
//! not be used in production code.

use crate::db::Db;
use slog::o;
use slog::Drain;
use slog::Logger;

/// Logger for one test, writing through the test harness's captured stdout.
pub struct LogContext {
    pub log: Logger,
    test_name: String,
}

impl LogContext {
    /// Marks the test as passed.  Output only shows up for failing tests, so
    /// this just records the fact in the log.
    pub fn cleanup_successful(self) {
        slog::debug!(self.log, "test passed"; "test" => &self.test_name);
    }
}

/// Set up a [`LogContext`] appropriate for a test named `test_name`
pub fn test_setup_log(test_name: &str) -> LogContext {
    let decorator =
        slog_term::PlainSyncDecorator::new(slog_term::TestStdoutWriter);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let log = Logger::root(drain, o!("test_name" => test_name.to_string()));
    LogContext { log, test_name: test_name.to_string() }
}

/// Opens a private in-memory database for a test.
pub fn test_setup_database(log: &Logger) -> Db {
    match Db::open(log, ":memory:", 1000) {
        Ok(db) => db,
        Err(e) => panic!("failed to open in-memory database: {}", e),
    }
}
