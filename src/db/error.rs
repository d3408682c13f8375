// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error handling and conversions.

use crate::error::Error as PublicError;
use crate::error::LookupType;
use crate::error::ResourceType;
use diesel::result::DatabaseErrorInformation;
use diesel::result::DatabaseErrorKind as DieselErrorKind;
use diesel::result::Error as DieselError;

/// Summarizes details provided with a database error.
fn format_database_error(
    kind: DieselErrorKind,
    info: &dyn DatabaseErrorInformation,
) -> String {
    let mut rv =
        format!("database error (kind = {:?}): {}\n", kind, info.message());
    if let Some(details) = info.details() {
        rv.push_str(&format!("DETAILS: {}\n", details));
    }
    if let Some(hint) = info.hint() {
        rv.push_str(&format!("HINT: {}\n", hint));
    }
    if let Some(table_name) = info.table_name() {
        rv.push_str(&format!("TABLE NAME: {}\n", table_name));
    }
    if let Some(constraint_name) = info.constraint_name() {
        rv.push_str(&format!("CONSTRAINT NAME: {}\n", constraint_name));
    }
    rv
}

/// SQLite reports lock contention (SQLITE_BUSY / SQLITE_LOCKED) without a
/// dedicated diesel error kind.
fn is_lock_contention(info: &dyn DatabaseErrorInformation) -> bool {
    let message = info.message();
    message.contains("database is locked")
        || message.contains("database table is locked")
}

/// Describes how a query's errors map onto public errors.
pub enum ErrorHandler<'a> {
    /// The operation creates an object; a unique-constraint violation means
    /// the named object already exists.
    Conflict(ResourceType, &'a str),
    /// The operation looks up one object; a missing row means it was not
    /// found.
    NotFound(ResourceType, LookupType),
    /// Any error is a server error.
    Server,
}

/// Converts a Diesel error to an external error.
pub fn public_error_from_diesel(
    error: DieselError,
    handler: ErrorHandler<'_>,
) -> PublicError {
    match error {
        DieselError::NotFound => match handler {
            ErrorHandler::NotFound(type_name, lookup_type) => {
                PublicError::ObjectNotFound { type_name, lookup_type }
            }
            _ => PublicError::internal_error("unexpected missing row"),
        },
        DieselError::DatabaseError(kind, info) => match (kind, handler) {
            (
                DieselErrorKind::UniqueViolation,
                ErrorHandler::Conflict(type_name, object_name),
            ) => PublicError::ObjectAlreadyExists {
                type_name,
                object_name: object_name.to_string(),
            },
            (kind, _) if is_lock_contention(&*info) => {
                PublicError::unavail(&format_database_error(kind, &*info))
            }
            (kind, _) => PublicError::internal_error(&format_database_error(
                kind, &*info,
            )),
        },
        error => PublicError::internal_error(&format!(
            "Unknown diesel error: {:?}",
            error
        )),
    }
}

impl From<DieselError> for PublicError {
    fn from(error: DieselError) -> Self {
        public_error_from_diesel(error, ErrorHandler::Server)
    }
}
