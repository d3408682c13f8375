// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error handling facilities for the allocator
//!
//! Every layer (store, range pools, address manager) reports failures with
//! the same [`Error`] type, so that callers can distinguish "not found" from
//! "conflict" without knowing which layer produced the error.

use serde::Deserialize;
use serde::Serialize;
use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FormatResult;
use std::net::IpAddr;
use uuid::Uuid;

/// An error that can be generated by the allocator or its store.
///
/// General best practices for error design apply here.  Where possible, we
/// want to reuse existing variants rather than inventing new ones to
/// distinguish cases that no programmatic consumer needs to distinguish.
#[derive(Clone, Debug, Deserialize, thiserror::Error, PartialEq, Serialize)]
pub enum Error {
    /// An object needed as part of this operation was not found.
    ///
    /// Exhausted pools report this too: there is no free range left to
    /// allocate from.
    #[error("Object (of type {lookup_type:?}) not found: {type_name}")]
    ObjectNotFound { type_name: ResourceType, lookup_type: LookupType },
    /// An object already exists with the specified name or identifier.
    #[error("Object (of type {type_name:?}) already exists: {object_name}")]
    ObjectAlreadyExists { type_name: ResourceType, object_name: String },
    /// The request was malformed (bad bounds, address outside its subnet).
    #[error("Invalid Request: {message}")]
    InvalidRequest { message: String },
    /// The request was well-formed but collides with the current state, e.g.
    /// reserving a value that is already allocated.
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// The system encountered an unhandled operational error.
    #[error("Internal Error: {internal_message}")]
    InternalError { internal_message: String },
    /// The store is (temporarily) unavailable.
    #[error("Service Unavailable: {internal_message}")]
    ServiceUnavailable { internal_message: String },
}

/// Identifies the kind of object an [`Error`] is about.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ResourceType {
    RangePool,
    PoolOwner,
    Subnet,
    IpAddress,
    VirtualNetwork,
}

impl Display for ResourceType {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        write!(
            f,
            "{}",
            match self {
                ResourceType::RangePool => "range pool",
                ResourceType::PoolOwner => "pool owner",
                ResourceType::Subnet => "subnet",
                ResourceType::IpAddress => "ip address",
                ResourceType::VirtualNetwork => "virtual network",
            }
        )
    }
}

/// Indicates how an object was looked up (for an `ObjectNotFound` error)
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum LookupType {
    /// a pool key was requested
    ByKey(String),
    /// a specific id was requested
    ById(Uuid),
    /// a specific address was requested
    ByAddress(IpAddr),
    /// a specific id was requested with some composite type
    /// (caller summarizes it)
    ByCompositeId(String),
}

impl LookupType {
    /// Returns an ObjectNotFound error appropriate for the case where this
    /// lookup failed
    pub fn into_not_found(self, type_name: ResourceType) -> Error {
        Error::ObjectNotFound { type_name, lookup_type: self }
    }
}

impl From<&str> for LookupType {
    fn from(key: &str) -> Self {
        LookupType::ByKey(key.to_owned())
    }
}

impl From<Uuid> for LookupType {
    fn from(uuid: Uuid) -> Self {
        LookupType::ById(uuid)
    }
}

impl From<IpAddr> for LookupType {
    fn from(addr: IpAddr) -> Self {
        LookupType::ByAddress(addr)
    }
}

impl Error {
    /// Returns whether the error is likely transient and could reasonably be
    /// retried
    pub fn retryable(&self) -> bool {
        match self {
            Error::ServiceUnavailable { .. } => true,

            Error::ObjectNotFound { .. }
            | Error::ObjectAlreadyExists { .. }
            | Error::InvalidRequest { .. }
            | Error::Conflict { .. }
            | Error::InternalError { .. } => false,
        }
    }

    /// Returns true for [`Error::ObjectNotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::ObjectNotFound { .. })
    }

    /// Generates an [`Error::ObjectNotFound`] error for a pool key.
    pub fn not_found_by_key(type_name: ResourceType, key: &str) -> Error {
        LookupType::from(key).into_not_found(type_name)
    }

    /// Generates an [`Error::ObjectNotFound`] error for a lookup by id.
    pub fn not_found_by_id(type_name: ResourceType, id: &Uuid) -> Error {
        LookupType::ById(*id).into_not_found(type_name)
    }

    /// Generates an [`Error::InternalError`] error with the specific message
    ///
    /// InternalError should be used for operational conditions that should not
    /// happen but that we cannot reasonably handle at runtime (e.g., decoding
    /// a stored value that has the wrong width).
    pub fn internal_error(internal_message: &str) -> Error {
        Error::InternalError { internal_message: internal_message.to_owned() }
    }

    /// Generates an [`Error::InvalidRequest`] error with the specific message
    pub fn invalid_request(message: &str) -> Error {
        Error::InvalidRequest { message: message.to_owned() }
    }

    /// Generates an [`Error::Conflict`] error with the specific message
    pub fn conflict(message: &str) -> Error {
        Error::Conflict { message: message.to_owned() }
    }

    /// Generates an [`Error::ServiceUnavailable`] error with the specific
    /// message
    ///
    /// This should be used for transient failures where the caller might be
    /// expected to retry, such as a database that is locked by another
    /// writer.
    pub fn unavail(message: &str) -> Error {
        Error::ServiceUnavailable { internal_message: message.to_owned() }
    }

    /// Given an [`Error`] with an internal message, return the same error with
    /// `context` prepended to it to provide more context
    ///
    /// If the error has no internal message, then it is returned unchanged.
    pub fn internal_context<C>(self, context: C) -> Error
    where
        C: Display + Send + Sync + 'static,
    {
        match self {
            Error::ObjectNotFound { .. }
            | Error::ObjectAlreadyExists { .. }
            | Error::InvalidRequest { .. }
            | Error::Conflict { .. } => self,
            Error::InternalError { internal_message } => Error::InternalError {
                internal_message: format!("{}: {}", context, internal_message),
            },
            Error::ServiceUnavailable { internal_message } => {
                Error::ServiceUnavailable {
                    internal_message: format!(
                        "{}: {}",
                        context, internal_message
                    ),
                }
            }
        }
    }
}

pub type CreateResult<T> = Result<T, Error>;
pub type DeleteResult = Result<(), Error>;
pub type ListResultVec<T> = Result<Vec<T>, Error>;
pub type LookupResult<T> = Result<T, Error>;
pub type UpdateResult<T> = Result<T, Error>;

#[cfg(test)]
mod test {
    use super::Error;
    use super::LookupType;
    use super::ResourceType;

    #[test]
    fn test_internal_context() {
        let error = Error::internal_error("range row has 3 bytes");
        let error = error.internal_context("decoding pool \"vn1_vxlan\"");
        assert_eq!(
            error,
            Error::InternalError {
                internal_message: "decoding pool \"vn1_vxlan\": range row \
                    has 3 bytes"
                    .to_string()
            }
        );

        // Client-facing errors carry no internal message to decorate.
        let error = Error::conflict("already allocated");
        assert_eq!(
            error.clone().internal_context("ignored"),
            Error::conflict("already allocated")
        );
    }

    #[test]
    fn test_retryable() {
        assert!(Error::unavail("database is locked").retryable());
        assert!(!Error::conflict("taken").retryable());
        assert!(
            !Error::not_found_by_key(ResourceType::RangePool, "k").retryable()
        );
    }

    #[test]
    fn test_not_found_message() {
        let error = LookupType::from("subnet-a")
            .into_not_found(ResourceType::RangePool);
        assert!(error.is_not_found());
        assert_eq!(
            error.to_string(),
            "Object (of type ByKey(\"subnet-a\")) not found: range pool"
        );
    }
}
