// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Errno values surfaced on the datapath control channel.
//!
//! The control channel reports failures as POSIX errno values, so the
//! constants here are the contract between the switch and its userland
//! tooling.  Only the codes this datapath actually emits are modeled;
//! anything else travels as a raw [`Errno`].

#![cfg_attr(not(test), no_std)]
#![deny(clippy::all, clippy::pedantic)]
#![forbid(
    clippy::expect_used,
    clippy::missing_errors_doc,
    clippy::panic,
    clippy::unwrap_used,
    missing_docs,
    unsafe_code
)]

/// No error, operation succeeded
pub const SUCCESS: i32 = 0;
/// Operation not permitted
pub const EPERM: i32 = 1;
/// No such datapath, port, or flow
pub const ENOENT: i32 = 2;
/// Frame exceeds the egress MTU
pub const E2BIG: i32 = 7;
/// Out of memory
pub const ENOMEM: i32 = 12;
/// Interface already attached to a datapath
pub const EBUSY: i32 = 16;
/// Datapath slot already taken
pub const EEXIST: i32 = 17;
/// No such interface
pub const ENODEV: i32 = 19;
/// Malformed request or identifier mismatch
pub const EINVAL: i32 = 22;
/// Registry or port table full
pub const EXFULL: i32 = 54;
/// Operation not supported by this datapath
pub const EOPNOTSUPP: i32 = 95;
/// Message does not fit the outbound framing limit
pub const ENOBUFS: i32 = 105;

/// A raw errno value.
///
/// Just an `i32`, wrapped so signatures make clear the value is an errno.
#[must_use]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(transparent)]
pub struct Errno(pub i32);

impl From<i32> for Errno {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl From<Errno> for i32 {
    fn from(value: Errno) -> i32 {
        value.0
    }
}

/// The errno values the datapath emits, as a typed error.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
#[repr(i32)]
pub enum DpErrno {
    /// Operation not permitted
    #[error("Operation not permitted")]
    PermissionDenied = EPERM,
    /// No such datapath, port, or flow
    #[error("No such datapath, port, or flow")]
    NotFound = ENOENT,
    /// Frame exceeds the egress MTU
    #[error("Frame exceeds the egress MTU")]
    TooBig = E2BIG,
    /// Out of memory
    #[error("Out of memory")]
    NoMemory = ENOMEM,
    /// Interface already attached to a datapath
    #[error("Interface already attached to a datapath")]
    Busy = EBUSY,
    /// Datapath slot already taken
    #[error("Datapath slot already taken")]
    Exists = EEXIST,
    /// No such interface
    #[error("No such interface")]
    NoDevice = ENODEV,
    /// Malformed request or identifier mismatch
    #[error("Malformed request or identifier mismatch")]
    Invalid = EINVAL,
    /// Registry or port table full
    #[error("Registry or port table full")]
    Exhausted = EXFULL,
    /// Operation not supported by this datapath
    #[error("Operation not supported by this datapath")]
    NotSupported = EOPNOTSUPP,
    /// Message does not fit the outbound framing limit
    #[error("Message does not fit the outbound framing limit")]
    NoBuffers = ENOBUFS,
}

impl DpErrno {
    /// Get the `i32` value of this errno.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Parse an `i32` into a [`DpErrno`].
    ///
    /// Returns the original value when it is not one this datapath emits.
    pub const fn parse_i32(value: i32) -> Result<DpErrno, i32> {
        #[allow(clippy::enum_glob_use)]
        use DpErrno::*;
        match value {
            EPERM => Ok(PermissionDenied),
            ENOENT => Ok(NotFound),
            E2BIG => Ok(TooBig),
            ENOMEM => Ok(NoMemory),
            EBUSY => Ok(Busy),
            EEXIST => Ok(Exists),
            ENODEV => Ok(NoDevice),
            EINVAL => Ok(Invalid),
            EXFULL => Ok(Exhausted),
            EOPNOTSUPP => Ok(NotSupported),
            ENOBUFS => Ok(NoBuffers),
            other => Err(other),
        }
    }
}

impl From<DpErrno> for Errno {
    fn from(value: DpErrno) -> Self {
        Errno(value.as_i32())
    }
}

impl TryFrom<Errno> for DpErrno {
    type Error = i32;

    fn try_from(value: Errno) -> Result<Self, Self::Error> {
        DpErrno::parse_i32(value.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trip_known_codes() {
        for code in [
            DpErrno::PermissionDenied,
            DpErrno::NotFound,
            DpErrno::TooBig,
            DpErrno::NoMemory,
            DpErrno::Busy,
            DpErrno::Exists,
            DpErrno::NoDevice,
            DpErrno::Invalid,
            DpErrno::Exhausted,
            DpErrno::NotSupported,
            DpErrno::NoBuffers,
        ] {
            assert_eq!(DpErrno::parse_i32(code.as_i32()), Ok(code));
        }
    }

    #[test]
    fn unknown_code_is_preserved() {
        assert_eq!(DpErrno::parse_i32(9999), Err(9999));
    }
}
