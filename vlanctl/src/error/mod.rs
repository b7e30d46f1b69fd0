//! Error taxonomy for VLAN provisioning.
//!
//! Library operations return [`VlanError`]. The command layer wraps them in
//! [`anyhow::Error`] and the binary recovers the original variant to pick an
//! exit code.

use std::path::PathBuf;
use thiserror::Error;

/// Broad category of a failure, as reported to the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Usage,
    Input,
    InvalidInput,
    UnavailableCapability,
    UnsupportedCombination,
    ExternalOperationFailure,
}

#[derive(Error, Debug)]
pub enum VlanError {
    /// Bad or conflicting command-line options
    #[error("{0}")]
    Usage(String),

    /// Definitions file missing or unreadable
    #[error("cannot read definitions file {}: {source}", path.display())]
    Input {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Tool config file missing, unreadable or not valid JSON
    #[error("invalid config file {}: {reason}", path.display())]
    Config { path: PathBuf, reason: String },

    #[error("line {line}: invalid VLAN id '{value}' (must be a number between 1 and 4094)")]
    InvalidVlanId { line: usize, value: String },

    #[error("line {line}: invalid prefix length '{value}' for {address} (must be a number between 0 and 32)")]
    InvalidPrefix {
        line: usize,
        address: String,
        value: String,
    },

    #[error("line {line}: {reason}")]
    MalformedLine { line: usize, reason: String },

    /// Auto-detection found none of the known DHCP clients
    #[error("no usable DHCP client found (looked for: {searched})")]
    NoDhcpClient { searched: String },

    /// A specific client was requested but is not installed
    #[error("requested DHCP client '{client}' is not installed")]
    ClientNotFound { client: String },

    #[error("{client} does not support {family}; use {alternative} instead")]
    UnsupportedFamily {
        client: String,
        family: String,
        alternative: String,
    },

    #[error("this operation must be run as root")]
    InsufficientPrivilege,

    /// An external command ran but reported failure
    #[error("{operation} failed: {stderr}")]
    External { operation: String, stderr: String },

    /// An external command could not be started at all
    #[error("failed to execute {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// An external command succeeded but its output could not be understood
    #[error("unexpected output from {operation}: {reason}")]
    UnexpectedOutput { operation: String, reason: String },
}

impl VlanError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VlanError::Usage(_) => ErrorKind::Usage,
            VlanError::Input { .. } | VlanError::Config { .. } => ErrorKind::Input,
            VlanError::InvalidVlanId { .. }
            | VlanError::InvalidPrefix { .. }
            | VlanError::MalformedLine { .. } => ErrorKind::InvalidInput,
            VlanError::NoDhcpClient { .. }
            | VlanError::ClientNotFound { .. }
            | VlanError::InsufficientPrivilege => ErrorKind::UnavailableCapability,
            VlanError::UnsupportedFamily { .. } => ErrorKind::UnsupportedCombination,
            VlanError::External { .. }
            | VlanError::Spawn { .. }
            | VlanError::UnexpectedOutput { .. } => ErrorKind::ExternalOperationFailure,
        }
    }

    /// Process exit code, following the sysexits(3) conventions
    pub fn exit_code(&self) -> i32 {
        match self {
            VlanError::InsufficientPrivilege => 77,
            _ => match self.kind() {
                ErrorKind::Usage => 64,
                ErrorKind::InvalidInput => 65,
                ErrorKind::Input => 66,
                ErrorKind::UnavailableCapability => 69,
                ErrorKind::UnsupportedCombination => 78,
                ErrorKind::ExternalOperationFailure => 1,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, VlanError>;
