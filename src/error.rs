// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error types for the PKCS#11 signer.
//!
//! Every failure surfaced by this crate maps onto one [`ErrorKind`], so callers
//! (for example a command-line front end) can report a stable kind next to the
//! human-readable message.

use thiserror::Error;

/// Result type alias using [`SignerError`].
pub type Result<T> = std::result::Result<T, SignerError>;

/// Errors that can occur while locating tokens, signing, or building paths.
#[derive(Debug, Error)]
pub enum SignerError {
    /// A required input is missing, or an option value is not recognized.
    #[error("Invalid argument: {0}")]
    Argument(String),

    /// No present token matches the serial/label criteria.
    #[error("Token with serial \"{serial}\" and label \"{label}\" was not found")]
    TokenNotFound {
        /// Requested serial number (empty when not used as a filter).
        serial: String,
        /// Requested label (empty when not used as a filter).
        label: String,
    },

    /// A search template matched no object.
    #[error("{object} with label \"{label}\" and id \"{id}\" was not found")]
    ObjectNotFound {
        /// Object description ("Private key", "Certificate").
        object: &'static str,
        /// CKA_LABEL used in the search.
        label: String,
        /// Hex encoded CKA_ID used in the search.
        id: String,
    },

    /// A search template that must identify one object matched several.
    #[error("More than one {object} ({count}) with label \"{label}\" and id \"{id}\" was found")]
    AmbiguousMatch {
        /// Object description ("private key", "certificate").
        object: &'static str,
        /// Number of matching objects.
        count: usize,
        /// CKA_LABEL used in the search.
        label: String,
        /// Hex encoded CKA_ID used in the search.
        id: String,
    },

    /// The token rejected the PIN.
    #[error("PIN incorrect")]
    PinIncorrect,

    /// Login failed for a reason other than a wrong PIN (locked, expired, ...).
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Any other failure reported by the cryptographic module.
    #[error("Device error: {0}")]
    Device(String),

    /// No certification path to a self-signed root could be built.
    #[error("Certification path could not be built: {0}")]
    PathBuild(String),

    /// Bytes are not a well-formed X.509 certificate.
    #[error("Certificate parsing error: {0}")]
    CertificateParsing(String),

    /// Configuration file could not be read or parsed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The signer was used after `close()`.
    #[error("Signer has been closed")]
    Closed,

    /// DER encoding/decoding error.
    #[error("DER error: {0}")]
    Der(#[from] der::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stable classification of [`SignerError`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or unrecognized input.
    Argument,
    /// No matching token.
    TokenNotFound,
    /// No matching object.
    ObjectNotFound,
    /// Several matching objects.
    AmbiguousMatch,
    /// Login rejected.
    Authentication,
    /// Other module failure.
    Device,
    /// No certification path.
    PathBuild,
    /// Malformed certificate or DER structure.
    Parse,
    /// Unreadable configuration.
    Config,
    /// Signer already closed.
    Closed,
    /// Local I/O failure.
    Io,
}

impl ErrorKind {
    /// Get a string representation of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Argument => "ArgumentError",
            Self::TokenNotFound => "TokenNotFound",
            Self::ObjectNotFound => "ObjectNotFound",
            Self::AmbiguousMatch => "AmbiguousMatch",
            Self::Authentication => "AuthenticationFailure",
            Self::Device => "DeviceError",
            Self::PathBuild => "PathBuildError",
            Self::Parse => "ParseError",
            Self::Config => "ConfigError",
            Self::Closed => "Closed",
            Self::Io => "IoError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SignerError {
    /// Create an argument error with the given message.
    pub fn argument(msg: impl Into<String>) -> Self {
        Self::Argument(msg.into())
    }

    /// Create a device error with the given message.
    pub fn device(msg: impl Into<String>) -> Self {
        Self::Device(msg.into())
    }

    /// Create an authentication error with the given message.
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a path building error with the given message.
    pub fn path_build(msg: impl Into<String>) -> Self {
        Self::PathBuild(msg.into())
    }

    /// Create a certificate parsing error with the given message.
    pub fn certificate_parsing(msg: impl Into<String>) -> Self {
        Self::CertificateParsing(msg.into())
    }

    /// Create a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a token-not-found error for the given criteria.
    pub fn token_not_found(serial: Option<&str>, label: Option<&str>) -> Self {
        Self::TokenNotFound {
            serial: serial.unwrap_or_default().to_string(),
            label: label.unwrap_or_default().to_string(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Argument(_) => ErrorKind::Argument,
            Self::TokenNotFound { .. } => ErrorKind::TokenNotFound,
            Self::ObjectNotFound { .. } => ErrorKind::ObjectNotFound,
            Self::AmbiguousMatch { .. } => ErrorKind::AmbiguousMatch,
            Self::PinIncorrect | Self::Authentication(_) => ErrorKind::Authentication,
            Self::Device(_) => ErrorKind::Device,
            Self::PathBuild(_) => ErrorKind::PathBuild,
            Self::CertificateParsing(_) | Self::Der(_) => ErrorKind::Parse,
            Self::Config(_) => ErrorKind::Config,
            Self::Closed => ErrorKind::Closed,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Returns true if the token rejected the PIN itself.
    ///
    /// Callers use this to re-prompt for the PIN instead of aborting.
    pub fn is_pin_incorrect(&self) -> bool {
        matches!(self, Self::PinIncorrect)
    }

    /// Returns true if this is a retryable error.
    ///
    /// Nothing is retried inside the crate, and no error kind is considered
    /// transient by itself. Re-prompting after [`SignerError::PinIncorrect`]
    /// is a caller decision.
    pub fn is_retryable(&self) -> bool {
        false
    }
}

#[cfg(feature = "pkcs11")]
impl From<cryptoki::error::Error> for SignerError {
    fn from(err: cryptoki::error::Error) -> Self {
        Self::Device(err.to_string())
    }
}
