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

//! Configuration types for the PKCS#11 signer.
//!
//! A [`SignerConfig`] names the PKCS#11 library, the token, the PIN, the key
//! and the signing parameters. It can be assembled with the builder or read
//! from a TOML file:
//!
//! ```toml
//! module_path = "/usr/lib/softhsm/libsofthsm2.so"
//!
//! [token]
//! serial = "7BFF2737350B262C"
//! label = "Pkcs11Interop"
//! pin_env = "P11_SIGNER_PIN"
//!
//! [key]
//! label = "John Doe"
//! id = "73006233654C4C88A21555CC882AFA58"
//!
//! [signing]
//! hash_algorithm = "SHA256"
//! strategy = "host-hashed"
//! ```

use crate::digest::HashAlgorithm;
use crate::error::{Result, SignerError};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// How the message digest is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SigningStrategy {
    /// Hash on the host, wrap the digest in a DigestInfo and sign it with
    /// raw `CKM_RSA_PKCS`.
    #[default]
    HostHashed,

    /// Let the device hash and sign with a `CKM_SHAx_RSA_PKCS` mechanism.
    DeviceCombined,
}

impl SigningStrategy {
    /// Configuration name ("host-hashed", "device-combined").
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HostHashed => "host-hashed",
            Self::DeviceCombined => "device-combined",
        }
    }
}

impl fmt::Display for SigningStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SigningStrategy {
    type Err = SignerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "hosthashed" => Ok(Self::HostHashed),
            "devicecombined" => Ok(Self::DeviceCombined),
            _ => Err(SignerError::argument(format!(
                "Invalid signing strategy specified: \"{}\"",
                s
            ))),
        }
    }
}

/// Configuration for a [`Pkcs11Signer`](crate::Pkcs11Signer).
#[derive(Clone, Default)]
pub struct SignerConfig {
    /// Path to the PKCS#11 library.
    pub module_path: Option<PathBuf>,

    /// Serial number of the token.
    pub token_serial: Option<String>,

    /// Label of the token.
    pub token_label: Option<String>,

    /// User PIN. `None` logs in through the protected authentication path.
    pub pin: Option<String>,

    /// CKA_LABEL of the private key.
    pub key_label: Option<String>,

    /// CKA_ID of the private key.
    pub key_id: Option<Vec<u8>>,

    /// Digest algorithm.
    pub hash_algorithm: HashAlgorithm,

    /// Where the digest is computed.
    pub strategy: SigningStrategy,
}

impl fmt::Debug for SignerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignerConfig")
            .field("module_path", &self.module_path)
            .field("token_serial", &self.token_serial)
            .field("token_label", &self.token_label)
            .field("pin", &self.pin.as_ref().map(|_| "[REDACTED]"))
            .field("key_label", &self.key_label)
            .field("key_id", &self.key_id.as_ref().map(hex::encode))
            .field("hash_algorithm", &self.hash_algorithm)
            .field("strategy", &self.strategy)
            .finish()
    }
}

impl SignerConfig {
    /// Create a new configuration builder.
    pub fn builder() -> SignerConfigBuilder {
        SignerConfigBuilder::new()
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// [`SignerError::Config`] for malformed TOML or unknown fields, and
    /// [`SignerError::Argument`] for an unrecognized hash algorithm, signing
    /// strategy or key id.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(toml_str).map_err(|e| SignerError::config(format!("Invalid TOML: {e}")))?;
        file.into_config()
    }

    /// Read configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SignerError::config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }
}

/// Builder for [`SignerConfig`].
#[derive(Debug, Default)]
pub struct SignerConfigBuilder {
    config: SignerConfig,
}

impl SignerConfigBuilder {
    /// Create a new configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the PKCS#11 library path.
    pub fn module_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.module_path = Some(path.into());
        self
    }

    /// Set the token serial number.
    pub fn token_serial(mut self, serial: impl Into<String>) -> Self {
        self.config.token_serial = Some(serial.into());
        self
    }

    /// Set the token label.
    pub fn token_label(mut self, label: impl Into<String>) -> Self {
        self.config.token_label = Some(label.into());
        self
    }

    /// Set the user PIN.
    pub fn pin(mut self, pin: impl Into<String>) -> Self {
        self.config.pin = Some(pin.into());
        self
    }

    /// Set the private key label.
    pub fn key_label(mut self, label: impl Into<String>) -> Self {
        self.config.key_label = Some(label.into());
        self
    }

    /// Set the private key id.
    pub fn key_id(mut self, id: impl Into<Vec<u8>>) -> Self {
        self.config.key_id = Some(id.into());
        self
    }

    /// Set the private key id from its hex form.
    pub fn key_id_hex(mut self, id: &str) -> Result<Self> {
        self.config.key_id = Some(decode_key_id(id)?);
        Ok(self)
    }

    /// Set the digest algorithm.
    pub fn hash_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.config.hash_algorithm = algorithm;
        self
    }

    /// Set the digest algorithm by name ("SHA256", "sha-384", ...).
    pub fn hash_algorithm_name(mut self, name: &str) -> Result<Self> {
        self.config.hash_algorithm = name.parse()?;
        Ok(self)
    }

    /// Set the signing strategy.
    pub fn strategy(mut self, strategy: SigningStrategy) -> Self {
        self.config.strategy = strategy;
        self
    }

    /// Build the configuration.
    ///
    /// Required fields are checked when a signer is opened with it.
    pub fn build(self) -> SignerConfig {
        self.config
    }
}

fn decode_key_id(id: &str) -> Result<Vec<u8>> {
    hex::decode(id.trim())
        .map_err(|e| SignerError::argument(format!("Invalid key id \"{}\": {}", id, e)))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    module_path: Option<PathBuf>,

    #[serde(default)]
    token: TokenSection,

    #[serde(default)]
    key: KeySection,

    #[serde(default)]
    signing: SigningSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TokenSection {
    serial: Option<String>,
    label: Option<String>,
    pin: Option<String>,
    pin_env: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct KeySection {
    label: Option<String>,
    id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SigningSection {
    hash_algorithm: Option<String>,
    strategy: Option<String>,
}

impl ConfigFile {
    fn into_config(self) -> Result<SignerConfig> {
        let pin = match (self.token.pin, self.token.pin_env) {
            (Some(_), Some(_)) => {
                return Err(SignerError::config(
                    "token.pin and token.pin_env are mutually exclusive",
                ))
            }
            (Some(pin), None) => Some(pin),
            (None, Some(var)) => Some(std::env::var(&var).map_err(|e| {
                SignerError::config(format!("Failed to read PIN from ${var}: {e}"))
            })?),
            (None, None) => None,
        };

        Ok(SignerConfig {
            module_path: self.module_path,
            token_serial: self.token.serial,
            token_label: self.token.label,
            pin,
            key_label: self.key.label,
            key_id: self.key.id.as_deref().map(decode_key_id).transpose()?,
            hash_algorithm: self
                .signing
                .hash_algorithm
                .as_deref()
                .map(HashAlgorithm::from_str)
                .transpose()?
                .unwrap_or_default(),
            strategy: self
                .signing
                .strategy
                .as_deref()
                .map(SigningStrategy::from_str)
                .transpose()?
                .unwrap_or_default(),
        })
    }
}
