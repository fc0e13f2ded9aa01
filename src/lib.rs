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

//! # usg-pkcs11-signer
//!
//! RSA signing with keys held on PKCS#11 tokens (smartcards, USB tokens,
//! HSMs), for document signing layers such as PDF or CMS.
//!
//! The private key never leaves the device. This library locates the token,
//! the key and its certificate, produces RSA PKCS#1 v1.5 signatures, and
//! builds the certification path of the signing certificate.
//!
//! ## Features
//!
//! - **Token selection** by serial number and/or label
//! - **Key selection** by CKA_LABEL and/or CKA_ID, rejecting ambiguous matches
//! - **Two signing strategies**: hash on the host and sign a DigestInfo with
//!   `CKM_RSA_PKCS`, or pass the message to `CKM_SHAx_RSA_PKCS`
//! - **SHA-1, SHA-256, SHA-384 and SHA-512**
//! - **Certification path building** that verifies signatures and key
//!   identifiers, not just names
//! - **Token exploration** to list tokens, keys and certificates
//!
//! ## Quick Start
//!
//! ```no_run
//! use usg_pkcs11_signer::{ExternalSignature, Pkcs11Signer, SignerConfig};
//!
//! # #[cfg(feature = "pkcs11")]
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SignerConfig::from_file("signer.toml")?;
//! let mut signer = Pkcs11Signer::open(&config)?;
//!
//! let signature = signer.sign(b"document bytes")?;
//! println!("{} byte {} signature", signature.len(), signer.encryption_algorithm());
//!
//! for certificate in signer.certificate_path::<Vec<u8>>(&[])?.certificates() {
//!     println!("{}", certificate.subject());
//! }
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "pkcs11"))]
//! # fn main() {}
//! ```
//!
//! ## Configuration File
//!
//! ```toml
//! module_path = "/usr/lib/softhsm/libsofthsm2.so"
//!
//! [token]
//! label = "Pkcs11Interop"
//! pin_env = "SIGNER_PIN"
//!
//! [key]
//! label = "John Doe"
//!
//! [signing]
//! hash_algorithm = "SHA256"
//! strategy = "host-hashed"
//! ```
//!
//! ## Cargo Features
//!
//! - `pkcs11` (default): Loads PKCS#11 libraries through `cryptoki`. Without
//!   it only the in-memory [`hsm::SoftwareModule`] is available.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod certificate;
pub mod config;
pub mod digest;
pub mod error;
pub mod explorer;
pub mod hsm;
pub mod object;
pub mod session;
pub mod signer;
pub mod token;
pub mod validation;

// Re-export main types at crate root for convenience
pub use certificate::{Certificate, KeyMatch, PrivateKeyRef, PublicKey};
pub use config::{SignerConfig, SignerConfigBuilder, SigningStrategy};
pub use digest::HashAlgorithm;
pub use error::{ErrorKind, Result, SignerError};
pub use explorer::{TokenExplorer, TokenObjects};
pub use signer::{ExternalSignature, Pkcs11Signer};
pub use token::Token;
pub use validation::{build_cert_path, CertPath, CertPathBuilder, PathBuilderConfig};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
