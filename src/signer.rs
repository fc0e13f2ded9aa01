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

//! RSA PKCS#1 v1.5 signing with a key held on a PKCS#11 token.
//!
//! [`Pkcs11Signer`] binds to one private key when it is created: it selects the
//! token, opens a session, logs in and resolves the key. The logged-in session
//! is kept until [`Pkcs11Signer::close`] (or drop), so many documents can be
//! signed with a single login.
//!
//! Every [`sign`](Pkcs11Signer::sign) call opens its own short-lived session on
//! the token. Login state is per token, so those sessions can use the key.
//!
//! # Example
//!
//! ```no_run
//! use usg_pkcs11_signer::{HashAlgorithm, Pkcs11Signer, SignerConfig};
//!
//! # #[cfg(feature = "pkcs11")]
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SignerConfig::builder()
//!     .module_path("/usr/lib/softhsm/libsofthsm2.so")
//!     .token_label("Pkcs11Interop")
//!     .pin("11111111")
//!     .key_label("John Doe")
//!     .hash_algorithm(HashAlgorithm::Sha256)
//!     .build();
//!
//! let mut signer = Pkcs11Signer::open(&config)?;
//! let signature = signer.sign(b"Hello world")?;
//! let certificate = signer.signing_certificate()?.to_vec();
//! let path = signer.certificate_path::<Vec<u8>>(&[])?;
//! signer.close();
//! # Ok(())
//! # }
//! ```

use crate::certificate::{Certificate, PrivateKeyRef};
use crate::config::{SignerConfig, SigningStrategy};
use crate::digest::HashAlgorithm;
use crate::error::{Result, SignerError};
use crate::hsm::{CryptoModule, ModuleSession, SignMechanism};
use crate::object::{find_all, find_one, read_private_key, read_value, ObjectKind};
use crate::session::AuthenticatedSession;
use crate::token::{locate_token, Token};
use crate::validation::{CertPath, CertPathBuilder};
use std::fmt;
use tracing::{debug, info};

#[cfg(feature = "pkcs11")]
use crate::hsm::CryptokiModule;

type ObjectOf<M> = <<M as CryptoModule>::Session as ModuleSession>::Object;

/// Signature provider for document signing layers (PDF, CMS).
pub trait ExternalSignature {
    /// Digest algorithm applied to the message.
    fn hash_algorithm(&self) -> HashAlgorithm;

    /// Signature algorithm family, "RSA".
    fn encryption_algorithm(&self) -> &str;

    /// Sign `message`.
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>>;
}

// Fields drop in declaration order: the session logs out and closes before
// the module is released. The session is only held for its login.
struct Bound<M: CryptoModule> {
    _session: AuthenticatedSession<M::Session>,
    key: ObjectOf<M>,
    token: Token<M::Slot>,
    module: M,
}

/// Signer bound to one RSA private key on a token.
///
/// Not meant for concurrent use: calls on one signer must be serialized by
/// the caller.
pub struct Pkcs11Signer<M: CryptoModule> {
    bound: Option<Bound<M>>,
    hash_algorithm: HashAlgorithm,
    strategy: SigningStrategy,
    key_label: Option<String>,
    key_id: Option<Vec<u8>>,
    signing_certificate: Option<Vec<u8>>,
    all_certificates: Option<Vec<Vec<u8>>>,
}

#[cfg(feature = "pkcs11")]
impl Pkcs11Signer<CryptokiModule> {
    /// Load the PKCS#11 library named in `config` and bind to the key.
    ///
    /// # Errors
    ///
    /// [`SignerError::Argument`] if no library path is configured, plus every
    /// error of [`Pkcs11Signer::with_module`].
    pub fn open(config: &SignerConfig) -> Result<Self> {
        let path = config
            .module_path
            .as_deref()
            .filter(|path| !path.as_os_str().is_empty())
            .ok_or_else(|| SignerError::argument("PKCS#11 library path has to be specified"))?;

        let module = CryptokiModule::load(path)?;
        Self::with_module(module, config)
    }
}

impl<M: CryptoModule> Pkcs11Signer<M> {
    /// Bind to the key described by `config` on a token of `module`.
    ///
    /// Every resource acquired before a failure is released before the error
    /// is returned.
    ///
    /// # Errors
    ///
    /// - [`SignerError::Argument`] if neither token serial nor label is set
    /// - [`SignerError::TokenNotFound`] if no token matches
    /// - [`SignerError::PinIncorrect`] or [`SignerError::Authentication`] if
    ///   login fails
    /// - [`SignerError::Argument`] if neither key label nor id is set
    /// - [`SignerError::ObjectNotFound`] or [`SignerError::AmbiguousMatch`]
    ///   if the key cannot be resolved to exactly one object
    pub fn with_module(module: M, config: &SignerConfig) -> Result<Self> {
        let serial = non_empty(config.token_serial.as_deref());
        let label = non_empty(config.token_label.as_deref());
        if serial.is_none() && label.is_none() {
            return Err(SignerError::argument(
                "Token serial and/or label has to be specified",
            ));
        }

        let token = locate_token(&module, serial, label)?;
        let session = module.open_session(token.slot())?;
        let session = AuthenticatedSession::login(session, config.pin.as_deref())?;

        let key_label = non_empty(config.key_label.as_deref()).map(str::to_string);
        let key_id = config.key_id.clone().filter(|id| !id.is_empty());
        let key = find_one(
            &*session,
            ObjectKind::PrivateKey,
            key_label.as_deref(),
            key_id.as_deref(),
        )?;

        info!(
            token = token.label(),
            key_label = key_label.as_deref().unwrap_or_default(),
            key_id = %hex::encode(key_id.as_deref().unwrap_or_default()),
            hash = %config.hash_algorithm,
            strategy = %config.strategy,
            "Signer ready"
        );

        Ok(Self {
            bound: Some(Bound {
                _session: session,
                key,
                token,
                module,
            }),
            hash_algorithm: config.hash_algorithm,
            strategy: config.strategy,
            key_label,
            key_id,
            signing_certificate: None,
            all_certificates: None,
        })
    }

    fn bound(&self) -> Result<&Bound<M>> {
        self.bound.as_ref().ok_or(SignerError::Closed)
    }

    fn open_sub_session(&self) -> Result<(&Bound<M>, M::Session)> {
        let bound = self.bound()?;
        let session = bound.module.open_session(bound.token.slot())?;
        Ok((bound, session))
    }

    /// Sign `message` with the configured digest and strategy.
    ///
    /// With [`SigningStrategy::HostHashed`] the digest is computed here and
    /// signed as a DigestInfo with `CKM_RSA_PKCS`. With
    /// [`SigningStrategy::DeviceCombined`] the message is passed to the
    /// matching `CKM_SHAx_RSA_PKCS` mechanism. Both produce the same
    /// signature.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let (bound, session) = self.open_sub_session()?;

        let (mechanism, data) = match self.strategy {
            SigningStrategy::HostHashed => (
                SignMechanism::RsaPkcs,
                self.hash_algorithm.digest_info(message)?,
            ),
            SigningStrategy::DeviceCombined => {
                (self.hash_algorithm.combined_mechanism(), message.to_vec())
            }
        };

        let signature = session.sign(mechanism, bound.key, &data)?;
        debug!(%mechanism, length = signature.len(), "Created signature");
        Ok(signature)
    }

    /// DER encoding of the certificate stored with the key.
    ///
    /// The certificate is searched with the key's label and id and must be
    /// unique. It is read once and cached until [`close`](Self::close).
    pub fn signing_certificate(&mut self) -> Result<&[u8]> {
        let der = match self.signing_certificate.take() {
            Some(der) => der,
            None => {
                let (_, session) = self.open_sub_session()?;
                let handle = find_one(
                    &session,
                    ObjectKind::Certificate,
                    self.key_label.as_deref(),
                    self.key_id.as_deref(),
                )?;
                let der = read_value(&session, handle)?;
                debug!(length = der.len(), "Cached signing certificate");
                der
            }
        };
        Ok(self.signing_certificate.insert(der).as_slice())
    }

    /// DER encodings of every X.509 certificate on the token, cached until
    /// [`close`](Self::close).
    pub fn all_certificates(&mut self) -> Result<&[Vec<u8>]> {
        let certificates = match self.all_certificates.take() {
            Some(certificates) => certificates,
            None => {
                let (_, session) = self.open_sub_session()?;
                let certificates = find_all(&session, ObjectKind::Certificate)?
                    .into_iter()
                    .map(|handle| read_value(&session, handle))
                    .collect::<Result<Vec<_>>>()?;
                debug!(count = certificates.len(), "Cached token certificates");
                certificates
            }
        };
        Ok(self.all_certificates.insert(certificates).as_slice())
    }

    /// Build the certification path of the signing certificate.
    ///
    /// The pool is every certificate on the token plus `additional` (DER or
    /// PEM), for example intermediates obtained from a directory.
    pub fn certificate_path<T: AsRef<[u8]>>(&mut self, additional: &[T]) -> Result<CertPath> {
        let signing = Certificate::from_bytes(self.signing_certificate()?)?;

        let mut pool = self
            .all_certificates()?
            .iter()
            .map(|der| Certificate::from_bytes(der))
            .collect::<Result<Vec<_>>>()?;
        for bytes in additional {
            pool.push(Certificate::from_bytes(bytes.as_ref())?);
        }

        CertPathBuilder::new().build(&signing, &pool)
    }

    /// Attributes of the bound private key.
    pub fn private_key(&self) -> Result<PrivateKeyRef> {
        let (bound, session) = self.open_sub_session()?;
        read_private_key(&session, bound.key)
    }

    /// Digest algorithm used by [`sign`](Self::sign).
    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.hash_algorithm
    }

    /// Signature algorithm family, always "RSA".
    pub fn encryption_algorithm(&self) -> &'static str {
        "RSA"
    }

    /// Where the digest is computed.
    pub fn strategy(&self) -> SigningStrategy {
        self.strategy
    }

    /// Token holding the key.
    pub fn token(&self) -> Result<&Token<M::Slot>> {
        Ok(&self.bound()?.token)
    }

    /// CKA_LABEL used to select the key.
    pub fn key_label(&self) -> Option<&str> {
        self.key_label.as_deref()
    }

    /// CKA_ID used to select the key.
    pub fn key_id(&self) -> Option<&[u8]> {
        self.key_id.as_deref()
    }

    /// Returns false after [`close`](Self::close).
    pub fn is_open(&self) -> bool {
        self.bound.is_some()
    }

    /// Close the session and release the module. The token is logged out
    /// unless another signer or explorer on the same module still holds the
    /// login.
    ///
    /// Logout failures are ignored. Calling `close` again does nothing, and
    /// every other operation then fails with [`SignerError::Closed`].
    pub fn close(&mut self) {
        self.signing_certificate = None;
        self.all_certificates = None;
        if self.bound.take().is_some() {
            info!("Signer closed");
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.is_empty())
}

impl<M: CryptoModule> Drop for Pkcs11Signer<M> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<M: CryptoModule> ExternalSignature for Pkcs11Signer<M> {
    fn hash_algorithm(&self) -> HashAlgorithm {
        self.hash_algorithm
    }

    fn encryption_algorithm(&self) -> &str {
        "RSA"
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        Pkcs11Signer::sign(self, message)
    }
}

impl<M: CryptoModule> fmt::Debug for Pkcs11Signer<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pkcs11Signer")
            .field("token", &self.bound.as_ref().map(|bound| bound.token.label()))
            .field("key_label", &self.key_label)
            .field("key_id", &self.key_id.as_ref().map(hex::encode))
            .field("hash_algorithm", &self.hash_algorithm)
            .field("strategy", &self.strategy)
            .field("open", &self.is_open())
            .finish()
    }
}
