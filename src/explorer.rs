// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)

//! Token and object enumeration.
//!
//! Used to find out what to put in a [`SignerConfig`](crate::SignerConfig):
//! which tokens are present, and which keys and certificates they hold.

use crate::certificate::{Certificate, PrivateKeyRef};
use crate::error::Result;
use crate::hsm::{CryptoModule, ModuleSession};
use crate::object::{find_all, read_certificate, read_private_key, ObjectKind};
use crate::session::AuthenticatedSession;
use crate::token::{list_tokens, Token};
use tracing::debug;

#[cfg(feature = "pkcs11")]
use crate::hsm::CryptokiModule;
#[cfg(feature = "pkcs11")]
use std::path::Path;

/// Private keys and certificates found on a token.
#[derive(Debug, Clone, Default)]
pub struct TokenObjects {
    /// RSA private keys. Empty when no PIN was given.
    pub private_keys: Vec<PrivateKeyRef>,

    /// X.509 certificates.
    pub certificates: Vec<Certificate>,
}

impl TokenObjects {
    /// Certificate with the same public key as `key`, if any.
    pub fn certificate_for(&self, key: &PrivateKeyRef) -> Option<&Certificate> {
        self.certificates
            .iter()
            .find(|certificate| key.matches(certificate).decided() == Some(true))
    }
}

/// Read-only view of the tokens of a module.
#[derive(Debug)]
pub struct TokenExplorer<M: CryptoModule> {
    module: M,
}

#[cfg(feature = "pkcs11")]
impl TokenExplorer<CryptokiModule> {
    /// Load a PKCS#11 library.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(CryptokiModule::load(path.as_ref())?))
    }
}

impl<M: CryptoModule> TokenExplorer<M> {
    /// Explore the tokens of an already loaded module.
    pub fn new(module: M) -> Self {
        Self { module }
    }

    /// Every recognized token.
    pub fn tokens(&self) -> Result<Vec<Token<M::Slot>>> {
        list_tokens(&self.module)
    }

    /// List the objects of `token`.
    ///
    /// Without a PIN only public objects are visible, which usually means
    /// certificates only. A login made here is undone before returning, and
    /// a login held by a live signer on the same module is left in place.
    ///
    /// # Errors
    ///
    /// [`SignerError::CertificateParsing`](crate::SignerError::CertificateParsing)
    /// if a certificate object does not hold a valid X.509 certificate.
    pub fn token_objects(&self, token: &Token<M::Slot>, pin: Option<&str>) -> Result<TokenObjects> {
        let session = self.module.open_session(token.slot())?;

        let mut objects = TokenObjects::default();
        match pin {
            Some(pin) => {
                let session = AuthenticatedSession::login(session, Some(pin))?;
                for key in find_all(&*session, ObjectKind::PrivateKey)? {
                    objects.private_keys.push(read_private_key(&*session, key)?);
                }
                objects.certificates = read_certificates(&*session)?;
            }
            None => objects.certificates = read_certificates(&session)?,
        }

        debug!(
            token = token.label(),
            private_keys = objects.private_keys.len(),
            certificates = objects.certificates.len(),
            "Listed token objects"
        );
        Ok(objects)
    }

    /// The underlying module.
    pub fn module(&self) -> &M {
        &self.module
    }
}

fn read_certificates<S: ModuleSession>(session: &S) -> Result<Vec<Certificate>> {
    find_all(session, ObjectKind::Certificate)?
        .into_iter()
        .map(|object| read_certificate(session, object))
        .collect()
}
