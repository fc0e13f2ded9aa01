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

//! Software-based (in-memory) cryptographic module.
//!
//! This module provides an in-process implementation of [`CryptoModule`] that
//! behaves like a PKCS#11 library with one slot per configured token. It is
//! primarily intended for:
//!
//! - **Development and testing**: exercising token location, login and signing
//!   without hardware or a PKCS#11 library
//! - **Reproducible fixtures**: deterministic RSA PKCS#1 v1.5 signatures
//!
//! # Security Considerations
//!
//! **WARNING**: private keys live in process memory. Do **NOT** use this module
//! where the key must be protected by a hardware boundary.
//!
//! # Behavior
//!
//! - Login state is per token and shared by all sessions of the token. It is
//!   cleared by logout or when the last session of the token closes.
//! - Private keys are private objects: searches only see them while logged in.
//! - Private keys are sensitive: `CKA_VALUE` is never returned.
//!
//! # Example
//!
//! ```no_run
//! use rsa::pkcs8::DecodePrivateKey;
//! use rsa::RsaPrivateKey;
//! use usg_pkcs11_signer::hsm::{SoftwareModule, SoftwareToken};
//!
//! # fn example(key_pem: &str, cert_der: Vec<u8>) -> Result<(), Box<dyn std::error::Error>> {
//! let key = RsaPrivateKey::from_pkcs8_pem(key_pem)?;
//!
//! let module = SoftwareModule::new().with_token(
//!     SoftwareToken::new("0001", "Signing Token", "11111111")
//!         .with_private_key("John Doe", b"\x01", key)
//!         .with_certificate("John Doe", b"\x01", cert_der),
//! );
//! # Ok(())
//! # }
//! ```

use super::{
    AttributeKind, CertificateType, CryptoModule, KeyType, ModuleSession, ObjectClass,
    SearchAttribute, SignMechanism, TokenInfo, TokenLogins,
};
use crate::error::{Result, SignerError};
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Description of one token held by a [`SoftwareModule`].
#[derive(Clone)]
pub struct SoftwareToken {
    info: TokenInfo,
    pin: String,
    objects: Vec<SoftwareObject>,
    combined_mechanisms: bool,
    protected_authentication_path: bool,
    recognized: bool,
}

#[derive(Clone)]
struct SoftwareObject {
    label: Vec<u8>,
    id: Vec<u8>,
    data: ObjectData,
}

#[derive(Clone)]
enum ObjectData {
    PrivateKey {
        key: RsaPrivateKey,
        expose_public: bool,
    },
    Certificate {
        der: Vec<u8>,
    },
}

impl SoftwareObject {
    fn class(&self) -> ObjectClass {
        match self.data {
            ObjectData::PrivateKey { .. } => ObjectClass::PrivateKey,
            ObjectData::Certificate { .. } => ObjectClass::Certificate,
        }
    }

    fn is_private(&self) -> bool {
        self.class() == ObjectClass::PrivateKey
    }

    fn matches(&self, attribute: &SearchAttribute) -> bool {
        match (attribute, &self.data) {
            (SearchAttribute::Class(class), _) => *class == self.class(),
            (SearchAttribute::KeyType(KeyType::Rsa), ObjectData::PrivateKey { .. }) => true,
            (
                SearchAttribute::CertificateType(CertificateType::X509),
                ObjectData::Certificate { .. },
            ) => true,
            (SearchAttribute::Label(label), _) => *label == self.label,
            (SearchAttribute::Id(id), _) => *id == self.id,
            _ => false,
        }
    }
}

impl SoftwareToken {
    /// Create an empty token with the given serial number, label and user PIN.
    pub fn new(
        serial_number: impl Into<String>,
        label: impl Into<String>,
        pin: impl Into<String>,
    ) -> Self {
        Self {
            info: TokenInfo {
                manufacturer_id: "usg-pkcs11-signer".to_string(),
                model: "Software Token".to_string(),
                serial_number: serial_number.into(),
                label: label.into(),
            },
            pin: pin.into(),
            objects: Vec::new(),
            combined_mechanisms: true,
            protected_authentication_path: false,
            recognized: true,
        }
    }

    /// Set the manufacturer reported in the token info.
    pub fn with_manufacturer(mut self, manufacturer_id: impl Into<String>) -> Self {
        self.info.manufacturer_id = manufacturer_id.into();
        self
    }

    /// Set the model reported in the token info.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.info.model = model.into();
        self
    }

    /// Store an RSA private key that exposes CKA_MODULUS and CKA_PUBLIC_EXPONENT.
    pub fn with_private_key(
        self,
        label: impl AsRef<[u8]>,
        id: impl AsRef<[u8]>,
        key: RsaPrivateKey,
    ) -> Self {
        self.push_key(label, id, key, true)
    }

    /// Store an RSA private key that does not expose its public components.
    pub fn with_opaque_private_key(
        self,
        label: impl AsRef<[u8]>,
        id: impl AsRef<[u8]>,
        key: RsaPrivateKey,
    ) -> Self {
        self.push_key(label, id, key, false)
    }

    fn push_key(
        mut self,
        label: impl AsRef<[u8]>,
        id: impl AsRef<[u8]>,
        key: RsaPrivateKey,
        expose_public: bool,
    ) -> Self {
        self.objects.push(SoftwareObject {
            label: label.as_ref().to_vec(),
            id: id.as_ref().to_vec(),
            data: ObjectData::PrivateKey { key, expose_public },
        });
        self
    }

    /// Store an X.509 certificate object holding `der` as CKA_VALUE.
    pub fn with_certificate(
        mut self,
        label: impl AsRef<[u8]>,
        id: impl AsRef<[u8]>,
        der: impl Into<Vec<u8>>,
    ) -> Self {
        self.objects.push(SoftwareObject {
            label: label.as_ref().to_vec(),
            id: id.as_ref().to_vec(),
            data: ObjectData::Certificate { der: der.into() },
        });
        self
    }

    /// Only support raw `CKM_RSA_PKCS`, like many smartcards.
    pub fn without_combined_mechanisms(mut self) -> Self {
        self.combined_mechanisms = false;
        self
    }

    /// Accept login without a PIN (PIN pad or biometric reader).
    pub fn with_protected_authentication_path(mut self) -> Self {
        self.protected_authentication_path = true;
        self
    }

    /// Report the token as not recognized by the module.
    pub fn unrecognized(mut self) -> Self {
        self.recognized = false;
        self
    }
}

impl fmt::Debug for SoftwareToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareToken")
            .field("info", &self.info)
            .field("pin", &"[REDACTED]")
            .field("objects", &self.objects.len())
            .field("combined_mechanisms", &self.combined_mechanisms)
            .field("recognized", &self.recognized)
            .finish()
    }
}

struct TokenState {
    token: SoftwareToken,
    logged_in: bool,
    open_sessions: usize,
    logins: TokenLogins,
}

/// In-memory module with one slot per token.
///
/// Clones share the same tokens and login state.
#[derive(Clone, Default)]
pub struct SoftwareModule {
    tokens: Arc<Mutex<Vec<TokenState>>>,
}

impl SoftwareModule {
    /// Create a module without tokens.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a token into the next free slot.
    pub fn with_token(self, token: SoftwareToken) -> Self {
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.push(TokenState {
                token,
                logged_in: false,
                open_sessions: 0,
                logins: TokenLogins::default(),
            });
        }
        self
    }

    /// Number of sessions currently open across all tokens.
    pub fn open_session_count(&self) -> usize {
        self.tokens
            .lock()
            .map(|tokens| tokens.iter().map(|t| t.open_sessions).sum())
            .unwrap_or_default()
    }

    /// Returns true if the token with `serial_number` is logged in.
    pub fn is_logged_in(&self, serial_number: &str) -> bool {
        self.tokens
            .lock()
            .map(|tokens| {
                tokens
                    .iter()
                    .any(|t| t.token.info.serial_number == serial_number && t.logged_in)
            })
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<TokenState>>> {
        lock_tokens(&self.tokens)
    }
}

impl fmt::Debug for SoftwareModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareModule")
            .field("open_sessions", &self.open_session_count())
            .finish()
    }
}

fn lock_tokens(tokens: &Mutex<Vec<TokenState>>) -> Result<MutexGuard<'_, Vec<TokenState>>> {
    tokens
        .lock()
        .map_err(|_| SignerError::device("Software module state is poisoned"))
}

fn slot_state(tokens: &mut [TokenState], slot: usize) -> Result<&mut TokenState> {
    tokens
        .get_mut(slot)
        .ok_or_else(|| SignerError::device(format!("CKR_SLOT_ID_INVALID: slot {}", slot)))
}

impl CryptoModule for SoftwareModule {
    type Slot = usize;
    type Session = SoftwareSession;

    fn slots_with_token(&self) -> Result<Vec<usize>> {
        Ok((0..self.lock()?.len()).collect())
    }

    fn token_info(&self, slot: usize) -> Result<Option<TokenInfo>> {
        let mut tokens = self.lock()?;
        let state = slot_state(&mut tokens, slot)?;
        if !state.token.recognized {
            return Ok(None);
        }
        Ok(Some(state.token.info.clone()))
    }

    fn open_session(&self, slot: usize) -> Result<SoftwareSession> {
        let mut tokens = self.lock()?;
        let state = slot_state(&mut tokens, slot)?;
        if !state.token.recognized {
            return Err(SignerError::device("CKR_TOKEN_NOT_RECOGNIZED"));
        }
        state.open_sessions += 1;
        debug!(slot, open_sessions = state.open_sessions, "Opened software session");

        Ok(SoftwareSession {
            tokens: Arc::clone(&self.tokens),
            slot,
            logins: state.logins.clone(),
        })
    }
}

/// Session on a [`SoftwareModule`] token. Dropping it closes the session.
pub struct SoftwareSession {
    tokens: Arc<Mutex<Vec<TokenState>>>,
    slot: usize,
    logins: TokenLogins,
}

impl SoftwareSession {
    fn with_state<T>(&self, f: impl FnOnce(&mut TokenState) -> Result<T>) -> Result<T> {
        let mut tokens = lock_tokens(&self.tokens)?;
        f(slot_state(&mut tokens, self.slot)?)
    }
}

impl fmt::Debug for SoftwareSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareSession")
            .field("slot", &self.slot)
            .finish()
    }
}

impl ModuleSession for SoftwareSession {
    type Object = usize;

    fn login(&self, pin: Option<&str>) -> Result<bool> {
        self.with_state(|state| {
            if state.logged_in {
                return Ok(false);
            }
            match pin {
                Some(pin) if pin == state.token.pin => {}
                Some(_) => return Err(SignerError::PinIncorrect),
                None if state.token.protected_authentication_path => {}
                None => {
                    return Err(SignerError::authentication(
                        "Token has no protected authentication path and no PIN was given",
                    ))
                }
            }
            state.logged_in = true;
            Ok(true)
        })
    }

    fn logout(&self) -> Result<()> {
        self.with_state(|state| {
            if !state.logged_in {
                return Err(SignerError::device("CKR_USER_NOT_LOGGED_IN"));
            }
            state.logged_in = false;
            Ok(())
        })
    }

    fn find_objects(&self, template: &[SearchAttribute]) -> Result<Vec<usize>> {
        self.with_state(|state| {
            let logged_in = state.logged_in;
            Ok(state
                .token
                .objects
                .iter()
                .enumerate()
                .filter(|(_, object)| logged_in || !object.is_private())
                .filter(|(_, object)| template.iter().all(|attr| object.matches(attr)))
                .map(|(handle, _)| handle)
                .collect())
        })
    }

    fn read_attribute(&self, object: usize, kind: AttributeKind) -> Result<Option<Vec<u8>>> {
        self.with_state(|state| {
            let logged_in = state.logged_in;
            let object = state
                .token
                .objects
                .get(object)
                .filter(|object| logged_in || !object.is_private())
                .ok_or_else(|| SignerError::device("CKR_OBJECT_HANDLE_INVALID"))?;

            Ok(match (kind, &object.data) {
                (AttributeKind::Label, _) => Some(object.label.clone()),
                (AttributeKind::Id, _) => Some(object.id.clone()),
                (AttributeKind::Value, ObjectData::Certificate { der }) => Some(der.clone()),
                (
                    AttributeKind::Modulus,
                    ObjectData::PrivateKey {
                        key,
                        expose_public: true,
                    },
                ) => Some(key.n().to_bytes_be()),
                (
                    AttributeKind::PublicExponent,
                    ObjectData::PrivateKey {
                        key,
                        expose_public: true,
                    },
                ) => Some(key.e().to_bytes_be()),
                _ => None,
            })
        })
    }

    fn sign(&self, mechanism: SignMechanism, key: usize, data: &[u8]) -> Result<Vec<u8>> {
        self.with_state(|state| {
            if !state.logged_in {
                return Err(SignerError::device("CKR_USER_NOT_LOGGED_IN"));
            }
            let key = match state.token.objects.get(key).map(|object| &object.data) {
                Some(ObjectData::PrivateKey { key, .. }) => key,
                _ => return Err(SignerError::device("CKR_KEY_HANDLE_INVALID")),
            };

            let signature = match mechanism.digest() {
                None => key.sign(Pkcs1v15Sign::new_unprefixed(), data),
                Some(_) if !state.token.combined_mechanisms => {
                    return Err(SignerError::device(format!(
                        "CKR_MECHANISM_INVALID: {}",
                        mechanism
                    )))
                }
                Some(algorithm) => key.sign(algorithm.pkcs1v15(), &algorithm.digest(data)),
            };

            signature.map_err(|e| SignerError::device(format!("{} failed: {}", mechanism, e)))
        })
    }

    fn logins(&self) -> &TokenLogins {
        &self.logins
    }
}

impl Drop for SoftwareSession {
    fn drop(&mut self) {
        if let Ok(mut tokens) = self.tokens.lock() {
            if let Some(state) = tokens.get_mut(self.slot) {
                state.open_sessions = state.open_sessions.saturating_sub(1);
                if state.open_sessions == 0 {
                    state.logged_in = false;
                }
                debug!(slot = self.slot, open_sessions = state.open_sessions, "Closed software session");
            }
        }
    }
}
