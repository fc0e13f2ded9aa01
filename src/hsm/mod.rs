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

//! Cryptographic module integration (smartcards, HSMs, software tokens).
//!
//! This module provides a trait-based abstraction over a PKCS#11 style
//! cryptographic module, so token location, object lookup and signing can run
//! against a real library loaded through `cryptoki` or against the in-process
//! [`SoftwareModule`].
//!
//! # Key Features
//!
//! - **Zero key material exposure**: private keys never leave the module
//! - **Blocking by design**: every call is one synchronous round-trip to the device
//! - **Module-agnostic**: the signer and locators work with any [`CryptoModule`]
//!
//! # Example
//!
//! ```no_run
//! use usg_pkcs11_signer::hsm::{CryptoModule, ModuleSession, SoftwareModule, SoftwareToken};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let module = SoftwareModule::new().with_token(SoftwareToken::new("0001", "Signing", "1234"));
//!
//! for slot in module.slots_with_token()? {
//!     if let Some(info) = module.token_info(slot)? {
//!         println!("{} ({})", info.label, info.serial_number);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod software;

#[cfg(feature = "pkcs11")]
pub mod pkcs11;

pub use software::{SoftwareModule, SoftwareToken};

#[cfg(feature = "pkcs11")]
pub use pkcs11::CryptokiModule;

use crate::digest::HashAlgorithm;
use crate::error::{Result, SignerError};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Token description read from a slot (CK_TOKEN_INFO subset).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenInfo {
    /// Manufacturer of the token.
    pub manufacturer_id: String,

    /// Token model.
    pub model: String,

    /// Token serial number.
    pub serial_number: String,

    /// Token label.
    pub label: String,
}

/// Object classes this crate searches for (CKA_CLASS).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectClass {
    /// CKO_PRIVATE_KEY
    PrivateKey,
    /// CKO_CERTIFICATE
    Certificate,
}

/// Key types (CKA_KEY_TYPE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    /// CKK_RSA
    Rsa,
}

/// Certificate types (CKA_CERTIFICATE_TYPE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CertificateType {
    /// CKC_X_509
    X509,
}

/// One attribute of an object search template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchAttribute {
    /// CKA_CLASS
    Class(ObjectClass),
    /// CKA_KEY_TYPE
    KeyType(KeyType),
    /// CKA_CERTIFICATE_TYPE
    CertificateType(CertificateType),
    /// CKA_LABEL
    Label(Vec<u8>),
    /// CKA_ID
    Id(Vec<u8>),
}

/// Attributes this crate reads from objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeKind {
    /// CKA_LABEL
    Label,
    /// CKA_ID
    Id,
    /// CKA_VALUE (DER bytes of a certificate)
    Value,
    /// CKA_MODULUS
    Modulus,
    /// CKA_PUBLIC_EXPONENT
    PublicExponent,
}

/// Signing mechanisms used by the signer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignMechanism {
    /// CKM_RSA_PKCS: raw PKCS#1 v1.5 padding over caller supplied DigestInfo.
    RsaPkcs,
    /// CKM_SHA1_RSA_PKCS
    Sha1RsaPkcs,
    /// CKM_SHA256_RSA_PKCS
    Sha256RsaPkcs,
    /// CKM_SHA384_RSA_PKCS
    Sha384RsaPkcs,
    /// CKM_SHA512_RSA_PKCS
    Sha512RsaPkcs,
}

impl SignMechanism {
    /// PKCS#11 mechanism name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RsaPkcs => "CKM_RSA_PKCS",
            Self::Sha1RsaPkcs => "CKM_SHA1_RSA_PKCS",
            Self::Sha256RsaPkcs => "CKM_SHA256_RSA_PKCS",
            Self::Sha384RsaPkcs => "CKM_SHA384_RSA_PKCS",
            Self::Sha512RsaPkcs => "CKM_SHA512_RSA_PKCS",
        }
    }

    /// Digest computed by the device, `None` for raw `CKM_RSA_PKCS`.
    pub fn digest(&self) -> Option<HashAlgorithm> {
        match self {
            Self::RsaPkcs => None,
            Self::Sha1RsaPkcs => Some(HashAlgorithm::Sha1),
            Self::Sha256RsaPkcs => Some(HashAlgorithm::Sha256),
            Self::Sha384RsaPkcs => Some(HashAlgorithm::Sha384),
            Self::Sha512RsaPkcs => Some(HashAlgorithm::Sha512),
        }
    }
}

impl fmt::Display for SignMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logins held on one token by this process.
///
/// PKCS#11 login state belongs to the token, not to the session that logged
/// in: one `C_Logout` ends it for every session. Every session a module opens
/// on a token therefore shares one `TokenLogins`, and the token is logged out
/// only when the last holder releases it. A login that was already in place
/// before the first holder arrived is never logged out here.
#[derive(Debug, Clone, Default)]
pub struct TokenLogins {
    state: Arc<Mutex<LoginState>>,
}

#[derive(Debug, Default)]
struct LoginState {
    holders: usize,
    owned: bool,
}

impl TokenLogins {
    /// Register a holder. `login` runs only for the first holder and reports
    /// whether it actually logged in.
    ///
    /// Returns true if this call performed the login. A failed login
    /// registers nothing.
    pub fn acquire(&self, login: impl FnOnce() -> Result<bool>) -> Result<bool> {
        let mut state = self.lock()?;
        let logged_in = if state.holders == 0 {
            let logged_in = login()?;
            state.owned = logged_in;
            logged_in
        } else {
            false
        };
        state.holders += 1;
        Ok(logged_in)
    }

    /// Drop a holder. `logout` runs when the last holder leaves and the login
    /// was made by a holder.
    ///
    /// Returns true if `logout` ran.
    pub fn release(&self, logout: impl FnOnce() -> Result<()>) -> Result<bool> {
        let mut state = self.lock()?;
        state.holders = state.holders.saturating_sub(1);
        if state.holders > 0 || !std::mem::take(&mut state.owned) {
            return Ok(false);
        }
        logout()?;
        Ok(true)
    }

    /// Number of live holders.
    pub fn holders(&self) -> usize {
        self.state.lock().map(|state| state.holders).unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, LoginState>> {
        self.state
            .lock()
            .map_err(|_| SignerError::device("Login state is poisoned"))
    }
}

/// A loaded cryptographic module (one PKCS#11 library or equivalent).
///
/// Implementations are blocking: each method is a round-trip to the device,
/// and latency ranges from microseconds (HSM) to seconds (smartcard).
pub trait CryptoModule {
    /// Handle to a slot.
    type Slot: Copy + fmt::Debug;

    /// Session type opened on a slot.
    type Session: ModuleSession;

    /// List the slots that currently hold a token.
    fn slots_with_token(&self) -> Result<Vec<Self::Slot>>;

    /// Read the token description of a slot.
    ///
    /// Returns `Ok(None)` when the token disappeared or is not recognized by
    /// the module (CKR_TOKEN_NOT_PRESENT / CKR_TOKEN_NOT_RECOGNIZED). Any other
    /// failure is an error.
    fn token_info(&self, slot: Self::Slot) -> Result<Option<TokenInfo>>;

    /// Open a new session on the slot.
    ///
    /// Dropping the returned session closes it.
    fn open_session(&self, slot: Self::Slot) -> Result<Self::Session>;
}

/// A session opened on a token.
///
/// Login state is per token, not per session: after one session logs in,
/// every session of the same application on that token can use private
/// objects until logout or until the last session closes.
pub trait ModuleSession {
    /// Handle to an object on the token.
    type Object: Copy + fmt::Debug + PartialEq;

    /// Log the normal user in. `None` uses the protected authentication path.
    ///
    /// Returns false if the token was already logged in
    /// (CKR_USER_ALREADY_LOGGED_IN).
    fn login(&self, pin: Option<&str>) -> Result<bool>;

    /// Log the user out.
    fn logout(&self) -> Result<()>;

    /// Return every object matching all attributes of `template`.
    fn find_objects(&self, template: &[SearchAttribute]) -> Result<Vec<Self::Object>>;

    /// Read one attribute. `Ok(None)` means the object does not expose it.
    fn read_attribute(&self, object: Self::Object, kind: AttributeKind) -> Result<Option<Vec<u8>>>;

    /// Sign `data` with `key` using `mechanism`.
    fn sign(&self, mechanism: SignMechanism, key: Self::Object, data: &[u8]) -> Result<Vec<u8>>;

    /// Login holders of this session's token, shared with every other session
    /// the module opened on it.
    fn logins(&self) -> &TokenLogins;
}
