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

//! PKCS#11 library integration through `cryptoki`.
//!
//! [`CryptokiModule`] loads a vendor PKCS#11 library (SoftHSM, smartcard
//! middleware, network HSM client) and exposes it as a [`CryptoModule`].
//!
//! # Example
//!
//! ```no_run
//! use usg_pkcs11_signer::hsm::{CryptoModule, CryptokiModule};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let module = CryptokiModule::load("/usr/lib/softhsm/libsofthsm2.so")?;
//! println!("{} slots with a token", module.slots_with_token()?.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Supported PKCS#11 Implementations
//!
//! Any PKCS#11 v2.20 compliant library should work. The signer only needs
//! `C_FindObjects`, `C_GetAttributeValue`, `C_Login` and `C_Sign` with
//! `CKM_RSA_PKCS` (plus the `CKM_SHAx_RSA_PKCS` mechanisms for combined
//! signing).

use super::{
    AttributeKind, CertificateType, CryptoModule, KeyType, ModuleSession, ObjectClass,
    SearchAttribute, SignMechanism, TokenInfo, TokenLogins,
};
use crate::error::{Result, SignerError};
use cryptoki::context::{CInitializeArgs, Pkcs11};
use cryptoki::error::{Error as CryptokiError, RvError};
use cryptoki::mechanism::Mechanism;
use cryptoki::object::{self, Attribute, AttributeType, ObjectHandle};
use cryptoki::session::{Session, UserType};
use cryptoki::slot::Slot;
use cryptoki::types::AuthPin;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// A PKCS#11 library loaded and initialized through `cryptoki`.
///
/// Clones share the same library context and login book-keeping. The library
/// is finalized when the last clone and the last session are dropped.
#[derive(Clone)]
pub struct CryptokiModule {
    pkcs11: Arc<Pkcs11>,
    logins: Arc<Mutex<HashMap<Slot, TokenLogins>>>,
}

impl CryptokiModule {
    /// Load and initialize the PKCS#11 library at `library_path`.
    ///
    /// The library is initialized with OS locking. Libraries that answer
    /// `CKR_CANT_LOCK` are rejected. A library that is already initialized in
    /// this process is accepted as is.
    ///
    /// # Errors
    ///
    /// Returns an argument error for an empty path and a device error if the
    /// library cannot be loaded or initialized.
    pub fn load<P: AsRef<Path>>(library_path: P) -> Result<Self> {
        let library_path = library_path.as_ref();
        if library_path.as_os_str().is_empty() {
            return Err(SignerError::argument("PKCS#11 library path is empty"));
        }

        let pkcs11 = Pkcs11::new(library_path).map_err(|e| {
            SignerError::device(format!(
                "Failed to load PKCS#11 library at {}: {}",
                library_path.display(),
                e
            ))
        })?;

        pkcs11
            .initialize(CInitializeArgs::OsThreads)
            .or_else(already_initialized)
            .map_err(initialize_error)?;

        info!(library = %library_path.display(), "Loaded PKCS#11 library");

        Ok(Self {
            pkcs11: Arc::new(pkcs11),
            logins: Arc::default(),
        })
    }
}

fn already_initialized(err: CryptokiError) -> std::result::Result<(), CryptokiError> {
    match err {
        CryptokiError::AlreadyInitialized
        | CryptokiError::Pkcs11(RvError::CryptokiAlreadyInitialized, _) => {
            debug!("PKCS#11 library already initialized");
            Ok(())
        }
        other => Err(other),
    }
}

fn initialize_error(err: CryptokiError) -> SignerError {
    match err {
        CryptokiError::Pkcs11(RvError::CantLock, _) => {
            SignerError::device("PKCS#11 library does not support OS locking (CKR_CANT_LOCK)")
        }
        e => SignerError::device(format!("Failed to initialize PKCS#11 library: {}", e)),
    }
}

impl fmt::Debug for CryptokiModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptokiModule").finish_non_exhaustive()
    }
}

impl CryptoModule for CryptokiModule {
    type Slot = Slot;
    type Session = CryptokiSession;

    fn slots_with_token(&self) -> Result<Vec<Slot>> {
        self.pkcs11
            .get_slots_with_token()
            .map_err(|e| SignerError::device(format!("Failed to get slots: {}", e)))
    }

    fn token_info(&self, slot: Slot) -> Result<Option<TokenInfo>> {
        match self.pkcs11.get_token_info(slot) {
            Ok(info) => Ok(Some(TokenInfo {
                manufacturer_id: info.manufacturer_id().trim().to_string(),
                model: info.model().trim().to_string(),
                serial_number: info.serial_number().trim().to_string(),
                label: info.label().trim().to_string(),
            })),
            Err(CryptokiError::Pkcs11(
                RvError::TokenNotPresent | RvError::TokenNotRecognized,
                _,
            )) => {
                debug!(?slot, "Skipping slot without a usable token");
                Ok(None)
            }
            Err(e) => Err(SignerError::device(format!(
                "Failed to get token info for {:?}: {}",
                slot, e
            ))),
        }
    }

    fn open_session(&self, slot: Slot) -> Result<CryptokiSession> {
        let session = self
            .pkcs11
            .open_ro_session(slot)
            .map_err(|e| SignerError::device(format!("Failed to open session: {}", e)))?;
        let logins = self
            .logins
            .lock()
            .map_err(|_| SignerError::device("Login state is poisoned"))?
            .entry(slot)
            .or_default()
            .clone();
        Ok(CryptokiSession { session, logins })
    }
}

/// Read-only session on a PKCS#11 token. Dropping it calls `C_CloseSession`.
pub struct CryptokiSession {
    session: Session,
    logins: TokenLogins,
}

impl fmt::Debug for CryptokiSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptokiSession").finish_non_exhaustive()
    }
}

fn to_cryptoki_attribute(attribute: &SearchAttribute) -> Attribute {
    match attribute {
        SearchAttribute::Class(ObjectClass::PrivateKey) => {
            Attribute::Class(object::ObjectClass::PRIVATE_KEY)
        }
        SearchAttribute::Class(ObjectClass::Certificate) => {
            Attribute::Class(object::ObjectClass::CERTIFICATE)
        }
        SearchAttribute::KeyType(KeyType::Rsa) => Attribute::KeyType(object::KeyType::RSA),
        SearchAttribute::CertificateType(CertificateType::X509) => {
            Attribute::CertificateType(object::CertificateType::X_509)
        }
        SearchAttribute::Label(label) => Attribute::Label(label.clone()),
        SearchAttribute::Id(id) => Attribute::Id(id.clone()),
    }
}

fn to_cryptoki_mechanism(mechanism: SignMechanism) -> Mechanism<'static> {
    match mechanism {
        SignMechanism::RsaPkcs => Mechanism::RsaPkcs,
        SignMechanism::Sha1RsaPkcs => Mechanism::Sha1RsaPkcs,
        SignMechanism::Sha256RsaPkcs => Mechanism::Sha256RsaPkcs,
        SignMechanism::Sha384RsaPkcs => Mechanism::Sha384RsaPkcs,
        SignMechanism::Sha512RsaPkcs => Mechanism::Sha512RsaPkcs,
    }
}

impl ModuleSession for CryptokiSession {
    type Object = ObjectHandle;

    fn login(&self, pin: Option<&str>) -> Result<bool> {
        let pin = pin.map(|pin| AuthPin::new(pin.to_string()));
        match self.session.login(UserType::User, pin.as_ref()) {
            Ok(()) => Ok(true),
            Err(CryptokiError::Pkcs11(RvError::UserAlreadyLoggedIn, _)) => Ok(false),
            Err(CryptokiError::Pkcs11(RvError::PinIncorrect, _)) => Err(SignerError::PinIncorrect),
            Err(CryptokiError::Pkcs11(
                rv @ (RvError::PinLocked
                | RvError::PinExpired
                | RvError::PinInvalid
                | RvError::PinLenRange),
                _,
            )) => Err(SignerError::authentication(rv.to_string())),
            Err(e) => Err(SignerError::device(format!("Failed to login to token: {}", e))),
        }
    }

    fn logout(&self) -> Result<()> {
        self.session
            .logout()
            .map_err(|e| SignerError::device(format!("Failed to logout: {}", e)))
    }

    fn find_objects(&self, template: &[SearchAttribute]) -> Result<Vec<ObjectHandle>> {
        let template: Vec<Attribute> = template.iter().map(to_cryptoki_attribute).collect();
        self.session
            .find_objects(&template)
            .map_err(|e| SignerError::device(format!("Failed to find objects: {}", e)))
    }

    fn read_attribute(&self, object: ObjectHandle, kind: AttributeKind) -> Result<Option<Vec<u8>>> {
        let attribute_type = match kind {
            AttributeKind::Label => AttributeType::Label,
            AttributeKind::Id => AttributeType::Id,
            AttributeKind::Value => AttributeType::Value,
            AttributeKind::Modulus => AttributeType::Modulus,
            AttributeKind::PublicExponent => AttributeType::PublicExponent,
        };

        let attributes = self
            .session
            .get_attributes(object, &[attribute_type])
            .map_err(|e| SignerError::device(format!("Failed to read {:?}: {}", kind, e)))?;

        // Unavailable or sensitive attributes are left out of the result.
        Ok(attributes.into_iter().find_map(|attribute| match attribute {
            Attribute::Label(bytes)
            | Attribute::Id(bytes)
            | Attribute::Value(bytes)
            | Attribute::Modulus(bytes)
            | Attribute::PublicExponent(bytes) => Some(bytes),
            _ => None,
        }))
    }

    fn sign(&self, mechanism: SignMechanism, key: ObjectHandle, data: &[u8]) -> Result<Vec<u8>> {
        self.session
            .sign(&to_cryptoki_mechanism(mechanism), key, data)
            .map_err(|e| SignerError::device(format!("{} failed: {}", mechanism, e)))
    }

    fn logins(&self) -> &TokenLogins {
        &self.logins
    }
}
