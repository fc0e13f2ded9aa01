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

//! Certificate model and key correlation.
//!
//! A private key object and a certificate object on a token are unrelated
//! PKCS#11 objects. The only proof that they belong together is that they
//! share a public key, so matching is done on public keys and never on
//! names.
//!
//! Matching is three-valued: when either side has no readable public key the
//! result is [`KeyMatch::Undecidable`], which is not the same as a mismatch.
//!
//! # Example
//!
//! ```no_run
//! use usg_pkcs11_signer::certificate::{Certificate, KeyMatch};
//!
//! # fn example(signing: &[u8], other: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
//! let signing = Certificate::from_bytes(signing)?;
//! let other = Certificate::from_bytes(other)?;
//!
//! match signing.matches_certificate(&other) {
//!     KeyMatch::Equal => println!("Same key pair"),
//!     KeyMatch::NotEqual => println!("Different key pairs"),
//!     KeyMatch::Undecidable => println!("Public key not available"),
//! }
//! # Ok(())
//! # }
//! ```

use crate::digest::HashAlgorithm;
use crate::error::{Result, SignerError};
use const_oid::db::rfc5280::{ID_CE_AUTHORITY_KEY_IDENTIFIER, ID_CE_SUBJECT_KEY_IDENTIFIER};
use const_oid::db::rfc5912::RSA_ENCRYPTION;
use der::asn1::AnyRef;
use der::{Decode, DecodePem, Encode, Sequence};
use rsa::{pkcs1, BigUint, RsaPublicKey};
use spki::{ObjectIdentifier, SubjectPublicKeyInfoOwned};
use std::fmt;
use std::time::SystemTime;
use x509_cert::ext::pkix::{AuthorityKeyIdentifier, SubjectKeyIdentifier};
use x509_cert::name::Name;

/// Largest RSA modulus accepted from a token or certificate.
const MAX_RSA_MODULUS_BITS: usize = 16384;

/// Public key of a certificate or private key object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PublicKey {
    /// RSA public key (modulus and public exponent).
    Rsa(RsaPublicKey),
    /// Any other algorithm, kept as its SubjectPublicKeyInfo.
    Other(SubjectPublicKeyInfoOwned),
}

impl PublicKey {
    /// Build an RSA public key from the big-endian CKA_MODULUS and
    /// CKA_PUBLIC_EXPONENT values.
    pub fn from_rsa_components(modulus: &[u8], public_exponent: &[u8]) -> Result<Self> {
        RsaPublicKey::new_with_max_size(
            BigUint::from_bytes_be(modulus),
            BigUint::from_bytes_be(public_exponent),
            MAX_RSA_MODULUS_BITS,
        )
        .map(Self::Rsa)
        .map_err(|e| SignerError::argument(format!("Invalid RSA public key: {}", e)))
    }

    /// Decode a SubjectPublicKeyInfo. Returns `None` for a malformed RSA key.
    ///
    /// RSA keys get the same size limit as keys read from a token.
    pub fn from_spki(spki: &SubjectPublicKeyInfoOwned) -> Option<Self> {
        if spki.algorithm.oid != RSA_ENCRYPTION {
            return Some(Self::Other(spki.clone()));
        }
        let key = pkcs1::RsaPublicKey::from_der(spki.subject_public_key.as_bytes()?).ok()?;
        Self::from_rsa_components(key.modulus.as_bytes(), key.public_exponent.as_bytes()).ok()
    }

    /// The RSA key, if this is one.
    pub fn as_rsa(&self) -> Option<&RsaPublicKey> {
        match self {
            Self::Rsa(key) => Some(key),
            Self::Other(_) => None,
        }
    }
}

/// Outcome of comparing two public keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyMatch {
    /// Both keys are known and structurally equal.
    Equal,
    /// Both keys are known and differ.
    NotEqual,
    /// At least one key is not available.
    Undecidable,
}

impl KeyMatch {
    /// Compare two optional public keys.
    pub fn compare(a: Option<&PublicKey>, b: Option<&PublicKey>) -> Self {
        match (a, b) {
            (Some(a), Some(b)) if a == b => Self::Equal,
            (Some(_), Some(_)) => Self::NotEqual,
            _ => Self::Undecidable,
        }
    }

    /// `Some(true)` / `Some(false)` when decided, `None` otherwise.
    pub fn decided(&self) -> Option<bool> {
        match self {
            Self::Equal => Some(true),
            Self::NotEqual => Some(false),
            Self::Undecidable => None,
        }
    }
}

/// Private key object found on a token.
///
/// The private component never leaves the device. The public key is present
/// only when the token exposes CKA_MODULUS and CKA_PUBLIC_EXPONENT.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrivateKeyRef {
    id: Vec<u8>,
    label: String,
    public_key: Option<PublicKey>,
}

impl PrivateKeyRef {
    /// Create a reference from the attributes read off the token.
    pub fn new(id: Vec<u8>, label: String, public_key: Option<PublicKey>) -> Self {
        Self {
            id,
            label,
            public_key,
        }
    }

    /// CKA_ID.
    pub fn id(&self) -> &[u8] {
        &self.id
    }

    /// CKA_ID, hex encoded.
    pub fn id_hex(&self) -> String {
        hex::encode(&self.id)
    }

    /// CKA_LABEL.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Public key, when exposed by the token.
    pub fn public_key(&self) -> Option<&PublicKey> {
        self.public_key.as_ref()
    }

    /// Compare with a certificate's public key.
    pub fn matches(&self, certificate: &Certificate) -> KeyMatch {
        certificate.matches(self)
    }
}

#[derive(Sequence)]
struct RawCertificate<'a> {
    tbs_certificate: AnyRef<'a>,
    signature_algorithm: AnyRef<'a>,
    signature: AnyRef<'a>,
}

/// An X.509 certificate with its original encoding and parsed public key.
#[derive(Clone)]
pub struct Certificate {
    id: Vec<u8>,
    label: Option<String>,
    der: Vec<u8>,
    parsed: x509_cert::Certificate,
    public_key: Option<PublicKey>,
}

impl Certificate {
    /// Parse a DER or PEM encoded certificate obtained outside a token.
    ///
    /// # Errors
    ///
    /// [`SignerError::Argument`] for empty input and
    /// [`SignerError::CertificateParsing`] when neither encoding parses.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (der, parsed) = decode(bytes)?;
        let public_key = PublicKey::from_spki(&parsed.tbs_certificate.subject_public_key_info);
        Ok(Self {
            id: Vec::new(),
            label: None,
            der,
            parsed,
            public_key,
        })
    }

    /// Parse the CKA_VALUE of a token certificate object.
    pub fn from_token_object(id: Vec<u8>, label: String, value: &[u8]) -> Result<Self> {
        Ok(Self {
            id,
            label: Some(label),
            ..Self::from_bytes(value)?
        })
    }

    /// CKA_ID (empty for certificates not read from a token).
    pub fn id(&self) -> &[u8] {
        &self.id
    }

    /// CKA_ID, hex encoded.
    pub fn id_hex(&self) -> String {
        hex::encode(&self.id)
    }

    /// CKA_LABEL, for certificates read from a token.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// DER encoding as it was read.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Parsed certificate.
    pub fn parsed(&self) -> &x509_cert::Certificate {
        &self.parsed
    }

    /// Public key, `None` if the embedded RSA key is malformed.
    pub fn public_key(&self) -> Option<&PublicKey> {
        self.public_key.as_ref()
    }

    /// Subject distinguished name.
    pub fn subject(&self) -> &Name {
        &self.parsed.tbs_certificate.subject
    }

    /// Issuer distinguished name.
    pub fn issuer(&self) -> &Name {
        &self.parsed.tbs_certificate.issuer
    }

    /// Subject key identifier extension value.
    pub fn subject_key_identifier(&self) -> Option<Vec<u8>> {
        let value = self.extension_value(&ID_CE_SUBJECT_KEY_IDENTIFIER)?;
        let ski = SubjectKeyIdentifier::from_der(value).ok()?;
        Some(ski.0.as_bytes().to_vec())
    }

    /// Key identifier of the authority key identifier extension.
    pub fn authority_key_identifier(&self) -> Option<Vec<u8>> {
        let value = self.extension_value(&ID_CE_AUTHORITY_KEY_IDENTIFIER)?;
        let aki = AuthorityKeyIdentifier::from_der(value).ok()?;
        aki.key_identifier.map(|id| id.as_bytes().to_vec())
    }

    fn extension_value(&self, oid: &ObjectIdentifier) -> Option<&[u8]> {
        self.parsed
            .tbs_certificate
            .extensions
            .as_ref()?
            .iter()
            .find(|ext| ext.extn_id == *oid)
            .map(|ext| ext.extn_value.as_bytes())
    }

    /// Compare with a private key's public key.
    pub fn matches(&self, key: &PrivateKeyRef) -> KeyMatch {
        KeyMatch::compare(self.public_key(), key.public_key())
    }

    /// Compare with another certificate's public key.
    pub fn matches_certificate(&self, other: &Certificate) -> KeyMatch {
        KeyMatch::compare(self.public_key(), other.public_key())
    }

    /// Returns true if the signature verifies against `key`.
    ///
    /// Only shaXWithRSAEncryption signatures can be verified; anything else
    /// returns false.
    pub fn is_signed_by(&self, key: &PublicKey) -> bool {
        let Some(key) = key.as_rsa() else {
            return false;
        };
        let Some(algorithm) =
            HashAlgorithm::from_rsa_signature_oid(&self.parsed.signature_algorithm.oid)
        else {
            return false;
        };
        let Some(signature) = self.parsed.signature.as_bytes() else {
            return false;
        };
        let Ok(tbs) = tbs_bytes(&self.der) else {
            return false;
        };

        key.verify(algorithm.pkcs1v15(), &algorithm.digest(&tbs), signature)
            .is_ok()
    }

    /// Returns true if `issuer` names this certificate's issuer and its key
    /// verifies this certificate's signature.
    pub fn is_issued_by(&self, issuer: &Certificate) -> bool {
        self.issuer() == issuer.subject()
            && issuer
                .public_key()
                .map(|key| self.is_signed_by(key))
                .unwrap_or(false)
    }

    /// Returns true if issuer equals subject and the certificate verifies
    /// against its own public key.
    pub fn is_self_signed(&self) -> bool {
        self.is_issued_by(self)
    }

    /// Returns true if `time` lies within the validity period.
    pub fn is_valid_at(&self, time: SystemTime) -> bool {
        let validity = &self.parsed.tbs_certificate.validity;
        validity.not_before.to_system_time() <= time && time <= validity.not_after.to_system_time()
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for Certificate {}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("id", &self.id_hex())
            .field("label", &self.label)
            .field("subject", &self.subject().to_string())
            .field("issuer", &self.issuer().to_string())
            .finish()
    }
}

fn decode(bytes: &[u8]) -> Result<(Vec<u8>, x509_cert::Certificate)> {
    if bytes.is_empty() {
        return Err(SignerError::argument("Certificate bytes are empty"));
    }

    let der_error = match x509_cert::Certificate::from_der(bytes) {
        Ok(parsed) => return Ok((bytes.to_vec(), parsed)),
        Err(e) => e,
    };

    match der::pem::decode_vec(bytes) {
        Ok((label, der)) if label == "CERTIFICATE" => {
            let parsed = x509_cert::Certificate::from_der(&der).map_err(|e| {
                SignerError::certificate_parsing(format!("Invalid certificate in PEM: {}", e))
            })?;
            Ok((der, parsed))
        }
        Ok((label, _)) => Err(SignerError::certificate_parsing(format!(
            "Unexpected PEM label \"{}\"",
            label
        ))),
        Err(_) => Err(SignerError::certificate_parsing(format!(
            "Not a DER or PEM encoded X.509 certificate: {}",
            der_error
        ))),
    }
}

/// TBSCertificate exactly as encoded in `der`.
fn tbs_bytes(der: &[u8]) -> Result<Vec<u8>> {
    Ok(RawCertificate::from_der(der)?.tbs_certificate.to_der()?)
}

/// Parse a DER or PEM encoded certificate.
pub fn parse_certificate(bytes: &[u8]) -> Result<x509_cert::Certificate> {
    decode(bytes).map(|(_, parsed)| parsed)
}

/// Canonical DER encoding of a parsed certificate.
pub fn to_der(certificate: &x509_cert::Certificate) -> Result<Vec<u8>> {
    Ok(certificate.to_der()?)
}

/// Parse a PEM encoded certificate. Prefer [`parse_certificate`] when the
/// encoding is unknown.
pub fn parse_pem(pem: &str) -> Result<x509_cert::Certificate> {
    x509_cert::Certificate::from_pem(pem)
        .map_err(|e| SignerError::certificate_parsing(format!("Invalid PEM certificate: {}", e)))
}

/// Returns true if the certificate is self-signed (names and signature).
pub fn is_self_signed(certificate: &x509_cert::Certificate) -> bool {
    to_der(certificate)
        .and_then(|der| Certificate::from_bytes(&der))
        .map(|certificate| certificate.is_self_signed())
        .unwrap_or(false)
}
