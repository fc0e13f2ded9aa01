// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)

//! Digest algorithms and PKCS#1 v1.5 DigestInfo encoding.
//!
//! When the host hashes the message, the token only performs the raw
//! `CKM_RSA_PKCS` operation, so the DER `DigestInfo` has to be built here:
//!
//! ```text
//! DigestInfo ::= SEQUENCE {
//!     digestAlgorithm AlgorithmIdentifier,
//!     digest          OCTET STRING
//! }
//! ```
//!
//! The algorithm identifier carries explicit NULL parameters, which yields the
//! same encoding the combined `CKM_SHAx_RSA_PKCS` mechanisms produce on the
//! device (RFC 8017 Section 9.2, note 1).

use crate::error::{Result, SignerError};
use crate::hsm::SignMechanism;
use const_oid::db::rfc5912::{
    ID_SHA_1, ID_SHA_256, ID_SHA_384, ID_SHA_512, SHA_1_WITH_RSA_ENCRYPTION,
    SHA_256_WITH_RSA_ENCRYPTION, SHA_384_WITH_RSA_ENCRYPTION, SHA_512_WITH_RSA_ENCRYPTION,
};
use der::asn1::{Any, OctetString};
use der::{Encode, Sequence};
use rsa::Pkcs1v15Sign;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use spki::{AlgorithmIdentifierOwned, ObjectIdentifier};
use std::fmt;
use std::str::FromStr;

/// Hash algorithm used for signature creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    /// SHA-1 (legacy documents only)
    Sha1,
    /// SHA-256
    #[default]
    Sha256,
    /// SHA-384
    Sha384,
    /// SHA-512
    Sha512,
}

impl HashAlgorithm {
    /// All supported algorithms.
    pub const ALL: [HashAlgorithm; 4] = [Self::Sha1, Self::Sha256, Self::Sha384, Self::Sha512];

    /// Name as expected by document signing layers ("SHA1", "SHA256", ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
            Self::Sha384 => "SHA384",
            Self::Sha512 => "SHA512",
        }
    }

    /// Digest algorithm OID.
    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            Self::Sha1 => ID_SHA_1,
            Self::Sha256 => ID_SHA_256,
            Self::Sha384 => ID_SHA_384,
            Self::Sha512 => ID_SHA_512,
        }
    }

    /// Digest output size in bytes.
    pub fn output_size(&self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    /// Hash `data`.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha1 => Sha1::digest(data).to_vec(),
            Self::Sha256 => Sha256::digest(data).to_vec(),
            Self::Sha384 => Sha384::digest(data).to_vec(),
            Self::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    /// Hash `data` and wrap the result in a DER encoded `DigestInfo`.
    pub fn digest_info(&self, data: &[u8]) -> Result<Vec<u8>> {
        encode_digest_info(*self, &self.digest(data))
    }

    /// Device mechanism that hashes and signs in one operation.
    pub fn combined_mechanism(&self) -> SignMechanism {
        match self {
            Self::Sha1 => SignMechanism::Sha1RsaPkcs,
            Self::Sha256 => SignMechanism::Sha256RsaPkcs,
            Self::Sha384 => SignMechanism::Sha384RsaPkcs,
            Self::Sha512 => SignMechanism::Sha512RsaPkcs,
        }
    }

    /// PKCS#1 v1.5 signature scheme with this digest's DigestInfo prefix.
    pub(crate) fn pkcs1v15(&self) -> Pkcs1v15Sign {
        match self {
            Self::Sha1 => Pkcs1v15Sign::new::<Sha1>(),
            Self::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
            Self::Sha384 => Pkcs1v15Sign::new::<Sha384>(),
            Self::Sha512 => Pkcs1v15Sign::new::<Sha512>(),
        }
    }

    /// Digest used by an `shaXWithRSAEncryption` certificate signature OID.
    pub fn from_rsa_signature_oid(oid: &ObjectIdentifier) -> Option<Self> {
        [
            (SHA_1_WITH_RSA_ENCRYPTION, Self::Sha1),
            (SHA_256_WITH_RSA_ENCRYPTION, Self::Sha256),
            (SHA_384_WITH_RSA_ENCRYPTION, Self::Sha384),
            (SHA_512_WITH_RSA_ENCRYPTION, Self::Sha512),
        ]
        .into_iter()
        .find(|(known, _)| known == oid)
        .map(|(_, algorithm)| algorithm)
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = SignerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().replace(['-', '_'], "").as_str() {
            "SHA1" => Ok(Self::Sha1),
            "SHA256" => Ok(Self::Sha256),
            "SHA384" => Ok(Self::Sha384),
            "SHA512" => Ok(Self::Sha512),
            _ => Err(SignerError::argument(format!(
                "Invalid hash algorithm specified: \"{}\"",
                s
            ))),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct DigestInfo {
    digest_algorithm: AlgorithmIdentifierOwned,
    digest: OctetString,
}

/// DER encode a PKCS#1 `DigestInfo` for an already computed digest.
///
/// Fails with an argument error when `digest` does not have the output size
/// of `algorithm`.
pub fn encode_digest_info(algorithm: HashAlgorithm, digest: &[u8]) -> Result<Vec<u8>> {
    if digest.len() != algorithm.output_size() {
        return Err(SignerError::argument(format!(
            "{} digest must be {} bytes, got {}",
            algorithm,
            algorithm.output_size(),
            digest.len()
        )));
    }

    let info = DigestInfo {
        digest_algorithm: AlgorithmIdentifierOwned {
            oid: algorithm.oid(),
            parameters: Some(Any::null()),
        },
        digest: OctetString::new(digest)?,
    };

    Ok(info.to_der()?)
}
