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

//! Certification path building.
//!
//! This module builds the ordered chain from a signing certificate up to a
//! self-signed root out of an unordered pool of candidate certificates.
//!
//! The pool is treated as a directed issuance graph and searched depth first.
//! An edge from a certificate to a candidate issuer is only followed when:
//!
//! - the candidate's subject equals the certificate's issuer
//! - the authority key identifier of the certificate equals the candidate's
//!   subject key identifier, when both are present
//! - the certificate's signature verifies against the candidate's public key
//!
//! Name matching alone is never enough, so a certificate that merely copies an
//! issuer's distinguished name is not accepted as that issuer.
//!
//! # Example
//!
//! ```no_run
//! use usg_pkcs11_signer::validation::build_cert_path;
//!
//! # fn example(leaf: &[u8], intermediate: Vec<u8>, root: Vec<u8>) -> Result<(), Box<dyn std::error::Error>> {
//! let path = build_cert_path(leaf, &[root, intermediate])?;
//!
//! // Leaf first, root last
//! for certificate in path.certificates() {
//!     println!("{}", certificate.subject());
//! }
//! # Ok(())
//! # }
//! ```

use crate::certificate::Certificate;
use crate::error::{Result, SignerError};
use std::time::SystemTime;
use tracing::debug;

/// Configuration for path building.
#[derive(Debug, Clone)]
pub struct PathBuilderConfig {
    /// Maximum number of certificates in a path, leaf and root included
    /// (default: 10).
    pub max_path_length: usize,

    /// Reject certificates that are not valid at this time. `None` (the
    /// default) does not check validity periods.
    pub validation_time: Option<SystemTime>,
}

impl Default for PathBuilderConfig {
    fn default() -> Self {
        Self {
            max_path_length: 10,
            validation_time: None,
        }
    }
}

/// An ordered certification path: leaf first, self-signed root last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertPath {
    certificates: Vec<Certificate>,
}

impl CertPath {
    /// Number of certificates in the path.
    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    /// Always false: a path holds at least the leaf.
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    /// Certificates, leaf first.
    pub fn certificates(&self) -> &[Certificate] {
        &self.certificates
    }

    /// The signing certificate.
    pub fn leaf(&self) -> &Certificate {
        &self.certificates[0]
    }

    /// The self-signed root.
    pub fn root(&self) -> &Certificate {
        &self.certificates[self.certificates.len() - 1]
    }

    /// DER encodings, leaf first.
    pub fn to_der(&self) -> Vec<Vec<u8>> {
        self.certificates.iter().map(|c| c.der().to_vec()).collect()
    }

    /// Take the certificates out of the path.
    pub fn into_certificates(self) -> Vec<Certificate> {
        self.certificates
    }
}

/// Certification path builder.
#[derive(Debug, Clone, Default)]
pub struct CertPathBuilder {
    config: PathBuilderConfig,
}

impl CertPathBuilder {
    /// Create a builder with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder with a custom configuration.
    pub fn with_config(config: PathBuilderConfig) -> Self {
        Self { config }
    }

    /// Build the path from `signing` to a self-signed root found in `pool`.
    ///
    /// A self-signed signing certificate yields a path of length one. Pool
    /// entries equal to the signing certificate or to an earlier entry are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::PathBuild`] if no complete path exists. A
    /// missing intermediate and a missing root are reported the same way.
    pub fn build(&self, signing: &Certificate, pool: &[Certificate]) -> Result<CertPath> {
        if !self.is_acceptable(signing) {
            return Err(SignerError::path_build(format!(
                "Signing certificate \"{}\" is not valid at the validation time",
                signing.subject()
            )));
        }

        if signing.is_self_signed() {
            debug!("Signing certificate is self-signed");
            return Ok(CertPath {
                certificates: vec![signing.clone()],
            });
        }

        let mut candidates: Vec<&Certificate> = Vec::with_capacity(pool.len());
        for certificate in pool {
            if certificate != signing && !candidates.contains(&certificate) {
                candidates.push(certificate);
            }
        }
        debug!(candidates = candidates.len(), "Building certification path");

        let mut path = vec![signing];
        if self.extend(&mut path, &candidates) {
            debug!(length = path.len(), "Certification path built");
            return Ok(CertPath {
                certificates: path.into_iter().cloned().collect(),
            });
        }

        Err(SignerError::path_build(format!(
            "No path from \"{}\" to a self-signed root among {} candidate certificate(s)",
            signing.subject(),
            candidates.len()
        )))
    }

    /// Parse `signing` and `others` (DER or PEM) and build the path.
    pub fn build_from_bytes<T: AsRef<[u8]>>(&self, signing: &[u8], others: &[T]) -> Result<CertPath> {
        let signing = Certificate::from_bytes(signing)?;
        let pool = others
            .iter()
            .map(|bytes| Certificate::from_bytes(bytes.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        self.build(&signing, &pool)
    }

    fn is_acceptable(&self, certificate: &Certificate) -> bool {
        self.config
            .validation_time
            .map_or(true, |time| certificate.is_valid_at(time))
    }

    /// Depth-first search from the last certificate of `path`. On success the
    /// path ends with a self-signed root.
    fn extend<'a>(&self, path: &mut Vec<&'a Certificate>, candidates: &[&'a Certificate]) -> bool {
        let current = path[path.len() - 1];
        if path.len() > 1 && current.is_self_signed() {
            return true;
        }
        if path.len() >= self.config.max_path_length {
            debug!(max = self.config.max_path_length, "Path length limit reached");
            return false;
        }

        for issuer in self.issuers_of(current, path, candidates) {
            path.push(issuer);
            if self.extend(path, candidates) {
                return true;
            }
            path.pop();
        }
        false
    }

    /// Candidates that issued `certificate`, key identifier matches first.
    fn issuers_of<'a>(
        &self,
        certificate: &Certificate,
        path: &[&'a Certificate],
        candidates: &[&'a Certificate],
    ) -> Vec<&'a Certificate> {
        let authority_key_id = certificate.authority_key_identifier();

        let mut issuers: Vec<&'a Certificate> = candidates
            .iter()
            .copied()
            .filter(|candidate| !path.contains(candidate))
            .filter(|candidate| candidate.subject() == certificate.issuer())
            .filter(|candidate| {
                match (&authority_key_id, candidate.subject_key_identifier()) {
                    (Some(aki), Some(ski)) => *aki == ski,
                    _ => true,
                }
            })
            .filter(|candidate| self.is_acceptable(candidate))
            .filter(|candidate| {
                let verified = certificate.is_issued_by(candidate);
                if !verified {
                    debug!(
                        issuer = %candidate.subject(),
                        "Candidate issuer rejected: signature does not verify"
                    );
                }
                verified
            })
            .collect();

        if authority_key_id.is_some() {
            issuers.sort_by_key(|candidate| candidate.subject_key_identifier().is_none());
        }
        issuers
    }
}

/// Build the path for DER or PEM encoded certificates with the default
/// configuration.
pub fn build_cert_path<T: AsRef<[u8]>>(signing: &[u8], others: &[T]) -> Result<CertPath> {
    CertPathBuilder::new().build_from_bytes(signing, others)
}
