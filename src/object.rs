// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)

//! Object lookup on a token session.
//!
//! Key selection is security sensitive, so [`find_one`] never picks "the first
//! match": zero matches and several matches are both errors.

use crate::certificate::{Certificate, PrivateKeyRef, PublicKey};
use crate::error::{Result, SignerError};
use crate::hsm::{
    AttributeKind, CertificateType, KeyType, ModuleSession, ObjectClass, SearchAttribute,
};
use tracing::debug;

/// Kind of object to search for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// RSA private key.
    PrivateKey,
    /// X.509 certificate.
    Certificate,
}

impl ObjectKind {
    /// Fixed part of the search template for this kind.
    pub fn template(&self) -> Vec<SearchAttribute> {
        match self {
            Self::PrivateKey => vec![
                SearchAttribute::Class(ObjectClass::PrivateKey),
                SearchAttribute::KeyType(KeyType::Rsa),
            ],
            Self::Certificate => vec![
                SearchAttribute::Class(ObjectClass::Certificate),
                SearchAttribute::CertificateType(CertificateType::X509),
            ],
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::PrivateKey => "private key",
            Self::Certificate => "certificate",
        }
    }

    fn title(&self) -> &'static str {
        match self {
            Self::PrivateKey => "Private key",
            Self::Certificate => "Certificate",
        }
    }
}

/// Find exactly one object of `kind` with the given CKA_LABEL and/or CKA_ID.
///
/// Empty criteria are left out of the template.
///
/// # Errors
///
/// - [`SignerError::Argument`] if both `label` and `id` are empty (no device
///   call is made)
/// - [`SignerError::ObjectNotFound`] if nothing matches
/// - [`SignerError::AmbiguousMatch`] if more than one object matches
pub fn find_one<S: ModuleSession>(
    session: &S,
    kind: ObjectKind,
    label: Option<&str>,
    id: Option<&[u8]>,
) -> Result<S::Object> {
    let label = label.filter(|label| !label.is_empty());
    let id = id.filter(|id| !id.is_empty());

    if label.is_none() && id.is_none() {
        return Err(SignerError::argument(format!(
            "Either {} label or id has to be specified",
            kind.name()
        )));
    }

    let mut template = kind.template();
    if let Some(label) = label {
        template.push(SearchAttribute::Label(label.as_bytes().to_vec()));
    }
    if let Some(id) = id {
        template.push(SearchAttribute::Id(id.to_vec()));
    }

    let mut objects = session.find_objects(&template)?;
    debug!(kind = kind.name(), matches = objects.len(), "Object search finished");

    match objects.len() {
        0 => Err(SignerError::ObjectNotFound {
            object: kind.title(),
            label: label.unwrap_or_default().to_string(),
            id: hex::encode(id.unwrap_or_default()),
        }),
        1 => Ok(objects.remove(0)),
        count => Err(SignerError::AmbiguousMatch {
            object: kind.name(),
            count,
            label: label.unwrap_or_default().to_string(),
            id: hex::encode(id.unwrap_or_default()),
        }),
    }
}

/// Find every object of `kind` visible in the session.
pub fn find_all<S: ModuleSession>(session: &S, kind: ObjectKind) -> Result<Vec<S::Object>> {
    session.find_objects(&kind.template())
}

/// Read CKA_ID, CKA_LABEL and, if exposed, the public key of a private key
/// object.
pub fn read_private_key<S: ModuleSession>(session: &S, key: S::Object) -> Result<PrivateKeyRef> {
    let id = session.read_attribute(key, AttributeKind::Id)?.unwrap_or_default();
    let label = read_label(session, key)?;

    let modulus = session.read_attribute(key, AttributeKind::Modulus)?;
    let exponent = session.read_attribute(key, AttributeKind::PublicExponent)?;
    let public_key = match (modulus, exponent) {
        (Some(n), Some(e)) if !n.is_empty() && !e.is_empty() => {
            match PublicKey::from_rsa_components(&n, &e) {
                Ok(public_key) => Some(public_key),
                Err(e) => {
                    debug!(label = %label, "Ignoring unusable public key: {}", e);
                    None
                }
            }
        }
        _ => None,
    };

    Ok(PrivateKeyRef::new(id, label, public_key))
}

/// Read a certificate object and parse its CKA_VALUE.
pub fn read_certificate<S: ModuleSession>(session: &S, object: S::Object) -> Result<Certificate> {
    let value = read_value(session, object)?;
    let id = session.read_attribute(object, AttributeKind::Id)?.unwrap_or_default();
    let label = read_label(session, object)?;
    Certificate::from_token_object(id, label, &value)
}

/// Read CKA_VALUE of a certificate object without parsing it.
pub fn read_value<S: ModuleSession>(session: &S, object: S::Object) -> Result<Vec<u8>> {
    session
        .read_attribute(object, AttributeKind::Value)?
        .ok_or_else(|| SignerError::device(format!("Object {:?} has no readable CKA_VALUE", object)))
}

fn read_label<S: ModuleSession>(session: &S, object: S::Object) -> Result<String> {
    Ok(session
        .read_attribute(object, AttributeKind::Label)?
        .map(|label| String::from_utf8_lossy(&label).into_owned())
        .unwrap_or_default())
}
