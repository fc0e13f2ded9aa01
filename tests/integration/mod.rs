//! Integration test utilities and helpers
//!
//! This module provides the software token setup and fixture loading shared
//! by the signer integration tests.

mod certificate_test;
mod lifecycle_test;
mod signing_test;

use rsa::pkcs8::DecodePrivateKey;
use rsa::RsaPrivateKey;
use usg_pkcs11_signer::hsm::{SoftwareModule, SoftwareToken};
use usg_pkcs11_signer::{HashAlgorithm, SignerConfig, SignerConfigBuilder};

/// Token holding the signing key
pub const TOKEN_SERIAL: &str = "7BFF2737350B262C";
pub const TOKEN_LABEL: &str = "Pkcs11Interop";
pub const PIN: &str = "11111111";

/// Signing key and its certificate share label and id
pub const KEY_LABEL: &str = "Jane Signer";
pub const KEY_ID: &[u8] = &[0x73, 0x00, 0x62, 0x33, 0x65, 0x4c, 0x4c, 0x88];

/// Message signed by the reference signatures
pub const MESSAGE: &[u8] = b"Hello world";

/// Test fixture helpers
pub mod fixtures {
    use super::*;

    pub const LEAF_KEY_PEM: &str = include_str!("../fixtures/leaf-key.pem");
    pub const ROOT_KEY_PEM: &str = include_str!("../fixtures/root-key.pem");
    pub const LEAF_DER: &[u8] = include_bytes!("../fixtures/leaf.der");
    pub const LEAF_PEM: &str = include_str!("../fixtures/leaf.pem");
    pub const INTERMEDIATE_PEM: &str = include_str!("../fixtures/intermediate.pem");
    pub const IMPOSTOR_PEM: &str = include_str!("../fixtures/impostor.pem");
    pub const ROOT_PEM: &str = include_str!("../fixtures/root.pem");
    pub const LARGE_ROOT_PEM: &str = include_str!("../fixtures/large-root.pem");
    pub const SELF_SIGNED_DER: &[u8] = include_bytes!("../fixtures/self-signed.der");
    pub const SELF_SIGNED_PEM: &str = include_str!("../fixtures/self-signed.pem");

    /// Reference signature of [`MESSAGE`] made with the leaf key
    pub fn signature(algorithm: HashAlgorithm) -> &'static [u8] {
        match algorithm {
            HashAlgorithm::Sha1 => include_bytes!("../fixtures/message.sha1.sig"),
            HashAlgorithm::Sha256 => include_bytes!("../fixtures/message.sha256.sig"),
            HashAlgorithm::Sha384 => include_bytes!("../fixtures/message.sha384.sig"),
            HashAlgorithm::Sha512 => include_bytes!("../fixtures/message.sha512.sig"),
        }
    }

    pub fn leaf_key() -> RsaPrivateKey {
        RsaPrivateKey::from_pkcs8_pem(LEAF_KEY_PEM).expect("Valid leaf key")
    }

    pub fn root_key() -> RsaPrivateKey {
        RsaPrivateKey::from_pkcs8_pem(ROOT_KEY_PEM).expect("Valid root key")
    }

    pub fn der(pem: &str) -> Vec<u8> {
        usg_pkcs11_signer::Certificate::from_bytes(pem.as_bytes())
            .expect("Valid certificate")
            .der()
            .to_vec()
    }
}

/// Token with the leaf key, the leaf certificate and the CA certificates
pub fn signing_token() -> SoftwareToken {
    SoftwareToken::new(TOKEN_SERIAL, TOKEN_LABEL, PIN)
        .with_manufacturer("SoftHSM project")
        .with_model("SoftHSM v2")
        .with_private_key(KEY_LABEL, KEY_ID, fixtures::leaf_key())
        .with_certificate(KEY_LABEL, KEY_ID, fixtures::LEAF_DER)
        .with_certificate("Test Intermediate CA", b"\x02", fixtures::der(fixtures::INTERMEDIATE_PEM))
        .with_certificate("Test Root CA", b"\x03", fixtures::der(fixtures::ROOT_PEM))
}

/// Module with an unrelated token and an unrecognized token before the
/// signing token
pub fn signing_module() -> SoftwareModule {
    SoftwareModule::new()
        .with_token(SoftwareToken::new("0000000000000001", "Other", "0000"))
        .with_token(SoftwareToken::new("0000000000000002", "Broken", "0000").unrecognized())
        .with_token(signing_token())
}

/// Configuration selecting the signing key by token label and key label
pub fn signer_config() -> SignerConfigBuilder {
    SignerConfig::builder()
        .token_label(TOKEN_LABEL)
        .pin(PIN)
        .key_label(KEY_LABEL)
}
