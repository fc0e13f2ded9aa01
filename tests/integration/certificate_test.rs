//! Integration tests for certificate retrieval, key matching and path building

use super::{fixtures, signer_config, signing_module, signing_token, KEY_ID, KEY_LABEL, PIN, TOKEN_LABEL, TOKEN_SERIAL};
use usg_pkcs11_signer::hsm::{SoftwareModule, SoftwareToken};
use usg_pkcs11_signer::{build_cert_path, Certificate, KeyMatch, Pkcs11Signer, SignerError};

fn certificate(pem: &str) -> Certificate {
    Certificate::from_bytes(pem.as_bytes()).expect("Valid certificate")
}

#[test]
fn test_signing_certificate() {
    let mut signer = Pkcs11Signer::with_module(signing_module(), &signer_config().build())
        .expect("Signer creation failed");

    assert_eq!(signer.signing_certificate().expect("Certificate lookup failed"), fixtures::LEAF_DER);
    assert_eq!(signer.all_certificates().expect("Certificate listing failed").len(), 3);
}

#[test]
fn test_signing_certificate_by_id_only() {
    let config = usg_pkcs11_signer::SignerConfig::builder()
        .token_serial(TOKEN_SERIAL)
        .pin(PIN)
        .key_id_hex(&hex::encode(KEY_ID))
        .expect("Valid key id")
        .build();
    let mut signer = Pkcs11Signer::with_module(signing_module(), &config).expect("Signer creation failed");

    assert_eq!(signer.key_label(), None);
    assert_eq!(signer.signing_certificate().expect("Certificate lookup failed"), fixtures::LEAF_DER);
}

#[test]
fn test_missing_signing_certificate() {
    let module = SoftwareModule::new().with_token(
        SoftwareToken::new(TOKEN_SERIAL, TOKEN_LABEL, PIN)
            .with_private_key(KEY_LABEL, KEY_ID, fixtures::leaf_key()),
    );
    let mut signer = Pkcs11Signer::with_module(module, &signer_config().build())
        .expect("Signer creation failed");

    let err = signer.signing_certificate().unwrap_err();
    assert!(matches!(err, SignerError::ObjectNotFound { object: "Certificate", .. }), "got: {err:?}");
    assert!(signer.all_certificates().expect("Certificate listing failed").is_empty());

    // Signing does not depend on the certificate
    assert!(signer.sign(b"no certificate").is_ok());
}

#[test]
fn test_ambiguous_signing_certificate() {
    let module = SoftwareModule::new().with_token(
        signing_token().with_certificate(KEY_LABEL, KEY_ID, fixtures::der(fixtures::ROOT_PEM)),
    );
    let mut signer = Pkcs11Signer::with_module(module, &signer_config().build())
        .expect("Signer creation failed");

    let err = signer.signing_certificate().unwrap_err();
    assert!(matches!(err, SignerError::AmbiguousMatch { count: 2, .. }), "got: {err:?}");
}

#[test]
fn test_private_key_matches_certificate() {
    let signer = Pkcs11Signer::with_module(signing_module(), &signer_config().build())
        .expect("Signer creation failed");
    let key = signer.private_key().expect("Key attributes unreadable");

    assert_eq!(key.id(), KEY_ID);
    assert_eq!(key.label(), KEY_LABEL);
    assert_eq!(key.matches(&certificate(fixtures::LEAF_PEM)), KeyMatch::Equal);
    assert_eq!(key.matches(&certificate(fixtures::ROOT_PEM)), KeyMatch::NotEqual);
}

#[test]
fn test_opaque_key_match_is_undecidable() {
    let module = SoftwareModule::new().with_token(
        SoftwareToken::new(TOKEN_SERIAL, TOKEN_LABEL, PIN)
            .with_opaque_private_key(KEY_LABEL, KEY_ID, fixtures::leaf_key()),
    );
    let signer = Pkcs11Signer::with_module(module, &signer_config().build())
        .expect("Signer creation failed");
    let key = signer.private_key().expect("Key attributes unreadable");

    let outcome = key.matches(&certificate(fixtures::LEAF_PEM));
    assert_eq!(outcome, KeyMatch::Undecidable);
    assert_eq!(outcome.decided(), None);
}

#[test]
fn test_certificate_path_from_token() {
    let mut signer = Pkcs11Signer::with_module(signing_module(), &signer_config().build())
        .expect("Signer creation failed");

    let path = signer.certificate_path::<Vec<u8>>(&[]).expect("Path building failed");
    assert_eq!(
        path.certificates(),
        &[
            certificate(fixtures::LEAF_PEM),
            certificate(fixtures::INTERMEDIATE_PEM),
            certificate(fixtures::ROOT_PEM),
        ]
    );
    assert_eq!(path.leaf().der(), fixtures::LEAF_DER);
    assert!(path.root().is_self_signed());
}

#[test]
fn test_certificate_path_with_additional_certificates() {
    let module = SoftwareModule::new().with_token(
        SoftwareToken::new(TOKEN_SERIAL, TOKEN_LABEL, PIN)
            .with_private_key(KEY_LABEL, KEY_ID, fixtures::leaf_key())
            .with_certificate(KEY_LABEL, KEY_ID, fixtures::LEAF_DER)
            .with_certificate("Test Intermediate CA", b"\x02", fixtures::der(fixtures::INTERMEDIATE_PEM)),
    );
    let mut signer = Pkcs11Signer::with_module(module, &signer_config().build())
        .expect("Signer creation failed");

    let err = signer.certificate_path::<Vec<u8>>(&[]).unwrap_err();
    assert!(matches!(err, SignerError::PathBuild(_)), "got: {err:?}");

    // Additional certificates may be PEM, and may include an impostor
    let path = signer
        .certificate_path(&[fixtures::IMPOSTOR_PEM, fixtures::ROOT_PEM])
        .expect("Path building failed");
    assert_eq!(path.len(), 3);
    assert_eq!(path.certificates()[1], certificate(fixtures::INTERMEDIATE_PEM));
    assert_eq!(path.to_der()[2], fixtures::der(fixtures::ROOT_PEM));
}

#[test]
fn test_self_signed_signing_certificate() {
    let module = SoftwareModule::new().with_token(
        SoftwareToken::new(TOKEN_SERIAL, TOKEN_LABEL, PIN)
            .with_private_key("Test Root CA", b"\x03", fixtures::root_key())
            .with_certificate("Test Root CA", b"\x03", fixtures::der(fixtures::ROOT_PEM)),
    );
    let config = signer_config().key_label("Test Root CA").build();
    let mut signer = Pkcs11Signer::with_module(module, &config).expect("Signer creation failed");

    let path = signer.certificate_path::<Vec<u8>>(&[]).expect("Path building failed");
    assert_eq!(path.len(), 1);
    assert_eq!(path.root(), &certificate(fixtures::ROOT_PEM));
}

#[test]
fn test_path_building_properties() {
    let leaf = fixtures::LEAF_PEM.as_bytes();
    let intermediate = fixtures::INTERMEDIATE_PEM.as_bytes();
    let root = fixtures::ROOT_PEM.as_bytes();

    let path = build_cert_path(fixtures::SELF_SIGNED_PEM.as_bytes(), &[intermediate]).expect("Path building failed");
    assert_eq!(path.len(), 1);
    assert_eq!(path.leaf().der(), fixtures::SELF_SIGNED_DER);

    for pool in [&[][..], &[intermediate][..], &[root][..]] {
        let err = build_cert_path(leaf, pool).unwrap_err();
        assert!(matches!(err, SignerError::PathBuild(_)), "got: {err:?}");
    }

    let path = build_cert_path(leaf, &[root, intermediate]).expect("Path building failed");
    assert_eq!(
        path.into_certificates(),
        vec![
            certificate(fixtures::LEAF_PEM),
            certificate(fixtures::INTERMEDIATE_PEM),
            certificate(fixtures::ROOT_PEM),
        ]
    );
}

#[test]
fn test_large_self_signed_root() {
    let root = certificate(fixtures::LARGE_ROOT_PEM);
    assert!(root.public_key().is_some());
    assert_eq!(root.matches_certificate(&root), KeyMatch::Equal);

    let path = build_cert_path::<&[u8]>(fixtures::LARGE_ROOT_PEM.as_bytes(), &[]).expect("Path building failed");
    assert_eq!(path.len(), 1);
    assert_eq!(path.root(), &root);
}

#[test]
fn test_pem_and_der_parse_identically() {
    let from_pem = certificate(fixtures::LEAF_PEM);
    let from_der = Certificate::from_bytes(fixtures::LEAF_DER).expect("Valid certificate");
    assert_eq!(from_pem.der(), from_der.der());

    let reparsed = Certificate::from_bytes(from_pem.der()).expect("Valid certificate");
    assert_eq!(reparsed, from_der);

    let garbage: [&[u8]; 3] = [
        b"",
        b"Hello world",
        b"-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n",
    ];
    for garbage in garbage {
        assert!(Certificate::from_bytes(garbage).is_err());
    }
}
