//! Integration tests for signature creation

use super::{fixtures, signer_config, signing_module, signing_token, MESSAGE};
use rsa::Pkcs1v15Sign;
use sha2::{Digest, Sha256};
use usg_pkcs11_signer::hsm::SoftwareModule;
use usg_pkcs11_signer::{
    Certificate, ExternalSignature, HashAlgorithm, Pkcs11Signer, SignerError, SigningStrategy,
};

#[test]
fn test_host_hashed_signatures_match_reference() {
    for algorithm in HashAlgorithm::ALL {
        let config = signer_config().hash_algorithm(algorithm).build();
        let signer = Pkcs11Signer::with_module(signing_module(), &config).expect("Signer creation failed");

        let signature = signer.sign(MESSAGE).expect("Signing failed");
        assert_eq!(signature, fixtures::signature(algorithm), "{algorithm}");
    }
}

#[test]
fn test_device_combined_matches_host_hashed() {
    for algorithm in HashAlgorithm::ALL {
        let config = signer_config()
            .hash_algorithm(algorithm)
            .strategy(SigningStrategy::DeviceCombined)
            .build();
        let signer = Pkcs11Signer::with_module(signing_module(), &config).expect("Signer creation failed");
        assert_eq!(signer.strategy(), SigningStrategy::DeviceCombined);

        let signature = signer.sign(MESSAGE).expect("Signing failed");
        assert_eq!(signature, fixtures::signature(algorithm), "{algorithm}");
    }
}

#[test]
fn test_signature_verifies_with_certificate_key() {
    let signer = Pkcs11Signer::with_module(signing_module(), &signer_config().build())
        .expect("Signer creation failed");
    let signature = signer.sign(b"%PDF-1.7 document bytes").expect("Signing failed");

    let certificate = Certificate::from_bytes(fixtures::LEAF_DER).expect("Valid certificate");
    let key = certificate
        .public_key()
        .and_then(|key| key.as_rsa())
        .expect("RSA public key");
    let digest = Sha256::digest(b"%PDF-1.7 document bytes");

    assert!(key
        .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, &signature)
        .is_ok());
}

#[test]
fn test_signatures_are_deterministic_across_signers() {
    let module = signing_module();
    let config = signer_config().build();

    let first = {
        let signer = Pkcs11Signer::with_module(module.clone(), &config).expect("Signer creation failed");
        signer.sign(MESSAGE).expect("Signing failed")
    };
    let second = {
        let signer = Pkcs11Signer::with_module(module.clone(), &config).expect("Signer creation failed");
        signer.sign(MESSAGE).expect("Signing failed")
    };

    assert_eq!(first, second);
    assert_eq!(module.open_session_count(), 0);
}

#[test]
fn test_signer_is_reusable() {
    let module = signing_module();
    let signer = Pkcs11Signer::with_module(module.clone(), &signer_config().build())
        .expect("Signer creation failed");

    for document in [b"first".as_slice(), b"second", b"third"] {
        let signature = signer.sign(document).expect("Signing failed");
        assert_eq!(signature.len(), 256);
        // Sub-sessions are closed after every signature
        assert_eq!(module.open_session_count(), 1);
    }
    assert_eq!(signer.sign(MESSAGE).expect("Signing failed"), fixtures::signature(HashAlgorithm::Sha256));
}

#[test]
fn test_device_without_combined_mechanisms() {
    let module = SoftwareModule::new().with_token(signing_token().without_combined_mechanisms());

    let config = signer_config().strategy(SigningStrategy::DeviceCombined).build();
    let signer = Pkcs11Signer::with_module(module.clone(), &config).expect("Signer creation failed");
    let err = signer.sign(MESSAGE).unwrap_err();
    assert!(matches!(err, SignerError::Device(_)), "got: {err:?}");
    drop(signer);

    let signer = Pkcs11Signer::with_module(module, &signer_config().build()).expect("Signer creation failed");
    assert_eq!(
        signer.sign(MESSAGE).expect("Signing failed"),
        fixtures::signature(HashAlgorithm::Sha256)
    );
}

#[test]
fn test_external_signature_seam() {
    fn embed(signature: &dyn ExternalSignature, content: &[u8]) -> (String, String, Vec<u8>) {
        (
            signature.hash_algorithm().to_string(),
            signature.encryption_algorithm().to_string(),
            signature.sign(content).expect("Signing failed"),
        )
    }

    let config = signer_config().hash_algorithm(HashAlgorithm::Sha384).build();
    let signer = Pkcs11Signer::with_module(signing_module(), &config).expect("Signer creation failed");

    let (hash, encryption, signature) = embed(&signer, MESSAGE);
    assert_eq!(hash, "SHA384");
    assert_eq!(encryption, "RSA");
    assert_eq!(signature, fixtures::signature(HashAlgorithm::Sha384));
}
