//! Integration tests for signer construction, teardown and error handling

use super::{fixtures, signer_config, signing_module, signing_token, KEY_ID, KEY_LABEL, MESSAGE, PIN, TOKEN_LABEL, TOKEN_SERIAL};
use usg_pkcs11_signer::hsm::{SoftwareModule, SoftwareToken};
use usg_pkcs11_signer::{ErrorKind, HashAlgorithm, Pkcs11Signer, SignerConfig, SignerError};

fn assert_no_sessions(module: &SoftwareModule) {
    assert_eq!(module.open_session_count(), 0, "Leaked device session");
    assert!(!module.is_logged_in(TOKEN_SERIAL), "Leaked login");
}

#[test]
fn test_wrong_pin() {
    let module = signing_module();
    let config = signer_config().pin("00000000").build();

    let err = Pkcs11Signer::with_module(module.clone(), &config).unwrap_err();
    assert!(err.is_pin_incorrect());
    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert!(!err.is_retryable());
    assert_no_sessions(&module);

    // A new attempt with the right PIN is the caller's decision
    let signer = Pkcs11Signer::with_module(module.clone(), &signer_config().build());
    assert!(signer.is_ok());
}

#[test]
fn test_missing_pin() {
    let module = signing_module();
    let config = SignerConfig::builder()
        .token_label(TOKEN_LABEL)
        .key_label(KEY_LABEL)
        .build();

    let err = Pkcs11Signer::with_module(module.clone(), &config).unwrap_err();
    assert!(matches!(err, SignerError::Authentication(_)), "got: {err:?}");
    assert_no_sessions(&module);
}

#[test]
fn test_protected_authentication_path() {
    let module = SoftwareModule::new().with_token(signing_token().with_protected_authentication_path());
    let config = SignerConfig::builder()
        .token_serial(TOKEN_SERIAL)
        .key_id(KEY_ID)
        .build();

    let signer = Pkcs11Signer::with_module(module, &config).expect("Signer creation failed");
    assert!(signer.sign(b"pin pad").is_ok());
}

#[test]
fn test_token_criteria_required() {
    let module = signing_module();
    let config = SignerConfig::builder().token_label("").pin(PIN).key_label(KEY_LABEL).build();

    let err = Pkcs11Signer::with_module(module.clone(), &config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Argument);
    assert_no_sessions(&module);
}

#[test]
fn test_token_not_found() {
    let module = signing_module();
    let config = SignerConfig::builder()
        .token_serial("FFFFFFFFFFFFFFFF")
        .token_label("Missing")
        .pin(PIN)
        .key_label(KEY_LABEL)
        .build();

    let err = Pkcs11Signer::with_module(module.clone(), &config).unwrap_err();
    match &err {
        SignerError::TokenNotFound { serial, label } => {
            assert_eq!(serial, "FFFFFFFFFFFFFFFF");
            assert_eq!(label, "Missing");
        }
        other => panic!("Expected TokenNotFound, got: {other:?}"),
    }
    assert_no_sessions(&module);
}

#[test]
fn test_key_criteria_required() {
    let module = signing_module();
    let config = SignerConfig::builder().token_label(TOKEN_LABEL).pin(PIN).build();

    let err = Pkcs11Signer::with_module(module.clone(), &config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Argument);
    assert_no_sessions(&module);
}

#[test]
fn test_key_not_found() {
    let module = signing_module();
    let config = signer_config().key_label("Nobody").build();

    let err = Pkcs11Signer::with_module(module.clone(), &config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ObjectNotFound);
    assert_no_sessions(&module);
}

#[test]
fn test_key_label_and_id_must_both_match() {
    let module = signing_module();
    let config = signer_config().key_id(vec![0xde, 0xad]).build();

    let err = Pkcs11Signer::with_module(module.clone(), &config).unwrap_err();
    assert!(matches!(err, SignerError::ObjectNotFound { .. }), "got: {err:?}");

    let config = signer_config().key_id(KEY_ID).build();
    let signer = Pkcs11Signer::with_module(module, &config).expect("Signer creation failed");
    assert_eq!(signer.key_label(), Some(KEY_LABEL));
    assert_eq!(signer.key_id(), Some(KEY_ID));
}

#[test]
fn test_ambiguous_key() {
    let module = SoftwareModule::new().with_token(
        SoftwareToken::new(TOKEN_SERIAL, TOKEN_LABEL, PIN)
            .with_private_key(KEY_LABEL, b"\x01", fixtures::leaf_key())
            .with_private_key(KEY_LABEL, b"\x02", fixtures::root_key()),
    );

    let err = Pkcs11Signer::with_module(module.clone(), &signer_config().build()).unwrap_err();
    assert!(matches!(err, SignerError::AmbiguousMatch { count: 2, .. }), "got: {err:?}");
    assert_no_sessions(&module);

    let config = signer_config().key_id(b"\x02".to_vec()).build();
    assert!(Pkcs11Signer::with_module(module, &config).is_ok());
}

#[test]
fn test_unknown_hash_algorithm_leaves_no_session() {
    let module = signing_module();

    let err = signer_config().hash_algorithm_name("MD5").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Argument);

    let toml = format!(
        "[token]\nlabel = \"{TOKEN_LABEL}\"\npin = \"{PIN}\"\n[key]\nlabel = \"{KEY_LABEL}\"\n[signing]\nhash_algorithm = \"MD5\"\n"
    );
    let err = SignerConfig::from_toml(&toml).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Argument);
    assert_no_sessions(&module);

    // A fresh signer opens without contention
    let signer = Pkcs11Signer::with_module(module.clone(), &signer_config().build())
        .expect("Signer creation failed");
    assert!(signer.is_open());
}

#[test]
fn test_close_is_idempotent() {
    let module = signing_module();
    let mut signer = Pkcs11Signer::with_module(module.clone(), &signer_config().build())
        .expect("Signer creation failed");
    assert!(module.is_logged_in(TOKEN_SERIAL));

    signer.close();
    assert_no_sessions(&module);
    signer.close();
    assert_no_sessions(&module);

    assert!(!signer.is_open());
    assert!(matches!(signer.sign(b"late"), Err(SignerError::Closed)));
    assert!(matches!(signer.token(), Err(SignerError::Closed)));
    assert!(matches!(signer.all_certificates(), Err(SignerError::Closed)));
    assert!(matches!(signer.private_key(), Err(SignerError::Closed)));
    assert_eq!(signer.encryption_algorithm(), "RSA");
}

#[test]
fn test_drop_logs_out() {
    let module = signing_module();
    {
        let signer = Pkcs11Signer::with_module(module.clone(), &signer_config().build())
            .expect("Signer creation failed");
        assert_eq!(module.open_session_count(), 1);
        signer.sign(b"scoped").expect("Signing failed");
    }
    assert_no_sessions(&module);
}

#[test]
fn test_signers_on_one_token_close_independently() {
    let module = SoftwareModule::new()
        .with_token(signing_token().with_private_key("Test Root CA", b"\x03", fixtures::root_key()));
    let mut first = Pkcs11Signer::with_module(module.clone(), &signer_config().build())
        .expect("Signer creation failed");
    let root_config = signer_config().key_label("Test Root CA").build();
    let mut second = Pkcs11Signer::with_module(module.clone(), &root_config).expect("Signer creation failed");

    first.close();
    assert!(module.is_logged_in(TOKEN_SERIAL));
    assert!(second.sign(MESSAGE).is_ok());

    // Closing in the opposite order works the same way
    let mut first = Pkcs11Signer::with_module(module.clone(), &signer_config().build())
        .expect("Signer creation failed");
    second.close();
    assert_eq!(first.sign(MESSAGE).expect("Signing failed"), fixtures::signature(HashAlgorithm::Sha256));

    first.close();
    assert_no_sessions(&module);
}

#[test]
fn test_signer_debug_hides_pin() {
    let signer = Pkcs11Signer::with_module(signing_module(), &signer_config().build())
        .expect("Signer creation failed");
    let debug = format!("{signer:?}");
    assert!(debug.contains(TOKEN_LABEL));
    assert!(!debug.contains(PIN));

    let config = format!("{:?}", signer_config().build());
    assert!(!config.contains(PIN));
}
