#![forbid(unsafe_code)]

//! Failures surface from the facade as chain errors.

mod common;

use stromsborg::core::{algorithm, ns, Error, SecurityProperties};
use stromsborg::enc::{DecryptInputProcessor, EncryptOutputProcessor, SecurePart};
use stromsborg::xml::QName;

use common::{decrypt, decrypt_with, encrypt, encrypt_with, SOAP};

#[test]
fn duplicate_encrypted_data_ids_are_failed_check() {
    let processor = EncryptOutputProcessor::new(
        vec![SecurePart::element(QName::local("a"))],
        algorithm::AES128_CBC,
        "aes",
    )
    .with_id_generator(|| "ED-same".to_owned());
    let encrypted = encrypt_with(
        "<doc><a>one</a><a>two</a></doc>",
        processor,
        SecurityProperties::default(),
    )
    .unwrap();
    assert_eq!(encrypted.matches(r#"Id="ED-same""#).count(), 2);

    let err = decrypt(encrypted, SecurityProperties::default()).unwrap_err();
    assert!(matches!(err, Error::FailedCheck(_)), "{err:?}");
}

#[test]
fn repeated_encrypted_data_after_last_reference_is_failed_check() {
    let processor = EncryptOutputProcessor::new(
        vec![SecurePart::element(QName::local("a"))],
        algorithm::AES128_CBC,
        "aes",
    )
    .with_id_generator(|| "ED-same".to_owned());
    let encrypted = encrypt_with(
        "<doc><a>one</a><b/><a>two</a></doc>",
        processor,
        SecurityProperties::default(),
    )
    .unwrap();

    // one reference, decrypted once; the copy must not slip through
    let err = decrypt_with(
        encrypted,
        DecryptInputProcessor::new(["ED-same"]),
        SecurityProperties::default(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::FailedCheck(_)), "{err:?}");
}

fn cipher_value_range(xml: &str) -> std::ops::Range<usize> {
    let open = "<xenc:CipherValue>";
    let start = xml.find(open).unwrap() + open.len();
    let end = xml.find("</xenc:CipherValue>").unwrap();
    start..end
}

#[test]
fn corrupt_ciphertext_is_an_error() {
    let mut encrypted = encrypt(
        SOAP,
        vec![SecurePart::content(QName::new(ns::SOAP11, "Body"))],
        algorithm::AES128_CBC,
        "aes",
    )
    .unwrap();
    // IV plus one byte: not a whole number of blocks.
    let range = cipher_value_range(&encrypted);
    encrypted.replace_range(range, "AAAAAAAAAAAAAAAAAAAAAAA=");

    assert!(decrypt(encrypted, SecurityProperties::default()).is_err());
}

#[test]
fn invalid_base64_is_an_error() {
    let mut encrypted = encrypt(
        SOAP,
        vec![SecurePart::element(QName::new(ns::SOAP11, "Body"))],
        algorithm::AES128_CBC,
        "aes",
    )
    .unwrap();
    let range = cipher_value_range(&encrypted);
    encrypted.replace_range(range, "not*base64*at*all");

    let err = decrypt(encrypted, SecurityProperties::default()).unwrap_err();
    assert!(matches!(err, Error::Base64(_)), "{err:?}");
}

#[test]
fn unknown_encryption_key_is_key_not_found() {
    let err = encrypt(
        SOAP,
        vec![SecurePart::element(QName::new(ns::SOAP11, "Body"))],
        algorithm::AES128_CBC,
        "missing",
    )
    .unwrap_err();
    assert!(matches!(err, Error::KeyNotFound(_)), "{err:?}");
}
