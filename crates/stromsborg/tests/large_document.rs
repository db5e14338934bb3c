#![forbid(unsafe_code)]

//! A multi-megabyte encrypted body decrypts with bounded pipe memory.

mod common;

use stromsborg::core::{algorithm, ns, SecurityProperties};
use stromsborg::enc::{EncryptOutputProcessor, SecurePart};
use stromsborg::xml::QName;

use common::{decrypt, encrypt_with, normalize};

const TARGET_BYTES: usize = 5 * 1024 * 1024;

fn large_envelope() -> String {
    let mut xml = format!(
        r#"<soap:Envelope xmlns:soap="{}"><soap:Header/><soap:Body><m:batch xmlns:m="urn:batch">"#,
        ns::SOAP11
    );
    let mut n = 0usize;
    while xml.len() < TARGET_BYTES {
        xml.push_str(&format!(
            r#"<m:record seq="{n}"><m:name>customer {n}</m:name><m:note>lorem ipsum dolor sit amet &amp; more</m:note></m:record>"#
        ));
        n += 1;
    }
    xml.push_str("</m:batch></soap:Body></soap:Envelope>");
    xml
}

#[test]
fn five_megabyte_body_decrypts_within_pipe_bound() {
    let xml = large_envelope();
    let processor = EncryptOutputProcessor::new(
        vec![SecurePart::content(QName::new(ns::SOAP11, "Body"))],
        algorithm::AES128_CBC,
        "aes",
    );
    let properties = SecurityProperties {
        pipe_capacity: 4,
        pipe_chunk_size: 4096,
        text_chunk_size: 8192,
        ..SecurityProperties::default()
    };
    let encrypted = encrypt_with(&xml, processor, properties.clone()).unwrap();
    assert!(encrypted.len() > TARGET_BYTES);

    let (decrypted, stats) = decrypt(encrypted, properties.clone()).unwrap();
    assert_eq!(stats.len(), 1);
    let region = &stats[0];
    assert!(region.transferred() as usize >= TARGET_BYTES - 200);
    assert!(
        region.high_water() <= properties.pipe_bound(),
        "high water {} exceeds bound {}",
        region.high_water(),
        properties.pipe_bound()
    );
    assert!(decrypted == normalize(&xml));
}
