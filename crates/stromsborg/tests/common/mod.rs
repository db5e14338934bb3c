#![forbid(unsafe_code)]
#![allow(dead_code)]

//! Helpers shared by the integration tests.

use std::io::Cursor;
use std::sync::{Arc, Mutex};

use stromsborg::chain::{
    CollectingEventSink, SecurityContext, SharedInputProcessor, SharedOutputProcessor,
    SymmetricKeyToken,
};
use stromsborg::core::{Result, SecurityProperties};
use stromsborg::dsig::SignatureInputProcessor;
use stromsborg::enc::{DecryptInputProcessor, EncryptOutputProcessor, PipeStats, SecurePart};
use stromsborg::xml::writer::events_to_string;
use stromsborg::xml::XmlEvent;
use stromsborg::{InboundSecurity, OutboundSecurity};

pub const AES_KEY: [u8; 16] = [0x11; 16];
pub const DES3_KEY: [u8; 24] = [0x5c; 24];

pub const SOAP: &str = concat!(
    r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">"#,
    r#"<soap:Header><wsse:Security xmlns:wsse="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd"/></soap:Header>"#,
    r#"<soap:Body><m:transfer xmlns:m="urn:bank"><m:amount currency="SEK">1200</m:amount><m:to>Ada &amp; Co</m:to></m:transfer></soap:Body>"#,
    r#"</soap:Envelope>"#
);

pub fn security(sink: Option<Arc<CollectingEventSink>>) -> SecurityContext {
    let mut ctx = SecurityContext::default();
    if let Some(sink) = sink {
        ctx = ctx.with_event_sink(sink);
    }
    ctx.register_token(Arc::new(SymmetricKeyToken::new("aes", AES_KEY.to_vec())))
        .unwrap();
    ctx.register_token(Arc::new(SymmetricKeyToken::new("des", DES3_KEY.to_vec())))
        .unwrap();
    ctx.register_token(Arc::new(SymmetricKeyToken::new("hmac", b"integration key".to_vec())))
        .unwrap();
    ctx
}

pub fn small_pipes() -> SecurityProperties {
    SecurityProperties {
        pipe_capacity: 4,
        pipe_chunk_size: 1024,
        ..SecurityProperties::default()
    }
}

/// Parse and re-serialize, so documents compare independently of how the
/// source spelled empty elements.
pub fn normalize(xml: &str) -> String {
    events_to_string(&stromsborg::xml::parse_events(xml).unwrap()).unwrap()
}

pub fn encrypt_with(
    xml: &str,
    processor: EncryptOutputProcessor,
    properties: SecurityProperties,
) -> Result<String> {
    let outbound = OutboundSecurity::new(properties, security(None))?;
    let processor: SharedOutputProcessor = Arc::new(Mutex::new(processor));
    outbound.transform_document(xml, vec![processor])
}

pub fn encrypt(xml: &str, parts: Vec<SecurePart>, algorithm: &str, token: &str) -> Result<String> {
    encrypt_with(
        xml,
        EncryptOutputProcessor::new(parts, algorithm, token),
        SecurityProperties::default(),
    )
}

/// Decrypt every `EncryptedData`; returns the document and the pipe
/// statistics of each region.
pub fn decrypt(xml: String, properties: SecurityProperties) -> Result<(String, Vec<Arc<PipeStats>>)> {
    decrypt_with(xml, DecryptInputProcessor::all(), properties)
}

pub fn decrypt_with(
    xml: String,
    processor: DecryptInputProcessor,
    properties: SecurityProperties,
) -> Result<(String, Vec<Arc<PipeStats>>)> {
    let inbound = InboundSecurity::new(properties, security(None))?;
    let decrypt = Arc::new(Mutex::new(processor));
    let shared: SharedInputProcessor = decrypt.clone();
    let reader = inbound.process_reader(Cursor::new(xml.into_bytes()), vec![shared])?;
    let events = reader.collect::<Result<Vec<XmlEvent>>>()?;
    let stats = decrypt.lock().unwrap().pipe_stats().to_vec();
    Ok((events_to_string(&events)?, stats))
}

pub fn verify(xml: String, sink: Arc<CollectingEventSink>) -> Result<String> {
    let inbound = InboundSecurity::new(SecurityProperties::default(), security(Some(sink)))?;
    let verifier: SharedInputProcessor = Arc::new(Mutex::new(SignatureInputProcessor::new()));
    let reader = inbound.process_reader(Cursor::new(xml.into_bytes()), vec![verifier])?;
    let events = reader.collect::<Result<Vec<XmlEvent>>>()?;
    events_to_string(&events)
}
