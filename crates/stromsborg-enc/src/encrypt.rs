#![forbid(unsafe_code)]

//! Streaming encryption of configured elements on the output side.
//!
//! A matching start element opens a region: the `EncryptedData` header is
//! emitted downstream right away, the element (or only its content) is
//! serialized into plaintext chunks and handed to a worker thread over a
//! bounded channel, and the base64 ciphertext comes back over a second
//! bounded channel as `CipherValue` text.

use std::io::{self, Write};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use base64::engine::general_purpose::STANDARD;
use base64::write::EncoderWriter;
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Select, Sender};
use stromsborg_chain::{
    AlgorithmUsage, KeyUsage, OutputProcessor, OutputProcessorChain, Phase, ProcessorDescriptor,
    ProcessorKind, SecurityEvent,
};
use stromsborg_core::{ns, Error, Result};
use stromsborg_crypto::StreamEncryptor;
use stromsborg_xml::{Attribute, QName, StartElement, XmlEvent, XmlEventWriter};

use crate::pipe::{Waiter, POLL};

/// What part of a matched element gets encrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    /// The element itself, tags included.
    Element,
    /// Only its children; the element stays in clear.
    Content,
}

/// An element to encrypt wherever it appears.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurePart {
    pub name: QName,
    pub modifier: Modifier,
}

impl SecurePart {
    pub fn element(name: QName) -> Self {
        Self {
            name,
            modifier: Modifier::Element,
        }
    }

    pub fn content(name: QName) -> Self {
        Self {
            name,
            modifier: Modifier::Content,
        }
    }

    fn type_uri(&self) -> &'static str {
        match self.modifier {
            Modifier::Element => ns::ENC_TYPE_ELEMENT,
            Modifier::Content => ns::ENC_TYPE_CONTENT,
        }
    }
}

type IdGenerator = Box<dyn FnMut() -> String + Send>;

/// Replaces secure parts with `xenc:EncryptedData`.
pub struct EncryptOutputProcessor {
    descriptor: ProcessorDescriptor,
    parts: Vec<SecurePart>,
    seen: Vec<bool>,
    algorithm: String,
    token_id: String,
    id_generator: Option<IdGenerator>,
    region: Option<EncryptRegion>,
}

struct EncryptRegion {
    id: String,
    part: SecurePart,
    /// Depth of the matched element.
    depth: usize,
    serializer: XmlEventWriter<Vec<u8>>,
    chunk_size: usize,
    plain_tx: Option<Sender<Vec<u8>>>,
    cipher_rx: Option<Receiver<Result<String>>>,
    worker: Option<JoinHandle<()>>,
    waiter: Waiter,
}

impl EncryptOutputProcessor {
    /// Encrypt `parts` with `algorithm` using the secret key of `token_id`.
    pub fn new(parts: Vec<SecurePart>, algorithm: &str, token_id: &str) -> Self {
        Self {
            descriptor: ProcessorDescriptor::new(ProcessorKind::Encryption, Phase::Processing),
            seen: vec![false; parts.len()],
            parts,
            algorithm: algorithm.to_owned(),
            token_id: token_id.to_owned(),
            id_generator: None,
            region: None,
        }
    }

    /// Produce `EncryptedData` ids with `generator` instead of random ones.
    pub fn with_id_generator<F>(mut self, generator: F) -> Self
    where
        F: FnMut() -> String + Send + 'static,
    {
        self.id_generator = Some(Box::new(generator));
        self
    }

    fn next_id(&mut self, chain: &OutputProcessorChain) -> String {
        match self.id_generator.as_mut() {
            Some(generate) => generate(),
            None => format!(
                "ED-{}",
                hex::encode(chain.security_context().crypto().random_key(8))
            ),
        }
    }

    fn open_region(
        &mut self,
        index: usize,
        event: XmlEvent,
        chain: &mut OutputProcessorChain,
    ) -> Result<()> {
        self.seen[index] = true;
        let part = self.parts[index].clone();
        let security = std::sync::Arc::clone(chain.security_context());
        let properties = security.properties();

        let cipher = security.crypto().cipher(&self.algorithm)?;
        let key = security.secret_key(&self.token_id, &self.algorithm, KeyUsage::Encryption)?;
        let encryptor = cipher.encryptor(&key)?;
        let id = self.next_id(chain);

        let (plain_tx, plain_rx) = bounded::<Vec<u8>>(properties.pipe_capacity);
        let (cipher_tx, cipher_rx) = bounded::<Result<String>>(properties.pipe_capacity);
        // joined when the region closes, or by EncryptRegion's drop
        let worker = thread::Builder::new()
            .name(format!("stromsborg-encrypt-{id}"))
            .spawn(move || run_worker(encryptor, plain_rx, cipher_tx))
            .map_err(|e| Error::InternalFailure(format!("cannot start encryption worker: {e}")))?;

        security.register_event(SecurityEvent::AlgorithmUsed {
            algorithm: self.algorithm.clone(),
            usage: AlgorithmUsage::Encryption,
        });
        tracing::debug!(id = %id, element = %part.name, modifier = ?part.modifier, "encryption region started");

        let mut region = EncryptRegion {
            id,
            depth: chain.document_context().depth,
            serializer: XmlEventWriter::new(Vec::new()),
            chunk_size: properties.pipe_chunk_size.max(1),
            plain_tx: Some(plain_tx),
            cipher_rx: Some(cipher_rx),
            worker: Some(worker),
            waiter: Waiter::new(security.cancellation().clone(), properties.pipe_timeout()),
            part,
        };

        match region.part.modifier {
            Modifier::Element => region.serializer.write_event(&event)?,
            Modifier::Content => chain.push_event(event)?,
        }
        chain.document_context_mut().enter_encrypted_content();
        for header in encrypted_data_header(&region.id, region.part.type_uri(), &self.algorithm, &self.token_id) {
            chain.push_event(header)?;
        }
        region.feed_ready(chain, false)?;
        self.region = Some(region);
        Ok(())
    }

    fn close_region(&mut self, end: XmlEvent, chain: &mut OutputProcessorChain) -> Result<()> {
        let mut region = self
            .region
            .take()
            .ok_or_else(|| Error::InternalFailure("no encryption region to close".into()))?;
        if region.part.modifier == Modifier::Element {
            region.serializer.write_event(&end)?;
        }
        region.feed_ready(chain, true)?;
        region.drain(chain)?;
        for closing in [ns::node::CIPHER_VALUE, ns::node::CIPHER_DATA, ns::node::ENCRYPTED_DATA] {
            chain.push_event(XmlEvent::end(xenc(closing)))?;
        }
        chain.document_context_mut().leave_encrypted_content();

        let element = region.part.name.clone();
        let event = match region.part.modifier {
            Modifier::Element => SecurityEvent::ElementEncrypted {
                element,
                id: region.id.clone(),
            },
            Modifier::Content => SecurityEvent::ContentEncrypted {
                element,
                id: region.id.clone(),
            },
        };
        chain.security_context().register_event(event);
        tracing::debug!(id = %region.id, "encryption region closed");

        if region.part.modifier == Modifier::Content {
            chain.push_event(end)?;
        }
        Ok(())
    }
}

impl OutputProcessor for EncryptOutputProcessor {
    fn descriptor(&self) -> &ProcessorDescriptor {
        &self.descriptor
    }

    fn handle_event(&mut self, event: XmlEvent, chain: &mut OutputProcessorChain) -> Result<()> {
        let depth = chain.document_context().depth;
        if let Some(region) = self.region.as_mut() {
            let closes = match &event {
                XmlEvent::EndElement(end) => depth == region.depth && end.name == region.part.name,
                XmlEvent::EndDocument => {
                    return Err(Error::MalformedInput(format!(
                        "document ended inside encrypted element {}",
                        region.part.name
                    )));
                }
                _ => false,
            };
            if closes {
                return self.close_region(event, chain);
            }
            // nested secure parts go into the outer region's plaintext
            region.serializer.write_event(&event)?;
            return region.feed_ready(chain, false);
        }

        if let Some(start) = event.as_start() {
            if let Some(index) = self.parts.iter().position(|p| p.name == start.name) {
                return self.open_region(index, event, chain);
            }
        }
        chain.push_event(event)
    }

    fn finish(&mut self, chain: &mut OutputProcessorChain) -> Result<()> {
        if let Some(region) = &self.region {
            return Err(Error::MalformedInput(format!(
                "encrypted element {} was never closed",
                region.part.name
            )));
        }
        for (part, seen) in self.parts.iter().zip(&self.seen) {
            if !seen {
                tracing::warn!(element = %part.name, "secure part not found in document");
            }
        }
        chain.finish()
    }
}

impl EncryptRegion {
    /// Send buffered plaintext once a chunk is full, or everything when
    /// `all` is set.
    fn feed_ready(&mut self, chain: &mut OutputProcessorChain, all: bool) -> Result<()> {
        while self.serializer.get_ref().len() >= self.chunk_size
            || (all && !self.serializer.get_ref().is_empty())
        {
            let buffered = self.serializer.get_mut();
            let chunk = if buffered.len() > self.chunk_size {
                let rest = buffered.split_off(self.chunk_size);
                std::mem::replace(buffered, rest)
            } else {
                std::mem::take(buffered)
            };
            self.send(chunk, chain)?;
        }
        Ok(())
    }

    /// Hand one plaintext chunk to the worker, emitting ciphertext that is
    /// ready while the plaintext channel is full.
    fn send(&mut self, chunk: Vec<u8>, chain: &mut OutputProcessorChain) -> Result<()> {
        let (Some(plain_tx), Some(cipher_rx)) = (self.plain_tx.as_ref(), self.cipher_rx.as_ref())
        else {
            return Err(Error::InternalFailure("encryption region already drained".into()));
        };
        let started = Instant::now();
        loop {
            self.waiter.check(started, "encryption worker")?;
            let mut select = Select::new();
            let send_op = select.send(plain_tx);
            let recv_op = select.recv(cipher_rx);
            let Ok(op) = select.select_timeout(POLL) else {
                continue;
            };
            if op.index() == send_op {
                return match op.send(plain_tx, chunk) {
                    Ok(()) => Ok(()),
                    Err(_) => Err(worker_failure(cipher_rx)),
                };
            }
            debug_assert_eq!(op.index(), recv_op);
            match op.recv(cipher_rx) {
                Ok(Ok(text)) => chain.push_event(XmlEvent::text(&text))?,
                Ok(Err(err)) => return Err(err),
                Err(_) => return Err(worker_failure(cipher_rx)),
            }
        }
    }

    /// Close the plaintext channel and emit the remaining ciphertext.
    fn drain(&mut self, chain: &mut OutputProcessorChain) -> Result<()> {
        self.plain_tx.take();
        let cipher_rx = self
            .cipher_rx
            .take()
            .ok_or_else(|| Error::InternalFailure("encryption region already drained".into()))?;
        let mut started = Instant::now();
        loop {
            self.waiter.check(started, "encryption worker")?;
            match cipher_rx.recv_timeout(POLL) {
                Ok(Ok(text)) => {
                    chain.push_event(XmlEvent::text(&text))?;
                    started = Instant::now();
                }
                Ok(Err(err)) => return Err(err),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        match self.worker.take().map(JoinHandle::join) {
            Some(Err(_)) => Err(Error::InternalFailure("encryption worker panicked".into())),
            _ => Ok(()),
        }
    }
}

impl Drop for EncryptRegion {
    fn drop(&mut self) {
        self.plain_tx.take();
        self.cipher_rx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// The worker's error if it sent one before going away.
fn worker_failure(cipher_rx: &Receiver<Result<String>>) -> Error {
    cipher_rx
        .try_iter()
        .find_map(|item| item.err())
        .unwrap_or_else(|| Error::InternalFailure("encryption worker stopped".into()))
}

fn xenc(local: &str) -> QName {
    QName::with_prefix(ns::ENC, local, "xenc")
}

fn encrypted_data_header(id: &str, type_uri: &str, algorithm: &str, token_id: &str) -> Vec<XmlEvent> {
    let ds = |local: &str| QName::with_prefix(ns::DSIG, local, "ds");
    let wsse = |local: &str| QName::with_prefix(ns::WSSE, local, "wsse");
    vec![
        XmlEvent::start(
            StartElement::new(xenc(ns::node::ENCRYPTED_DATA))
                .with_namespace("xenc", ns::ENC)
                .with_attribute(Attribute::local(ns::attr::ID, id))
                .with_attribute(Attribute::local(ns::attr::TYPE, type_uri)),
        ),
        XmlEvent::start(
            StartElement::new(xenc(ns::node::ENCRYPTION_METHOD))
                .with_attribute(Attribute::local(ns::attr::ALGORITHM, algorithm)),
        ),
        XmlEvent::end(xenc(ns::node::ENCRYPTION_METHOD)),
        XmlEvent::start(StartElement::new(ds(ns::node::KEY_INFO)).with_namespace("ds", ns::DSIG)),
        XmlEvent::start(
            StartElement::new(wsse(ns::node::SECURITY_TOKEN_REFERENCE))
                .with_namespace("wsse", ns::WSSE),
        ),
        XmlEvent::start(
            StartElement::new(wsse(ns::node::WSSE_REFERENCE))
                .with_attribute(Attribute::local(ns::attr::URI, &format!("#{token_id}"))),
        ),
        XmlEvent::end(wsse(ns::node::WSSE_REFERENCE)),
        XmlEvent::end(wsse(ns::node::SECURITY_TOKEN_REFERENCE)),
        XmlEvent::end(ds(ns::node::KEY_INFO)),
        XmlEvent::start(StartElement::new(xenc(ns::node::CIPHER_DATA))),
        XmlEvent::start(StartElement::new(xenc(ns::node::CIPHER_VALUE))),
    ]
}

/// Sends base64 output to the chain thread.
struct CipherSink {
    tx: Sender<Result<String>>,
}

impl Write for CipherSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let text = std::str::from_utf8(buf)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
            .to_owned();
        self.tx
            .send(Ok(text))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "ciphertext consumer gone"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn run_worker(
    encryptor: Box<dyn StreamEncryptor>,
    plain_rx: Receiver<Vec<u8>>,
    cipher_tx: Sender<Result<String>>,
) {
    let sink = CipherSink {
        tx: cipher_tx.clone(),
    };
    if let Err(err) = encrypt_stream(encryptor, &plain_rx, sink) {
        tracing::debug!(error = %err, "encryption worker failed");
        let _ = cipher_tx.send(Err(err));
    }
}

fn encrypt_stream(
    mut encryptor: Box<dyn StreamEncryptor>,
    plain_rx: &Receiver<Vec<u8>>,
    sink: CipherSink,
) -> Result<()> {
    let mut encoder = EncoderWriter::new(sink, &STANDARD);
    let mut out = Vec::new();
    for chunk in plain_rx.iter() {
        out.clear();
        encryptor.update(&chunk, &mut out)?;
        encoder.write_all(&out).map_err(Error::from_io)?;
    }
    out.clear();
    encryptor.finalize(&mut out)?;
    encoder.write_all(&out).map_err(Error::from_io)?;
    encoder.finish().map_err(Error::from_io)?;
    Ok(())
}
