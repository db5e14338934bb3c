#![forbid(unsafe_code)]

//! Streaming decryption of `xenc:EncryptedData` regions.
//!
//! When a referenced `EncryptedData` streams by, the processor reads its
//! header, forks the chain right after itself and hands the fork to a
//! worker thread. The worker pulls the base64 `CipherValue` text through the
//! fork, decrypts it and writes the plaintext, wrapped in a synthetic root
//! element, into a bounded pipe. The processor reads the pipe through a
//! small chain of its own: a nested reader linked to the `EncryptedData`'s
//! parent scope, followed by a decryption processor that takes over the
//! outstanding references, so encrypted data inside the plaintext is
//! decrypted as well. The plaintext events replace the encrypted markup.
//!
//! Once every reference is decrypted the processor leaves the chain and
//! a guard takes its place that fails on any `EncryptedData` whose id was
//! already decrypted.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use base64::engine::general_purpose::STANDARD;
use stromsborg_chain::processors::DocumentReaderProcessor;
use stromsborg_chain::{
    AlgorithmUsage, DocumentContext, InputProcessor, InputProcessorChain, KeyUsage, Phase,
    ProcessorDescriptor, ProcessorKind, SecurityContext, SecurityEvent, SharedInputProcessor,
};
use stromsborg_core::{ns, Error, Result};
use stromsborg_crypto::StreamDecryptor;
use stromsborg_xml::escape::escape_attr;
use stromsborg_xml::{ElementId, Namespace, ScopeTree, XmlEvent};

use crate::pipe::{pipe, FaultSlot, PipeStats, PipeWriter};

/// Decrypted bytes handed to the cipher per read.
const DECODE_BUF: usize = 4096;

/// Decrypts the `EncryptedData` elements named by a reference list.
pub struct DecryptInputProcessor {
    descriptor: ProcessorDescriptor,
    outstanding: Vec<String>,
    match_all: bool,
    default_token: Option<String>,
    replay: VecDeque<XmlEvent>,
    region: Option<Region>,
    pipe_stats: Vec<Arc<PipeStats>>,
    anonymous: usize,
}

/// What the `EncryptedData` header says.
#[derive(Debug, Default)]
struct CipherHeader {
    algorithm: Option<String>,
    token_reference: Option<String>,
    key_name: Option<String>,
}

/// One region being decrypted.
struct Region {
    id: String,
    /// Wrapped in an `EncryptedHeader`.
    header_wrapped: bool,
    /// Depth of the element the plaintext replaces the children of.
    base_depth: usize,
    /// Reads the pipe; ends with the processor in `nested`.
    plaintext: Option<InputProcessorChain>,
    nested: Option<Arc<Mutex<DecryptInputProcessor>>>,
    worker: Option<JoinHandle<Option<DocumentContext>>>,
    fault: FaultSlot,
    wrapper_seen: bool,
}

impl Region {
    /// Drops the pipe's read end, joining any nested region first, so a
    /// blocked worker sees a broken pipe.
    fn release_plaintext(&mut self) {
        self.nested.take();
        self.plaintext.take();
    }

    /// Wait for the worker and take back its document context.
    fn join(mut self) -> Result<DocumentContext> {
        self.release_plaintext();
        let worker = self
            .worker
            .take()
            .ok_or_else(|| Error::InternalFailure("decryption worker already joined".into()))?;
        match worker.join() {
            Ok(Some(document)) => Ok(document),
            Ok(None) => Err(self
                .fault
                .take()
                .unwrap_or_else(|| Error::InternalFailure("decryption worker failed".into()))),
            Err(_) => Err(Error::InternalFailure("decryption worker panicked".into())),
        }
    }

    /// Stop after a consumer-side error; a worker fault takes precedence.
    fn abort(mut self, err: Error) -> Error {
        self.release_plaintext();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.fault.take().unwrap_or(err)
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        // Dropping the reader fails the worker's next write.
        self.release_plaintext();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl DecryptInputProcessor {
    /// Decrypt exactly the given reference ids (a `ReferenceList`).
    pub fn new<I, S>(references: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            descriptor: ProcessorDescriptor::new(ProcessorKind::Decryption, Phase::Processing),
            outstanding: references.into_iter().map(Into::into).collect(),
            match_all: false,
            default_token: None,
            replay: VecDeque::new(),
            region: None,
            pipe_stats: Vec::new(),
            anonymous: 0,
        }
    }

    /// Decrypt every `EncryptedData` in the document.
    pub fn all() -> Self {
        let mut processor = Self::new(Vec::<String>::new());
        processor.match_all = true;
        processor
    }

    /// Token used when an `EncryptedData` carries no `KeyInfo`.
    pub fn with_default_token(mut self, token_id: &str) -> Self {
        self.default_token = Some(token_id.to_owned());
        self
    }

    pub fn outstanding(&self) -> &[String] {
        &self.outstanding
    }

    /// Pipe statistics of every region decrypted so far.
    pub fn pipe_stats(&self) -> &[Arc<PipeStats>] {
        &self.pipe_stats
    }

    /// Processor for the plaintext of a region. It holds the outstanding
    /// references until the region closes.
    fn for_plaintext(&mut self) -> Self {
        Self {
            descriptor: ProcessorDescriptor::new(ProcessorKind::Decryption, Phase::Processing),
            outstanding: std::mem::take(&mut self.outstanding),
            match_all: self.match_all,
            default_token: self.default_token.clone(),
            replay: VecDeque::new(),
            region: None,
            pipe_stats: Vec::new(),
            anonymous: self.anonymous,
        }
    }

    fn adopt(&mut self, nested: &Mutex<DecryptInputProcessor>) {
        let mut nested = nested.lock().unwrap_or_else(|p| p.into_inner());
        self.outstanding = std::mem::take(&mut nested.outstanding);
        self.anonymous = nested.anonymous;
        self.pipe_stats.append(&mut nested.pipe_stats);
    }

    fn next(&mut self, chain: &mut InputProcessorChain, header: bool) -> Result<XmlEvent> {
        loop {
            if let Some(event) = self.replay.pop_front() {
                return Ok(event);
            }
            if self.region.is_some() {
                match self.next_plaintext(chain, header)? {
                    Some(event) => return Ok(event),
                    None => continue,
                }
            }
            let event = pull(chain, header)?;
            if let Some(event) = self.scan(event, chain, header)? {
                return Ok(event);
            }
        }
    }

    // ── Scanning ─────────────────────────────────────────────────────

    /// Returns the event to hand on, or `None` if it started a region or
    /// was queued for replay.
    fn scan(
        &mut self,
        event: XmlEvent,
        chain: &mut InputProcessorChain,
        header: bool,
    ) -> Result<Option<XmlEvent>> {
        let Some(start) = event.as_start() else {
            return Ok(Some(event));
        };
        if start.name.is(ns::WSSE11, ns::node::ENCRYPTED_HEADER) {
            self.scan_encrypted_header(event, chain, header)?;
            return Ok(None);
        }
        if start.name.is(ns::ENC, ns::node::ENCRYPTED_DATA) {
            let id = start.attribute("", ns::attr::ID);
            reject_processed(chain.security_context(), id)?;
            if let Some(id) = self.matching_reference(id, None) {
                self.open_region(event, id, None, chain, header)?;
                return Ok(None);
            }
        }
        Ok(Some(event))
    }

    /// Look past an `EncryptedHeader` start at the `EncryptedData` inside.
    fn scan_encrypted_header(
        &mut self,
        header_start: XmlEvent,
        chain: &mut InputProcessorChain,
        header: bool,
    ) -> Result<()> {
        let mut buffered = vec![header_start];
        loop {
            let event = pull(chain, header)?;
            match &event {
                XmlEvent::StartElement(start) if start.name.is(ns::ENC, ns::node::ENCRYPTED_DATA) => {
                    let outer = buffered[0].as_start();
                    let outer_id = outer.and_then(|s| s.attribute(ns::WSU, ns::attr::ID));
                    let outer_parent = outer.map(|s| s.parent());
                    reject_processed(chain.security_context(), start.attribute("", ns::attr::ID))?;
                    reject_processed(chain.security_context(), outer_id)?;
                    if let Some(id) =
                        self.matching_reference(start.attribute("", ns::attr::ID), outer_id)
                    {
                        tracing::debug!(reference = %id, "encrypted header matched");
                        return self.open_region(event, id, Some(outer_parent.flatten()), chain, header);
                    }
                    buffered.push(event);
                    break;
                }
                XmlEvent::StartElement(_) | XmlEvent::EndElement(_) | XmlEvent::EndDocument => {
                    buffered.push(event);
                    break;
                }
                _ => buffered.push(event),
            }
        }
        tracing::warn!("EncryptedHeader without a referenced EncryptedData, passed on unchanged");
        self.replay.extend(buffered);
        Ok(())
    }

    fn matching_reference(&mut self, id: Option<&str>, outer_id: Option<&str>) -> Option<String> {
        for candidate in [id, outer_id].into_iter().flatten() {
            if self.outstanding.iter().any(|r| r == candidate) {
                return Some(candidate.to_owned());
            }
        }
        if self.match_all {
            return Some(match id.or(outer_id) {
                Some(id) => id.to_owned(),
                None => {
                    self.anonymous += 1;
                    format!("#anonymous-{}", self.anonymous)
                }
            });
        }
        None
    }

    // ── Region start ─────────────────────────────────────────────────

    fn open_region(
        &mut self,
        encrypted_data: XmlEvent,
        id: String,
        header_parent: Option<Option<ElementId>>,
        chain: &mut InputProcessorChain,
        header: bool,
    ) -> Result<()> {
        let security = Arc::clone(chain.security_context());
        if !security.mark_reference_processed(&id) {
            return Err(Error::FailedCheck(format!(
                "encrypted data {id} is referenced more than once"
            )));
        }
        if let Some(pos) = self.outstanding.iter().position(|r| *r == id) {
            self.outstanding.remove(pos);
        }

        let start = encrypted_data
            .as_start()
            .ok_or_else(|| Error::InternalFailure("region must open on a start element".into()))?;
        let namespaces = start.namespaces_in_scope();
        let (tree, parent) = match start.scope() {
            Some(link) => (link.tree.clone(), header_parent.unwrap_or(link.parent)),
            None => (ScopeTree::new(), None),
        };
        let depth = chain.document_context().depth;
        let base_depth = match header_parent {
            Some(_) => depth.saturating_sub(2),
            None => depth.saturating_sub(1),
        };

        let cipher_header = read_cipher_header(chain, header, &id)?;
        let algorithm = cipher_header.algorithm.ok_or_else(|| {
            Error::InvalidSecurity(format!("encrypted data {id} has no EncryptionMethod"))
        })?;
        let cipher = security.crypto().cipher(&algorithm)?;
        let token_id = cipher_header
            .token_reference
            .map(|uri| uri.trim_start_matches('#').to_owned())
            .or(cipher_header.key_name)
            .or_else(|| self.default_token.clone())
            .ok_or_else(|| {
                Error::InvalidSecurity(format!("no key information for encrypted data {id}"))
            })?;
        let key = security.secret_key(&token_id, &algorithm, KeyUsage::Decryption)?;
        let decryptor = cipher.decryptor(&key)?;
        security.register_event(SecurityEvent::AlgorithmUsed {
            algorithm: algorithm.clone(),
            usage: AlgorithmUsage::Encryption,
        });

        chain.document_context_mut().encrypted_content.push(base_depth + 1);
        let sub = chain.fork(self.descriptor.id)?;
        let properties = security.properties();
        let fault = FaultSlot::new();
        let (writer, reader) = pipe(properties, security.cancellation().clone(), fault.clone());
        self.pipe_stats.push(writer.stats());

        let mut plaintext = InputProcessorChain::new(Arc::clone(&security));
        plaintext.insert(
            DocumentReaderProcessor::nested(reader, tree, parent)
                .with_text_chunk_size(properties.text_chunk_size),
        )?;
        let nested = Arc::new(Mutex::new(self.for_plaintext()));
        let shared: SharedInputProcessor = nested.clone();
        plaintext.insert_shared(shared)?;

        let wrapper = wrapper_start(&namespaces);
        let worker_fault = fault.clone();
        // joined by close_region, or by Region's drop on error
        let worker = thread::Builder::new()
            .name(format!("stromsborg-decrypt-{id}"))
            .spawn(move || run_worker(sub, header, decryptor, wrapper, writer, worker_fault))
            .map_err(|e| Error::InternalFailure(format!("cannot start decryption worker: {e}")))?;

        tracing::debug!(reference = %id, %algorithm, token = %token_id, "decryption region started");
        self.region = Some(Region {
            id,
            header_wrapped: header_parent.is_some(),
            base_depth,
            plaintext: Some(plaintext),
            nested: Some(nested),
            worker: Some(worker),
            fault,
            wrapper_seen: false,
        });
        Ok(())
    }

    // ── Plaintext ────────────────────────────────────────────────────

    fn next_plaintext(
        &mut self,
        chain: &mut InputProcessorChain,
        header: bool,
    ) -> Result<Option<XmlEvent>> {
        loop {
            let Some(region) = self.region.as_mut() else {
                return Ok(None);
            };
            let Some(plaintext) = region.plaintext.as_mut() else {
                return Err(Error::InternalFailure("decryption region lost its reader".into()));
            };
            let event = match pull(plaintext, header) {
                Ok(event) if event.is_end_document() => {
                    let err = Error::MalformedInput("decrypted content is not well-formed".into());
                    return Err(self.abort_region(err));
                }
                Ok(event) => event,
                Err(err) => return Err(self.abort_region(err)),
            };
            let nested_depth = plaintext.document_context().depth;
            match event {
                XmlEvent::StartElement(_) if !region.wrapper_seen => {
                    region.wrapper_seen = true;
                }
                XmlEvent::EndElement(_) if nested_depth == 0 => {
                    self.close_region(chain, header)?;
                    return Ok(None);
                }
                event => {
                    // the wrapper is open at nested depth 1
                    chain.document_context_mut().depth =
                        region.base_depth + nested_depth.saturating_sub(1);
                    return Ok(Some(event));
                }
            }
        }
    }

    fn abort_region(&mut self, err: Error) -> Error {
        match self.region.take() {
            Some(region) => {
                tracing::debug!(reference = %region.id, error = %err, "decryption region failed");
                region.abort(err)
            }
            None => err,
        }
    }

    fn close_region(&mut self, chain: &mut InputProcessorChain, header: bool) -> Result<()> {
        let mut region = self
            .region
            .take()
            .ok_or_else(|| Error::InternalFailure("no decryption region to close".into()))?;
        if let Some(nested) = region.nested.take() {
            self.adopt(&nested);
        }
        let id = region.id.clone();
        let header_wrapped = region.header_wrapped;
        *chain.document_context_mut() = region.join()?;

        // The worker stopped at the CipherValue end; skip what remains of the
        // encrypted markup.
        let mut open = if header_wrapped { 3 } else { 2 };
        while open > 0 {
            match pull(chain, header)? {
                XmlEvent::StartElement(_) => open += 1,
                XmlEvent::EndElement(_) => open -= 1,
                XmlEvent::EndDocument => {
                    return Err(Error::MalformedInput(format!(
                        "document ended inside encrypted data {id}"
                    )));
                }
                _ => {}
            }
        }
        chain.document_context_mut().leave_encrypted_content();
        chain
            .security_context()
            .register_event(SecurityEvent::ElementDecrypted {
                reference: id.clone(),
            });
        tracing::debug!(reference = %id, "decryption region spliced");

        if !self.match_all && self.outstanding.is_empty() {
            chain.remove(self.descriptor.id);
            chain.insert(DecryptedReferenceGuard::new())?;
        }
        Ok(())
    }
}

impl InputProcessor for DecryptInputProcessor {
    fn descriptor(&self) -> &ProcessorDescriptor {
        &self.descriptor
    }

    fn handle_header_event(&mut self, chain: &mut InputProcessorChain) -> Result<XmlEvent> {
        self.next(chain, true)
    }

    fn handle_event(&mut self, chain: &mut InputProcessorChain) -> Result<XmlEvent> {
        self.next(chain, false)
    }

    fn finish(&mut self, chain: &mut InputProcessorChain) -> Result<()> {
        if let Some(region) = &self.region {
            return Err(Error::FailedCheck(format!(
                "encrypted data {} was not fully decrypted",
                region.id
            )));
        }
        if !self.outstanding.is_empty() {
            return Err(Error::FailedCheck(format!(
                "referenced encrypted data not found: {}",
                self.outstanding.join(", ")
            )));
        }
        chain.finish()
    }
}

/// Stands in for a [`DecryptInputProcessor`] that is done, failing on any
/// `EncryptedData` or `EncryptedHeader` whose id was already decrypted.
struct DecryptedReferenceGuard {
    descriptor: ProcessorDescriptor,
}

impl DecryptedReferenceGuard {
    fn new() -> Self {
        Self {
            descriptor: ProcessorDescriptor::new(ProcessorKind::DecryptionGuard, Phase::Processing),
        }
    }

    fn check(&self, event: XmlEvent, chain: &InputProcessorChain) -> Result<XmlEvent> {
        if let Some(start) = event.as_start() {
            let security = chain.security_context();
            if start.name.is(ns::ENC, ns::node::ENCRYPTED_DATA) {
                reject_processed(security, start.attribute("", ns::attr::ID))?;
            } else if start.name.is(ns::WSSE11, ns::node::ENCRYPTED_HEADER) {
                reject_processed(security, start.attribute(ns::WSU, ns::attr::ID))?;
            }
        }
        Ok(event)
    }
}

impl InputProcessor for DecryptedReferenceGuard {
    fn descriptor(&self) -> &ProcessorDescriptor {
        &self.descriptor
    }

    fn handle_header_event(&mut self, chain: &mut InputProcessorChain) -> Result<XmlEvent> {
        let event = chain.pull_header_event()?;
        self.check(event, chain)
    }

    fn handle_event(&mut self, chain: &mut InputProcessorChain) -> Result<XmlEvent> {
        let event = chain.pull_event()?;
        self.check(event, chain)
    }
}

fn reject_processed(security: &SecurityContext, id: Option<&str>) -> Result<()> {
    match id {
        Some(id) if security.is_reference_processed(id) => Err(Error::FailedCheck(format!(
            "encrypted data {id} is referenced more than once"
        ))),
        _ => Ok(()),
    }
}

fn pull(chain: &mut InputProcessorChain, header: bool) -> Result<XmlEvent> {
    if header {
        chain.pull_header_event()
    } else {
        chain.pull_event()
    }
}

/// Consume the `EncryptedData` children up to and including the
/// `CipherValue` start.
fn read_cipher_header(
    chain: &mut InputProcessorChain,
    header: bool,
    id: &str,
) -> Result<CipherHeader> {
    let mut parsed = CipherHeader::default();
    let mut open = 1usize;
    let mut in_key_name = false;
    loop {
        let event = pull(chain, header)?;
        match &event {
            XmlEvent::StartElement(start) => {
                open += 1;
                let name = &start.name;
                if name.is(ns::ENC, ns::node::ENCRYPTION_METHOD) {
                    parsed.algorithm = start.attribute("", ns::attr::ALGORITHM).map(str::to_owned);
                } else if name.is(ns::WSSE, ns::node::WSSE_REFERENCE) {
                    parsed.token_reference = start.attribute("", ns::attr::URI).map(str::to_owned);
                } else if name.is(ns::DSIG, ns::node::KEY_NAME) {
                    in_key_name = true;
                } else if name.is(ns::ENC, ns::node::CIPHER_REFERENCE) {
                    return Err(Error::UnsupportedAlgorithm(format!(
                        "CipherReference in encrypted data {id}"
                    )));
                } else if name.is(ns::ENC, ns::node::CIPHER_VALUE) {
                    return Ok(parsed);
                }
            }
            XmlEvent::EndElement(end) => {
                open -= 1;
                if end.name.is(ns::DSIG, ns::node::KEY_NAME) {
                    in_key_name = false;
                }
                if open == 0 {
                    return Err(Error::InvalidSecurity(format!(
                        "encrypted data {id} has no CipherValue"
                    )));
                }
            }
            XmlEvent::Characters(chars) if in_key_name => {
                parsed
                    .key_name
                    .get_or_insert_with(String::new)
                    .push_str(chars.text.trim());
            }
            XmlEvent::EndDocument => {
                return Err(Error::MalformedInput(format!(
                    "document ended inside encrypted data {id}"
                )));
            }
            _ => {}
        }
    }
}

fn wrapper_start(namespaces: &[Namespace]) -> String {
    let mut tag = format!(
        "<{prefix}:{local} xmlns:{prefix}=\"{uri}\"",
        prefix = ns::WRAPPER_PREFIX,
        local = ns::node::WRAPPER,
        uri = ns::WRAPPER,
    );
    for namespace in namespaces {
        if namespace.prefix == ns::WRAPPER_PREFIX {
            continue;
        }
        if namespace.prefix.is_empty() {
            tag.push_str(&format!(" xmlns=\"{}\"", escape_attr(&namespace.uri)));
        } else {
            tag.push_str(&format!(
                " xmlns:{}=\"{}\"",
                namespace.prefix,
                escape_attr(&namespace.uri)
            ));
        }
    }
    tag.push('>');
    tag
}

fn wrapper_end() -> String {
    format!("</{}:{}>", ns::WRAPPER_PREFIX, ns::node::WRAPPER)
}

/// Worker thread body. Returns the fork's document context, or `None`
/// after recording a fault.
fn run_worker(
    mut sub: InputProcessorChain,
    header: bool,
    decryptor: Box<dyn StreamDecryptor>,
    wrapper: String,
    mut writer: PipeWriter,
    fault: FaultSlot,
) -> Option<DocumentContext> {
    let outcome = decrypt_into(&mut sub, header, decryptor, &wrapper, &mut writer);
    match outcome {
        Ok(()) => match writer.finish() {
            Ok(()) => Some(sub.into_document_context()),
            Err(err) => {
                fault.set(Error::from_io(err));
                None
            }
        },
        Err(err) => {
            // recorded before the writer drops and disconnects the reader
            fault.set(err);
            drop(writer);
            None
        }
    }
}

fn decrypt_into(
    sub: &mut InputProcessorChain,
    header: bool,
    mut decryptor: Box<dyn StreamDecryptor>,
    wrapper: &str,
    out: &mut PipeWriter,
) -> Result<()> {
    out.write_all(wrapper.as_bytes()).map_err(Error::from_io)?;
    let mut decoder = base64::read::DecoderReader::new(CipherTextReader::new(sub, header), &STANDARD);
    let mut encoded = vec![0u8; DECODE_BUF];
    let mut plain = Vec::with_capacity(DECODE_BUF + 32);
    loop {
        let n = decoder.read(&mut encoded).map_err(decode_error)?;
        if n == 0 {
            break;
        }
        plain.clear();
        decryptor.update(&encoded[..n], &mut plain)?;
        out.write_all(&plain).map_err(Error::from_io)?;
    }
    plain.clear();
    decryptor.finalize(&mut plain)?;
    out.write_all(&plain).map_err(Error::from_io)?;
    out.write_all(wrapper_end().as_bytes()).map_err(Error::from_io)?;
    Ok(())
}

fn decode_error(err: io::Error) -> Error {
    match Error::from_io(err) {
        Error::Io(io) if io.kind() == io::ErrorKind::InvalidData => Error::Base64(io.to_string()),
        other => other,
    }
}

/// `Read` over the text of the current `CipherValue`, pulled event by
/// event from the chain. Whitespace is dropped; the end element is EOF.
struct CipherTextReader<'a> {
    chain: &'a mut InputProcessorChain,
    header: bool,
    pending: Vec<u8>,
    pos: usize,
    done: bool,
}

impl<'a> CipherTextReader<'a> {
    fn new(chain: &'a mut InputProcessorChain, header: bool) -> Self {
        Self {
            chain,
            header,
            pending: Vec::new(),
            pos: 0,
            done: false,
        }
    }
}

impl Read for CipherTextReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos >= self.pending.len() {
            if self.done {
                return Ok(0);
            }
            match pull(self.chain, self.header).map_err(Error::into_io)? {
                XmlEvent::Characters(chars) => {
                    self.pending = chars
                        .text
                        .bytes()
                        .filter(|b| !b.is_ascii_whitespace())
                        .collect();
                    self.pos = 0;
                }
                XmlEvent::EndElement(_) => self.done = true,
                XmlEvent::Comment(_) | XmlEvent::ProcessingInstruction { .. } => {}
                other => {
                    return Err(Error::MalformedInput(format!(
                        "unexpected {other:?} inside CipherValue"
                    ))
                    .into_io());
                }
            }
        }
        let n = (self.pending.len() - self.pos).min(buf.len());
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
