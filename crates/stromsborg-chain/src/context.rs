#![forbid(unsafe_code)]

//! Per-chain document state and the shared security context.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use stromsborg_core::{Error, Result, SecurityProperties};
use stromsborg_crypto::{AlgorithmRegistry, CryptoProvider, SigningKey};

use crate::event::{SecurityEvent, SecurityEventSink, TracingEventSink};
use crate::token::{KeyUsage, SecurityToken};

/// Position-dependent state of one chain. Sub-chains get a clone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentContext {
    /// Current element nesting depth.
    pub depth: usize,
    pub encoding: Option<String>,
    pub version: Option<String>,
    pub base_uri: Option<String>,
    /// Depths at which currently open encrypted regions start.
    pub encrypted_content: Vec<usize>,
    pub in_security_header: bool,
    /// Set once the message header (if any) has been read completely.
    pub header_complete: bool,
}

impl DocumentContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_uri(mut self, base_uri: &str) -> Self {
        self.base_uri = Some(base_uri.to_owned());
        self
    }

    pub fn in_encrypted_content(&self) -> bool {
        !self.encrypted_content.is_empty()
    }

    pub fn enter_encrypted_content(&mut self) {
        self.encrypted_content.push(self.depth);
    }

    pub fn leave_encrypted_content(&mut self) {
        self.encrypted_content.pop();
    }
}

/// Cooperative cancellation shared by a chain, its sub-chains and workers.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// State shared by reference across a chain, its sub-chains and workers.
///
/// All mutation is append-only and keyed by id.
pub struct SecurityContext {
    properties: SecurityProperties,
    tokens: RwLock<HashMap<String, Arc<dyn SecurityToken>>>,
    wrapped_by: RwLock<HashMap<String, String>>,
    processed_references: Mutex<HashSet<String>>,
    events: Arc<dyn SecurityEventSink>,
    crypto: Arc<dyn CryptoProvider>,
    cancellation: CancellationToken,
}

impl std::fmt::Debug for SecurityContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tokens: Vec<String> = read(&self.tokens).keys().cloned().collect();
        f.debug_struct("SecurityContext")
            .field("properties", &self.properties)
            .field("tokens", &tokens)
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish()
    }
}

impl Default for SecurityContext {
    fn default() -> Self {
        Self::new(SecurityProperties::default())
    }
}

impl SecurityContext {
    /// A context with the built-in algorithms and events logged through
    /// `tracing`.
    pub fn new(properties: SecurityProperties) -> Self {
        Self {
            properties,
            tokens: RwLock::new(HashMap::new()),
            wrapped_by: RwLock::new(HashMap::new()),
            processed_references: Mutex::new(HashSet::new()),
            events: Arc::new(TracingEventSink),
            crypto: Arc::new(AlgorithmRegistry),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn SecurityEventSink>) -> Self {
        self.events = sink;
        self
    }

    pub fn with_crypto_provider(mut self, crypto: Arc<dyn CryptoProvider>) -> Self {
        self.crypto = crypto;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn with_properties(mut self, properties: SecurityProperties) -> Self {
        self.properties = properties;
        self
    }

    pub fn properties(&self) -> &SecurityProperties {
        &self.properties
    }

    pub fn crypto(&self) -> &dyn CryptoProvider {
        self.crypto.as_ref()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    // ── Tokens ───────────────────────────────────────────────────────

    /// Register a token under its id; a second token with the same id is
    /// rejected.
    pub fn register_token(&self, token: Arc<dyn SecurityToken>) -> Result<()> {
        let id = token.id().to_owned();
        if let Some(wrapping) = token.wrapping_token() {
            write(&self.wrapped_by).insert(id.clone(), wrapping.to_owned());
        }
        let mut tokens = write(&self.tokens);
        if tokens.contains_key(&id) {
            return Err(Error::InvalidSecurity(format!("token {id} registered twice")));
        }
        tracing::debug!(token = %id, "token registered");
        tokens.insert(id, token);
        Ok(())
    }

    pub fn token(&self, id: &str) -> Option<Arc<dyn SecurityToken>> {
        read(&self.tokens).get(id).cloned()
    }

    /// Id of the token that wraps (carries) `id`, if registered.
    pub fn wrapping_token_of(&self, id: &str) -> Option<String> {
        read(&self.wrapped_by).get(id).cloned()
    }

    /// Follow `key_reference` links from `id` to the token holding the key
    /// material, at most `max_reference_depth` hops.
    pub fn resolve_token(&self, id: &str) -> Result<Arc<dyn SecurityToken>> {
        let max_depth = self.properties.max_reference_depth;
        let mut current = self
            .token(id)
            .ok_or_else(|| Error::KeyNotFound(format!("no token with id {id}")))?;
        let mut hops = 0;
        while let Some(next) = current.key_reference() {
            hops += 1;
            if hops > max_depth {
                return Err(Error::FailedCheck(format!(
                    "token reference depth exceeds {max_depth} resolving {id}"
                )));
            }
            current = self.token(next).ok_or_else(|| {
                Error::InvalidSecurity(format!("token {} references unknown token {next}", current.id()))
            })?;
        }
        Ok(current)
    }

    pub fn secret_key(&self, id: &str, algorithm_uri: &str, usage: KeyUsage) -> Result<Vec<u8>> {
        let token = self.resolve_token(id)?;
        token.secret_key(algorithm_uri, usage)?.ok_or_else(|| {
            Error::KeyNotFound(format!("token {id} has no secret key for {algorithm_uri}"))
        })
    }

    pub fn signing_key(&self, id: &str, algorithm_uri: &str, usage: KeyUsage) -> Result<SigningKey> {
        let token = self.resolve_token(id)?;
        token.signing_key(algorithm_uri, usage)?.ok_or_else(|| {
            Error::KeyNotFound(format!("token {id} has no signing key for {algorithm_uri}"))
        })
    }

    // ── References & events ──────────────────────────────────────────

    /// Record that reference `id` has been processed; `false` if it
    /// already was.
    pub fn mark_reference_processed(&self, id: &str) -> bool {
        lock(&self.processed_references).insert(id.to_owned())
    }

    pub fn is_reference_processed(&self, id: &str) -> bool {
        lock(&self.processed_references).contains(id)
    }

    pub fn register_event(&self, event: SecurityEvent) {
        self.events.register(event);
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
