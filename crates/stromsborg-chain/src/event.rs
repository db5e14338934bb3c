#![forbid(unsafe_code)]

//! Security events emitted for an external policy engine.

use std::sync::Mutex;

use stromsborg_xml::QName;

use crate::context::lock;

/// What an algorithm was used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmUsage {
    Encryption,
    Digest,
    Signature,
    Canonicalization,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityEvent {
    AlgorithmUsed {
        algorithm: String,
        usage: AlgorithmUsage,
    },
    ElementEncrypted {
        element: QName,
        id: String,
    },
    ContentEncrypted {
        element: QName,
        id: String,
    },
    ElementDecrypted {
        reference: String,
    },
    ElementSigned {
        element: QName,
        reference: String,
    },
    SignatureVerified {
        signature_method: String,
        token: String,
    },
    OperationSeen {
        operation: QName,
    },
}

/// Receiver of security events. The pipeline makes no policy decisions.
pub trait SecurityEventSink: Send + Sync {
    fn register(&self, event: SecurityEvent);
}

/// Logs every event at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl SecurityEventSink for TracingEventSink {
    fn register(&self, event: SecurityEvent) {
        tracing::debug!(?event, "security event");
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: Mutex<Vec<SecurityEvent>>,
}

impl CollectingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SecurityEvent> {
        lock(&self.events).clone()
    }

    pub fn take(&self) -> Vec<SecurityEvent> {
        std::mem::take(&mut *lock(&self.events))
    }
}

impl SecurityEventSink for CollectingEventSink {
    fn register(&self, event: SecurityEvent) {
        lock(&self.events).push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_sink() {
        let sink = CollectingEventSink::new();
        sink.register(SecurityEvent::ElementDecrypted {
            reference: "ED-1".into(),
        });
        assert_eq!(sink.events().len(), 1);
        assert_eq!(sink.take().len(), 1);
        assert!(sink.events().is_empty());
    }
}
