//! Per-connection request timing records.
//!
//! Best-effort and outside the dispatch critical path: entries are opened
//! when a request is dispatched and emitted to the registered logger
//! callbacks when its executor signals completion (or when the call is
//! cancelled). A completion signal for an unknown seq is warned about, not
//! errored.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;
use tracing::warn;

/// A finished request's timing record, handed to logger callbacks.
#[derive(Debug, Clone, Serialize)]
pub struct RequestLogEntry {
    pub seq: u64,
    pub service_method: String,
    pub duration_ms: u64,
}

/// Callback receiving one [`RequestLogEntry`] per completed request.
pub type RequestLogger = Arc<dyn Fn(&RequestLogEntry) + Send + Sync>;

struct PendingEntry {
    service_method: String,
    started: Instant,
}

/// The per-connection `seq -> pending entry` map.
pub(crate) struct RequestLog {
    pending: Mutex<HashMap<u64, PendingEntry>>,
    loggers: Vec<RequestLogger>,
}

impl RequestLog {
    pub(crate) fn new(loggers: Vec<RequestLogger>) -> Self {
        RequestLog {
            pending: Mutex::new(HashMap::new()),
            loggers,
        }
    }

    fn enabled(&self) -> bool {
        !self.loggers.is_empty()
    }

    pub(crate) fn start(&self, seq: u64, service_method: &str) {
        if !self.enabled() {
            return;
        }
        self.pending.lock().unwrap().insert(
            seq,
            PendingEntry {
                service_method: service_method.to_string(),
                started: Instant::now(),
            },
        );
    }

    pub(crate) fn finish(&self, seq: u64) {
        if !self.enabled() {
            return;
        }
        let pending = self.pending.lock().unwrap().remove(&seq);
        let Some(pending) = pending else {
            warn!(seq, "request log completion for unknown seq");
            return;
        };
        let entry = RequestLogEntry {
            seq,
            service_method: pending.service_method,
            duration_ms: pending.started.elapsed().as_millis() as u64,
        };
        for logger in &self.loggers {
            logger(&entry);
        }
    }
}
