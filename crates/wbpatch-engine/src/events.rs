//! Lifecycle events
//!
//! Opt-in NDJSON stream, one `{"event", "timestamp", "data"}` object per
//! line, separate from logs. A disabled emitter drops events without
//! serializing them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as Json;
use std::fmt;
use std::io::Write;
use std::sync::Mutex;
use tracing::warn;

/// One lifecycle event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub event: String,
    pub timestamp: DateTime<Utc>,
    pub data: Json,
}

/// Writes events to a line-oriented sink
#[derive(Default)]
pub struct EventEmitter {
    sink: Option<Mutex<Box<dyn Write + Send>>>,
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl EventEmitter {
    /// Emitter that drops everything
    #[inline]
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Emitter writing to stderr
    #[must_use]
    pub fn stderr() -> Self {
        Self::to_writer(std::io::stderr())
    }

    /// Emitter writing to `sink`
    #[must_use]
    pub fn to_writer(sink: impl Write + Send + 'static) -> Self {
        Self {
            sink: Some(Mutex::new(Box::new(sink))),
        }
    }

    /// Whether events are written anywhere
    #[inline]
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Emit `event` with `data`
    ///
    /// Write failures are logged and otherwise ignored; events never change
    /// the outcome of a command.
    pub fn emit(&self, event: &str, data: Json) {
        let Some(sink) = &self.sink else {
            return;
        };
        let record = Event {
            event: event.to_string(),
            timestamp: Utc::now(),
            data,
        };
        let mut line = match serde_json::to_vec(&record) {
            Ok(line) => line,
            Err(e) => {
                warn!(event, error = %e, "cannot serialize event");
                return;
            }
        };
        line.push(b'\n');
        let Ok(mut out) = sink.lock() else {
            warn!(event, "event sink poisoned");
            return;
        };
        if let Err(e) = out.write_all(&line).and_then(|()| out.flush()) {
            warn!(event, error = %e, "cannot write event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    /// Shared buffer so the test can read what the emitter wrote
    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn writes_one_json_object_per_line() {
        let buffer = Buffer::default();
        let emitter = EventEmitter::to_writer(buffer.clone());
        emitter.emit("apply.start", json!({ "plan_id": "pln_1" }));
        emitter.emit("apply.committed", json!({}));

        let text = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<Json> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "apply.start");
        assert_eq!(lines[0]["data"]["plan_id"], "pln_1");
        assert!(lines[1]["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn disabled_emitter_is_silent() {
        let emitter = EventEmitter::disabled();
        assert!(!emitter.is_enabled());
        emitter.emit("anything", json!(null));
    }
}
