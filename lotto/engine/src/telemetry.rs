use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::Value;
use shared_event_bus::{EventPublisher, EventRecord};
use shared_logging::{JsonLogger, LogLevel, LogRecord};

/// Builder for engine telemetry sinks.
pub struct EngineTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    min_level: LogLevel,
    event_publisher: Option<Arc<dyn EventPublisher>>,
}

impl EngineTelemetryBuilder {
    /// Creates a builder scoped to a module label.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            min_level: LogLevel::Debug,
            event_publisher: None,
        }
    }

    /// Sets the JSON-lines log path.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Drops log records below `level`.
    #[must_use]
    pub fn min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Sets the event publisher.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    /// Builds the telemetry handle.
    pub fn build(self) -> Result<EngineTelemetry> {
        let logger = match self.log_path {
            Some(path) => Some(JsonLogger::with_min_level(path, self.min_level)?),
            None => None,
        };
        Ok(EngineTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                logger,
                publisher: self.event_publisher,
            }),
        })
    }
}

/// Telemetry handle shared by the feature provider, model loader and predictor.
#[derive(Clone)]
pub struct EngineTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for EngineTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineTelemetry")
            .field("module", &self.inner.module)
            .field("logging", &self.inner.logger.is_some())
            .field("events", &self.inner.publisher.is_some())
            .finish()
    }
}

struct TelemetryInner {
    module: String,
    logger: Option<JsonLogger>,
    publisher: Option<Arc<dyn EventPublisher>>,
}

impl EngineTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> EngineTelemetryBuilder {
        EngineTelemetryBuilder::new(module)
    }

    /// Writes a structured log record.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        if let Some(logger) = &self.inner.logger {
            let record = LogRecord::new(&self.inner.module, level, message).with_metadata(metadata);
            logger.log(&record)?;
        }
        Ok(())
    }

    /// Publishes an event and waits for the publisher to accept it.
    pub async fn event(&self, event_type: &str, payload: Value) -> Result<()> {
        if let Some(publisher) = &self.inner.publisher {
            publisher
                .publish(EventRecord::new(&self.inner.module, event_type, payload))
                .await?;
        }
        Ok(())
    }
}

/// Logs through optional telemetry, swallowing sink failures.
pub(crate) fn log(
    telemetry: Option<&EngineTelemetry>,
    level: LogLevel,
    message: &str,
    metadata: Value,
) {
    if let Some(tel) = telemetry {
        let _ = tel.log(level, message, metadata);
    }
}

/// Emits through optional telemetry, swallowing sink failures.
pub(crate) async fn event(telemetry: Option<&EngineTelemetry>, event_type: &str, payload: Value) {
    if let Some(tel) = telemetry {
        let _ = tel.event(event_type, payload).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_event_bus::MemoryEventBus;
    use tempfile::tempdir;

    #[tokio::test]
    async fn telemetry_writes_log_and_event() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("engine.log");
        let bus = Arc::new(MemoryEventBus::new(8));
        let telemetry = EngineTelemetry::builder("lotto-engine")
            .log_path(&path)
            .min_level(LogLevel::Info)
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        telemetry
            .log(LogLevel::Debug, "lotto.scorer.debug", json!({}))
            .unwrap();
        telemetry
            .log(LogLevel::Info, "lotto.prediction.start", json!({ "pick": 6 }))
            .unwrap();
        telemetry
            .event("lotto.prediction.completed", json!({ "numbers": [1, 2, 3, 4, 5, 6] }))
            .await
            .unwrap();

        let records = shared_logging::read_records(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message, "lotto.prediction.start");
        assert_eq!(records[0].module, "lotto-engine");
        let events = bus.snapshot();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source, "lotto-engine");
    }

    #[tokio::test]
    async fn absent_sinks_are_noops() {
        let telemetry = EngineTelemetry::builder("quiet").build().unwrap();
        telemetry.log(LogLevel::Error, "nothing", json!({})).unwrap();
        telemetry.event("nothing", json!({})).await.unwrap();
        log(None, LogLevel::Warn, "nothing", json!({}));
        event(None, "nothing", json!({})).await;
    }
}
