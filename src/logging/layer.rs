//! A [`Layer`] that writes one correlated record per event.

use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{Context, Layer};

use super::LogFormat;
use super::record::LogRecord;
use crate::config::ServiceIdentity;

/// Emits [`LogRecord`]s enriched with the current trace context.
///
/// Works both as a `tracing` layer and as a direct logger via [`log`]. Write
/// failures are counted and swallowed; logging never fails the caller.
///
/// [`log`]: CorrelatedLogger::log
#[derive(Clone)]
pub struct CorrelatedLogger<W = fn() -> io::Stdout> {
    identity: Arc<ServiceIdentity>,
    format: LogFormat,
    make_writer: W,
    sink_failures: Arc<AtomicU64>,
}

impl CorrelatedLogger {
    pub fn stdout(identity: Arc<ServiceIdentity>, format: LogFormat) -> Self {
        Self::with_writer(identity, format, io::stdout as fn() -> io::Stdout)
    }
}

impl<W> CorrelatedLogger<W>
where
    W: for<'a> MakeWriter<'a>,
{
    pub fn with_writer(identity: Arc<ServiceIdentity>, format: LogFormat, make_writer: W) -> Self {
        Self {
            identity,
            format,
            make_writer,
            sink_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    /// Log `message` at `level` with extra structured fields.
    pub fn log(&self, level: Level, message: &str, extra_fields: Map<String, Value>) {
        let record = LogRecord::capture(&self.identity, level, None, message, extra_fields);
        self.emit(&record);
    }

    /// How many records were lost because the sink rejected them.
    pub fn sink_failures(&self) -> u64 {
        self.sink_failures.load(Ordering::Relaxed)
    }

    fn emit(&self, record: &LogRecord) {
        let line = match self.format {
            LogFormat::Json => match record.to_json_line() {
                Ok(line) => line,
                Err(_) => {
                    self.record_failure();
                    return;
                }
            },
            LogFormat::Text => record.to_text_line(),
        };

        let mut writer = self.make_writer.make_writer();
        if writer
            .write_all(line.as_bytes())
            .and_then(|()| writer.flush())
            .is_err()
        {
            self.record_failure();
        }
    }

    fn record_failure(&self) {
        self.sink_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("log_sink_failures_total").increment(1);
    }
}

impl<S, W> Layer<S> for CorrelatedLogger<W>
where
    S: Subscriber,
    W: for<'a> MakeWriter<'a> + 'static,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let record = LogRecord::capture(
            &self.identity,
            *metadata.level(),
            Some(metadata.target()),
            visitor.message,
            visitor.fields,
        );
        self.emit(&record);
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: Map<String, Value>,
}

impl FieldVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        if field.name() == "message" {
            self.message = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
        } else if !field.name().starts_with("log.") {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.insert(field, Value::String(format!("{value:?}")));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.insert(field, Value::String(value.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::testing::{BufferWriter, FailingWriter, test_identity};
    use crate::trace::TraceContext;
    use crate::trace::scope::{scope, sync_scope};
    use serde_json::json;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn test_layer_writes_correlated_json() {
        let (writer, buffer) = BufferWriter::new();
        let logger = CorrelatedLogger::with_writer(test_identity(), LogFormat::Json, writer);
        let subscriber = tracing_subscriber::registry().with(logger);

        tracing::subscriber::with_default(subscriber, || {
            let ctx = TraceContext::new("t-1", "r-1", None, None);
            sync_scope(ctx, || {
                tracing::info!(order_id = 7, cached = true, "order loaded");
            });
            tracing::warn!("outside");
        });

        let lines = buffer.json_lines();
        assert_eq!(lines.len(), 2);

        assert_eq!(lines[0]["message"], "order loaded");
        assert_eq!(lines[0]["level"], "INFO");
        assert_eq!(lines[0]["trace_id"], "t-1");
        assert_eq!(lines[0]["request_id"], "r-1");
        assert_eq!(lines[0]["order_id"], 7);
        assert_eq!(lines[0]["cached"], true);
        assert!(lines[0]["logger"].as_str().unwrap().contains("logging::layer"));

        assert_eq!(lines[1]["message"], "outside");
        assert!(lines[1]["trace_id"].is_null());
        assert!(lines[1]["request_id"].is_null());
    }

    #[test]
    fn test_direct_log_with_extra_fields() {
        let (writer, buffer) = BufferWriter::new();
        let logger = CorrelatedLogger::with_writer(test_identity(), LogFormat::Json, writer);

        let mut extra = Map::new();
        extra.insert("attempt".to_string(), json!(3));
        let ctx = TraceContext::new("t-2", "r-2", Some("r-1"), None);
        sync_scope(ctx, || logger.log(Level::ERROR, "retry exhausted", extra));

        let lines = buffer.json_lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["level"], "ERROR");
        assert_eq!(lines[0]["attempt"], 3);
        assert_eq!(lines[0]["parent_span_id"], "r-1");
        assert_eq!(lines[0]["service"], "test-service");
    }

    #[test]
    fn test_text_format() {
        let (writer, buffer) = BufferWriter::new();
        let logger = CorrelatedLogger::with_writer(test_identity(), LogFormat::Text, writer);

        let ctx = TraceContext::new("t-3", "r-3", None, None);
        sync_scope(ctx, || logger.log(Level::INFO, "hello", Map::new()));

        let output = buffer.contents();
        assert!(output.contains("[INFO] test-service - hello | trace_id=t-3"));
    }

    #[test]
    fn test_sink_failure_is_swallowed_and_counted() {
        let logger =
            CorrelatedLogger::with_writer(test_identity(), LogFormat::Json, FailingWriter);

        logger.log(Level::INFO, "first", Map::new());
        logger.log(Level::INFO, "second", Map::new());

        assert_eq!(logger.sink_failures(), 2);
    }

    #[test]
    fn test_records_preserve_emission_order() {
        let (writer, buffer) = BufferWriter::new();
        let logger = CorrelatedLogger::with_writer(test_identity(), LogFormat::Json, writer);

        let ctx = TraceContext::new("t-4", "r-4", None, None);
        sync_scope(ctx, || {
            for step in 0..5 {
                logger.log(Level::INFO, &format!("step-{step}"), Map::new());
            }
        });

        let messages: Vec<String> = buffer
            .json_lines()
            .iter()
            .map(|line| line["message"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(messages, vec!["step-0", "step-1", "step-2", "step-3", "step-4"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_tasks_log_their_own_context() {
        let (writer, buffer) = BufferWriter::new();
        let logger = Arc::new(CorrelatedLogger::with_writer(
            test_identity(),
            LogFormat::Json,
            writer,
        ));

        let mut handles = Vec::new();
        for i in 0..50 {
            let logger = logger.clone();
            let ctx = TraceContext::new(format!("t-{i}"), format!("r-{i}"), None, None);
            handles.push(tokio::spawn(scope(ctx, async move {
                logger.log(Level::INFO, &format!("begin-{i}"), Map::new());
                tokio::task::yield_now().await;
                logger.log(Level::INFO, &format!("end-{i}"), Map::new());
            })));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let lines = buffer.json_lines();
        assert_eq!(lines.len(), 100);
        for line in &lines {
            let message = line["message"].as_str().unwrap();
            let i = message.split('-').nth(1).unwrap();
            assert_eq!(line["trace_id"], format!("t-{i}"));
            assert_eq!(line["request_id"], format!("r-{i}"));
        }
    }
}
