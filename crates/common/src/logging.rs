//! Process logging: a human readable `fmt` layer on stderr plus, on the
//! controller, a layer that copies every event into the [`LogSink`] so the
//! client can fetch it with the next ping.

use std::fmt::Write as _;

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::{LogRecord, LogSink, Severity};

/// Forwards tracing events at or below `max_level` into a [`LogSink`].
pub struct SinkLayer {
    sink: LogSink,
    max_level: Level,
}

impl SinkLayer {
    pub fn new(sink: LogSink, max_level: Level) -> Self {
        Self { sink, max_level }
    }
}

impl<S: Subscriber> Layer<S> for SinkLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() > self.max_level {
            return;
        }
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.sink.push(LogRecord::new(
            Severity::from(metadata.level()),
            format!("{}: {}{}", metadata.target(), visitor.message, visitor.fields),
        ));
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

/// Parses a level name, falling back to `DEBUG`.
pub fn parse_level(name: &str) -> Level {
    name.parse().unwrap_or(Level::DEBUG)
}

/// Installs the global subscriber. Later calls are no-ops.
///
/// stderr output honours `RUST_LOG` (default `info`); the sink, when given,
/// receives everything up to `sink_level` regardless of `RUST_LOG`.
pub fn init_logging(sink: Option<&LogSink>, sink_level: Level) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_timer(fmt::time::uptime())
        .with_filter(filter);
    let sink_layer = sink.map(|sink| SinkLayer::new(sink.clone(), sink_level));

    let _ = tracing_subscriber::registry()
        .with(fmt_layer)
        .with(sink_layer)
        .try_init();
}
