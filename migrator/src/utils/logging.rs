use chrono::Utc;
use serde_json::{Map, Value};
use std::str::FromStr;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::{Event, Level, Subscriber};
use tracing_error::ErrorLayer;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{self, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::Context;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Fields that describe a migration run, emitted at the top level of every JSON line
const MIGRATION_FIELDS: &[&str] = &["step", "from", "to", "version", "outcome", "backup", "error"];

const DEFAULT_FILTER: &str = "warn,migrator=info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::EnumString)]
#[strum(serialize_all = "lowercase")]
enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn from_env() -> Self {
        std::env::var("LOG_FORMAT").ok().and_then(|format| Self::from_str(&format).ok()).unwrap_or(Self::Pretty)
    }
}

/// Message and fields of an event, or the fields of a span
#[derive(Debug, Clone, Default, PartialEq)]
struct LogFields {
    message: Option<String>,
    values: Map<String, Value>,
}

impl LogFields {
    fn insert(&mut self, field: &Field, value: Value) {
        if field.name() == "message" {
            self.message = Some(match value {
                Value::String(message) => message,
                other => other.to_string(),
            });
        } else {
            self.values.insert(field.name().to_string(), value);
        }
    }

    /// Take over the fields of an enclosing span that the event did not set itself
    fn inherit(&mut self, span: &LogFields) {
        for (name, value) in &span.values {
            self.values.entry(name.clone()).or_insert_with(|| value.clone());
        }
    }

    fn of_event<S, N>(ctx: &FmtContext<'_, S, N>, event: &Event<'_>) -> Self
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
        N: for<'a> FormatFields<'a> + 'static,
    {
        let mut fields = Self::default();
        event.record(&mut fields);
        if let Some(scope) = ctx.event_scope() {
            for span in scope {
                if let Some(span_fields) = span.extensions().get::<LogFields>() {
                    fields.inherit(span_fields);
                }
            }
        }
        fields
    }
}

impl Visit for LogFields {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.insert(field, Value::String(format!("{value:?}").trim_matches('"').to_string()));
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

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.insert(field, Value::String(value.to_string()));
    }
}

/// Stores the fields of each span in its extensions so events can inherit the step they run under
struct SpanFieldsLayer;

impl<S> Layer<S> for SpanFieldsLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(id) {
            let mut fields = LogFields::default();
            attrs.record(&mut fields);
            span.extensions_mut().insert(fields);
        }
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        if let Some(span) = ctx.span(id) {
            if let Some(fields) = span.extensions_mut().get_mut::<LogFields>() {
                values.record(fields);
            }
        }
    }
}

// Console output: `time | LEVEL | step | COMPONENT | message (key=value, ..)`
struct PrettyFormatter;

impl<S, N> FormatEvent<S, N> for PrettyFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(&self, ctx: &FmtContext<'_, S, N>, mut writer: Writer<'_>, event: &Event<'_>) -> std::fmt::Result {
        const DIM: &str = "\x1b[90m";
        const RESET: &str = "\x1b[0m";

        let meta = event.metadata();
        let mut fields = LogFields::of_event(ctx, event);
        let step = match fields.values.remove("step") {
            Some(Value::String(step)) => step,
            Some(other) => other.to_string(),
            None => "-".to_string(),
        };
        let level_color = match *meta.level() {
            Level::TRACE => "\x1b[90m",
            Level::DEBUG => "\x1b[34m",
            Level::INFO => "\x1b[32m",
            Level::WARN => "\x1b[33m",
            Level::ERROR => "\x1b[31m",
        };

        write!(writer, "\x1b[96m{}{RESET} {DIM}|{RESET} ", Utc::now().format("%y-%m-%d %H:%M:%S"))?;
        write!(writer, "{level_color}{:<5}{RESET} {DIM}|{RESET} ", meta.level())?;
        write!(writer, "\x1b[92m{step:<6} {:<9}{RESET} {DIM}|{RESET} ", component_name(meta.target()))?;
        write!(writer, "{}", fields.message.unwrap_or_default())?;
        if !fields.values.is_empty() {
            let rendered: Vec<String> = fields
                .values
                .iter()
                .map(|(name, value)| match value {
                    Value::String(text) => format!("{name}={text}"),
                    other => format!("{name}={other}"),
                })
                .collect();
            write!(writer, " {DIM}({}){RESET}", rendered.join(", "))?;
        }
        writeln!(writer)
    }
}

/// One JSON object per line
///
/// Migration fields sit at the top level and are always present (`null` when
/// the event and its spans do not carry them); anything else goes under `fields`.
struct JsonFormatter;

impl<S, N> FormatEvent<S, N> for JsonFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(&self, ctx: &FmtContext<'_, S, N>, mut writer: Writer<'_>, event: &Event<'_>) -> std::fmt::Result {
        let meta = event.metadata();
        let record = json_record(meta.level(), meta.target(), LogFields::of_event(ctx, event));
        let line = serde_json::to_string(&record).map_err(|_| std::fmt::Error)?;
        writeln!(writer, "{line}")
    }
}

fn json_record(level: &Level, target: &str, mut fields: LogFields) -> Value {
    let mut root = Map::new();
    root.insert("timestamp".into(), Value::String(Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)));
    root.insert("level".into(), Value::String(level.to_string()));
    root.insert("component".into(), Value::String(component_name(target).to_string()));
    root.insert("target".into(), Value::String(target.to_string()));
    root.insert("message".into(), fields.message.take().map(Value::String).unwrap_or(Value::Null));
    for name in MIGRATION_FIELDS {
        root.insert((*name).to_string(), fields.values.remove(*name).unwrap_or(Value::Null));
    }
    if !fields.values.is_empty() {
        root.insert("fields".into(), Value::Object(fields.values));
    }
    Value::Object(root)
}

/// Install the global subscriber
///
/// `LOG_FORMAT=json` selects JSON lines, anything else the console format.
/// `RUST_LOG` overrides the default filter. Also installs color_eyre for panic reports.
pub fn init_logging() {
    color_eyre::install().expect("Unable to install color_eyre");

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let fmt_layer = match LogFormat::from_env() {
        LogFormat::Json => fmt::layer().event_format(JsonFormatter).boxed(),
        LogFormat::Pretty => fmt::layer().event_format(PrettyFormatter).boxed(),
    };

    let subscriber =
        Registry::default().with(fmt_layer).with(SpanFieldsLayer).with(env_filter).with(ErrorLayer::default());
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set global default subscriber");
}

/// Short display name of the component a tracing target belongs to
fn component_name(target: &str) -> &'static str {
    let Some(path) = target.strip_prefix("migrator") else {
        return "EXTERNAL";
    };
    if path.starts_with("::migrations") {
        "STEP"
    } else if path.starts_with("::core::client::database") {
        "STORE"
    } else if path.starts_with("::core::client::lock") {
        "LOCK"
    } else if path.starts_with("::core::backup") {
        "BACKUP"
    } else if path.starts_with("::core::recovery") {
        "RECOVERY"
    } else if path.starts_with("::core::check") {
        "CHECK"
    } else if path.starts_with("::core::operator") {
        "OPERATOR"
    } else {
        "-"
    }
}
