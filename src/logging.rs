use std::fmt;
use std::path::PathBuf;
use std::sync::Once;

use tracing::{Event, Level, Subscriber};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{
    filter::EnvFilter,
    fmt::{
        format::{self, FormatEvent, FormatFields},
        FmtContext, FormattedFields,
    },
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    Layer,
};

// Log targets
pub const PDF_OPERATIONS: &str = "pdf_ops";
pub const PDF_STATE: &str = "pdf_state";
pub const PDF_RESOURCES: &str = "pdf_resources";
pub const PDF_REWRITE: &str = "pdf_rewrite";
pub const PDF_SHAPES: &str = "pdf_shapes";

static INIT: Once = Once::new();

const OPERATION_TARGETS: &[&str] = &[PDF_OPERATIONS, PDF_STATE, PDF_REWRITE, PDF_SHAPES];

/// One line per operator event: `LEVEL target [span fields] message fields`.
struct OperatorFormatter;

impl<S, N> FormatEvent<S, N> for OperatorFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        write!(&mut writer, "{} {}: ", metadata.level(), metadata.target())?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "[{}] ", fields)?;
                    }
                }
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

fn operation_filter(debug_ops: bool) -> EnvFilter {
    let level = if debug_ops { "trace" } else { "info" };
    let directives = OPERATION_TARGETS
        .iter()
        .map(|t| format!("{t}={level}"))
        .collect::<Vec<_>>()
        .join(",");
    EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("info"))
}

fn stderr_filter() -> EnvFilter {
    EnvFilter::from_default_env().add_directive(Level::WARN.into())
}

/// Logs to stderr, filtered by `RUST_LOG`; `debug_ops` enables per-operator traces.
///
/// Only the first call in a process installs a subscriber and returns the
/// writer's guard. Later calls leave the installed subscriber alone and
/// return `None`.
pub fn init_logging(debug_ops: bool) -> Option<WorkerGuard> {
    let mut guard = None;
    INIT.call_once(|| {
        let (writer, worker) = tracing_appender::non_blocking(std::io::stderr());

        let mut filter = stderr_filter();
        if debug_ops {
            for target in OPERATION_TARGETS {
                if let Ok(directive) = format!("{target}=trace").parse() {
                    filter = filter.add_directive(directive);
                }
            }
        }

        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_target(true)
                    .with_filter(filter),
            )
            .init();
        guard = Some(worker);
    });
    guard
}

/// Like [`init_logging`], plus an operator trace file `pdf-ops.log` in `log_dir`.
///
/// `Ok(None)` means logging was already initialized and nothing was installed.
pub fn init_logging_with_dir(
    debug_ops: bool,
    log_dir: PathBuf,
) -> std::io::Result<Option<WorkerGuard>> {
    std::fs::create_dir_all(&log_dir)?;

    let mut guard = None;
    INIT.call_once(|| {
        let file_appender = RollingFileAppender::new(Rotation::NEVER, log_dir, "pdf-ops.log");
        let (writer, worker) = tracing_appender::non_blocking(file_appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .event_format(OperatorFormatter)
            .with_writer(writer)
            .with_filter(operation_filter(debug_ops));

        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_filter(stderr_filter());

        tracing_subscriber::registry()
            .with(file_layer)
            .with(stderr_layer)
            .init();
        guard = Some(worker);
    });
    Ok(guard)
}
