use std::fmt;
use std::fs::OpenOptions;
use std::sync::Mutex;

use camino::Utf8Path;
use tracing::{Event, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::error::ProvisionError;

/// `[2024-05-01 12:00:00] INFO: message`
pub struct LogLineFormat;

impl<S, N> FormatEvent<S, N> for LogLineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        write!(writer, "[{timestamp}] {}: ", event.metadata().level())?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Console output goes to stderr filtered by `RUST_LOG` (default `info`);
/// when `log_file` is given, info-and-above lines are also appended there.
pub fn init(log_file: Option<&Utf8Path>) -> Result<(), ProvisionError> {
    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent.as_std_path())
                    .map_err(|err| ProvisionError::Logging(format!("create {parent}: {err}")))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path.as_std_path())
                .map_err(|err| ProvisionError::Logging(format!("open {path}: {err}")))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .event_format(LogLineFormat)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(LevelFilter::INFO),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|err| ProvisionError::Logging(err.to_string()))
}
