//! Custom logging formatter with hostname prefix and no ANSI colors
//!
//! This module provides a tracing formatter that:
//! - Adds hostname prefix to each log line
//! - Removes ANSI color codes for file output
//! - Shows span hierarchy with tab indentation
//! - Includes file location and line numbers

use std::fmt;
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::TryInitError;

use crate::config::ClientConfig;

/// Event formatter with hostname prefix
pub struct HostnameFormatter {
    hostname: String,
}

impl HostnameFormatter {
    pub fn new() -> Self {
        let hostname = gethostname::gethostname()
            .to_str()
            .unwrap_or("unknown")
            .to_string();
        Self { hostname }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }
}

impl Default for HostnameFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, N> FormatEvent<S, N> for HostnameFormatter
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
        let meta = event.metadata();
        let datetime: chrono::DateTime<chrono::Utc> = std::time::SystemTime::now().into();

        write!(writer, "[{}] ", self.hostname)?;
        write!(writer, "{} ", datetime.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;
        write!(writer, "{:5} ", meta.level())?;

        // One line per span, indented by depth
        if let Some(scope) = ctx.event_scope() {
            let spans: Vec<_> = scope.from_root().collect();

            for (depth, span) in spans.iter().enumerate() {
                writeln!(writer)?;
                for _ in 0..=depth {
                    write!(writer, "\t")?;
                }

                write!(writer, "{}", span.name())?;

                let ext = span.extensions();
                if let Some(fields) = ext.get::<tracing_subscriber::fmt::FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{}}}", fields)?;
                    }
                }
            }

            writeln!(writer)?;
            for _ in 0..=spans.len() {
                write!(writer, "\t")?;
            }
        }

        write!(writer, "{}", meta.target())?;

        if let (Some(file), Some(line)) = (meta.file(), meta.line()) {
            write!(writer, ":{}:{}", file, line)?;
        }

        write!(writer, ": ")?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Initialize tracing with the hostname formatter.
///
/// `RUST_LOG` takes precedence over `level`. Fails if a global subscriber
/// is already installed.
pub fn init_with_hostname(level: &str) -> Result<(), TryInitError> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let fmt_layer = fmt::layer()
        .with_ansi(false)
        .event_format(HostnameFormatter::new())
        .with_writer(std::io::stdout);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()?;

    let hostname_os = gethostname::gethostname();
    let hostname = hostname_os.to_str().unwrap_or("unknown");
    tracing::info!("Logging initialized on host: {}", hostname);
    Ok(())
}

/// Initialize tracing at the level named in `config`
pub fn init_from_config(config: &ClientConfig) -> Result<(), TryInitError> {
    init_with_hostname(&config.log_level)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::layer::SubscriberExt;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_hostname_prefix_and_span_layout() {
        let captured = Captured::default();
        let sink = captured.clone();
        let formatter = HostnameFormatter::new();
        let hostname = formatter.hostname().to_string();

        let subscriber = tracing_subscriber::registry().with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .event_format(formatter)
                .with_writer(move || sink.clone()),
        );

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("read", offset = 4096);
            let _guard = span.enter();
            tracing::info!("chunk done");
        });

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(output.starts_with(&format!("[{}] ", hostname)));
        assert!(output.contains("\n\tread{offset=4096}\n"));
        assert!(output.contains("chunk done"));
        assert!(!output.contains('\u{1b}'));
    }
}
