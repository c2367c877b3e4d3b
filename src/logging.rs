use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info,rumqttc=warn";

/// Resolves the filter: `RUST_LOG` wins, then `fallback`, then `info`.
pub fn build_filter(fallback: Option<&str>) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| match fallback {
            Some(directive) if !directive.trim().is_empty() => EnvFilter::try_new(directive),
            _ => EnvFilter::try_new(DEFAULT_FILTER),
        })
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Human-readable logs on stdout for the Supervisor log view. With `log_dir`, a
/// JSON copy also goes to a daily rotated file; keep the guard alive until exit.
pub fn init_logging(log_dir: Option<&Path>, fallback_filter: Option<&str>) -> Option<WorkerGuard> {
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let file_appender = rolling::daily(dir, "k1max-ws-bridge.log");
            let (writer, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .json();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(build_filter(fallback_filter))
        .with(file_layer)
        .with(stdout_layer)
        .init();

    guard
}

