use crate::error::{CliError, Result};
use std::fs::File;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{
    filter::LevelFilter,
    fmt::{self},
    prelude::*,
};

/// Maps the `-v` count and the `-q` flag to the console level.
pub fn level_filter(verbosity: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::OFF;
    }
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Installs the global subscriber: a compact stderr layer filtered by
/// verbosity and, when requested, a plain-text file layer with span context.
pub fn setup_logging(verbosity: u8, quiet: bool, log_file: Option<&Path>) -> Result<()> {
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(false)
        .compact()
        .with_filter(level_filter(verbosity, quiet));

    let file_layer = match log_file {
        Some(path) => {
            let file = File::create(path).map_err(CliError::Io)?;
            Some(
                fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_target(true)
                    .with_filter(LevelFilter::DEBUG),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| CliError::Other(anyhow::anyhow!("Failed to install the logger: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tracing::{debug, info, info_span};

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(level_filter(0, false), LevelFilter::WARN);
        assert_eq!(level_filter(1, false), LevelFilter::INFO);
        assert_eq!(level_filter(2, false), LevelFilter::DEBUG);
        assert_eq!(level_filter(7, false), LevelFilter::TRACE);
        assert_eq!(level_filter(3, true), LevelFilter::OFF);
    }

    #[test]
    #[serial]
    fn file_layer_records_spans_and_fields() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log_path = temp_dir.path().join("run.log");

        let file = File::create(&log_path).unwrap();
        let file_layer = fmt::layer().with_writer(Mutex::new(file)).with_ansi(false);
        let subscriber = tracing_subscriber::registry().with(file_layer);

        tracing::subscriber::with_default(subscriber, || {
            let _span = info_span!("optimization_workflow").entered();
            debug!(log_likelihood = -1234.5, "Numerical optimization finished.");
            info!("Topology search complete.");
        });

        let content = std::fs::read_to_string(log_path).unwrap();
        assert!(content.contains("optimization_workflow"));
        assert!(content.contains("log_likelihood=-1234.5"));
        assert!(content.contains("DEBUG"));
    }

    #[test]
    #[serial]
    fn invalid_log_file_path_propagates_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened as a log file.
        let result = setup_logging(0, false, Some(temp_dir.path()));
        assert!(matches!(result, Err(CliError::Io(_))));
    }
}
