/*!
 * Logging and tracing initialization
 *
 * Human-readable lines on stdout by default; one JSON object per event,
 * appended to `[logging] file`, when a file is configured. `RUST_LOG`
 * overrides the configured level.
 */

use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogSettings;
use crate::error::{ControllerError, Result};

/// Crates whose events are shown at the configured level
const LOGGED_CRATES: [&str; 3] = ["lattice", "lattice_connect", "lattice_core_interface"];

/// Level actually used for a set of log settings (`verbose` forces DEBUG)
pub fn effective_level(settings: &LogSettings) -> Level {
    if settings.verbose {
        Level::DEBUG
    } else {
        settings.level.to_tracing_level()
    }
}

/// `EnvFilter` directive enabling `level` for the controller's own crates
pub fn filter_directive(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    LOGGED_CRATES
        .iter()
        .map(|krate| format!("{}={}", krate, level))
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the global subscriber described by `settings`
///
/// Fails if the log file cannot be opened or a subscriber is already set.
pub fn init_logging(settings: &LogSettings) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(filter_directive(effective_level(settings)))
            .map_err(|e| ControllerError::Config(format!("bad log filter: {}", e)))?,
    };

    let (to_file, to_stdout) = match settings.file {
        Some(ref path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| {
                    ControllerError::Config(format!(
                        "cannot open log file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
            let layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(Mutex::new(file));
            (Some(layer), None)
        }
        None => (None, Some(fmt::layer().compact())),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(to_file)
        .with(to_stdout)
        .try_init()
        .map_err(|e| ControllerError::Config(format!("logging already initialized: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;
    use tempfile::tempdir;

    #[test]
    fn test_verbose_overrides_log_level() {
        let settings = LogSettings {
            level: LogLevel::Error,
            file: None,
            verbose: true,
        };
        assert_eq!(effective_level(&settings), Level::DEBUG);
    }

    #[test]
    fn test_configured_level_used() {
        let settings = LogSettings {
            level: LogLevel::Warn,
            ..Default::default()
        };
        assert_eq!(effective_level(&settings), Level::WARN);
    }

    #[test]
    fn test_filter_directive_covers_workspace_crates() {
        assert_eq!(
            filter_directive(Level::TRACE),
            "lattice=trace,lattice_connect=trace,lattice_core_interface=trace"
        );
        assert!(EnvFilter::try_new(filter_directive(Level::WARN)).is_ok());
    }

    #[test]
    fn test_unopenable_log_file_is_config_error() {
        let dir = tempdir().unwrap();
        let settings = LogSettings {
            file: Some(dir.path().join("missing").join("lattice.log")),
            ..Default::default()
        };
        assert!(matches!(
            init_logging(&settings),
            Err(ControllerError::Config(_))
        ));
    }
}
