use crate::error::RelayError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Logging configuration for the relay
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Whether to include thread names in logs
    pub include_thread_names: bool,

    /// Whether to include file and line number information
    pub include_file_info: bool,

    /// Whether to enable colored output
    pub enable_colors: bool,

    /// Log file path (optional, if None logs only to stdout)
    pub log_file: Option<String>,

    /// Module-specific log levels
    pub module_levels: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let mut module_levels = HashMap::new();

        module_levels.insert("hyper".to_string(), "warn".to_string());
        module_levels.insert("reqwest".to_string(), "warn".to_string());
        module_levels.insert("tower_http".to_string(), "info".to_string());

        Self {
            level: "info".to_string(),
            include_thread_names: false,
            include_file_info: false,
            enable_colors: true,
            log_file: None,
            module_levels,
        }
    }
}

impl LoggingConfig {
    fn env_filter(&self) -> Result<EnvFilter, RelayError> {
        if !levels::is_valid_level(&self.level) {
            return Err(RelayError::Configuration(format!(
                "Invalid log level: {}",
                self.level
            )));
        }

        let mut filter = EnvFilter::new(&self.level);
        for (module, level) in &self.module_levels {
            let directive = format!("{}={}", module, level);
            filter = filter.add_directive(directive.parse().map_err(|e| {
                RelayError::Configuration(format!("Invalid log directive {}: {}", directive, e))
            })?);
        }
        Ok(filter)
    }
}

/// Initialize logging based on the provided configuration.
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init_logging(config: &LoggingConfig) -> Result<(), RelayError> {
    let filter = config.env_filter()?;

    let stdout_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(config.include_thread_names)
        .with_file(config.include_file_info)
        .with_line_number(config.include_file_info)
        .with_ansi(config.enable_colors);

    let file_layer = match &config.log_file {
        Some(path) => Some(
            fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(create_file_appender(path)?)
                .boxed(),
        ),
        None => None,
    };

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init();

    match result {
        Ok(_) => tracing::info!("Logging initialized with level: {}", config.level),
        Err(_) => tracing::debug!("Logging already initialized, skipping"),
    }

    Ok(())
}

/// Create a daily rolling file appender for `log_file`.
fn create_file_appender(
    log_file: &str,
) -> Result<tracing_appender::rolling::RollingFileAppender, RelayError> {
    use std::path::Path;
    use tracing_appender::rolling::{RollingFileAppender, Rotation};

    let log_path = Path::new(log_file);
    let directory = match log_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let filename = log_path
        .file_name()
        .ok_or_else(|| RelayError::Configuration("Invalid log file name".to_string()))?
        .to_string_lossy();

    std::fs::create_dir_all(directory).map_err(|e| {
        RelayError::Configuration(format!("Failed to create log directory: {}", e))
    })?;

    Ok(RollingFileAppender::new(
        Rotation::DAILY,
        directory,
        filename.as_ref(),
    ))
}

/// Log level utilities
pub mod levels {
    /// Check if a log level string is valid
    pub fn is_valid_level(level: &str) -> bool {
        matches!(
            level.to_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        )
    }
}
