//! Service configuration: data source endpoints, processing knobs, graph
//! sizes and runtime sizing, loaded from TOML.
//!
//! Each section implements `Default` so a missing file or section falls back
//! to the built-in values in [`super::defaults`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::defaults;
use crate::types::QueryType;

/// Environment variable pointing at a config file.
pub const CONFIG_ENV_VAR: &str = "RSAM_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_PATH: &str = "conf/config.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one deployment.
///
/// Load with `ServiceConfig::load()` which searches:
/// 1. `$RSAM_CONFIG` env var
/// 2. `./conf/config.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Scheduling, web server and runtime sizing
    #[serde(default)]
    pub service: ServiceSection,

    /// FDSN / SeedLink / Winston endpoints
    #[serde(default)]
    pub sources: SourcesConfig,

    /// Plotter settings
    #[serde(default)]
    pub graph: GraphConfig,

    /// DSP tuning
    #[serde(default)]
    pub processing: ProcessingConfig,
}

impl ServiceConfig {
    /// Load configuration using the standard search order:
    /// 1. `$RSAM_CONFIG` environment variable
    /// 2. `./conf/config.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded config from RSAM_CONFIG");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from RSAM_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "RSAM_CONFIG points to non-existent file, falling back");
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_PATH);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!(path = %local.display(), "Loaded config");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./conf/config.toml, using defaults");
                }
            }
        }

        info!("No conf/config.toml found, using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path.
    ///
    /// Unknown keys only warn. Values under their minimum are clamped, and
    /// impossible values fail validation.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })
    }

    /// Parse, clamp and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let mut config: Self = toml::from_str(contents)
            .map_err(|e| ConfigError::Parse(PathBuf::from("<inline>"), e))?;
        config.clamp_minimums();
        config.validate()?;
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Replace values below their documented minimum with the default.
    pub fn clamp_minimums(&mut self) {
        let s = &mut self.service;
        if s.replot_interval_minutes < defaults::REPLOT_INTERVAL_MINUTES {
            warn!(value = s.replot_interval_minutes, "replot_interval_minutes too small, using default");
            s.replot_interval_minutes = defaults::REPLOT_INTERVAL_MINUTES;
        }
        if s.service_timeout_s < defaults::SERVICE_TIMEOUT_SECS {
            warn!(value = s.service_timeout_s, "service_timeout_s too small, using default");
            s.service_timeout_s = defaults::SERVICE_TIMEOUT_SECS;
        }
        if s.thread_pool_size < defaults::MIN_THREAD_POOL_SIZE {
            warn!(value = s.thread_pool_size, "thread_pool_size too small, using default");
            s.thread_pool_size = defaults::THREAD_POOL_SIZE;
        }

        let g = &mut self.graph;
        if g.graph_width_px < defaults::MIN_GRAPH_SIDE_PX {
            warn!(value = g.graph_width_px, "graph_width_px too small, using default");
            g.graph_width_px = defaults::GRAPH_WIDTH_PX;
        }
        if g.graph_height_px < defaults::MIN_GRAPH_SIDE_PX {
            warn!(value = g.graph_height_px, "graph_height_px too small, using default");
            g.graph_height_px = defaults::GRAPH_HEIGHT_PX;
        }

        let p = &mut self.processing;
        if p.rsam_average_window_minutes < 1 {
            warn!("rsam_average_window_minutes too small, using default");
            p.rsam_average_window_minutes = defaults::RSAM_AVERAGE_WINDOW_MINUTES;
        }
        if p.zero_tolerance < 1 {
            warn!("zero_tolerance too small, using default");
            p.zero_tolerance = defaults::ZERO_TOLERANCE;
        }
    }

    /// Validate values that cannot be repaired by clamping.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        if self.service.default_query_type.parse::<QueryType>().is_err() {
            errors.push(format!(
                "service.default_query_type '{}' must be one of fdsn, seedlink, winston",
                self.service.default_query_type
            ));
        }

        for (name, port) in [
            ("service.web_port", self.service.web_port),
            ("sources.fdsn_port", self.sources.fdsn_port),
            ("sources.seedlink_port", self.sources.seedlink_port),
            ("sources.winston_port", self.sources.winston_port),
        ] {
            if port == 0 {
                errors.push(format!("{name} must be > 0"));
            }
        }

        if self.sources.fdsn_timeout_s == 0 {
            errors.push("sources.fdsn_timeout_s must be > 0".to_string());
        }
        if self.sources.winston_timeout_s == 0 {
            errors.push("sources.winston_timeout_s must be > 0".to_string());
        }

        let (range_errors, range_warnings) = super::validation::validate_endpoints(self);
        errors.extend(range_errors);
        for w in &range_warnings {
            warn!("{}", w);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// The configured default source, falling back to FDSN.
    pub fn default_query_type(&self) -> QueryType {
        self.service
            .default_query_type
            .parse()
            .unwrap_or(QueryType::Fdsn)
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Serialize(e) => write!(f, "Config serialization error: {}", e),
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Service Section
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSection {
    /// Minutes between periodic graph rounds (min 1).
    pub replot_interval_minutes: u64,
    /// `fdsn`, `seedlink` or `winston`.
    pub default_query_type: String,
    /// Deadline for web-triggered jobs (seconds, min 60).
    pub service_timeout_s: u64,
    pub web_port: u16,
    /// Runtime worker threads (min 2).
    pub thread_pool_size: usize,
    /// Root of the output tree.
    pub output_dir: PathBuf,
    /// Periodic query list.
    pub queries_file: PathBuf,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            replot_interval_minutes: defaults::REPLOT_INTERVAL_MINUTES,
            default_query_type: defaults::DEFAULT_QUERY_TYPE.to_string(),
            service_timeout_s: defaults::SERVICE_TIMEOUT_SECS,
            web_port: defaults::WEB_PORT,
            thread_pool_size: defaults::THREAD_POOL_SIZE,
            output_dir: PathBuf::from(defaults::OUTPUT_DIR),
            queries_file: PathBuf::from(defaults::QUERIES_FILE),
        }
    }
}

// ============================================================================
// Sources
// ============================================================================

/// Data source endpoints. A source with no server configured cannot be used.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub fdsn_server: Option<String>,
    pub fdsn_port: u16,
    /// Dataselect path (`/fdsnws/dataselect/1/query`) or absolute URL.
    pub fdsn_dataselect_url: Option<String>,
    pub fdsn_timeout_s: u64,
    pub seedlink_server: Option<String>,
    pub seedlink_port: u16,
    pub winston_server: Option<String>,
    pub winston_port: u16,
    pub winston_timeout_s: u64,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            fdsn_server: None,
            fdsn_port: defaults::FDSN_PORT,
            fdsn_dataselect_url: None,
            fdsn_timeout_s: defaults::FDSN_TIMEOUT_SECS,
            seedlink_server: None,
            seedlink_port: defaults::SEEDLINK_PORT,
            winston_server: None,
            winston_port: defaults::WINSTON_PORT,
            winston_timeout_s: defaults::WINSTON_TIMEOUT_SECS,
        }
    }
}

// ============================================================================
// Graph
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Width of periodic graphs (min 200).
    pub graph_width_px: u32,
    /// Height of periodic graphs (min 200).
    pub graph_height_px: u32,
    /// Directory with the `plot_png` / `plot_svg` gnuplot scripts.
    pub scripts_dir: PathBuf,
    /// Run gnuplot after the result files are written.
    pub enabled: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            graph_width_px: defaults::GRAPH_WIDTH_PX,
            graph_height_px: defaults::GRAPH_HEIGHT_PX,
            scripts_dir: PathBuf::from(defaults::SCRIPTS_DIR),
            enabled: true,
        }
    }
}

// ============================================================================
// Processing
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// RSAM averaging window for downstream consumers (minutes, min 1).
    pub rsam_average_window_minutes: u32,
    /// Consecutive zeros that mark a bin as a gap (min 1).
    pub zero_tolerance: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            rsam_average_window_minutes: defaults::RSAM_AVERAGE_WINDOW_MINUTES,
            zero_tolerance: defaults::ZERO_TOLERANCE,
        }
    }
}
