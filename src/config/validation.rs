//! Config validation: unknown-key detection with Levenshtein suggestions
//! and endpoint sanity checks.
//!
//! The raw TOML is first walked as a `toml::Value` tree and compared against
//! the known key set, so typos produce "did you mean?" warnings instead of
//! being silently ignored by serde. Warnings never break existing configs.

use std::collections::HashSet;

use super::ServiceConfig;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Returns the complete set of valid dotted key paths for `ServiceConfig`.
///
/// Kept in step with the structs in service_config.rs.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [service]
        "service",
        "service.replot_interval_minutes",
        "service.default_query_type",
        "service.service_timeout_s",
        "service.web_port",
        "service.thread_pool_size",
        "service.output_dir",
        "service.queries_file",
        // [sources]
        "sources",
        "sources.fdsn_server",
        "sources.fdsn_port",
        "sources.fdsn_dataselect_url",
        "sources.fdsn_timeout_s",
        "sources.seedlink_server",
        "sources.seedlink_port",
        "sources.winston_server",
        "sources.winston_port",
        "sources.winston_timeout_s",
        // [graph]
        "graph",
        "graph.graph_width_px",
        "graph.graph_height_px",
        "graph.scripts_dir",
        "graph.enabled",
        // [processing]
        "processing",
        "processing.rsam_average_window_minutes",
        "processing.zero_tolerance",
    ];
    keys.iter().copied().collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// For example, a table `{ a = { b = 1, c = 2 } }` yields:
/// `["a", "a.b", "a.c"]`
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Suggest the closest known key for an unknown key, if within edit distance 3.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|k| (*k, levenshtein(unknown, k)))
        .filter(|(_, d)| *d <= 3)
        .min_by(|(ka, da), (kb, db)| da.cmp(db).then_with(|| ka.cmp(kb)))
        .map(|(k, _)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let value: toml::Value = match raw_toml.parse() {
        Ok(v) => v,
        // parse errors are reported by serde later
        Err(_) => return Vec::new(),
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

// ============================================================================
// Endpoint Validation
// ============================================================================

/// Check source endpoints for values that cannot work.
///
/// Returns (errors, warnings). A source without a server is only a warning
/// because deployments usually serve a single source type.
pub fn validate_endpoints(config: &ServiceConfig) -> (Vec<String>, Vec<ValidationWarning>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let s = &config.sources;

    for (field, server) in [
        ("sources.fdsn_server", &s.fdsn_server),
        ("sources.seedlink_server", &s.seedlink_server),
        ("sources.winston_server", &s.winston_server),
    ] {
        if let Some(host) = server {
            if host.trim().is_empty() || host.contains(char::is_whitespace) {
                errors.push(format!("{field} = '{host}' is not a valid host name"));
            }
        }
    }

    let default_field = match config.service.default_query_type.as_str() {
        "fdsn" => Some(("sources.fdsn_server", &s.fdsn_server)),
        "seedlink" => Some(("sources.seedlink_server", &s.seedlink_server)),
        "winston" => Some(("sources.winston_server", &s.winston_server)),
        _ => None,
    };
    if let Some((field, None)) = default_field {
        warnings.push(ValidationWarning {
            field: field.to_string(),
            message: format!(
                "{field} is not set but '{}' is the default query type",
                config.service.default_query_type
            ),
            suggestion: None,
        });
    }

    if let Some(url) = &s.fdsn_dataselect_url {
        if !url.starts_with('/') && !url.starts_with("http://") && !url.starts_with("https://") {
            errors.push(format!(
                "sources.fdsn_dataselect_url = '{url}' must be a path starting with '/' or an http(s) URL"
            ));
        }
    }

    (errors, warnings)
}

// ============================================================================
// Tests
// ============================================================================
