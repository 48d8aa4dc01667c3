//! Query: channel identity, time range and DSP parameters for one job.
//!
//! A `Query` is built from a [`QueryRequest`] (JSON), from CLI flags or in
//! code. It is mutated exactly once, when the data source reports the
//! stream [`Metadata`]; after that it is shared read-only.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use crate::config::defaults;

pub const MILLIS_PER_DAY: i64 = 86_400_000;

// ============================================================================
// Enums
// ============================================================================

/// Which upstream service a query is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Fdsn,
    Seedlink,
    Winston,
}

impl QueryType {
    /// FDSN and SeedLink deliver miniSEED records; Winston delivers samples.
    pub fn needs_decompression(self) -> bool {
        matches!(self, Self::Fdsn | Self::Seedlink)
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fdsn => write!(f, "fdsn"),
            Self::Seedlink => write!(f, "seedlink"),
            Self::Winston => write!(f, "winston"),
        }
    }
}

impl FromStr for QueryType {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fdsn" => Ok(Self::Fdsn),
            "seedlink" => Ok(Self::Seedlink),
            "winston" => Ok(Self::Winston),
            other => Err(QueryError::UnknownType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowFunction {
    Uniform,
    Hann,
}

impl WindowFunction {
    /// Case-insensitive; anything other than `uniform` selects Hann.
    pub fn from_name(name: &str) -> Self {
        if name.trim().eq_ignore_ascii_case("uniform") {
            Self::Uniform
        } else {
            Self::Hann
        }
    }
}

impl fmt::Display for WindowFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uniform => write!(f, "uniform"),
            Self::Hann => write!(f, "hann"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphFormat {
    Png,
    Svg,
}

impl GraphFormat {
    /// Case-insensitive; unknown names fall back to PNG.
    pub fn from_name(name: &str) -> Self {
        if name.trim().eq_ignore_ascii_case("svg") {
            Self::Svg
        } else {
            Self::Png
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Svg => "svg",
        }
    }
}

// ============================================================================
// Metadata
// ============================================================================

/// Stream properties reported by the data source with its first unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Samples per second, always >= 1.
    pub sps: u32,
    /// Epoch milliseconds of the first sample.
    pub start_ms: i64,
}

impl Metadata {
    pub fn new(sps: u32, start_ms: i64) -> Self {
        Self {
            sps: sps.max(1),
            start_ms,
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("unknown query type '{0}'")]
    UnknownType(String),

    #[error("{0} must not be blank")]
    Blank(&'static str),

    #[error("{0} must not contain wildcards")]
    Wildcard(&'static str),

    #[error("'to' must be after 'from'")]
    EmptyRange,

    #[error("window size {0} is not a positive power of two")]
    WindowSize(usize),

    #[error("cutoff frequency must be positive")]
    Cutoff,

    #[error("response factor must be positive")]
    ResponseFactor,

    #[error("invalid date '{0}', expected yyyy-MM-dd")]
    Date(String),

    #[error("invalid time '{0}', expected HH:mm")]
    Time(String),
}

// ============================================================================
// Query
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Query {
    pub network: String,
    pub station: String,
    pub component: String,
    pub location: String,
    /// Inclusive start, epoch milliseconds.
    pub from_ms: i64,
    /// Exclusive end, epoch milliseconds.
    pub to_ms: i64,
    pub source_type: QueryType,
    pub window_size: usize,
    pub window_function: WindowFunction,
    pub cutoff_hz: u32,
    pub response_factor: f64,
    pub max_power: u32,
    pub web_query: bool,
    pub graph_format: GraphFormat,
    pub graph_width: u32,
    pub graph_height: u32,
    metadata: Option<Metadata>,
}

impl Query {
    /// A query for the UTC day containing `now`, with default parameters.
    pub fn new(
        network: impl Into<String>,
        station: impl Into<String>,
        component: impl Into<String>,
        location: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let from_ms = start_of_day_ms(now);
        Self {
            network: network.into(),
            station: station.into(),
            component: component.into(),
            location: location.into(),
            from_ms,
            to_ms: from_ms + MILLIS_PER_DAY,
            source_type: QueryType::Fdsn,
            window_size: defaults::WINDOW_SIZE,
            window_function: WindowFunction::Hann,
            cutoff_hz: defaults::CUTOFF_FREQUENCY_HZ,
            response_factor: defaults::RESPONSE_FACTOR,
            max_power: defaults::MAX_POWER_DB,
            web_query: false,
            graph_format: GraphFormat::Png,
            graph_width: defaults::WEB_GRAPH_WIDTH_PX,
            graph_height: defaults::WEB_GRAPH_HEIGHT_PX,
            metadata: None,
        }
    }

    pub fn with_range(mut self, from_ms: i64, to_ms: i64) -> Self {
        self.from_ms = from_ms;
        self.to_ms = to_ms;
        self
    }

    pub fn with_source(mut self, source_type: QueryType) -> Self {
        self.source_type = source_type;
        self
    }

    pub fn with_window(mut self, window_size: usize, window_function: WindowFunction) -> Self {
        self.window_size = window_size;
        self.window_function = window_function;
        self
    }

    pub fn with_cutoff(mut self, cutoff_hz: u32) -> Self {
        self.cutoff_hz = cutoff_hz;
        self
    }

    /// Widen an empty or inverted range to one day from `from`.
    pub fn widen_empty_range(&mut self) {
        if self.to_ms <= self.from_ms {
            self.to_ms = self.from_ms + MILLIS_PER_DAY;
        }
    }

    // ------------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------------

    /// Record the stream metadata and clamp the cutoff to Nyquist.
    pub fn set_metadata(&mut self, metadata: Metadata) {
        let nyquist = metadata.sps / 2;
        if self.cutoff_hz > nyquist {
            tracing::debug!(
                query = %self.id(),
                cutoff_hz = self.cutoff_hz,
                nyquist,
                "Clamping cutoff frequency to Nyquist"
            );
            self.cutoff_hz = nyquist;
        }
        self.metadata = Some(metadata);
    }

    pub fn metadata(&self) -> Option<Metadata> {
        self.metadata
    }

    /// Number of FFT bins kept: `cutoff * window_size / sps`.
    pub fn cutoff_window(&self) -> Option<usize> {
        let m = self.metadata?;
        Some(self.cutoff_hz as usize * self.window_size / m.sps as usize)
    }

    /// Milliseconds between two output rows.
    pub fn timestep_ms(&self) -> Option<i64> {
        let m = self.metadata?;
        let step = 1000.0 * self.averaging_factor() as f64 * self.window_size as f64
            / f64::from(m.sps);
        Some(step.round() as i64)
    }

    /// Hz per FFT bin.
    pub fn frequency_resolution(&self) -> Option<f64> {
        let m = self.metadata?;
        Some(f64::from(m.sps) / self.window_size as f64)
    }

    // ------------------------------------------------------------------------
    // Range
    // ------------------------------------------------------------------------

    /// Whole days in `[from, to)`, truncated.
    pub fn duration_in_days(&self) -> i64 {
        (self.to_ms - self.from_ms) / MILLIS_PER_DAY
    }

    /// Consecutive bin results collapsed into one output row.
    pub fn averaging_factor(&self) -> usize {
        usize::try_from(self.duration_in_days()).map_or(1, |d| d.max(1))
    }

    /// Whether the range ends in the future (an open-ended live request).
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.to_ms > now.timestamp_millis()
    }

    // ------------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------------

    pub fn validate(&self) -> Result<(), QueryError> {
        for (name, value) in [
            ("N", &self.network),
            ("S", &self.station),
            ("C", &self.component),
        ] {
            if value.trim().is_empty() {
                return Err(QueryError::Blank(name));
            }
            if has_wildcard(value) {
                return Err(QueryError::Wildcard(name));
            }
        }
        if !self.location.trim().is_empty() && has_wildcard(&self.location) {
            return Err(QueryError::Wildcard("L"));
        }
        if self.to_ms <= self.from_ms {
            return Err(QueryError::EmptyRange);
        }
        if self.window_size == 0 || !self.window_size.is_power_of_two() {
            return Err(QueryError::WindowSize(self.window_size));
        }
        if self.cutoff_hz == 0 {
            return Err(QueryError::Cutoff);
        }
        if !(self.response_factor > 0.0) {
            return Err(QueryError::ResponseFactor);
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    // ------------------------------------------------------------------------
    // Naming
    // ------------------------------------------------------------------------

    fn has_location(&self) -> bool {
        !self.location.trim().is_empty()
    }

    /// `N_S_C[_L]`
    pub fn nscl(&self) -> String {
        self.join_nscl("_")
    }

    /// `N S C[ L]`
    pub fn nscl_pretty(&self) -> String {
        self.join_nscl(" ")
    }

    fn join_nscl(&self, sep: &str) -> String {
        let mut s = [
            self.network.as_str(),
            self.station.as_str(),
            self.component.as_str(),
        ]
        .join(sep);
        if self.has_location() {
            s.push_str(sep);
            s.push_str(&self.location);
        }
        s
    }

    /// Log identifier: `NSCL@yyyy-MM-ddTHH:mm`.
    pub fn id(&self) -> String {
        format!("{}@{}", self.nscl(), format_ms(self.from_ms, "%Y-%m-%dT%H:%M"))
    }

    pub fn from_date(&self) -> String {
        format_ms(self.from_ms, "%Y-%m-%d")
    }

    pub fn to_date(&self) -> String {
        format_ms(self.to_ms, "%Y-%m-%d")
    }

    fn artifact_name(&self, suffix: &str) -> String {
        format!("{} {} {}", self.nscl_pretty(), self.from_date(), suffix)
    }

    pub fn rsam_file_name(&self) -> String {
        self.artifact_name("rsam.csv")
    }

    pub fn ssam_file_name(&self) -> String {
        self.artifact_name("ssam.csv")
    }

    pub fn average_ssam_file_name(&self) -> String {
        self.artifact_name("average_ssam.csv")
    }

    pub fn max_freqs_file_name(&self) -> String {
        self.artifact_name("max_freqs.csv")
    }

    /// Main graph; multi-day graphs also carry the end date.
    pub fn graph_file_name(&self) -> String {
        let mut name = format!("{} {}", self.nscl_pretty(), self.from_date());
        if self.duration_in_days() > 1 {
            name.push(' ');
            name.push_str(&self.to_date());
            name.push(' ');
        }
        format!("{name}.{}", self.graph_format.extension())
    }

    pub fn max_freqs_graph_file_name(&self) -> String {
        format!(
            "{} {} maxfreqs.{}",
            self.nscl_pretty(),
            self.from_date(),
            self.graph_format.extension()
        )
    }

    pub fn graph_title(&self) -> String {
        let mut title = format!("{}  |  ", self.nscl_pretty());
        if let Some(m) = self.metadata {
            title.push_str(&format!("{} Hz  |  ", m.sps));
        }
        title.push_str(&self.from_date());
        if self.duration_in_days() > 1 {
            title.push_str("  -  ");
            title.push_str(&self.to_date());
        }
        title.push_str("  UTC");
        title
    }

    /// Directory this job writes into, below `root`.
    pub fn output_dir(&self, root: &Path) -> PathBuf {
        if self.web_query {
            root.join(defaults::WEB_OUTPUT_SUBDIR)
                .join(self.nscl_pretty())
                .join(self.from_date())
        } else {
            root.join(format_ms(self.from_ms, "%Y/%m/%d"))
        }
    }

    pub fn needs_decompression(&self) -> bool {
        self.source_type.needs_decompression()
    }
}

fn has_wildcard(s: &str) -> bool {
    s.contains('*') || s.contains('?')
}

/// Midnight UTC of the day containing `t`, as epoch milliseconds.
pub fn start_of_day_ms(t: DateTime<Utc>) -> i64 {
    t.date_naive()
        .and_time(NaiveTime::MIN)
        .and_utc()
        .timestamp_millis()
}

/// Format epoch milliseconds in UTC with a chrono pattern.
pub fn format_ms(ms: i64, pattern: &str) -> String {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(t) => t.format(pattern).to_string(),
        None => ms.to_string(),
    }
}

// ============================================================================
// QueryRequest (JSON)
// ============================================================================

/// JSON shape of a query, as sent to the API or listed in `queries.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryRequest {
    #[serde(rename = "N")]
    pub network: String,
    #[serde(rename = "S")]
    pub station: String,
    #[serde(rename = "C")]
    pub component: String,
    #[serde(rename = "L", default)]
    pub location: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub query_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cutoff: Option<u32>,
    #[serde(rename = "maxPower", default, skip_serializing_if = "Option::is_none")]
    pub max_power: Option<u32>,
    #[serde(rename = "webQuery", default, skip_serializing_if = "Option::is_none")]
    pub web_query: Option<bool>,
    /// `yyyy-MM-dd`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// `yyyy-MM-dd`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// `HH:mm`
    #[serde(rename = "fromTime", default, skip_serializing_if = "Option::is_none")]
    pub from_time: Option<String>,
    /// `HH:mm`
    #[serde(rename = "toTime", default, skip_serializing_if = "Option::is_none")]
    pub to_time: Option<String>,
    #[serde(rename = "graphFormat", default, skip_serializing_if = "Option::is_none")]
    pub graph_format: Option<String>,
    #[serde(rename = "graphWidth", default, skip_serializing_if = "Option::is_none")]
    pub graph_width: Option<u32>,
    #[serde(rename = "graphHeight", default, skip_serializing_if = "Option::is_none")]
    pub graph_height: Option<u32>,
    #[serde(rename = "windowSize", default, skip_serializing_if = "Option::is_none")]
    pub window_size: Option<usize>,
    #[serde(rename = "windowFunction", default, skip_serializing_if = "Option::is_none")]
    pub window_function: Option<String>,
    #[serde(rename = "responseFactor", default, skip_serializing_if = "Option::is_none")]
    pub response_factor: Option<f64>,
}

impl QueryRequest {
    /// Build a [`Query`]. The range defaults to the UTC day of `now` unless
    /// both `from` and `to` are given; times apply only when both are given.
    pub fn into_query(self, default_type: QueryType, now: DateTime<Utc>) -> Result<Query, QueryError> {
        let mut query = Query::new(
            self.network,
            self.station,
            self.component,
            self.location,
            now,
        );

        query.source_type = match self.query_type.as_deref() {
            Some(t) => t.parse()?,
            None => default_type,
        };

        if let Some(cutoff) = self.cutoff {
            query.cutoff_hz = cutoff;
        }
        if let Some(max_power) = self.max_power {
            query.max_power = max_power;
        }
        if let Some(web) = self.web_query {
            query.web_query = web;
        }

        if let (Some(from), Some(to)) = (self.from.as_deref(), self.to.as_deref()) {
            let (from_time, to_time) = match (self.from_time.as_deref(), self.to_time.as_deref()) {
                (Some(ft), Some(tt)) => (Some(ft), Some(tt)),
                _ => (None, None),
            };
            query.from_ms = parse_date_time_ms(from, from_time)?;
            query.to_ms = parse_date_time_ms(to, to_time)?;
        }

        if let Some(format) = self.graph_format.as_deref() {
            query.graph_format = GraphFormat::from_name(format);
        }
        if let (Some(w), Some(h)) = (self.graph_width, self.graph_height) {
            query.graph_width = w;
            query.graph_height = h;
        }
        if let Some(size) = self.window_size {
            query.window_size = size;
        }
        if let Some(name) = self.window_function.as_deref() {
            query.window_function = WindowFunction::from_name(name);
        }
        if let Some(factor) = self.response_factor {
            query.response_factor = factor;
        }

        Ok(query)
    }
}

/// `yyyy-MM-dd` plus optional `HH:mm`, interpreted as UTC.
pub fn parse_date_time_ms(date: &str, time: Option<&str>) -> Result<i64, QueryError> {
    let day = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|_| QueryError::Date(date.to_string()))?;
    let time = match time {
        Some(t) => NaiveTime::parse_from_str(t.trim(), "%H:%M")
            .map_err(|_| QueryError::Time(t.to_string()))?,
        None => NaiveTime::MIN,
    };
    Ok(day.and_time(time).and_utc().timestamp_millis())
}

/// `now - 1 day .. now`, used by the midnight periodic round.
pub fn previous_day_range(now: DateTime<Utc>) -> (i64, i64) {
    let to = now.timestamp_millis();
    let from = (now - Duration::days(1)).timestamp_millis();
    (from, to)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noon(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    fn query() -> Query {
        Query::new("NZ", "WIZ", "HHZ", "10", noon(2024, 3, 5))
    }

    #[test]
    fn test_default_range_is_utc_day_of_now() {
        let q = query();
        assert_eq!(q.from_ms, parse_date_time_ms("2024-03-05", None).unwrap());
        assert_eq!(q.to_ms - q.from_ms, MILLIS_PER_DAY);
        assert_eq!(q.averaging_factor(), 1);
    }

    #[test]
    fn test_nscl_naming_with_and_without_location() {
        let q = query();
        assert_eq!(q.nscl(), "NZ_WIZ_HHZ_10");
        assert_eq!(q.nscl_pretty(), "NZ WIZ HHZ 10");

        let q = Query::new("NZ", "WIZ", "HHZ", "  ", noon(2024, 3, 5));
        assert_eq!(q.nscl(), "NZ_WIZ_HHZ");
        assert_eq!(q.nscl_pretty(), "NZ WIZ HHZ");
    }

    #[test]
    fn test_file_names_and_id() {
        let q = query();
        assert_eq!(q.rsam_file_name(), "NZ WIZ HHZ 10 2024-03-05 rsam.csv");
        assert_eq!(q.ssam_file_name(), "NZ WIZ HHZ 10 2024-03-05 ssam.csv");
        assert_eq!(q.average_ssam_file_name(), "NZ WIZ HHZ 10 2024-03-05 average_ssam.csv");
        assert_eq!(q.max_freqs_file_name(), "NZ WIZ HHZ 10 2024-03-05 max_freqs.csv");
        assert_eq!(q.graph_file_name(), "NZ WIZ HHZ 10 2024-03-05.png");
        assert_eq!(q.max_freqs_graph_file_name(), "NZ WIZ HHZ 10 2024-03-05 maxfreqs.png");
        assert_eq!(q.id(), "NZ_WIZ_HHZ_10@2024-03-05T00:00");
    }

    #[test]
    fn test_multi_day_graph_name_and_title() {
        let from = parse_date_time_ms("2024-03-01", None).unwrap();
        let to = parse_date_time_ms("2024-03-04", None).unwrap();
        let mut q = query().with_range(from, to);
        q.graph_format = GraphFormat::Svg;
        q.set_metadata(Metadata::new(100, from));

        assert_eq!(q.averaging_factor(), 3);
        assert_eq!(q.graph_file_name(), "NZ WIZ HHZ 10 2024-03-01 2024-03-04 .svg");
        assert_eq!(
            q.graph_title(),
            "NZ WIZ HHZ 10  |  100 Hz  |  2024-03-01  -  2024-03-04  UTC"
        );
    }

    #[test]
    fn test_output_dir_layout() {
        let mut q = query();
        let root = Path::new("output");
        assert_eq!(q.output_dir(root), PathBuf::from("output/2024/03/05"));
        q.web_query = true;
        assert_eq!(
            q.output_dir(root),
            PathBuf::from("output/web/NZ WIZ HHZ 10/2024-03-05")
        );
    }

    #[test]
    fn test_cutoff_clamped_to_nyquist() {
        let mut q = query().with_cutoff(80);
        assert_eq!(q.cutoff_window(), None);
        q.set_metadata(Metadata::new(100, q.from_ms));
        assert_eq!(q.cutoff_hz, 50);
        assert_eq!(q.cutoff_window(), Some(50 * 4096 / 100));
    }

    #[test]
    fn test_timestep_rounding() {
        let mut q = query();
        q.set_metadata(Metadata::new(100, q.from_ms));
        // 1000 * 4096 / 100 = 40960
        assert_eq!(q.timestep_ms(), Some(40_960));

        let mut q = query();
        q.set_metadata(Metadata::new(3, q.from_ms));
        // 1000 * 4096 / 3 = 1365333.33
        assert_eq!(q.timestep_ms(), Some(1_365_333));
    }

    #[test]
    fn test_validation_rules() {
        assert!(query().is_valid());

        let mut q = query();
        q.station = " ".to_string();
        assert_eq!(q.validate(), Err(QueryError::Blank("S")));

        let mut q = query();
        q.component = "HH?".to_string();
        assert_eq!(q.validate(), Err(QueryError::Wildcard("C")));

        let mut q = query();
        q.location = "*".to_string();
        assert_eq!(q.validate(), Err(QueryError::Wildcard("L")));

        let q = query().with_range(10, 10);
        assert_eq!(q.validate(), Err(QueryError::EmptyRange));

        let q = query().with_window(1000, WindowFunction::Hann);
        assert_eq!(q.validate(), Err(QueryError::WindowSize(1000)));
    }

    #[test]
    fn test_widen_empty_range() {
        let mut q = query().with_range(5_000, 1_000);
        q.widen_empty_range();
        assert_eq!(q.to_ms, 5_000 + MILLIS_PER_DAY);
    }

    #[test]
    fn test_request_json_full() {
        let json = r#"{
            "N": "NZ", "S": "WIZ", "C": "HHZ", "L": "10",
            "type": "winston", "cutoff": 10, "maxPower": 90, "webQuery": true,
            "from": "2024-03-01", "to": "2024-03-02",
            "fromTime": "06:30", "toTime": "18:00",
            "graphFormat": "SVG", "graphWidth": 800, "graphHeight": 400,
            "windowSize": 1024, "windowFunction": "UNIFORM", "responseFactor": 2.5
        }"#;
        let req: QueryRequest = serde_json::from_str(json).unwrap();
        let q = req.into_query(QueryType::Fdsn, noon(2024, 3, 5)).unwrap();

        assert_eq!(q.source_type, QueryType::Winston);
        assert_eq!(q.cutoff_hz, 10);
        assert_eq!(q.max_power, 90);
        assert!(q.web_query);
        assert_eq!(q.from_ms, parse_date_time_ms("2024-03-01", Some("06:30")).unwrap());
        assert_eq!(q.to_ms, parse_date_time_ms("2024-03-02", Some("18:00")).unwrap());
        assert_eq!(q.graph_format, GraphFormat::Svg);
        assert_eq!((q.graph_width, q.graph_height), (800, 400));
        assert_eq!(q.window_size, 1024);
        assert_eq!(q.window_function, WindowFunction::Uniform);
        assert!((q.response_factor - 2.5).abs() < f64::EPSILON);
        assert!(!q.needs_decompression());
    }

    #[test]
    fn test_request_json_partial_fields_are_ignored() {
        // fromTime without toTime, graphWidth without graphHeight
        let json = r#"{
            "N": "NZ", "S": "WIZ", "C": "HHZ", "L": "",
            "from": "2024-03-01", "to": "2024-03-02", "fromTime": "06:30",
            "graphWidth": 800, "windowFunction": "blackman"
        }"#;
        let req: QueryRequest = serde_json::from_str(json).unwrap();
        let q = req.into_query(QueryType::Seedlink, noon(2024, 3, 5)).unwrap();

        assert_eq!(q.source_type, QueryType::Seedlink);
        assert_eq!(q.from_ms, parse_date_time_ms("2024-03-01", None).unwrap());
        assert_eq!(q.graph_width, defaults::WEB_GRAPH_WIDTH_PX);
        assert_eq!(q.window_function, WindowFunction::Hann);
    }

    #[test]
    fn test_request_json_errors() {
        let req: QueryRequest =
            serde_json::from_str(r#"{"N":"NZ","S":"WIZ","C":"HHZ","L":"","type":"ew"}"#).unwrap();
        assert!(matches!(
            req.into_query(QueryType::Fdsn, noon(2024, 3, 5)),
            Err(QueryError::UnknownType(_))
        ));

        let req: QueryRequest = serde_json::from_str(
            r#"{"N":"NZ","S":"WIZ","C":"HHZ","L":"","from":"01/03/2024","to":"2024-03-02"}"#,
        )
        .unwrap();
        assert!(matches!(
            req.into_query(QueryType::Fdsn, noon(2024, 3, 5)),
            Err(QueryError::Date(_))
        ));

        assert!(serde_json::from_str::<QueryRequest>(r#"{"S":"WIZ","C":"HHZ"}"#).is_err());
    }
}
