//! System-wide default constants.
//!
//! Centralises magic numbers used across the acquisition, pipeline and
//! output stages. Grouped by subsystem for easy discovery.

// ============================================================================
// Service
// ============================================================================

/// Minutes between periodic graph rounds. Also the minimum accepted value.
pub const REPLOT_INTERVAL_MINUTES: u64 = 1;

/// Source used when a query does not name one.
pub const DEFAULT_QUERY_TYPE: &str = "fdsn";

/// Deadline for a web-triggered job (seconds). Also the minimum accepted value.
pub const SERVICE_TIMEOUT_SECS: u64 = 60;

/// HTTP API port.
pub const WEB_PORT: u16 = 19_090;

/// Runtime worker threads.
pub const THREAD_POOL_SIZE: usize = 10;

/// Smallest worker pool that still leaves room for the blocking DSP stage.
pub const MIN_THREAD_POOL_SIZE: usize = 2;

/// Root of every job's output tree.
pub const OUTPUT_DIR: &str = "output";

/// Sub-directory of [`OUTPUT_DIR`] holding ad-hoc web queries.
pub const WEB_OUTPUT_SUBDIR: &str = "web";

/// JSON array of queries graphed by the periodic grapher.
pub const QUERIES_FILE: &str = "conf/queries.json";

/// Delay applied to the 00:00 UTC round so late packets for the previous day
/// reach the data source first (seconds).
pub const MIDNIGHT_DELAY_SECS: u64 = 30;

// ============================================================================
// Data Sources
// ============================================================================

pub const FDSN_PORT: u16 = 8080;

/// Cap on the wait for FDSN response headers (seconds).
pub const FDSN_TIMEOUT_SECS: u64 = 120;

pub const SEEDLINK_PORT: u16 = 18_000;

pub const WINSTON_PORT: u16 = 16_022;

/// Cap on the wait for the Winston response header (seconds).
pub const WINSTON_TIMEOUT_SECS: u64 = 120;

/// TCP / HTTP connect timeout shared by all sources (milliseconds).
pub const CONNECT_TIMEOUT_MS: u64 = 2_000;

/// Extra time requested on each side of an FDSN query (milliseconds).
pub const FDSN_MARGIN_MS: i64 = 10_000;

/// Idle timeout on an FDSN body stream (seconds).
pub const FDSN_IDLE_TIMEOUT_SECS: u64 = 5;

/// Idle timeout on a SeedLink data stream (seconds).
pub const SEEDLINK_IDLE_TIMEOUT_SECS: u64 = 5;

/// Time allowed for a SeedLink command response (seconds).
pub const SEEDLINK_RESPONSE_TIMEOUT_SECS: u64 = 1;

/// Winston idle timeout for queries spanning one day or less (seconds).
pub const WINSTON_IDLE_TIMEOUT_SECS: u64 = 10;

/// Winston idle timeout per day for multi-day queries (seconds).
pub const WINSTON_IDLE_SECS_PER_DAY: u64 = 5;

/// Fixed miniSEED record size returned by FDSN dataselect and SeedLink.
pub const MINISEED_RECORD_LEN: usize = 512;

/// SeedLink frame: 8-byte header followed by one miniSEED record.
pub const SEEDLINK_FRAME_LEN: usize = 520;

// ============================================================================
// Backpressure
// ============================================================================

/// Source buffer size above which network reads are paused.
pub const SOURCE_PAUSE_ABOVE: usize = 40_000;

/// Source buffer size below which paused reads resume.
pub const SOURCE_RESUME_BELOW: usize = 10_000;

/// Watchdog cadence for TCP sources (milliseconds).
pub const SOURCE_RECHECK_MS: u64 = 1_000;

/// Watchdog cadence for the FDSN source (milliseconds).
pub const FDSN_RECHECK_MS: u64 = 100;

// ============================================================================
// Pipeline
// ============================================================================

/// Records queued for the decompressor; the source waits while it is full.
pub const DECOMPRESSOR_INPUT_CAPACITY: usize = 20_000;

/// Sample batches in flight between decompressor and packager.
pub const SAMPLE_QUEUE_CAPACITY: usize = 64;

/// Packaged bins in flight between packager and processor.
pub const BIN_QUEUE_CAPACITY: usize = 1_000;

// ============================================================================
// Processing
// ============================================================================

pub const WINDOW_SIZE: usize = 4_096;

pub const CUTOFF_FREQUENCY_HZ: u32 = 25;

pub const RESPONSE_FACTOR: f64 = 1.0;

/// Consecutive zero samples that mark a bin as a data gap.
pub const ZERO_TOLERANCE: usize = 10;

pub const RSAM_AVERAGE_WINDOW_MINUTES: u32 = 5;

/// Base of the average-SSAM contrast remap `base^(x / max)`.
pub const AVERAGE_SSAM_REMAP_BASE: f64 = 50.0;

// ============================================================================
// Graphs
// ============================================================================

pub const MAX_POWER_DB: u32 = 120;

/// Graph size used by periodic jobs.
pub const GRAPH_WIDTH_PX: u32 = 1_200;
pub const GRAPH_HEIGHT_PX: u32 = 1_200;

/// Graph size a web query starts from.
pub const WEB_GRAPH_WIDTH_PX: u32 = 1_200;
pub const WEB_GRAPH_HEIGHT_PX: u32 = 600;

pub const MIN_GRAPH_SIDE_PX: u32 = 200;

/// Directory holding the `plot_png` / `plot_svg` gnuplot scripts.
pub const SCRIPTS_DIR: &str = "gnuplot_scripts";
