//! Renders the graphs by running the gnuplot scripts in the output
//! directory. All file arguments are relative to that directory.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{info, warn};

use super::OutputError;
use crate::config::GraphConfig;
use crate::types::{GraphFormat, Query};

const GNUPLOT: &str = "gnuplot";

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct GraphFiles {
    pub graph: PathBuf,
    pub max_freqs_graph: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Plotter {
    program: String,
    scripts_dir: PathBuf,
    width: u32,
    height: u32,
}

impl Plotter {
    pub fn new(config: &GraphConfig) -> Self {
        let scripts_dir = std::path::absolute(&config.scripts_dir)
            .unwrap_or_else(|_| config.scripts_dir.clone());
        Self {
            program: GNUPLOT.into(),
            scripts_dir,
            width: config.graph_width_px,
            height: config.graph_height_px,
        }
    }

    /// Run another executable in place of gnuplot.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn script_path(&self, format: GraphFormat) -> PathBuf {
        match format {
            GraphFormat::Png => self.scripts_dir.join("plot_png"),
            GraphFormat::Svg => self.scripts_dir.join("plot_svg"),
        }
    }

    /// Web queries carry their own size, everything else uses the config.
    pub fn image_size(&self, query: &Query) -> (u32, u32) {
        if query.web_query {
            (query.graph_width, query.graph_height)
        } else {
            (self.width, self.height)
        }
    }

    /// The `-e` argument: gnuplot variable assignments for the scripts.
    pub fn command_args(&self, query: &Query) -> String {
        let (width, height) = self.image_size(query);
        let broadband = query.component.starts_with('H') || query.component.starts_with('B');
        let cutoff_window = query.cutoff_window().unwrap_or(0);

        let vars: [(&str, String); 15] = [
            ("title", query.graph_title()),
            ("plotname", query.nscl()),
            ("fftWindow", cutoff_window.to_string()),
            ("cutoff", query.cutoff_hz.to_string()),
            ("averagingFactor", query.averaging_factor().to_string()),
            ("maxPower", query.max_power.to_string()),
            ("broadbandScale", broadband.to_string()),
            ("imageWidth", width.to_string()),
            ("imageHeight", height.to_string()),
            ("ssam", query.ssam_file_name()),
            ("average_ssam", query.average_ssam_file_name()),
            ("rsam", query.rsam_file_name()),
            ("maxFreqs", query.max_freqs_file_name()),
            ("maxFreqsOutput", query.max_freqs_graph_file_name()),
            ("output", query.graph_file_name()),
        ];
        vars.iter()
            .map(|(k, v)| format!("{k}='{}'", v.replace('\'', "")))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub async fn plot(&self, query: &Query, dir: &Path) -> Result<GraphFiles, OutputError> {
        let script = self.script_path(query.graph_format);
        info!(query = %query.id(), script = %script.display(), "Calling gnuplot");

        let output = tokio::process::Command::new(&self.program)
            .arg("-e")
            .arg(self.command_args(query))
            .arg(&script)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(OutputError::PlotSpawn)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(query = %query.id(), status = %output.status, stderr = %stderr, "gnuplot failed");
            return Err(OutputError::PlotFailed {
                status: output.status.to_string(),
                stderr,
            });
        }

        let files = GraphFiles {
            graph: dir.join(query.graph_file_name()),
            max_freqs_graph: dir.join(query.max_freqs_graph_file_name()),
        };
        info!(query = %query.id(), graph = %files.graph.display(), "Graph done");
        Ok(files)
    }
}
