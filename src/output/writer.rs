//! Writes job artifacts into the query's output directory.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{Artifacts, OutputError};
use crate::types::Query;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct WrittenFiles {
    pub rsam: PathBuf,
    pub ssam: PathBuf,
    pub average_ssam: PathBuf,
    pub max_freqs: PathBuf,
}

pub async fn ensure_dir(dir: &Path) -> Result<(), OutputError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| OutputError::CreateDir(dir.to_path_buf(), e))
}

/// Replace `path` with `content`. Empty content is refused.
pub async fn write_file(path: &Path, content: &str) -> Result<(), OutputError> {
    if content.is_empty() {
        return Err(OutputError::EmptyContent(path.to_path_buf()));
    }
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed previous file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(OutputError::Write(path.to_path_buf(), e)),
    }
    tokio::fs::write(path, content)
        .await
        .map_err(|e| OutputError::Write(path.to_path_buf(), e))
}

pub async fn write_artifacts(
    dir: &Path,
    query: &Query,
    artifacts: &Artifacts,
) -> Result<WrittenFiles, OutputError> {
    ensure_dir(dir).await?;

    let files = WrittenFiles {
        rsam: dir.join(query.rsam_file_name()),
        ssam: dir.join(query.ssam_file_name()),
        average_ssam: dir.join(query.average_ssam_file_name()),
        max_freqs: dir.join(query.max_freqs_file_name()),
    };
    write_file(&files.rsam, &artifacts.rsam).await?;
    write_file(&files.ssam, &artifacts.ssam).await?;
    write_file(&files.average_ssam, &artifacts.average_ssam).await?;
    write_file(&files.max_freqs, &artifacts.max_freqs).await?;

    info!(query = %query.id(), dir = %dir.display(), "Results written");
    Ok(files)
}
