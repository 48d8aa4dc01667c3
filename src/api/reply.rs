//! JSON replies of the graph service.
//!
//! A handler returns `Result<Reply<T>, ApiError>`. Success is
//! `{ "data": T, "meta": { timestamp, version, query? } }`; a failure is
//! `{ "error": { "code", "message" }, "meta": { ... } }` with the HTTP status
//! and code chosen from the job error.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::pipeline::JobError;
use crate::types::QueryError;

#[derive(Debug, Serialize)]
struct Meta {
    timestamp: String,
    version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    query: Option<String>,
}

impl Meta {
    fn new(query: Option<String>) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            version: "1",
            query,
        }
    }
}

/// 200 reply carrying `data`, tagged with the query id when there is one.
#[derive(Debug)]
pub struct Reply<T> {
    data: T,
    query: Option<String>,
}

impl<T: Serialize> Reply<T> {
    pub fn new(data: T) -> Self {
        Self { data, query: None }
    }

    pub fn for_query(query: impl Into<String>, data: T) -> Self {
        Self {
            data,
            query: Some(query.into()),
        }
    }
}

impl<T: Serialize> IntoResponse for Reply<T> {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct Body<T> {
            data: T,
            meta: Meta,
        }
        let body = Body {
            data: self.data,
            meta: Meta::new(self.query),
        };
        (StatusCode::OK, Json(body)).into_response()
    }
}

/// Why a request produced no graph.
#[derive(Debug)]
pub enum ApiError {
    /// The request body did not describe a usable query.
    Request(QueryError),
    /// The job ran and failed.
    Job { query: String, error: JobError },
}

impl ApiError {
    pub fn job(query: impl Into<String>, error: JobError) -> Self {
        Self::Job {
            query: query.into(),
            error,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Request(_) => StatusCode::BAD_REQUEST,
            Self::Job { error, .. } => match error {
                JobError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
                JobError::NoData(_) | JobError::ServerNoData | JobError::NothingToProcess => {
                    StatusCode::NOT_FOUND
                }
                JobError::TimedOut => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Stable machine-readable code for the `error.code` field.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Request(_) => "BAD_REQUEST",
            Self::Job { error, .. } => match error {
                JobError::InvalidQuery(_) => "BAD_REQUEST",
                JobError::NotConfigured(_) => "SOURCE_NOT_CONFIGURED",
                JobError::NoData(_) | JobError::ServerNoData | JobError::NothingToProcess => "NO_DATA",
                JobError::Connect(_) => "SOURCE_UNREACHABLE",
                JobError::TimedOut => "TIMEOUT",
                JobError::Cancelled => "CANCELLED",
                JobError::OutputFolder(_) | JobError::WriteFailed(_) | JobError::Graph(_) => {
                    "OUTPUT_FAILED"
                }
                JobError::StageAborted(_) => "PIPELINE_FAILED",
            },
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Request(e) => format!("Invalid query: {e}"),
            Self::Job { error, .. } => error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct Detail {
            code: &'static str,
            message: String,
        }
        #[derive(Serialize)]
        struct Body {
            error: Detail,
            meta: Meta,
        }

        let status = self.status();
        let body = Body {
            error: Detail {
                code: self.code(),
                message: self.message(),
            },
            meta: Meta::new(match self {
                Self::Job { query, .. } => Some(query),
                Self::Request(_) => None,
            }),
        };
        (status, Json(body)).into_response()
    }
}
