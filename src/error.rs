use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Failures that abort a single upload or read request.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("input is {size} bytes, above the {limit} byte limit")]
    InputTooLarge { size: usize, limit: usize },

    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("no CSV has been analyzed yet")]
    NoSnapshotAvailable,
}

/// Why a single CSV row was skipped. Never fatal to the upload.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Error, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum RowRejection {
    #[error("message text is empty")]
    MissingMessage,

    #[error("{0} is not a non-negative number")]
    NonNumericCount(String),

    #[error("click count exceeds sent count")]
    ClicksExceedSent,

    #[error("click rate {0:?} is not a number")]
    NonNumericRate(String),

    #[error("click rate {0} is outside 0-100")]
    RateOutOfRange(String),

    #[error("no click rate and no usable send/click counts")]
    MissingClickRate,

    #[error("send date {0:?} is not a recognized date")]
    InvalidDate(String),

    #[error("unreadable record: {0}")]
    Unreadable(String),
}

impl RowRejection {
    /// Stable key used when tallying rejections by kind.
    pub fn kind(&self) -> &'static str {
        match self {
            RowRejection::MissingMessage => "missing_message",
            RowRejection::NonNumericCount(_) => "non_numeric_count",
            RowRejection::ClicksExceedSent => "clicks_exceed_sent",
            RowRejection::NonNumericRate(_) => "non_numeric_rate",
            RowRejection::RateOutOfRange(_) => "rate_out_of_range",
            RowRejection::MissingClickRate => "missing_click_rate",
            RowRejection::InvalidDate(_) => "invalid_date",
            RowRejection::Unreadable(_) => "unreadable",
        }
    }
}

/// External generation errors. The synthesizer catches every one of these
/// and falls back to templates.
#[derive(Debug, Error)]
pub enum GenerationFailure {
    #[error("external generation is disabled")]
    Disabled,

    #[error("missing credential: {0}")]
    MissingCredential(String),

    #[error("external generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}
