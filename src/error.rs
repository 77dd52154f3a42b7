use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tracking store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("translation service error (HTTP {code}): {message}")]
    TranslationServer { code: u16, message: String },

    #[error("failed to resolve multiple matches: {0}")]
    MultipleMatches(String),

    #[error("translation service returned no items ({0})")]
    EmptyResponse(String),

    #[error("unparseable date \"{0}\"")]
    BadDateFormat(String),

    #[error("feed parse error: {0}")]
    Feed(String),

    #[error("conversion failed: {0}")]
    Conversion(String),
}

pub type Result<T> = std::result::Result<T, HarvestError>;

/// Error taxonomy used by the per-journal error report. Every `HarvestError`
/// maps onto exactly one kind; skip outcomes (exclusion filters, online-first,
/// early-view) are counters, never errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorKind {
    ZtsConversionFailed,
    DownloadMultipleFailed,
    FailedToParseJson,
    ZtsEmptyResponse,
    BadStrptimeFormat,
    ConfigError,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ZtsConversionFailed => "ERROR-ZTS_CONVERSION_FAILED",
            ErrorKind::DownloadMultipleFailed => "ERROR-DOWNLOAD_MULTIPLE_FAILED",
            ErrorKind::FailedToParseJson => "ERROR-FAILED_TO_PARSE_JSON",
            ErrorKind::ZtsEmptyResponse => "ERROR-ZTS_EMPTY_RESPONSE",
            ErrorKind::BadStrptimeFormat => "ERROR-BAD_STRPTIME_FORMAT",
            ErrorKind::ConfigError => "ERROR-CONFIG",
            ErrorKind::Unknown => "ERROR-UNKNOWN",
        }
    }
}

impl HarvestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HarvestError::Http(_) | HarvestError::TranslationServer { .. } => {
                ErrorKind::ZtsConversionFailed
            }
            HarvestError::MultipleMatches(_) => ErrorKind::DownloadMultipleFailed,
            HarvestError::Json(_) => ErrorKind::FailedToParseJson,
            HarvestError::EmptyResponse(_) => ErrorKind::ZtsEmptyResponse,
            HarvestError::BadDateFormat(_) => ErrorKind::BadStrptimeFormat,
            HarvestError::Config(_) | HarvestError::Toml(_) => ErrorKind::ConfigError,
            _ => ErrorKind::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_map_to_report_labels() {
        let err = HarvestError::BadDateFormat("Spring 2020".to_string());
        assert_eq!(err.kind(), ErrorKind::BadStrptimeFormat);
        assert_eq!(err.kind().as_str(), "ERROR-BAD_STRPTIME_FORMAT");

        let err = HarvestError::Config("online ISSN without online PPN".to_string());
        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }
}
