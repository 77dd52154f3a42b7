use crate::error::ErrorKind;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct HarvesterError {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Default)]
struct JournalErrors {
    url_errors: BTreeMap<String, HarvesterError>,
    non_url_errors: Vec<HarvesterError>,
}

/// Collects per-journal, per-URL errors over a run and writes the
/// section-based report consumed by the operations side. Failures are
/// recorded and the run continues; nothing here aborts.
#[derive(Debug, Default)]
pub struct ErrorLogger {
    journal_errors: BTreeMap<String, JournalErrors>,
}

/// Messages whose shape identifies a more specific error kind than the
/// caller could classify.
static DATE_FORMAT_ERROR_MATCHER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"unparseable date "(.+?)""#).unwrap());

impl ErrorLogger {
    pub fn new() -> Self {
        ErrorLogger::default()
    }

    pub fn log(&mut self, kind: ErrorKind, journal_name: &str, harvest_url: &str, message: &str) {
        let errors = self.journal_errors.entry(journal_name.to_string()).or_default();
        let error = HarvesterError {
            kind,
            message: message.to_string(),
        };
        if harvest_url.is_empty() {
            errors.non_url_errors.push(error);
        } else {
            errors.url_errors.insert(harvest_url.to_string(), error);
        }
        warn!(
            kind = kind.as_str(),
            journal = journal_name,
            url = harvest_url,
            message,
            "harvest error"
        );
    }

    /// Classifies a free-form message by shape before logging it.
    pub fn auto_log(&mut self, journal_name: &str, harvest_url: &str, message: &str) {
        if let Some(captures) = DATE_FORMAT_ERROR_MATCHER.captures(message) {
            let detail = captures[1].to_string();
            self.log(ErrorKind::BadStrptimeFormat, journal_name, harvest_url, &detail);
        } else {
            self.log(ErrorKind::Unknown, journal_name, harvest_url, message);
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.journal_errors.is_empty()
    }

    pub fn error_counts_by_kind(&self) -> BTreeMap<ErrorKind, usize> {
        let mut counts = BTreeMap::new();
        for errors in self.journal_errors.values() {
            for error in errors
                .url_errors
                .values()
                .chain(errors.non_url_errors.iter())
            {
                *counts.entry(error.kind).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Renders the report: a root section with the `has_errors` flag and
    /// journal list, one section per journal mapping URL to error kind, and
    /// one section per error kind mapping URL to message.
    pub fn render_report(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "has_errors = {}",
            if self.has_errors() { "true" } else { "false" }
        );
        let journal_names: String = self
            .journal_errors
            .keys()
            .map(|name| format!("{name}|"))
            .collect();
        let _ = writeln!(out, "journal_names = \"{journal_names}\"");

        let mut kind_sections: BTreeMap<&'static str, Vec<(String, String)>> = BTreeMap::new();
        for (journal_name, errors) in &self.journal_errors {
            let _ = writeln!(out, "\n[{journal_name}]");
            for (url, error) in &errors.url_errors {
                let _ = writeln!(out, "\"{url}\" = \"{}\"", error.kind.as_str());
                kind_sections
                    .entry(error.kind.as_str())
                    .or_default()
                    .push((url.clone(), error.message.clone()));
            }
            for (index, error) in errors.non_url_errors.iter().enumerate() {
                let key = format!("{journal_name}-non_url_error-{}", index + 1);
                let _ = writeln!(out, "\"{key}\" = \"{}\"", error.kind.as_str());
                kind_sections
                    .entry(error.kind.as_str())
                    .or_default()
                    .push((key, error.message.clone()));
            }
        }

        for (kind, entries) in kind_sections {
            let _ = writeln!(out, "\n[{kind}]");
            for (key, message) in entries {
                let _ = writeln!(out, "\"{key}\" = \"{}\"", message.replace('"', "'"));
            }
        }
        out
    }

    pub fn write_report<P: AsRef<Path>>(&self, path: P) -> crate::error::Result<()> {
        std::fs::write(path, self.render_report())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_lists_journals_kinds_and_details() {
        let mut logger = ErrorLogger::new();
        logger.log(
            ErrorKind::ZtsConversionFailed,
            "Journal of Examples",
            "https://example.org/articles/1",
            "HTTP 500",
        );
        logger.auto_log(
            "Journal of Examples",
            "https://example.org/articles/2",
            r#"unparseable date "Spring 2020""#,
        );
        logger.auto_log("Journal of Examples", "", "something odd happened");

        assert!(logger.has_errors());
        let counts = logger.error_counts_by_kind();
        assert_eq!(counts[&ErrorKind::ZtsConversionFailed], 1);
        assert_eq!(counts[&ErrorKind::BadStrptimeFormat], 1);
        assert_eq!(counts[&ErrorKind::Unknown], 1);

        let report = logger.render_report();
        assert!(report.starts_with("has_errors = true"));
        assert!(report.contains("journal_names = \"Journal of Examples|\""));
        assert!(report.contains("[Journal of Examples]"));
        assert!(report.contains("\"https://example.org/articles/1\" = \"ERROR-ZTS_CONVERSION_FAILED\""));
        assert!(report.contains("[ERROR-BAD_STRPTIME_FORMAT]"));
        assert!(report.contains("\"https://example.org/articles/2\" = \"Spring 2020\""));
        assert!(report.contains("Journal of Examples-non_url_error-1"));
    }

    #[test]
    fn empty_logger_reports_no_errors() {
        let logger = ErrorLogger::new();
        assert!(!logger.has_errors());
        assert!(logger.render_report().starts_with("has_errors = false"));
    }
}
