use crate::error::{HarvestError, Result};
use crate::pipeline::ingestion::translation_server::TranslationApi;
use crate::pipeline::processing::marc::{collection_to_xml, Record};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::info;

/// Export formats the translation service can produce server-side.
pub const EXPORT_FORMATS: &[&str] = &[
    "bibtex",
    "biblatex",
    "bookmarks",
    "coins",
    "csljson",
    "mods",
    "refer",
    "rdf_bibliontology",
    "rdf_dc",
    "rdf_zotero",
    "ris",
    "wikipedia",
    "tei",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputFormat {
    /// Full conversion pipeline with delivery tracking.
    MarcXml,
    /// Raw item JSON array, no conversion and no tracking.
    Json,
    /// Raw item JSON converted server-side into the named format.
    Export(String),
}

impl OutputFormat {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "marcxml" => Ok(OutputFormat::MarcXml),
            "json" => Ok(OutputFormat::Json),
            other if EXPORT_FORMATS.contains(&other) => Ok(OutputFormat::Export(other.to_string())),
            other => Err(HarvestError::Config(format!("invalid output format: {other}"))),
        }
    }

    /// Raw formats bypass record generation entirely.
    pub fn wants_raw_items(&self) -> bool {
        !matches!(self, OutputFormat::MarcXml)
    }
}

/// Accumulates a run's output and writes the artifact once at the end,
/// mirroring how records are batched for upload.
pub struct OutputSink {
    format: OutputFormat,
    path: PathBuf,
    records: Vec<Record>,
    raw_items: Vec<Value>,
}

impl OutputSink {
    pub fn new<P: AsRef<Path>>(format: OutputFormat, path: P) -> Self {
        OutputSink {
            format,
            path: path.as_ref().to_path_buf(),
            records: Vec::new(),
            raw_items: Vec::new(),
        }
    }

    pub fn format(&self) -> &OutputFormat {
        &self.format
    }

    pub fn push_record(&mut self, record: Record) {
        self.records.push(record);
    }

    pub fn push_raw_items(&mut self, items: &[Value]) {
        self.raw_items.extend_from_slice(items);
    }

    /// Writes the collected output. The export path performs one final
    /// translation-service call to convert the buffered JSON.
    pub async fn finish(self, api: &dyn TranslationApi) -> Result<PathBuf> {
        match &self.format {
            OutputFormat::MarcXml => {
                std::fs::write(&self.path, collection_to_xml(&self.records))?;
                info!(count = self.records.len(), path = %self.path.display(), "wrote record collection");
            }
            OutputFormat::Json => {
                let body = serde_json::to_string_pretty(&Value::Array(self.raw_items))?;
                std::fs::write(&self.path, body)?;
            }
            OutputFormat::Export(format) => {
                let json = serde_json::to_string(&Value::Array(self.raw_items))?;
                let converted = api.export(format, &json).await?;
                std::fs::write(&self.path, converted)?;
            }
        }
        Ok(self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_names_resolve_per_contract() {
        assert_eq!(OutputFormat::from_name("marcxml").unwrap(), OutputFormat::MarcXml);
        assert_eq!(OutputFormat::from_name("json").unwrap(), OutputFormat::Json);
        assert_eq!(
            OutputFormat::from_name("bibtex").unwrap(),
            OutputFormat::Export("bibtex".to_string())
        );
        assert!(OutputFormat::from_name("docx").is_err());

        assert!(!OutputFormat::MarcXml.wants_raw_items());
        assert!(OutputFormat::Json.wants_raw_items());
    }
}
