use crate::error::Result;
use std::fs;
use std::path::{Path, PathBuf};

/// Progress file rewritten atomically after each processed URL, so an
/// observer never reads a partial line. Format:
/// `<processed_count>;<remaining_depth>;<current_url>`.
pub struct ProgressFile {
    path: PathBuf,
}

impl ProgressFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        ProgressFile {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn update(&self, processed_count: usize, remaining_depth: u32, current_url: &str) -> Result<()> {
        let temp_path = self.path.with_extension("tmp");
        fs::write(
            &temp_path,
            format!("{processed_count};{remaining_depth};{current_url}"),
        )?;
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_the_expected_format_and_replaces_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress");
        let progress = ProgressFile::new(&path);

        progress
            .update(1, 2, "https://example.org/articles/1")
            .unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "1;2;https://example.org/articles/1"
        );

        progress
            .update(2, 1, "https://example.org/articles/2")
            .unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "2;1;https://example.org/articles/2"
        );
    }
}
