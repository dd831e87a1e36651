//! Files written next to a processed document.

use std::fs;
use std::path::{Path, PathBuf};

use crate::models::{Description, TableSchema};
use crate::reconstruct::ReplacementReport;

/// Outputs of processing one document.
pub struct DocumentArtifacts<'a> {
    pub stem: &'a str,
    pub original: &'a str,
    pub processed: &'a str,
    pub schemas: &'a [TableSchema],
    pub descriptions: &'a [Description],
    pub report: &'a ReplacementReport,
}

impl DocumentArtifacts<'_> {
    /// Write every artifact into `output_dir`, returning the written paths.
    pub fn write(&self, output_dir: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
        fs::create_dir_all(output_dir)?;

        let files = [
            ("processed.md", self.processed.to_string()),
            ("original.md", self.original.to_string()),
            ("schemas.json", serde_json::to_string_pretty(self.schemas)?),
            ("descriptions.json", serde_json::to_string_pretty(self.descriptions)?),
            ("replacement_report.txt", self.report.render()),
        ];

        let mut written = Vec::with_capacity(files.len());
        for (suffix, content) in files {
            let path = output_dir.join(format!("{}_{}", self.stem, suffix));
            fs::write(&path, content)?;
            written.push(path);
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_all_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let schemas = vec![TableSchema::failed("doc_table_1", None, "broken")];
        let descriptions = vec![Description::error("doc_table_1", "broken")];
        let report = ReplacementReport::default();

        let written = DocumentArtifacts {
            stem: "doc",
            original: "original text",
            processed: "processed text",
            schemas: &schemas,
            descriptions: &descriptions,
            report: &report,
        }
        .write(dir.path())
        .unwrap();

        assert_eq!(written.len(), 5);
        assert_eq!(
            fs::read_to_string(dir.path().join("doc_processed.md")).unwrap(),
            "processed text"
        );
        let schemas_json = fs::read_to_string(dir.path().join("doc_schemas.json")).unwrap();
        assert!(schemas_json.contains("\"success\": false"));
        assert!(dir.path().join("doc_replacement_report.txt").exists());
    }
}
