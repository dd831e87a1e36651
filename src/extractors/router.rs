//! Extension-based dispatch to registered extractors.

use std::collections::HashMap;
use std::path::Path;

use serde::Serialize;
use tracing::debug;

use super::{
    extension_of, ExtractError, Extraction, HtmlExtractor, SpreadsheetExtractor, TableExtractor,
};

/// Name and extensions of a registered extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractorInfo {
    pub name: String,
    pub extensions: Vec<String>,
}

/// Selects an extractor by file extension.
///
/// When the extension map has no entry, every registered extractor is asked
/// in registration order whether it supports the file.
pub struct ExtractorRouter {
    extractors: Vec<Box<dyn TableExtractor>>,
    by_extension: HashMap<String, usize>,
}

impl Default for ExtractorRouter {
    fn default() -> Self {
        let mut router = Self::empty();
        router.register(Box::new(HtmlExtractor::new()));
        router.register(Box::new(SpreadsheetExtractor::new()));
        router
    }
}

impl ExtractorRouter {
    /// Router with the HTML and spreadsheet extractors registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Router with no extractors.
    pub fn empty() -> Self {
        Self {
            extractors: Vec::new(),
            by_extension: HashMap::new(),
        }
    }

    /// Register an extractor; its extensions take precedence over earlier ones.
    pub fn register(&mut self, extractor: Box<dyn TableExtractor>) {
        let index = self.extractors.len();
        for ext in extractor.extensions() {
            self.by_extension.insert(ext.to_ascii_lowercase(), index);
        }
        debug!("Registered extractor: {}", extractor.name());
        self.extractors.push(extractor);
    }

    /// Remove the extractor with the given name. Returns whether one was removed.
    pub fn unregister(&mut self, name: &str) -> bool {
        let before = self.extractors.len();
        self.extractors.retain(|extractor| extractor.name() != name);
        if self.extractors.len() == before {
            return false;
        }
        self.rebuild_extension_map();
        true
    }

    fn rebuild_extension_map(&mut self) {
        self.by_extension.clear();
        for (index, extractor) in self.extractors.iter().enumerate() {
            for ext in extractor.extensions() {
                self.by_extension.insert(ext.to_ascii_lowercase(), index);
            }
        }
    }

    /// Find the extractor for a file.
    pub fn extractor_for(&self, path: &Path) -> Result<&dyn TableExtractor, ExtractError> {
        if let Some(&index) = extension_of(path).and_then(|ext| self.by_extension.get(&ext)) {
            return Ok(self.extractors[index].as_ref());
        }
        self.extractors
            .iter()
            .find(|extractor| extractor.supports(path))
            .map(|extractor| extractor.as_ref())
            .ok_or_else(|| ExtractError::NoExtractor(path.to_path_buf()))
    }

    /// Extract a file with the matching extractor.
    ///
    /// A missing file is reported before any extractor is consulted.
    pub fn extract(&self, path: &Path) -> Result<Extraction, ExtractError> {
        if !path.exists() {
            return Err(ExtractError::NotFound(path.to_path_buf()));
        }
        let extractor = self.extractor_for(path)?;
        debug!("Extracting {} with {}", path.display(), extractor.name());
        extractor.extract(path)
    }

    /// Every supported extension, sorted and without duplicates.
    pub fn supported_extensions(&self) -> Vec<String> {
        let mut extensions: Vec<String> = self.by_extension.keys().cloned().collect();
        extensions.sort();
        extensions
    }

    pub fn is_supported(&self, path: &Path) -> bool {
        self.extractor_for(path).is_ok()
    }

    pub fn describe(&self) -> Vec<ExtractorInfo> {
        self.extractors
            .iter()
            .map(|extractor| ExtractorInfo {
                name: extractor.name().to_string(),
                extensions: extractor
                    .extensions()
                    .iter()
                    .map(|ext| ext.to_string())
                    .collect(),
            })
            .collect()
    }
}
