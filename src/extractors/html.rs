//! HTML table extraction.

use std::fs;
use std::path::Path;

use scraper::{ElementRef, Html, Node};
use tracing::debug;

use super::flow::FlowDocument;
use super::grid::{cell_text, Grid};
use super::{document_stem, table_id, ExtractError, Extraction, ExtractionMethod, TableExtractor};
use crate::models::RawTable;

/// Elements whose content never reaches the flowed text.
const SKIPPED: &[&str] = &["head", "script", "style", "noscript", "template", "iframe", "svg"];

/// Elements that start and end a block of flowed text.
const BLOCKS: &[&str] = &[
    "p", "div", "section", "article", "header", "footer", "main", "nav", "aside", "blockquote",
    "figure", "figcaption", "form", "fieldset", "address", "details", "summary", "dl", "dt", "dd",
    "caption", "body", "html",
];

/// Extracts `<table>` elements and renders the document as flowed text.
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlExtractor;

impl HtmlExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract from an in-memory document; `source` names the file for table ids.
    ///
    /// Tables are collected while the document is rendered, so each raw
    /// table lines up with the pipe table written for it. Nested tables stay
    /// inside their parent's markup.
    pub fn extract_markup(&self, html: &str, source: &Path) -> Result<Extraction, ExtractError> {
        let document = Html::parse_document(html);
        let mut writer = FlowWriter::new(document_stem(source));
        walk(document.root_element(), &mut writer);
        let (flowed, tables) = writer.finish();

        debug!(
            "Extracted {} tables from {}",
            tables.len(),
            source.display()
        );
        Ok(Extraction::from_document(
            source,
            ExtractionMethod::Html,
            tables,
            flowed,
        ))
    }
}

impl TableExtractor for HtmlExtractor {
    fn name(&self) -> &'static str {
        "html"
    }

    fn extensions(&self) -> &[&'static str] {
        &["html", "htm", "xhtml"]
    }

    fn extract(&self, path: &Path) -> Result<Extraction, ExtractError> {
        let bytes = fs::read(path)?;
        let html = String::from_utf8_lossy(&bytes);
        self.extract_markup(&html, path)
    }
}

fn caption(table: ElementRef<'_>) -> Option<String> {
    table
        .children()
        .filter_map(ElementRef::wrap)
        .find(|child| child.value().name() == "caption")
        .map(cell_text)
        .filter(|text| !text.is_empty())
}

/// Accumulates blocks of flowed text and the tables rendered into it.
struct FlowWriter {
    stem: String,
    document: FlowDocument,
    tables: Vec<RawTable>,
    inline: String,
}

impl FlowWriter {
    fn new(stem: String) -> Self {
        Self {
            stem,
            document: FlowDocument::new(),
            tables: Vec::new(),
            inline: String::new(),
        }
    }

    fn text(&mut self, text: &str) {
        if text.trim().is_empty() {
            if !text.is_empty() && !self.inline.is_empty() && !self.inline.ends_with([' ', '\n']) {
                self.inline.push(' ');
            }
            return;
        }
        if text.starts_with(char::is_whitespace)
            && !self.inline.is_empty()
            && !self.inline.ends_with([' ', '\n'])
        {
            self.inline.push(' ');
        }
        self.inline
            .push_str(&text.split_whitespace().collect::<Vec<_>>().join(" "));
        if text.ends_with(char::is_whitespace) {
            self.inline.push(' ');
        }
    }

    fn line_break(&mut self) {
        self.inline.push('\n');
    }

    fn flush(&mut self) {
        let block = self
            .inline
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        self.document.push_prose(&block);
        self.inline.clear();
    }

    fn block(&mut self, content: String) {
        self.flush();
        self.document.push_prose(&content);
    }

    /// Render an outermost table; empty tables leave no trace.
    fn table(&mut self, table: ElementRef<'_>) {
        let grid = Grid::from_table(table);
        if grid.is_empty() {
            return;
        }
        self.flush();
        let index = self.tables.len();
        self.tables.push(RawTable {
            table_id: table_id(&self.stem, index),
            index,
            markup: table.html(),
            label: caption(table),
        });
        self.document.push_table(&grid.to_pipe_table());
    }

    fn finish(mut self) -> (FlowDocument, Vec<RawTable>) {
        self.flush();
        (self.document, self.tables)
    }
}

fn walk(element: ElementRef<'_>, out: &mut FlowWriter) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.text(text),
            Node::Element(_) => {
                let Some(child) = ElementRef::wrap(child) else {
                    continue;
                };
                render_element(child, out);
            }
            _ => {}
        }
    }
}

fn render_element(element: ElementRef<'_>, out: &mut FlowWriter) {
    let name = element.value().name();
    match name {
        _ if SKIPPED.contains(&name) => {}
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
            let level = name[1..].parse::<usize>().unwrap_or(1);
            let text = cell_text(element);
            if !text.is_empty() {
                out.block(format!("{} {}", "#".repeat(level), text));
            }
        }
        "table" => out.table(element),
        "ul" | "ol" => out.block(render_list(element, name == "ol")),
        "pre" => {
            let code: String = element.text().collect();
            out.block(format!("```\n{}\n```", code.trim_end()));
        }
        "br" => out.line_break(),
        "li" | "tr" => {
            out.flush();
            walk(element, out);
            out.flush();
        }
        _ if BLOCKS.contains(&name) => {
            out.flush();
            walk(element, out);
            out.flush();
        }
        _ => walk(element, out),
    }
}

fn render_list(list: ElementRef<'_>, ordered: bool) -> String {
    list.children()
        .filter_map(ElementRef::wrap)
        .filter(|item| item.value().name() == "li")
        .map(cell_text)
        .filter(|text| !text.is_empty())
        .enumerate()
        .map(|(i, text)| {
            if ordered {
                format!("{}. {}", i + 1, text)
            } else {
                format!("- {}", text)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::TableExtractor;

    const REPORT: &str = r#"<!DOCTYPE html>
<html>
<head><title>Ignored</title><style>p { color: red; }</style></head>
<body>
  <p>Quarterly revenue is summarised below.</p>
  <table>
    <tr><th>Region</th><th>Revenue</th></tr>
    <tr><td>North</td><td>1200</td></tr>
    <tr><td>South</td><td>950</td></tr>
  </table>
  <p>Figures are unaudited.</p>
</body>
</html>"#;

    #[test]
    fn test_paragraph_table_paragraph() {
        let extraction = HtmlExtractor::new()
            .extract_markup(REPORT, Path::new("report.html"))
            .unwrap();

        assert_eq!(extraction.method, ExtractionMethod::Html);
        assert_eq!(extraction.tables.len(), 1);
        assert_eq!(extraction.tables[0].table_id, "report_table_1");
        assert!(extraction.tables[0].markup.starts_with("<table>"));

        assert_eq!(extraction.chunks.len(), 3);
        assert_eq!(extraction.table_positions, vec![1]);
        assert_eq!(extraction.chunks[0], "Quarterly revenue is summarised below.");
        assert_eq!(
            extraction.chunks[1],
            "| Region | Revenue |\n| --- | --- |\n| North | 1200 |\n| South | 950 |"
        );
        assert_eq!(extraction.chunks[2], "Figures are unaudited.");
        assert!(!extraction.flowed_text.contains("Ignored"));
        assert!(!extraction.flowed_text.contains("color"));
    }

    #[test]
    fn test_headings_and_lists() {
        let html = "<h2>Summary</h2><ul><li>one</li><li>two</li></ul><ol><li>first</li></ol>";
        let extraction = HtmlExtractor::new()
            .extract_markup(html, Path::new("notes.html"))
            .unwrap();
        assert_eq!(
            extraction.flowed_text,
            "## Summary\n\n- one\n- two\n\n1. first"
        );
        assert!(extraction.tables.is_empty());
        assert!(extraction.table_positions.is_empty());
    }

    #[test]
    fn test_inline_markup_keeps_word_spacing() {
        let html = "<p>Total <b>revenue</b> grew <i>fast</i>.</p>";
        let extraction = HtmlExtractor::new()
            .extract_markup(html, Path::new("x.html"))
            .unwrap();
        assert_eq!(extraction.flowed_text, "Total revenue grew fast.");
    }

    #[test]
    fn test_tables_align_with_positions() {
        let html = "<table><tr><td>a</td></tr></table><p>between</p>\
                    <table><tr><td>b</td></tr></table><table></table>";
        let extraction = HtmlExtractor::new()
            .extract_markup(html, Path::new("multi.html"))
            .unwrap();
        assert_eq!(extraction.tables.len(), 2);
        assert_eq!(extraction.table_positions.len(), 2);
        assert_eq!(extraction.tables[1].table_id, "multi_table_2");
    }

    #[test]
    fn test_pipe_lines_in_code_block_are_not_table_positions() {
        let html = "<pre>| a | b |\n| 1 | 2 |</pre><p>mid</p>\
                    <table><tr><th>x</th></tr><tr><td>9</td></tr></table><p>end</p>";
        let extraction = HtmlExtractor::new()
            .extract_markup(html, Path::new("code.html"))
            .unwrap();

        assert_eq!(extraction.tables.len(), 1);
        assert_eq!(extraction.chunks[1], "| a | b |\n| 1 | 2 |");
        assert_eq!(extraction.table_positions, vec![3]);
        assert_eq!(extraction.chunks[3], "| x |\n| --- |\n| 9 |");
    }

    #[test]
    fn test_nested_table_stays_in_parent() {
        let html = "<table><tr><td>outer</td><td>\
                    <table><tr><td>inner</td></tr></table></td></tr>\
                    <tr><td>a</td><td>b</td></tr></table>";
        let extraction = HtmlExtractor::new()
            .extract_markup(html, Path::new("nested.html"))
            .unwrap();
        assert_eq!(extraction.tables.len(), 1);
        assert!(extraction.tables[0].markup.contains("inner"));
        assert_eq!(extraction.table_positions.len(), 1);
    }

    #[test]
    fn test_extract_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.htm");
        std::fs::write(&path, REPORT).unwrap();

        let extractor = HtmlExtractor::new();
        assert!(extractor.supports(&path));
        let extraction = extractor.extract(&path).unwrap();
        assert_eq!(extraction.tables[0].table_id, "page_table_1");
    }
}
