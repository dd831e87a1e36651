//! Rectangular cell grids built from HTML tables.

use scraper::{ElementRef, Html, Selector};

use super::ExtractError;

/// Upper bound for `colspan`/`rowspan` attributes.
const MAX_SPAN: usize = 1000;

/// A table as a rectangle of cell texts.
///
/// Spanning cells are repeated into every position they cover, so every
/// row has the same width.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Grid {
    pub rows: Vec<Vec<String>>,
    /// Number of leading rows marked up as column headers.
    pub header_rows: usize,
}

impl Grid {
    /// Build a grid from rows of cells, padding short rows with empty cells.
    pub fn new(mut rows: Vec<Vec<String>>, header_rows: usize) -> Self {
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        for row in &mut rows {
            row.resize(width, String::new());
        }
        let header_rows = header_rows.min(rows.len());
        Self { rows, header_rows }
    }

    /// Parse the first `<table>` element found in a markup fragment.
    pub fn from_markup(markup: &str) -> Result<Self, ExtractError> {
        let fragment = Html::parse_fragment(markup);
        let selector = Selector::parse("table")
            .map_err(|e| ExtractError::Parse(format!("invalid selector: {e}")))?;
        let table = fragment
            .select(&selector)
            .next()
            .ok_or_else(|| ExtractError::Parse("no table element in markup".to_string()))?;
        Ok(Self::from_table(table))
    }

    /// Build a grid from a `<table>` element, ignoring rows of nested tables.
    pub fn from_table(table: ElementRef<'_>) -> Self {
        let rows = table_rows(table);

        let mut cells: Vec<Vec<Option<String>>> = vec![Vec::new(); rows.len()];
        let mut has_cells = vec![false; rows.len()];
        let mut all_header = vec![true; rows.len()];

        for (r, (row, _)) in rows.iter().enumerate() {
            let mut col = 0;
            for cell in row_cells(*row) {
                has_cells[r] = true;
                if cell.value().name() != "th" {
                    all_header[r] = false;
                }
                while cells[r].get(col).is_some_and(Option::is_some) {
                    col += 1;
                }

                let text = cell_text(cell);
                let colspan = span_attr(cell, "colspan");
                let rowspan = span_attr(cell, "rowspan");
                for target in cells.iter_mut().skip(r).take(rowspan) {
                    if target.len() < col + colspan {
                        target.resize(col + colspan, None);
                    }
                    for slot in &mut target[col..col + colspan] {
                        *slot = Some(text.clone());
                    }
                }
                col += colspan;
            }
        }

        let mut header_rows = 0;
        let mut in_thead_prefix = true;
        let mut th_prefix = true;
        let mut thead_rows = 0;
        let mut th_rows = 0;
        let mut grid_rows = Vec::new();

        for (r, line) in cells.into_iter().enumerate() {
            if !has_cells[r] && line.iter().all(Option::is_none) {
                continue;
            }
            let in_thead = rows[r].1;
            if in_thead_prefix && in_thead {
                thead_rows += 1;
            } else {
                in_thead_prefix = false;
            }
            if th_prefix && has_cells[r] && all_header[r] {
                th_rows += 1;
            } else {
                th_prefix = false;
            }
            grid_rows.push(line.into_iter().map(Option::unwrap_or_default).collect());
        }

        if thead_rows > 0 {
            header_rows = thead_rows;
        } else if th_rows > 0 {
            header_rows = th_rows;
        }

        Self::new(grid_rows, header_rows)
    }

    pub fn width(&self) -> usize {
        self.rows.first().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() || self.width() == 0
    }

    /// Render as a pipe table with the first row as header.
    pub fn to_pipe_table(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        let mut lines = Vec::with_capacity(self.rows.len() + 1);
        for (i, row) in self.rows.iter().enumerate() {
            lines.push(pipe_row(row));
            if i == 0 {
                lines.push(format!("|{}", " --- |".repeat(self.width())));
            }
        }
        lines.join("\n")
    }

    /// Render as an HTML table; header rows (at least one) go into `<thead>`.
    pub fn to_html(&self) -> String {
        let header_rows = self.header_rows.max(1).min(self.rows.len());
        let mut html = String::from("<table>\n<thead>\n");
        for row in &self.rows[..header_rows] {
            html.push_str(&html_row(row, "th"));
        }
        html.push_str("</thead>\n<tbody>\n");
        for row in &self.rows[header_rows..] {
            html.push_str(&html_row(row, "td"));
        }
        html.push_str("</tbody>\n</table>");
        html
    }
}

/// Rows that belong to this table, paired with whether they sit in `<thead>`.
fn table_rows(table: ElementRef<'_>) -> Vec<(ElementRef<'_>, bool)> {
    let mut rows = Vec::new();
    for child in table.children().filter_map(ElementRef::wrap) {
        match child.value().name() {
            "tr" => rows.push((child, false)),
            section @ ("thead" | "tbody" | "tfoot") => rows.extend(
                child
                    .children()
                    .filter_map(ElementRef::wrap)
                    .filter(|row| row.value().name() == "tr")
                    .map(|row| (row, section == "thead")),
            ),
            _ => {}
        }
    }
    rows
}

fn row_cells(row: ElementRef<'_>) -> impl Iterator<Item = ElementRef<'_>> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|cell| matches!(cell.value().name(), "td" | "th"))
}

fn span_attr(cell: ElementRef<'_>, name: &str) -> usize {
    cell.value()
        .attr(name)
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(1)
        .clamp(1, MAX_SPAN)
}

/// Text content of an element with whitespace runs collapsed.
pub(crate) fn cell_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn pipe_row(cells: &[String]) -> String {
    let escaped: Vec<String> = cells.iter().map(|c| c.replace('|', "\\|")).collect();
    format!("| {} |", escaped.join(" | "))
}

fn html_row(cells: &[String], tag: &str) -> String {
    let mut row = String::from("<tr>");
    for cell in cells {
        row.push_str(&format!(
            "<{tag}>{}</{tag}>",
            html_escape::encode_text(cell)
        ));
    }
    row.push_str("</tr>\n");
    row
}
