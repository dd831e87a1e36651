//! Spreadsheet table extraction.
//!
//! Each sheet goes down a three-step ladder on its own: rectangular regions
//! inside the sheet, then pipe-table runs in a markdown rendering of it, then
//! the whole sheet as one table. Cells that end up in no table are kept in
//! the flowed text as prose.

use std::collections::HashSet;
use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use tracing::{debug, info};

use super::flow::{parse_pipe_tables, FlowDocument};
use super::grid::Grid;
use super::{document_stem, table_id, ExtractError, Extraction, ExtractionMethod, TableExtractor};
use crate::models::RawTable;

/// Cell values of one worksheet, row-major.
type Cells = Vec<Vec<String>>;

/// Content of a sheet in reading order.
enum SheetBlock {
    Table(Cells),
    /// Cells that did not form a table.
    Note(Cells),
}

/// How one sheet was read.
struct SheetScan {
    method: ExtractionMethod,
    blocks: Vec<SheetBlock>,
}

impl SheetScan {
    fn table_count(&self) -> usize {
        self.blocks
            .iter()
            .filter(|block| matches!(block, SheetBlock::Table(_)))
            .count()
    }
}

/// Extracts tables from spreadsheet workbooks.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpreadsheetExtractor;

impl SpreadsheetExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract tables from already-loaded sheets.
    ///
    /// The reported method is the most degraded step any sheet needed.
    pub fn extract_sheets(
        &self,
        sheets: &[(String, Cells)],
        source: &Path,
    ) -> Result<Extraction, ExtractError> {
        let stem = document_stem(source);
        let mut method = ExtractionMethod::SheetRegions;
        let mut tables = Vec::new();
        let mut flowed = FlowDocument::new();

        for (sheet, cells) in sheets {
            let Some(scan) = scan_sheet(sheet, cells) else {
                continue;
            };
            debug!(
                "Sheet {}: {} tables via {:?}",
                sheet,
                scan.table_count(),
                scan.method
            );
            method = method.max(scan.method);

            let single = scan.table_count() == 1;
            let kind = match scan.method {
                ExtractionMethod::SheetMarkdown => "block",
                _ => "region",
            };
            let mut ordinal = 0;

            flowed.push_prose(&format!("## {}", sheet));
            for block in scan.blocks {
                match block {
                    SheetBlock::Table(rows) => {
                        ordinal += 1;
                        let Some(grid) = clean_table(rows) else {
                            continue;
                        };
                        let label = if single {
                            sheet.clone()
                        } else {
                            format!("{} ({} {})", sheet, kind, ordinal)
                        };
                        let index = tables.len();
                        tables.push(RawTable {
                            table_id: table_id(&stem, index),
                            index,
                            markup: grid.to_html(),
                            label: Some(label),
                        });
                        flowed.push_table(&grid.to_pipe_table());
                    }
                    SheetBlock::Note(rows) => flowed.push_prose(&note_text(&rows)),
                }
            }
        }

        if tables.is_empty() {
            method = ExtractionMethod::WholeSheets;
        }
        info!(
            "Found {} tables in {} using {:?}",
            tables.len(),
            source.display(),
            method
        );
        Ok(Extraction::from_document(source, method, tables, flowed))
    }
}

impl TableExtractor for SpreadsheetExtractor {
    fn name(&self) -> &'static str {
        "spreadsheet"
    }

    fn extensions(&self) -> &[&'static str] {
        &["xlsx", "xlsm", "xlsb", "xls", "ods"]
    }

    fn extract(&self, path: &Path) -> Result<Extraction, ExtractError> {
        let mut workbook =
            open_workbook_auto(path).map_err(|e| ExtractError::Spreadsheet(e.to_string()))?;

        let sheets: Vec<(String, Cells)> = workbook
            .worksheets()
            .into_iter()
            .map(|(name, range)| {
                let cells = range
                    .rows()
                    .map(|row| row.iter().map(cell_to_string).collect())
                    .collect();
                (name, cells)
            })
            .collect();

        debug!("Loaded {} sheets from {}", sheets.len(), path.display());
        self.extract_sheets(&sheets, path)
    }
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(datetime) => datetime.to_string(),
            None => dt.as_f64().to_string(),
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(e) => format!("#{e:?}"),
    }
}

/// Run the ladder on one sheet. Blank sheets give `None`.
fn scan_sheet(sheet: &str, cells: &Cells) -> Option<SheetScan> {
    if is_blank(cells) {
        return None;
    }

    let blocks = structured_regions(cells);
    if has_table(&blocks) {
        return Some(SheetScan {
            method: ExtractionMethod::SheetRegions,
            blocks,
        });
    }

    let blocks = markdown_runs(cells);
    if has_table(&blocks) {
        debug!("No structured regions in {}, using markdown runs", sheet);
        return Some(SheetScan {
            method: ExtractionMethod::SheetMarkdown,
            blocks,
        });
    }

    debug!("No table runs in {}, using the whole sheet", sheet);
    Some(SheetScan {
        method: ExtractionMethod::WholeSheets,
        blocks: vec![SheetBlock::Table(cells.clone())],
    })
}

fn has_table(blocks: &[SheetBlock]) -> bool {
    blocks
        .iter()
        .any(|block| matches!(block, SheetBlock::Table(_)))
}

fn is_blank(cells: &Cells) -> bool {
    cells.iter().flatten().all(|cell| cell.trim().is_empty())
}

fn row_is_empty(row: &[String]) -> bool {
    row.iter().all(|cell| cell.trim().is_empty())
}

/// Maximal runs of non-empty rows, as half-open index ranges.
fn row_bands(cells: &Cells) -> Vec<(usize, usize)> {
    let mut bands = Vec::new();
    let mut start = None;
    for (i, row) in cells.iter().enumerate() {
        match (row_is_empty(row), start) {
            (false, None) => start = Some(i),
            (true, Some(s)) => {
                bands.push((s, i));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        bands.push((s, cells.len()));
    }
    bands
}

/// Rectangular blocks separated by empty rows and columns. Blocks of at
/// least two rows and two columns are tables; smaller ones are notes.
fn structured_regions(cells: &Cells) -> Vec<SheetBlock> {
    let width = cells.iter().map(Vec::len).max().unwrap_or(0);
    let mut blocks = Vec::new();

    for (top, bottom) in row_bands(cells) {
        let band = &cells[top..bottom];
        let column_used: Vec<bool> = (0..width)
            .map(|c| {
                band.iter()
                    .any(|row| row.get(c).is_some_and(|cell| !cell.trim().is_empty()))
            })
            .collect();

        let mut c = 0;
        while c < width {
            if !column_used[c] {
                c += 1;
                continue;
            }
            let left = c;
            while c < width && column_used[c] {
                c += 1;
            }
            let rows: Cells = band
                .iter()
                .map(|row| {
                    (left..c)
                        .map(|col| row.get(col).cloned().unwrap_or_default())
                        .collect::<Vec<_>>()
                })
                .filter(|row| !row_is_empty(row))
                .collect();

            if rows.len() >= 2 && c - left >= 2 {
                blocks.push(SheetBlock::Table(rows));
            } else {
                blocks.push(SheetBlock::Note(rows));
            }
        }
    }

    blocks
}

/// Render each band of rows as a pipe table and re-parse it.
fn markdown_runs(cells: &Cells) -> Vec<SheetBlock> {
    let mut blocks = Vec::new();
    for (top, bottom) in row_bands(cells) {
        let band = &cells[top..bottom];
        let markdown = Grid::new(band.to_vec(), 1).to_pipe_table();
        let found = parse_pipe_tables(&markdown);
        if found.is_empty() {
            blocks.push(SheetBlock::Note(band.to_vec()));
        } else {
            blocks.extend(found.into_iter().map(|grid| SheetBlock::Table(grid.rows)));
        }
    }
    blocks
}

/// Plain-text rendering of cells that did not form a table.
fn note_text(rows: &Cells) -> String {
    rows.iter()
        .map(|row| {
            row.iter()
                .map(|cell| cell.trim())
                .filter(|cell| !cell.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Drop empty rows and columns, name blank or duplicate headers
/// `Column_N`, and fill missing cells with empty strings.
fn clean_table(rows: Cells) -> Option<Grid> {
    let rows: Cells = rows
        .into_iter()
        .map(|row| row.into_iter().map(|cell| cell.trim().to_string()).collect())
        .filter(|row: &Vec<String>| !row_is_empty(row))
        .collect();
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);

    let keep: Vec<usize> = (0..width)
        .filter(|&c| rows.iter().any(|row| row.get(c).is_some_and(|v| !v.is_empty())))
        .collect();
    if rows.is_empty() || keep.is_empty() {
        return None;
    }

    let mut rows: Cells = rows
        .into_iter()
        .map(|row| {
            keep.iter()
                .map(|&c| row.get(c).cloned().unwrap_or_default())
                .collect()
        })
        .collect();

    let mut seen = HashSet::new();
    for (i, name) in rows[0].iter_mut().enumerate() {
        if name.is_empty() || name.starts_with("Unnamed:") || !seen.insert(name.clone()) {
            *name = format!("Column_{}", i + 1);
            seen.insert(name.clone());
        }
    }

    Some(Grid::new(rows, 1))
}
