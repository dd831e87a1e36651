//! Chunk segmentation of flowed text.
//!
//! A line is table syntax when, trimmed, it starts and ends with `|`.
//! While inside a table chunk, separator-only lines (`|`, `-`, `:` and
//! whitespace) stay in the chunk; any other line closes it.
//!
//! Prose can contain lines that look like table rows (code blocks, ASCII
//! art), so extractors build their flowed text with [`FlowDocument`], which
//! records where each rendered table starts. Only chunks that begin at one
//! of those offsets are table positions.

use super::grid::Grid;

/// Whether a line looks like a pipe-table row.
pub fn is_table_row(line: &str) -> bool {
    let line = line.trim();
    line.len() >= 2 && line.starts_with('|') && line.ends_with('|')
}

/// Whether a line consists only of header/body divider characters.
pub fn is_separator(line: &str) -> bool {
    let line = line.trim();
    !line.is_empty()
        && line
            .chars()
            .all(|c| c == '|' || c == '-' || c == ':' || c.is_whitespace())
}

/// Divider line of a pipe table, e.g. `| --- | :-: |`.
fn is_divider_row(line: &str) -> bool {
    is_separator(line) && line.contains('-')
}

/// Flowed text assembled block by block.
///
/// Blocks are separated by a blank line, so a table block always starts a
/// chunk of its own.
#[derive(Debug, Default, Clone)]
pub struct FlowDocument {
    text: String,
    table_offsets: Vec<usize>,
}

impl FlowDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a block of prose. Blank blocks are ignored.
    pub fn push_prose(&mut self, block: &str) {
        self.push(block, false);
    }

    /// Append a rendered pipe table. Blank blocks are ignored.
    pub fn push_table(&mut self, block: &str) {
        self.push(block, true);
    }

    fn push(&mut self, block: &str, table: bool) {
        if block.trim().is_empty() {
            return;
        }
        if !self.text.is_empty() {
            self.text.push_str("\n\n");
        }
        if table {
            self.table_offsets.push(self.text.len());
        }
        self.text.push_str(block);
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Byte offsets of the rendered tables, in document order.
    pub fn table_offsets(&self) -> &[usize] {
        &self.table_offsets
    }

    pub fn into_parts(self) -> (String, Vec<usize>) {
        (self.text, self.table_offsets)
    }
}

/// Split flowed text into alternating prose and table chunks.
///
/// Chunks are trimmed and empty chunks are dropped.
pub fn split_into_chunks(text: &str) -> Vec<String> {
    chunk_spans(text).into_iter().map(|(_, chunk)| chunk).collect()
}

/// [`split_into_chunks`] with the byte offset at which each trimmed chunk
/// starts in `text`.
pub fn chunk_spans(text: &str) -> Vec<(usize, String)> {
    let mut chunks = Vec::new();
    let mut current: Vec<(usize, &str)> = Vec::new();
    let mut in_table = false;

    for (offset, line) in lines_with_offsets(text) {
        if is_table_row(line) {
            if !in_table {
                push_chunk(&mut chunks, &mut current);
                in_table = true;
            }
            current.push((offset, line));
        } else if in_table {
            if is_separator(line) {
                current.push((offset, line));
            } else {
                push_chunk(&mut chunks, &mut current);
                in_table = false;
                current.push((offset, line));
            }
        } else {
            current.push((offset, line));
        }
    }
    push_chunk(&mut chunks, &mut current);

    chunks
}

/// Lines as `str::lines` yields them, each with its starting byte offset.
fn lines_with_offsets(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.split_inclusive('\n').scan(0, |offset, raw| {
        let start = *offset;
        *offset += raw.len();
        let line = raw.strip_suffix('\n').unwrap_or(raw);
        let line = line.strip_suffix('\r').unwrap_or(line);
        Some((start, line))
    })
}

fn push_chunk(chunks: &mut Vec<(usize, String)>, lines: &mut Vec<(usize, &str)>) {
    let start = lines
        .iter()
        .find(|(_, line)| !line.trim().is_empty())
        .map(|(offset, line)| offset + (line.len() - line.trim_start().len()));
    if let Some(start) = start {
        let joined = lines.iter().map(|(_, line)| *line).collect::<Vec<_>>().join("\n");
        chunks.push((start, joined.trim().to_string()));
    }
    lines.clear();
}

/// Indices of the chunks where more than half of the non-blank lines are table rows.
pub fn table_chunk_positions(chunks: &[String]) -> Vec<usize> {
    chunks
        .iter()
        .enumerate()
        .filter(|(_, chunk)| {
            let (rows, lines) = chunk
                .lines()
                .filter(|line| !line.trim().is_empty())
                .fold((0usize, 0usize), |(rows, lines), line| {
                    (rows + usize::from(is_table_row(line)), lines + 1)
                });
            lines > 0 && rows * 2 > lines
        })
        .map(|(index, _)| index)
        .collect()
}

/// Parse every run of pipe-table lines in `text` into a grid.
///
/// Divider rows are skipped. A run needs a header and at least one data
/// row to count as a table; the first row becomes the header.
pub fn parse_pipe_tables(text: &str) -> Vec<Grid> {
    let mut tables = Vec::new();
    let mut run: Vec<Vec<String>> = Vec::new();

    for line in text.lines() {
        if is_table_row(line) {
            if !is_divider_row(line) {
                run.push(split_pipe_row(line));
            }
        } else {
            finish_run(&mut tables, &mut run);
        }
    }
    finish_run(&mut tables, &mut run);

    tables
}

fn finish_run(tables: &mut Vec<Grid>, run: &mut Vec<Vec<String>>) {
    if run.len() >= 2 {
        tables.push(Grid::new(std::mem::take(run), 1));
    }
    run.clear();
}

/// Split one pipe-table row into trimmed cells, honoring `\|` escapes.
pub fn split_pipe_row(line: &str) -> Vec<String> {
    let inner = line.trim();
    let inner = inner.strip_prefix('|').unwrap_or(inner);
    let inner = inner.strip_suffix('|').unwrap_or(inner);

    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'|') => {
                cell.push('|');
                chars.next();
            }
            '|' => cells.push(std::mem::take(&mut cell).trim().to_string()),
            _ => cell.push(c),
        }
    }
    cells.push(cell.trim().to_string());
    cells
}
