use crate::dataset::LoadError;
use calamine::{open_workbook_auto_from_rs, Data, DataType, Reader};
use chrono::NaiveDateTime;
use csv::ReaderBuilder;
use std::io::{Cursor, Read};
use std::path::Path;

/// One untyped cell as read from the source file. Text is already trimmed.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    DateTime(NaiveDateTime),
}

impl Cell {
    pub fn is_empty(&self) -> bool {
        matches!(self, Cell::Empty)
    }

    fn from_text(raw: &str) -> Self {
        let t = raw.trim();
        if t.is_empty() {
            Cell::Empty
        } else {
            Cell::Text(t.to_string())
        }
    }
}

#[derive(Debug, Clone)]
pub struct RawRow {
    /// 1-based line/row number in the source, header included.
    pub line: usize,
    pub cells: Vec<Cell>,
}

#[derive(Debug, Clone)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
}

impl RawTable {
    pub fn cell<'a>(&self, row: &'a RawRow, col: usize) -> &'a Cell {
        row.cells.get(col).unwrap_or(&Cell::Empty)
    }

    /// Parses CSV text with a header row. Used for `.csv` sources and by tests.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, String> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);
        let headers = rdr
            .headers()
            .map_err(|e| e.to_string())?
            .iter()
            .enumerate()
            .map(|(i, h)| header_name(h.trim_start_matches('\u{feff}'), i))
            .collect::<Vec<_>>();

        let mut rows = Vec::new();
        for (i, rec) in rdr.records().enumerate() {
            let rec = rec.map_err(|e| e.to_string())?;
            let cells: Vec<Cell> = rec.iter().map(Cell::from_text).collect();
            push_row(&mut rows, i + 2, cells);
        }
        Ok(Self { headers, rows })
    }
}

fn header_name(raw: &str, idx: usize) -> String {
    let t = raw.trim();
    if t.is_empty() {
        format!("column_{}", idx + 1)
    } else {
        t.to_string()
    }
}

fn push_row(rows: &mut Vec<RawRow>, line: usize, cells: Vec<Cell>) {
    if cells.iter().all(Cell::is_empty) {
        return;
    }
    rows.push(RawRow { line, cells });
}

fn workbook_cell(cell: &Data) -> Cell {
    match cell {
        Data::Empty => Cell::Empty,
        Data::String(s) => Cell::from_text(s),
        Data::Float(f) => Cell::Number(*f),
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Bool(b) => Cell::Bool(*b),
        Data::DateTime(_) | Data::DateTimeIso(_) => match cell.as_datetime() {
            Some(dt) => Cell::DateTime(dt),
            None => Cell::from_text(&cell.to_string()),
        },
        other => Cell::from_text(&other.to_string()),
    }
}

fn read_workbook(path: &Path, bytes: &[u8]) -> Result<RawTable, LoadError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
        .map_err(|e| LoadError::data_load(path, e.to_string()))?;
    let Some(sheet) = workbook.sheet_names().first().cloned() else {
        return Err(LoadError::data_load(path, "workbook has no worksheets"));
    };
    let range = workbook
        .worksheet_range(&sheet)
        .map_err(|e| LoadError::data_load(path, format!("sheet '{}': {}", sheet, e)))?;

    // Range coordinates are relative to the first used cell.
    let first_line = range.start().map(|(r, _)| r as usize + 1).unwrap_or(1);
    let mut it = range.rows();
    let Some(header_row) = it.next() else {
        return Err(LoadError::data_load(path, format!("sheet '{}' is empty", sheet)));
    };
    let headers = header_row
        .iter()
        .enumerate()
        .map(|(i, c)| header_name(&c.to_string(), i))
        .collect::<Vec<_>>();

    let mut rows = Vec::new();
    for (i, row) in it.enumerate() {
        let cells = row.iter().map(workbook_cell).collect();
        push_row(&mut rows, first_line + i + 1, cells);
    }
    Ok(RawTable { headers, rows })
}

/// Reads the whole source file. The loader parses and fingerprints these
/// same bytes.
pub fn read_source(path: &Path) -> Result<Vec<u8>, LoadError> {
    if !path.is_file() {
        return Err(LoadError::data_load(path, "file not found"));
    }
    std::fs::read(path).map_err(|e| LoadError::data_load(path, e.to_string()))
}

/// Parses the first sheet (or the CSV body) of a source read from `path`.
/// The extension of `path` picks the format.
pub fn read_table(path: &Path, bytes: &[u8]) -> Result<RawTable, LoadError> {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "csv" => RawTable::from_csv_reader(bytes).map_err(|e| LoadError::data_load(path, e)),
        "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => read_workbook(path, bytes),
        other => Err(LoadError::data_load(
            path,
            format!("unsupported file extension '{}'", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_headers_are_trimmed_and_blank_rows_skipped() {
        let text = "\u{feff} date , school ,\n2024-09-01, Alder ,3\n,,\n2024-09-02,Birch,\n";
        let t = RawTable::from_csv_reader(text.as_bytes()).expect("csv");
        assert_eq!(t.headers, vec!["date", "school", "column_3"]);
        assert_eq!(t.rows.len(), 2);
        assert_eq!(t.rows[0].line, 2);
        assert_eq!(t.rows[1].line, 4);
        assert_eq!(t.rows[0].cells[1], Cell::Text("Alder".into()));
        assert_eq!(t.cell(&t.rows[1], 2), &Cell::Empty);
        assert_eq!(t.cell(&t.rows[1], 9), &Cell::Empty);
    }

    #[test]
    fn missing_file_and_unknown_extension_are_load_errors() {
        let missing = read_source(Path::new("/definitely/not/here/data_total.xlsx"))
            .expect_err("missing file");
        assert_eq!(missing.code(), "data_load_failed");
        assert!(missing.to_string().contains("data_total.xlsx"));

        let manifest = Path::new(env!("CARGO_MANIFEST_DIR")).join("Cargo.toml");
        let bytes = read_source(&manifest).expect("read manifest");
        let unsupported = read_table(&manifest, &bytes).expect_err("toml is not a table");
        assert!(unsupported.to_string().contains("unsupported file extension"));
    }
}
