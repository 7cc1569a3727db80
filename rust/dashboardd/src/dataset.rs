use crate::calendar::{AcademicYear, MonthBucket};
use crate::columns::{
    discover_item_columns, reserved_indices, resolve_fields, ColumnProfile, DiscoveryStage, Field,
    FieldMap, ItemColumn, Segment,
};
use crate::config::ColumnNames;
use crate::source::{self, Cell, RawTable};
use chrono::{DateTime, Days, NaiveDate, NaiveDateTime};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to load data from {}: {reason}", .path.display())]
    DataLoad { path: PathBuf, reason: String },
    #[error("schema error in {}: {reason}", .path.display())]
    Schema { path: PathBuf, reason: String },
}

impl LoadError {
    pub fn data_load(path: &Path, reason: impl Into<String>) -> Self {
        LoadError::DataLoad {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn schema(path: &Path, reason: impl Into<String>) -> Self {
        LoadError::Schema {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            LoadError::DataLoad { .. } => "data_load_failed",
            LoadError::Schema { .. } => "schema_error",
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            LoadError::DataLoad { path, .. } | LoadError::Schema { path, .. } => path,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub columns: ColumnNames,
    pub item_columns: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Source row number, for error messages.
    pub line: usize,
    pub date: NaiveDate,
    pub academic_year: AcademicYear,
    pub month: MonthBucket,
    pub district: Option<String>,
    pub school: Option<String>,
    pub teacher: Option<String>,
    pub segment_a: Option<f64>,
    pub segment_b: Option<f64>,
    /// Aligned with `Dataset::item_columns`.
    pub items: Vec<Option<f64>>,
}

impl Record {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            line: 0,
            date,
            academic_year: AcademicYear::from_date(date),
            month: MonthBucket::from_date(date),
            district: None,
            school: None,
            teacher: None,
            segment_a: None,
            segment_b: None,
            items: Vec::new(),
        }
    }

    pub fn text(&self, field: Field) -> Option<&str> {
        match field {
            Field::District => self.district.as_deref(),
            Field::School => self.school.as_deref(),
            Field::Teacher => self.teacher.as_deref(),
            Field::Date | Field::SegmentA | Field::SegmentB => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Dataset {
    pub source_path: PathBuf,
    /// Hex SHA-256 of the source bytes; empty for in-memory tables.
    pub fingerprint: String,
    pub headers: Vec<String>,
    pub fields: FieldMap,
    pub item_columns: Vec<ItemColumn>,
    pub discovery_stage: DiscoveryStage,
    pub records: Vec<Record>,
    pub notices: Vec<String>,
}

impl Dataset {
    pub fn has(&self, field: Field) -> bool {
        self.fields.get(field).is_some()
    }

    /// Header text used for `field` in the source.
    pub fn label(&self, field: Field) -> Option<&str> {
        self.fields
            .get(field)
            .and_then(|i| self.headers.get(i))
            .map(String::as_str)
    }

    pub fn item_index(&self, name: &str) -> Option<usize> {
        self.item_columns.iter().position(|c| c.name == name)
    }

    pub fn date_bounds(&self) -> Option<(NaiveDate, NaiveDate)> {
        let min = self.records.iter().map(|r| r.date).min()?;
        let max = self.records.iter().map(|r| r.date).max()?;
        Some((min, max))
    }

    pub fn row_count(&self) -> usize {
        self.records.len()
    }

    /// Builds a dataset from an already-read table. `path` only labels errors.
    pub fn from_table(
        path: &Path,
        table: &RawTable,
        options: &LoadOptions,
    ) -> Result<Self, LoadError> {
        let fields = resolve_fields(&table.headers, &options.columns);
        let Some(date_idx) = fields.get(Field::Date) else {
            let wanted = options.columns.date.as_deref().unwrap_or("date");
            return Err(LoadError::schema(
                path,
                format!("required column '{}' is missing", wanted),
            ));
        };

        let profiles: Vec<ColumnProfile> = table
            .headers
            .iter()
            .enumerate()
            .map(|(i, name)| ColumnProfile {
                name: name.clone(),
                numeric: column_is_numeric(table, i),
            })
            .collect();
        let reserved = reserved_indices(&profiles, &fields);
        let mut labels: Vec<(Segment, &str)> = Vec::new();
        for seg in [Segment::A, Segment::B] {
            if let Some(i) = fields.get(seg.field()) {
                labels.push((seg, table.headers[i].as_str()));
            }
        }
        let discovery = discover_item_columns(
            &profiles,
            &labels,
            &reserved,
            options.item_columns.as_deref(),
        );

        let mut notices = discovery.notices.clone();
        let mut invalid: Vec<(usize, usize)> = Vec::new();
        let mut bump_invalid = |col: usize| match invalid.iter_mut().find(|(c, _)| *c == col) {
            Some((_, n)) => *n += 1,
            None => invalid.push((col, 1)),
        };

        let mut records = Vec::with_capacity(table.rows.len());
        for row in &table.rows {
            let date_cell = table.cell(row, date_idx);
            let Some(date) = parse_date_cell(date_cell) else {
                return Err(LoadError::schema(
                    path,
                    format!(
                        "row {}: cannot parse date value '{}'",
                        row.line,
                        cell_display(date_cell)
                    ),
                ));
            };

            let mut rec = Record::new(date);
            rec.line = row.line;
            rec.district = fields
                .get(Field::District)
                .and_then(|i| cell_text(table.cell(row, i)));
            rec.school = fields
                .get(Field::School)
                .and_then(|i| cell_text(table.cell(row, i)));
            rec.teacher = fields
                .get(Field::Teacher)
                .and_then(|i| cell_text(table.cell(row, i)));

            let mut number_at = |col: usize| match cell_number(table.cell(row, col)) {
                NumberCell::Value(v) => Some(v),
                NumberCell::Absent => None,
                NumberCell::Invalid => {
                    bump_invalid(col);
                    None
                }
            };
            rec.segment_a = fields.get(Field::SegmentA).and_then(&mut number_at);
            rec.segment_b = fields.get(Field::SegmentB).and_then(&mut number_at);
            rec.items = discovery
                .items
                .iter()
                .map(|c| number_at(c.source_index))
                .collect();
            records.push(rec);
        }

        invalid.sort();
        for (col, n) in invalid {
            notices.push(format!(
                "column '{}': {} non-numeric value(s) treated as absent",
                table.headers[col], n
            ));
        }
        for field in fields.missing() {
            notices.push(format!(
                "recommended column '{}' is missing; dependent views are unavailable",
                field.key()
            ));
        }

        Ok(Self {
            source_path: path.to_path_buf(),
            fingerprint: String::new(),
            headers: table.headers.clone(),
            fields,
            item_columns: discovery.items,
            discovery_stage: discovery.stage,
            records,
            notices,
        })
    }
}

/// Reads, validates and normalizes the source file at `path`.
pub fn load_dataset(path: &Path, options: &LoadOptions) -> Result<Dataset, LoadError> {
    let bytes = source::read_source(path)?;
    let table = source::read_table(path, &bytes)?;
    let mut dataset = Dataset::from_table(path, &table, options)?;
    dataset.fingerprint = sha256_hex(&bytes);
    Ok(dataset)
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

// Excel counts 1900-02-29 as serial 60. Serials from 61 on are offset from
// 1899-12-30, earlier ones from 1899-12-31; 60 itself names no real day.
fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 1.0 || serial >= 2_958_466.0 {
        return None;
    }
    let days = serial.floor() as u64;
    let epoch = match days {
        60 => return None,
        d if d < 60 => NaiveDate::from_ymd_opt(1899, 12, 31)?,
        _ => NaiveDate::from_ymd_opt(1899, 12, 30)?,
    };
    epoch.checked_add_days(Days::new(days))
}

pub fn parse_date_text(raw: &str) -> Option<NaiveDate> {
    let t = raw.trim();
    for fmt in ["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(t, fmt) {
            return Some(d);
        }
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y/%m/%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(t, fmt) {
            return Some(dt.date());
        }
    }
    DateTime::parse_from_rfc3339(t).ok().map(|dt| dt.date_naive())
}

fn parse_date_cell(cell: &Cell) -> Option<NaiveDate> {
    match cell {
        Cell::DateTime(dt) => Some(dt.date()),
        Cell::Number(n) => excel_serial_to_date(*n),
        Cell::Text(s) => parse_date_text(s),
        Cell::Empty | Cell::Bool(_) => None,
    }
}

fn cell_display(cell: &Cell) -> String {
    match cell {
        Cell::Empty => String::new(),
        Cell::Text(s) => s.clone(),
        Cell::Number(n) => format_number(*n),
        Cell::Bool(b) => b.to_string(),
        Cell::DateTime(dt) => dt.to_string(),
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn cell_text(cell: &Cell) -> Option<String> {
    match cell {
        Cell::Empty => None,
        Cell::DateTime(dt) => Some(dt.date().to_string()),
        other => Some(cell_display(other)),
    }
}

enum NumberCell {
    Absent,
    Value(f64),
    Invalid,
}

fn cell_number(cell: &Cell) -> NumberCell {
    match cell {
        Cell::Empty => NumberCell::Absent,
        Cell::Number(n) if n.is_finite() => NumberCell::Value(*n),
        Cell::Text(s) => match s.replace(',', "").trim().parse::<f64>() {
            Ok(v) if v.is_finite() => NumberCell::Value(v),
            _ => NumberCell::Invalid,
        },
        _ => NumberCell::Invalid,
    }
}

fn column_is_numeric(table: &RawTable, col: usize) -> bool {
    let mut seen = false;
    for row in &table.rows {
        match cell_number(table.cell(row, col)) {
            NumberCell::Absent => {}
            NumberCell::Value(_) => seen = true,
            NumberCell::Invalid => return false,
        }
    }
    seen
}
