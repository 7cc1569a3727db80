use crate::calendar::{AcademicYear, MonthBucket};
use crate::columns::Field;
use crate::dataset::{Dataset, Record};
use crate::filter::FilteredView;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregateError {
    #[error("column '{0}' is not available in this dataset")]
    MissingColumn(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKey {
    MonthBucket,
    AcademicYear,
    District,
    School,
    Teacher,
}

impl GroupKey {
    pub fn key(self) -> &'static str {
        match self {
            GroupKey::MonthBucket => "month_bucket",
            GroupKey::AcademicYear => "academic_year",
            GroupKey::District => "district",
            GroupKey::School => "school",
            GroupKey::Teacher => "teacher",
        }
    }

    fn entity_field(self) -> Option<Field> {
        match self {
            GroupKey::District => Some(Field::District),
            GroupKey::School => Some(Field::School),
            GroupKey::Teacher => Some(Field::Teacher),
            GroupKey::MonthBucket | GroupKey::AcademicYear => None,
        }
    }

    fn value_of(self, rec: &Record) -> Option<GroupValue> {
        match self {
            GroupKey::MonthBucket => Some(GroupValue::Month(rec.month)),
            GroupKey::AcademicYear => Some(GroupValue::AcademicYear(rec.academic_year)),
            other => other
                .entity_field()
                .and_then(|f| rec.text(f))
                .map(|s| GroupValue::Text(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupValue {
    Month(MonthBucket),
    AcademicYear(AcademicYear),
    Text(String),
}

impl fmt::Display for GroupValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupValue::Month(m) => fmt::Display::fmt(m, f),
            GroupValue::AcademicYear(y) => fmt::Display::fmt(y, f),
            GroupValue::Text(s) => f.write_str(s),
        }
    }
}

impl Serialize for GroupValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueColumn {
    SegmentA,
    SegmentB,
    Item(String),
}

impl ValueColumn {
    pub fn key(&self) -> &str {
        match self {
            ValueColumn::SegmentA => "segment_a",
            ValueColumn::SegmentB => "segment_b",
            ValueColumn::Item(name) => name,
        }
    }

    /// Accepts the canonical segment keys, the source header text of a
    /// segment, or an item column name.
    pub fn resolve(dataset: &Dataset, name: &str) -> Option<Self> {
        let t = name.trim();
        if t == "segment_a" || dataset.label(Field::SegmentA) == Some(t) {
            return Some(ValueColumn::SegmentA);
        }
        if t == "segment_b" || dataset.label(Field::SegmentB) == Some(t) {
            return Some(ValueColumn::SegmentB);
        }
        dataset
            .item_index(t)
            .map(|_| ValueColumn::Item(t.to_string()))
    }

    /// Display text for charts: the header the source used.
    pub fn label<'a>(&'a self, dataset: &'a Dataset) -> &'a str {
        match self {
            ValueColumn::SegmentA => dataset.label(Field::SegmentA).unwrap_or("segment_a"),
            ValueColumn::SegmentB => dataset.label(Field::SegmentB).unwrap_or("segment_b"),
            ValueColumn::Item(name) => name,
        }
    }

    fn accessor(&self, dataset: &Dataset) -> Result<Accessor, AggregateError> {
        let missing = || AggregateError::MissingColumn(self.key().to_string());
        match self {
            ValueColumn::SegmentA if dataset.has(Field::SegmentA) => Ok(Accessor::SegmentA),
            ValueColumn::SegmentB if dataset.has(Field::SegmentB) => Ok(Accessor::SegmentB),
            ValueColumn::Item(name) => dataset.item_index(name).map(Accessor::Item).ok_or_else(missing),
            _ => Err(missing()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Accessor {
    SegmentA,
    SegmentB,
    Item(usize),
}

impl Accessor {
    fn read(self, rec: &Record) -> Option<f64> {
        match self {
            Accessor::SegmentA => rec.segment_a,
            Accessor::SegmentB => rec.segment_b,
            Accessor::Item(i) => rec.items.get(i).copied().flatten(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregationRequest {
    pub group_keys: Vec<GroupKey>,
    pub value_columns: Vec<ValueColumn>,
}

impl AggregationRequest {
    pub fn new(group_keys: Vec<GroupKey>, value_columns: Vec<ValueColumn>) -> Self {
        Self {
            group_keys,
            value_columns,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRow {
    pub key: Vec<GroupValue>,
    /// Aligned with `Aggregation::value_columns`.
    pub sums: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub group_keys: Vec<GroupKey>,
    pub value_columns: Vec<ValueColumn>,
    pub rows: Vec<AggregateRow>,
}

impl Aggregation {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Flat JSON rows keyed by group key and value column names.
    pub fn to_json_rows(&self) -> Vec<Value> {
        self.rows
            .iter()
            .map(|row| {
                let mut obj = Map::new();
                for (k, v) in self.group_keys.iter().zip(&row.key) {
                    obj.insert(k.key().to_string(), Value::String(v.to_string()));
                }
                for (c, s) in self.value_columns.iter().zip(&row.sums) {
                    obj.insert(c.key().to_string(), json_number(*s));
                }
                Value::Object(obj)
            })
            .collect()
    }
}

pub fn json_number(v: f64) -> Value {
    if v.fract() == 0.0 && v.abs() < 9.0e15 {
        Value::from(v as i64)
    } else {
        serde_json::Number::from_f64(v)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

/// Groups `view` by `request.group_keys` and sums each value column.
///
/// Rows lacking an entity key value are left out. Output is ordered by the
/// time components chronologically, then by first occurrence of each entity
/// value in the view.
pub fn aggregate(
    view: &FilteredView<'_>,
    request: &AggregationRequest,
) -> Result<Aggregation, AggregateError> {
    let dataset = view.dataset();
    for key in &request.group_keys {
        if let Some(field) = key.entity_field() {
            if !dataset.has(field) {
                return Err(AggregateError::MissingColumn(key.key().to_string()));
            }
        }
    }
    let accessors = request
        .value_columns
        .iter()
        .map(|c| c.accessor(dataset))
        .collect::<Result<Vec<_>, _>>()?;

    let mut index: HashMap<Vec<GroupValue>, usize> = HashMap::new();
    let mut rows: Vec<AggregateRow> = Vec::new();
    // First-occurrence rank of each entity value, per key position.
    let mut first_seen: Vec<HashMap<String, usize>> = vec![HashMap::new(); request.group_keys.len()];

    for rec in view.records() {
        let Some(key) = request
            .group_keys
            .iter()
            .map(|k| k.value_of(rec))
            .collect::<Option<Vec<_>>>()
        else {
            continue;
        };
        for (pos, v) in key.iter().enumerate() {
            if let GroupValue::Text(s) = v {
                let seen = &mut first_seen[pos];
                if !seen.contains_key(s) {
                    let rank = seen.len();
                    seen.insert(s.clone(), rank);
                }
            }
        }
        let slot = match index.get(&key) {
            Some(i) => *i,
            None => {
                index.insert(key.clone(), rows.len());
                rows.push(AggregateRow {
                    key,
                    sums: vec![0.0; accessors.len()],
                });
                rows.len() - 1
            }
        };
        for (sum, acc) in rows[slot].sums.iter_mut().zip(&accessors) {
            if let Some(v) = acc.read(rec) {
                *sum += v;
            }
        }
    }

    // sort_by is stable; ties keep discovery order.
    rows.sort_by(|a, b| compare_keys(&a.key, &b.key, &first_seen));

    Ok(Aggregation {
        group_keys: request.group_keys.clone(),
        value_columns: request.value_columns.clone(),
        rows,
    })
}

fn compare_keys(a: &[GroupValue], b: &[GroupValue], first_seen: &[HashMap<String, usize>]) -> Ordering {
    // Time components lead, in key order.
    let time = a
        .iter()
        .zip(b)
        .map(|(x, y)| match (x, y) {
            (GroupValue::Month(x), GroupValue::Month(y)) => x.cmp(y),
            (GroupValue::AcademicYear(x), GroupValue::AcademicYear(y)) => x.cmp(y),
            _ => Ordering::Equal,
        })
        .find(|o| *o != Ordering::Equal)
        .unwrap_or(Ordering::Equal);
    if time != Ordering::Equal {
        return time;
    }
    a.iter()
        .zip(b)
        .enumerate()
        .map(|(pos, (x, y))| match (x, y) {
            (GroupValue::Text(x), GroupValue::Text(y)) => {
                let rank = |s: &String| first_seen[pos].get(s).copied().unwrap_or(usize::MAX);
                rank(x).cmp(&rank(y))
            }
            _ => Ordering::Equal,
        })
        .find(|o| *o != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}
