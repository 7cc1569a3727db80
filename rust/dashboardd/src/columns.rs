//! Well-known column resolution and sub-item discovery.
//!
//! Discovery runs in explicit stages and the first stage that yields columns
//! wins; stages are never merged:
//!
//! 0. configured item columns,
//! 1. columns whose header starts with a segment's header text,
//! 2. every numeric column that is not reserved.

use crate::config::ColumnNames;
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Date,
    District,
    School,
    Teacher,
    SegmentA,
    SegmentB,
}

impl Field {
    pub const ALL: [Field; 6] = [
        Field::Date,
        Field::District,
        Field::School,
        Field::Teacher,
        Field::SegmentA,
        Field::SegmentB,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Field::Date => "date",
            Field::District => "district",
            Field::School => "school",
            Field::Teacher => "teacher",
            Field::SegmentA => "segment_a",
            Field::SegmentB => "segment_b",
        }
    }

    // Headers used by the product's own exports.
    fn builtin_aliases(self) -> &'static [&'static str] {
        match self {
            Field::Date => &["日期"],
            Field::District => &["区名称"],
            Field::School => &["学校名称"],
            Field::Teacher => &["教师姓名"],
            Field::SegmentA => &["板块A"],
            Field::SegmentB => &["板块B"],
        }
    }

    fn slot(self) -> usize {
        self as usize
    }

    fn override_name(self, names: &ColumnNames) -> Option<&str> {
        let v = match self {
            Field::Date => &names.date,
            Field::District => &names.district,
            Field::School => &names.school,
            Field::Teacher => &names.teacher,
            Field::SegmentA => &names.segment_a,
            Field::SegmentB => &names.segment_b,
        };
        v.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

/// Names that can never be sub-items, whatever the source headers are.
pub const RESERVED_NAMES: [&str; 8] = [
    "date",
    "academic_year",
    "month_bucket",
    "district",
    "school",
    "teacher",
    "segment_a",
    "segment_b",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    A,
    B,
}

impl Segment {
    pub fn field(self) -> Field {
        match self {
            Segment::A => Field::SegmentA,
            Segment::B => Field::SegmentB,
        }
    }
}

/// Source column index for each well-known field, when present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    slots: [Option<usize>; 6],
}

impl FieldMap {
    pub fn get(&self, field: Field) -> Option<usize> {
        self.slots[field.slot()]
    }

    pub fn set(&mut self, field: Field, idx: usize) {
        self.slots[field.slot()] = Some(idx);
    }

    pub fn present(&self) -> Vec<Field> {
        Field::ALL.into_iter().filter(|f| self.get(*f).is_some()).collect()
    }

    pub fn missing(&self) -> Vec<Field> {
        Field::ALL.into_iter().filter(|f| self.get(*f).is_none()).collect()
    }

    fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots.iter().flatten().copied()
    }
}

fn header_matches(header: &str, wanted: &str) -> bool {
    let h = header.trim();
    h == wanted || (h.is_ascii() && wanted.is_ascii() && h.eq_ignore_ascii_case(wanted))
}

/// Maps each well-known field to a header. An override replaces the built-in
/// names for that field instead of extending them.
pub fn resolve_fields(headers: &[String], overrides: &ColumnNames) -> FieldMap {
    let mut map = FieldMap::default();
    let mut taken: HashSet<usize> = HashSet::new();
    for field in Field::ALL {
        let candidates: Vec<&str> = match field.override_name(overrides) {
            Some(name) => vec![name],
            None => std::iter::once(field.key())
                .chain(field.builtin_aliases().iter().copied())
                .collect(),
        };
        let found = candidates.iter().find_map(|wanted| {
            headers
                .iter()
                .enumerate()
                .find(|(i, h)| !taken.contains(i) && header_matches(h, wanted))
                .map(|(i, _)| i)
        });
        if let Some(i) = found {
            taken.insert(i);
            map.set(field, i);
        }
    }
    map
}

/// What discovery needs to know about one source column.
#[derive(Debug, Clone)]
pub struct ColumnProfile {
    pub name: String,
    pub numeric: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemColumn {
    pub name: String,
    #[serde(skip)]
    pub source_index: usize,
    pub segment: Option<Segment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryStage {
    Explicit,
    SegmentPrefix,
    NumericFallback,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Discovery {
    pub stage: DiscoveryStage,
    pub items: Vec<ItemColumn>,
    pub notices: Vec<String>,
}

/// Indices that discovery must skip: resolved well-known columns plus any
/// header spelled like a reserved name.
pub fn reserved_indices(columns: &[ColumnProfile], fields: &FieldMap) -> HashSet<usize> {
    let mut out: HashSet<usize> = fields.indices().collect();
    for (i, c) in columns.iter().enumerate() {
        if RESERVED_NAMES.iter().any(|r| header_matches(&c.name, r)) {
            out.insert(i);
        }
    }
    out
}

fn segment_by_prefix(name: &str, labels: &[(Segment, &str)]) -> Option<Segment> {
    labels
        .iter()
        .filter(|(_, label)| !label.is_empty() && name.starts_with(label) && name != *label)
        .max_by_key(|(_, label)| label.len())
        .map(|(seg, _)| *seg)
}

/// Resolves the sub-item columns.
///
/// `labels` holds the header text actually used for each present segment.
pub fn discover_item_columns(
    columns: &[ColumnProfile],
    labels: &[(Segment, &str)],
    reserved: &HashSet<usize>,
    explicit: Option<&[String]>,
) -> Discovery {
    let mut notices = Vec::new();

    if let Some(explicit) = explicit {
        let mut items: Vec<ItemColumn> = Vec::new();
        for wanted in explicit {
            let wanted = wanted.trim();
            let Some(idx) = columns.iter().position(|c| c.name == wanted) else {
                notices.push(format!("configured item column '{}' is not in the source", wanted));
                continue;
            };
            if reserved.contains(&idx) {
                notices.push(format!("configured item column '{}' is reserved", wanted));
                continue;
            }
            if items.iter().any(|it| it.source_index == idx) {
                continue;
            }
            items.push(ItemColumn {
                name: columns[idx].name.clone(),
                source_index: idx,
                segment: segment_by_prefix(&columns[idx].name, labels),
            });
        }
        return Discovery {
            stage: DiscoveryStage::Explicit,
            items,
            notices,
        };
    }

    let candidates = || {
        columns
            .iter()
            .enumerate()
            .filter(move |(i, _)| !reserved.contains(i))
    };

    let prefixed: Vec<ItemColumn> = candidates()
        .filter_map(|(i, c)| {
            segment_by_prefix(&c.name, labels).map(|seg| ItemColumn {
                name: c.name.clone(),
                source_index: i,
                segment: Some(seg),
            })
        })
        .collect();
    if !prefixed.is_empty() {
        return Discovery {
            stage: DiscoveryStage::SegmentPrefix,
            items: prefixed,
            notices,
        };
    }

    let numeric: Vec<ItemColumn> = candidates()
        .filter(|(_, c)| c.numeric)
        .map(|(i, c)| ItemColumn {
            name: c.name.clone(),
            source_index: i,
            segment: None,
        })
        .collect();
    if numeric.is_empty() {
        notices.push("no sub-item columns found".to_string());
        return Discovery {
            stage: DiscoveryStage::None,
            items: numeric,
            notices,
        };
    }
    Discovery {
        stage: DiscoveryStage::NumericFallback,
        items: numeric,
        notices,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profiles(cols: &[(&str, bool)]) -> Vec<ColumnProfile> {
        cols.iter()
            .map(|(n, numeric)| ColumnProfile {
                name: n.to_string(),
                numeric: *numeric,
            })
            .collect()
    }

    fn headers(cols: &[&str]) -> Vec<String> {
        cols.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn resolves_canonical_alias_and_override_names() {
        let h = headers(&["Date", "区名称", "School", "Reading total", "segment_b"]);
        let overrides = ColumnNames {
            segment_a: Some("Reading total".into()),
            ..Default::default()
        };
        let map = resolve_fields(&h, &overrides);
        assert_eq!(map.get(Field::Date), Some(0));
        assert_eq!(map.get(Field::District), Some(1));
        assert_eq!(map.get(Field::School), Some(2));
        assert_eq!(map.get(Field::SegmentA), Some(3));
        assert_eq!(map.get(Field::SegmentB), Some(4));
        assert_eq!(map.missing(), vec![Field::Teacher]);
    }

    #[test]
    fn override_replaces_builtin_names() {
        let h = headers(&["date", "segment_a"]);
        let overrides = ColumnNames {
            segment_a: Some("Reading".into()),
            ..Default::default()
        };
        let map = resolve_fields(&h, &overrides);
        assert_eq!(map.get(Field::SegmentA), None);
    }

    fn discover(cols: &[(&str, bool)], explicit: Option<&[String]>) -> Discovery {
        let p = profiles(cols);
        let names: Vec<String> = p.iter().map(|c| c.name.clone()).collect();
        let fields = resolve_fields(&names, &ColumnNames::default());
        let reserved = reserved_indices(&p, &fields);
        let mut labels = Vec::new();
        if let Some(i) = fields.get(Field::SegmentA) {
            labels.push((Segment::A, p[i].name.as_str()));
        }
        if let Some(i) = fields.get(Field::SegmentB) {
            labels.push((Segment::B, p[i].name.as_str()));
        }
        discover_item_columns(&p, &labels, &reserved, explicit)
    }

    #[test]
    fn prefix_stage_wins_over_numeric_columns() {
        let d = discover(
            &[
                ("date", false),
                ("segment_a", true),
                ("segment_b", true),
                ("segment_a_reading", true),
                ("minutes", true),
                ("segment_b_quiz", false),
            ],
            None,
        );
        assert_eq!(d.stage, DiscoveryStage::SegmentPrefix);
        let names: Vec<&str> = d.items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["segment_a_reading", "segment_b_quiz"]);
        assert_eq!(d.items[0].segment, Some(Segment::A));
        assert_eq!(d.items[1].segment, Some(Segment::B));
    }

    #[test]
    fn numeric_fallback_skips_reserved_and_text_columns() {
        let d = discover(
            &[
                ("日期", false),
                ("学校名称", false),
                ("板块A", true),
                ("a", true),
                ("notes", false),
                ("academic_year", true),
                ("b", true),
            ],
            None,
        );
        assert_eq!(d.stage, DiscoveryStage::NumericFallback);
        let names: Vec<&str> = d.items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(d.items.iter().all(|i| i.segment.is_none()));
    }

    #[test]
    fn no_candidates_reports_notice() {
        let d = discover(&[("date", false), ("school", false)], None);
        assert_eq!(d.stage, DiscoveryStage::None);
        assert!(d.items.is_empty());
        assert_eq!(d.notices.len(), 1);
    }

    #[test]
    fn explicit_list_is_used_verbatim_minus_reserved_and_unknown() {
        let explicit = vec![
            "b".to_string(),
            "school".to_string(),
            "ghost".to_string(),
            "segment_a_reading".to_string(),
        ];
        let d = discover(
            &[
                ("date", false),
                ("school", false),
                ("segment_a", true),
                ("segment_a_reading", true),
                ("b", true),
            ],
            Some(&explicit),
        );
        assert_eq!(d.stage, DiscoveryStage::Explicit);
        let names: Vec<&str> = d.items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["b", "segment_a_reading"]);
        assert_eq!(d.items[1].segment, Some(Segment::A));
        assert_eq!(d.notices.len(), 2);
    }

    #[test]
    fn longest_segment_label_wins() {
        let labels = [(Segment::A, "usage"), (Segment::B, "usage_b")];
        assert_eq!(segment_by_prefix("usage_b_quiz", &labels), Some(Segment::B));
        assert_eq!(segment_by_prefix("usage_reading", &labels), Some(Segment::A));
        assert_eq!(segment_by_prefix("usage", &labels), None);
    }
}
