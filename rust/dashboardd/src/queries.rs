//! The fixed query shapes behind each dashboard view.
//!
//! Every query degrades instead of failing: a missing column yields
//! `status: unavailable`, an empty filter result yields `status: empty`.
//! Only malformed parameters surface as [`QueryError`].

use crate::aggregate::{aggregate, json_number, AggregationRequest, GroupKey, ValueColumn};
use crate::columns::{Field, Segment};
use crate::dataset::Dataset;
use crate::filter::{self, FilterError, FilterSpec, FilteredView};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error("unknown metric '{0}'")]
    UnknownMetric(String),
    #[error("school must not be empty")]
    MissingSchool,
}

impl QueryError {
    pub fn code(&self) -> &'static str {
        "bad_params"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Granularity {
    Month,
    AcademicYear,
}

impl Granularity {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "month" => Some(Granularity::Month),
            "academicYear" | "academic_year" => Some(Granularity::AcademicYear),
            _ => None,
        }
    }

    fn group_key(self) -> GroupKey {
        match self {
            Granularity::Month => GroupKey::MonthBucket,
            Granularity::AcademicYear => GroupKey::AcademicYear,
        }
    }
}

/// Requested date bounds; a missing bound falls back to the dataset's min/max.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateWindow {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    Ok,
    Empty,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionCapWarning {
    pub code: &'static str,
    pub field: &'static str,
    pub cap: usize,
    pub requested: usize,
    pub dropped: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Line,
    Bar,
    Pie,
}

/// Rendering hints; field names refer to keys of `QueryResult::rows`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSpec {
    pub kind: ChartKind,
    pub x: String,
    pub y: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series: Option<String>,
    pub labels: BTreeMap<String, String>,
}

impl ChartSpec {
    fn new(
        dataset: &Dataset,
        kind: ChartKind,
        x: &str,
        y: &[ValueColumn],
        series: Option<GroupKey>,
    ) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(x.to_string(), axis_label(dataset, x));
        for c in y {
            labels.insert(c.key().to_string(), c.label(dataset).to_string());
        }
        if let Some(s) = series {
            labels.insert(s.key().to_string(), axis_label(dataset, s.key()));
        }
        Self {
            kind,
            x: x.to_string(),
            y: y.iter().map(|c| c.key().to_string()).collect(),
            series: series.map(|s| s.key().to_string()),
            labels,
        }
    }
}

fn axis_label(dataset: &Dataset, key: &str) -> String {
    let field = match key {
        "month_bucket" => return "month".to_string(),
        "academic_year" => return "academic year".to_string(),
        "district" => Field::District,
        "school" => Field::School,
        "teacher" => Field::Teacher,
        other => return other.to_string(),
    };
    dataset.label(field).unwrap_or(key).to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub status: QueryStatus,
    pub chart: ChartSpec,
    pub rows: Vec<Value>,
    pub warnings: Vec<SelectionCapWarning>,
    pub notices: Vec<String>,
}

impl QueryResult {
    fn unavailable(chart: ChartSpec, notice: impl Into<String>) -> Self {
        Self {
            status: QueryStatus::Unavailable,
            chart,
            rows: Vec::new(),
            warnings: Vec::new(),
            notices: vec![notice.into()],
        }
    }

    fn empty(chart: ChartSpec, notice: impl Into<String>) -> Self {
        Self {
            status: QueryStatus::Empty,
            chart,
            rows: Vec::new(),
            warnings: Vec::new(),
            notices: vec![notice.into()],
        }
    }

    fn with_warning(mut self, warning: Option<SelectionCapWarning>) -> Self {
        self.warnings.extend(warning);
        self
    }
}

const NO_DATA: &str = "no data for the current filters";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolBreakdown {
    pub school: String,
    pub teacher_trend: QueryResult,
    pub items: QueryResult,
}

/// Dedups and drops blanks, then keeps the first `cap` entries in selection order.
pub fn cap_selection(
    field: &'static str,
    requested: &[String],
    cap: usize,
) -> (Vec<String>, Option<SelectionCapWarning>) {
    let mut kept: Vec<String> = Vec::new();
    for s in requested {
        let t = s.trim();
        if t.is_empty() || kept.iter().any(|k| k == t) {
            continue;
        }
        kept.push(t.to_string());
    }
    if kept.len() <= cap {
        return (kept, None);
    }
    let dropped = kept.split_off(cap);
    tracing::debug!(field, cap, dropped = dropped.len(), "selection truncated");
    let warning = SelectionCapWarning {
        code: "selection_cap",
        field,
        cap,
        requested: cap + dropped.len(),
        dropped,
    };
    (kept, Some(warning))
}

/// `None` means nothing can match. Only a window whose two bounds were both
/// requested is checked for inversion; a single bound past the data is empty.
fn resolve_filter(dataset: &Dataset, window: DateWindow) -> Result<Option<FilterSpec>, QueryError> {
    if let (Some(s), Some(e)) = (window.start, window.end) {
        return Ok(Some(FilterSpec::new(s, e)?));
    }
    let Some((min, max)) = dataset.date_bounds() else {
        return Ok(None);
    };
    let start = window.start.unwrap_or(min);
    let end = window.end.unwrap_or(max);
    Ok(FilterSpec::new(start, end).ok())
}

fn run(chart: ChartSpec, view: &FilteredView<'_>, request: AggregationRequest) -> QueryResult {
    let agg = match aggregate(view, &request) {
        Ok(agg) => agg,
        Err(e) => return QueryResult::unavailable(chart, e.to_string()),
    };
    let mut notices = view.notices.clone();
    let status = if agg.is_empty() {
        notices.push(NO_DATA.to_string());
        QueryStatus::Empty
    } else {
        QueryStatus::Ok
    };
    QueryResult {
        status,
        chart,
        rows: agg.to_json_rows(),
        warnings: Vec::new(),
        notices,
    }
}

fn present_segments(dataset: &Dataset) -> Vec<ValueColumn> {
    [
        (Field::SegmentA, ValueColumn::SegmentA),
        (Field::SegmentB, ValueColumn::SegmentB),
    ]
    .into_iter()
    .filter(|(f, _)| dataset.has(*f))
    .map(|(_, c)| c)
    .collect()
}

/// Usage trend over time for both segments.
pub fn overview(
    dataset: &Dataset,
    window: DateWindow,
    granularity: Granularity,
) -> Result<QueryResult, QueryError> {
    let key = granularity.group_key();
    let values = present_segments(dataset);
    let chart = ChartSpec::new(dataset, ChartKind::Line, key.key(), &values, None);
    if values.is_empty() {
        return Ok(QueryResult::unavailable(
            chart,
            "overview unavailable: neither segment_a nor segment_b is present",
        ));
    }
    let Some(spec) = resolve_filter(dataset, window)? else {
        return Ok(QueryResult::empty(chart, NO_DATA));
    };
    let view = filter::apply(dataset, &spec);
    tracing::debug!(rows = view.len(), ?granularity, "overview");
    Ok(run(chart, &view, AggregationRequest::new(vec![key], values)))
}

/// Monthly usage of selected schools, optionally inside one district.
pub fn district_compare(
    dataset: &Dataset,
    window: DateWindow,
    district: Option<&str>,
    schools: &[String],
    cap: usize,
) -> Result<QueryResult, QueryError> {
    let metric = present_segments(dataset).into_iter().next();
    let chart = ChartSpec::new(
        dataset,
        ChartKind::Line,
        GroupKey::MonthBucket.key(),
        metric.as_slice(),
        Some(GroupKey::School),
    );
    if !dataset.has(Field::School) {
        return Ok(QueryResult::unavailable(
            chart,
            "school comparison unavailable: 'school' column is missing",
        ));
    }
    let Some(metric) = metric else {
        return Ok(QueryResult::unavailable(
            chart,
            "school comparison unavailable: neither segment_a nor segment_b is present",
        ));
    };
    let (selected, warning) = cap_selection("schools", schools, cap);
    if selected.is_empty() {
        return Ok(QueryResult::empty(chart, "no schools selected").with_warning(warning));
    }
    let Some(spec) = resolve_filter(dataset, window)? else {
        return Ok(QueryResult::empty(chart, NO_DATA).with_warning(warning));
    };
    let district = district.map(str::trim).filter(|d| !d.is_empty());
    let spec = spec.with_district(district).with_schools(selected);
    let view = filter::apply(dataset, &spec);
    tracing::debug!(rows = view.len(), ?district, "district compare");
    Ok(run(
        chart,
        &view,
        AggregationRequest::new(vec![GroupKey::MonthBucket, GroupKey::School], vec![metric]),
    )
    .with_warning(warning))
}

/// Monthly usage of selected schools across districts for one chosen metric.
pub fn school_compare(
    dataset: &Dataset,
    window: DateWindow,
    schools: &[String],
    metric: &str,
    cap: usize,
) -> Result<QueryResult, QueryError> {
    let Some(metric) = ValueColumn::resolve(dataset, metric) else {
        return Err(QueryError::UnknownMetric(metric.trim().to_string()));
    };
    let chart = ChartSpec::new(
        dataset,
        ChartKind::Bar,
        GroupKey::MonthBucket.key(),
        std::slice::from_ref(&metric),
        Some(GroupKey::School),
    );
    if !dataset.has(Field::School) {
        return Ok(QueryResult::unavailable(
            chart,
            "school comparison unavailable: 'school' column is missing",
        ));
    }
    let (selected, warning) = cap_selection("schools", schools, cap);
    if selected.is_empty() {
        return Ok(QueryResult::empty(chart, "no schools selected").with_warning(warning));
    }
    let Some(spec) = resolve_filter(dataset, window)? else {
        return Ok(QueryResult::empty(chart, NO_DATA).with_warning(warning));
    };
    let view = filter::apply(dataset, &spec.with_schools(selected));
    tracing::debug!(rows = view.len(), metric = metric.key(), "school compare");
    Ok(run(
        chart,
        &view,
        AggregationRequest::new(vec![GroupKey::MonthBucket, GroupKey::School], vec![metric]),
    )
    .with_warning(warning))
}

/// Teacher trend and sub-item shares for a single school.
pub fn school_breakdown(
    dataset: &Dataset,
    window: DateWindow,
    school: &str,
    teachers: &[String],
    cap: usize,
) -> Result<SchoolBreakdown, QueryError> {
    let school = school.trim();
    if school.is_empty() {
        return Err(QueryError::MissingSchool);
    }
    let trend_chart = ChartSpec::new(
        dataset,
        ChartKind::Line,
        GroupKey::MonthBucket.key(),
        &[ValueColumn::SegmentA],
        Some(GroupKey::Teacher),
    );
    let items_chart = items_chart();
    let done = |teacher_trend, items| SchoolBreakdown {
        school: school.to_string(),
        teacher_trend,
        items,
    };

    if !dataset.has(Field::School) {
        let why = "school breakdown unavailable: 'school' column is missing";
        return Ok(done(
            QueryResult::unavailable(trend_chart, why),
            QueryResult::unavailable(items_chart, why),
        ));
    }
    let Some(spec) = resolve_filter(dataset, window)? else {
        return Ok(done(
            QueryResult::empty(trend_chart, NO_DATA),
            QueryResult::empty(items_chart, NO_DATA),
        ));
    };
    let spec = spec.with_schools([school]);
    let school_view = filter::apply(dataset, &spec);

    let teacher_trend = if !dataset.has(Field::Teacher) {
        QueryResult::unavailable(
            trend_chart,
            "teacher comparison unavailable: 'teacher' column is missing",
        )
    } else if !dataset.has(Field::SegmentA) {
        QueryResult::unavailable(
            trend_chart,
            "teacher comparison unavailable: 'segment_a' column is missing",
        )
    } else {
        let (selected, warning) = cap_selection("teachers", teachers, cap);
        if selected.is_empty() {
            QueryResult::empty(trend_chart, "no teachers selected").with_warning(warning)
        } else {
            let view = filter::apply(dataset, &spec.clone().with_teachers(selected));
            run(
                trend_chart,
                &view,
                AggregationRequest::new(
                    vec![GroupKey::MonthBucket, GroupKey::Teacher],
                    vec![ValueColumn::SegmentA],
                ),
            )
            .with_warning(warning)
        }
    };

    let items = item_breakdown(&school_view, items_chart);
    tracing::debug!(rows = school_view.len(), school, "school breakdown");
    Ok(done(teacher_trend, items))
}

fn items_chart() -> ChartSpec {
    let mut labels = BTreeMap::new();
    labels.insert("item".to_string(), "item".to_string());
    labels.insert("value".to_string(), "usage".to_string());
    ChartSpec {
        kind: ChartKind::Pie,
        x: "item".to_string(),
        y: vec!["value".to_string()],
        series: None,
        labels,
    }
}

/// Sums every item column over `view`; items summing to zero or less are dropped.
pub fn item_breakdown(view: &FilteredView<'_>, chart: ChartSpec) -> QueryResult {
    let dataset = view.dataset();
    if dataset.item_columns.is_empty() {
        return QueryResult::unavailable(chart, "item breakdown unavailable: no sub-item columns");
    }
    let request = AggregationRequest::new(
        Vec::new(),
        dataset
            .item_columns
            .iter()
            .map(|c| ValueColumn::Item(c.name.clone()))
            .collect(),
    );
    let agg = match aggregate(view, &request) {
        Ok(agg) => agg,
        Err(e) => return QueryResult::unavailable(chart, e.to_string()),
    };
    let sums = agg.rows.first().map(|r| r.sums.clone()).unwrap_or_default();
    let positive: Vec<(&str, Option<Segment>, f64)> = dataset
        .item_columns
        .iter()
        .zip(sums)
        .filter(|(_, v)| *v > 0.0)
        .map(|(c, v)| (c.name.as_str(), c.segment, v))
        .collect();
    let total: f64 = positive.iter().map(|(_, _, v)| v).sum();

    let mut notices = view.notices.clone();
    if positive.is_empty() {
        notices.push(NO_DATA.to_string());
    }
    QueryResult {
        status: if positive.is_empty() {
            QueryStatus::Empty
        } else {
            QueryStatus::Ok
        },
        chart,
        rows: positive
            .into_iter()
            .map(|(name, segment, v)| {
                json!({
                    "item": name,
                    "segment": segment,
                    "value": json_number(v),
                    "share": v / total,
                })
            })
            .collect(),
        warnings: Vec::new(),
        notices,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricOption {
    pub key: String,
    pub label: String,
    pub segment: Option<Segment>,
}

/// Values the presentation layer offers in its selectors.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetOptions {
    pub districts: Vec<String>,
    pub schools: Vec<String>,
    pub teachers: Vec<String>,
    pub metrics: Vec<MetricOption>,
    pub granularities: Vec<Granularity>,
    pub date_min: Option<String>,
    pub date_max: Option<String>,
}

fn distinct<'a, I>(values: I) -> Vec<String>
where
    I: Iterator<Item = Option<&'a str>>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for v in values.flatten() {
        if seen.insert(v) {
            out.push(v.to_string());
        }
    }
    out
}

/// Distinct entity values in first-occurrence order. Schools narrow to
/// `district` and teachers to `school` when given.
pub fn options(dataset: &Dataset, district: Option<&str>, school: Option<&str>) -> DatasetOptions {
    let district = district.map(str::trim).filter(|d| !d.is_empty());
    let school = school.map(str::trim).filter(|s| !s.is_empty());
    let records = &dataset.records;

    let districts = distinct(records.iter().map(|r| r.district.as_deref()));
    let schools = distinct(
        records
            .iter()
            .filter(|r| match district {
                Some(d) if dataset.has(Field::District) => r.district.as_deref() == Some(d),
                _ => true,
            })
            .map(|r| r.school.as_deref()),
    );
    let teachers = distinct(
        records
            .iter()
            .filter(|r| match school {
                Some(s) => r.school.as_deref() == Some(s),
                None => true,
            })
            .map(|r| r.teacher.as_deref()),
    );

    let mut metrics: Vec<MetricOption> = present_segments(dataset)
        .into_iter()
        .map(|c| MetricOption {
            key: c.key().to_string(),
            label: c.label(dataset).to_string(),
            segment: Some(match c {
                ValueColumn::SegmentB => Segment::B,
                _ => Segment::A,
            }),
        })
        .collect();
    metrics.extend(dataset.item_columns.iter().map(|c| MetricOption {
        key: c.name.clone(),
        label: c.name.clone(),
        segment: c.segment,
    }));

    let bounds = dataset.date_bounds();
    DatasetOptions {
        districts,
        schools,
        teachers,
        metrics,
        granularities: vec![Granularity::Month, Granularity::AcademicYear],
        date_min: bounds.map(|b| b.0.to_string()),
        date_max: bounds.map(|b| b.1.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::LoadOptions;
    use crate::source::RawTable;
    use std::path::Path;

    fn dataset(text: &str) -> Dataset {
        let table = RawTable::from_csv_reader(text.as_bytes()).expect("csv");
        Dataset::from_table(Path::new("inline.csv"), &table, &LoadOptions::default())
            .expect("dataset")
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).expect("date")
    }

    fn names(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("School {:02}", i)).collect()
    }

    #[test]
    fn overview_by_academic_year_matches_scenario() {
        let ds = dataset("date,segment_a\n2024-08-15,5\n2024-09-01,7\n");
        let r = overview(&ds, DateWindow::default(), Granularity::AcademicYear).expect("query");
        assert_eq!(r.status, QueryStatus::Ok);
        assert_eq!(
            r.rows,
            vec![
                json!({ "academic_year": "2023-2024", "segment_a": 5 }),
                json!({ "academic_year": "2024-2025", "segment_a": 7 }),
            ]
        );
        assert_eq!(r.chart.y, vec!["segment_a"]);
    }

    #[test]
    fn overview_without_segments_is_unavailable() {
        let ds = dataset("date,school\n2024-09-01,Alder\n");
        let r = overview(&ds, DateWindow::default(), Granularity::Month).expect("query");
        assert_eq!(r.status, QueryStatus::Unavailable);
        assert!(r.rows.is_empty());
        assert_eq!(r.notices.len(), 1);
    }

    #[test]
    fn overview_outside_data_range_is_empty() {
        let ds = dataset("date,segment_a\n2024-09-01,1\n");
        let window = DateWindow {
            start: Some(d(2030, 1, 1)),
            end: Some(d(2030, 2, 1)),
        };
        let r = overview(&ds, window, Granularity::Month).expect("query");
        assert_eq!(r.status, QueryStatus::Empty);
        assert!(r.notices.iter().any(|n| n == NO_DATA));
    }

    #[test]
    fn one_sided_window_past_the_data_is_empty() {
        let ds = dataset(
            "date,school,teacher,segment_a\n\
             2024-09-01,Alder,Chen,1\n\
             2024-10-01,Alder,Chen,2\n",
        );
        let after_max = DateWindow {
            start: Some(d(2025, 1, 1)),
            end: None,
        };
        let before_min = DateWindow {
            start: None,
            end: Some(d(2020, 1, 1)),
        };
        for window in [after_max, before_min] {
            let r = overview(&ds, window, Granularity::Month).expect("overview");
            assert_eq!(r.status, QueryStatus::Empty);
            assert!(r.notices.iter().any(|n| n == NO_DATA));

            let schools = vec!["Alder".to_string()];
            let r = district_compare(&ds, window, None, &schools, 10).expect("district");
            assert_eq!(r.status, QueryStatus::Empty);
            let r = school_compare(&ds, window, &schools, "segment_a", 20).expect("compare");
            assert_eq!(r.status, QueryStatus::Empty);
            let b = school_breakdown(&ds, window, "Alder", &["Chen".to_string()], 10)
                .expect("breakdown");
            assert_eq!(b.teacher_trend.status, QueryStatus::Empty);
            assert_eq!(b.items.status, QueryStatus::Empty);
        }
    }

    #[test]
    fn one_sided_window_inside_the_data_uses_the_other_bound() {
        let ds = dataset("date,segment_a\n2024-09-01,1\n2024-10-01,2\n");
        let window = DateWindow {
            start: Some(d(2024, 9, 15)),
            end: None,
        };
        let r = overview(&ds, window, Granularity::Month).expect("overview");
        assert_eq!(r.rows, vec![json!({ "month_bucket": "2024-10", "segment_a": 2 })]);
    }

    #[test]
    fn inverted_window_is_a_parameter_error() {
        let ds = dataset("date,segment_a\n2024-09-01,1\n");
        let window = DateWindow {
            start: Some(d(2024, 9, 2)),
            end: Some(d(2024, 9, 1)),
        };
        let e = overview(&ds, window, Granularity::Month).expect_err("inverted");
        assert_eq!(e.code(), "bad_params");
    }

    #[test]
    fn cap_keeps_first_ten_of_fifteen_in_selection_order() {
        let (kept, warning) = cap_selection("schools", &names(15), 10);
        assert_eq!(kept, names(10));
        let w = warning.expect("cap warning");
        assert_eq!(w.cap, 10);
        assert_eq!(w.requested, 15);
        assert_eq!(w.dropped, names(15)[10..].to_vec());
    }

    #[test]
    fn cap_ignores_duplicates_and_blanks() {
        let sel = vec![
            "A".to_string(),
            " ".to_string(),
            "A".to_string(),
            "B".to_string(),
        ];
        let (kept, warning) = cap_selection("schools", &sel, 2);
        assert_eq!(kept, vec!["A", "B"]);
        assert!(warning.is_none());
    }

    #[test]
    fn district_compare_truncates_and_warns() {
        let mut csv = String::from("date,district,school,segment_a\n");
        for name in names(15) {
            csv.push_str(&format!("2024-09-01,North,{},1\n", name));
        }
        let ds = dataset(&csv);
        let r = district_compare(&ds, DateWindow::default(), Some("North"), &names(15), 10)
            .expect("query");
        assert_eq!(r.status, QueryStatus::Ok);
        assert_eq!(r.rows.len(), 10);
        let schools: Vec<&str> = r
            .rows
            .iter()
            .filter_map(|row| row.get("school").and_then(|v| v.as_str()))
            .collect();
        assert_eq!(schools, names(10));
        assert_eq!(r.warnings.len(), 1);
        assert_eq!(r.warnings[0].field, "schools");
    }

    #[test]
    fn district_compare_falls_back_to_segment_b() {
        let ds = dataset("date,school,segment_b\n2024-09-01,Alder,4\n");
        let r = district_compare(&ds, DateWindow::default(), None, &["Alder".to_string()], 10)
            .expect("query");
        assert_eq!(r.chart.y, vec!["segment_b"]);
        assert_eq!(
            r.rows,
            vec![json!({ "month_bucket": "2024-09", "school": "Alder", "segment_b": 4 })]
        );
    }

    #[test]
    fn district_compare_with_no_selection_is_empty() {
        let ds = dataset("date,school,segment_a\n2024-09-01,Alder,4\n");
        let r = district_compare(&ds, DateWindow::default(), None, &[], 10).expect("query");
        assert_eq!(r.status, QueryStatus::Empty);
        assert_eq!(r.notices, vec!["no schools selected"]);
    }

    #[test]
    fn school_compare_rejects_unknown_metric_and_degrades_missing_segment() {
        let ds = dataset("date,school,segment_a,extra\n2024-09-01,Alder,4,2\n");
        let e = school_compare(&ds, DateWindow::default(), &["Alder".into()], "bogus", 20)
            .expect_err("unknown metric");
        assert!(matches!(e, QueryError::UnknownMetric(_)));

        let r = school_compare(&ds, DateWindow::default(), &["Alder".into()], "segment_b", 20)
            .expect("query");
        assert_eq!(r.status, QueryStatus::Unavailable);

        let r = school_compare(&ds, DateWindow::default(), &["Alder".into()], "extra", 20)
            .expect("query");
        assert_eq!(r.status, QueryStatus::Ok);
        assert_eq!(r.chart.kind, ChartKind::Bar);
        assert_eq!(r.rows[0]["extra"], json!(2));
    }

    #[test]
    fn item_breakdown_drops_zero_and_negative_sums() {
        let ds = dataset(
            "date,school,teacher,segment_a,x,y,z\n\
             2024-09-01,Alder,Chen,1,0,1,-3\n\
             2024-09-02,Alder,Chen,1,0,2,2\n\
             2024-09-03,Birch,Diaz,1,9,9,9\n",
        );
        let r = school_breakdown(&ds, DateWindow::default(), "Alder", &[], 10).expect("query");
        assert_eq!(r.items.status, QueryStatus::Ok);
        assert_eq!(
            r.items.rows,
            vec![json!({ "item": "y", "segment": null, "value": 3, "share": 1.0 })]
        );
        assert_eq!(r.teacher_trend.status, QueryStatus::Empty);
    }

    #[test]
    fn breakdown_teacher_trend_sums_segment_a_per_month() {
        let ds = dataset(
            "date,school,teacher,segment_a\n\
             2024-10-01,Alder,Evans,2\n\
             2024-09-01,Alder,Chen,1\n\
             2024-09-20,Alder,Chen,4\n\
             2024-10-02,Alder,Chen,8\n\
             2024-10-02,Birch,Chen,100\n",
        );
        let teachers = vec!["Chen".to_string(), "Evans".to_string()];
        let r = school_breakdown(&ds, DateWindow::default(), "Alder", &teachers, 10)
            .expect("query");
        assert_eq!(
            r.teacher_trend.rows,
            vec![
                json!({ "month_bucket": "2024-09", "teacher": "Chen", "segment_a": 5 }),
                json!({ "month_bucket": "2024-10", "teacher": "Evans", "segment_a": 2 }),
                json!({ "month_bucket": "2024-10", "teacher": "Chen", "segment_a": 8 }),
            ]
        );
        assert_eq!(r.items.status, QueryStatus::Unavailable);
    }

    #[test]
    fn breakdown_requires_school_name() {
        let ds = dataset("date,school\n2024-09-01,Alder\n");
        let e = school_breakdown(&ds, DateWindow::default(), "  ", &[], 10).expect_err("blank");
        assert!(matches!(e, QueryError::MissingSchool));
    }

    #[test]
    fn options_narrow_by_district_and_school() {
        let ds = dataset(
            "date,district,school,teacher,segment_a,segment_a_math\n\
             2024-09-01,North,Alder,Chen,1,1\n\
             2024-09-02,South,Cedar,Fox,1,1\n\
             2024-09-03,North,Birch,Diaz,1,1\n\
             2024-09-04,North,Alder,Evans,1,1\n",
        );
        let o = options(&ds, Some("North"), Some("Alder"));
        assert_eq!(o.districts, vec!["North", "South"]);
        assert_eq!(o.schools, vec!["Alder", "Birch"]);
        assert_eq!(o.teachers, vec!["Chen", "Evans"]);
        let keys: Vec<&str> = o.metrics.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(keys, vec!["segment_a", "segment_a_math"]);
        assert_eq!(o.date_min.as_deref(), Some("2024-09-01"));
        assert_eq!(o.date_max.as_deref(), Some("2024-09-04"));
    }
}
