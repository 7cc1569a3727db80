use crate::columns::Field;
use crate::dataset::{Dataset, Record};
use chrono::NaiveDate;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("dateStart {start} is after dateEnd {end}")]
    InvertedRange { start: NaiveDate, end: NaiveDate },
}

/// Per-interaction filter. Empty `schools`/`teachers` mean "no restriction".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSpec {
    date_start: NaiveDate,
    date_end: NaiveDate,
    pub district: Option<String>,
    pub schools: HashSet<String>,
    pub teachers: HashSet<String>,
}

impl FilterSpec {
    pub fn new(date_start: NaiveDate, date_end: NaiveDate) -> Result<Self, FilterError> {
        if date_start > date_end {
            return Err(FilterError::InvertedRange {
                start: date_start,
                end: date_end,
            });
        }
        Ok(Self {
            date_start,
            date_end,
            district: None,
            schools: HashSet::new(),
            teachers: HashSet::new(),
        })
    }

    pub fn with_district(mut self, district: Option<&str>) -> Self {
        self.district = district.map(str::to_string);
        self
    }

    pub fn with_schools<I, S>(mut self, schools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.schools = schools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_teachers<I, S>(mut self, teachers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.teachers = teachers.into_iter().map(Into::into).collect();
        self
    }

    /// The conditions this filter actually restricts on, in default order.
    pub fn conditions(&self) -> Vec<Condition> {
        let mut out = vec![Condition::DateRange];
        if self.district.is_some() {
            out.push(Condition::District);
        }
        if !self.schools.is_empty() {
            out.push(Condition::Schools);
        }
        if !self.teachers.is_empty() {
            out.push(Condition::Teachers);
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    DateRange,
    District,
    Schools,
    Teachers,
}

impl Condition {
    fn field(self) -> Field {
        match self {
            Condition::DateRange => Field::Date,
            Condition::District => Field::District,
            Condition::Schools => Field::School,
            Condition::Teachers => Field::Teacher,
        }
    }

    fn keeps(self, spec: &FilterSpec, rec: &Record) -> bool {
        match self {
            Condition::DateRange => spec.date_start <= rec.date && rec.date <= spec.date_end,
            Condition::District => match spec.district.as_deref() {
                Some(d) => rec.district.as_deref() == Some(d),
                None => true,
            },
            Condition::Schools => member(&spec.schools, rec.school.as_deref()),
            Condition::Teachers => member(&spec.teachers, rec.teacher.as_deref()),
        }
    }
}

fn member(set: &HashSet<String>, value: Option<&str>) -> bool {
    if set.is_empty() {
        return true;
    }
    value.map(|v| set.contains(v)).unwrap_or(false)
}

/// A subset of dataset rows, in dataset order.
#[derive(Debug, Clone)]
pub struct FilteredView<'a> {
    dataset: &'a Dataset,
    rows: Vec<usize>,
    pub notices: Vec<String>,
}

impl<'a> FilteredView<'a> {
    pub fn all(dataset: &'a Dataset) -> Self {
        Self::from_rows(dataset, (0..dataset.records.len()).collect())
    }

    /// Rows are taken as given; callers may pass any order.
    pub fn from_rows(dataset: &'a Dataset, rows: Vec<usize>) -> Self {
        Self {
            dataset,
            rows: rows
                .into_iter()
                .filter(|i| *i < dataset.records.len())
                .collect(),
            notices: Vec::new(),
        }
    }

    pub fn dataset(&self) -> &'a Dataset {
        self.dataset
    }

    pub fn rows(&self) -> &[usize] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &'a Record> + '_ {
        let ds = self.dataset;
        self.rows.iter().map(move |i| &ds.records[*i])
    }

    /// Narrows the view by one condition. A condition on a column the dataset
    /// lacks is skipped and noted.
    pub fn refine(mut self, spec: &FilterSpec, condition: Condition) -> Self {
        if !self.dataset.has(condition.field()) {
            self.notices.push(format!(
                "'{}' column is missing; {} filter skipped",
                condition.field().key(),
                condition.field().key()
            ));
            return self;
        }
        let ds = self.dataset;
        self.rows.retain(|i| condition.keeps(spec, &ds.records[*i]));
        self
    }
}

/// Applies every condition of `spec` conjunctively.
pub fn apply<'a>(dataset: &'a Dataset, spec: &FilterSpec) -> FilteredView<'a> {
    spec.conditions()
        .into_iter()
        .fold(FilteredView::all(dataset), |view, c| view.refine(spec, c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::LoadOptions;
    use crate::source::RawTable;
    use std::path::Path;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).expect("date")
    }

    fn dataset(text: &str) -> Dataset {
        let table = RawTable::from_csv_reader(text.as_bytes()).expect("csv");
        Dataset::from_table(Path::new("inline.csv"), &table, &LoadOptions::default())
            .expect("dataset")
    }

    const SAMPLE: &str = "date,district,school,segment_a\n\
        2024-09-01,North,Alder,1\n\
        2024-09-15,North,Birch,2\n\
        2024-10-01,South,Cedar,3\n\
        2024-10-31,North,Alder,4\n\
        2024-11-01,North,Alder,5\n";

    #[test]
    fn inverted_range_is_rejected() {
        let e = FilterSpec::new(d(2024, 10, 2), d(2024, 10, 1)).expect_err("inverted");
        assert_eq!(
            e,
            FilterError::InvertedRange {
                start: d(2024, 10, 2),
                end: d(2024, 10, 1)
            }
        );
    }

    #[test]
    fn date_range_is_inclusive_on_both_ends() {
        let ds = dataset(SAMPLE);
        let spec = FilterSpec::new(d(2024, 9, 15), d(2024, 10, 31)).expect("spec");
        assert_eq!(apply(&ds, &spec).rows(), &[1, 2, 3]);
    }

    #[test]
    fn empty_school_set_means_no_restriction() {
        let ds = dataset(SAMPLE);
        let spec = FilterSpec::new(d(2024, 1, 1), d(2024, 12, 31))
            .expect("spec")
            .with_district(Some("North"))
            .with_schools(Vec::<String>::new());
        assert_eq!(apply(&ds, &spec).rows(), &[0, 1, 3, 4]);
    }

    #[test]
    fn district_and_school_conditions_combine() {
        let ds = dataset(SAMPLE);
        let spec = FilterSpec::new(d(2024, 1, 1), d(2024, 10, 31))
            .expect("spec")
            .with_district(Some("North"))
            .with_schools(["Alder", "Cedar"]);
        assert_eq!(apply(&ds, &spec).rows(), &[0, 3]);
    }

    #[test]
    fn missing_dimension_column_skips_condition_with_notice() {
        let ds = dataset("date,school\n2024-09-01,Alder\n2024-09-02,Birch\n");
        let spec = FilterSpec::new(d(2024, 1, 1), d(2024, 12, 31))
            .expect("spec")
            .with_district(Some("North"))
            .with_teachers(["Chen"]);
        let view = apply(&ds, &spec);
        assert_eq!(view.rows(), &[0, 1]);
        assert_eq!(view.notices.len(), 2);
        assert!(view.notices[0].contains("district"));
    }

    #[test]
    fn empty_result_is_not_an_error() {
        let ds = dataset(SAMPLE);
        let spec = FilterSpec::new(d(2030, 1, 1), d(2030, 12, 31)).expect("spec");
        let view = apply(&ds, &spec);
        assert!(view.is_empty());
        assert_eq!(view.records().count(), 0);
    }
}
