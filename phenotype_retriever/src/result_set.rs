// src/result_set.rs

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::error::{CoercionError, PipelineError, Result};

/// Columns coerced to floating point at parse time whenever they are present.
/// `data_point` must hold a number; an empty `percentage_change` means "no
/// continuous effect" and is kept as absent.
const REQUIRED_NUMERIC: &[&str] = &["data_point"];
const OPTIONAL_NUMERIC: &[&str] = &["percentage_change"];

/// A validated snapshot of one tabular service response.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    label: String,
    /// Header cells in response order, blanks included, so that positions
    /// line up with the cells of every row.
    headers: Vec<String>,
    /// Retained rows keyed by their index in the response body.
    rows: Vec<(usize, Vec<String>)>,
    coercion_errors: Vec<CoercionError>,
    truncated: bool,
}

/// Borrowed view of a single row, addressed by column name.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    index: usize,
    headers: &'a [String],
    values: &'a [String],
}

/// Conversion from a result row into a typed record.
pub trait FromRow: Sized {
    const REQUIRED_COLUMNS: &'static [&'static str];

    fn from_row(row: &Row<'_>) -> std::result::Result<Self, CoercionError>;
}

/// Typed rows of a result set plus the rows that failed conversion.
#[derive(Debug, Clone)]
pub struct RecordBatch<T> {
    pub records: Vec<T>,
    pub dropped: Vec<CoercionError>,
}

impl<'a> Row<'a> {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Raw cell value; `None` when the column is absent from this response.
    pub fn get(&self, column: &str) -> Option<&'a str> {
        if column.is_empty() {
            return None;
        }
        self.headers
            .iter()
            .position(|h| h == column)
            .and_then(|i| self.values.get(i))
            .map(String::as_str)
    }

    /// Non-empty trimmed value, or `None` if missing or empty.
    pub fn optional(&self, column: &str) -> Option<&'a str> {
        self.get(column).map(str::trim).filter(|v| !v.is_empty())
    }

    pub fn required(&self, column: &str) -> std::result::Result<&'a str, CoercionError> {
        self.optional(column)
            .ok_or_else(|| self.error(column, self.get(column).unwrap_or("")))
    }

    pub fn optional_f64(&self, column: &str) -> std::result::Result<Option<f64>, CoercionError> {
        match self.optional(column) {
            None => Ok(None),
            Some(raw) => parse_f64(raw).map(Some).ok_or_else(|| self.error(column, raw)),
        }
    }

    pub fn required_f64(&self, column: &str) -> std::result::Result<f64, CoercionError> {
        let raw = self.required(column)?;
        parse_f64(raw).ok_or_else(|| self.error(column, raw))
    }

    pub fn error(&self, column: &str, value: &str) -> CoercionError {
        CoercionError::new(self.index, column, value)
    }
}

fn parse_f64(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

impl ResultSet {
    /// Parses a CSV response with a header row.
    ///
    /// Fails with a schema error if any of `required_columns` is absent. Rows
    /// that are malformed or whose numeric columns cannot be coerced are
    /// excluded and recorded, not fatal. A header-only body is a valid empty set.
    pub fn parse(label: &str, raw: &[u8], required_columns: &[&str]) -> Result<ResultSet> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_reader(raw);

        let headers: Vec<String> = match reader.headers() {
            Ok(h) => h.iter().map(|s| s.trim().to_string()).collect(),
            Err(e) => {
                debug!("{}: unreadable header row: {}", label, e);
                Vec::new()
            }
        };

        let missing: Vec<String> = required_columns
            .iter()
            .filter(|c| !headers.iter().any(|h| h == *c))
            .map(|c| c.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::Schema {
                query: label.to_string(),
                missing,
                available: named(&headers),
            });
        }

        let mut rows = Vec::new();
        let mut coercion_errors = Vec::new();

        for (index, record) in reader.records().enumerate() {
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    debug!("{}: malformed row {}: {}", label, index, e);
                    coercion_errors.push(CoercionError::new(index, "<row>", &e.to_string()));
                    continue;
                }
            };
            let values: Vec<String> = record.iter().map(|v| v.to_string()).collect();
            let row = Row {
                index,
                headers: &headers,
                values: &values,
            };

            if let Some(err) = check_numeric(&row) {
                coercion_errors.push(err);
                continue;
            }
            rows.push((index, values));
        }

        if !coercion_errors.is_empty() {
            warn!(
                "{}: dropped {} row(s) that could not be coerced",
                label,
                coercion_errors.len()
            );
        }
        debug!(
            "{}: parsed {} row(s), {} column(s)",
            label,
            rows.len(),
            headers.iter().filter(|h| !h.is_empty()).count()
        );

        Ok(ResultSet {
            label: label.to_string(),
            headers,
            rows,
            coercion_errors,
            truncated: false,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Named columns in response order; blank header cells are skipped.
    pub fn columns(&self) -> Vec<&str> {
        self.headers
            .iter()
            .map(String::as_str)
            .filter(|h| !h.is_empty())
            .collect()
    }

    pub fn has_column(&self, column: &str) -> bool {
        !column.is_empty() && self.headers.iter().any(|h| h == column)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows the service returned, including those dropped during parsing.
    pub fn returned_rows(&self) -> usize {
        self.rows.len() + self.coercion_errors.len()
    }

    pub fn coercion_errors(&self) -> &[CoercionError] {
        &self.coercion_errors
    }

    pub fn warning_count(&self) -> usize {
        self.coercion_errors.len()
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub(crate) fn mark_truncated(mut self) -> Self {
        self.truncated = true;
        self
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(move |(index, values)| Row {
            index: *index,
            headers: &self.headers,
            values,
        })
    }

    /// Distinct non-empty values of `column` in first-seen order.
    pub fn unique_values(&self, column: &str) -> Result<Vec<String>> {
        self.require_column(column)?;

        let mut seen = HashSet::new();
        Ok(self
            .rows()
            .filter_map(|row| row.optional(column))
            .filter(|v| seen.insert(*v))
            .map(str::to_string)
            .collect())
    }

    /// A new result set holding the rows that satisfy `predicate`.
    pub fn filter<F>(&self, predicate: F) -> ResultSet
    where
        F: Fn(&Row<'_>) -> bool,
    {
        let rows = self
            .rows()
            .filter(|row| predicate(row))
            .map(|row| (row.index, row.values.to_vec()))
            .collect();

        ResultSet {
            label: self.label.clone(),
            headers: self.headers.clone(),
            rows,
            coercion_errors: self.coercion_errors.clone(),
            truncated: self.truncated,
        }
    }

    /// Converts every row into `T`, collecting rows that fail.
    pub fn records<T: FromRow>(&self) -> RecordBatch<T> {
        let mut records = Vec::with_capacity(self.rows.len());
        let mut dropped = Vec::new();

        for row in self.rows() {
            match T::from_row(&row) {
                Ok(record) => records.push(record),
                Err(e) => {
                    debug!("{}: {}", self.label, e);
                    dropped.push(e);
                }
            }
        }
        if !dropped.is_empty() {
            warn!("{}: {} row(s) could not be converted", self.label, dropped.len());
        }

        RecordBatch { records, dropped }
    }

    /// Re-serializes the header and retained rows as CSV.
    pub fn to_csv(&self) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        let wrap = |e: csv::Error| PipelineError::Export(format!("{}: {}", self.label, e));

        writer.write_record(&self.headers).map_err(wrap)?;
        for (_, values) in &self.rows {
            writer.write_record(values).map_err(wrap)?;
        }
        writer.into_inner().map_err(|e| wrap(e.into_error().into()))
    }

    fn require_column(&self, column: &str) -> Result<()> {
        if self.has_column(column) {
            Ok(())
        } else {
            Err(PipelineError::Schema {
                query: self.label.clone(),
                missing: vec![column.to_string()],
                available: named(&self.headers),
            })
        }
    }
}

fn named(headers: &[String]) -> Vec<String> {
    headers.iter().filter(|h| !h.is_empty()).cloned().collect()
}

fn check_numeric(row: &Row<'_>) -> Option<CoercionError> {
    for column in REQUIRED_NUMERIC {
        if row.get(column).is_some() {
            if let Err(e) = row.required_f64(column) {
                return Some(e);
            }
        }
    }
    for column in OPTIONAL_NUMERIC {
        if let Err(e) = row.optional_f64(column) {
            return Some(e);
        }
    }
    None
}
