//! Plan loader: built-in templates and CSV action tables.
//!
//! A table row carries `brightness` (decimal), `duration` (decimal seconds,
//! >= 0) and `shutter` (0 or 1). Header names are exact and extra columns are
//! ignored. Each valid row becomes one step: set the LED brightness, set the
//! shutter, then hold for `duration`.
//!
//! Rows that fail to parse are skipped and reported as [`SkippedRow`]s; the
//! loader only fails when nothing usable is left.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::path::Path;
use std::time::Duration;

use crate::config::channels::{LED_BRIGHTNESS, SHUTTER_ENABLE};
use crate::error::{AppResult, DaqError};
use crate::experiment::plans::{self, Action, ActionPlan, RestState, Template};

/// One raw table record: header name -> cell text.
pub type Row = HashMap<String, String>;

/// A row that was dropped while loading a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRow {
    /// 1-based data row index (the header is not counted)
    pub row: usize,
    /// Row content as read, rendered `key=value` in header order
    pub raw: String,
    /// Why the row was dropped
    pub reason: String,
}

impl fmt::Display for SkippedRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {} ({}): {}", self.row, self.raw, self.reason)
    }
}

/// A plan plus the diagnostics gathered while building it.
#[derive(Debug, Clone)]
pub struct LoadedPlan {
    /// Plan built from the valid rows
    pub plan: ActionPlan,
    /// Rows dropped while loading, in row order
    pub skipped: Vec<SkippedRow>,
}

/// Builds action plans from templates or tables.
pub struct PlanLoader;

impl PlanLoader {
    /// Build one of the built-in templates.
    pub fn load_fixed(template: Template) -> AppResult<ActionPlan> {
        match template {
            Template::SmokeTest => plans::smoke_test(),
            Template::LinearSweep { steps, hold } => plans::linear_sweep(steps, hold),
        }
    }

    /// Build a plan from already-read rows, skipping malformed ones.
    pub fn load_from_table<I>(rows: I) -> AppResult<LoadedPlan>
    where
        I: IntoIterator<Item = Row>,
    {
        Self::load_rows("action_table", rows.into_iter().map(Ok), &[])
    }

    /// Read a CSV action table and build a plan from it.
    pub fn load_from_csv<P: AsRef<Path>>(path: P) -> AppResult<LoadedPlan> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| DaqError::SourceNotFound {
            path: path.to_path_buf(),
            source,
        })?;

        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(file);
        let headers: Vec<String> = reader
            .byte_headers()
            .map_err(|e| header_error(path, e))?
            .iter()
            .map(|name| String::from_utf8_lossy(name).into_owned())
            .collect();

        let records = reader.byte_records().map(|record| {
            let record = record.map_err(|e| (String::new(), e.to_string()))?;
            decode_record(&headers, &record)
        });

        let source = path.display().to_string();
        Self::load_rows(&source, records, &headers)
    }

    fn load_rows<I>(source: &str, rows: I, header_order: &[String]) -> AppResult<LoadedPlan>
    where
        I: Iterator<Item = Result<Row, (String, String)>>,
    {
        let mut builder = ActionPlan::builder("action_table").source(source);
        let mut skipped = Vec::new();
        let mut total = 0usize;
        let mut valid = 0usize;

        for (i, row) in rows.enumerate() {
            let index = i + 1;
            total += 1;
            let outcome = match row {
                Ok(row) => parse_row(&row).map_err(|reason| (render_row(&row, header_order), reason)),
                Err(unreadable) => Err(unreadable),
            };

            match outcome {
                Ok(actions) => {
                    valid += 1;
                    builder = builder.step_at(index, actions);
                }
                Err((raw, reason)) => {
                    let row = SkippedRow { row: index, raw, reason };
                    tracing::warn!(source, row = row.row, raw = %row.raw, reason = %row.reason, "Skipping invalid row");
                    skipped.push(row);
                }
            }
        }

        if valid == 0 {
            let reason = if total == 0 {
                format!("{source}: no rows")
            } else {
                format!("{source}: none of {total} rows were valid")
            };
            return Err(DaqError::EmptyPlan(reason));
        }

        let plan = builder
            .rest_state(
                RestState::new()
                    .with(LED_BRIGHTNESS, 0.0)
                    .with(SHUTTER_ENABLE, false),
            )
            .build()?;
        tracing::info!(source, steps = plan.len(), skipped = skipped.len(), "Loaded action table");
        Ok(LoadedPlan { plan, skipped })
    }
}

/// An I/O failure on the header means the source could not be read at all.
fn header_error(path: &Path, error: csv::Error) -> DaqError {
    let message = error.to_string();
    match error.into_kind() {
        csv::ErrorKind::Io(source) => DaqError::SourceNotFound {
            path: path.to_path_buf(),
            source,
        },
        _ => DaqError::InvalidPlan(format!("{}: unreadable header: {}", path.display(), message)),
    }
}

/// Decode a raw record; on bad UTF-8 the raw content is kept, rendered lossily.
fn decode_record(headers: &[String], record: &csv::ByteRecord) -> Result<Row, (String, String)> {
    let mut row = Row::new();
    for (name, field) in headers.iter().zip(record.iter()) {
        match std::str::from_utf8(field) {
            Ok(text) => {
                row.insert(name.clone(), text.to_string());
            }
            Err(_) => {
                let raw = headers
                    .iter()
                    .zip(record.iter())
                    .map(|(k, v)| format!("{}={}", k, String::from_utf8_lossy(v)))
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err((raw, format!("field '{name}' is not valid UTF-8")));
            }
        }
    }
    Ok(row)
}

fn field<'a>(row: &'a Row, name: &str) -> Result<&'a str, String> {
    row.get(name)
        .map(|v| v.trim())
        .ok_or_else(|| format!("missing field '{name}'"))
}

fn parse_row(row: &Row) -> Result<Vec<Action>, String> {
    let brightness_text = field(row, "brightness")?;
    let brightness: f64 = brightness_text
        .parse()
        .map_err(|_| format!("brightness '{brightness_text}' is not a number"))?;
    if !brightness.is_finite() {
        return Err(format!("brightness '{brightness_text}' is not finite"));
    }

    let duration_text = field(row, "duration")?;
    let duration: f64 = duration_text
        .parse()
        .map_err(|_| format!("duration '{duration_text}' is not a number"))?;
    let hold = Duration::try_from_secs_f64(duration)
        .map_err(|_| format!("duration '{duration_text}' must be a finite, non-negative number of seconds"))?;

    let shutter_text = field(row, "shutter")?;
    let shutter = match shutter_text.parse::<i64>() {
        Ok(0) => false,
        Ok(1) => true,
        Ok(other) => return Err(format!("shutter must be 0 or 1, got {other}")),
        Err(_) => return Err(format!("shutter '{shutter_text}' is not an integer")),
    };

    Ok(vec![
        Action::set(LED_BRIGHTNESS, brightness),
        Action::set(SHUTTER_ENABLE, shutter).hold(hold),
    ])
}

/// `key=value` pairs in header order when known, otherwise sorted by key.
fn render_row(row: &Row, header_order: &[String]) -> String {
    let mut keys: Vec<&String> = if header_order.is_empty() {
        row.keys().collect()
    } else {
        header_order.iter().filter(|k| row.contains_key(*k)).collect()
    };
    if header_order.is_empty() {
        keys.sort();
    }
    keys.iter()
        .map(|k| format!("{}={}", k, row.get(*k).map(String::as_str).unwrap_or("")))
        .collect::<Vec<_>>()
        .join(", ")
}
