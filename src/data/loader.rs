//! Sales Data Loader Module
//! Reads fixed-layout monthly sales sheets (delimited text or workbooks)
//! into a tidy table.

use crate::config::LayoutConfig;
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use polars::prelude::*;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

pub const MONTH_COL: &str = "month";
pub const CATEGORY_COL: &str = "category";
pub const SALES_A_COL: &str = "sales_a";
pub const SALES_B_COL: &str = "sales_b";

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to read input: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse delimited data: {0}")]
    Csv(#[from] PolarsError),
    #[error("Failed to read workbook: {0}")]
    Workbook(#[from] calamine::Error),
    #[error("Worksheet '{0}' not found")]
    SheetNotFound(String),
    #[error("Workbook has no worksheets")]
    EmptySheet,
    #[error("Sheet has {found} columns but the layout needs at least {required}")]
    MissingColumns { required: usize, found: usize },
    #[error("Unsupported input format: {0}")]
    UnsupportedFormat(String),
    #[error("No data rows with both month and category")]
    NoData,
}

/// Field separators tried when sniffing delimited text.
const SEPARATORS: [u8; 3] = [b',', b';', b'\t'];
/// Lines inspected when sniffing the separator.
const SNIFF_LINES: usize = 8;

/// Input encodings the loader understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    /// Delimited text with its field separator.
    Delimited(u8),
    Workbook,
}

impl InputFormat {
    /// Pick a format from the file name, falling back to the leading bytes.
    pub fn detect(name: &str, bytes: &[u8]) -> Result<Self, LoadError> {
        let ext = Path::new(name)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase());

        match ext.as_deref() {
            Some("tsv") => Ok(InputFormat::Delimited(b'\t')),
            Some("csv") | Some("txt") => Ok(InputFormat::Delimited(sniff_separator(bytes))),
            Some("xlsx") | Some("xlsm") | Some("xlsb") | Some("xls") | Some("ods") => {
                Ok(InputFormat::Workbook)
            }
            Some(other) if !Self::is_workbook_magic(bytes) && !Self::looks_textual(bytes) => {
                Err(LoadError::UnsupportedFormat(other.to_string()))
            }
            _ if Self::is_workbook_magic(bytes) => Ok(InputFormat::Workbook),
            _ if Self::looks_textual(bytes) => Ok(InputFormat::Delimited(sniff_separator(bytes))),
            _ => Err(LoadError::UnsupportedFormat(name.to_string())),
        }
    }

    /// ZIP (xlsx/ods) or OLE compound document (xls).
    fn is_workbook_magic(bytes: &[u8]) -> bool {
        bytes.starts_with(b"PK\x03\x04") || bytes.starts_with(&[0xD0, 0xCF, 0x11, 0xE0])
    }

    fn looks_textual(bytes: &[u8]) -> bool {
        let head = &bytes[..bytes.len().min(512)];
        std::str::from_utf8(head).is_ok() && !head.contains(&0)
    }
}

/// One data row after header-skip and coercion.
#[derive(Debug, Clone, PartialEq)]
pub struct SalesRow {
    pub month: u32,
    pub category: String,
    pub sales_a: Option<f64>,
    pub sales_b: Option<f64>,
}

/// Tidy table: one row per (month, category) with both years' sales as columns.
#[derive(Debug, Clone)]
pub struct SalesTable {
    df: DataFrame,
    year_a: i32,
    year_b: i32,
    fingerprint: u64,
}

impl SalesTable {
    /// Build a table from already-coerced rows.
    pub fn from_rows(rows: &[SalesRow], year_a: i32, year_b: i32) -> Result<Self, PolarsError> {
        let months: Vec<i32> = rows.iter().map(|r| r.month as i32).collect();
        let categories: Vec<&str> = rows.iter().map(|r| r.category.as_str()).collect();
        let sales_a: Vec<Option<f64>> = rows.iter().map(|r| r.sales_a).collect();
        let sales_b: Vec<Option<f64>> = rows.iter().map(|r| r.sales_b).collect();

        let df = DataFrame::new(vec![
            Column::new(MONTH_COL.into(), months),
            Column::new(CATEGORY_COL.into(), categories),
            Column::new(SALES_A_COL.into(), sales_a),
            Column::new(SALES_B_COL.into(), sales_b),
        ])?;

        Ok(Self {
            df,
            year_a,
            year_b,
            fingerprint: Self::hash_rows(rows, year_a, year_b),
        })
    }

    fn hash_rows(rows: &[SalesRow], year_a: i32, year_b: i32) -> u64 {
        let mut hasher = DefaultHasher::new();
        year_a.hash(&mut hasher);
        year_b.hash(&mut hasher);
        for row in rows {
            row.month.hash(&mut hasher);
            row.category.hash(&mut hasher);
            row.sales_a.map(f64::to_bits).hash(&mut hasher);
            row.sales_b.map(f64::to_bits).hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Dataset identity: equal contents give equal fingerprints.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn year_a(&self) -> i32 {
        self.year_a
    }

    pub fn year_b(&self) -> i32 {
        self.year_b
    }

    pub fn len(&self) -> usize {
        self.df.height()
    }

    pub fn is_empty(&self) -> bool {
        self.df.height() == 0
    }

    /// Polars view with columns month, category, sales_a, sales_b.
    pub fn dataframe(&self) -> &DataFrame {
        &self.df
    }

    /// Distinct categories in order of first appearance.
    pub fn categories(&self) -> Vec<String> {
        let Ok(ca) = self.df.column(CATEGORY_COL).and_then(|c| c.str().cloned()) else {
            return Vec::new();
        };

        let mut seen = HashSet::new();
        ca.into_iter()
            .flatten()
            .filter(|c| seen.insert(c.to_string()))
            .map(|c| c.to_string())
            .collect()
    }

    /// All rows in source order.
    pub fn rows(&self) -> Vec<SalesRow> {
        Self::collect_rows(&self.df).unwrap_or_default()
    }

    /// Rows belonging to one category, in source order.
    pub fn rows_for(&self, category: &str) -> Vec<SalesRow> {
        self.df
            .clone()
            .lazy()
            .filter(col(CATEGORY_COL).eq(lit(category)))
            .collect()
            .ok()
            .and_then(|df| Self::collect_rows(&df).ok())
            .unwrap_or_default()
    }

    fn collect_rows(df: &DataFrame) -> PolarsResult<Vec<SalesRow>> {
        let months = df.column(MONTH_COL)?.i32()?;
        let categories = df.column(CATEGORY_COL)?.str()?;
        let sales_a = df.column(SALES_A_COL)?.f64()?;
        let sales_b = df.column(SALES_B_COL)?.f64()?;

        Ok(months
            .into_iter()
            .zip(categories)
            .zip(sales_a)
            .zip(sales_b)
            .filter_map(|(((m, c), a), b)| {
                Some(SalesRow {
                    month: u32::try_from(m?).ok()?,
                    category: c?.to_string(),
                    sales_a: a,
                    sales_b: b,
                })
            })
            .collect())
    }
}

/// Loads sales sheets according to a fixed column layout.
pub struct DataLoader {
    layout: LayoutConfig,
}

impl Default for DataLoader {
    fn default() -> Self {
        Self::new(LayoutConfig::default())
    }
}

impl DataLoader {
    pub fn new(layout: LayoutConfig) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &LayoutConfig {
        &self.layout
    }

    /// Load a sheet from disk; the format follows the file extension.
    pub fn load_path(&self, path: &Path) -> Result<SalesTable, LoadError> {
        let bytes = std::fs::read(path)?;
        self.load_bytes(&path.to_string_lossy(), &bytes)
    }

    /// Load a sheet from an in-memory upload.
    pub fn load_bytes(&self, name: &str, bytes: &[u8]) -> Result<SalesTable, LoadError> {
        let raw = match InputFormat::detect(name, bytes)? {
            InputFormat::Delimited(separator) => self.read_delimited(bytes, separator)?,
            InputFormat::Workbook => self.read_workbook(bytes)?,
        };
        let rows = self.tidy_rows(&raw)?;
        debug!("Loaded {} rows from {}", rows.len(), name);

        Ok(SalesTable::from_rows(
            &rows,
            self.layout.year_a,
            self.layout.year_b,
        )?)
    }

    /// Read delimited text with every cell kept as a string.
    ///
    /// The frame is as wide as the widest data row; shorter rows are padded
    /// with nulls.
    fn read_delimited(&self, bytes: &[u8], separator: u8) -> Result<DataFrame, LoadError> {
        let width = widest_record(bytes, separator, self.layout.header_rows);
        if width == 0 {
            return Err(LoadError::NoData);
        }

        let mut schema = Schema::with_capacity(width);
        for i in 0..width {
            schema.with_column(format!("column_{}", i + 1).into(), DataType::String);
        }
        debug!(
            "Reading delimited input, separator {:?}, {} columns",
            separator as char, width
        );

        let df = CsvReadOptions::default()
            .with_has_header(false)
            .with_skip_rows(self.layout.header_rows)
            .with_schema(Some(Arc::new(schema)))
            .with_parse_options(
                CsvParseOptions::default()
                    .with_separator(separator)
                    .with_missing_is_null(true)
                    .with_truncate_ragged_lines(true),
            )
            .into_reader_with_file_handle(Cursor::new(bytes.to_vec()))
            .finish()?;
        Ok(df)
    }

    /// Read the configured worksheet into string columns, positions preserved.
    fn read_workbook(&self, bytes: &[u8]) -> Result<DataFrame, LoadError> {
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;

        let range = match &self.layout.sheet {
            Some(name) => {
                if !workbook.sheet_names().iter().any(|s| s == name) {
                    return Err(LoadError::SheetNotFound(name.clone()));
                }
                workbook.worksheet_range(name)?
            }
            None => workbook.worksheet_range_at(0).ok_or(LoadError::EmptySheet)??,
        };

        // Range coordinates start at the first used cell, not at A1.
        let (row0, col0) = range.start().unwrap_or((0, 0));
        let width = col0 as usize + range.width();

        let mut columns: Vec<Vec<Option<String>>> = vec![Vec::new(); width];
        for (i, row) in range.rows().enumerate() {
            if row0 as usize + i < self.layout.header_rows {
                continue;
            }
            for (c, column) in columns.iter_mut().enumerate() {
                let cell = c
                    .checked_sub(col0 as usize)
                    .and_then(|j| row.get(j))
                    .and_then(cell_to_text);
                column.push(cell);
            }
        }

        let df = DataFrame::new(
            columns
                .into_iter()
                .enumerate()
                .map(|(i, values)| Column::new(format!("column_{}", i + 1).into(), values))
                .collect(),
        )?;
        Ok(df)
    }

    /// Apply the layout: pick columns, coerce values, drop rows without month or category.
    fn tidy_rows(&self, raw: &DataFrame) -> Result<Vec<SalesRow>, LoadError> {
        let required = self.layout.required_columns();
        if raw.width() < required {
            return Err(LoadError::MissingColumns {
                required,
                found: raw.width(),
            });
        }

        let text_column = |idx: usize| -> Result<StringChunked, LoadError> {
            let column = raw.get_columns()[idx].cast(&DataType::String)?;
            Ok(column.str()?.clone())
        };
        let months = text_column(self.layout.month_column)?;
        let categories = text_column(self.layout.category_column)?;
        let sales_a = text_column(self.layout.year_a_column)?;
        let sales_b = text_column(self.layout.year_b_column)?;

        let mut rows = Vec::with_capacity(raw.height());
        let mut dropped = 0usize;

        for (((m, c), a), b) in months
            .into_iter()
            .zip(categories.into_iter())
            .zip(sales_a.into_iter())
            .zip(sales_b.into_iter())
        {
            let month = m.and_then(parse_month);
            let category = c.map(str::trim).filter(|c| !c.is_empty());

            match (month, category) {
                (Some(month), Some(category)) => rows.push(SalesRow {
                    month,
                    category: category.to_string(),
                    sales_a: a.and_then(parse_sales),
                    sales_b: b.and_then(parse_sales),
                }),
                _ => dropped += 1,
            }
        }

        if dropped > 0 {
            debug!("Dropped {} rows without month or category", dropped);
        }
        if rows.is_empty() {
            return Err(LoadError::NoData);
        }
        Ok(rows)
    }
}

/// The separator seen most often in the leading lines; comma on a tie.
fn sniff_separator(bytes: &[u8]) -> u8 {
    let head: Vec<&[u8]> = bytes.split(|&b| b == b'\n').take(SNIFF_LINES).collect();
    let count = |sep: u8| -> usize {
        head.iter()
            .map(|line| line.iter().filter(|&&b| b == sep).count())
            .sum()
    };
    SEPARATORS
        .iter()
        .copied()
        .fold((b',', 0), |best, sep| {
            let n = count(sep);
            if n > best.1 {
                (sep, n)
            } else {
                best
            }
        })
        .0
}

/// Field count of the widest record after `skip` header records.
///
/// Separators and line breaks inside double quotes do not count.
fn widest_record(bytes: &[u8], separator: u8, skip: usize) -> usize {
    let mut record = 0usize;
    let mut fields = 1usize;
    let mut widest = 0usize;
    let mut in_quotes = false;
    let mut has_content = false;

    for &b in bytes {
        match b {
            b'"' => {
                in_quotes = !in_quotes;
                has_content = true;
            }
            b'\n' if !in_quotes => {
                if record >= skip && has_content {
                    widest = widest.max(fields);
                }
                record += 1;
                fields = 1;
                has_content = false;
            }
            b'\r' if !in_quotes => {}
            _ if b == separator && !in_quotes => {
                fields += 1;
                has_content = true;
            }
            _ => has_content = true,
        }
    }
    if record >= skip && has_content {
        widest = widest.max(fields);
    }
    widest
}

/// Calendar month 1..=12; anything else counts as missing.
fn parse_month(text: &str) -> Option<u32> {
    let value: f64 = text.trim().parse().ok()?;
    if value.fract() != 0.0 || !(1.0..=12.0).contains(&value) {
        return None;
    }
    Some(value as u32)
}

/// Non-numeric sales cells become missing, never an error.
fn parse_sales(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn cell_to_text(cell: &Data) -> Option<String> {
    match cell {
        Data::String(v) => Some(v.clone()),
        Data::Float(v) => Some(v.to_string()),
        Data::Int(v) => Some(v.to_string()),
        Data::Bool(v) => Some(v.to_string()),
        Data::DateTime(v) => Some(v.as_f64().to_string()),
        Data::DateTimeIso(v) => Some(v.clone()),
        Data::DurationIso(v) => Some(v.clone()),
        Data::Error(_) | Data::Empty => None,
    }
}
