use crate::{FormulaChange, Result, XlCompareError};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Zero-based cell coordinate. Ordering is row-major.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellCoord {
    pub row: u32,
    pub col: u32,
}

impl CellCoord {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// Render as an A1-style address (`(0, 27)` → `AB1`).
    pub fn to_a1(&self) -> String {
        let mut col_index = self.col;
        let mut col_label = String::new();

        loop {
            let rem = (col_index % 26) as u8;
            col_label.push((b'A' + rem) as char);
            if col_index < 26 {
                break;
            }
            col_index = col_index / 26 - 1;
        }

        col_label.chars().rev().collect::<String>() + &(self.row + 1).to_string()
    }

    /// Parse an A1-style address. `$` markers are accepted and ignored.
    pub fn from_a1(a1: &str) -> Option<Self> {
        let mut col: u32 = 0;
        let mut row: u32 = 0;
        let mut saw_letter = false;
        let mut saw_digit = false;

        for ch in a1.chars().filter(|c| *c != '$') {
            if ch.is_ascii_alphabetic() {
                if saw_digit {
                    return None;
                }
                saw_letter = true;
                let upper = ch.to_ascii_uppercase() as u8;
                col = col.checked_mul(26)?.checked_add((upper - b'A' + 1) as u32)?;
            } else if ch.is_ascii_digit() {
                saw_digit = true;
                row = row.checked_mul(10)?.checked_add((ch as u8 - b'0') as u32)?;
            } else {
                return None;
            }
        }

        if !saw_letter || !saw_digit || row == 0 || col == 0 {
            return None;
        }

        Some(Self::new(row - 1, col - 1))
    }
}

impl fmt::Display for CellCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_a1())
    }
}

/// Epoch used to resolve date serial numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DateSystem {
    #[default]
    Excel1900,
    Excel1904,
}

impl DateSystem {
    /// Resolve a serial number to a calendar date-time, rounded to the millisecond.
    ///
    /// In the 1900 system serials below 60 are shifted by one day to account for the
    /// fictitious 1900-02-29; serial 60 itself lands on 1900-02-28.
    pub fn resolve_serial(self, serial: f64) -> Option<NaiveDateTime> {
        // 2_958_465 is 9999-12-31, the last representable spreadsheet date
        if !serial.is_finite() || !(0.0..2_958_466.0).contains(&serial) {
            return None;
        }

        let (base, shift) = match self {
            DateSystem::Excel1900 => (
                NaiveDate::from_ymd_opt(1899, 12, 30)?,
                if serial < 60.0 { 1 } else { 0 },
            ),
            DateSystem::Excel1904 => (NaiveDate::from_ymd_opt(1904, 1, 1)?, 0),
        };

        let days = serial.trunc() as i64 + shift;
        let millis = (serial.fract() * 86_400_000.0).round() as i64;
        base.and_hms_opt(0, 0, 0)?
            .checked_add_signed(Duration::days(days))?
            .checked_add_signed(Duration::milliseconds(millis))
    }
}

/// Typed raw cell value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CellValue {
    #[default]
    Empty,
    Number(f64),
    Text(String),
    Boolean(bool),
    Date(NaiveDateTime),
    /// Spreadsheet error literal such as `#DIV/0!`
    Error(String),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            CellValue::Empty => "empty",
            CellValue::Number(_) => "number",
            CellValue::Text(_) => "text",
            CellValue::Boolean(_) => "boolean",
            CellValue::Date(_) => "date",
            CellValue::Error(_) => "error",
        }
    }

    /// Build a date value from a serial number, or `None` when the serial is out of range.
    pub fn date_from_serial(serial: f64, system: DateSystem) -> Option<Self> {
        system.resolve_serial(serial).map(CellValue::Date)
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Number(n) => write!(f, "{}", n),
            CellValue::Text(s) => f.write_str(s),
            CellValue::Boolean(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
            CellValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d %H:%M:%S")),
            CellValue::Error(e) => f.write_str(e),
        }
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        CellValue::Boolean(b)
    }
}

impl From<NaiveDateTime> for CellValue {
    fn from(d: NaiveDateTime) -> Self {
        CellValue::Date(d)
    }
}

/// A single populated cell
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub coord: CellCoord,
    pub value: CellValue,
    pub formula: Option<String>,
    pub style: Option<String>,
}

impl Cell {
    pub fn new(coord: CellCoord, value: CellValue) -> Self {
        Self {
            coord,
            value,
            formula: None,
            style: None,
        }
    }

    pub fn with_formula(mut self, formula: impl Into<String>) -> Self {
        self.formula = Some(formula.into());
        self
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = Some(style.into());
        self
    }
}

/// A named grid of cells
#[derive(Debug, Clone, Default)]
pub struct Sheet {
    pub name: String,
    /// Cells keyed by coordinate, iterated in row-major order
    pub cells: BTreeMap<CellCoord, Cell>,
    /// Used range reported by the parser, if any
    pub declared_dimensions: Option<(u32, u32)>,
}

impl Sheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cells: BTreeMap::new(),
            declared_dimensions: None,
        }
    }

    pub fn with_declared_dimensions(mut self, rows: u32, cols: u32) -> Self {
        self.declared_dimensions = Some((rows, cols));
        self
    }

    /// Insert a cell under its own coordinate, returning the previous occupant.
    pub fn insert(&mut self, cell: Cell) -> Option<Cell> {
        self.cells.insert(cell.coord, cell)
    }

    pub fn set_value(&mut self, row: u32, col: u32, value: impl Into<CellValue>) {
        let coord = CellCoord::new(row, col);
        let value = value.into();
        match self.cells.get_mut(&coord) {
            Some(cell) => cell.value = value,
            None => {
                self.cells.insert(coord, Cell::new(coord, value));
            }
        }
    }

    pub fn set_formula(&mut self, row: u32, col: u32, formula: impl Into<String>) {
        let coord = CellCoord::new(row, col);
        self.cells
            .entry(coord)
            .or_insert_with(|| Cell::new(coord, CellValue::Empty))
            .formula = Some(formula.into());
    }

    pub fn get(&self, coord: CellCoord) -> Option<&Cell> {
        self.cells.get(&coord)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// (rows, cols) spanned by the populated cells
    pub fn dimensions(&self) -> (u32, u32) {
        let rows = self
            .cells
            .keys()
            .next_back()
            .map(|c| c.row + 1)
            .unwrap_or(0);
        let cols = self.cells.keys().map(|c| c.col + 1).max().unwrap_or(0);
        (rows, cols)
    }

    /// Check that every cell sits under its own coordinate and inside the declared range.
    pub fn validate(&self) -> Result<()> {
        for (key, cell) in &self.cells {
            if *key != cell.coord {
                return Err(XlCompareError::SheetShapeMismatch {
                    sheet: self.name.clone(),
                    detail: format!("cell {} stored under key {}", cell.coord, key),
                });
            }
        }

        if let Some((rows, cols)) = self.declared_dimensions {
            let (actual_rows, actual_cols) = self.dimensions();
            if actual_rows > rows || actual_cols > cols {
                return Err(XlCompareError::SheetShapeMismatch {
                    sheet: self.name.clone(),
                    detail: format!(
                        "cells span {}x{} but declared dimensions are {}x{}",
                        actual_rows, actual_cols, rows, cols
                    ),
                });
            }
        }

        Ok(())
    }
}

/// Kind of macro module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    #[default]
    Standard,
    Class,
    Form,
    /// Code behind a sheet or the workbook itself
    Document,
}

/// A named container of macro source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroModule {
    pub name: String,
    pub kind: ModuleKind,
    pub lines: Vec<String>,
}

impl MacroModule {
    pub fn new(name: impl Into<String>, kind: ModuleKind, lines: Vec<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            lines,
        }
    }

    /// Split raw source on LF or CRLF.
    pub fn from_source(name: impl Into<String>, kind: ModuleKind, source: &str) -> Self {
        let lines = source.lines().map(|l| l.to_string()).collect();
        Self::new(name, kind, lines)
    }
}

/// BLAKE3 digest of a module's source lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleFingerprint(pub [u8; 32]);

impl ModuleFingerprint {
    pub fn of_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        let mut hasher = blake3::Hasher::new();
        for line in lines {
            hasher.update(line.as_bytes());
            hasher.update(b"\n");
        }
        Self(*hasher.finalize().as_bytes())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Document properties carried by the workbook container
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorkbookProperties {
    pub title: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub last_modified_by: Option<String>,
}

/// In-memory workbook handed to the comparison engine
#[derive(Debug, Clone, Default)]
pub struct Workbook {
    /// Path or display name; not used for matching
    pub label: String,
    pub sheets: Vec<Sheet>,
    pub modules: Vec<MacroModule>,
    pub properties: WorkbookProperties,
    pub date_system: DateSystem,
}

impl Workbook {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    pub fn with_sheet(mut self, sheet: Sheet) -> Self {
        self.add_sheet(sheet);
        self
    }

    pub fn with_module(mut self, module: MacroModule) -> Self {
        self.add_module(module);
        self
    }

    /// Add a sheet, replacing any sheet with the same name.
    pub fn add_sheet(&mut self, sheet: Sheet) {
        match self.sheets.iter_mut().find(|s| s.name == sheet.name) {
            Some(existing) => *existing = sheet,
            None => self.sheets.push(sheet),
        }
    }

    /// Add a module, replacing any module with the same name.
    pub fn add_module(&mut self, module: MacroModule) {
        match self.modules.iter_mut().find(|m| m.name == module.name) {
            Some(existing) => *existing = module,
            None => self.modules.push(module),
        }
    }

    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }

    pub fn module(&self, name: &str) -> Option<&MacroModule> {
        self.modules.iter().find(|m| m.name == name)
    }

    /// Nothing to compare: no sheets and no macro modules
    pub fn is_empty(&self) -> bool {
        self.sheets.is_empty() && self.modules.is_empty()
    }
}

/// Options consumed by the comparison engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompareOptions {
    /// Absolute tolerance for numeric cell values
    pub numeric_tolerance: f64,
    /// Treat macro lines that differ only in whitespace as equal
    pub ignore_whitespace_only_line_changes: bool,
    /// Minimum body similarity in [0, 1] for a procedure rename
    pub rename_similarity_threshold: f64,
    /// Drop Unchanged entries from the result (still counted in the summary)
    pub suppress_unchanged_entries: bool,
    /// Treat a style tag change as a cell modification
    pub compare_styles: bool,
    /// Hint reported when a formula changes both references and functions
    pub mixed_change_hint: FormulaChange,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            numeric_tolerance: 0.0,
            ignore_whitespace_only_line_changes: true,
            rename_similarity_threshold: 0.8,
            suppress_unchanged_entries: true,
            compare_styles: false,
            mixed_change_hint: FormulaChange::Other,
        }
    }
}

impl CompareOptions {
    pub fn validate(&self) -> Result<()> {
        if !(self.numeric_tolerance >= 0.0) || !self.numeric_tolerance.is_finite() {
            return Err(XlCompareError::Config(format!(
                "numeric_tolerance must be a finite, non-negative number (got {})",
                self.numeric_tolerance
            )));
        }
        if !(0.0..=1.0).contains(&self.rename_similarity_threshold) {
            return Err(XlCompareError::Config(format!(
                "rename_similarity_threshold must be within [0, 1] (got {})",
                self.rename_similarity_threshold
            )));
        }
        Ok(())
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Enable portable mode (config alongside binary)
    #[serde(default)]
    pub portable_mode: bool,

    /// Engine options
    #[serde(default)]
    pub compare: CompareOptions,
}
