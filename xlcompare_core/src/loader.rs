use calamine::{open_workbook_auto, Data, Range, Reader};
use chrono::{NaiveDate, NaiveDateTime};
use std::path::Path;
use tracing::{debug, warn};
use xlcompare_common::{CellValue, DateSystem, MacroModule, ModuleKind, Sheet, Workbook, XlCompareError};

/// Check if a file path appears to be a workbook based on extension
pub fn is_workbook_file(path: &Path) -> bool {
    if let Some(ext) = path.extension() {
        let ext = ext.to_string_lossy().to_lowercase();
        matches!(ext.as_str(), "xlsx" | "xls" | "xlsm" | "xlsb" | "ods")
    } else {
        false
    }
}

/// Read a workbook file into the in-memory model: values, formulas and, when the
/// container carries a VBA project, macro modules.
pub fn load_workbook(path: &Path) -> Result<Workbook, XlCompareError> {
    let mut source = open_workbook_auto(path)
        .map_err(|e| XlCompareError::Load(format!("{}: {}", path.display(), e)))?;

    let mut workbook = Workbook::new(path.display().to_string());
    let sheet_names = source.sheet_names().to_vec();

    for name in &sheet_names {
        let range = source
            .worksheet_range(name)
            .map_err(|e| XlCompareError::Load(format!("sheet '{}': {}", name, e)))?;
        let mut sheet = sheet_from_range(name, &range, workbook.date_system);

        match source.worksheet_formula(name) {
            Ok(formulas) => apply_formulas(&mut sheet, &formulas),
            Err(e) => debug!("No formulas read for sheet '{}': {}", name, e),
        }

        debug!("Loaded sheet '{}' with {} cells", name, sheet.len());
        workbook.add_sheet(sheet);
    }

    match source.vba_project() {
        Some(Ok(project)) => {
            for name in project.get_module_names() {
                match project.get_module(name) {
                    Ok(code) => workbook.add_module(module_from_source(name, &code)),
                    Err(e) => warn!("Skipping macro module '{}': {}", name, e),
                }
            }
        }
        Some(Err(e)) => warn!("Unreadable VBA project in {}: {}", path.display(), e),
        None => {}
    }

    Ok(workbook)
}

fn sheet_from_range(name: &str, range: &Range<Data>, dates: DateSystem) -> Sheet {
    let (start_row, start_col) = range.start().unwrap_or((0, 0));
    let mut sheet = match range.end() {
        Some((end_row, end_col)) => Sheet::new(name).with_declared_dimensions(end_row + 1, end_col + 1),
        None => Sheet::new(name),
    };

    for (row, col, data) in range.cells() {
        let value = convert_value(data, dates);
        if !value.is_empty() {
            sheet.set_value(start_row + row as u32, start_col + col as u32, value);
        }
    }
    sheet
}

fn apply_formulas(sheet: &mut Sheet, formulas: &Range<String>) {
    let (start_row, start_col) = formulas.start().unwrap_or((0, 0));
    for (row, col, formula) in formulas.cells() {
        if formula.trim().is_empty() {
            continue;
        }
        let text = if formula.starts_with('=') {
            formula.clone()
        } else {
            format!("={}", formula)
        };
        sheet.set_formula(start_row + row as u32, start_col + col as u32, text);
    }

    // Formula ranges can reach past the value range when cached results are empty
    if let (Some((rows, cols)), (used_rows, used_cols)) = (sheet.declared_dimensions, sheet.dimensions()) {
        sheet.declared_dimensions = Some((rows.max(used_rows), cols.max(used_cols)));
    }
}

fn convert_value(data: &Data, dates: DateSystem) -> CellValue {
    match data {
        Data::Empty => CellValue::Empty,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Float(f) => CellValue::Number(*f),
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Bool(b) => CellValue::Boolean(*b),
        Data::Error(e) => CellValue::Error(e.to_string()),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(CellValue::Date)
            .or_else(|| CellValue::date_from_serial(dt.as_f64(), dates))
            .unwrap_or(CellValue::Number(dt.as_f64())),
        Data::DateTimeIso(s) => parse_iso_datetime(s)
            .map(CellValue::Date)
            .unwrap_or_else(|| CellValue::Text(s.clone())),
        Data::DurationIso(s) => CellValue::Text(s.clone()),
    }
}

fn parse_iso_datetime(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Document modules are the code behind the workbook and its sheets; the container
/// does not record the kind of the others.
fn module_from_source(name: &str, code: &str) -> MacroModule {
    let lines: Vec<String> = code
        .lines()
        .filter(|line| !line.starts_with("Attribute VB_"))
        .map(str::to_string)
        .collect();
    let kind = if name == "ThisWorkbook" || name.starts_with("Sheet") {
        ModuleKind::Document
    } else {
        ModuleKind::Standard
    };
    MacroModule::new(name, kind, lines)
}
