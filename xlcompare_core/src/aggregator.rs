use xlcompare_common::{
    CellDiff, ComparisonResult, DiffEntry, ElidedCounts, FormulaDiff, Issue, MacroDiff,
    PropertyDiff, SheetDiff, Workbook,
};

/// Everything produced for one sheet name
#[derive(Debug, Clone, Default)]
pub struct SheetOutput {
    pub sheet: Option<SheetDiff>,
    pub cells: Vec<CellDiff>,
    pub formulas: Vec<FormulaDiff>,
    pub elided: ElidedCounts,
    pub issues: Vec<Issue>,
}

/// Everything produced for one module name
#[derive(Debug, Clone, Default)]
pub struct ModuleOutput {
    pub macros: Vec<MacroDiff>,
    pub elided: usize,
    pub issues: Vec<Issue>,
}

/// Sheet names in comparison order: before-workbook order, then names only in after.
pub fn sheet_order(before: &Workbook, after: &Workbook) -> Vec<String> {
    merged_order(
        before.sheets.iter().map(|s| s.name.as_str()),
        after.sheets.iter().map(|s| s.name.as_str()),
    )
}

/// Module names in comparison order, same rule as sheets.
pub fn module_order(before: &Workbook, after: &Workbook) -> Vec<String> {
    merged_order(
        before.modules.iter().map(|m| m.name.as_str()),
        after.modules.iter().map(|m| m.name.as_str()),
    )
}

fn merged_order<'a>(
    first: impl Iterator<Item = &'a str>,
    second: impl Iterator<Item = &'a str>,
) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in first.chain(second) {
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Merge per-sheet and per-module outputs into one ordered result.
///
/// Sheets come first, in the order given. Within a sheet the whole-sheet entry leads,
/// then cell and formula entries in row-major order with the cell entry first at a
/// shared coordinate. Macro entries follow in module order.
pub fn aggregate(
    left: &str,
    right: &str,
    sheets: Vec<SheetOutput>,
    modules: Vec<ModuleOutput>,
    property_diffs: Vec<PropertyDiff>,
) -> ComparisonResult {
    let mut entries = Vec::new();
    let mut issues = Vec::new();
    let mut elided = ElidedCounts::default();

    for output in sheets {
        if let Some(sheet) = output.sheet {
            entries.push(DiffEntry::Sheet(sheet));
        }
        entries.extend(interleave(output.cells, output.formulas));
        elided = elided.merge(output.elided);
        issues.extend(output.issues);
    }

    for output in modules {
        entries.extend(output.macros.into_iter().map(DiffEntry::Macro));
        elided.macros += output.elided;
        issues.extend(output.issues);
    }

    ComparisonResult::new(left, right, entries, elided, property_diffs, issues)
}

/// Two coordinate-ordered streams merged by coordinate, cells before formulas on ties.
fn interleave(cells: Vec<CellDiff>, formulas: Vec<FormulaDiff>) -> Vec<DiffEntry> {
    let mut out = Vec::with_capacity(cells.len() + formulas.len());
    let mut cells = cells.into_iter().peekable();
    let mut formulas = formulas.into_iter().peekable();

    loop {
        let take_cell = match (cells.peek(), formulas.peek()) {
            (None, None) => break,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (Some(c), Some(f)) => c.coord <= f.coord,
        };
        let next = if take_cell {
            cells.next().map(DiffEntry::Cell)
        } else {
            formulas.next().map(DiffEntry::Formula)
        };
        out.extend(next);
    }
    out
}
