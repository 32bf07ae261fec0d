use crate::{CellCoord, CellValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Classification of a single difference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffKind {
    Added,
    Removed,
    Modified,
    Unchanged,
}

impl DiffKind {
    /// Classification seen from the other side of the comparison
    pub fn inverse(self) -> Self {
        match self {
            DiffKind::Added => DiffKind::Removed,
            DiffKind::Removed => DiffKind::Added,
            other => other,
        }
    }
}

/// Which stream produced an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffDomain {
    Sheet,
    Cell,
    Formula,
    Macro,
}

/// Best-effort hint describing how a formula changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FormulaChange {
    /// Same functions and operators, only cell references differ
    ReferenceShift,
    /// Functions or operators differ
    LogicChange,
    Other,
}

/// Whole-sheet presence change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetDiff {
    pub sheet: String,
    pub kind: DiffKind,
    pub before_dimensions: Option<(u32, u32)>,
    pub after_dimensions: Option<(u32, u32)>,
}

/// Raw value difference at one coordinate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellDiff {
    pub sheet: String,
    pub coord: CellCoord,
    pub kind: DiffKind,
    pub before: CellValue,
    pub after: CellValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before_style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after_style: Option<String>,
}

/// Formula difference at one coordinate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormulaDiff {
    pub sheet: String,
    pub coord: CellCoord,
    pub kind: DiffKind,
    /// Set for Modified entries only
    pub change: Option<FormulaChange>,
    pub before: Option<String>,
    pub after: Option<String>,
    /// At least one side could not be tokenized and was compared as text
    pub malformed: bool,
}

/// What part of a macro module an entry describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MacroScope {
    Module,
    /// Lines outside any procedure
    Declarations,
    Procedure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditOp {
    Keep,
    Insert,
    Delete,
}

/// One line-level edit. Line numbers are 1-based within the module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineEdit {
    pub op: EditOp,
    pub old_line: Option<usize>,
    pub new_line: Option<usize>,
    pub text: String,
}

impl LineEdit {
    pub fn is_change(&self) -> bool {
        self.op != EditOp::Keep
    }
}

/// Macro difference at module, declarations, or procedure granularity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroDiff {
    pub module: String,
    /// Procedure name on the side where it exists (the new name for renames)
    pub procedure: Option<String>,
    pub scope: MacroScope,
    pub kind: DiffKind,
    /// Previous name when the procedure was detected as renamed
    pub renamed_from: Option<String>,
    /// Kind, visibility, `Static`, parameters or return type differ between the matched procedures
    #[serde(default)]
    pub signature_changed: bool,
    /// Body similarity in [0, 1] for matched or renamed procedures
    pub similarity: Option<f64>,
    /// The module could not be split into procedures and was diffed as a whole
    pub degraded: bool,
    pub edits: Vec<LineEdit>,
}

impl MacroDiff {
    pub fn inserted_lines(&self) -> usize {
        self.edits.iter().filter(|e| e.op == EditOp::Insert).count()
    }

    pub fn deleted_lines(&self) -> usize {
        self.edits.iter().filter(|e| e.op == EditOp::Delete).count()
    }
}

/// One entry of a comparison result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "domain", rename_all = "snake_case")]
pub enum DiffEntry {
    Sheet(SheetDiff),
    Cell(CellDiff),
    Formula(FormulaDiff),
    Macro(MacroDiff),
}

impl DiffEntry {
    pub fn kind(&self) -> DiffKind {
        match self {
            DiffEntry::Sheet(d) => d.kind,
            DiffEntry::Cell(d) => d.kind,
            DiffEntry::Formula(d) => d.kind,
            DiffEntry::Macro(d) => d.kind,
        }
    }

    pub fn domain(&self) -> DiffDomain {
        match self {
            DiffEntry::Sheet(_) => DiffDomain::Sheet,
            DiffEntry::Cell(_) => DiffDomain::Cell,
            DiffEntry::Formula(_) => DiffDomain::Formula,
            DiffEntry::Macro(_) => DiffDomain::Macro,
        }
    }

    pub fn sheet(&self) -> Option<&str> {
        match self {
            DiffEntry::Sheet(d) => Some(&d.sheet),
            DiffEntry::Cell(d) => Some(&d.sheet),
            DiffEntry::Formula(d) => Some(&d.sheet),
            DiffEntry::Macro(_) => None,
        }
    }

    pub fn module(&self) -> Option<&str> {
        match self {
            DiffEntry::Macro(d) => Some(&d.module),
            _ => None,
        }
    }

    pub fn coord(&self) -> Option<CellCoord> {
        match self {
            DiffEntry::Cell(d) => Some(d.coord),
            DiffEntry::Formula(d) => Some(d.coord),
            _ => None,
        }
    }
}

/// Per-classification counts for one domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KindCounts {
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
    pub unchanged: usize,
}

impl KindCounts {
    fn bump(&mut self, kind: DiffKind) {
        match kind {
            DiffKind::Added => self.added += 1,
            DiffKind::Removed => self.removed += 1,
            DiffKind::Modified => self.modified += 1,
            DiffKind::Unchanged => self.unchanged += 1,
        }
    }

    /// Added + Removed + Modified
    pub fn changed(&self) -> usize {
        self.added + self.removed + self.modified
    }
}

/// Counts of Modified formulas per change hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FormulaChangeCounts {
    pub reference_shift: usize,
    pub logic_change: usize,
    pub other: usize,
}

/// Unchanged entries dropped from the result before aggregation, per domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ElidedCounts {
    pub cells: usize,
    pub formulas: usize,
    pub macros: usize,
}

impl ElidedCounts {
    pub fn merge(self, other: ElidedCounts) -> Self {
        Self {
            cells: self.cells + other.cells,
            formulas: self.formulas + other.formulas,
            macros: self.macros + other.macros,
        }
    }
}

/// Summary counts, always derived from the entries of a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Summary {
    pub sheets: KindCounts,
    pub cells: KindCounts,
    pub formulas: KindCounts,
    pub macros: KindCounts,
    pub formula_changes: FormulaChangeCounts,
    pub property_differences: usize,
    pub issues: usize,
}

impl Summary {
    fn from_parts(entries: &[DiffEntry], elided: ElidedCounts, properties: usize, issues: usize) -> Self {
        let mut summary = Summary::default();

        for entry in entries {
            let kind = entry.kind();
            match entry {
                DiffEntry::Sheet(_) => summary.sheets.bump(kind),
                DiffEntry::Cell(_) => summary.cells.bump(kind),
                DiffEntry::Formula(d) => {
                    summary.formulas.bump(kind);
                    match d.change {
                        Some(FormulaChange::ReferenceShift) => summary.formula_changes.reference_shift += 1,
                        Some(FormulaChange::LogicChange) => summary.formula_changes.logic_change += 1,
                        Some(FormulaChange::Other) => summary.formula_changes.other += 1,
                        None => {}
                    }
                }
                DiffEntry::Macro(_) => summary.macros.bump(kind),
            }
        }

        summary.cells.unchanged += elided.cells;
        summary.formulas.unchanged += elided.formulas;
        summary.macros.unchanged += elided.macros;
        summary.property_differences = properties;
        summary.issues = issues;
        summary
    }

    pub fn total_differences(&self) -> usize {
        self.sheets.changed()
            + self.cells.changed()
            + self.formulas.changed()
            + self.macros.changed()
            + self.property_differences
    }

    pub fn is_identical(&self) -> bool {
        self.total_differences() == 0
    }

    /// Short review hints for report consumers
    pub fn recommendations(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.sheets.changed() > 0 || self.cells.changed() > 0 {
            out.push("Review sheet structure and cell value differences");
        }
        if self.formulas.changed() > 0 {
            out.push("Check formula changes for accuracy");
        }
        if self.macros.changed() > 0 {
            out.push("Verify macro code modifications");
        }
        if self.property_differences > 0 {
            out.push("Confirm document property changes");
        }
        out
    }
}

/// Document property that differs between the two workbooks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDiff {
    pub property: String,
    pub before: Option<String>,
    pub after: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    MalformedFormula,
    SheetShapeMismatch,
    ModuleParse,
}

/// A recovered, non-fatal problem encountered during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub kind: IssueKind,
    /// `Sheet!A1`, `Sheet`, or `Module` depending on the kind
    pub location: String,
    pub message: String,
}

/// Complete, immutable outcome of one comparison run
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonResult {
    left: String,
    right: String,
    entries: Vec<DiffEntry>,
    summary: Summary,
    property_diffs: Vec<PropertyDiff>,
    issues: Vec<Issue>,
    #[serde(skip)]
    sheet_index: HashMap<String, Vec<usize>>,
    #[serde(skip)]
    module_index: HashMap<String, Vec<usize>>,
}

impl ComparisonResult {
    /// Take ownership of ordered entries; the summary and indexes are derived here.
    pub fn new(
        left: impl Into<String>,
        right: impl Into<String>,
        entries: Vec<DiffEntry>,
        elided: ElidedCounts,
        property_diffs: Vec<PropertyDiff>,
        issues: Vec<Issue>,
    ) -> Self {
        let summary = Summary::from_parts(&entries, elided, property_diffs.len(), issues.len());

        let mut sheet_index: HashMap<String, Vec<usize>> = HashMap::new();
        let mut module_index: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, entry) in entries.iter().enumerate() {
            if let Some(sheet) = entry.sheet() {
                sheet_index.entry(sheet.to_string()).or_default().push(idx);
            }
            if let Some(module) = entry.module() {
                module_index.entry(module.to_string()).or_default().push(idx);
            }
        }

        Self {
            left: left.into(),
            right: right.into(),
            entries,
            summary,
            property_diffs,
            issues,
            sheet_index,
            module_index,
        }
    }

    pub fn left(&self) -> &str {
        &self.left
    }

    pub fn right(&self) -> &str {
        &self.right
    }

    /// All entries in aggregation order
    pub fn entries(&self) -> &[DiffEntry] {
        &self.entries
    }

    pub fn summary(&self) -> &Summary {
        &self.summary
    }

    pub fn property_diffs(&self) -> &[PropertyDiff] {
        &self.property_diffs
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    /// Entries belonging to one sheet, in aggregation order
    pub fn diffs_for_sheet<'a>(&'a self, sheet: &str) -> impl Iterator<Item = &'a DiffEntry> + 'a {
        self.sheet_index
            .get(sheet)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
            .iter()
            .map(move |&idx| &self.entries[idx])
    }

    /// Cell and formula entries at one coordinate of a sheet
    pub fn diffs_at<'a>(&'a self, sheet: &str, coord: CellCoord) -> impl Iterator<Item = &'a DiffEntry> + 'a {
        self.diffs_for_sheet(sheet)
            .filter(move |entry| entry.coord() == Some(coord))
    }

    pub fn diffs_for_module<'a>(&'a self, module: &str) -> impl Iterator<Item = &'a DiffEntry> + 'a {
        self.module_index
            .get(module)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
            .iter()
            .map(move |&idx| &self.entries[idx])
    }

    /// Names of sheets that have at least one entry
    pub fn sheets_with_diffs(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.sheet_index.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}
