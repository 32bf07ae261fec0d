use crate::cell_matcher::align_cells;
use crate::formula::{opaque_formula_text, FormulaCache, NormalizedFormula};
use tracing::{debug, warn};
use xlcompare_common::{
    CellCoord, CompareOptions, DiffKind, FormulaChange, FormulaDiff, FormulaError, Issue,
    IssueKind, Sheet,
};

/// Classify how two formulas that normalize differently are related.
///
/// Same skeleton with only references changed is a reference shift; a changed skeleton
/// over the same references is a logic change. When both differ, `mixed` is returned.
pub fn classify_change(
    before: &NormalizedFormula,
    after: &NormalizedFormula,
    mixed: FormulaChange,
) -> FormulaChange {
    let skeleton_same = before.skeleton() == after.skeleton();
    let references_same = before.references() == after.references();
    let literals_same = before.literals() == after.literals();

    match (skeleton_same, references_same) {
        (true, false) if literals_same => FormulaChange::ReferenceShift,
        (false, true) => FormulaChange::LogicChange,
        (false, false) => mixed,
        _ => FormulaChange::Other,
    }
}

/// Outcome of comparing the formulas at one coordinate
#[derive(Debug, Clone, PartialEq)]
pub struct FormulaComparison {
    pub kind: DiffKind,
    pub change: Option<FormulaChange>,
    /// Tokenizer errors for the before and after sides
    pub errors: (Option<FormulaError>, Option<FormulaError>),
}

impl FormulaComparison {
    pub fn malformed(&self) -> bool {
        self.errors.0.is_some() || self.errors.1.is_some()
    }
}

/// Formula differences for one sheet pair
#[derive(Debug, Clone, Default)]
pub struct FormulaMatch {
    pub diffs: Vec<FormulaDiff>,
    pub elided: usize,
    pub issues: Vec<Issue>,
}

/// Compares formulas structurally through a shared normalization cache.
pub struct FormulaDiffer<'a> {
    cache: &'a FormulaCache,
    mixed_change_hint: FormulaChange,
    suppress_unchanged: bool,
}

impl<'a> FormulaDiffer<'a> {
    pub fn new(cache: &'a FormulaCache, options: &CompareOptions) -> Self {
        Self {
            cache,
            mixed_change_hint: options.mixed_change_hint,
            suppress_unchanged: options.suppress_unchanged_entries,
        }
    }

    /// Compare two optional formula texts. `None` when neither side has a formula.
    pub fn compare(&self, before: Option<&str>, after: Option<&str>) -> Option<FormulaComparison> {
        let (before, after) = match (before, after) {
            (None, None) => return None,
            (None, Some(b)) => {
                return Some(FormulaComparison {
                    kind: DiffKind::Added,
                    change: None,
                    errors: (None, self.cache.normalize(b).err()),
                })
            }
            (Some(a), None) => {
                return Some(FormulaComparison {
                    kind: DiffKind::Removed,
                    change: None,
                    errors: (self.cache.normalize(a).err(), None),
                })
            }
            (Some(a), Some(b)) => (a, b),
        };

        let comparison = match (self.cache.normalize(before), self.cache.normalize(after)) {
            (Ok(a), Ok(b)) if a == b => FormulaComparison {
                kind: DiffKind::Unchanged,
                change: None,
                errors: (None, None),
            },
            (Ok(a), Ok(b)) => FormulaComparison {
                kind: DiffKind::Modified,
                change: Some(classify_change(&a, &b, self.mixed_change_hint)),
                errors: (None, None),
            },
            (a, b) => {
                let same = opaque_formula_text(before) == opaque_formula_text(after);
                FormulaComparison {
                    kind: if same {
                        DiffKind::Unchanged
                    } else {
                        DiffKind::Modified
                    },
                    change: (!same).then_some(FormulaChange::Other),
                    errors: (a.err(), b.err()),
                }
            }
        };
        Some(comparison)
    }

    /// Compare formulas of two sheets. Cells without a formula are skipped.
    pub fn diff_sheets(
        &self,
        sheet_name: &str,
        before: Option<&Sheet>,
        after: Option<&Sheet>,
    ) -> FormulaMatch {
        let left = before
            .into_iter()
            .flat_map(|s| s.cells.values())
            .filter(|c| c.formula.is_some());
        let right = after
            .into_iter()
            .flat_map(|s| s.cells.values())
            .filter(|c| c.formula.is_some());

        let mut result = FormulaMatch::default();
        for (coord, a, b) in align_cells(left, right) {
            let before_text = a.and_then(|c| c.formula.as_deref());
            let after_text = b.and_then(|c| c.formula.as_deref());
            let Some(comparison) = self.compare(before_text, after_text) else {
                continue;
            };

            self.record_errors(sheet_name, coord, &comparison, &mut result.issues);

            if comparison.kind == DiffKind::Unchanged && self.suppress_unchanged {
                result.elided += 1;
                continue;
            }

            result.diffs.push(FormulaDiff {
                sheet: sheet_name.to_string(),
                coord,
                kind: comparison.kind,
                change: comparison.change,
                before: before_text.map(str::to_string),
                after: after_text.map(str::to_string),
                malformed: comparison.malformed(),
            });
        }

        debug!(
            "Sheet '{}': {} formula entries, {} unchanged elided",
            sheet_name,
            result.diffs.len(),
            result.elided
        );
        result
    }

    fn record_errors(
        &self,
        sheet_name: &str,
        coord: CellCoord,
        comparison: &FormulaComparison,
        issues: &mut Vec<Issue>,
    ) {
        let sides = [("before", &comparison.errors.0), ("after", &comparison.errors.1)];
        for (side, error) in sides {
            if let Some(error) = error {
                let location = format!("{}!{}", sheet_name, coord);
                warn!("Malformed {} formula at {}: {}", side, location, error);
                issues.push(Issue {
                    kind: IssueKind::MalformedFormula,
                    location,
                    message: format!("{} formula: {}", side, error),
                });
            }
        }
    }
}
