use crate::aggregator::{aggregate, module_order, sheet_order, ModuleOutput, SheetOutput};
use crate::cell_matcher::CellMatcher;
use crate::formula::FormulaCache;
use crate::formula_diff::FormulaDiffer;
use crate::macro_diff::MacroDiffer;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use xlcompare_common::{
    CompareOptions, ComparisonResult, DiffKind, ElidedCounts, Issue, IssueKind, PropertyDiff,
    Sheet, SheetDiff, Workbook, XlCompareError,
};

/// Comparison engine for two in-memory workbooks
pub struct ComparisonEngine {
    options: CompareOptions,
    cache: Arc<FormulaCache>,
}

impl Default for ComparisonEngine {
    fn default() -> Self {
        Self::new(CompareOptions::default())
    }
}

impl ComparisonEngine {
    pub fn new(options: CompareOptions) -> Self {
        Self {
            options,
            cache: Arc::new(FormulaCache::new()),
        }
    }

    /// Share a formula cache across runs or engines
    pub fn with_cache(mut self, cache: Arc<FormulaCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn options(&self) -> &CompareOptions {
        &self.options
    }

    pub fn cache(&self) -> &Arc<FormulaCache> {
        &self.cache
    }

    /// Compare two workbooks and produce an ordered, summarized result
    pub fn compare(
        &self,
        before: &Workbook,
        after: &Workbook,
    ) -> Result<ComparisonResult, XlCompareError> {
        self.compare_with_cancel(before, after, None)
    }

    /// Same as [`compare`](Self::compare), checking `cancel` before every sheet and
    /// module task. A raised flag yields [`XlCompareError::Cancelled`] and no result.
    pub fn compare_with_cancel(
        &self,
        before: &Workbook,
        after: &Workbook,
        cancel: Option<&AtomicBool>,
    ) -> Result<ComparisonResult, XlCompareError> {
        self.options.validate()?;
        for workbook in [before, after] {
            if workbook.is_empty() {
                return Err(XlCompareError::InvalidInput(format!(
                    "workbook '{}' has no sheets and no macro modules",
                    workbook.label
                )));
            }
        }

        info!(
            "Comparing '{}' ({} sheets, {} modules) with '{}' ({} sheets, {} modules)",
            before.label,
            before.sheets.len(),
            before.modules.len(),
            after.label,
            after.sheets.len(),
            after.modules.len()
        );

        let (sheets, modules) = rayon::join(
            || self.compare_sheets(before, after, cancel),
            || self.compare_modules(before, after, cancel),
        );
        let (sheets, modules) = (sheets?, modules?);

        let properties = compare_properties(before, after);
        let result = aggregate(&before.label, &after.label, sheets, modules, properties);

        let summary = result.summary();
        info!(
            "Comparison complete: {} differences, {} issues",
            summary.total_differences(),
            summary.issues
        );
        Ok(result)
    }

    fn compare_sheets(
        &self,
        before: &Workbook,
        after: &Workbook,
        cancel: Option<&AtomicBool>,
    ) -> Result<Vec<SheetOutput>, XlCompareError> {
        sheet_order(before, after)
            .par_iter()
            .map(|name| {
                check_cancelled(cancel)?;
                Ok(self.compare_sheet(name, before.sheet(name), after.sheet(name)))
            })
            .collect()
    }

    fn compare_sheet(&self, name: &str, before: Option<&Sheet>, after: Option<&Sheet>) -> SheetOutput {
        let mut output = SheetOutput {
            sheet: sheet_presence(name, before, after),
            ..Default::default()
        };

        let matcher = CellMatcher::from_options(&self.options);
        let cells = match matcher.diff_sheets(name, before, after) {
            Ok(cells) => cells,
            Err(e) => {
                warn!("Skipping sheet '{}': {}", name, e);
                output.issues.push(Issue {
                    kind: IssueKind::SheetShapeMismatch,
                    location: name.to_string(),
                    message: e.to_string(),
                });
                return output;
            }
        };

        let formulas = FormulaDiffer::new(&self.cache, &self.options).diff_sheets(name, before, after);

        debug!(
            "Sheet '{}': {} cell and {} formula entries",
            name,
            cells.diffs.len(),
            formulas.diffs.len()
        );

        output.cells = cells.diffs;
        output.formulas = formulas.diffs;
        output.issues = formulas.issues;
        output.elided = ElidedCounts {
            cells: cells.elided,
            formulas: formulas.elided,
            macros: 0,
        };
        output
    }

    fn compare_modules(
        &self,
        before: &Workbook,
        after: &Workbook,
        cancel: Option<&AtomicBool>,
    ) -> Result<Vec<ModuleOutput>, XlCompareError> {
        let differ = MacroDiffer::from_options(&self.options);
        module_order(before, after)
            .par_iter()
            .map(|name| {
                check_cancelled(cancel)?;
                let matched = differ.diff_modules(name, before.module(name), after.module(name));
                Ok(ModuleOutput {
                    macros: matched.diffs,
                    elided: matched.elided,
                    issues: matched.issues,
                })
            })
            .collect()
    }
}

fn check_cancelled(cancel: Option<&AtomicBool>) -> Result<(), XlCompareError> {
    if cancel.map_or(false, |flag| flag.load(Ordering::Relaxed)) {
        return Err(XlCompareError::Cancelled);
    }
    Ok(())
}

fn sheet_presence(name: &str, before: Option<&Sheet>, after: Option<&Sheet>) -> Option<SheetDiff> {
    let kind = match (before, after) {
        (Some(_), None) => DiffKind::Removed,
        (None, Some(_)) => DiffKind::Added,
        _ => return None,
    };
    Some(SheetDiff {
        sheet: name.to_string(),
        kind,
        before_dimensions: before.map(Sheet::dimensions),
        after_dimensions: after.map(Sheet::dimensions),
    })
}

/// Document property differences, including the sheet count
pub fn compare_properties(before: &Workbook, after: &Workbook) -> Vec<PropertyDiff> {
    let (a, b) = (&before.properties, &after.properties);
    let fields = [
        ("title", a.title.clone(), b.title.clone()),
        ("subject", a.subject.clone(), b.subject.clone()),
        ("creator", a.creator.clone(), b.creator.clone()),
        ("last_modified_by", a.last_modified_by.clone(), b.last_modified_by.clone()),
        (
            "sheet_count",
            Some(before.sheets.len().to_string()),
            Some(after.sheets.len().to_string()),
        ),
        (
            "date_system",
            Some(format!("{:?}", before.date_system)),
            Some(format!("{:?}", after.date_system)),
        ),
    ];

    fields
        .into_iter()
        .filter(|(_, x, y)| x != y)
        .map(|(property, before, after)| PropertyDiff {
            property: property.to_string(),
            before,
            after,
        })
        .collect()
}
