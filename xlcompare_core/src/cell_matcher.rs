use std::iter::Peekable;
use tracing::debug;
use xlcompare_common::{
    Cell, CellCoord, CellDiff, CellValue, CompareOptions, DiffKind, Sheet, XlCompareError,
};

/// Cells present on either side of a coordinate-aligned walk
pub(crate) type AlignedCells<'a> = (CellCoord, Option<&'a Cell>, Option<&'a Cell>);

/// Merge two coordinate-ordered cell streams into one row-major stream.
pub(crate) struct AlignCells<'a, A, B>
where
    A: Iterator<Item = &'a Cell>,
    B: Iterator<Item = &'a Cell>,
{
    left: Peekable<A>,
    right: Peekable<B>,
}

impl<'a, A, B> Iterator for AlignCells<'a, A, B>
where
    A: Iterator<Item = &'a Cell>,
    B: Iterator<Item = &'a Cell>,
{
    type Item = AlignedCells<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let left_coord = self.left.peek().map(|c| c.coord);
        let right_coord = self.right.peek().map(|c| c.coord);
        match (left_coord, right_coord) {
            (None, None) => None,
            (Some(l), None) => Some((l, self.left.next(), None)),
            (None, Some(r)) => Some((r, None, self.right.next())),
            (Some(l), Some(r)) if l < r => Some((l, self.left.next(), None)),
            (Some(l), Some(r)) if r < l => Some((r, None, self.right.next())),
            (Some(l), Some(_)) => Some((l, self.left.next(), self.right.next())),
        }
    }
}

pub(crate) fn align_cells<'a, A, B>(left: A, right: B) -> AlignCells<'a, A, B>
where
    A: Iterator<Item = &'a Cell>,
    B: Iterator<Item = &'a Cell>,
{
    AlignCells {
        left: left.peekable(),
        right: right.peekable(),
    }
}

/// Cell value differences for one sheet pair
#[derive(Debug, Clone, Default)]
pub struct CellMatch {
    pub diffs: Vec<CellDiff>,
    /// Unchanged cells not emitted because of suppression
    pub elided: usize,
}

/// Aligns two sheets by coordinate and classifies raw values.
#[derive(Debug, Clone)]
pub struct CellMatcher {
    numeric_tolerance: f64,
    compare_styles: bool,
    suppress_unchanged: bool,
}

impl Default for CellMatcher {
    fn default() -> Self {
        Self::from_options(&CompareOptions::default())
    }
}

impl CellMatcher {
    pub fn from_options(options: &CompareOptions) -> Self {
        Self {
            numeric_tolerance: options.numeric_tolerance,
            compare_styles: options.compare_styles,
            suppress_unchanged: options.suppress_unchanged_entries,
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.numeric_tolerance = tolerance;
        self
    }

    pub fn with_styles(mut self, compare_styles: bool) -> Self {
        self.compare_styles = compare_styles;
        self
    }

    pub fn with_suppress_unchanged(mut self, suppress: bool) -> Self {
        self.suppress_unchanged = suppress;
        self
    }

    /// Typed equality. Numbers within the tolerance are equal; values of different
    /// types never are.
    pub fn values_equal(&self, a: &CellValue, b: &CellValue) -> bool {
        match (a, b) {
            (CellValue::Number(x), CellValue::Number(y)) => {
                x == y || (x - y).abs() <= self.numeric_tolerance
            }
            _ => a == b,
        }
    }

    /// Classify one coordinate. `None` when neither side holds a value.
    pub fn classify(&self, before: Option<&Cell>, after: Option<&Cell>) -> Option<DiffKind> {
        let before = before.filter(|c| !c.value.is_empty());
        let after = after.filter(|c| !c.value.is_empty());
        match (before, after) {
            (None, None) => None,
            (None, Some(_)) => Some(DiffKind::Added),
            (Some(_), None) => Some(DiffKind::Removed),
            (Some(a), Some(b)) => {
                let same_value = self.values_equal(&a.value, &b.value);
                let same_style = !self.compare_styles || a.style == b.style;
                Some(if same_value && same_style {
                    DiffKind::Unchanged
                } else {
                    DiffKind::Modified
                })
            }
        }
    }

    /// Compare the values of two sheets. A missing side is treated as an empty sheet.
    pub fn diff_sheets(
        &self,
        sheet_name: &str,
        before: Option<&Sheet>,
        after: Option<&Sheet>,
    ) -> Result<CellMatch, XlCompareError> {
        for sheet in before.iter().chain(after.iter()) {
            sheet.validate()?;
        }

        let left = before.into_iter().flat_map(|s| s.cells.values());
        let right = after.into_iter().flat_map(|s| s.cells.values());

        let mut result = CellMatch::default();
        for (coord, a, b) in align_cells(left, right) {
            let Some(kind) = self.classify(a, b) else {
                continue;
            };
            if kind == DiffKind::Unchanged && self.suppress_unchanged {
                result.elided += 1;
                continue;
            }
            result.diffs.push(self.cell_diff(sheet_name, coord, kind, a, b));
        }

        debug!(
            "Sheet '{}': {} cell entries, {} unchanged elided",
            sheet_name,
            result.diffs.len(),
            result.elided
        );
        Ok(result)
    }

    fn cell_diff(
        &self,
        sheet_name: &str,
        coord: CellCoord,
        kind: DiffKind,
        before: Option<&Cell>,
        after: Option<&Cell>,
    ) -> CellDiff {
        let value = |c: Option<&Cell>| c.map(|c| c.value.clone()).unwrap_or_default();
        let style = |c: Option<&Cell>| {
            if self.compare_styles {
                c.and_then(|c| c.style.clone())
            } else {
                None
            }
        };

        CellDiff {
            sheet: sheet_name.to_string(),
            coord,
            kind,
            before: value(before),
            after: value(after),
            before_style: style(before),
            after_style: style(after),
        }
    }
}
