use pretty_assertions::assert_eq;
use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use xlcompare_common::{
    CellCoord, CellValue, CompareOptions, DiffDomain, DiffEntry, DiffKind, FormulaChange,
    IssueKind, MacroModule, MacroScope, ModuleKind, Sheet, Workbook, XlCompareError,
};
use xlcompare_core::ComparisonEngine;

/// Builder for small test workbooks
struct WorkbookFixture {
    workbook: Workbook,
}

impl WorkbookFixture {
    fn new(label: &str) -> Self {
        Self {
            workbook: Workbook::new(label),
        }
    }

    fn value(mut self, sheet: &str, a1: &str, value: impl Into<CellValue>) -> Self {
        let coord = CellCoord::from_a1(a1).expect("valid A1 reference");
        self.sheet_mut(sheet).set_value(coord.row, coord.col, value);
        self
    }

    fn formula(mut self, sheet: &str, a1: &str, formula: &str) -> Self {
        let coord = CellCoord::from_a1(a1).expect("valid A1 reference");
        self.sheet_mut(sheet).set_formula(coord.row, coord.col, formula);
        self
    }

    fn module(mut self, name: &str, source: &str) -> Self {
        self.workbook
            .add_module(MacroModule::from_source(name, ModuleKind::Standard, source));
        self
    }

    fn sheet_mut(&mut self, name: &str) -> &mut Sheet {
        if self.workbook.sheet(name).is_none() {
            self.workbook.add_sheet(Sheet::new(name));
        }
        self.workbook
            .sheets
            .iter_mut()
            .find(|s| s.name == name)
            .expect("sheet just added")
    }

    fn build(self) -> Workbook {
        self.workbook
    }
}

fn all_entries() -> CompareOptions {
    CompareOptions {
        suppress_unchanged_entries: false,
        ..Default::default()
    }
}

fn budget(label: &str) -> Workbook {
    WorkbookFixture::new(label)
        .value("Sheet1", "A1", 10.0)
        .value("Sheet1", "B2", "region")
        .value("Sheet1", "C3", true)
        .formula("Sheet1", "D1", "=SUM(A1:A10)")
        .value("Sheet1", "D1", 10.0)
        .value("Notes", "A1", "draft")
        .module(
            "Module1",
            "Option Explicit\nSub Recalc()\n    Application.Calculate\nEnd Sub\n",
        )
        .build()
}

fn entry_set(entries: &[DiffEntry]) -> HashSet<(DiffDomain, Option<String>, Option<CellCoord>, Option<String>)> {
    entries
        .iter()
        .filter(|e| e.kind() != DiffKind::Unchanged)
        .map(|e| {
            let procedure = match e {
                DiffEntry::Macro(m) => m.procedure.clone(),
                _ => None,
            };
            (e.domain(), e.sheet().map(str::to_string), e.coord(), procedure)
        })
        .collect()
}

#[test]
fn self_comparison_is_identical() {
    let wb = budget("a.xlsx");
    let result = ComparisonEngine::new(all_entries()).compare(&wb, &wb).unwrap();

    assert!(result.summary().is_identical());
    assert!(result.entries().iter().all(|e| e.kind() == DiffKind::Unchanged));
    assert!(result.issues().is_empty());
    assert!(result.property_diffs().is_empty());
    assert!(result.summary().recommendations().is_empty());
}

#[test]
fn suppressed_self_comparison_has_no_entries_but_counts_unchanged() {
    let wb = budget("a.xlsx");
    let result = ComparisonEngine::default().compare(&wb, &wb).unwrap();

    assert!(result.entries().is_empty());
    assert_eq!(result.summary().cells.unchanged, 5);
    assert_eq!(result.summary().formulas.unchanged, 1);
    assert_eq!(result.summary().macros.unchanged, 1);
}

#[test]
fn swapping_sides_inverts_added_and_removed() {
    let before = budget("a.xlsx");
    let after = WorkbookFixture::new("b.xlsx")
        .value("Sheet1", "A1", 12.0)
        .value("Sheet1", "E5", "new")
        .formula("Sheet1", "D1", "=SUM(A1:A12)")
        .value("Sheet1", "D1", 12.0)
        .value("Extra", "A1", 1.0)
        .module(
            "Module1",
            "Option Explicit\nSub Recalc()\n    Application.CalculateFull\nEnd Sub\nSub Added()\nEnd Sub\n",
        )
        .build();

    let engine = ComparisonEngine::default();
    let forward = engine.compare(&before, &after).unwrap();
    let backward = engine.compare(&after, &before).unwrap();

    assert_eq!(entry_set(forward.entries()), entry_set(backward.entries()));

    let (f, b) = (forward.summary(), backward.summary());
    for (x, y) in [
        (f.sheets, b.sheets),
        (f.cells, b.cells),
        (f.formulas, b.formulas),
        (f.macros, b.macros),
    ] {
        assert_eq!(x.added, y.removed);
        assert_eq!(x.removed, y.added);
        assert_eq!(x.modified, y.modified);
    }

    for entry in forward.entries() {
        let mirrored = backward.entries().iter().find(|other| {
            other.domain() == entry.domain()
                && other.sheet() == entry.sheet()
                && other.module() == entry.module()
                && other.coord() == entry.coord()
                && procedure_of(other) == procedure_of(entry)
        });
        let mirrored = mirrored.expect("entry present in both directions");
        assert_eq!(mirrored.kind(), entry.kind().inverse());
    }
}

fn procedure_of(entry: &DiffEntry) -> Option<(MacroScope, Option<String>)> {
    match entry {
        DiffEntry::Macro(m) => Some((m.scope, m.procedure.clone())),
        _ => None,
    }
}

#[test]
fn repeated_runs_serialize_identically() {
    let before = budget("a.xlsx");
    let after = WorkbookFixture::new("b.xlsx")
        .value("Sheet1", "A1", 11.0)
        .value("Sheet2", "A1", 1.0)
        .formula("Sheet1", "D1", "=AVERAGE(A1:A10)")
        .build();

    let engine = ComparisonEngine::new(all_entries());
    let first = serde_json::to_string(&engine.compare(&before, &after).unwrap()).unwrap();
    let second = serde_json::to_string(&engine.compare(&before, &after).unwrap()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn numeric_tolerance_is_respected() {
    let before = WorkbookFixture::new("a").value("S", "A1", 1.0).value("S", "A2", 1.0).build();
    let after = WorkbookFixture::new("b").value("S", "A1", 1.005).value("S", "A2", 1.02).build();

    let engine = ComparisonEngine::new(CompareOptions {
        numeric_tolerance: 0.01,
        ..all_entries()
    });
    let result = engine.compare(&before, &after).unwrap();

    let a1 = result.diffs_at("S", CellCoord::new(0, 0)).next().unwrap();
    let a2 = result.diffs_at("S", CellCoord::new(1, 0)).next().unwrap();
    assert_eq!(a1.kind(), DiffKind::Unchanged);
    assert_eq!(a2.kind(), DiffKind::Modified);
}

#[test]
fn cosmetic_formula_changes_are_unchanged() {
    let before = WorkbookFixture::new("a").formula("S", "A1", "=SUM(A1,A2)").build();
    let after = WorkbookFixture::new("b").formula("S", "A1", "= sum( A1 , A2 )").build();

    let result = ComparisonEngine::default().compare(&before, &after).unwrap();
    assert!(result.summary().is_identical());
    assert_eq!(result.summary().formulas.unchanged, 1);
}

#[test]
fn reference_shift_is_flagged() {
    let before = WorkbookFixture::new("a").formula("S", "C1", "=A1+B1").build();
    let after = WorkbookFixture::new("b").formula("S", "C1", "=A2+B2").build();

    let result = ComparisonEngine::default().compare(&before, &after).unwrap();
    match result.entries() {
        [DiffEntry::Formula(diff)] => {
            assert_eq!(diff.kind, DiffKind::Modified);
            assert_eq!(diff.change, Some(FormulaChange::ReferenceShift));
        }
        other => panic!("unexpected entries: {:?}", other),
    }
    assert_eq!(result.summary().formula_changes.reference_shift, 1);
}

#[test]
fn single_argument_retarget_is_a_reference_shift() {
    let before = WorkbookFixture::new("a").formula("S", "B5", "=SUM(A1,A2)").build();
    let after = WorkbookFixture::new("b").formula("S", "B5", "=SUM(A1,A3)").build();

    let result = ComparisonEngine::default().compare(&before, &after).unwrap();
    assert_eq!(result.summary().formula_changes.reference_shift, 1);
    assert_eq!(result.summary().formula_changes.logic_change, 0);
}

#[test]
fn procedure_rename_is_detected() {
    let body = "    Dim total As Double\n    total = Range(\"A1\").Value * 2\n    Range(\"B1\").Value = total\n";
    let before = WorkbookFixture::new("a")
        .module("Module1", &format!("Sub ComputeTotal()\n{}End Sub\n", body))
        .build();
    let after = WorkbookFixture::new("b")
        .module("Module1", &format!("Sub CalcTotal()\n{}End Sub\n", body))
        .build();

    let result = ComparisonEngine::default().compare(&before, &after).unwrap();
    let procedures: Vec<_> = result
        .diffs_for_module("Module1")
        .filter_map(|e| match e {
            DiffEntry::Macro(m) if m.scope == MacroScope::Procedure => Some(m),
            _ => None,
        })
        .collect();

    assert_eq!(procedures.len(), 1);
    assert_eq!(procedures[0].kind, DiffKind::Modified);
    assert_eq!(procedures[0].procedure.as_deref(), Some("CalcTotal"));
    assert_eq!(procedures[0].renamed_from.as_deref(), Some("ComputeTotal"));
}

#[test]
fn edited_and_new_cell_in_sheet1() {
    let before = WorkbookFixture::new("a").value("Sheet1", "A1", 10.0).build();
    let after = WorkbookFixture::new("b")
        .value("Sheet1", "A1", 20.0)
        .value("Sheet1", "B1", "new")
        .build();

    let result = ComparisonEngine::default().compare(&before, &after).unwrap();
    match result.entries() {
        [DiffEntry::Cell(a1), DiffEntry::Cell(b1)] => {
            assert_eq!(a1.coord, CellCoord::new(0, 0));
            assert_eq!(a1.kind, DiffKind::Modified);
            assert_eq!(a1.before, CellValue::Number(10.0));
            assert_eq!(a1.after, CellValue::Number(20.0));

            assert_eq!(b1.coord, CellCoord::new(0, 1));
            assert_eq!(b1.kind, DiffKind::Added);
            assert_eq!(b1.before, CellValue::Empty);
            assert_eq!(b1.after, CellValue::Text("new".into()));
        }
        other => panic!("unexpected entries: {:?}", other),
    }

    let cells = result.summary().cells;
    assert_eq!((cells.modified, cells.added, cells.removed), (1, 1, 0));
    assert!(result.issues().is_empty());
}

#[test]
fn mixed_changes_in_one_sheet() {
    let before = WorkbookFixture::new("a")
        .value("Sheet1", "A1", 10.0)
        .value("Sheet1", "B1", 5.0)
        .build();
    let after = WorkbookFixture::new("b")
        .value("Sheet1", "A1", 20.0)
        .value("Sheet1", "C1", 7.0)
        .build();

    let result = ComparisonEngine::default().compare(&before, &after).unwrap();
    let cells: Vec<_> = result
        .entries()
        .iter()
        .map(|e| (e.coord().map(|c| c.to_a1()), e.kind()))
        .collect();
    assert_eq!(
        cells,
        vec![
            (Some("A1".to_string()), DiffKind::Modified),
            (Some("B1".to_string()), DiffKind::Removed),
            (Some("C1".to_string()), DiffKind::Added),
        ]
    );

    let summary = result.summary();
    assert_eq!((summary.cells.added, summary.cells.removed, summary.cells.modified), (1, 1, 1));
    assert_eq!(summary.total_differences(), 3);
}

#[test]
fn malformed_formula_does_not_abort_the_run() {
    let before = WorkbookFixture::new("a")
        .formula("S", "A1", "=SUM(A2")
        .formula("S", "B1", "=A1*2")
        .build();
    let after = WorkbookFixture::new("b")
        .formula("S", "A1", "=SUM(A2)")
        .formula("S", "B1", "=A1*3")
        .build();

    let result = ComparisonEngine::default().compare(&before, &after).unwrap();
    assert_eq!(result.summary().formulas.modified, 2);
    assert_eq!(result.issues().len(), 1);
    assert_eq!(result.issues()[0].kind, IssueKind::MalformedFormula);
    assert_eq!(result.issues()[0].location, "S!A1");

    let a1 = result.diffs_at("S", CellCoord::new(0, 0)).next().unwrap();
    assert!(matches!(a1, DiffEntry::Formula(f) if f.malformed));
}

#[test]
fn unparseable_module_falls_back_to_line_diff() {
    let before = WorkbookFixture::new("a")
        .value("S", "A1", 1.0)
        .module("Broken", "Sub A()\n    x = 1\n")
        .build();
    let after = WorkbookFixture::new("b")
        .value("S", "A1", 1.0)
        .module("Broken", "Sub A()\n    x = 2\n")
        .build();

    let result = ComparisonEngine::default().compare(&before, &after).unwrap();
    let entries: Vec<_> = result.diffs_for_module("Broken").collect();
    assert_eq!(entries.len(), 1);
    assert!(matches!(entries[0], DiffEntry::Macro(m) if m.degraded && m.kind == DiffKind::Modified));
    assert_eq!(result.issues().len(), 2);
    assert!(result.issues().iter().all(|i| i.kind == IssueKind::ModuleParse));
}

#[test]
fn entries_follow_aggregation_order() {
    let before = WorkbookFixture::new("a")
        .value("Second", "A1", 1.0)
        .value("First", "B2", 1.0)
        .formula("First", "B2", "=1")
        .module("M", "Sub A()\nEnd Sub\n")
        .build();
    let after = WorkbookFixture::new("b")
        .value("First", "B2", 2.0)
        .formula("First", "B2", "=2")
        .value("First", "A1", 2.0)
        .value("Third", "A1", 1.0)
        .module("M", "Sub A()\n    x = 1\nEnd Sub\n")
        .build();

    let result = ComparisonEngine::default().compare(&before, &after).unwrap();
    let shape: Vec<_> = result
        .entries()
        .iter()
        .map(|e| {
            (
                e.domain(),
                e.sheet().or(e.module()).map(str::to_string),
                e.coord().map(|c| c.to_a1()),
            )
        })
        .collect();

    let s = |v: &str| Some(v.to_string());
    assert_eq!(
        shape,
        vec![
            (DiffDomain::Sheet, s("Second"), None),
            (DiffDomain::Cell, s("Second"), s("A1")),
            (DiffDomain::Cell, s("First"), s("A1")),
            (DiffDomain::Cell, s("First"), s("B2")),
            (DiffDomain::Formula, s("First"), s("B2")),
            (DiffDomain::Sheet, s("Third"), None),
            (DiffDomain::Cell, s("Third"), s("A1")),
            (DiffDomain::Macro, s("M"), None),
            (DiffDomain::Macro, s("M"), None),
        ]
    );
}

#[test]
fn cancelled_run_returns_no_result() {
    let wb = budget("a.xlsx");
    let cancel = AtomicBool::new(true);
    let outcome = ComparisonEngine::default().compare_with_cancel(&wb, &wb, Some(&cancel));
    assert!(matches!(outcome, Err(XlCompareError::Cancelled)));
}

#[test]
fn workbook_without_content_is_rejected() {
    let wb = budget("a.xlsx");
    let empty = Workbook::new("empty.xlsx");
    assert!(matches!(
        ComparisonEngine::default().compare(&wb, &empty),
        Err(XlCompareError::InvalidInput(_))
    ));
}

#[test]
fn summary_matches_entries() {
    let before = budget("a.xlsx");
    let after = WorkbookFixture::new("b.xlsx")
        .value("Sheet1", "A1", 99.0)
        .formula("Sheet1", "D1", "=MAX(A1:A10)")
        .module("Module2", "Sub Other()\nEnd Sub\n")
        .build();

    let result = ComparisonEngine::new(all_entries()).compare(&before, &after).unwrap();
    let summary = result.summary();
    let count = |domain: DiffDomain, kind: DiffKind| {
        result
            .entries()
            .iter()
            .filter(|e| e.domain() == domain && e.kind() == kind)
            .count()
    };

    for (domain, counts) in [
        (DiffDomain::Sheet, summary.sheets),
        (DiffDomain::Cell, summary.cells),
        (DiffDomain::Formula, summary.formulas),
        (DiffDomain::Macro, summary.macros),
    ] {
        assert_eq!(counts.added, count(domain, DiffKind::Added));
        assert_eq!(counts.removed, count(domain, DiffKind::Removed));
        assert_eq!(counts.modified, count(domain, DiffKind::Modified));
        assert_eq!(counts.unchanged, count(domain, DiffKind::Unchanged));
    }
    assert_eq!(result.summary().formula_changes.logic_change, 1);
}
