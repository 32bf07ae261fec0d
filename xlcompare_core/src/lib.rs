pub mod aggregator;
pub mod cell_matcher;
pub mod comparison;
pub mod formula;
pub mod formula_diff;
pub mod line_diff;
pub mod macro_diff;
pub mod macro_parser;

#[cfg(feature = "calamine-loader")]
pub mod loader;

pub use cell_matcher::CellMatcher;
pub use comparison::{compare_properties, ComparisonEngine};
pub use formula::{normalize_formula, FormulaCache, FormulaToken, NormalizedFormula};
pub use formula_diff::{classify_change, FormulaDiffer};
pub use line_diff::WhitespaceMode;
pub use macro_diff::MacroDiffer;
pub use macro_parser::{parse_module, ParsedModule, Procedure, ProcedureKind};

#[cfg(feature = "calamine-loader")]
pub use loader::{is_workbook_file, load_workbook};
