use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use xlcompare_common::{
    ensure_config, load_config, load_config_from, CellValue, CompareOptions, ComparisonResult,
    DiffEntry, DiffKind, FormulaChange, MacroScope, Summary,
};
use xlcompare_core::{is_workbook_file, load_workbook, ComparisonEngine};

#[derive(Parser)]
#[command(name = "xlcompare")]
#[command(author = "XLCompare Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Compare spreadsheet workbooks: cell values, formulas and VBA macros", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare two workbook files
    Compare {
        /// Before workbook
        left: PathBuf,

        /// After workbook
        right: PathBuf,

        /// Config file to use instead of the default location
        #[arg(long)]
        config: Option<PathBuf>,

        /// Absolute tolerance for numeric cell values
        #[arg(short, long)]
        tolerance: Option<f64>,

        /// Minimum body similarity (0..1) for a procedure rename
        #[arg(long)]
        rename_threshold: Option<f64>,

        /// Hint reported for formulas that change both references and functions
        #[arg(long, value_enum)]
        mixed_hint: Option<HintArg>,

        /// Include unchanged entries in the output
        #[arg(short = 'u', long)]
        include_unchanged: bool,

        /// Treat whitespace-only macro line changes as differences
        #[arg(long)]
        exact_whitespace: bool,

        /// Report cell style changes
        #[arg(long)]
        compare_styles: bool,

        /// Output results as JSON
        #[arg(long)]
        json: bool,

        /// Disable ANSI colors in output
        #[arg(long)]
        no_color: bool,
    },
    /// Show the configuration file, creating it with defaults if missing
    Config {
        /// Place the config file next to the executable
        #[arg(long)]
        portable: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum HintArg {
    ReferenceShift,
    LogicChange,
    Other,
}

impl From<HintArg> for FormulaChange {
    fn from(hint: HintArg) -> Self {
        match hint {
            HintArg::ReferenceShift => FormulaChange::ReferenceShift,
            HintArg::LogicChange => FormulaChange::LogicChange,
            HintArg::Other => FormulaChange::Other,
        }
    }
}

/// Command-line values that take precedence over the config file
#[derive(Default)]
struct Overrides {
    tolerance: Option<f64>,
    rename_threshold: Option<f64>,
    mixed_hint: Option<FormulaChange>,
    include_unchanged: bool,
    exact_whitespace: bool,
    compare_styles: bool,
}

fn main() {
    // Initialize tracing to stderr (so JSON output can go cleanly to stdout)
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Compare {
            left,
            right,
            config,
            tolerance,
            rename_threshold,
            mixed_hint,
            include_unchanged,
            exact_whitespace,
            compare_styles,
            json,
            no_color,
        } => {
            let overrides = Overrides {
                tolerance,
                rename_threshold,
                mixed_hint: mixed_hint.map(FormulaChange::from),
                include_unchanged,
                exact_whitespace,
                compare_styles,
            };
            if let Err(e) = run_compare(&left, &right, config.as_deref(), overrides, json, no_color) {
                error!("Comparison failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Commands::Config { portable } => {
            if let Err(e) = run_config(portable) {
                error!("Config failed: {:#}", e);
                std::process::exit(1);
            }
        }
    }
}

fn run_compare(
    left: &Path,
    right: &Path,
    config_path: Option<&Path>,
    overrides: Overrides,
    json: bool,
    no_color: bool,
) -> anyhow::Result<()> {
    for path in [left, right] {
        if !path.exists() {
            bail!("Path does not exist: {}", path.display());
        }
        if !is_workbook_file(path) {
            warn!("{} does not look like a workbook; trying anyway", path.display());
        }
    }

    let loaded = match config_path {
        Some(path) => load_config_from(path)?,
        None => load_config(false)?,
    };
    info!("Using config: {}", loaded.path.display());

    let options = build_options(loaded.config.compare, &overrides);
    options.validate()?;

    info!("Comparing:");
    info!("  Left:  {}", left.display());
    info!("  Right: {}", right.display());

    let before = load_workbook(left).with_context(|| format!("loading {}", left.display()))?;
    let after = load_workbook(right).with_context(|| format!("loading {}", right.display()))?;

    let result = ComparisonEngine::new(options).compare(&before, &after)?;

    if json {
        let report = JsonReport::new(&result);
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let use_color = !no_color && std::io::stdout().is_terminal();
    print!("{}", render_report(&result, use_color));
    Ok(())
}

fn run_config(portable: bool) -> anyhow::Result<()> {
    let loaded = ensure_config(portable)?;
    println!("# {}", loaded.path.display());
    let text = std::fs::read_to_string(&loaded.path)
        .with_context(|| format!("reading {}", loaded.path.display()))?;
    print!("{}", text);
    Ok(())
}

fn build_options(mut options: CompareOptions, overrides: &Overrides) -> CompareOptions {
    if let Some(tolerance) = overrides.tolerance {
        options.numeric_tolerance = tolerance;
    }
    if let Some(threshold) = overrides.rename_threshold {
        options.rename_similarity_threshold = threshold;
    }
    if let Some(hint) = overrides.mixed_hint {
        options.mixed_change_hint = hint;
    }
    if overrides.include_unchanged {
        options.suppress_unchanged_entries = false;
    }
    if overrides.exact_whitespace {
        options.ignore_whitespace_only_line_changes = false;
    }
    if overrides.compare_styles {
        options.compare_styles = true;
    }
    options
}

#[derive(Serialize)]
struct JsonReport<'a> {
    #[serde(flatten)]
    result: &'a ComparisonResult,
    identical: bool,
    recommendations: Vec<&'static str>,
}

impl<'a> JsonReport<'a> {
    fn new(result: &'a ComparisonResult) -> Self {
        let summary = result.summary();
        Self {
            result,
            identical: summary.is_identical(),
            recommendations: summary.recommendations(),
        }
    }
}

fn status_symbol(kind: DiffKind) -> &'static str {
    match kind {
        DiffKind::Unchanged => "==",
        DiffKind::Modified => "!=",
        DiffKind::Removed => "<<",
        DiffKind::Added => ">>",
    }
}

fn status_color(kind: DiffKind) -> &'static str {
    match kind {
        DiffKind::Unchanged => "\x1b[32m", // Green
        DiffKind::Modified => "\x1b[31m",  // Red
        DiffKind::Removed => "\x1b[33m",   // Yellow
        DiffKind::Added => "\x1b[34m",     // Blue
    }
}

fn format_value(value: &CellValue) -> String {
    match value {
        CellValue::Empty => String::from("(empty)"),
        CellValue::Text(s) => format!("{:?}", s),
        other => other.to_string(),
    }
}

/// One-line description of an entry, without the status marker
fn describe_entry(entry: &DiffEntry) -> String {
    match entry {
        DiffEntry::Sheet(d) => {
            let dims = d.after_dimensions.or(d.before_dimensions).unwrap_or((0, 0));
            format!("sheet {} ({}x{})", d.sheet, dims.0, dims.1)
        }
        DiffEntry::Cell(d) => format!(
            "{}!{}  {} -> {}",
            d.sheet,
            d.coord,
            format_value(&d.before),
            format_value(&d.after)
        ),
        DiffEntry::Formula(d) => {
            let hint = match d.change {
                Some(FormulaChange::ReferenceShift) => " [reference shift]",
                Some(FormulaChange::LogicChange) => " [logic change]",
                Some(FormulaChange::Other) => " [other]",
                None => "",
            };
            format!(
                "{}!{}  {} -> {}{}{}",
                d.sheet,
                d.coord,
                d.before.as_deref().unwrap_or("(none)"),
                d.after.as_deref().unwrap_or("(none)"),
                hint,
                if d.malformed { " [malformed]" } else { "" }
            )
        }
        DiffEntry::Macro(d) => {
            let target = match (d.scope, d.procedure.as_deref()) {
                (MacroScope::Module, _) => format!("module {}", d.module),
                (MacroScope::Declarations, _) => format!("{} (declarations)", d.module),
                (MacroScope::Procedure, Some(name)) => format!("{}.{}", d.module, name),
                (MacroScope::Procedure, None) => d.module.clone(),
            };
            let mut text = format!("{}  +{} -{}", target, d.inserted_lines(), d.deleted_lines());
            if let Some(old) = &d.renamed_from {
                text.push_str(&format!(" [renamed from {}]", old));
            }
            if d.signature_changed {
                text.push_str(" [signature changed]");
            }
            if d.degraded {
                text.push_str(" [unparsed]");
            }
            text
        }
    }
}

fn render_summary(summary: &Summary) -> String {
    let mut out = String::new();
    out.push_str("Summary:\n");
    for (label, counts) in [
        ("Sheets", summary.sheets),
        ("Cells", summary.cells),
        ("Formulas", summary.formulas),
        ("Macros", summary.macros),
    ] {
        out.push_str(&format!(
            "  {:<10} added {:>5}  removed {:>5}  modified {:>5}  unchanged {:>7}\n",
            label, counts.added, counts.removed, counts.modified, counts.unchanged
        ));
    }
    let hints = summary.formula_changes;
    out.push_str(&format!(
        "  Formula changes: {} reference shift, {} logic change, {} other\n",
        hints.reference_shift, hints.logic_change, hints.other
    ));
    out.push_str(&format!("  Property differences: {}\n", summary.property_differences));
    out.push_str(&format!("  Issues: {}\n", summary.issues));
    out
}

fn render_report(result: &ComparisonResult, use_color: bool) -> String {
    let mut out = String::new();
    out.push_str(&format!("\n{}\n", "=".repeat(80)));
    out.push_str(&format!("Comparison Results: {} vs {}\n", result.left(), result.right()));
    out.push_str(&format!("{}\n", "=".repeat(80)));

    for entry in result.entries() {
        let kind = entry.kind();
        let (color, reset) = if use_color {
            (status_color(kind), "\x1b[0m")
        } else {
            ("", "")
        };
        out.push_str(&format!(
            "{}  {}  {} {}\n",
            color,
            status_symbol(kind),
            reset,
            describe_entry(entry)
        ));
    }

    for diff in result.property_diffs() {
        out.push_str(&format!(
            "  !=   property {}: {} -> {}\n",
            diff.property,
            diff.before.as_deref().unwrap_or("(none)"),
            diff.after.as_deref().unwrap_or("(none)")
        ));
    }

    if !result.issues().is_empty() {
        out.push_str("\nIssues:\n");
        for issue in result.issues() {
            out.push_str(&format!("  {}: {}\n", issue.location, issue.message));
        }
    }

    out.push_str(&format!("\n{}\n", "=".repeat(80)));
    out.push_str(&render_summary(result.summary()));

    let recommendations = result.summary().recommendations();
    if recommendations.is_empty() {
        out.push_str("Workbooks are identical\n");
    } else {
        out.push_str("Recommendations:\n");
        for rec in recommendations {
            out.push_str(&format!("  - {}\n", rec));
        }
    }
    out.push_str(&format!("{}\n", "=".repeat(80)));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use xlcompare_common::{CellCoord, CellDiff, MacroDiff, Sheet, Workbook};

    fn sample_result() -> ComparisonResult {
        let mut before = Sheet::new("Sheet1");
        before.set_value(0, 0, 10.0);
        before.set_formula(0, 1, "=A1+B1");
        let mut after = Sheet::new("Sheet1");
        after.set_value(0, 0, 20.0);
        after.set_formula(0, 1, "=A2+B2");

        ComparisonEngine::default()
            .compare(
                &Workbook::new("before.xlsx").with_sheet(before),
                &Workbook::new("after.xlsx").with_sheet(after),
            )
            .unwrap()
    }

    #[test]
    fn test_build_options_overrides_config() {
        let overrides = Overrides {
            tolerance: Some(0.5),
            mixed_hint: Some(FormulaChange::LogicChange),
            include_unchanged: true,
            exact_whitespace: true,
            ..Default::default()
        };
        let options = build_options(CompareOptions::default(), &overrides);
        assert_eq!(options.numeric_tolerance, 0.5);
        assert_eq!(options.rename_similarity_threshold, 0.8);
        assert_eq!(options.mixed_change_hint, FormulaChange::LogicChange);
        assert!(!options.suppress_unchanged_entries);
        assert!(!options.ignore_whitespace_only_line_changes);
        assert!(!options.compare_styles);
    }

    #[test]
    fn test_build_options_without_overrides_keeps_config() {
        let config = CompareOptions {
            numeric_tolerance: 0.25,
            compare_styles: true,
            ..Default::default()
        };
        assert_eq!(build_options(config.clone(), &Overrides::default()), config);
    }

    #[test]
    fn test_describe_entries() {
        let cell = DiffEntry::Cell(CellDiff {
            sheet: "Data".into(),
            coord: CellCoord::new(1, 2),
            kind: DiffKind::Added,
            before: CellValue::Empty,
            after: CellValue::Text("new".into()),
            before_style: None,
            after_style: None,
        });
        assert_eq!(describe_entry(&cell), "Data!C2  (empty) -> \"new\"");

        let renamed = DiffEntry::Macro(MacroDiff {
            module: "Module1".into(),
            procedure: Some("ComputeTotals".into()),
            scope: MacroScope::Procedure,
            kind: DiffKind::Modified,
            renamed_from: Some("CalculateTotals".into()),
            signature_changed: false,
            similarity: Some(1.0),
            degraded: false,
            edits: Vec::new(),
        });
        assert_eq!(
            describe_entry(&renamed),
            "Module1.ComputeTotals  +0 -0 [renamed from CalculateTotals]"
        );
    }

    #[test]
    fn test_render_report_without_color() {
        let report = render_report(&sample_result(), false);
        assert!(report.contains("Comparison Results: before.xlsx vs after.xlsx"));
        assert!(report.contains("!=   Sheet1!A1"));
        assert!(report.contains("[reference shift]"));
        assert!(report.contains("Check formula changes for accuracy"));
        assert!(!report.contains("\x1b["));
    }

    #[test]
    fn test_render_report_with_color() {
        let report = render_report(&sample_result(), true);
        assert!(report.contains("\x1b[31m"));
        assert!(report.contains("\x1b[0m"));
    }

    #[test]
    fn test_json_report_shape() {
        let result = sample_result();
        let value = serde_json::to_value(JsonReport::new(&result)).unwrap();
        assert_eq!(value["left"], "before.xlsx");
        assert_eq!(value["identical"], false);
        assert_eq!(value["summary"]["cells"]["modified"], 1);
        assert_eq!(value["entries"][0]["domain"], "cell");
        assert_eq!(value["entries"][1]["change"], "reference-shift");
        assert!(value["recommendations"].as_array().unwrap().len() >= 2);
    }

    #[test]
    fn test_status_symbols() {
        assert_eq!(status_symbol(DiffKind::Unchanged), "==");
        assert_eq!(status_symbol(DiffKind::Modified), "!=");
        assert_eq!(status_symbol(DiffKind::Removed), "<<");
        assert_eq!(status_symbol(DiffKind::Added), ">>");
    }
}
