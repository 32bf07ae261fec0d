use crate::line_diff::{diff_lines, numbered, one_sided, similarity, WhitespaceMode};
use crate::macro_parser::{parse_module, ParsedModule, Procedure, ProcedureKey};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, warn};
use xlcompare_common::{
    CompareOptions, DiffKind, EditOp, Issue, IssueKind, LineEdit, MacroDiff, MacroModule,
    MacroScope, ModuleFingerprint,
};

/// Macro differences for one module name
#[derive(Debug, Clone, Default)]
pub struct MacroMatch {
    pub diffs: Vec<MacroDiff>,
    pub elided: usize,
    pub issues: Vec<Issue>,
}

impl MacroMatch {
    fn push(&mut self, diff: MacroDiff, suppress_unchanged: bool) {
        if diff.kind == DiffKind::Unchanged && suppress_unchanged {
            self.elided += 1;
        } else {
            self.diffs.push(diff);
        }
    }
}

/// Compares macro modules at module, declarations and procedure granularity.
#[derive(Debug, Clone)]
pub struct MacroDiffer {
    mode: WhitespaceMode,
    rename_threshold: f64,
    suppress_unchanged: bool,
}

impl Default for MacroDiffer {
    fn default() -> Self {
        Self::from_options(&CompareOptions::default())
    }
}

impl MacroDiffer {
    pub fn from_options(options: &CompareOptions) -> Self {
        Self {
            mode: WhitespaceMode::from_flag(options.ignore_whitespace_only_line_changes),
            rename_threshold: options.rename_similarity_threshold,
            suppress_unchanged: options.suppress_unchanged_entries,
        }
    }

    pub fn with_whitespace_mode(mut self, mode: WhitespaceMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_rename_threshold(mut self, threshold: f64) -> Self {
        self.rename_threshold = threshold;
        self
    }

    pub fn with_suppress_unchanged(mut self, suppress: bool) -> Self {
        self.suppress_unchanged = suppress;
        self
    }

    /// Digest of the lines that take part in comparison, after whitespace normalization
    pub fn fingerprint(&self, module: &MacroModule) -> ModuleFingerprint {
        let keys: Vec<_> = module
            .lines
            .iter()
            .filter(|l| self.mode.keeps(l))
            .map(|l| self.mode.normalize(l))
            .collect();
        ModuleFingerprint::of_lines(keys.iter().map(|k| k.as_ref()))
    }

    /// Compare the two versions of a module. A missing side means the module was
    /// added or removed.
    pub fn diff_modules(
        &self,
        name: &str,
        before: Option<&MacroModule>,
        after: Option<&MacroModule>,
    ) -> MacroMatch {
        let mut result = MacroMatch::default();

        let (before, after) = match (before, after) {
            (None, None) => return result,
            (Some(a), None) => {
                let edits = one_sided(&numbered(&a.lines, 1), EditOp::Delete, self.mode);
                result.push(self.module_entry(name, DiffKind::Removed, None, edits), false);
                return result;
            }
            (None, Some(b)) => {
                let edits = one_sided(&numbered(&b.lines, 1), EditOp::Insert, self.mode);
                result.push(self.module_entry(name, DiffKind::Added, None, edits), false);
                return result;
            }
            (Some(a), Some(b)) => (a, b),
        };

        if self.fingerprint(before) == self.fingerprint(after) {
            debug!("Module '{}': fingerprints match", name);
            let entry = self.module_entry(name, DiffKind::Unchanged, Some(1.0), Vec::new());
            result.push(entry, self.suppress_unchanged);
            return result;
        }

        let module_similarity = similarity(&as_strs(&before.lines), &as_strs(&after.lines), self.mode);

        match (parse_module(before), parse_module(after)) {
            (Ok(a), Ok(b)) => {
                let entry =
                    self.module_entry(name, DiffKind::Modified, Some(module_similarity), Vec::new());
                result.push(entry, false);
                self.diff_declarations(name, &a, &b, &mut result);
                self.diff_procedures(name, &a, &b, &mut result);
            }
            (a, b) => {
                for (side, outcome) in [("before", a.err()), ("after", b.err())] {
                    if let Some(error) = outcome {
                        warn!("Module '{}' ({}) degraded to line diff: {}", name, side, error);
                        result.issues.push(Issue {
                            kind: IssueKind::ModuleParse,
                            location: name.to_string(),
                            message: format!("{} module: {}", side, error),
                        });
                    }
                }
                let edits = diff_lines(&numbered(&before.lines, 1), &numbered(&after.lines, 1), self.mode);
                let kind = kind_from_edits(&edits);
                let mut entry = self.module_entry(name, kind, Some(module_similarity), edits);
                entry.degraded = true;
                result.push(entry, self.suppress_unchanged);
            }
        }

        debug!(
            "Module '{}': {} macro entries, {} unchanged elided",
            name,
            result.diffs.len(),
            result.elided
        );
        result
    }

    fn module_entry(
        &self,
        name: &str,
        kind: DiffKind,
        similarity: Option<f64>,
        edits: Vec<LineEdit>,
    ) -> MacroDiff {
        MacroDiff {
            module: name.to_string(),
            procedure: None,
            scope: MacroScope::Module,
            kind,
            renamed_from: None,
            signature_changed: false,
            similarity,
            degraded: false,
            edits,
        }
    }

    fn diff_declarations(
        &self,
        name: &str,
        before: &ParsedModule,
        after: &ParsedModule,
        result: &mut MacroMatch,
    ) {
        let old = before.declaration_lines();
        let new = after.declaration_lines();
        let old_present = old.iter().any(|(_, l)| self.mode.keeps(l));
        let new_present = new.iter().any(|(_, l)| self.mode.keeps(l));

        let kind = match (old_present, new_present) {
            (false, false) => return,
            (false, true) => DiffKind::Added,
            (true, false) => DiffKind::Removed,
            (true, true) => DiffKind::Modified,
        };

        let edits = diff_lines(&old, &new, self.mode);
        let kind = if kind == DiffKind::Modified {
            kind_from_edits(&edits)
        } else {
            kind
        };

        let entry = MacroDiff {
            module: name.to_string(),
            procedure: None,
            scope: MacroScope::Declarations,
            kind,
            renamed_from: None,
            signature_changed: false,
            similarity: None,
            degraded: false,
            edits: if kind == DiffKind::Unchanged {
                Vec::new()
            } else {
                edits
            },
        };
        result.push(entry, self.suppress_unchanged);
    }

    fn diff_procedures(
        &self,
        name: &str,
        before: &ParsedModule,
        after: &ParsedModule,
        result: &mut MacroMatch,
    ) {
        let mut by_key: HashMap<ProcedureKey, VecDeque<usize>> = HashMap::new();
        for (idx, proc) in after.procedures.iter().enumerate() {
            by_key.entry(proc.key()).or_default().push_back(idx);
        }

        // Pair by key first, in before order
        let mut matched: Vec<Option<usize>> = Vec::with_capacity(before.procedures.len());
        let mut claimed: HashSet<usize> = HashSet::new();
        for proc in &before.procedures {
            let hit = by_key.get_mut(&proc.key()).and_then(|q| q.pop_front());
            if let Some(idx) = hit {
                claimed.insert(idx);
            }
            matched.push(hit);
        }

        let removed: Vec<usize> = (0..before.procedures.len())
            .filter(|i| matched[*i].is_none())
            .collect();
        let added: Vec<usize> = (0..after.procedures.len())
            .filter(|j| !claimed.contains(j))
            .collect();
        let renames = self.detect_renames(
            &removed.iter().map(|&i| &before.procedures[i]).collect::<Vec<_>>(),
            &added.iter().map(|&j| &after.procedures[j]).collect::<Vec<_>>(),
        );
        let renamed_to: HashMap<usize, usize> = renames
            .iter()
            .map(|&(r, a)| (removed[r], added[a]))
            .collect();
        let renamed_targets: HashSet<usize> = renamed_to.values().copied().collect();

        for (i, proc) in before.procedures.iter().enumerate() {
            let diff = if let Some(j) = matched[i] {
                self.procedure_pair(name, proc, &after.procedures[j], false)
            } else if let Some(&j) = renamed_to.get(&i) {
                debug!(
                    "Module '{}': '{}' renamed to '{}'",
                    name, proc.name, after.procedures[j].name
                );
                self.procedure_pair(name, proc, &after.procedures[j], true)
            } else {
                self.procedure_one_sided(name, proc, DiffKind::Removed)
            };
            result.push(diff, self.suppress_unchanged);
        }

        for j in added {
            if !renamed_targets.contains(&j) {
                let diff = self.procedure_one_sided(name, &after.procedures[j], DiffKind::Added);
                result.push(diff, false);
            }
        }
    }

    /// Pair unmatched procedures whose bodies are mutually the only candidate at or
    /// above the threshold. Returns (removed index, added index) pairs.
    fn detect_renames(&self, removed: &[&Procedure], added: &[&Procedure]) -> Vec<(usize, usize)> {
        if removed.is_empty() || added.is_empty() {
            return Vec::new();
        }

        let scores: Vec<Vec<f64>> = removed
            .iter()
            .map(|r| {
                let body = r.body();
                added
                    .iter()
                    .map(|a| similarity(&body, &a.body(), self.mode))
                    .collect()
            })
            .collect();
        let passes = |r: usize, a: usize| scores[r][a] >= self.rename_threshold;

        let mut pairs = Vec::new();
        for r in 0..removed.len() {
            let candidates: Vec<usize> = (0..added.len()).filter(|&a| passes(r, a)).collect();
            if let [a] = candidates.as_slice() {
                let rivals = (0..removed.len()).filter(|&other| passes(other, *a)).count();
                if rivals == 1 {
                    pairs.push((r, *a));
                }
            }
        }
        pairs
    }

    fn procedure_pair(
        &self,
        module: &str,
        before: &Procedure,
        after: &Procedure,
        renamed: bool,
    ) -> MacroDiff {
        let edits = diff_lines(&before.numbered_lines(), &after.numbered_lines(), self.mode);
        let signature_changed = before.signature() != after.signature();
        let changed = renamed || signature_changed || edits.iter().any(LineEdit::is_change);

        MacroDiff {
            module: module.to_string(),
            procedure: Some(after.name.clone()),
            scope: MacroScope::Procedure,
            kind: if changed {
                DiffKind::Modified
            } else {
                DiffKind::Unchanged
            },
            renamed_from: renamed.then(|| before.name.clone()),
            signature_changed,
            similarity: Some(similarity(&before.body(), &after.body(), self.mode)),
            degraded: false,
            edits: if changed { edits } else { Vec::new() },
        }
    }

    fn procedure_one_sided(&self, module: &str, proc: &Procedure, kind: DiffKind) -> MacroDiff {
        let op = if kind == DiffKind::Added {
            EditOp::Insert
        } else {
            EditOp::Delete
        };
        MacroDiff {
            module: module.to_string(),
            procedure: Some(proc.name.clone()),
            scope: MacroScope::Procedure,
            kind,
            renamed_from: None,
            signature_changed: false,
            similarity: None,
            degraded: false,
            edits: one_sided(&proc.numbered_lines(), op, self.mode),
        }
    }
}

fn as_strs(lines: &[String]) -> Vec<&str> {
    lines.iter().map(String::as_str).collect()
}

fn kind_from_edits(edits: &[LineEdit]) -> DiffKind {
    if edits.iter().any(LineEdit::is_change) {
        DiffKind::Modified
    } else {
        DiffKind::Unchanged
    }
}
