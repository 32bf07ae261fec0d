use similar::{capture_diff_slices, Algorithm, DiffTag};
use std::borrow::Cow;
use xlcompare_common::{EditOp, LineEdit};

/// A source line with its 1-based line number in the module
pub type NumberedLine<'a> = (usize, &'a str);

/// Whitespace handling for macro line comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WhitespaceMode {
    /// Compare lines exactly
    Exact,
    /// Collapse runs of whitespace, trim ends and skip blank lines
    #[default]
    IgnoreChanges,
}

impl WhitespaceMode {
    pub fn from_flag(ignore_whitespace: bool) -> Self {
        if ignore_whitespace {
            WhitespaceMode::IgnoreChanges
        } else {
            WhitespaceMode::Exact
        }
    }

    /// Comparison key for a line
    pub fn normalize<'a>(&self, line: &'a str) -> Cow<'a, str> {
        match self {
            WhitespaceMode::Exact => Cow::Borrowed(line),
            WhitespaceMode::IgnoreChanges => {
                Cow::Owned(line.split_whitespace().collect::<Vec<_>>().join(" "))
            }
        }
    }

    /// Whether a line takes part in the comparison at all
    pub fn keeps(&self, line: &str) -> bool {
        match self {
            WhitespaceMode::Exact => true,
            WhitespaceMode::IgnoreChanges => !line.trim().is_empty(),
        }
    }
}

fn prepare<'a>(
    lines: &[NumberedLine<'a>],
    mode: WhitespaceMode,
) -> (Vec<NumberedLine<'a>>, Vec<Cow<'a, str>>) {
    let kept: Vec<NumberedLine<'a>> = lines
        .iter()
        .copied()
        .filter(|(_, text)| mode.keeps(text))
        .collect();
    let keys = kept.iter().map(|(_, text)| mode.normalize(text)).collect();
    (kept, keys)
}

/// Line-level edit script between two numbered line sequences.
///
/// Kept lines carry the text of the new side.
pub fn diff_lines(
    old: &[NumberedLine<'_>],
    new: &[NumberedLine<'_>],
    mode: WhitespaceMode,
) -> Vec<LineEdit> {
    let (old, old_keys) = prepare(old, mode);
    let (new, new_keys) = prepare(new, mode);

    let mut edits = Vec::with_capacity(old.len().max(new.len()));
    for op in capture_diff_slices(Algorithm::Lcs, &old_keys, &new_keys) {
        let (tag, old_range, new_range) = op.as_tag_tuple();
        match tag {
            DiffTag::Equal => {
                for (o, n) in old_range.zip(new_range) {
                    edits.push(LineEdit {
                        op: EditOp::Keep,
                        old_line: Some(old[o].0),
                        new_line: Some(new[n].0),
                        text: new[n].1.to_string(),
                    });
                }
            }
            DiffTag::Delete | DiffTag::Insert | DiffTag::Replace => {
                for o in old_range {
                    edits.push(LineEdit {
                        op: EditOp::Delete,
                        old_line: Some(old[o].0),
                        new_line: None,
                        text: old[o].1.to_string(),
                    });
                }
                for n in new_range {
                    edits.push(LineEdit {
                        op: EditOp::Insert,
                        old_line: None,
                        new_line: Some(new[n].0),
                        text: new[n].1.to_string(),
                    });
                }
            }
        }
    }
    edits
}

/// Every line of one side as an insertion or deletion
pub fn one_sided(lines: &[NumberedLine<'_>], op: EditOp, mode: WhitespaceMode) -> Vec<LineEdit> {
    lines
        .iter()
        .filter(|(_, text)| mode.keeps(text))
        .map(|(number, text)| LineEdit {
            op,
            old_line: (op != EditOp::Insert).then_some(*number),
            new_line: (op != EditOp::Delete).then_some(*number),
            text: text.to_string(),
        })
        .collect()
}

/// Dice coefficient over line sequences: 2 * matched / (|old| + |new|).
/// Two empty sequences are identical.
pub fn similarity(old: &[&str], new: &[&str], mode: WhitespaceMode) -> f64 {
    let old_keys: Vec<Cow<'_, str>> = old
        .iter()
        .filter(|l| mode.keeps(l))
        .map(|l| mode.normalize(l))
        .collect();
    let new_keys: Vec<Cow<'_, str>> = new
        .iter()
        .filter(|l| mode.keeps(l))
        .map(|l| mode.normalize(l))
        .collect();

    let total = old_keys.len() + new_keys.len();
    if total == 0 {
        return 1.0;
    }

    let matched: usize = capture_diff_slices(Algorithm::Lcs, &old_keys, &new_keys)
        .iter()
        .filter_map(|op| {
            let (tag, old_range, _) = op.as_tag_tuple();
            (tag == DiffTag::Equal).then_some(old_range.len())
        })
        .sum();

    (2 * matched) as f64 / total as f64
}

/// Number lines from `start` (1-based)
pub fn numbered(lines: &[String], start: usize) -> Vec<NumberedLine<'_>> {
    lines
        .iter()
        .enumerate()
        .map(|(idx, line)| (start + idx, line.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(str::to_string).collect()
    }

    fn ops(edits: &[LineEdit]) -> Vec<(EditOp, Option<usize>, Option<usize>)> {
        edits.iter().map(|e| (e.op, e.old_line, e.new_line)).collect()
    }

    #[test]
    fn test_insert_and_delete_numbering() {
        let old = lines("a\nb\nc");
        let new = lines("a\nc\nd");
        let edits = diff_lines(&numbered(&old, 1), &numbered(&new, 1), WhitespaceMode::Exact);
        assert_eq!(
            ops(&edits),
            vec![
                (EditOp::Keep, Some(1), Some(1)),
                (EditOp::Delete, Some(2), None),
                (EditOp::Keep, Some(3), Some(2)),
                (EditOp::Insert, None, Some(3)),
            ]
        );
    }

    #[test]
    fn test_whitespace_only_changes_ignored() {
        let old = lines("If x Then\n    y = 1\nEnd If");
        let new = lines("If  x Then\n\n\ty = 1   \nEnd If");

        let ignoring = diff_lines(
            &numbered(&old, 10),
            &numbered(&new, 10),
            WhitespaceMode::IgnoreChanges,
        );
        assert!(ignoring.iter().all(|e| !e.is_change()));
        assert_eq!(ignoring[1].new_line, Some(12));

        let exact = diff_lines(&numbered(&old, 10), &numbered(&new, 10), WhitespaceMode::Exact);
        assert!(exact.iter().any(|e| e.is_change()));
    }

    #[test]
    fn test_similarity_bounds() {
        let mode = WhitespaceMode::IgnoreChanges;
        assert_eq!(similarity(&[], &[], mode), 1.0);
        assert_eq!(similarity(&["a", "b"], &["a", "b"], mode), 1.0);
        assert_eq!(similarity(&["a", "b"], &["c", "d"], mode), 0.0);
        assert_eq!(similarity(&["a", "b", "c", "d"], &["a", "b", "c", "x"], mode), 0.75);
        assert_eq!(similarity(&["a"], &[], mode), 0.0);
    }

    #[test]
    fn test_one_sided() {
        let src = lines("x = 1\n\ny = 2");
        let edits = one_sided(&numbered(&src, 4), EditOp::Insert, WhitespaceMode::IgnoreChanges);
        assert_eq!(ops(&edits), vec![(EditOp::Insert, None, Some(4)), (EditOp::Insert, None, Some(6))]);

        let all = one_sided(&numbered(&src, 1), EditOp::Delete, WhitespaceMode::Exact);
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|e| e.new_line.is_none()));
    }
}
