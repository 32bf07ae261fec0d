use crate::line_diff::NumberedLine;
use regex::Regex;
use std::sync::OnceLock;
use xlcompare_common::{MacroModule, ModuleParseError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcedureKind {
    Sub,
    Function,
    PropertyGet,
    PropertyLet,
    PropertySet,
}

impl ProcedureKind {
    fn from_keyword(keyword: &str) -> Self {
        let words: Vec<String> = keyword
            .split_whitespace()
            .map(|w| w.to_ascii_lowercase())
            .collect();
        match words.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
            ["function"] => ProcedureKind::Function,
            ["property", "get"] => ProcedureKind::PropertyGet,
            ["property", "let"] => ProcedureKind::PropertyLet,
            ["property", "set"] => ProcedureKind::PropertySet,
            _ => ProcedureKind::Sub,
        }
    }

    /// Keyword expected after `End`
    fn end_keyword(self) -> &'static str {
        match self {
            ProcedureKind::Sub => "sub",
            ProcedureKind::Function => "function",
            _ => "property",
        }
    }

    fn returns_value(self) -> bool {
        matches!(self, ProcedureKind::Function | ProcedureKind::PropertyGet)
    }
}

/// Identity used to match procedures across two versions of a module.
///
/// Names compare case-insensitively. Sub and Function share a key so a changed
/// declaration keyword shows up as a modification; property accessors stay distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcedureKey {
    name: String,
    accessor: Option<ProcedureKind>,
}

/// Declared shape of a procedure apart from its name, with VBA's case and spacing folded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub kind: ProcedureKind,
    pub visibility: String,
    pub is_static: bool,
    pub parameters: Vec<String>,
    pub return_type: Option<String>,
}

fn fold(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase()
}

/// One Sub, Function or Property accessor with its full source span
#[derive(Debug, Clone, PartialEq)]
pub struct Procedure {
    pub name: String,
    pub kind: ProcedureKind,
    pub visibility: Option<String>,
    pub is_static: bool,
    pub parameters: Vec<String>,
    pub return_type: Option<String>,
    /// 1-based line of the header
    pub start_line: usize,
    /// 1-based line of the `End` statement
    pub end_line: usize,
    /// Header, body and `End` lines
    pub lines: Vec<String>,
}

impl Procedure {
    pub fn key(&self) -> ProcedureKey {
        let accessor = match self.kind {
            ProcedureKind::Sub | ProcedureKind::Function => None,
            other => Some(other),
        };
        ProcedureKey {
            name: self.name.to_ascii_lowercase(),
            accessor,
        }
    }

    pub fn signature(&self) -> Signature {
        Signature {
            kind: self.kind,
            // Procedures without a modifier are public
            visibility: self
                .visibility
                .as_deref()
                .map(fold)
                .unwrap_or_else(|| "public".to_string()),
            is_static: self.is_static,
            parameters: self.parameters.iter().map(|p| fold(p)).collect(),
            return_type: self.return_type.as_deref().map(fold),
        }
    }

    /// Lines between the header and the `End` statement
    pub fn body(&self) -> Vec<&str> {
        let len = self.lines.len();
        if len < 2 {
            return Vec::new();
        }
        self.lines[1..len - 1].iter().map(String::as_str).collect()
    }

    pub fn numbered_lines(&self) -> Vec<NumberedLine<'_>> {
        crate::line_diff::numbered(&self.lines, self.start_line)
    }
}

/// A module split into its declarations section and procedures
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedModule {
    pub name: String,
    /// Lines outside any procedure, with their line numbers
    pub declarations: Vec<(usize, String)>,
    pub procedures: Vec<Procedure>,
}

impl ParsedModule {
    pub fn declaration_lines(&self) -> Vec<NumberedLine<'_>> {
        self.declarations
            .iter()
            .map(|(number, text)| (*number, text.as_str()))
            .collect()
    }
}

fn header_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(?:(public|private|friend)\s+)?(?:(static)\s+)?(sub|function|property\s+get|property\s+let|property\s+set)\s+([a-z_][a-z0-9_]*)",
        )
        .expect("valid procedure header pattern")
    })
}

fn end_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*end\s+(sub|function|property)\b").expect("valid end pattern")
    })
}

fn return_type_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*as\s+([a-z_][a-z0-9_.]*)").expect("valid return type pattern")
    })
}

/// Split a module into procedures.
///
/// Fails on unterminated, nested or mismatched procedure blocks; callers fall back
/// to a whole-module comparison.
pub fn parse_module(module: &MacroModule) -> Result<ParsedModule, ModuleParseError> {
    let mut declarations = Vec::new();
    let mut procedures = Vec::new();
    let mut current: Option<Procedure> = None;

    for (idx, line) in module.lines.iter().enumerate() {
        let number = idx + 1;

        if let Some(mut open) = current.take() {
            if let Some(caps) = end_pattern().captures(line) {
                let keyword = caps[1].to_ascii_lowercase();
                if keyword != open.kind.end_keyword() {
                    return Err(ModuleParseError::MismatchedEnd {
                        name: open.name,
                        text: line.trim().to_string(),
                        line: number,
                    });
                }
                open.lines.push(line.clone());
                open.end_line = number;
                procedures.push(open);
            } else if let Some(inner) = parse_header(line, number) {
                return Err(ModuleParseError::Nested {
                    outer: open.name,
                    inner: inner.name,
                    line: number,
                });
            } else {
                open.lines.push(line.clone());
                current = Some(open);
            }
        } else if let Some(header) = parse_header(line, number) {
            current = Some(header);
        } else if end_pattern().is_match(line) {
            return Err(ModuleParseError::StrayEnd {
                text: line.trim().to_string(),
                line: number,
            });
        } else {
            declarations.push((number, line.clone()));
        }
    }

    if let Some(open) = current {
        return Err(ModuleParseError::Unterminated {
            name: open.name,
            line: open.start_line,
        });
    }

    Ok(ParsedModule {
        name: module.name.clone(),
        declarations,
        procedures,
    })
}

fn parse_header(line: &str, number: usize) -> Option<Procedure> {
    let caps = header_pattern().captures(line)?;
    let kind = ProcedureKind::from_keyword(&caps[3]);
    let name = caps[4].to_string();
    let rest = &line[caps.get(0).map_or(line.len(), |m| m.end())..];
    let (parameters, after_params) = split_parameters(rest);

    let declared_return = return_type_pattern()
        .captures(after_params)
        .map(|c| c[1].to_string());
    let return_type = if kind.returns_value() {
        Some(declared_return.unwrap_or_else(|| "Variant".to_string()))
    } else {
        None
    };

    Some(Procedure {
        name,
        kind,
        visibility: caps.get(1).map(|m| m.as_str().to_string()),
        is_static: caps.get(2).is_some(),
        parameters,
        return_type,
        start_line: number,
        end_line: number,
        lines: vec![line.to_string()],
    })
}

/// Parameters inside the outermost parentheses and the text after them.
/// An unclosed list (line continuation) keeps whatever is on the header line.
fn split_parameters(rest: &str) -> (Vec<String>, &str) {
    let trimmed = rest.trim_start();
    let Some(inner) = trimmed.strip_prefix('(') else {
        return (Vec::new(), trimmed);
    };

    let mut depth = 1usize;
    let mut close = None;
    for (pos, c) in inner.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(pos);
                    break;
                }
            }
            _ => {}
        }
    }

    let (list, after) = match close {
        Some(pos) => (&inner[..pos], &inner[pos + 1..]),
        None => (inner.trim_end().trim_end_matches('_'), ""),
    };
    let parameters = list
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();
    (parameters, after)
}

#[cfg(test)]
mod tests {
    use super::*;
    use xlcompare_common::ModuleKind;

    fn module(source: &str) -> MacroModule {
        MacroModule::from_source("Module1", ModuleKind::Standard, source)
    }

    #[test]
    fn test_splits_declarations_and_procedures() {
        let parsed = parse_module(&module(
            "Option Explicit\n\
             Private counter As Long\n\
             \n\
             Public Sub Increment(ByVal step As Long, Optional label As String)\n\
             \tcounter = counter + step\n\
             End Sub\n\
             \n\
             Private Function Total() As Long\n\
             \tTotal = counter\n\
             End Function\n",
        ))
        .unwrap();

        assert_eq!(parsed.declarations.len(), 4);
        assert_eq!(parsed.declarations[0], (1, "Option Explicit".to_string()));
        assert_eq!(parsed.procedures.len(), 2);

        let inc = &parsed.procedures[0];
        assert_eq!(inc.name, "Increment");
        assert_eq!(inc.kind, ProcedureKind::Sub);
        assert_eq!(inc.visibility.as_deref(), Some("Public"));
        assert_eq!(inc.parameters, vec!["ByVal step As Long", "Optional label As String"]);
        assert_eq!(inc.return_type, None);
        assert_eq!((inc.start_line, inc.end_line), (4, 6));
        assert_eq!(inc.body(), vec!["\tcounter = counter + step"]);

        let total = &parsed.procedures[1];
        assert_eq!(total.kind, ProcedureKind::Function);
        assert_eq!(total.return_type.as_deref(), Some("Long"));
    }

    #[test]
    fn test_headers_are_case_insensitive() {
        let parsed = parse_module(&module(
            "private static function helper(x)\nhelper = x\nEND FUNCTION\n\
             Property Get Value() As Variant\nEnd Property\n\
             Property Let Value(v)\nEnd Property",
        ))
        .unwrap();

        let helper = &parsed.procedures[0];
        assert!(helper.is_static);
        assert_eq!(helper.return_type.as_deref(), Some("Variant"));

        assert_eq!(parsed.procedures[1].kind, ProcedureKind::PropertyGet);
        assert_eq!(parsed.procedures[2].kind, ProcedureKind::PropertyLet);
        assert_ne!(parsed.procedures[1].key(), parsed.procedures[2].key());
    }

    #[test]
    fn test_sub_and_function_share_key() {
        let parsed = parse_module(&module("Sub Run()\nEnd Sub\nFunction run()\nEnd Function")).unwrap();
        assert_eq!(parsed.procedures[0].key(), parsed.procedures[1].key());
    }

    #[test]
    fn test_declare_statements_are_not_procedures() {
        let parsed = parse_module(&module(
            "Private Declare PtrSafe Function GetTickCount Lib \"kernel32\" () As Long\n\
             ' Sub Commented()\n\
             Dim x As Integer",
        ))
        .unwrap();
        assert!(parsed.procedures.is_empty());
        assert_eq!(parsed.declarations.len(), 3);
    }

    #[test]
    fn test_end_if_does_not_close_procedure() {
        let parsed = parse_module(&module(
            "Sub A()\nIf x Then\nEnd\nEnd If\nEnd Sub",
        ))
        .unwrap();
        assert_eq!(parsed.procedures[0].lines.len(), 5);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            parse_module(&module("Sub A()\nx = 1")),
            Err(ModuleParseError::Unterminated {
                name: "A".into(),
                line: 1
            })
        );
        assert!(matches!(
            parse_module(&module("x = 1\nEnd Sub")),
            Err(ModuleParseError::StrayEnd { line: 2, .. })
        ));
        assert!(matches!(
            parse_module(&module("Sub A()\nSub B()\nEnd Sub\nEnd Sub")),
            Err(ModuleParseError::Nested { line: 2, .. })
        ));
        assert!(matches!(
            parse_module(&module("Function A()\nEnd Sub")),
            Err(ModuleParseError::MismatchedEnd { line: 2, .. })
        ));
    }

    #[test]
    fn test_continued_parameter_list() {
        let parsed = parse_module(&module(
            "Sub Long1(a As Long, _\n    b As Long)\nEnd Sub",
        ))
        .unwrap();
        assert_eq!(parsed.procedures[0].parameters, vec!["a As Long"]);
    }

    #[test]
    fn test_signature_folds_case_and_spacing() {
        let module = MacroModule::from_source(
            "M",
            ModuleKind::Standard,
            "Sub A(ByVal  x As Long)\nEnd Sub\nPublic Sub B(byval x as long)\nEnd Sub\nPrivate Function C(x As Long) As String\nEnd Function\n",
        );
        let parsed = parse_module(&module).unwrap();
        let sig: Vec<_> = parsed.procedures.iter().map(Procedure::signature).collect();

        assert_eq!(sig[0], sig[1]);
        assert_ne!(sig[0], sig[2]);
        assert_eq!(sig[2].visibility, "private");
        assert_eq!(sig[2].parameters, vec!["x as long"]);
        assert_eq!(sig[2].return_type.as_deref(), Some("string"));
    }
}
