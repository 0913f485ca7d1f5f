//! Static import validation over the Python syntax tree.
//!
//! Scripts are parsed with Tree-sitter and never executed or imported here.
//! Every import statement is visited in source order; the first module whose
//! top-level name is outside the allow-set rejects the whole script.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tree_sitter::{Language, Node, Parser};

use crate::error::{Result, SandboxError};

/// Module that is always importable; it only toggles compiler features.
const FUTURE_MODULE: &str = "__future__";

/// Builtin that imports a module named at runtime.
const DYNAMIC_IMPORT: &str = "__import__";

/// Python 2 statements the grammar still accepts but Python 3 does not.
const LEGACY_STATEMENTS: &[&str] = &["print_statement", "exec_statement"];

/// Source-encoding declaration, honoured by the interpreter on lines 1-2.
static CODING_COOKIE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[ \t\f]*#.*?coding[:=][ \t]*([-\w.]+)").expect("coding cookie pattern is valid")
});

/// Why a script was refused before execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    /// The source does not parse.
    SyntaxError {
        /// One-based line of the first error.
        line: usize,
        /// One-based column of the first error.
        column: usize,
    },
    /// An `import` or `from ... import` names a module outside the allow-set.
    DisallowedModule,
    /// A relative import such as `from . import x`.
    RelativeImport,
    /// Any reference to the `__import__` builtin.
    DynamicImport,
    /// A coding declaration other than UTF-8.
    UnsupportedEncoding(String),
}

/// Result of checking one script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// Every import is permitted.
    Allowed,
    /// The script must not run.
    Rejected(Rejection),
}

impl ValidationOutcome {
    /// Check if the script may run.
    pub fn is_allowed(&self) -> bool {
        matches!(self, ValidationOutcome::Allowed)
    }
}

/// Details of a rejected script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Category of the rejection.
    pub reason: RejectionReason,
    /// The offending module, when one can be named.
    pub module: Option<String>,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let module = self.module.as_deref().unwrap_or_default();
        match &self.reason {
            RejectionReason::SyntaxError { line, column } => {
                write!(f, "syntax error at line {line}, column {column}")
            }
            RejectionReason::DisallowedModule => {
                write!(f, "import of module '{module}' is not allowed")
            }
            RejectionReason::RelativeImport => {
                write!(f, "relative import '{module}' is not allowed")
            }
            RejectionReason::DynamicImport => f.write_str("dynamic imports via __import__ are not allowed"),
            RejectionReason::UnsupportedEncoding(encoding) => {
                write!(f, "source encoding '{encoding}' is not allowed; scripts must be UTF-8")
            }
        }
    }
}

/// Checks script imports against a fixed allow-set.
#[derive(Debug, Clone)]
pub struct StaticValidator {
    allowed: Arc<BTreeSet<String>>,
    language: Language,
}

impl StaticValidator {
    /// Create a validator for the given allow-set.
    pub fn new(allowed: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            allowed: Arc::new(allowed.into_iter().map(Into::into).collect()),
            language: tree_sitter_python::LANGUAGE.into(),
        }
    }

    /// Validate `source` without executing any of it.
    ///
    /// An empty script is allowed; it has nothing to import and fails later
    /// for lack of an entry point.
    pub fn validate(&self, source: &str) -> Result<ValidationOutcome> {
        // The interpreter decodes the file itself; anything but UTF-8 would
        // make it read different source than the parser sees here.
        if let Some(encoding) = foreign_encoding(source) {
            tracing::info!(target: "sandbox::request", %encoding, "rejecting script with coding cookie");
            return Ok(ValidationOutcome::Rejected(Rejection {
                reason: RejectionReason::UnsupportedEncoding(encoding.to_string()),
                module: None,
            }));
        }

        let mut parser = Parser::new();
        parser
            .set_language(&self.language)
            .map_err(|e| SandboxError::ParserInit(e.to_string()))?;
        let tree = parser
            .parse(source, None)
            .ok_or_else(|| SandboxError::ParserInit("parser produced no tree".to_string()))?;

        let root = tree.root_node();
        if let Some(error) = first_error_node(root) {
            let start = error.start_position();
            tracing::debug!(line = start.row + 1, "rejecting script with syntax error");
            return Ok(ValidationOutcome::Rejected(Rejection {
                reason: RejectionReason::SyntaxError {
                    line: start.row + 1,
                    column: start.column + 1,
                },
                module: None,
            }));
        }

        let bytes = source.as_bytes();
        for node in preorder(root) {
            let rejection = match node.kind() {
                "import_statement" => self.check_import(node, bytes),
                "import_from_statement" => self.check_from_import(node, bytes),
                "identifier" => check_dynamic_import(node, bytes),
                _ => None,
            };
            if let Some(rejection) = rejection {
                tracing::info!(
                    target: "sandbox::request",
                    module = rejection.module.as_deref().unwrap_or_default(),
                    "import validation rejected script"
                );
                return Ok(ValidationOutcome::Rejected(rejection));
            }
        }

        Ok(ValidationOutcome::Allowed)
    }

    /// `import a.b, c as d`
    fn check_import(&self, node: Node<'_>, source: &[u8]) -> Option<Rejection> {
        let mut cursor = node.walk();
        let rejection = node
            .children_by_field_name("name", &mut cursor)
            .filter_map(|name| dotted_name_text(name, source))
            .find_map(|module| self.check_module(module));
        rejection
    }

    /// `from a.b import c` and `from . import c`
    fn check_from_import(&self, node: Node<'_>, source: &[u8]) -> Option<Rejection> {
        let module_node = node.child_by_field_name("module_name")?;
        let text = node_text(module_node, source);
        if module_node.kind() == "relative_import" {
            return Some(Rejection {
                reason: RejectionReason::RelativeImport,
                module: Some(text.to_string()),
            });
        }
        self.check_module(text)
    }

    fn check_module(&self, module: &str) -> Option<Rejection> {
        let top_level = top_level_module(module);
        if top_level == FUTURE_MODULE || self.allowed.contains(top_level) {
            tracing::trace!(module, "import permitted");
            return None;
        }
        Some(Rejection {
            reason: RejectionReason::DisallowedModule,
            module: Some(top_level.to_string()),
        })
    }
}

/// Portion of a dotted module path before the first separator.
pub fn top_level_module(module: &str) -> &str {
    module.split('.').next().unwrap_or(module).trim()
}

/// Any mention of `__import__`, whether called, aliased, or reached as an
/// attribute (`__builtins__.__import__`).
fn check_dynamic_import(node: Node<'_>, source: &[u8]) -> Option<Rejection> {
    (node_text(node, source) == DYNAMIC_IMPORT).then(|| Rejection {
        reason: RejectionReason::DynamicImport,
        module: Some(DYNAMIC_IMPORT.to_string()),
    })
}

/// Encoding named by a coding cookie on the first two lines, unless UTF-8.
fn foreign_encoding(source: &str) -> Option<&str> {
    let source = source.strip_prefix('\u{feff}').unwrap_or(source);
    source
        .lines()
        .take(2)
        .filter_map(|line| CODING_COOKIE.captures(line))
        .filter_map(|captures| captures.get(1))
        .map(|encoding| encoding.as_str())
        .find(|encoding| !is_utf8(encoding))
}

fn is_utf8(encoding: &str) -> bool {
    let normal = encoding.to_ascii_lowercase().replace('_', "-");
    normal == "utf-8" || normal == "utf8" || normal.starts_with("utf-8-")
}

/// Text of an imported name, unwrapping `x as y`.
fn dotted_name_text<'a>(node: Node<'_>, source: &'a [u8]) -> Option<&'a str> {
    match node.kind() {
        "dotted_name" => Some(node_text(node, source)),
        "aliased_import" => node
            .child_by_field_name("name")
            .map(|name| node_text(name, source)),
        _ => None,
    }
}

fn node_text<'a>(node: Node<'_>, source: &'a [u8]) -> &'a str {
    node.utf8_text(source).unwrap_or_default()
}

fn first_error_node(root: Node<'_>) -> Option<Node<'_>> {
    preorder(root)
        .find(|node| node.is_error() || node.is_missing() || LEGACY_STATEMENTS.contains(&node.kind()))
}

/// Depth-first, source-ordered traversal of every node under `root`.
fn preorder(root: Node<'_>) -> impl Iterator<Item = Node<'_>> {
    let mut cursor = root.walk();
    let mut done = false;
    std::iter::from_fn(move || {
        if done {
            return None;
        }
        let node = cursor.node();
        if !cursor.goto_first_child() {
            while !cursor.goto_next_sibling() {
                if !cursor.goto_parent() {
                    done = true;
                    break;
                }
            }
        }
        Some(node)
    })
}
