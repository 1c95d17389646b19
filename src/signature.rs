//! Declared functions: name, parameters, and docstring contract.
//!
//! A declaration is written as a Python stub and parsed, or assembled
//! with [`FunctionDecl::builder`]:
//!
//! ```rust
//! use anydef::FunctionDecl;
//!
//! let decl = FunctionDecl::parse(
//!     r#"
//! def fibonacci(n: int) -> int:
//!     """Calculate the nth Fibonacci number."""
//! "#,
//! )
//! .unwrap();
//!
//! assert_eq!(decl.name(), "fibonacci");
//! assert_eq!(decl.signature(), "(n: int) -> int");
//! assert_eq!(decl.doc(), Some("Calculate the nth Fibonacci number."));
//! ```

use std::collections::HashSet;
use std::fmt;

use tree_sitter::{Node, Parser};

use crate::error::SignatureError;

const PYTHON_KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
    "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
    "while", "with", "yield",
];

/// Names starting with this prefix belong to the execution harness.
pub(crate) const RESERVED_PREFIX: &str = "__anydef";

/// How a parameter binds arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// An ordinary named parameter.
    Regular,
    /// `*args`.
    VarPositional,
    /// `**kwargs`.
    VarKeyword,
    /// A bare `*`: everything after it is keyword-only.
    KeywordOnlyMarker,
    /// A bare `/`: everything before it is positional-only.
    PositionalOnlyMarker,
}

/// One entry of a parameter list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    name: String,
    annotation: Option<String>,
    default: Option<String>,
    kind: ParamKind,
}

impl Param {
    /// A regular parameter with no annotation or default.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            annotation: None,
            default: None,
            kind: ParamKind::Regular,
        }
    }

    /// `*name`.
    pub fn var_positional(name: impl Into<String>) -> Self {
        Self {
            kind: ParamKind::VarPositional,
            ..Self::new(name)
        }
    }

    /// `**name`.
    pub fn var_keyword(name: impl Into<String>) -> Self {
        Self {
            kind: ParamKind::VarKeyword,
            ..Self::new(name)
        }
    }

    /// Bare `*`.
    pub fn keyword_only_marker() -> Self {
        Self {
            kind: ParamKind::KeywordOnlyMarker,
            ..Self::new("")
        }
    }

    /// Bare `/`.
    pub fn positional_only_marker() -> Self {
        Self {
            kind: ParamKind::PositionalOnlyMarker,
            ..Self::new("")
        }
    }

    /// Attach a type annotation (Python syntax, e.g. `list[int]`).
    pub fn annotated(mut self, annotation: impl Into<String>) -> Self {
        self.annotation = Some(annotation.into());
        self
    }

    /// Attach a default value (Python expression text).
    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn annotation(&self) -> Option<&str> {
        self.annotation.as_deref()
    }

    pub fn default_value(&self) -> Option<&str> {
        self.default.as_deref()
    }

    pub fn kind(&self) -> ParamKind {
        self.kind
    }

    fn is_marker(&self) -> bool {
        matches!(
            self.kind,
            ParamKind::KeywordOnlyMarker | ParamKind::PositionalOnlyMarker
        )
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ParamKind::KeywordOnlyMarker => return f.write_str("*"),
            ParamKind::PositionalOnlyMarker => return f.write_str("/"),
            ParamKind::VarPositional => f.write_str("*")?,
            ParamKind::VarKeyword => f.write_str("**")?,
            ParamKind::Regular => {}
        }
        f.write_str(&self.name)?;
        if let Some(annotation) = &self.annotation {
            write!(f, ": {annotation}")?;
        }
        // Same spacing as Python's own signature rendering.
        match (&self.default, &self.annotation) {
            (Some(default), Some(_)) => write!(f, " = {default}"),
            (Some(default), None) => write!(f, "={default}"),
            (None, _) => Ok(()),
        }
    }
}

/// A function known only by its name, signature, and contract.
///
/// Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDecl {
    name: String,
    params: Vec<Param>,
    returns: Option<String>,
    doc: Option<String>,
    scope: Option<String>,
}

impl FunctionDecl {
    /// Start building a declaration for `name`.
    pub fn builder(name: impl Into<String>) -> FunctionDeclBuilder {
        FunctionDeclBuilder {
            name: name.into(),
            params: Vec::new(),
            returns: None,
            doc: None,
            scope: None,
        }
    }

    /// Parse a Python declaration stub.
    ///
    /// The stub is a `def` (or `async def`) header, optionally followed
    /// by a docstring and a placeholder body. Statements before the
    /// header, decorators, and comments are ignored; the first function
    /// definition in the stub is the one declared.
    pub fn parse(stub: &str) -> Result<Self, SignatureError> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .map_err(|e| SignatureError::Malformed(format!("python grammar unavailable: {e}")))?;
        let tree = parser
            .parse(stub, None)
            .ok_or_else(|| SignatureError::Malformed("parser produced no tree".to_string()))?;

        let root = tree.root_node();
        if let Some(bad) = first_error(root) {
            return Err(SignatureError::Malformed(format!(
                "syntax error at line {}, column {}",
                bad.start_position().row + 1,
                bad.start_position().column + 1
            )));
        }
        let def = find_function(root).ok_or(SignatureError::MissingDefinition)?;

        let name = def
            .child_by_field_name("name")
            .ok_or(SignatureError::MissingDefinition)?;
        let mut builder = FunctionDecl::builder(text(stub, name));

        if let Some(parameters) = def.child_by_field_name("parameters") {
            let mut cursor = parameters.walk();
            for node in parameters.named_children(&mut cursor) {
                if let Some(param) = param_from(stub, node)? {
                    builder.params.push(param);
                }
            }
        }
        builder.returns = def
            .child_by_field_name("return_type")
            .map(|ret| text(stub, ret).to_string());
        builder.doc = def
            .child_by_field_name("body")
            .and_then(|body| docstring(stub, body));
        builder.build()
    }

    /// The function name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ordered parameter list, including `*` and `/` markers.
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Return annotation, if declared.
    pub fn returns(&self) -> Option<&str> {
        self.returns.as_deref()
    }

    /// The docstring contract, if any.
    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    /// The defining scope, if one was set.
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// Return a copy of this declaration qualified by `scope`.
    pub fn in_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Key under which the synthesized implementation is cached.
    ///
    /// Declarations with equal names collide unless they carry
    /// different scopes.
    pub fn identity(&self) -> String {
        match &self.scope {
            Some(scope) => format!("{scope}::{}", self.name),
            None => self.name.clone(),
        }
    }

    /// Python-style signature text, e.g. `(n: int) -> int`.
    pub fn signature(&self) -> String {
        let params = self
            .params
            .iter()
            .map(Param::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        match &self.returns {
            Some(returns) => format!("({params}) -> {returns}"),
            None => format!("({params})"),
        }
    }
}

impl fmt::Display for FunctionDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "def {}{}", self.name, self.signature())
    }
}

/// Builder for [`FunctionDecl`].
#[derive(Debug, Clone)]
pub struct FunctionDeclBuilder {
    name: String,
    params: Vec<Param>,
    returns: Option<String>,
    doc: Option<String>,
    scope: Option<String>,
}

impl FunctionDeclBuilder {
    /// Append a parameter.
    pub fn param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    /// Set the return annotation.
    pub fn returns(mut self, annotation: impl Into<String>) -> Self {
        self.returns = Some(annotation.into());
        self
    }

    /// Set the docstring contract.
    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        let doc = doc.into();
        self.doc = Some(doc.trim().to_string()).filter(|d| !d.is_empty());
        self
    }

    /// Qualify the declaration by its defining scope.
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Validate names and build the declaration.
    pub fn build(self) -> Result<FunctionDecl, SignatureError> {
        validate_identifier(&self.name)?;

        let mut seen = HashSet::new();
        for param in self.params.iter().filter(|p| !p.is_marker()) {
            validate_identifier(&param.name)?;
            if !seen.insert(param.name.as_str()) {
                return Err(SignatureError::DuplicateParameter(param.name.clone()));
            }
        }

        Ok(FunctionDecl {
            name: self.name,
            params: self.params,
            returns: self.returns,
            doc: self.doc,
            scope: self.scope,
        })
    }
}

/// Parse a declaration stub and scope it to the calling module.
///
/// ```rust
/// let decl = anydef::declare!("def is_prime(n: int) -> bool: ...").unwrap();
/// assert!(decl.identity().ends_with("::is_prime"));
/// ```
#[macro_export]
macro_rules! declare {
    ($stub:expr) => {
        $crate::FunctionDecl::parse($stub).map(|decl| decl.in_scope(module_path!()))
    };
}

pub(crate) fn validate_identifier(name: &str) -> Result<(), SignatureError> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
        && !PYTHON_KEYWORDS.contains(&name)
        && !name.starts_with(RESERVED_PREFIX);

    if valid {
        Ok(())
    } else {
        Err(SignatureError::InvalidIdentifier(name.to_string()))
    }
}

fn text<'a>(source: &'a str, node: Node<'_>) -> &'a str {
    &source[node.byte_range()]
}

fn named_children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    let children: Vec<Node<'t>> = node
        .named_children(&mut cursor)
        .filter(|child| child.kind() != "comment")
        .collect();
    children
}

/// The first error or missing node, in source order.
fn first_error(root: Node<'_>) -> Option<Node<'_>> {
    if !root.has_error() {
        return None;
    }
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            return Some(node);
        }
        let mut cursor = node.walk();
        let mut children: Vec<Node<'_>> = node
            .children(&mut cursor)
            .filter(|child| child.has_error() || child.is_missing())
            .collect();
        children.reverse();
        stack.extend(children);
    }
    Some(root)
}

/// The first top-level function definition, looking through decorators.
fn find_function(root: Node<'_>) -> Option<Node<'_>> {
    named_children(root).into_iter().find_map(|stmt| match stmt.kind() {
        "function_definition" => Some(stmt),
        "decorated_definition" => stmt
            .child_by_field_name("definition")
            .filter(|def| def.kind() == "function_definition"),
        _ => None,
    })
}

fn field_text(source: &str, node: Node<'_>, field: &str) -> Result<String, SignatureError> {
    node.child_by_field_name(field)
        .map(|child| text(source, child).to_string())
        .ok_or_else(|| {
            SignatureError::Malformed(format!("parameter `{}` has no {field}", text(source, node)))
        })
}

/// Convert one child of a `parameters` node; comments yield `None`.
fn param_from(source: &str, node: Node<'_>) -> Result<Option<Param>, SignatureError> {
    let param = match node.kind() {
        "comment" => return Ok(None),
        "identifier" => Param::new(text(source, node)),
        "keyword_separator" => Param::keyword_only_marker(),
        "positional_separator" => Param::positional_only_marker(),
        "list_splat_pattern" => Param::var_positional(splat_name(source, node)?),
        "dictionary_splat_pattern" => Param::var_keyword(splat_name(source, node)?),
        "typed_parameter" => {
            let inner = named_children(node)
                .into_iter()
                .next()
                .and_then(|inner| param_from(source, inner).transpose())
                .transpose()?
                .ok_or_else(|| {
                    SignatureError::Malformed(format!("parameter `{}` has no name", text(source, node)))
                })?;
            inner.annotated(field_text(source, node, "type")?)
        }
        "default_parameter" => {
            Param::new(field_text(source, node, "name")?).with_default(field_text(source, node, "value")?)
        }
        "typed_default_parameter" => Param::new(field_text(source, node, "name")?)
            .annotated(field_text(source, node, "type")?)
            .with_default(field_text(source, node, "value")?),
        other => {
            return Err(SignatureError::Malformed(format!(
                "unsupported parameter `{}` ({other})",
                text(source, node)
            )))
        }
    };
    Ok(Some(param))
}

fn splat_name(source: &str, node: Node<'_>) -> Result<String, SignatureError> {
    named_children(node)
        .into_iter()
        .find(|child| child.kind() == "identifier")
        .map(|ident| text(source, ident).to_string())
        .ok_or_else(|| SignatureError::Malformed(format!("unnamed `{}`", text(source, node))))
}

/// The contract text of a leading string-literal statement in `body`.
fn docstring(source: &str, body: Node<'_>) -> Option<String> {
    let first = named_children(body).into_iter().next()?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let string = named_children(first)
        .into_iter()
        .next()
        .filter(|node| node.kind() == "string")?;

    let mut cursor = string.walk();
    let parts: Vec<Node<'_>> = string.children(&mut cursor).collect();
    let open = parts.iter().find(|part| part.kind() == "string_start")?;
    let close = parts.iter().rev().find(|part| part.kind() == "string_end")?;
    let raw = source.get(open.end_byte()..close.start_byte())?;
    Some(clean_doc(raw)).filter(|doc| !doc.is_empty())
}

/// Strip the common indentation of all lines after the first.
fn clean_doc(raw: &str) -> String {
    let mut lines = raw.lines();
    let first = lines.next().unwrap_or("").trim().to_string();
    let rest: Vec<&str> = lines.collect();
    let indent = rest
        .iter()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0);

    let mut out = vec![first];
    out.extend(
        rest.iter()
            .map(|line| line.get(indent..).unwrap_or("").trim_end().to_string()),
    );
    out.join("\n").trim().to_string()
}
