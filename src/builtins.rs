use indexmap::IndexMap;

use crate::ast::{MathOp, Node, ValueType};
use crate::error::CompileError;
use crate::util::to_base36;

/// Builds a replacement node from the parsed call arguments.
pub type Expansion = fn(Vec<Node>, usize) -> Result<Node, CompileError>;

/// Accepted argument counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(&'static [usize]),
    AtLeast(usize),
    Any,
}

impl Arity {
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Exact(counts) => counts.contains(&count),
            Arity::AtLeast(min) => count >= min,
            Arity::Any => true,
        }
    }

    pub fn describe(self) -> String {
        match self {
            Arity::Exact(counts) => counts
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" or "),
            Arity::AtLeast(min) => format!("at least {min}"),
            Arity::Any => "any number".to_string(),
        }
    }
}

/// Built-in function: single source of truth for the source name, the target
/// rendering and the accepted arity. Parser, codegen and `tiadv builtins` all
/// read from this.
#[derive(Debug, Clone)]
pub struct BuiltinFn {
    pub name: &'static str,
    pub target: &'static str,
    pub parens: bool,
    pub arity: Arity,
    pub ret: Option<ValueType>,
    pub expand: Option<Expansion>,
    pub category: &'static str,
    pub description: &'static str,
}

const fn plain(
    name: &'static str,
    target: &'static str,
    parens: bool,
    arity: Arity,
    category: &'static str,
    description: &'static str,
) -> BuiltinFn {
    BuiltinFn {
        name,
        target,
        parens,
        arity,
        ret: None,
        expand: None,
        category,
        description,
    }
}

const fn typed(f: BuiltinFn, ret: ValueType) -> BuiltinFn {
    BuiltinFn { ret: Some(ret), ..f }
}

const fn custom(
    name: &'static str,
    expand: Expansion,
    category: &'static str,
    description: &'static str,
) -> BuiltinFn {
    BuiltinFn {
        name,
        target: "",
        parens: false,
        arity: Arity::Any,
        ret: None,
        expand: Some(expand),
        category,
        description,
    }
}

/// All built-in functions, keyed by lowercase source name.
pub static BUILTINS: &[BuiltinFn] = &[
    // ── Flow control ────────────────────────────────────────────
    plain("pause", "Pause", false, Arity::Exact(&[0, 1]), "flow", "Wait for enter, optionally showing a value"),
    plain("goto", "Goto", false, Arity::Exact(&[1]), "flow", "Jump to a label"),
    plain("label", "Lbl", false, Arity::Exact(&[1]), "flow", "Define a label"),
    plain("menu", "Menu", true, Arity::Exact(&[3, 5, 7, 9, 11, 13, 15]), "flow", "Title followed by text/label pairs"),
    plain("exit", "Stop", false, Arity::Exact(&[0]), "flow", "Stop the program"),
    plain("die", "Stop", false, Arity::Exact(&[0]), "flow", "Stop the program"),
    plain("setgraphstyle", "GraphStyle", true, Arity::Exact(&[1]), "flow", "Set graph style"),
    // ── In/Output ───────────────────────────────────────────────
    plain("disp", "Disp", false, Arity::Any, "io", "Display values"),
    plain("echo", "Disp", false, Arity::Any, "io", "Display values"),
    plain("print", "Disp", false, Arity::Any, "io", "Display values"),
    plain("clrhome", "ClrHome", false, Arity::Exact(&[0]), "io", "Clear the home screen"),
    plain("clrscreen", "ClrHome:ClrDraw", false, Arity::Exact(&[0]), "io", "Clear home and graph screens"),
    plain("output", "Output", true, Arity::Exact(&[3]), "io", "Write at row, column"),
    plain("getkey", "getKey", false, Arity::Exact(&[0]), "io", "Last key pressed"),
    plain("prompt", "Prompt", false, Arity::Any, "io", "Ask for values"),
    // ── Drawing ─────────────────────────────────────────────────
    plain("draw_line", "Line", true, Arity::Exact(&[4, 5]), "draw", "Line between two points"),
    plain("clrdraw", "ClrDraw", false, Arity::Exact(&[0]), "draw", "Clear the graph screen"),
    plain("text", "Text", true, Arity::AtLeast(3), "draw", "Draw text at row, column"),
    plain("circle", "Circle", true, Arity::Exact(&[3]), "draw", "Circle from center and radius"),
    plain("shade", "Shade", true, Arity::Exact(&[2, 3, 4, 5, 6]), "draw", "Shade between functions"),
    // ── Points ──────────────────────────────────────────────────
    plain("pton", "Pt-On", true, Arity::Exact(&[2, 3]), "draw", "Turn a point on"),
    plain("pt_on", "Pt-On", true, Arity::Exact(&[2, 3]), "draw", "Turn a point on"),
    plain("ptoff", "Pt-Off", true, Arity::Exact(&[2, 3]), "draw", "Turn a point off"),
    plain("pt_off", "Pt-Off", true, Arity::Exact(&[2, 3]), "draw", "Turn a point off"),
    plain("ptchange", "Pt-Change", true, Arity::Exact(&[2]), "draw", "Toggle a point"),
    plain("pt_change", "Pt-Change", true, Arity::Exact(&[2]), "draw", "Toggle a point"),
    plain("pttoggle", "Pt-Change", true, Arity::Exact(&[2]), "draw", "Toggle a point"),
    plain("pt_toggle", "Pt-Change", true, Arity::Exact(&[2]), "draw", "Toggle a point"),
    // ── Pixels ──────────────────────────────────────────────────
    plain("pxlon", "Pxl-On", true, Arity::Exact(&[2]), "draw", "Turn a pixel on"),
    plain("pxl_on", "Pxl-On", true, Arity::Exact(&[2]), "draw", "Turn a pixel on"),
    plain("pxloff", "Pxl-Off", true, Arity::Exact(&[2]), "draw", "Turn a pixel off"),
    plain("pxl_off", "Pxl-Off", true, Arity::Exact(&[2]), "draw", "Turn a pixel off"),
    plain("pxlchange", "Pxl-Change", true, Arity::Exact(&[2]), "draw", "Toggle a pixel"),
    plain("pxl_change", "Pxl-Change", true, Arity::Exact(&[2]), "draw", "Toggle a pixel"),
    plain("pxltoggle", "Pxl-Change", true, Arity::Exact(&[2]), "draw", "Toggle a pixel"),
    plain("pxl_toggle", "Pxl-Change", true, Arity::Exact(&[2]), "draw", "Toggle a pixel"),
    plain("pxltest", "pxl-Test", true, Arity::Exact(&[2]), "draw", "1 if the pixel is on"),
    // ── Math ────────────────────────────────────────────────────
    plain("abs", "abs", true, Arity::Exact(&[1]), "math", "Absolute value"),
    plain("round", "round", true, Arity::Exact(&[1, 2]), "math", "Round, optionally to n digits"),
    plain("rand_int", "randInt", true, Arity::Exact(&[2]), "math", "Random integer in [min, max]"),
    plain("random", "rand", false, Arity::Exact(&[0]), "math", "Random number in [0, 1)"),
    // ── Timing ──────────────────────────────────────────────────
    plain("gettime", "getTime", false, Arity::Exact(&[0]), "time", "Clock time"),
    // ── Arrays ──────────────────────────────────────────────────
    typed(plain("array_sum", "sum", true, Arity::Exact(&[1]), "array", "Sum of elements"), ValueType::Number),
    typed(plain("array_count", "dim", true, Arity::Exact(&[1]), "array", "Number of elements"), ValueType::Number),
    typed(plain("array_length", "dim", true, Arity::Exact(&[1]), "array", "Number of elements"), ValueType::Number),
    // ── Strings ─────────────────────────────────────────────────
    typed(plain("str_length", "length", true, Arity::Exact(&[1]), "string", "Length of a string"), ValueType::Number),
    typed(plain("str_sub", "sub", true, Arity::Exact(&[2, 3]), "string", "Substring"), ValueType::String),
    // ── Bools ───────────────────────────────────────────────────
    typed(plain("not", "not", true, Arity::Exact(&[1]), "bool", "Logical not"), ValueType::Boolean),
    // ── Expansions ──────────────────────────────────────────────
    custom("draw_path", draw_path, "draw", "Lines through x,y pairs"),
    custom("draw_shape", draw_shape, "draw", "Closed polygon through x,y pairs"),
    custom("rand", rand_between, "math", "Random number in [min, max), defaults 0 and 1"),
    custom("do", do_line, "flow", "Run statements on one line"),
];

pub fn lookup_builtin(name: &str) -> Option<&'static BuiltinFn> {
    BUILTINS.iter().find(|b| b.name.eq_ignore_ascii_case(name))
}

// ── Expansions ─────────────────────────────────────────────────────

fn draw_path(path: Vec<Node>, line: usize) -> Result<Node, CompileError> {
    let segments = (0..path.len().saturating_sub(2))
        .step_by(2)
        .map(|i| {
            let end = (i + 4).min(path.len());
            Node::call("draw_line", path[i..end].to_vec(), line)
        })
        .collect();
    Ok(Node::Line(segments))
}

fn draw_shape(path: Vec<Node>, line: usize) -> Result<Node, CompileError> {
    let tail = path.len().saturating_sub(2);
    let mut closing: Vec<Node> = path[tail..].to_vec();
    closing.extend(path.iter().take(2).cloned());
    Ok(Node::Line(vec![
        Node::call("draw_path", path, line),
        Node::call("draw_line", closing, line),
    ]))
}

fn rand_between(extremes: Vec<Node>, line: usize) -> Result<Node, CompileError> {
    let mut extremes = extremes.into_iter();
    let min = extremes.next().unwrap_or_else(|| Node::number(0.0));
    let max = extremes.next().unwrap_or_else(|| Node::number(1.0));
    let span = Node::op(max, MathOp::Sub, min.clone());
    Ok(Node::op(
        min,
        MathOp::Add,
        Node::op(Node::call("random", Vec::new(), line), MathOp::Mul, span),
    ))
}

fn do_line(statements: Vec<Node>, _line: usize) -> Result<Node, CompileError> {
    Ok(Node::Line(statements))
}

// ── Per-compile function table ─────────────────────────────────────

/// A function defined in source.
#[derive(Debug, Clone, PartialEq)]
pub struct UserFn {
    pub id: usize,
    pub inline: bool,
    pub params: Vec<String>,
    /// Parameters without a default.
    pub required: usize,
    pub body: Option<Node>,
}

impl UserFn {
    /// Name of the list holding call arguments, e.g. `ARG0`.
    pub fn args_slot(&self) -> String {
        format!("ARG{}", to_base36(self.id))
    }

    pub fn accepts(&self, count: usize) -> bool {
        (self.required..=self.params.len()).contains(&count)
    }

    pub fn describe_arity(&self) -> String {
        if self.required == self.params.len() {
            self.required.to_string()
        } else {
            format!("{} to {}", self.required, self.params.len())
        }
    }
}

#[derive(Debug, Clone)]
pub enum FunctionEntry {
    Builtin(BuiltinFn),
    User(UserFn),
}

/// Builtins plus the functions defined by the program being compiled.
/// Created fresh for every compilation.
#[derive(Debug, Clone)]
pub struct FunctionTable {
    entries: IndexMap<String, FunctionEntry>,
    next_id: usize,
}

impl Default for FunctionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionTable {
    pub fn new() -> Self {
        let entries = BUILTINS
            .iter()
            .map(|b| (b.name.to_string(), FunctionEntry::Builtin(b.clone())))
            .collect();
        Self { entries, next_id: 0 }
    }

    pub fn get(&self, name: &str) -> Option<&FunctionEntry> {
        self.entries.get(&name.to_ascii_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn user(&self, name: &str) -> Option<&UserFn> {
        match self.get(name) {
            Some(FunctionEntry::User(f)) => Some(f),
            _ => None,
        }
    }

    /// Register a user function name, shadowing any builtin. Returns its id;
    /// declaring the same name again keeps the first id.
    pub fn declare(&mut self, name: &str, inline: bool) -> usize {
        let key = name.to_ascii_lowercase();
        if let Some(FunctionEntry::User(existing)) = self.entries.get(&key) {
            return existing.id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(
            key,
            FunctionEntry::User(UserFn {
                id,
                inline,
                params: Vec::new(),
                required: 0,
                body: None,
            }),
        );
        id
    }

    /// Attach parameters and body to a declared function.
    pub fn define(&mut self, name: &str, inline: bool, params: Vec<String>, required: usize, body: Node) -> usize {
        let id = self.declare(name, inline);
        if let Some(FunctionEntry::User(f)) = self.entries.get_mut(&name.to_ascii_lowercase()) {
            f.inline = inline;
            f.params = params;
            f.required = required;
            f.body = Some(body);
        }
        id
    }

    pub fn return_type(&self, name: &str) -> ValueType {
        match self.get(name) {
            Some(FunctionEntry::Builtin(BuiltinFn { ret: Some(ret), .. })) => *ret,
            Some(FunctionEntry::User(_)) => ValueType::Number,
            _ => {
                let lower = name.to_ascii_lowercase();
                if lower.starts_with("str_") {
                    ValueType::String
                } else if lower.starts_with("array_") {
                    ValueType::Array
                } else {
                    ValueType::Number
                }
            }
        }
    }

    pub fn builtins(&self) -> impl Iterator<Item = &BuiltinFn> {
        self.entries.values().filter_map(|entry| match entry {
            FunctionEntry::Builtin(b) => Some(b),
            FunctionEntry::User(_) => None,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(lookup_builtin("DISP").unwrap().target, "Disp");
        assert_eq!(lookup_builtin("Rand_Int").unwrap().target, "randInt");
        assert!(lookup_builtin("nope").is_none());
    }

    #[test]
    fn builtin_names_are_unique_and_lowercase() {
        let mut seen = std::collections::HashSet::new();
        for b in BUILTINS {
            assert_eq!(b.name, b.name.to_ascii_lowercase());
            assert!(seen.insert(b.name), "duplicate builtin {}", b.name);
            assert!(b.expand.is_some() || !b.target.is_empty());
        }
    }

    #[test]
    fn arity_sets() {
        let menu = lookup_builtin("menu").unwrap().arity;
        assert!(menu.accepts(5));
        assert!(!menu.accepts(4));
        assert_eq!(Arity::Exact(&[1, 2]).describe(), "1 or 2");
        assert!(lookup_builtin("text").unwrap().arity.accepts(7));
        assert!(lookup_builtin("print").unwrap().arity.accepts(0));
    }

    #[test]
    fn draw_path_pairs_points() {
        let path: Vec<Node> = (0..6).map(|n| Node::number(f64::from(n))).collect();
        let Node::Line(segments) = draw_path(path, 1).unwrap() else {
            unreachable!()
        };
        assert_eq!(segments.len(), 2);
        let Node::Call { name, args, .. } = &segments[1] else {
            unreachable!()
        };
        assert_eq!(name, "draw_line");
        assert_eq!(args[0], Node::number(2.0));
        assert_eq!(args.len(), 4);
    }

    #[test]
    fn draw_shape_closes_the_path() {
        let path: Vec<Node> = (0..6).map(|n| Node::number(f64::from(n))).collect();
        let Node::Line(parts) = draw_shape(path, 1).unwrap() else {
            unreachable!()
        };
        let Node::Call { args, .. } = &parts[1] else {
            unreachable!()
        };
        let expected: Vec<Node> = [4.0, 5.0, 0.0, 1.0].into_iter().map(Node::number).collect();
        assert_eq!(args, &expected);
    }

    #[test]
    fn user_functions_shadow_builtins_per_table() {
        let mut table = FunctionTable::new();
        assert_eq!(table.declare("print", false), 0);
        assert_eq!(table.declare("area", false), 1);
        assert_eq!(table.declare("PRINT", false), 0);
        assert!(table.user("print").is_some());
        assert_eq!(table.user("area").unwrap().args_slot(), "ARG1");
        assert!(matches!(FunctionTable::new().get("print"), Some(FunctionEntry::Builtin(_))));
    }

    #[test]
    fn return_types() {
        let table = FunctionTable::new();
        assert_eq!(table.return_type("not"), ValueType::Boolean);
        assert_eq!(table.return_type("str_length"), ValueType::Number);
        assert_eq!(table.return_type("str_upper"), ValueType::String);
        assert_eq!(table.return_type("array_sorted"), ValueType::Array);
        assert_eq!(table.return_type("abs"), ValueType::Number);
    }
}
