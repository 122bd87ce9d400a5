use serde::Serialize;

use crate::context::Context;

/// Static shape of an expression, used only for code-shape decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Number,
    String,
    Boolean,
    Array,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    Bool(bool),
    Str(String),
    Array(Vec<Node>),
}

// ── Operators ──────────────────────────────────────────────────────

/// Precedence of atoms (values, calls, `remainder(`).
pub const ATOM: u8 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl MathOp {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "+" => MathOp::Add,
            "-" => MathOp::Sub,
            "*" => MathOp::Mul,
            "/" => MathOp::Div,
            "%" => MathOp::Mod,
            "^" => MathOp::Pow,
            _ => return None,
        })
    }

    pub fn symbol(self) -> &'static str {
        match self {
            MathOp::Add => "+",
            MathOp::Sub => "-",
            MathOp::Mul => "*",
            MathOp::Div => "/",
            MathOp::Mod => "%",
            MathOp::Pow => "^",
        }
    }

    pub fn precedence(self) -> u8 {
        match self {
            MathOp::Add | MathOp::Sub => 3,
            MathOp::Mul | MathOp::Div | MathOp::Mod => 4,
            MathOp::Pow => 5,
        }
    }

    /// `a op (b op c) == (a op b) op c`
    pub fn is_associative(self) -> bool {
        matches!(self, MathOp::Add | MathOp::Mul)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
}

impl CompareOp {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "==" => CompareOp::Eq,
            "!=" => CompareOp::Ne,
            "<" => CompareOp::Lt,
            ">" => CompareOp::Gt,
            "<=" => CompareOp::Le,
            ">=" => CompareOp::Ge,
            "&&" => CompareOp::And,
            "||" => CompareOp::Or,
            _ => return None,
        })
    }

    /// Rendered target text.
    pub fn sign(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "≠",
            CompareOp::Lt => "<",
            CompareOp::Gt => ">",
            CompareOp::Le => "≤",
            CompareOp::Ge => "≥",
            CompareOp::And => " and ",
            CompareOp::Or => " or ",
        }
    }

    /// Logical complement, when the target has one.
    pub fn negate(self) -> Option<Self> {
        match self {
            CompareOp::Eq => Some(CompareOp::Ne),
            CompareOp::Ne => Some(CompareOp::Eq),
            CompareOp::Lt => Some(CompareOp::Ge),
            CompareOp::Ge => Some(CompareOp::Lt),
            CompareOp::Gt => Some(CompareOp::Le),
            CompareOp::Le => Some(CompareOp::Gt),
            CompareOp::And | CompareOp::Or => None,
        }
    }

    pub fn precedence(self) -> u8 {
        match self {
            CompareOp::Or => 0,
            CompareOp::And => 1,
            _ => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Compound(MathOp),
}

impl AssignOp {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        if symbol == "=" {
            return Some(AssignOp::Set);
        }
        let op = symbol.strip_suffix('=')?;
        MathOp::from_symbol(op).map(AssignOp::Compound)
    }
}

// ── Nodes ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Range {
    pub start: Box<Node>,
    pub end: Box<Node>,
    pub step: Box<Node>,
    pub inclusive: bool,
    /// Rendered as its own list literal rather than inside one.
    pub standalone: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Literal.
    Value(Literal),
    /// Named variable; the key into the context's variable registry.
    Variable(String),
    /// Named list slot.
    List(String),
    /// Named string slot.
    StringVar(String),
    /// Comma-joined values, the body of a list literal.
    Commas(Vec<Node>),
    Range(Range),
    Assign {
        target: Box<Node>,
        op: AssignOp,
        value: Box<Node>,
        line: usize,
    },
    Access {
        list: Box<Node>,
        index: Box<Node>,
    },
    Block(Vec<Node>),
    Op {
        lhs: Box<Node>,
        op: MathOp,
        rhs: Box<Node>,
    },
    Compare {
        lhs: Box<Node>,
        op: CompareOp,
        rhs: Box<Node>,
    },
    Call {
        name: String,
        args: Vec<Node>,
        line: usize,
    },
    /// Membership test.
    In {
        value: Box<Node>,
        list: Box<Node>,
    },
    If {
        condition: Box<Node>,
        then: Box<Node>,
        otherwise: Option<Box<Node>>,
    },
    For {
        variable: Box<Node>,
        list: Box<Node>,
        body: Box<Node>,
    },
    While {
        condition: Box<Node>,
        body: Box<Node>,
        until: bool,
    },
    FnDef {
        name: String,
        params: Vec<String>,
        body: Box<Node>,
        inline: bool,
    },
    /// Target text passed through untouched.
    Native(String),
    /// Statements joined on one `:`-separated line.
    Line(Vec<Node>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Value,
    Variable,
    List,
    StringVar,
    Commas,
    Range,
    Assign,
    Access,
    Block,
    Op,
    Compare,
    Call,
    In,
    If,
    For,
    While,
    FnDef,
    Native,
    Line,
}

/// Marker ending a function body; dropped when inlining.
pub const RETURN: &str = "Return";

impl Node {
    pub fn number(value: f64) -> Self {
        Node::Value(Literal::Number(value))
    }

    pub fn op(lhs: Node, op: MathOp, rhs: Node) -> Self {
        Node::Op {
            lhs: Box::new(lhs),
            op,
            rhs: Box::new(rhs),
        }
    }

    pub fn compare(lhs: Node, op: CompareOp, rhs: Node) -> Self {
        Node::Compare {
            lhs: Box::new(lhs),
            op,
            rhs: Box::new(rhs),
        }
    }

    pub fn call(name: &str, args: Vec<Node>, line: usize) -> Self {
        Node::Call {
            name: name.to_ascii_lowercase(),
            args,
            line,
        }
    }

    pub fn assign(target: Node, value: Node, line: usize) -> Self {
        Node::Assign {
            target: Box::new(target),
            op: AssignOp::Set,
            value: Box::new(value),
            line,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Value(_) => NodeKind::Value,
            Node::Variable(_) => NodeKind::Variable,
            Node::List(_) => NodeKind::List,
            Node::StringVar(_) => NodeKind::StringVar,
            Node::Commas(_) => NodeKind::Commas,
            Node::Range(_) => NodeKind::Range,
            Node::Assign { .. } => NodeKind::Assign,
            Node::Access { .. } => NodeKind::Access,
            Node::Block(_) => NodeKind::Block,
            Node::Op { .. } => NodeKind::Op,
            Node::Compare { .. } => NodeKind::Compare,
            Node::Call { .. } => NodeKind::Call,
            Node::In { .. } => NodeKind::In,
            Node::If { .. } => NodeKind::If,
            Node::For { .. } => NodeKind::For,
            Node::While { .. } => NodeKind::While,
            Node::FnDef { .. } => NodeKind::FnDef,
            Node::Native(_) => NodeKind::Native,
            Node::Line(_) => NodeKind::Line,
        }
    }

    /// Direct children, in source order.
    pub fn children(&self) -> Vec<&Node> {
        match self {
            Node::Value(Literal::Array(items)) => items.iter().collect(),
            Node::Value(_)
            | Node::Variable(_)
            | Node::List(_)
            | Node::StringVar(_)
            | Node::Native(_) => Vec::new(),
            Node::Commas(items) | Node::Block(items) | Node::Line(items) => items.iter().collect(),
            Node::Call { args, .. } => args.iter().collect(),
            Node::Range(range) => vec![&*range.start, &*range.end, &*range.step],
            Node::Assign { target, value, .. } => vec![&**target, &**value],
            Node::Access { list, index } => vec![&**list, &**index],
            Node::Op { lhs, rhs, .. } | Node::Compare { lhs, rhs, .. } => vec![&**lhs, &**rhs],
            Node::In { value, list } => vec![&**value, &**list],
            Node::If { condition, then, otherwise } => {
                let mut out = vec![&**condition, &**then];
                out.extend(otherwise.as_deref());
                out
            }
            Node::For { variable, list, body } => vec![&**variable, &**list, &**body],
            Node::While { condition, body, .. } => vec![&**condition, &**body],
            Node::FnDef { body, .. } => vec![&**body],
        }
    }

    /// Whether any descendant of `kind` satisfies `pred`.
    pub fn contains(&self, kind: NodeKind, pred: &dyn Fn(&Node) -> bool) -> bool {
        self.children()
            .into_iter()
            .any(|child| (child.kind() == kind && pred(child)) || child.contains(kind, pred))
    }

    /// Every leaf is a literal.
    pub fn is_simple(&self) -> bool {
        match self {
            Node::Value(_) => true,
            Node::Op { lhs, rhs, .. } | Node::Compare { lhs, rhs, .. } => {
                lhs.is_simple() && rhs.is_simple()
            }
            Node::Range(range) => {
                range.start.is_simple() && range.end.is_simple() && range.step.is_simple()
            }
            _ => false,
        }
    }

    pub fn ty(&self, ctx: &Context) -> ValueType {
        match self {
            Node::Value(Literal::Number(_)) => ValueType::Number,
            Node::Value(Literal::Bool(_)) => ValueType::Boolean,
            Node::Value(Literal::Str(_)) | Node::StringVar(_) => ValueType::String,
            Node::Value(Literal::Array(_)) | Node::List(_) | Node::Commas(_) | Node::Range(_) => {
                ValueType::Array
            }
            Node::Variable(name) => ctx.variable_type(name),
            Node::Op { lhs, rhs, .. } => {
                let types = [lhs.ty(ctx), rhs.ty(ctx)];
                if types.contains(&ValueType::Array) {
                    ValueType::Array
                } else if types.contains(&ValueType::String) {
                    ValueType::String
                } else {
                    ValueType::Number
                }
            }
            Node::Compare { lhs, rhs, .. } => {
                if lhs.ty(ctx) == ValueType::Array || rhs.ty(ctx) == ValueType::Array {
                    ValueType::Array
                } else {
                    ValueType::Boolean
                }
            }
            Node::Call { name, .. } => ctx.functions().return_type(name),
            Node::Access { .. }
            | Node::In { .. }
            | Node::Assign { .. }
            | Node::Block(_)
            | Node::If { .. }
            | Node::For { .. }
            | Node::While { .. }
            | Node::FnDef { .. }
            | Node::Native(_)
            | Node::Line(_) => ValueType::Number,
        }
    }

    /// Number of statements when used as a body.
    pub fn statement_count(&self) -> usize {
        match self {
            Node::Block(rules) => rules.len(),
            _ => 1,
        }
    }

    /// Logical complement of a condition.
    pub fn negate(self) -> Node {
        match self {
            Node::Compare { lhs, op, rhs } => match op.negate() {
                Some(flipped) => Node::Compare { lhs, op: flipped, rhs },
                None => Node::call("not", vec![Node::Compare { lhs, op, rhs }], 0),
            },
            other => Node::call("not", vec![other], 0),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn var(name: &str) -> Node {
        Node::Variable(name.to_string())
    }

    #[test]
    fn simple_means_all_literal_leaves() {
        let folded = Node::op(Node::number(2.0), MathOp::Add, Node::number(3.0));
        assert!(folded.is_simple());
        let residual = Node::op(var("a"), MathOp::Add, Node::number(3.0));
        assert!(!residual.is_simple());
    }

    #[test]
    fn negate_swaps_comparisons() {
        let cmp = Node::compare(var("a"), CompareOp::Lt, Node::number(3.0));
        assert_eq!(cmp.negate(), Node::compare(var("a"), CompareOp::Ge, Node::number(3.0)));
    }

    #[test]
    fn negate_wraps_other_conditions() {
        let and = Node::compare(var("a"), CompareOp::And, var("b"));
        let Node::Call { name, args, .. } = and.clone().negate() else {
            unreachable!()
        };
        assert_eq!(name, "not");
        assert_eq!(args, vec![and]);
    }

    #[test]
    fn contains_searches_descendants_only() {
        let inner = Node::If {
            condition: Box::new(var("a")),
            then: Box::new(Node::Block(vec![Node::call("clrhome", vec![], 1)])),
            otherwise: None,
        };
        let body = Node::Block(vec![Node::Block(vec![inner.clone()])]);
        assert!(body.contains(NodeKind::If, &|_| true));
        assert!(!body.contains(NodeKind::If, &|n| matches!(n, Node::If { otherwise: Some(_), .. })));
        assert!(!inner.contains(NodeKind::If, &|_| true));
    }

    #[test]
    fn assign_ops_from_symbols() {
        assert_eq!(AssignOp::from_symbol("="), Some(AssignOp::Set));
        assert_eq!(AssignOp::from_symbol("^="), Some(AssignOp::Compound(MathOp::Pow)));
        assert_eq!(AssignOp::from_symbol("=="), None);
    }

    #[test]
    fn types_follow_operands() {
        let ctx = Context::new();
        let list = Node::Value(Literal::Array(vec![Node::number(1.0)]));
        assert_eq!(Node::op(list.clone(), MathOp::Add, Node::number(1.0)).ty(&ctx), ValueType::Array);
        assert_eq!(Node::compare(var("a"), CompareOp::Eq, list).ty(&ctx), ValueType::Array);
        assert_eq!(Node::compare(var("a"), CompareOp::Eq, var("b")).ty(&ctx), ValueType::Boolean);
        assert_eq!(Node::call("str_sub", vec![], 1).ty(&ctx), ValueType::String);
        assert_eq!(Node::call("array_sum", vec![], 1).ty(&ctx), ValueType::Number);
    }
}
