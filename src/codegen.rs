use tracing::debug;

use crate::ast::*;
use crate::builtins::{FunctionEntry, UserFn};
use crate::context::{Context, Slot, FUNCTION_SELECTOR, OVERFLOW_LIST};
use crate::error::CompileError;
use crate::optimize::{self, format_number};
use crate::options::Options;

/// Render the root block as target source.
pub fn generate(ast: &Node, ctx: &mut Context, options: &Options) -> Result<String, CompileError> {
    let mut codegen = Codegen::new(ctx, options);
    let code = match ast {
        Node::Block(rules) => codegen.program(rules)?,
        other => codegen.compile(other)?,
    };
    Ok(code.trim_matches('\n').to_string())
}

/// Tree-walking emitter. Every node renders to a string; blocks join their
/// statements with newlines.
pub struct Codegen<'a> {
    ctx: &'a mut Context,
    modern: bool,
    fold: bool,
    program: String,
    /// Inline functions currently being expanded, innermost last.
    inlining: Vec<String>,
}

impl<'a> Codegen<'a> {
    pub fn new(ctx: &'a mut Context, options: &Options) -> Self {
        Self {
            ctx,
            modern: options.modern,
            fold: options.simplify,
            program: options.program_name.clone(),
            inlining: Vec::new(),
        }
    }

    pub fn compile(&mut self, node: &Node) -> Result<String, CompileError> {
        match node {
            Node::Value(literal) => self.literal(literal),
            Node::Variable(name) => self.variable(name),
            Node::List(name) => Ok(format!("∟{}", self.ctx.list_name(name))),
            Node::StringVar(name) => self.ctx.string_slot(name).ok_or_else(|| {
                CompileError::compiler(
                    format!("out of string variables for `{name}` (the target has ten)"),
                    None,
                )
            }),
            Node::Commas(items) => Ok(self.compile_all(items)?.join(",")),
            Node::Range(range) => self.range(range),
            Node::Assign {
                target,
                op,
                value,
                line,
            } => self.assign(target, *op, value, *line),
            Node::Access { list, index } => {
                let list = self.compile(list)?;
                let index = self.compile(index)?;
                Ok(format!("{list}({index})"))
            }
            Node::Block(rules) => {
                let parts = self.compile_all(rules)?;
                Ok(collapse_lines(&parts.join("\n")))
            }
            Node::Op { .. } | Node::Compare { .. } => {
                let simplified = self.simplify(node)?;
                self.render(&simplified)
            }
            Node::Call { name, args, line } => self.call(name, args, *line),
            Node::In { value, list } => {
                let hits = Node::compare((**value).clone(), CompareOp::Eq, (**list).clone());
                self.compile(&Node::call("array_sum", vec![hits], 0))
            }
            Node::If {
                condition,
                then,
                otherwise,
            } => self.branch(condition, then, otherwise.as_deref()),
            Node::For {
                variable,
                list,
                body,
            } => self.for_loop(variable, list, body),
            Node::While {
                condition,
                body,
                until,
            } => {
                let condition = self.compile(condition)?;
                let body = self.compile(body)?;
                let keyword = if *until { "Repeat" } else { "While" };
                Ok(format!("{keyword} {condition}\n{body}\nEnd"))
            }
            Node::FnDef {
                name,
                params,
                body,
                inline,
            } => self.function(name, params, body, *inline),
            Node::Native(code) if code == RETURN && !self.inlining.is_empty() => Ok(String::new()),
            Node::Native(code) => Ok(code.clone()),
            Node::Line(items) => {
                let mut parts = Vec::new();
                for item in items {
                    parts.push(trim_parens(&self.compile(item)?).to_string());
                }
                Ok(parts.join(":").trim_end_matches('"').to_string())
            }
        }
    }

    /// Lay out the root block. User function calls re-enter the program at
    /// its top, so function sections are placed first, followed by a
    /// selector reset and then the main body. Rules still compile in source
    /// order so variable types are inferred the same way.
    fn program(&mut self, rules: &[Node]) -> Result<String, CompileError> {
        let mut sections = Vec::new();
        let mut body = Vec::new();
        for rule in rules {
            let code = self.compile(rule)?;
            if matches!(rule, Node::FnDef { inline: false, .. }) {
                sections.push(code);
            } else {
                body.push(code);
            }
        }
        if !sections.is_empty() {
            sections.push(self.selector_reset()?);
        }
        sections.extend(body);
        Ok(collapse_lines(&sections.join("\n")))
    }

    fn compile_all(&mut self, nodes: &[Node]) -> Result<Vec<String>, CompileError> {
        let mut out = Vec::with_capacity(nodes.len());
        for node in nodes {
            out.push(self.compile(node)?);
        }
        Ok(out)
    }

    // ── Folding ────────────────────────────────────────────────────

    /// Fold a constant `Op`/`Compare` when the literal renders no longer
    /// than the expression. Other nodes come back unchanged.
    pub fn simplify(&mut self, node: &Node) -> Result<Node, CompileError> {
        if !self.fold || !matches!(node, Node::Op { .. } | Node::Compare { .. }) || !node.is_simple() {
            return Ok(node.clone());
        }
        match optimize::evaluate(node) {
            Ok(Some(literal)) => {
                let folded = Node::Value(literal);
                let before = self.unfolded(node)?.chars().count();
                let after = self.compile(&folded)?.chars().count();
                if after <= before {
                    return Ok(folded);
                }
            }
            Ok(None) => {}
            Err(reason) => {
                // Report only the innermost failing subtree
                let children_fold = node
                    .children()
                    .into_iter()
                    .all(|child| optimize::evaluate(child).is_ok());
                if children_fold {
                    let text = self.unfolded(node)?;
                    self.ctx.warn(format!("left `{text}` unfolded: {reason}"), None);
                }
            }
        }
        Ok(node.clone())
    }

    fn unfolded(&mut self, node: &Node) -> Result<String, CompileError> {
        let fold = std::mem::replace(&mut self.fold, false);
        let text = self.compile(node);
        self.fold = fold;
        text
    }

    /// Render a node that has already been through `simplify`.
    fn render(&mut self, node: &Node) -> Result<String, CompileError> {
        match node {
            Node::Op { lhs, op, rhs } => self.math(lhs, *op, rhs),
            Node::Compare { lhs, op, rhs } => self.comparison(lhs, *op, rhs),
            other => self.compile(other),
        }
    }

    // ── Expressions ────────────────────────────────────────────────

    fn literal(&mut self, literal: &Literal) -> Result<String, CompileError> {
        match literal {
            Literal::Number(n) => Ok(format_number(*n)),
            Literal::Bool(b) => Ok(if *b { "1" } else { "0" }.to_string()),
            Literal::Str(s) => Ok(format!("\"{s}\"")),
            Literal::Array(items) => {
                if let [Node::Range(range)] = items.as_slice() {
                    return self.range(&Range {
                        standalone: true,
                        ..range.clone()
                    });
                }
                let mut parts = Vec::with_capacity(items.len());
                for item in items {
                    if let Node::Range(range) = item {
                        if let Ok(None) | Err(_) = optimize::range_values(range) {
                            return Err(CompileError::compiler(
                                "a range inside a list literal must have constant bounds",
                                None,
                            ));
                        }
                    }
                    parts.push(self.compile(item)?);
                }
                Ok(format!("{{{}}}", parts.join(",")))
            }
        }
    }

    fn variable(&mut self, name: &str) -> Result<String, CompileError> {
        match self.ctx.variable_type(name) {
            ValueType::Array => self.compile(&Node::List(name.to_string())),
            ValueType::String => self.compile(&Node::StringVar(name.to_string())),
            ValueType::Number | ValueType::Boolean => Ok(match self.ctx.slot(name) {
                Slot::Letter(letter) => letter.to_string(),
                Slot::Overflow(index) => {
                    format!("∟{}({index})", self.ctx.list_name(OVERFLOW_LIST))
                }
            }),
        }
    }

    fn precedence(&self, node: &Node) -> u8 {
        match node {
            Node::Op { op: MathOp::Mod, .. } if !self.modern => MathOp::Add.precedence(),
            Node::Op { op: MathOp::Mod, .. } => ATOM,
            Node::Op { op, .. } => op.precedence(),
            Node::Compare { op, .. } => op.precedence(),
            _ => ATOM,
        }
    }

    /// Render `child` as an operand of `parent`, parenthesized when needed.
    fn operand(&mut self, child: &Node, parent: &Node, right: bool) -> Result<String, CompileError> {
        let child = self.simplify(child)?;
        let text = self.render(&child)?;
        let outer = self.precedence(parent);
        let inner = self.precedence(&child);
        let same_associative = match (&child, parent) {
            (Node::Op { op: a, .. }, Node::Op { op: b, .. }) => a == b && a.is_associative(),
            _ => false,
        };
        let wrap = match &child {
            Node::Value(Literal::Number(n)) if *n < 0.0 => {
                right || matches!(parent, Node::Op { op: MathOp::Pow, .. })
            }
            Node::Op { .. } | Node::Compare { .. } => {
                inner < outer || (inner == outer && right && !same_associative)
            }
            _ => false,
        };
        Ok(if wrap { format!("({text})") } else { text })
    }

    fn math(&mut self, lhs: &Node, op: MathOp, rhs: &Node) -> Result<String, CompileError> {
        if op == MathOp::Mod && self.modern {
            let a = self.compile(lhs)?;
            let b = self.compile(rhs)?;
            return Ok(format!("remainder({a},{b})"));
        }

        // The legacy `%` splices both operands around a `/`
        let parent_op = if op == MathOp::Mod { MathOp::Div } else { op };
        let parent = Node::op(lhs.clone(), parent_op, rhs.clone());
        let a = self.operand(lhs, &parent, false)?;
        let b = self.operand(rhs, &parent, true)?;
        Ok(match op {
            MathOp::Mod => format!("{b}*({a}<0)+iPart({b}*fPart({a}/{b}))"),
            MathOp::Mul => {
                let letter = |node: &Node, text: &str| {
                    matches!(node, Node::Variable(_)) && text.chars().count() == 1
                };
                if letter(lhs, &a) || letter(rhs, &b) {
                    if matches!(rhs, Node::Value(_)) {
                        format!("{b}{a}")
                    } else {
                        format!("{a}{b}")
                    }
                } else {
                    format!("{a}*{b}")
                }
            }
            _ => format!("{a}{}{b}", op.symbol()),
        })
    }

    fn comparison(&mut self, lhs: &Node, op: CompareOp, rhs: &Node) -> Result<String, CompileError> {
        let parent = Node::compare(lhs.clone(), op, rhs.clone());
        let a = self.operand(lhs, &parent, false)?;
        let b = self.operand(rhs, &parent, true)?;
        Ok(format!("{a}{}{b}", op.sign()))
    }

    // ── Statements ─────────────────────────────────────────────────

    fn assign(&mut self, target: &Node, op: AssignOp, value: &Node, line: usize) -> Result<String, CompileError> {
        if !matches!(
            target,
            Node::Variable(_) | Node::Access { .. } | Node::List(_) | Node::StringVar(_)
        ) {
            return Err(CompileError::compiler("cannot assign to a non-variable", Some(line)));
        }
        let value = match op {
            AssignOp::Set => value.clone(),
            AssignOp::Compound(math) => Node::op(target.clone(), math, value.clone()),
        };
        if let Node::Variable(name) = target {
            let ty = value.ty(self.ctx);
            self.ctx.set_variable_type(name, ty);
        }
        if let Some(range) = range_of(&value) {
            if let Some((setup, list)) = self.runtime_range(range)? {
                let list = self.compile(&list)?;
                let target = self.compile(target)?;
                return Ok(format!("{setup}\n{list}→{target}"));
            }
        }
        let value = self.compile(&value)?;
        let target = self.compile(target)?;
        Ok(format!("{}→{target}", trim_closers(&value)))
    }

    fn branch(&mut self, condition: &Node, then: &Node, otherwise: Option<&Node>) -> Result<String, CompileError> {
        let condition = self.simplify(condition)?;
        let truth = match &condition {
            Node::Value(Literal::Bool(b)) => Some(*b),
            Node::Value(Literal::Number(n)) => Some(*n != 0.0),
            _ => None,
        };
        if let Some(truth) = truth {
            return match (truth, otherwise) {
                (true, _) => self.compile(then),
                (false, Some(other)) => self.compile(other),
                (false, None) => Ok(String::new()),
            };
        }

        let condition = self.render(&condition)?;
        let body = self.compile(then)?;
        match otherwise {
            Some(other) => {
                let other = self.compile(other)?;
                Ok(format!("If {condition}:Then\n{body}\nElse\n{other}\nEnd"))
            }
            None if count_statements(&body) == 1 => Ok(format!("If {condition}\n{body}")),
            None => Ok(format!("If {condition}:Then\n{body}\nEnd")),
        }
    }

    /// `For(counter,start,end[,step]` over a range.
    fn counted_loop(&mut self, counter: &Node, range: &Range) -> Result<String, CompileError> {
        let counter = self.compile(counter)?;
        let start = self.compile(&range.start)?;
        let end = if range.inclusive {
            (*range.end).clone()
        } else {
            let descending = optimize::constant_number(&range.step)
                .ok()
                .flatten()
                .is_some_and(|step| step < 0.0);
            let toward = if descending { MathOp::Add } else { MathOp::Sub };
            Node::op((*range.end).clone(), toward, Node::number(1.0))
        };
        let end = self.compile(&end)?;

        let mut header = format!("For({counter},{start},{end}");
        let step = self.simplify(&range.step)?;
        if step != Node::number(1.0) {
            header.push(',');
            header.push_str(&self.render(&step)?);
        }
        Ok(header)
    }

    fn range(&mut self, range: &Range) -> Result<String, CompileError> {
        match optimize::range_values(range) {
            Ok(Some(values)) => {
                let items = Node::Commas(values.into_iter().map(Node::number).collect());
                let body = self.compile(&items)?;
                Ok(if range.standalone { format!("{{{body}}}") } else { body })
            }
            Ok(None) => Err(CompileError::compiler(
                "a range with run-time bounds can only be assigned or looped over",
                None,
            )),
            Err(reason) => Err(CompileError::compiler(
                format!("this range cannot be a list literal ({reason}); assign it or loop over it"),
                None,
            )),
        }
    }

    /// Fill loop and list for a range that cannot be written as a literal,
    /// or `None` when it can.
    fn runtime_range(&mut self, range: &Range) -> Result<Option<(String, Node)>, CompileError> {
        match optimize::range_values(range) {
            Ok(Some(_)) => Ok(None),
            Ok(None) => self.materialize(range).map(Some),
            Err(reason) => {
                self.ctx.warn(format!("range built at run time: {reason}"), None);
                self.materialize(range).map(Some)
            }
        }
    }

    /// Loop that fills a fresh list with the values of `range`. Returns the
    /// loop and the list it fills.
    fn materialize(&mut self, range: &Range) -> Result<(String, Node), CompileError> {
        let list = Node::Variable(self.ctx.temporary());
        let count = Node::Variable(self.ctx.temporary());
        let counter = Node::Variable(self.ctx.temporary());

        let init = self.compile(&Node::assign(
            list.clone(),
            Node::Value(Literal::Array(vec![Node::number(0.0)])),
            0,
        ))?;
        let reset = self.compile(&Node::assign(count.clone(), Node::number(0.0), 0))?;
        let header = self.counted_loop(&counter, range)?;
        let body = self.compile(&Node::Block(vec![
            Node::Assign {
                target: Box::new(count.clone()),
                op: AssignOp::Compound(MathOp::Add),
                value: Box::new(Node::number(1.0)),
                line: 0,
            },
            Node::assign(
                Node::Access {
                    list: Box::new(list.clone()),
                    index: Box::new(count),
                },
                counter,
                0,
            ),
        ]))?;
        Ok((format!("{init}\n{reset}\n{header}\n{body}\nEnd"), list))
    }

    fn for_loop(&mut self, variable: &Node, list: &Node, body: &Node) -> Result<String, CompileError> {
        let range = range_of(list);

        if let Some(range) = range.filter(|r| has_constant_bounds(r)) {
            let mut header = self.counted_loop(variable, range)?;
            if is_single_short_if(body) {
                header.push(')');
            }
            let body = self.compile(body)?;
            return Ok(format!("{header}\n{body}\nEnd"));
        }

        let (setup, list) = match (range, list) {
            (Some(range), _) => self.materialize(range)?,
            (None, Node::Variable(name)) => {
                self.ctx.set_variable_type(name, ValueType::Array);
                (String::new(), list.clone())
            }
            (None, Node::List(_)) => (String::new(), list.clone()),
            (None, _) => {
                let copy = Node::Variable(self.ctx.temporary());
                let setup = self.compile(&Node::assign(copy.clone(), list.clone(), 0))?;
                (setup, copy)
            }
        };

        let length = Node::Variable(self.ctx.temporary());
        let index = Node::Variable(self.ctx.temporary());
        let measure = self.compile(&Node::assign(
            length.clone(),
            Node::call("array_length", vec![list.clone()], 0),
            0,
        ))?;
        let header = format!("For({},1,{}", self.compile(&index)?, self.compile(&length)?);
        let load = self.compile(&Node::assign(
            variable.clone(),
            Node::Access {
                list: Box::new(list),
                index: Box::new(index),
            },
            0,
        ))?;
        let body = self.compile(body)?;
        Ok(collapse_lines(&format!("{setup}\n{measure}\n{header}\n{load}\n{body}\nEnd")))
    }

    // ── Functions ──────────────────────────────────────────────────

    fn call(&mut self, name: &str, args: &[Node], line: usize) -> Result<String, CompileError> {
        let Some(entry) = self.ctx.functions().get(name).cloned() else {
            return Err(CompileError::compiler(format!("unknown function `{name}`"), Some(line)));
        };
        let builtin = match entry {
            FunctionEntry::Builtin(builtin) => builtin,
            FunctionEntry::User(user) => return self.user_call(name, &user, args, line),
        };

        if let Some(expand) = builtin.expand {
            let expanded = expand(args.to_vec(), line)?;
            return self.compile(&expanded);
        }
        if !builtin.arity.accepts(args.len()) {
            return Err(CompileError::compiler(
                format!(
                    "Wrong parameter count for `{name}`, got {}, expected {}",
                    args.len(),
                    builtin.arity.describe()
                ),
                Some(line),
            ));
        }
        if args.is_empty() {
            return Ok(builtin.target.to_string());
        }
        let args = self.compile_all(args)?.join(",");
        Ok(if builtin.parens {
            format!("{}({args})", builtin.target)
        } else {
            format!("{} {args}", builtin.target)
        })
    }

    fn user_call(&mut self, name: &str, f: &UserFn, args: &[Node], line: usize) -> Result<String, CompileError> {
        if !f.accepts(args.len()) {
            return Err(CompileError::compiler(
                format!(
                    "Wrong parameter count for `{name}`, got {}, expected {}",
                    args.len(),
                    f.describe_arity()
                ),
                Some(line),
            ));
        }
        let mut args = args.to_vec();
        args.resize(f.params.len(), Node::number(0.0));

        if f.inline {
            if self.inlining.iter().any(|n| n == name) {
                return Err(CompileError::compiler(
                    format!("inline function `{name}` calls itself"),
                    Some(line),
                ));
            }
            let Some(body) = &f.body else {
                return Err(CompileError::compiler(
                    format!("function `{name}` has no body"),
                    Some(line),
                ));
            };
            debug!(function = name, "inlining call");
            let mut lines = Vec::new();
            for (param, arg) in f.params.iter().zip(args) {
                lines.push(self.compile(&Node::assign(Node::Variable(param.clone()), arg, line))?);
            }
            self.inlining.push(name.to_string());
            let body = self.compile(body);
            self.inlining.pop();
            lines.push(body?);
            return Ok(collapse_lines(&lines.join("\n")));
        }

        let mut parts = Vec::new();
        if !args.is_empty() {
            let list = self.compile(&Node::Value(Literal::Array(args)))?;
            parts.push(format!("{}→∟{}", trim_closers(&list), f.args_slot()));
        }
        let selector = self.compile(&Node::Variable(FUNCTION_SELECTOR.to_string()))?;
        parts.push(format!("{}→{selector}", f.id));
        parts.push(format!("prgm{}", self.program));
        parts.push("Ans".to_string());
        Ok(parts.join(":"))
    }

    /// Non-inline functions become a guarded section of the program, entered
    /// when the selector holds the function's id.
    fn function(&mut self, name: &str, params: &[String], body: &Node, inline: bool) -> Result<String, CompileError> {
        if inline {
            return Ok(String::new());
        }
        let Some(f) = self.ctx.functions().user(name).cloned() else {
            return Err(CompileError::compiler(format!("unknown function `{name}`"), None));
        };

        let selector = self.compile(&Node::Variable(FUNCTION_SELECTOR.to_string()))?;
        let mut lines = vec![format!("If {selector}={}:Then", f.id), self.selector_reset()?];
        for (i, param) in params.iter().enumerate() {
            let target = self.compile(&Node::Variable(param.clone()))?;
            lines.push(format!("∟{}({})→{target}", f.args_slot(), i + 1));
        }
        let body = self.compile(body)?;
        let returns = body.ends_with(RETURN);
        lines.push(body);
        if !returns {
            lines.push(RETURN.to_string());
        }
        lines.push("End".to_string());
        Ok(collapse_lines(&lines.join("\n")))
    }

    /// `-1→sel`: no function id matches, so re-entry falls through to the
    /// main body.
    fn selector_reset(&mut self) -> Result<String, CompileError> {
        let selector = self.compile(&Node::Variable(FUNCTION_SELECTOR.to_string()))?;
        Ok(format!("-1→{selector}"))
    }
}

/// The range a node stands for: a bare range or `[range]`.
fn range_of(node: &Node) -> Option<&Range> {
    match node {
        Node::Range(range) => Some(range),
        Node::Value(Literal::Array(items)) => match items.as_slice() {
            [Node::Range(range)] => Some(range),
            _ => None,
        },
        _ => None,
    }
}

/// A loop body that is one `If` with no `Else` and a one-statement branch.
/// The native loop header needs a closing `)` so that `If` cannot swallow
/// the loop's `End`.
fn is_single_short_if(body: &Node) -> bool {
    match body {
        Node::Block(rules) => match rules.as_slice() {
            [only] => is_single_short_if(only),
            _ => false,
        },
        Node::If {
            otherwise: None,
            then,
            ..
        } => then.statement_count() < 2,
        _ => false,
    }
}

fn has_constant_bounds(range: &Range) -> bool {
    range.start.is_simple() && range.end.is_simple() && range.step.is_simple()
}

/// Drop empty lines.
fn collapse_lines(text: &str) -> String {
    text.split('\n')
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Closing brackets and a final quote are optional before `→` and at the end
/// of a line.
fn trim_closers(text: &str) -> &str {
    let text = trim_parens(text);
    text.strip_suffix('"').unwrap_or(text)
}

fn trim_parens(text: &str) -> &str {
    text.trim_end_matches([')', '}', ']'])
}

/// Statements in rendered code: lines and `:` separators outside strings.
/// A string ends at its closing quote, at `→` or at the end of the line.
fn count_statements(code: &str) -> usize {
    let mut count = 0;
    let mut in_string = false;
    let mut pending = false;
    for c in code.chars() {
        match c {
            '\n' => {
                count += usize::from(pending);
                pending = false;
                in_string = false;
            }
            ':' if !in_string => {
                count += usize::from(pending);
                pending = false;
            }
            '"' => {
                in_string = !in_string;
                pending = true;
            }
            '→' => {
                in_string = false;
                pending = true;
            }
            _ => pending = true,
        }
    }
    count + usize::from(pending)
}
