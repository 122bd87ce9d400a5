use crate::ast::*;
use crate::builtins::{Arity, FunctionEntry};
use crate::context::{Context, FUNCTION_SELECTOR};
use crate::error::CompileError;
use crate::lexer::{Tag, Token};
use crate::options::Options;
use crate::util::split_on;

/// Binary operator tiers, loosest first.
const TIERS: &[&[&str]] = &[
    &["||"],
    &["&&"],
    &["==", "!=", ">", "<", "<=", ">="],
    &["-", "+"],
    &["/", "*", "%"],
    &["^"],
];

/// Parse a token stream into a root `Block`.
pub fn parse(tokens: &[Token], ctx: &mut Context, options: &Options) -> Result<Node, CompileError> {
    let tokens: Vec<Token> = tokens
        .iter()
        .filter(|t| t.tag != Tag::Whitespace)
        .cloned()
        .collect();
    let mut parser = Parser {
        ctx,
        dump_unknown: options.dump_unknown,
    };
    parser.declare_functions(&tokens);
    parser.block(&tokens)
}

struct Parser<'a> {
    ctx: &'a mut Context,
    dump_unknown: bool,
}

impl Parser<'_> {
    /// Register every `function NAME` up front so calls may precede definitions.
    fn declare_functions(&mut self, tokens: &[Token]) {
        for (i, token) in tokens.iter().enumerate() {
            if !token.is_keyword("function") {
                continue;
            }
            let Some(name) = tokens.get(i + 1).filter(|t| t.tag == Tag::Identifier) else {
                continue;
            };
            let inline = i
                .checked_sub(1)
                .and_then(|prev| tokens.get(prev))
                .is_some_and(is_inline);
            self.ctx.functions_mut().declare(&name.text, inline);
        }
    }

    // ── Helpers ────────────────────────────────────────────────────

    /// Index of the bracket closing `tokens[0]`. Unmatched brackets are a
    /// soft diagnostic and the stream is treated as closing at its end.
    fn closing(&mut self, tokens: &[Token]) -> usize {
        match closing_index(tokens) {
            Some(index) => index,
            None => {
                if let Some(open) = tokens.first() {
                    self.ctx
                        .warn(format!("unmatched `{}`", open.text), Some(open.line));
                }
                tokens.len()
            }
        }
    }

    fn variable(&mut self, name: &str) -> Node {
        Node::Variable(self.ctx.reference_variable(name))
    }

    fn unknown(&mut self, tokens: &[Token]) -> Node {
        let text = tokens.iter().map(|t| t.text.as_str()).collect::<Vec<_>>().join(" ");
        self.ctx.warn(
            format!("unrecognized expression `{text}`"),
            tokens.first().map(|t| t.line),
        );
        if self.dump_unknown {
            Node::Value(Literal::Str("unknown_expr".to_string()))
        } else {
            Node::Native(String::new())
        }
    }

    // ── Statements ─────────────────────────────────────────────────

    fn block(&mut self, tokens: &[Token]) -> Result<Node, CompileError> {
        let body = strip_braces(tokens);
        let mut rules = Vec::new();
        let mut pos = 0;
        while let Some(rest) = body.get(pos..).filter(|r| !r.is_empty()) {
            if rest[0].tag == Tag::Terminator {
                pos += 1;
                continue;
            }
            let len = statement_len(rest).max(1);
            if let Some(rule) = self.line(&rest[..len])? {
                rules.push(rule);
            }
            pos += len;
        }
        Ok(Node::Block(rules))
    }

    fn line(&mut self, tokens: &[Token]) -> Result<Option<Node>, CompileError> {
        let Some(first) = tokens.first() else {
            return Ok(None);
        };
        match first.tag {
            Tag::Label => {
                self.ctx
                    .warn(format!("label `{}` ignored", first.text), Some(first.line));
                return self.line(&tokens[1..]);
            }
            Tag::Keyword => return self.keyword(tokens),
            Tag::BlockOpen => return self.block(tokens).map(Some),
            Tag::Identifier if is_inline(first) => {
                if let Some(next) = tokens.get(1).filter(|t| t.tag == Tag::Keyword) {
                    if next.is_keyword("function") {
                        return self.function(&tokens[1..], true).map(Some);
                    }
                    return Err(CompileError::parser(
                        format!("`inline` must be followed by `function`, found `{}`", next.text),
                        Some(first.line),
                    ));
                }
            }
            _ => {}
        }

        let line = slice_until(tokens, &[Tag::Terminator]);
        match first_top_level(line, |t| matches!(t.tag, Tag::Assign | Tag::CAssign)) {
            Some(at) => self.assign(line, at).map(Some),
            None => self.expression(line).map(Some),
        }
    }

    fn keyword(&mut self, tokens: &[Token]) -> Result<Option<Node>, CompileError> {
        let head = &tokens[0];
        match head.text.to_ascii_lowercase().as_str() {
            "if" | "unless" => self.if_statement(tokens).map(Some),
            "for" | "foreach" => self.for_statement(tokens).map(Some),
            "while" | "until" => self.while_statement(tokens).map(Some),
            "function" => self.function(tokens, false).map(Some),
            "return" => {
                let rest = slice_until(&tokens[1..], &[Tag::Terminator]);
                let mut rules = Vec::new();
                if !rest.is_empty() {
                    rules.push(self.expression(rest)?);
                }
                rules.push(Node::Native(RETURN.to_string()));
                Ok(Some(Node::Block(rules)))
            }
            "exit" | "die" => match self.call(tokens)? {
                Some(call) => Ok(Some(call)),
                None => Ok(Some(self.unknown(tokens))),
            },
            "const" => self.line(&tokens[1..]),
            "else" => {
                self.ctx.warn("`else` without a matching `if`", Some(head.line));
                Ok(None)
            }
            other => {
                self.ctx
                    .warn(format!("unsupported keyword `{other}`"), Some(head.line));
                Ok(None)
            }
        }
    }

    /// Split off a statement body: a braced block, or the next statement.
    /// Returns the body tokens and how many tokens of `code` it consumed.
    fn body<'t>(&mut self, code: &'t [Token]) -> (&'t [Token], usize) {
        let skipped = code.iter().take_while(|t| t.tag == Tag::Terminator).count();
        let rest = &code[skipped..];
        match rest.first() {
            None => (rest, skipped),
            Some(open) if open.tag == Tag::BlockOpen => {
                let end = (self.closing(rest) + 1).min(rest.len());
                (&rest[..end], skipped + end)
            }
            Some(_) => {
                let len = statement_len(rest);
                (&rest[..len], skipped + len)
            }
        }
    }

    fn if_statement(&mut self, tokens: &[Token]) -> Result<Node, CompileError> {
        let head = &tokens[0];
        let condition_tokens = slice_until(&tokens[1..], &[Tag::Terminator, Tag::BlockOpen]);
        let mut condition = self.expression(condition_tokens)?;
        if head.is_keyword("unless") {
            condition = condition.negate();
        }

        let code = &tokens[1 + condition_tokens.len()..];
        let (then_tokens, consumed) = self.body(code);
        let then = self.block(then_tokens)?;

        let rest = &code[consumed..];
        let rest = &rest[rest.iter().take_while(|t| t.tag == Tag::Terminator).count()..];
        let otherwise = match rest.first() {
            Some(t) if t.is_keyword("else") => {
                let branch = &rest[1..];
                let is_chain = branch
                    .first()
                    .is_some_and(|t| t.is_keyword("if") || t.is_keyword("unless"));
                if is_chain {
                    Some(Box::new(Node::Block(vec![self.if_statement(branch)?])))
                } else {
                    let (else_tokens, _) = self.body(branch);
                    Some(Box::new(self.block(else_tokens)?))
                }
            }
            _ => None,
        };

        Ok(Node::If {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise,
        })
    }

    fn for_statement(&mut self, tokens: &[Token]) -> Result<Node, CompileError> {
        let head = &tokens[0];
        let condition_tokens = slice_until(&tokens[1..], &[Tag::Terminator, Tag::BlockOpen]);
        let code = &tokens[1 + condition_tokens.len()..];

        // `x from a to b` is shorthand for `x in [a to b]`
        let rewritten;
        let condition_tokens = if condition_tokens.get(1).is_some_and(|t| t.tag == Tag::From) {
            rewritten = rewrite_from(condition_tokens);
            &rewritten[..]
        } else {
            condition_tokens
        };

        let Node::In { value, list } = self.expression(condition_tokens)? else {
            return Err(CompileError::parser(
                "for loop condition must be an `in` expression",
                Some(head.line),
            ));
        };
        let (body_tokens, _) = self.body(code);
        let body = self.block(body_tokens)?;
        Ok(Node::For {
            variable: value,
            list,
            body: Box::new(body),
        })
    }

    fn while_statement(&mut self, tokens: &[Token]) -> Result<Node, CompileError> {
        let until = tokens[0].is_keyword("until");
        let condition_tokens = slice_until(&tokens[1..], &[Tag::Terminator, Tag::BlockOpen]);
        let condition = self.expression(condition_tokens)?;
        let (body_tokens, _) = self.body(&tokens[1 + condition_tokens.len()..]);
        let body = self.block(body_tokens)?;
        Ok(Node::While {
            condition: Box::new(condition),
            body: Box::new(body),
            until,
        })
    }

    /// `function name a, b = 1 { ... }` or `function name(a, b = 1) { ... }`.
    /// `tokens[0]` is the `function` keyword.
    fn function(&mut self, tokens: &[Token], inline: bool) -> Result<Node, CompileError> {
        let head = &tokens[0];
        let Some(name) = tokens.get(1).filter(|t| t.tag == Tag::Identifier) else {
            return Err(CompileError::parser(
                "expected a function name after `function`",
                Some(head.line),
            ));
        };
        let header = slice_until(&tokens[2..], &[Tag::BlockOpen, Tag::Terminator]);
        let code = &tokens[2 + header.len()..];

        let param_tokens: &[Token] = match header.first() {
            None => &[],
            Some(t) if t.tag == Tag::ParenOpen => {
                let close = self.closing(header);
                if close + 1 < header.len() {
                    self.ctx.warn(
                        format!("ignoring tokens after the parameter list of `{}`", name.text),
                        Some(name.line),
                    );
                }
                &header[1..close.min(header.len())]
            }
            Some(t) if t.tag == Tag::Identifier => header,
            Some(t) => {
                self.ctx.warn(
                    format!("invalid parameter list for `{}` at `{}`", name.text, t.text),
                    Some(t.line),
                );
                &[]
            }
        };

        let mut params = Vec::new();
        let mut guards = Vec::new();
        let mut required = 0;
        if !param_tokens.is_empty() {
            for group in split_on(param_tokens, |t| t.tag == Tag::Delimiter) {
                let Some(param) = group.first().filter(|t| t.tag == Tag::Identifier) else {
                    self.ctx
                        .warn(format!("invalid parameter in `{}`", name.text), Some(name.line));
                    continue;
                };
                let key = self.ctx.reference_variable(&param.text);
                match group.get(1) {
                    None => required = params.len() + 1,
                    Some(t) if t.tag == Tag::Assign => {
                        let default = self.expression(&group[2..])?;
                        guards.push(self.default_guard(&param.text, default, t.line));
                    }
                    Some(t) if t.tag == Tag::CAssign => {
                        return Err(CompileError::parser(
                            format!(
                                "invalid default for parameter `{}`: expected `=`, found `{}`",
                                param.text, t.text
                            ),
                            Some(t.line),
                        ));
                    }
                    Some(t) => {
                        self.ctx.warn(
                            format!("ignoring `{}` after parameter `{}`", t.text, param.text),
                            Some(t.line),
                        );
                    }
                }
                params.push(key);
            }
        }

        let (body_tokens, _) = self.body(code);
        if let Node::Block(rules) = self.block(body_tokens)? {
            guards.extend(rules);
        }
        let body = Node::Block(guards);

        if !inline {
            self.ctx.reference_variable(FUNCTION_SELECTOR);
        }
        self.ctx
            .functions_mut()
            .define(&name.text, inline, params.clone(), required, body.clone());

        Ok(Node::FnDef {
            name: name.text.to_ascii_lowercase(),
            params,
            body: Box::new(body),
            inline,
        })
    }

    /// `if not(name) { name = default }`
    fn default_guard(&mut self, name: &str, default: Node, line: usize) -> Node {
        let test = self.variable(name);
        let target = self.variable(name);
        Node::If {
            condition: Box::new(Node::call("not", vec![test], line)),
            then: Box::new(Node::Block(vec![Node::assign(target, default, line)])),
            otherwise: None,
        }
    }

    fn assign(&mut self, tokens: &[Token], at: usize) -> Result<Node, CompileError> {
        let op_token = &tokens[at];
        let op = AssignOp::from_symbol(&op_token.text).unwrap_or(AssignOp::Set);
        let target = self.expression(&tokens[..at])?;
        let value = self.expression(&tokens[at + 1..])?;
        Ok(Node::Assign {
            target: Box::new(target),
            op,
            value: Box::new(value),
            line: op_token.line,
        })
    }

    // ── Expressions ────────────────────────────────────────────────

    fn expression(&mut self, tokens: &[Token]) -> Result<Node, CompileError> {
        let tokens = slice_until(tokens, &[Tag::Terminator]);
        let Some(first) = tokens.first() else {
            return Ok(self.unknown(tokens));
        };
        let line = first.line;

        // Brackets spanning the whole expression
        if matches!(first.tag, Tag::ParenOpen | Tag::ArrOpen) {
            let close = self.closing(tokens);
            if close + 1 >= tokens.len() {
                let interior = &tokens[1..close.min(tokens.len())];
                return if first.tag == Tag::ParenOpen {
                    self.expression(interior)
                } else {
                    self.array(interior)
                };
            }
        }

        if first.tag == Tag::Identifier && self.ctx.functions().contains(&first.text) {
            if let Some(call) = self.call(tokens)? {
                return Ok(call);
            }
        }

        if let Some(at) = first_top_level(tokens, |t| t.is_keyword("in")) {
            let value = self.expression(&tokens[..at])?;
            let list = self.expression(&tokens[at + 1..])?;
            return Ok(Node::In {
                value: Box::new(value),
                list: Box::new(list),
            });
        }
        if let Some(at) = first_top_level(tokens, |t| t.tag == Tag::Range) {
            return self.range(tokens, at);
        }

        for tier in TIERS {
            if let Some(at) = rightmost_binary(tokens, tier) {
                return self.binary(tokens, at);
            }
            // A leading sign binds looser than `*` and `^`: -2^2 is 0-(2^2)
            if tier.contains(&"-") && first.tag == Tag::Math {
                match first.text.as_str() {
                    "-" => {
                        let operand = self.expression(&tokens[1..])?;
                        return Ok(Node::op(Node::number(0.0), MathOp::Sub, operand));
                    }
                    "+" => return self.expression(&tokens[1..]),
                    _ => {}
                }
            }
        }

        match first.tag {
            Tag::Literal if first.text == "!" => {
                let operand = self.expression(&tokens[1..])?;
                return Ok(Node::call("not", vec![operand], line));
            }
            Tag::Identifier => {
                if tokens.len() == 1 {
                    return Ok(match first.text.to_ascii_lowercase().as_str() {
                        "true" => Node::Value(Literal::Bool(true)),
                        "false" => Node::Value(Literal::Bool(false)),
                        _ => self.variable(&first.text),
                    });
                }
                if tokens[1].tag == Tag::ArrOpen {
                    if let Some(access) = self.access(tokens)? {
                        return Ok(access);
                    }
                }
            }
            _ => {}
        }

        let literal = match first.tag {
            Tag::Number => self.number(first)?,
            Tag::String => {
                let inner = first.text.get(1..first.text.len().saturating_sub(1)).unwrap_or_default();
                Node::Value(Literal::Str(inner.to_string()))
            }
            Tag::Native => Node::Native(first.text.clone()),
            _ => return Ok(self.unknown(tokens)),
        };
        if tokens.len() > 1 {
            self.ctx.warn(
                format!("ignoring tokens after `{}`", first.text),
                Some(line),
            );
        }
        Ok(literal)
    }

    fn binary(&mut self, tokens: &[Token], at: usize) -> Result<Node, CompileError> {
        let op_token = &tokens[at];
        let lhs = self.expression(&tokens[..at])?;
        let rhs = self.expression(&tokens[at + 1..])?;
        if let Some(op) = CompareOp::from_symbol(&op_token.text) {
            return Ok(Node::compare(lhs, op, rhs));
        }
        match MathOp::from_symbol(&op_token.text) {
            Some(op) => Ok(Node::op(lhs, op, rhs)),
            None => Ok(self.unknown(tokens)),
        }
    }

    fn array(&mut self, interior: &[Token]) -> Result<Node, CompileError> {
        let mut items = Vec::new();
        for group in split_top_level(interior, Tag::Delimiter) {
            if group.is_empty() {
                continue;
            }
            let mut item = self.expression(group)?;
            if let Node::Range(range) = &mut item {
                range.standalone = false;
            }
            items.push(item);
        }
        Ok(Node::Value(Literal::Array(items)))
    }

    fn range(&mut self, tokens: &[Token], at: usize) -> Result<Node, CompileError> {
        let start = self.expression(&tokens[..at])?;
        let inclusive = tokens[at].text == "to";
        let rest = &tokens[at + 1..];
        let (end, step) = match first_top_level(rest, |t| t.tag == Tag::RangeStep) {
            Some(by) => (self.expression(&rest[..by])?, self.expression(&rest[by + 1..])?),
            None => (self.expression(rest)?, Node::number(1.0)),
        };
        Ok(Node::Range(Range {
            start: Box::new(start),
            end: Box::new(end),
            step: Box::new(step),
            inclusive,
            standalone: true,
        }))
    }

    /// `name(args)` spanning the whole expression, or `name args...`.
    /// `None` when the tokens are not a call on their own (e.g. `abs(x) + 1`).
    fn call(&mut self, tokens: &[Token]) -> Result<Option<Node>, CompileError> {
        let head = &tokens[0];
        let args_tokens: &[Token] = match tokens.get(1) {
            None => &[],
            Some(open) if open.tag == Tag::ParenOpen => {
                let Some(close) = closing_index(&tokens[1..]) else {
                    return Err(CompileError::parser(
                        format!("unclosed argument list for `{}`", head.text),
                        Some(open.line),
                    ));
                };
                if close + 2 < tokens.len() {
                    return Ok(None);
                }
                &tokens[2..=close]
            }
            Some(next) if starts_operand(next) && self.takes_args(&head.text) => &tokens[1..],
            Some(_) => return Ok(None),
        };

        let mut args = Vec::new();
        if !args_tokens.is_empty() {
            for group in split_top_level(args_tokens, Tag::Delimiter) {
                args.push(self.expression(group)?);
            }
        }
        if self
            .ctx
            .functions()
            .user(&head.text)
            .is_some_and(|f| !f.inline)
        {
            self.ctx.reference_variable(FUNCTION_SELECTOR);
        }
        Ok(Some(Node::call(&head.text, args, head.line)))
    }

    fn takes_args(&self, name: &str) -> bool {
        match self.ctx.functions().get(name) {
            Some(FunctionEntry::Builtin(f)) => f.arity != Arity::Exact(&[0]),
            Some(FunctionEntry::User(f)) => !f.params.is_empty(),
            None => false,
        }
    }

    /// `name[index]`; indexing marks `name` as a list.
    fn access(&mut self, tokens: &[Token]) -> Result<Option<Node>, CompileError> {
        let close = 1 + self.closing(&tokens[1..]);
        if close + 1 < tokens.len() {
            return Ok(None);
        }
        let list = self.variable(&tokens[0].text);
        if let Node::Variable(key) = &list {
            self.ctx.set_variable_type(key, ValueType::Array);
        }
        let index = self.expression(&tokens[2..close.min(tokens.len())])?;
        Ok(Some(Node::Access {
            list: Box::new(list),
            index: Box::new(index),
        }))
    }

    fn number(&mut self, token: &Token) -> Result<Node, CompileError> {
        let text = token.text.to_ascii_lowercase();
        let radix_form = text
            .split_once('r')
            .filter(|(prefix, _)| !prefix.is_empty() && prefix.len() <= 2);
        let (radix, digits) = if let Some((prefix, digits)) = radix_form {
            (prefix.parse::<u32>().unwrap_or(0), digits)
        } else if let Some(digits) = text.strip_prefix("0x") {
            (16, digits)
        } else if let Some(digits) = text.strip_prefix("0o") {
            (8, digits)
        } else if let Some(digits) = text.strip_prefix("0b") {
            (2, digits)
        } else {
            return Ok(Node::number(text.parse::<f64>().unwrap_or(0.0)));
        };

        if !(2..=36).contains(&radix) {
            return Err(CompileError::parser(
                format!("impossible radix {radix}"),
                Some(token.line),
            ));
        }
        let value = digits
            .chars()
            .map_while(|c| c.to_digit(radix))
            .fold(0.0, |acc, d| acc * f64::from(radix) + f64::from(d));
        Ok(Node::number(value))
    }
}

// ── Token slicing ──────────────────────────────────────────────────

fn is_inline(token: &Token) -> bool {
    token.tag == Tag::Identifier && token.text.eq_ignore_ascii_case("inline")
}

/// Index of the token closing `tokens[0]`, counting nested pairs of the same kind.
fn closing_index(tokens: &[Token]) -> Option<usize> {
    let open = tokens.first()?.tag;
    let close = open.closer()?;
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate() {
        if token.tag == open {
            depth += 1;
        } else if token.tag == close {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

/// Prefix before the first token tagged with one of `stops`.
fn slice_until<'t>(tokens: &'t [Token], stops: &[Tag]) -> &'t [Token] {
    let end = tokens
        .iter()
        .position(|t| stops.contains(&t.tag))
        .unwrap_or(tokens.len());
    &tokens[..end]
}

/// Indices of tokens outside every bracket pair.
fn top_level(tokens: &[Token]) -> Vec<usize> {
    let mut depth = 0usize;
    let mut out = Vec::new();
    for (i, token) in tokens.iter().enumerate() {
        if token.tag.is_close() {
            depth = depth.saturating_sub(1);
        }
        if depth == 0 {
            out.push(i);
        }
        if token.tag.is_open() {
            depth += 1;
        }
    }
    out
}

fn first_top_level(tokens: &[Token], pred: impl Fn(&Token) -> bool) -> Option<usize> {
    top_level(tokens).into_iter().find(|&i| pred(&tokens[i]))
}

fn split_top_level(tokens: &[Token], tag: Tag) -> Vec<&[Token]> {
    let mut groups = Vec::new();
    let mut start = 0;
    for i in top_level(tokens) {
        if tokens[i].tag == tag {
            groups.push(&tokens[start..i]);
            start = i + 1;
        }
    }
    groups.push(&tokens[start..]);
    groups
}

/// Rightmost top-level operator from `tier` in binary position. Taking the
/// rightmost one makes the tree lean left.
fn rightmost_binary(tokens: &[Token], tier: &[&str]) -> Option<usize> {
    top_level(tokens).into_iter().rev().find(|&i| {
        let token = &tokens[i];
        matches!(token.tag, Tag::Math | Tag::Compare)
            && tier.contains(&token.text.as_str())
            && i > 0
            && ends_operand(&tokens[i - 1])
    })
}

fn ends_operand(token: &Token) -> bool {
    matches!(
        token.tag,
        Tag::Identifier | Tag::Number | Tag::String | Tag::Native | Tag::ParenClose | Tag::ArrClose
    )
}

fn starts_operand(token: &Token) -> bool {
    match token.tag {
        Tag::Identifier | Tag::Number | Tag::String | Tag::Native | Tag::ArrOpen => true,
        Tag::Math => token.text == "-" || token.text == "+",
        Tag::Literal => token.text == "!",
        _ => false,
    }
}

fn strip_braces(tokens: &[Token]) -> &[Token] {
    match tokens.first() {
        Some(open) if open.tag == Tag::BlockOpen => match closing_index(tokens) {
            Some(close) if close + 1 == tokens.len() => &tokens[1..close],
            Some(_) => tokens,
            None => &tokens[1..],
        },
        _ => tokens,
    }
}

fn rewrite_from(condition: &[Token]) -> Vec<Token> {
    let line = condition.first().map_or(1, |t| t.line);
    let mut out: Vec<Token> = condition.iter().take(1).cloned().collect();
    out.push(Token::new(Tag::Keyword, "in", line));
    out.push(Token::new(Tag::ArrOpen, "[", line));
    out.extend(condition.iter().skip(2).cloned());
    out.push(Token::new(Tag::ArrClose, "]", line));
    out
}

fn is_compound(tokens: &[Token]) -> bool {
    match tokens.first() {
        Some(t) if t.tag == Tag::Keyword => matches!(
            t.text.to_ascii_lowercase().as_str(),
            "if" | "unless" | "while" | "until" | "for" | "foreach" | "function"
        ),
        Some(t) if is_inline(t) => tokens.get(1).is_some_and(|t| t.is_keyword("function")),
        _ => false,
    }
}

/// Length of the statement at the start of `tokens`. Block statements end at
/// their closing brace (plus any `else` chain), others at a top-level `;`.
fn statement_len(tokens: &[Token]) -> usize {
    match tokens.first() {
        None => 0,
        Some(t) if t.tag == Tag::BlockOpen => closing_index(tokens).map_or(tokens.len(), |i| i + 1),
        Some(_) if is_compound(tokens) => compound_len(tokens),
        Some(_) => first_top_level(tokens, |t| t.tag == Tag::Terminator).unwrap_or(tokens.len()),
    }
}

fn compound_len(tokens: &[Token]) -> usize {
    let Some(stop) = tokens
        .iter()
        .position(|t| matches!(t.tag, Tag::BlockOpen | Tag::Terminator))
    else {
        return tokens.len();
    };
    let mut end = body_end(tokens, stop);

    let conditional = tokens
        .first()
        .is_some_and(|t| t.is_keyword("if") || t.is_keyword("unless"));
    if conditional {
        let mut after = end;
        while tokens.get(after).is_some_and(|t| t.tag == Tag::Terminator) {
            after += 1;
        }
        if tokens.get(after).is_some_and(|t| t.is_keyword("else")) {
            let branch = &tokens[after + 1..];
            let len = if is_compound(branch) {
                compound_len(branch)
            } else {
                body_end(branch, 0)
            };
            end = after + 1 + len;
        }
    }
    end
}

/// Exclusive end of the body starting at `at`.
fn body_end(tokens: &[Token], at: usize) -> usize {
    let mut at = at;
    while tokens.get(at).is_some_and(|t| t.tag == Tag::Terminator) {
        at += 1;
    }
    match tokens.get(at) {
        None => tokens.len(),
        Some(t) if t.tag == Tag::BlockOpen => {
            closing_index(&tokens[at..]).map_or(tokens.len(), |i| at + i + 1)
        }
        Some(_) => at + statement_len(&tokens[at..]),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::lexer::lex;
    use crate::options::LexOptions;

    fn parse_with(src: &str) -> (Result<Node, CompileError>, Context) {
        let tokens = lex(src, &LexOptions::default());
        let mut ctx = Context::new();
        let result = parse(&tokens, &mut ctx, &Options::default());
        (result, ctx)
    }

    fn parse_str(src: &str) -> Vec<Node> {
        match parse_with(src).0.unwrap() {
            Node::Block(rules) => rules,
            other => vec![other],
        }
    }

    fn parse_expr(src: &str) -> Node {
        parse_str(src).into_iter().next().unwrap()
    }

    fn var(name: &str) -> Node {
        Node::Variable(name.to_string())
    }

    fn num(n: f64) -> Node {
        Node::number(n)
    }

    #[test]
    fn assignment() {
        assert_eq!(parse_str("a = 1;"), vec![Node::assign(var("a"), num(1.0), 1)]);
    }

    #[test]
    fn compound_assignment_keeps_operator() {
        let Node::Assign { op, .. } = parse_expr("a *= 2") else {
            unreachable!()
        };
        assert_eq!(op, AssignOp::Compound(MathOp::Mul));
    }

    #[test]
    fn precedence_and_left_associativity() {
        assert_eq!(
            parse_expr("2 + 3 * 4"),
            Node::op(num(2.0), MathOp::Add, Node::op(num(3.0), MathOp::Mul, num(4.0)))
        );
        assert_eq!(
            parse_expr("a - b - c"),
            Node::op(Node::op(var("a"), MathOp::Sub, var("b")), MathOp::Sub, var("c"))
        );
    }

    #[test]
    fn grouping_and_trailing_operators() {
        assert_eq!(
            parse_expr("(a + b) * c"),
            Node::op(Node::op(var("a"), MathOp::Add, var("b")), MathOp::Mul, var("c"))
        );
        assert_eq!(parse_expr("((a))"), var("a"));
    }

    #[test]
    fn unary_minus_binds_to_operand() {
        assert_eq!(
            parse_expr("a * -b"),
            Node::op(var("a"), MathOp::Mul, Node::op(num(0.0), MathOp::Sub, var("b")))
        );
    }

    #[test]
    fn leading_minus_is_looser_than_power_and_product() {
        assert_eq!(
            parse_expr("-2 ^ 2"),
            Node::op(num(0.0), MathOp::Sub, Node::op(num(2.0), MathOp::Pow, num(2.0)))
        );
        assert_eq!(
            parse_expr("-a * b"),
            Node::op(num(0.0), MathOp::Sub, Node::op(var("a"), MathOp::Mul, var("b")))
        );
        assert_eq!(
            parse_expr("-a + b"),
            Node::op(Node::op(num(0.0), MathOp::Sub, var("a")), MathOp::Add, var("b"))
        );
    }

    #[test]
    fn logical_operators_are_loosest() {
        let expected = Node::compare(
            Node::compare(var("a"), CompareOp::Lt, var("b")),
            CompareOp::And,
            Node::compare(var("c"), CompareOp::Ne, num(1.0)),
        );
        assert_eq!(parse_expr("a < b && c != 1"), expected);
    }

    #[test]
    fn not_prefix() {
        assert_eq!(parse_expr("!a"), Node::call("not", vec![var("a")], 1));
    }

    #[test]
    fn booleans_strings_and_natives() {
        assert_eq!(parse_expr("true"), Node::Value(Literal::Bool(true)));
        assert_eq!(parse_expr("'hi'"), Node::Value(Literal::Str("hi".into())));
        assert_eq!(parse_expr("`ClrHome`"), Node::Native("ClrHome".into()));
    }

    #[test]
    fn array_literal_drops_empty_groups() {
        assert_eq!(
            parse_expr("[1, , 2]"),
            Node::Value(Literal::Array(vec![num(1.0), num(2.0)]))
        );
    }

    #[test]
    fn ranges() {
        let Node::Range(range) = parse_expr("0 til n by 2") else {
            unreachable!()
        };
        assert!(!range.inclusive);
        assert!(range.standalone);
        assert_eq!(*range.step, num(2.0));

        let Node::Value(Literal::Array(items)) = parse_expr("[1 to 3]") else {
            unreachable!()
        };
        let [Node::Range(inner)] = items.as_slice() else {
            unreachable!()
        };
        assert!(inner.inclusive);
        assert!(!inner.standalone);
    }

    #[test]
    fn membership() {
        assert_eq!(
            parse_expr("3 in [1, 2]"),
            Node::In {
                value: Box::new(num(3.0)),
                list: Box::new(Node::Value(Literal::Array(vec![num(1.0), num(2.0)]))),
            }
        );
    }

    #[test]
    fn calls_parenthesized_bare_and_embedded() {
        assert_eq!(
            parse_expr("print a, 'b'"),
            Node::call("print", vec![var("a"), Node::Value(Literal::Str("b".into()))], 1)
        );
        assert_eq!(parse_expr("CLRHOME()"), Node::call("clrhome", vec![], 1));
        assert_eq!(
            parse_expr("abs(a) + 1"),
            Node::op(Node::call("abs", vec![var("a")], 1), MathOp::Add, num(1.0))
        );
        assert_eq!(
            parse_expr("random * 5"),
            Node::op(Node::call("random", vec![], 1), MathOp::Mul, num(5.0))
        );
    }

    #[test]
    fn access_marks_lists() {
        let (result, ctx) = parse_with("scores[2]");
        let Node::Block(rules) = result.unwrap() else {
            unreachable!()
        };
        assert!(matches!(rules[0], Node::Access { .. }));
        assert_eq!(ctx.variable_type("scores"), ValueType::Array);
    }

    #[test]
    fn radix_literals() {
        assert_eq!(parse_expr("0x1f"), num(31.0));
        assert_eq!(parse_expr("36rz"), num(35.0));
        assert_eq!(parse_expr("0b101"), num(5.0));
        assert_eq!(parse_expr("0o17"), num(15.0));
        assert_eq!(parse_expr("1.5e3"), num(1500.0));
    }

    #[test]
    fn radix_literals_round_trip() {
        for radix in 2..=36u32 {
            for value in [0u32, 1, 7, 35, 1000, 46655] {
                let mut digits = String::new();
                let mut n = value;
                loop {
                    digits.insert(0, char::from_digit(n % radix, radix).unwrap());
                    n /= radix;
                    if n == 0 {
                        break;
                    }
                }
                let src = format!("{radix}r{digits}");
                assert_eq!(parse_expr(&src), num(f64::from(value)), "{src}");
            }
        }
    }

    #[test]
    fn impossible_radix_is_an_error() {
        let err = parse_with("a = 40r1").0.unwrap_err();
        assert_eq!(err.message, "impossible radix 40");
        assert_eq!(err.line, Some(1));
        assert!(parse_with("1r0").0.is_err());
    }

    #[test]
    fn usage_counts_are_recorded() {
        let (_, ctx) = parse_with("x = 1; x = x + y;");
        assert_eq!(ctx.usage("x"), 3);
        assert_eq!(ctx.usage("y"), 1);
    }

    #[test]
    fn if_else_pairs_blocks() {
        let rules = parse_str("if a { clrhome() } else { clrdraw() } b = 1;");
        assert_eq!(rules.len(), 2);
        let Node::If { then, otherwise, .. } = &rules[0] else {
            unreachable!()
        };
        assert_eq!(**then, Node::Block(vec![Node::call("clrhome", vec![], 1)]));
        assert_eq!(
            otherwise.as_deref(),
            Some(&Node::Block(vec![Node::call("clrdraw", vec![], 1)]))
        );
    }

    #[test]
    fn nested_blocks_are_not_reparsed() {
        let rules = parse_str("while a { a -= 1; b = 2; } c = 3;");
        assert_eq!(rules.len(), 2);
        let Node::While { body, until, .. } = &rules[0] else {
            unreachable!()
        };
        assert!(!until);
        assert_eq!(body.statement_count(), 2);
    }

    #[test]
    fn else_if_chains() {
        let rules = parse_str("if a { clrhome() } else if b { clrdraw() } else { pause() }");
        assert_eq!(rules.len(), 1);
        let Node::If { otherwise: Some(chain), .. } = &rules[0] else {
            unreachable!()
        };
        let Node::Block(inner) = &**chain else {
            unreachable!()
        };
        assert!(matches!(inner[0], Node::If { otherwise: Some(_), .. }));
    }

    #[test]
    fn braceless_bodies_take_the_next_statement() {
        let rules = parse_str("if a; clrhome(); clrdraw();");
        assert_eq!(rules.len(), 2);
        assert!(matches!(rules[0], Node::If { .. }));
    }

    #[test]
    fn unless_negates_comparisons() {
        let Node::If { condition, .. } = parse_expr("unless a > 3 { clrhome() }") else {
            unreachable!()
        };
        assert_eq!(*condition, Node::compare(var("a"), CompareOp::Le, num(3.0)));

        let Node::If { condition, .. } = parse_expr("unless a { clrhome() }") else {
            unreachable!()
        };
        assert_eq!(*condition, Node::call("not", vec![var("a")], 0));
    }

    #[test]
    fn until_loops() {
        assert!(matches!(parse_expr("until a { a += 1 }"), Node::While { until: true, .. }));
    }

    #[test]
    fn for_from_is_rewritten_to_in() {
        let Node::For { variable, list, .. } = parse_expr("for i from 1 to 10 { print i }") else {
            unreachable!()
        };
        assert_eq!(*variable, var("i"));
        let Node::Value(Literal::Array(items)) = &*list else {
            unreachable!()
        };
        assert!(matches!(items[0], Node::Range(_)));
    }

    #[test]
    fn for_requires_in() {
        let err = parse_with("for i { }").0.unwrap_err();
        assert!(err.message.contains("`in`"));
    }

    #[test]
    fn return_appends_marker() {
        assert_eq!(
            parse_expr("return a"),
            Node::Block(vec![var("a"), Node::Native(RETURN.into())])
        );
    }

    #[test]
    fn functions_with_defaults() {
        let (result, ctx) = parse_with("function area(w, h = 2) { return w * h }");
        let Node::Block(rules) = result.unwrap() else {
            unreachable!()
        };
        let Node::FnDef { name, params, body, inline } = &rules[0] else {
            unreachable!()
        };
        assert_eq!(name, "area");
        assert_eq!(params, &["w".to_string(), "h".to_string()]);
        assert!(!inline);
        let Node::Block(rules) = &**body else {
            unreachable!()
        };
        assert!(matches!(rules[0], Node::If { .. }));
        let f = ctx.functions().user("area").unwrap();
        assert_eq!(f.required, 1);
        assert!(f.accepts(1) && f.accepts(2) && !f.accepts(3));
    }

    #[test]
    fn bare_parameter_lists() {
        let (_, ctx) = parse_with("function mul a, b { return a * b }");
        assert_eq!(ctx.functions().user("mul").unwrap().params.len(), 2);
    }

    #[test]
    fn calls_may_precede_definitions() {
        let rules = parse_str("x = twice(2); function twice(n) { return n * 2 }");
        let Node::Assign { value, .. } = &rules[0] else {
            unreachable!()
        };
        assert!(matches!(**value, Node::Call { .. }));
    }

    #[test]
    fn compound_default_is_an_error() {
        let err = parse_with("function f(a += 1) { }").0.unwrap_err();
        assert!(err.message.contains("invalid default"));
    }

    #[test]
    fn malformed_inline_is_an_error() {
        assert!(parse_with("inline while a { }").0.is_err());
        let rules = parse_str("inline function f(x) { return x }");
        assert!(matches!(rules[0], Node::FnDef { inline: true, .. }));
    }

    #[test]
    fn unclosed_call_is_an_error() {
        let err = parse_with("print(1, 2").0.unwrap_err();
        assert!(err.message.contains("unclosed argument list"));
    }

    #[test]
    fn unmatched_bracket_is_soft() {
        let (result, ctx) = parse_with("a = (1 + 2");
        assert!(result.is_ok());
        assert_eq!(ctx.diagnostics().len(), 1);
        assert!(ctx.diagnostics()[0].message.contains("unmatched"));
    }

    #[test]
    fn unknown_syntax_is_soft() {
        let (result, ctx) = parse_with("a = @");
        let Node::Block(rules) = result.unwrap() else {
            unreachable!()
        };
        let Node::Assign { value, .. } = &rules[0] else {
            unreachable!()
        };
        assert_eq!(**value, Node::Native(String::new()));
        assert!(!ctx.diagnostics().is_empty());
    }

    #[test]
    fn labels_and_unsupported_keywords_are_dropped() {
        let (result, ctx) = parse_with("top: clrhome(); switch a;");
        let Node::Block(rules) = result.unwrap() else {
            unreachable!()
        };
        assert_eq!(rules, vec![Node::call("clrhome", vec![], 1)]);
        assert_eq!(ctx.diagnostics().len(), 2);
    }

    #[test]
    fn exit_keyword_is_a_call() {
        assert_eq!(parse_expr("exit"), Node::call("exit", vec![], 1));
    }
}
