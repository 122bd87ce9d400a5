use crate::ast::{CompareOp, Literal, MathOp, Node, Range};

/// Ranges with more values than this are never folded into a list literal.
pub const MAX_LIST_LEN: usize = 999;

// ── Constant evaluation ──────────────────────────────────────────────

/// Evaluate a constant subtree.
///
/// `Ok(None)` when the node cannot be folded (non-literal leaves, arrays,
/// arithmetic on strings). `Err` when folding would produce something the
/// target cannot represent, e.g. division by zero; callers leave the node
/// as is and report the reason.
pub fn evaluate(node: &Node) -> Result<Option<Literal>, String> {
    match node {
        Node::Value(literal) => Ok(Some(literal.clone())),
        Node::Op { lhs, op, rhs } => {
            let (Some(a), Some(b)) = (evaluate(lhs)?, evaluate(rhs)?) else {
                return Ok(None);
            };
            let (Some(x), Some(y)) = (as_number(&a), as_number(&b)) else {
                return Ok(None);
            };
            // The two target renderings of `%` disagree on negative operands
            if *op == MathOp::Mod && (x < 0.0 || y < 0.0) {
                return Ok(None);
            }
            let value = eval_math(*op, x, y);
            if value.is_finite() {
                Ok(Some(Literal::Number(value)))
            } else {
                Err(format!("`{}` does not produce a finite number", op.symbol()))
            }
        }
        Node::Compare { lhs, op, rhs } => {
            let (Some(a), Some(b)) = (evaluate(lhs)?, evaluate(rhs)?) else {
                return Ok(None);
            };
            Ok(eval_compare(&a, *op, &b).map(Literal::Bool))
        }
        _ => Ok(None),
    }
}

fn as_number(literal: &Literal) -> Option<f64> {
    match literal {
        Literal::Number(n) => Some(*n),
        Literal::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Literal::Str(_) | Literal::Array(_) => None,
    }
}

fn eval_math(op: MathOp, a: f64, b: f64) -> f64 {
    match op {
        MathOp::Add => a + b,
        MathOp::Sub => a - b,
        MathOp::Mul => a * b,
        MathOp::Div => a / b,
        MathOp::Pow => a.powf(b),
        MathOp::Mod => a % b,
    }
}

#[allow(clippy::float_cmp)]
fn eval_compare(a: &Literal, op: CompareOp, b: &Literal) -> Option<bool> {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return Some(match op {
            CompareOp::Eq => x == y,
            CompareOp::Ne => x != y,
            CompareOp::Lt => x < y,
            CompareOp::Gt => x > y,
            CompareOp::Le => x <= y,
            CompareOp::Ge => x >= y,
            CompareOp::And => x != 0.0 && y != 0.0,
            CompareOp::Or => x != 0.0 || y != 0.0,
        });
    }
    if let (Literal::Str(x), Literal::Str(y)) = (a, b) {
        return Some(match op {
            CompareOp::Eq => x == y,
            CompareOp::Ne => x != y,
            CompareOp::Lt => x < y,
            CompareOp::Gt => x > y,
            CompareOp::Le => x <= y,
            CompareOp::Ge => x >= y,
            CompareOp::And => !x.is_empty() && !y.is_empty(),
            CompareOp::Or => !x.is_empty() || !y.is_empty(),
        });
    }
    None
}

/// Numeric value of a constant subtree.
pub fn constant_number(node: &Node) -> Result<Option<f64>, String> {
    Ok(evaluate(node)?.as_ref().and_then(as_number))
}

// ── Ranges ───────────────────────────────────────────────────────────

/// Values of a range whose bounds and step are constant.
///
/// `Ok(None)` when any bound is not constant. `Err` for a zero step or a
/// range longer than [`MAX_LIST_LEN`]; such ranges are built at run time.
pub fn range_values(range: &Range) -> Result<Option<Vec<f64>>, String> {
    let bounds = (
        constant_number(&range.start)?,
        constant_number(&range.end)?,
        constant_number(&range.step)?,
    );
    let (Some(start), Some(end), Some(step)) = bounds else {
        return Ok(None);
    };
    if step == 0.0 || !step.is_finite() {
        return Err("range step must be a non-zero number".to_string());
    }

    let mut values = Vec::new();
    let mut k = 0.0;
    loop {
        let value = start + k * step;
        let inside = match (step > 0.0, range.inclusive) {
            (true, true) => value <= end,
            (true, false) => value < end,
            (false, true) => value >= end,
            (false, false) => value > end,
        };
        if !inside {
            break;
        }
        if values.len() == MAX_LIST_LEN {
            return Err(format!("range has more than {MAX_LIST_LEN} values"));
        }
        values.push(value);
        k += 1.0;
    }
    Ok(Some(values))
}

// ── Numbers ──────────────────────────────────────────────────────────

/// Shortest decimal rendering; `-0` prints as `0`.
pub fn format_number(value: f64) -> String {
    format!("{}", value + 0.0)
}
