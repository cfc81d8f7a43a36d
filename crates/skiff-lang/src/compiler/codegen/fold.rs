//! Compile-time constant folding.
//!
//! Folding tries to reduce a subtree to one [`Value`]. It is idempotent and
//! has no side effects; folded values are routed through the constant pool
//! only when the surrounding expression is actually emitted. `const`
//! declarations rely on folding for their values, so a `const` bound to one
//! folds wherever it is referenced.

use super::scope::BlockStack;
use crate::ast::Node;
use crate::lexer::TokenKind;
use crate::value::Value;

/// Attempts to fold `node` to a single value. `blocks` supplies `const`
/// bindings for identifiers; the walk may upgrade captured locals exactly
/// like regular resolution does.
pub(super) fn const_fold(blocks: &mut BlockStack, node: &Node) -> Option<Value> {
    match node {
        Node::Nil { .. } => Some(Value::Nil),
        Node::Bool { value, .. } => Some(Value::Bool(*value)),
        Node::Number { lexeme, .. } => lexeme.parse::<f64>().ok().map(Value::Number),
        Node::String { value, .. } => Some(Value::String(value.clone())),
        Node::Id { name, .. } => {
            let info = blocks.resolve(name)?;
            if info.is_const {
                info.value
            } else {
                None
            }
        }
        Node::Unary { op, right, .. } => {
            let value = const_fold(blocks, right)?;
            match (op, value) {
                (TokenKind::Minus, Value::Number(n)) => Some(Value::Number(-n)),
                (TokenKind::Not | TokenKind::Bang, Value::Bool(b)) => Some(Value::Bool(!b)),
                _ => None,
            }
        }
        Node::Binary {
            op, left, right, ..
        } => {
            let left = const_fold(blocks, left)?;
            let right = const_fold(blocks, right)?;
            fold_binary(*op, left, right)
        }
        _ => None,
    }
}

/// Folds a binary operation over two already-folded operands. The operands
/// must be of identical type; any combination outside the table fails.
fn fold_binary(op: TokenKind, left: Value, right: Value) -> Option<Value> {
    use TokenKind::*;
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match op {
            Plus => Some(Value::Number(a + b)),
            Minus => Some(Value::Number(a - b)),
            Star => Some(Value::Number(a * b)),
            Slash => Some(Value::Number(a / b)),
            StarStar => Some(Value::Number(a.powf(b))),
            Lt => Some(Value::Bool(a < b)),
            LtEq => Some(Value::Bool(a <= b)),
            Gt => Some(Value::Bool(a > b)),
            GtEq => Some(Value::Bool(a >= b)),
            EqEq => Some(Value::Bool(a == b)),
            _ => None,
        },
        (Value::Bool(a), Value::Bool(b)) => match op {
            // Both sides are already values here, so the short-circuit
            // collapses to the algebraic result.
            AmpAmp => Some(Value::Bool(a && b)),
            PipePipe => Some(Value::Bool(a || b)),
            _ => None,
        },
        (Value::String(a), Value::String(b)) => match op {
            Plus => Some(Value::String(a + &b)),
            EqEq => Some(Value::Bool(a == b)),
            BangEq => Some(Value::Bool(a != b)),
            _ => None,
        },
        _ => None,
    }
}
