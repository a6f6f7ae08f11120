//! Built-in operators.
//!
//! Operators pop their operands from the evaluation stack right-to-left, so
//! the first-pushed argument is the first logical argument. Type promotion:
//! same numeric types stay, mixed int/float promotes to float, booleans
//! coerce to ints under arithmetic, and `+` with a string operand
//! concatenates canonical casts.

use skein_types::{Value, ValueKind};

use crate::error::StoryError;

/// A built-in operator, named by its wire token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeOp {
    /// `+`
    Add,
    /// `-`
    Subtract,
    /// `*`
    Multiply,
    /// `/`
    Divide,
    /// `%`
    Mod,
    /// `_` (unary negate)
    Negate,
    /// `==`
    Equal,
    /// `>`
    Greater,
    /// `<`
    Less,
    /// `>=`
    GreaterOrEqual,
    /// `<=`
    LessOrEqual,
    /// `!=`
    NotEqual,
    /// `!` (unary not)
    Not,
    /// `&&`
    And,
    /// `||`
    Or,
    /// `MIN`
    Min,
    /// `MAX`
    Max,
    /// `POW`
    Pow,
    /// `FLOOR`
    Floor,
    /// `CEILING`
    Ceiling,
    /// `INT`
    Int,
    /// `FLOAT`
    Float,
    /// `^` (list intersection; encoded `L^` to keep `^` free for text)
    Intersect,
    /// `?` (list containment)
    Has,
    /// `!?` (list non-containment)
    Hasnt,
}

impl NativeOp {
    /// Parse an operator token. `L^` is the document encoding of the
    /// intersection operator.
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "+" => Self::Add,
            "-" => Self::Subtract,
            "*" => Self::Multiply,
            "/" => Self::Divide,
            "%" => Self::Mod,
            "_" => Self::Negate,
            "==" => Self::Equal,
            ">" => Self::Greater,
            "<" => Self::Less,
            ">=" => Self::GreaterOrEqual,
            "<=" => Self::LessOrEqual,
            "!=" => Self::NotEqual,
            "!" => Self::Not,
            "&&" => Self::And,
            "||" => Self::Or,
            "MIN" => Self::Min,
            "MAX" => Self::Max,
            "POW" => Self::Pow,
            "FLOOR" => Self::Floor,
            "CEILING" => Self::Ceiling,
            "INT" => Self::Int,
            "FLOAT" => Self::Float,
            "^" | "L^" => Self::Intersect,
            "?" => Self::Has,
            "!?" => Self::Hasnt,
            _ => return None,
        })
    }

    /// The operator's canonical token.
    #[must_use]
    pub fn token(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Mod => "%",
            Self::Negate => "_",
            Self::Equal => "==",
            Self::Greater => ">",
            Self::Less => "<",
            Self::GreaterOrEqual => ">=",
            Self::LessOrEqual => "<=",
            Self::NotEqual => "!=",
            Self::Not => "!",
            Self::And => "&&",
            Self::Or => "||",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Pow => "POW",
            Self::Floor => "FLOOR",
            Self::Ceiling => "CEILING",
            Self::Int => "INT",
            Self::Float => "FLOAT",
            Self::Intersect => "^",
            Self::Has => "?",
            Self::Hasnt => "!?",
        }
    }

    /// Number of operands.
    #[must_use]
    pub fn arity(self) -> usize {
        match self {
            Self::Negate | Self::Not | Self::Floor | Self::Ceiling | Self::Int | Self::Float => 1,
            _ => 2,
        }
    }

    /// Apply the operator to operands in logical order.
    ///
    /// # Errors
    ///
    /// Arithmetic faults (division/modulo by zero) and operand-type
    /// mismatches are runtime errors.
    pub fn call(self, params: &[Value]) -> Result<Value, StoryError> {
        debug_assert_eq!(params.len(), self.arity());
        if self.arity() == 1 {
            self.call_unary(&params[0])
        } else {
            self.call_binary(&params[0], &params[1])
        }
    }

    fn call_unary(self, v: &Value) -> Result<Value, StoryError> {
        match self {
            Self::Negate => match v {
                Value::Int(i) => Ok(Value::Int(-i)),
                Value::Float(f) => Ok(Value::Float(-f)),
                Value::Bool(b) => Ok(Value::Int(-i64::from(*b))),
                other => Err(self.bad_unary(other)),
            },
            Self::Not => match v {
                Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_) | Value::List(_) => {
                    Ok(Value::Bool(!v.is_truthy()))
                }
                other => Err(self.bad_unary(other)),
            },
            Self::Floor => match v {
                Value::Int(i) => Ok(Value::Int(*i)),
                Value::Float(f) => Ok(Value::Float(f.floor())),
                Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
                other => Err(self.bad_unary(other)),
            },
            Self::Ceiling => match v {
                Value::Int(i) => Ok(Value::Int(*i)),
                Value::Float(f) => Ok(Value::Float(f.ceil())),
                Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
                other => Err(self.bad_unary(other)),
            },
            Self::Int => v.as_int().map(Value::Int).ok_or_else(|| self.bad_unary(v)),
            Self::Float => v
                .as_float()
                .map(Value::Float)
                .ok_or_else(|| self.bad_unary(v)),
            _ => unreachable!("binary operator dispatched as unary"),
        }
    }

    fn call_binary(self, a: &Value, b: &Value) -> Result<Value, StoryError> {
        match self {
            Self::Add => self.add(a, b),
            Self::Subtract => {
                if let (Value::List(la), Value::List(lb)) = (a, b) {
                    return Ok(Value::List(la.difference(lb)));
                }
                self.arith(a, b, |x, y| Ok(x.wrapping_sub(y)), |x, y| Ok(x - y))
            }
            Self::Multiply => self.arith(a, b, |x, y| Ok(x.wrapping_mul(y)), |x, y| Ok(x * y)),
            Self::Divide => self.arith(
                a,
                b,
                |x, y| {
                    if y == 0 {
                        Err(StoryError::DivisionByZero)
                    } else {
                        Ok(x / y)
                    }
                },
                |x, y| {
                    if y == 0.0 {
                        Err(StoryError::DivisionByZero)
                    } else {
                        Ok(x / y)
                    }
                },
            ),
            Self::Mod => self.arith(
                a,
                b,
                |x, y| {
                    if y == 0 {
                        Err(StoryError::ModuloByZero)
                    } else {
                        Ok(x % y)
                    }
                },
                |x, y| {
                    if y == 0.0 {
                        Err(StoryError::ModuloByZero)
                    } else {
                        Ok(x % y)
                    }
                },
            ),
            Self::Equal => Ok(Value::Bool(values_equal(a, b))),
            Self::NotEqual => Ok(Value::Bool(!values_equal(a, b))),
            Self::Greater => self.compare(a, b, |o| o == std::cmp::Ordering::Greater),
            Self::Less => self.compare(a, b, |o| o == std::cmp::Ordering::Less),
            Self::GreaterOrEqual => self.compare(a, b, |o| o != std::cmp::Ordering::Less),
            Self::LessOrEqual => self.compare(a, b, |o| o != std::cmp::Ordering::Greater),
            Self::And => Ok(Value::Bool(a.is_truthy() && b.is_truthy())),
            Self::Or => Ok(Value::Bool(a.is_truthy() || b.is_truthy())),
            Self::Min => self.arith(a, b, |x, y| Ok(x.min(y)), |x, y| Ok(x.min(y))),
            Self::Max => self.arith(a, b, |x, y| Ok(x.max(y)), |x, y| Ok(x.max(y))),
            Self::Pow => match (a.as_float(), b.as_float()) {
                (Some(x), Some(y)) => Ok(Value::Float(x.powf(y))),
                _ => Err(self.bad_binary(a, b)),
            },
            Self::Intersect => match (a, b) {
                (Value::List(la), Value::List(lb)) => Ok(Value::List(la.intersect(lb))),
                _ => Err(self.bad_binary(a, b)),
            },
            Self::Has => match (a, b) {
                (Value::List(la), Value::List(lb)) => Ok(Value::Bool(la.contains_all(lb))),
                (Value::Str(sa), Value::Str(sb)) => Ok(Value::Bool(sa.contains(sb.as_str()))),
                _ => Err(self.bad_binary(a, b)),
            },
            Self::Hasnt => match (a, b) {
                (Value::List(la), Value::List(lb)) => Ok(Value::Bool(!la.contains_all(lb))),
                (Value::Str(sa), Value::Str(sb)) => Ok(Value::Bool(!sa.contains(sb.as_str()))),
                _ => Err(self.bad_binary(a, b)),
            },
            _ => unreachable!("unary operator dispatched as binary"),
        }
    }

    fn add(self, a: &Value, b: &Value) -> Result<Value, StoryError> {
        if matches!(a, Value::Str(_)) || matches!(b, Value::Str(_)) {
            return Ok(Value::Str(a.to_text() + &b.to_text()));
        }
        if let (Value::List(la), Value::List(lb)) = (a, b) {
            return Ok(Value::List(la.union(lb)));
        }
        self.arith(a, b, |x, y| Ok(x.wrapping_add(y)), |x, y| Ok(x + y))
    }

    /// Numeric arithmetic with int/float promotion; booleans count as ints.
    fn arith(
        self,
        a: &Value,
        b: &Value,
        int_op: impl Fn(i64, i64) -> Result<i64, StoryError>,
        float_op: impl Fn(f64, f64) -> Result<f64, StoryError>,
    ) -> Result<Value, StoryError> {
        let int_like =
            |v: &Value| matches!(v, Value::Int(_) | Value::Bool(_));
        if int_like(a) && int_like(b) {
            let (x, y) = (a.as_int().unwrap(), b.as_int().unwrap());
            return int_op(x, y).map(Value::Int);
        }
        match (a.as_float(), b.as_float()) {
            (Some(x), Some(y)) => float_op(x, y).map(Value::Float),
            _ => Err(self.bad_binary(a, b)),
        }
    }

    fn compare(
        self,
        a: &Value,
        b: &Value,
        test: impl Fn(std::cmp::Ordering) -> bool,
    ) -> Result<Value, StoryError> {
        match (a.as_float(), b.as_float()) {
            (Some(x), Some(y)) => {
                let ordering = x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal);
                Ok(Value::Bool(test(ordering)))
            }
            _ => Err(self.bad_binary(a, b)),
        }
    }

    fn bad_unary(self, v: &Value) -> StoryError {
        StoryError::BadOperand {
            expected: "numeric",
            context: self.token(),
            found: v.kind(),
        }
    }

    fn bad_binary(self, a: &Value, b: &Value) -> StoryError {
        StoryError::BadOperands {
            op: self.token(),
            lhs: a.kind(),
            rhs: b.kind(),
        }
    }
}

/// Equality across value families: mixed numerics compare by value, matching
/// families compare structurally, anything else is unequal.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::List(x), Value::List(y)) => x.items == y.items,
        (Value::DivertTarget(x), Value::DivertTarget(y)) => x == y,
        (Value::Void, Value::Void) => true,
        _ => match (a.kind(), b.kind()) {
            (
                ValueKind::Int | ValueKind::Float | ValueKind::Bool,
                ValueKind::Int | ValueKind::Float | ValueKind::Bool,
            ) => match (a, b) {
                (Value::Int(x), Value::Int(y)) => x == y,
                _ => a.as_float() == b.as_float(),
            },
            _ => false,
        },
    }
}
