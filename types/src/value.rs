//! Typed runtime values.
//!
//! Everything the machine pushes onto its evaluation stack, stores in a
//! variable, or emits to the output stream is a [`Value`]. Values are
//! immutable snapshots: assignment and stack traffic clone them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::list::StoryList;
use crate::path::Path;

/// Discriminant of a [`Value`], used in cast and promotion rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    /// The no-result sentinel.
    Void,
    /// Boolean.
    Bool,
    /// Integer.
    Int,
    /// Floating point.
    Float,
    /// Text.
    Str,
    /// List value.
    List,
    /// Divert target (a content path).
    DivertTarget,
    /// Pointer to a variable in some scope.
    VariablePointer,
}

/// A reference to a variable in a particular scope.
///
/// `context_index` is 0 for a global, `n ≥ 1` for the n-th call-stack frame
/// (1-based), and −1 while the owning scope has not been resolved yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariablePointer {
    /// Name of the referenced variable.
    pub name: String,
    /// Scope: −1 unresolved, 0 global, ≥1 call-stack frame (1-based).
    pub context_index: i32,
}

impl VariablePointer {
    /// Build a pointer with an explicit context index.
    #[must_use]
    pub fn new(name: &str, context_index: i32) -> Self {
        Self {
            name: name.to_string(),
            context_index,
        }
    }
}

/// A typed runtime value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// "No useful return" from a function; never rendered.
    Void,
    /// Boolean.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Floating point.
    Float(f64),
    /// Text atom. The single newline atom `"\n"` delimits output lines.
    Str(String),
    /// List value.
    List(StoryList),
    /// A content path usable as a divert target.
    DivertTarget(Path),
    /// A by-reference handle on a variable.
    VariablePointer(VariablePointer),
}

impl Value {
    /// The value's kind.
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Void => ValueKind::Void,
            Self::Bool(_) => ValueKind::Bool,
            Self::Int(_) => ValueKind::Int,
            Self::Float(_) => ValueKind::Float,
            Self::Str(_) => ValueKind::Str,
            Self::List(_) => ValueKind::List,
            Self::DivertTarget(_) => ValueKind::DivertTarget,
            Self::VariablePointer(_) => ValueKind::VariablePointer,
        }
    }

    /// Truthiness: zero, false, empty string, and empty list are false;
    /// divert targets and void are never truthy.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Void => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::List(l) => !l.is_empty(),
            Self::DivertTarget(_) => false,
            Self::VariablePointer(_) => true,
        }
    }

    /// Whether this is the newline text atom.
    #[must_use]
    pub fn is_newline(&self) -> bool {
        matches!(self, Self::Str(s) if s == "\n")
    }

    /// Whether this is a text atom made only of spaces and tabs (the empty
    /// string counts).
    #[must_use]
    pub fn is_inline_whitespace(&self) -> bool {
        matches!(self, Self::Str(s) if s.chars().all(|c| c == ' ' || c == '\t'))
    }

    /// Numeric view as a float, for int/float/bool operands.
    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Numeric view as an int, for int/bool operands (floats truncate).
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Float(f) => Some(*f as i64),
            Self::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// The canonical string cast used for output and `+` concatenation.
    ///
    /// Floats print with the shortest representation that round-trips
    /// (`2` for `2.0`, `2.5` for `2.5`); lists print their items sorted by
    /// value; void prints nothing.
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            Self::Void => String::new(),
            Self::Bool(b) => if *b { "true" } else { "false" }.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Str(s) => s.clone(),
            Self::List(l) => l.to_text(),
            Self::DivertTarget(p) => p.to_string(),
            Self::VariablePointer(vp) => vp.name.clone(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}
