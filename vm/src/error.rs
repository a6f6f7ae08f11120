//! Error taxonomy for the story machine.
//!
//! Errors fall into four kinds: load-time document problems, runtime faults
//! raised by the step engine, call-stack discipline violations, and saved
//! state that no longer matches the story tree. Warnings (undefined variable
//! reads, tolerated save mismatches) are not errors; they accumulate on the
//! state and never halt execution.

use skein_types::ValueKind;

/// Broad classification of a [`StoryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or structurally invalid story document.
    Load,
    /// Fault raised while stepping (arithmetic, types, resolution).
    Runtime,
    /// Call-stack or thread discipline violation.
    Stack,
    /// Saved state incompatible with the current story tree.
    State,
}

/// Any error the runtime can surface to the host.
#[derive(Debug, thiserror::Error)]
pub enum StoryError {
    /// The story document is not valid JSON.
    #[error("story document is not valid JSON: {0}")]
    BadJson(#[from] serde_json::Error),
    /// A token in the story document has no known meaning.
    #[error("unknown token in story document: {0}")]
    UnknownToken(String),
    /// The story document violates a structural rule.
    #[error("malformed story document: {0}")]
    BadStructure(String),

    /// Integer or float division by zero.
    #[error("division by zero")]
    DivisionByZero,
    /// Modulo by zero.
    #[error("modulo by zero")]
    ModuloByZero,
    /// A native operator received operands it cannot combine.
    #[error("operator {op} cannot be applied to {lhs:?} and {rhs:?}")]
    BadOperands {
        /// The operator token.
        op: &'static str,
        /// Kind of the left operand.
        lhs: ValueKind,
        /// Kind of the right operand.
        rhs: ValueKind,
    },
    /// An operand of an unexpected kind was popped.
    #[error("expected a {expected} operand for {context}, found {found:?}")]
    BadOperand {
        /// What the instruction needed.
        expected: &'static str,
        /// The instruction or command.
        context: &'static str,
        /// Kind of the value actually found.
        found: ValueKind,
    },
    /// A required operand was missing from the evaluation stack.
    #[error("evaluation stack underflow during {0}")]
    StackUnderflow(&'static str),
    /// A path did not resolve to content.
    #[error("path does not resolve: {0}")]
    UnresolvedPath(String),
    /// A divert through a variable found no usable target.
    #[error("variable divert through '{name}': {reason}")]
    BadVariableDivert {
        /// The variable named by the divert.
        name: String,
        /// Why no target was produced.
        reason: String,
    },
    /// Assignment to a temporary that was never declared.
    #[error("cannot assign to undeclared temporary '{0}'")]
    UndeclaredTemporary(String),
    /// An external call had no binding and no fallback container.
    #[error("external function '{0}' is not bound and has no fallback")]
    UnboundExternal(String),
    /// An external function was bound twice.
    #[error("external function '{0}' is already bound")]
    AlreadyBound(String),
    /// A value could not cross the host boundary.
    #[error("cannot marshal a {0:?} value across the external function boundary")]
    Unmarshalable(ValueKind),
    /// An external function reported a failure.
    #[error("external function '{name}' failed: {message}")]
    ExternalFailed {
        /// The bound name.
        name: String,
        /// The host's error message.
        message: String,
    },
    /// A random range was empty or inverted.
    #[error("random range [{min}, {max}] is empty")]
    BadRandomRange {
        /// Lower bound popped.
        min: i64,
        /// Upper bound popped.
        max: i64,
    },
    /// A named function container does not exist.
    #[error("story has no function named '{0}'")]
    NoSuchFunction(String),
    /// A named list definition does not exist.
    #[error("story has no list definition named '{0}'")]
    NoSuchList(String),
    /// A named flow does not exist.
    #[error("story has no flow named '{0}'")]
    NoSuchFlow(String),
    /// The default flow is permanent.
    #[error("the default flow cannot be removed")]
    CannotRemoveDefaultFlow,

    /// A pop did not match the frame on top of the stack.
    #[error("mismatched pop: expected a {expected} frame, found {found}")]
    MismatchedPop {
        /// Frame kind the pop asked for.
        expected: &'static str,
        /// Frame kind actually on top.
        found: &'static str,
    },
    /// The root frame cannot be popped.
    #[error("cannot pop the root frame")]
    PopOfRootFrame,
    /// The last thread cannot be popped.
    #[error("cannot pop the last remaining thread")]
    PopOfLastThread,
    /// A choice index was out of range.
    #[error("choice index {index} out of range ({count} available)")]
    ChoiceOutOfRange {
        /// The requested index.
        index: usize,
        /// How many choices exist.
        count: usize,
    },
    /// Choosing from an ended thread requires a single live thread.
    #[error("cannot restore a choice thread while {0} threads are live")]
    AmbiguousChoiceThread(usize),

    /// A save document cannot be applied to this story.
    #[error("saved state is incompatible: {0}")]
    IncompatibleState(String),
}

impl StoryError {
    /// Classify this error per the runtime's error taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BadJson(_) | Self::UnknownToken(_) | Self::BadStructure(_) => ErrorKind::Load,
            Self::DivisionByZero
            | Self::ModuloByZero
            | Self::BadOperands { .. }
            | Self::BadOperand { .. }
            | Self::StackUnderflow(_)
            | Self::UnresolvedPath(_)
            | Self::BadVariableDivert { .. }
            | Self::UndeclaredTemporary(_)
            | Self::UnboundExternal(_)
            | Self::AlreadyBound(_)
            | Self::Unmarshalable(_)
            | Self::ExternalFailed { .. }
            | Self::BadRandomRange { .. }
            | Self::NoSuchFunction(_)
            | Self::NoSuchList(_)
            | Self::NoSuchFlow(_)
            | Self::CannotRemoveDefaultFlow => ErrorKind::Runtime,
            Self::MismatchedPop { .. }
            | Self::PopOfRootFrame
            | Self::PopOfLastThread
            | Self::ChoiceOutOfRange { .. }
            | Self::AmbiguousChoiceThread(_) => ErrorKind::Stack,
            Self::IncompatibleState(_) => ErrorKind::State,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_partition_the_taxonomy() {
        assert_eq!(StoryError::DivisionByZero.kind(), ErrorKind::Runtime);
        assert_eq!(StoryError::PopOfRootFrame.kind(), ErrorKind::Stack);
        assert_eq!(
            StoryError::UnknownToken("x".into()).kind(),
            ErrorKind::Load
        );
        assert_eq!(
            StoryError::IncompatibleState("flow gone".into()).kind(),
            ErrorKind::State
        );
    }
}
