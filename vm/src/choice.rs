//! Choice points and the choices they generate.
//!
//! A choice point is static content; the choices the host sees are built at
//! runtime from the point's flags and operands popped off the evaluation
//! stack, so one point can yield different choices depending on state.

use skein_types::Path;

use crate::callstack::Thread;

/// Flag bit: a condition is popped and gates the choice.
pub const FLAG_CONDITION: u32 = 1;
/// Flag bit: a start-content string is popped.
pub const FLAG_START_CONTENT: u32 = 2;
/// Flag bit: a choice-only string is popped.
pub const FLAG_CHOICE_ONLY: u32 = 4;
/// Flag bit: the choice is an invisible default.
pub const FLAG_INVISIBLE_DEFAULT: u32 = 8;
/// Flag bit: the choice is offered at most once.
pub const FLAG_ONCE_ONLY: u32 = 16;

/// Static description of a branching point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoicePoint {
    /// Target path, usually relative to the point itself.
    pub path_on_choice: Path,
    /// Whether a popped condition gates the choice.
    pub has_condition: bool,
    /// Whether a start-content string is popped.
    pub has_start_content: bool,
    /// Whether a choice-only string is popped.
    pub has_choice_only_content: bool,
    /// Whether the choice is an invisible default.
    pub invisible_default: bool,
    /// Whether the choice is offered at most once.
    pub once_only: bool,
}

impl ChoicePoint {
    /// A choice point with no flags set.
    #[must_use]
    pub fn new(path_on_choice: Path) -> Self {
        Self {
            path_on_choice,
            has_condition: false,
            has_start_content: false,
            has_choice_only_content: false,
            invisible_default: false,
            once_only: true,
        }
    }

    /// Decode the document flag bitfield.
    pub fn set_flags(&mut self, flags: u32) {
        self.has_condition = flags & FLAG_CONDITION != 0;
        self.has_start_content = flags & FLAG_START_CONTENT != 0;
        self.has_choice_only_content = flags & FLAG_CHOICE_ONLY != 0;
        self.invisible_default = flags & FLAG_INVISIBLE_DEFAULT != 0;
        self.once_only = flags & FLAG_ONCE_ONLY != 0;
    }

    /// Encode the document flag bitfield.
    #[must_use]
    pub fn flags(&self) -> u32 {
        let mut flags = 0;
        if self.has_condition {
            flags |= FLAG_CONDITION;
        }
        if self.has_start_content {
            flags |= FLAG_START_CONTENT;
        }
        if self.has_choice_only_content {
            flags |= FLAG_CHOICE_ONLY;
        }
        if self.invisible_default {
            flags |= FLAG_INVISIBLE_DEFAULT;
        }
        if self.once_only {
            flags |= FLAG_ONCE_ONLY;
        }
        flags
    }
}

/// A runtime choice offered to the host.
#[derive(Debug, Clone, PartialEq)]
pub struct Choice {
    /// Text presented to the player.
    pub text: String,
    /// Stable index within the current batch.
    pub index: usize,
    /// Absolute path execution diverts to when chosen.
    pub target_path: Path,
    /// Path of the generating choice point.
    pub source_path: String,
    /// Identity of the thread that generated the choice.
    pub thread_index: i64,
    /// Snapshot of the generating thread, restored when the thread has
    /// since ended.
    pub thread_at_generation: Option<Thread>,
    /// Whether this is an invisible default.
    pub invisible_default: bool,
    /// Tags attached to the choice.
    pub tags: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_bits_round_trip() {
        for bits in 0..32 {
            let mut cp = ChoicePoint::new(Path::from_str(".^.c-0"));
            cp.set_flags(bits);
            assert_eq!(cp.flags(), bits, "bitfield {bits}");
        }
    }

    #[test]
    fn default_point_is_once_only() {
        let cp = ChoicePoint::new(Path::from_str("x"));
        assert!(cp.once_only);
        assert!(!cp.has_condition);
    }
}
