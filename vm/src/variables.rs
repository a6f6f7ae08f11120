//! Global variables and variable-pointer resolution.
//!
//! Reads search the addressed frame's temporaries first, then globals.
//! Variable pointers are chased transparently on read; assignment through a
//! pointer writes at the scope the chain bottoms out in.

use std::collections::BTreeMap;

use skein_types::{Value, VariablePointer};

use crate::callstack::CallStack;
use crate::error::StoryError;
use crate::node::VariableAssignment;

/// The global variable store. Temporaries live on call-stack frames; this
/// type only coordinates between the two scopes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariablesStore {
    /// Global name → value.
    pub globals: BTreeMap<String, Value>,
}

impl VariablesStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a global with this name exists.
    #[must_use]
    pub fn has_global(&self, name: &str) -> bool {
        self.globals.contains_key(name)
    }

    /// Write a global directly.
    pub fn set_global(&mut self, name: &str, value: Value) {
        self.globals.insert(name.to_string(), value);
    }

    /// Read a variable, chasing variable pointers to the referenced value.
    #[must_use]
    pub fn get(&self, name: &str, callstack: &CallStack) -> Option<Value> {
        self.get_with_context(name, -1, callstack)
    }

    /// Read a variable in an explicit context (−1 top frame, 0 global,
    /// n ≥ 1 a specific frame).
    #[must_use]
    pub fn get_with_context(&self, name: &str, context: i32, callstack: &CallStack) -> Option<Value> {
        let raw = self.raw(name, context, callstack)?;
        match raw {
            Value::VariablePointer(vp) => {
                let resolved = self.resolve_pointer(&vp, callstack);
                self.raw(&resolved.name, resolved.context_index, callstack)
            }
            other => Some(other),
        }
    }

    /// The stored value without pointer chasing.
    fn raw(&self, name: &str, context: i32, callstack: &CallStack) -> Option<Value> {
        if context != 0 {
            if let Some(v) = callstack.temporary(name, context) {
                return Some(v.clone());
            }
        }
        if context == 0 || context == -1 {
            if let Some(v) = self.globals.get(name) {
                return Some(v.clone());
            }
        }
        None
    }

    /// Store a popped value per an assignment instruction.
    ///
    /// Declarations resolve incoming variable pointers to a concrete scope
    /// before storing. Re-assignments follow existing pointer chains and
    /// write at the root variable's scope.
    ///
    /// # Errors
    ///
    /// Re-assigning an undeclared temporary is an error.
    pub fn assign(
        &mut self,
        assignment: &VariableAssignment,
        mut value: Value,
        callstack: &mut CallStack,
    ) -> Result<(), StoryError> {
        let mut name = assignment.name.clone();
        let mut context = -1;
        let mut set_global;

        if assignment.new_declaration {
            set_global = assignment.global;
        } else {
            // Assignments through `re` may still address a global that was
            // declared as one even when the instruction says temp.
            set_global = self.has_global(&name) || assignment.global;
        }

        if assignment.new_declaration {
            if let Value::VariablePointer(vp) = &value {
                value = Value::VariablePointer(self.resolve_pointer(vp, callstack));
            }
        } else {
            // Follow any chain of pointers to the root variable.
            while let Some(Value::VariablePointer(vp)) = self.raw(&name, context, callstack) {
                name = vp.name;
                context = vp.context_index;
                set_global = context == 0;
            }
        }

        if set_global {
            self.set_global(&name, value);
            Ok(())
        } else {
            callstack.set_temporary(&name, value, assignment.new_declaration, context)
        }
    }

    /// Fill in the concrete scope of a variable pointer, chasing any
    /// pointers the name currently holds.
    #[must_use]
    pub fn resolve_pointer(&self, pointer: &VariablePointer, callstack: &CallStack) -> VariablePointer {
        let context = if pointer.context_index == -1 {
            self.context_index_of(&pointer.name, callstack)
        } else {
            pointer.context_index
        };

        match self.raw(&pointer.name, context, callstack) {
            Some(Value::VariablePointer(next)) => self.resolve_pointer(&next, callstack),
            _ => VariablePointer::new(&pointer.name, context),
        }
    }

    /// Which scope a name lives in: 0 for global, n ≥ 1 for a frame.
    fn context_index_of(&self, name: &str, callstack: &CallStack) -> i32 {
        if self.has_global(name) {
            0
        } else {
            callstack.context_for_variable(name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::ContentTree;

    fn fixtures() -> (VariablesStore, CallStack) {
        let tree = ContentTree::new();
        (VariablesStore::new(), CallStack::new(tree.root()))
    }

    fn declare_global(name: &str) -> VariableAssignment {
        VariableAssignment {
            name: name.into(),
            new_declaration: true,
            global: true,
        }
    }

    fn reassign(name: &str) -> VariableAssignment {
        VariableAssignment {
            name: name.into(),
            new_declaration: false,
            global: false,
        }
    }

    #[test]
    fn temporaries_shadow_globals() {
        let (mut vars, mut cs) = fixtures();
        vars.assign(&declare_global("x"), Value::Int(1), &mut cs)
            .unwrap();
        cs.set_temporary("x", Value::Int(2), true, -1).unwrap();
        assert_eq!(vars.get("x", &cs), Some(Value::Int(2)));
        assert_eq!(vars.get_with_context("x", 0, &cs), Some(Value::Int(1)));
    }

    #[test]
    fn pointer_reads_are_transparent() {
        let (mut vars, mut cs) = fixtures();
        vars.assign(&declare_global("target"), Value::Int(9), &mut cs)
            .unwrap();
        vars.assign(
            &declare_global("ref"),
            Value::VariablePointer(VariablePointer::new("target", -1)),
            &mut cs,
        )
        .unwrap();

        assert_eq!(vars.get("ref", &cs), Some(Value::Int(9)));
        // Declaration resolved the scope index.
        assert_eq!(
            vars.globals["ref"],
            Value::VariablePointer(VariablePointer::new("target", 0))
        );
    }

    #[test]
    fn assignment_through_a_pointer_writes_the_root() {
        let (mut vars, mut cs) = fixtures();
        vars.assign(&declare_global("target"), Value::Int(1), &mut cs)
            .unwrap();
        vars.assign(
            &declare_global("ref"),
            Value::VariablePointer(VariablePointer::new("target", -1)),
            &mut cs,
        )
        .unwrap();

        vars.assign(&reassign("ref"), Value::Int(42), &mut cs).unwrap();
        assert_eq!(vars.globals["target"], Value::Int(42));
        // The pointer itself is untouched.
        assert!(matches!(vars.globals["ref"], Value::VariablePointer(_)));
    }

    #[test]
    fn pointer_into_a_stack_frame() {
        let (mut vars, mut cs) = fixtures();
        cs.set_temporary("local", Value::Int(5), true, -1).unwrap();

        let resolved = vars.resolve_pointer(&VariablePointer::new("local", -1), &cs);
        assert_eq!(resolved.context_index, 1);
        assert_eq!(
            vars.get_with_context("local", resolved.context_index, &cs),
            Some(Value::Int(5))
        );
    }

    #[test]
    fn missing_variable_reads_as_none() {
        let (vars, cs) = fixtures();
        assert_eq!(vars.get("ghost", &cs), None);
    }
}
