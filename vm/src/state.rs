//! All mutable runtime state of a story.
//!
//! Everything that changes while a story runs lives here: the named flows
//! (each with its call stack, output, and choices), the evaluation stack,
//! globals, visit bookkeeping, and the seeded randomness. The content tree
//! itself is never mutated after load.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use skein_types::Value;

use crate::callstack::{CallStack, FrameKind};
use crate::error::StoryError;
use crate::flow::{Flow, DEFAULT_FLOW};
use crate::node::NodeId;
use crate::outstream::{self, StreamItem};
use crate::pointer::Pointer;
use crate::variables::VariablesStore;

/// Version stamp written into save documents.
pub const SAVE_VERSION: i32 = 10;
/// Story-format version stamp written into save documents.
pub const FORMAT_VERSION: i32 = 21;

/// The mutable state of one story.
#[derive(Debug, Clone, PartialEq)]
pub struct StoryState {
    /// Named flows; always contains the current flow.
    pub flows: BTreeMap<String, Flow>,
    /// Name of the current flow.
    pub current_flow_name: String,
    /// The shared evaluation stack.
    pub evaluation_stack: Vec<Value>,
    /// Global variables.
    pub variables: VariablesStore,
    /// Pending divert applied by the next advance.
    pub diverted_pointer: Pointer,
    /// Visit counts per counted container.
    pub visit_counts: BTreeMap<NodeId, i32>,
    /// Latest turn index per turn-counted container.
    pub turn_indices: BTreeMap<NodeId, i32>,
    /// Number of choices taken so far; −1 before the first.
    pub current_turn_index: i32,
    /// Base seed of the story's randomness.
    pub story_seed: i64,
    /// The previous raw random draw, folded into the next seed.
    pub previous_random: i64,
    /// Latch set by the fork command: the next divert forks the thread.
    pub next_divert_forks: bool,
    /// Errors recorded by the step engine.
    pub errors: Vec<String>,
    /// Warnings; never halt execution.
    pub warnings: Vec<String>,

    main_container: NodeId,
}

impl StoryState {
    /// Fresh state positioned at the start of the main container.
    #[must_use]
    pub fn new(main_container: NodeId) -> Self {
        let mut flows = BTreeMap::new();
        flows.insert(DEFAULT_FLOW.to_string(), Flow::new(DEFAULT_FLOW, main_container));
        Self {
            flows,
            current_flow_name: DEFAULT_FLOW.to_string(),
            evaluation_stack: Vec::new(),
            variables: VariablesStore::new(),
            diverted_pointer: Pointer::NULL,
            visit_counts: BTreeMap::new(),
            turn_indices: BTreeMap::new(),
            current_turn_index: -1,
            story_seed: i64::from(rand::thread_rng().gen_range(0..100)),
            previous_random: 0,
            next_divert_forks: false,
            errors: Vec::new(),
            warnings: Vec::new(),
            main_container,
        }
    }

    /// The story's main container.
    #[must_use]
    pub fn main_container(&self) -> NodeId {
        self.main_container
    }

    /// Rewind to the start of the story, keeping globals and counts.
    pub fn go_to_start(&mut self) {
        self.flow_mut().callstack.reset();
    }

    // ---- Flows ----

    /// The current flow.
    #[must_use]
    pub fn flow(&self) -> &Flow {
        &self.flows[&self.current_flow_name]
    }

    /// The current flow, mutably.
    pub fn flow_mut(&mut self) -> &mut Flow {
        self.flows
            .get_mut(&self.current_flow_name)
            .expect("current flow exists")
    }

    /// Switch to a named flow, creating it on first use.
    pub fn switch_flow(&mut self, name: &str) {
        self.flows
            .entry(name.to_string())
            .or_insert_with(|| Flow::new(name, self.main_container));
        self.current_flow_name = name.to_string();
    }

    /// Switch back to the default flow.
    pub fn switch_to_default_flow(&mut self) {
        self.switch_flow(DEFAULT_FLOW);
    }

    /// Remove a named flow. Removing the current flow first switches to the
    /// default.
    ///
    /// # Errors
    ///
    /// The default flow cannot be removed; an unknown name is an error.
    pub fn remove_flow(&mut self, name: &str) -> Result<(), StoryError> {
        if name == DEFAULT_FLOW {
            return Err(StoryError::CannotRemoveDefaultFlow);
        }
        if !self.flows.contains_key(name) {
            return Err(StoryError::NoSuchFlow(name.to_string()));
        }
        if name == self.current_flow_name {
            self.switch_to_default_flow();
        }
        self.flows.remove(name);
        Ok(())
    }

    // ---- Pointers and the call stack ----

    /// The current flow's call stack.
    #[must_use]
    pub fn callstack(&self) -> &CallStack {
        &self.flow().callstack
    }

    /// The current flow's call stack, mutably.
    pub fn callstack_mut(&mut self) -> &mut CallStack {
        &mut self.flow_mut().callstack
    }

    /// The engine's current pointer (the top frame's).
    #[must_use]
    pub fn current_pointer(&self) -> Pointer {
        self.callstack().current_frame().pointer
    }

    /// Move the current pointer.
    pub fn set_current_pointer(&mut self, pointer: Pointer) {
        self.callstack_mut().current_frame_mut().pointer = pointer;
    }

    /// Record the pointer before an advance on the current thread.
    pub fn set_previous_pointer(&mut self, pointer: Pointer) {
        self.callstack_mut().current_thread_mut().previous_pointer = pointer;
    }

    /// Whether the current frame evaluates content as an expression.
    #[must_use]
    pub fn in_expression_evaluation(&self) -> bool {
        self.callstack().current_frame().in_expression_evaluation
    }

    /// Toggle expression evaluation on the current frame.
    pub fn set_in_expression_evaluation(&mut self, active: bool) {
        self.callstack_mut().current_frame_mut().in_expression_evaluation = active;
    }

    /// Pop a frame; tunnel pops truncate the evaluation stack back to the
    /// height recorded when the frame was pushed.
    ///
    /// # Errors
    ///
    /// Stack discipline violations (root pop, kind mismatch).
    pub fn pop_callstack(&mut self, kind: FrameKind) -> Result<(), StoryError> {
        let frame = self.callstack_mut().pop(kind)?;
        if kind == FrameKind::Tunnel && self.evaluation_stack.len() > frame.eval_height_when_pushed
        {
            self.evaluation_stack.truncate(frame.eval_height_when_pushed);
        }
        Ok(())
    }

    /// End a host-driven function evaluation if one is on top: the frame's
    /// pointer is nulled so the step loop stops, and the host pops the
    /// frame via [`Self::complete_function_evaluation_from_host`].
    pub fn try_exit_function_evaluation_from_host(&mut self) -> bool {
        if self.callstack().current_frame().kind == FrameKind::FunctionFromHost {
            self.set_current_pointer(Pointer::NULL);
            true
        } else {
            false
        }
    }

    /// Pop the host-driven function-evaluation frame, restoring the
    /// caller's pointer.
    ///
    /// # Errors
    ///
    /// A missing or mismatched frame is a stack error.
    pub fn complete_function_evaluation_from_host(&mut self) -> Result<(), StoryError> {
        self.callstack_mut().pop(FrameKind::FunctionFromHost)?;
        Ok(())
    }

    // ---- Evaluation stack ----

    /// Push a value.
    pub fn push_eval(&mut self, value: Value) {
        self.evaluation_stack.push(value);
    }

    /// Pop a value.
    ///
    /// # Errors
    ///
    /// Underflow is a runtime error naming the consuming instruction.
    pub fn pop_eval(&mut self, context: &'static str) -> Result<Value, StoryError> {
        self.evaluation_stack
            .pop()
            .ok_or(StoryError::StackUnderflow(context))
    }

    /// The value on top, if any.
    #[must_use]
    pub fn peek_eval(&self) -> Option<&Value> {
        self.evaluation_stack.last()
    }

    // ---- Output ----

    /// Append an item to the current flow's output.
    pub fn push_output(&mut self, item: StreamItem) {
        self.flow_mut().output.push(item);
    }

    /// Whether the current chunk is complete.
    #[must_use]
    pub fn output_ends_in_newline(&self) -> bool {
        outstream::ends_in_newline(&self.flow().output)
    }

    /// Drop accumulated output and pending choices at the start of a chunk.
    pub fn reset_output(&mut self) {
        let flow = self.flow_mut();
        flow.output.clear();
        flow.choices.clear();
    }

    /// Render the current flow's output to display text.
    #[must_use]
    pub fn current_text(&self) -> String {
        outstream::render_text(&self.flow().output)
    }

    /// Tags folded into the current flow's output.
    #[must_use]
    pub fn current_tags(&self) -> Vec<String> {
        outstream::tags(&self.flow().output)
    }

    // ---- Visit bookkeeping ----

    /// The visit count of a container.
    #[must_use]
    pub fn visit_count(&self, container: NodeId) -> i32 {
        self.visit_counts.get(&container).copied().unwrap_or(0)
    }

    /// Count one visit.
    pub fn increment_visit_count(&mut self, container: NodeId) {
        *self.visit_counts.entry(container).or_insert(0) += 1;
    }

    /// Record the current turn index as the container's latest visit turn.
    pub fn record_turn_index(&mut self, container: NodeId) {
        self.turn_indices.insert(container, self.current_turn_index);
    }

    // ---- Randomness ----

    /// Draw a raw random value, deriving the generator from the story seed
    /// and the previous draw so a reloaded story replays identically.
    pub fn next_random(&mut self) -> i64 {
        let seed = (self.story_seed.wrapping_add(self.previous_random)) as u64;
        let mut rng = StdRng::seed_from_u64(seed);
        let draw = i64::from(rng.gen::<u32>());
        self.previous_random = draw;
        draw
    }

    /// Reseed the story's randomness.
    pub fn seed_random(&mut self, seed: i64) {
        self.story_seed = seed;
        self.previous_random = 0;
    }

    // ---- Diagnostics ----

    /// Record a fatal-path error message.
    pub fn add_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(error = %message, "story error recorded");
        self.errors.push(message);
    }

    /// Record a warning; warnings never halt execution.
    pub fn add_warning(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(warning = %message, "story warning");
        self.warnings.push(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::ContentTree;

    fn state() -> StoryState {
        let tree = ContentTree::new();
        StoryState::new(tree.root())
    }

    #[test]
    fn starts_in_the_default_flow() {
        let st = state();
        assert_eq!(st.current_flow_name, DEFAULT_FLOW);
        assert_eq!(st.flow().name, DEFAULT_FLOW);
        assert!(!st.current_pointer().is_null());
    }

    #[test]
    fn flows_are_created_on_switch_and_removed_safely() {
        let mut st = state();
        st.switch_flow("side");
        assert_eq!(st.current_flow_name, "side");
        assert_eq!(st.flows.len(), 2);

        // Removing the current flow falls back to the default.
        st.remove_flow("side").unwrap();
        assert_eq!(st.current_flow_name, DEFAULT_FLOW);
        assert!(st.remove_flow(DEFAULT_FLOW).is_err());
        assert!(st.remove_flow("ghost").is_err());
    }

    #[test]
    fn tunnel_pop_truncates_the_evaluation_stack() {
        let mut st = state();
        st.push_eval(Value::Int(1));
        let eval_height = st.evaluation_stack.len();
        st.callstack_mut().push(FrameKind::Tunnel, eval_height, 0);
        st.push_eval(Value::Int(2));
        st.push_eval(Value::Int(3));

        st.pop_callstack(FrameKind::Tunnel).unwrap();
        assert_eq!(st.evaluation_stack, vec![Value::Int(1)]);
    }

    #[test]
    fn function_pop_leaves_the_evaluation_stack() {
        let mut st = state();
        st.callstack_mut().push(FrameKind::Function, 0, 0);
        st.push_eval(Value::Int(7));
        st.pop_callstack(FrameKind::Function).unwrap();
        assert_eq!(st.evaluation_stack, vec![Value::Int(7)]);
    }

    #[test]
    fn random_draws_are_reproducible_from_state() {
        let mut a = state();
        a.seed_random(42);
        let mut b = state();
        b.seed_random(42);

        let draws_a: Vec<_> = (0..4).map(|_| a.next_random()).collect();
        let draws_b: Vec<_> = (0..4).map(|_| b.next_random()).collect();
        assert_eq!(draws_a, draws_b);

        // The chain advances: consecutive draws differ.
        assert_ne!(draws_a[0], draws_a[1]);
    }

    #[test]
    fn visit_bookkeeping() {
        let tree = ContentTree::new();
        let id = tree.root();
        let mut st = StoryState::new(id);
        assert_eq!(st.visit_count(id), 0);
        st.increment_visit_count(id);
        st.increment_visit_count(id);
        assert_eq!(st.visit_count(id), 2);

        st.current_turn_index = 3;
        st.record_turn_index(id);
        assert_eq!(st.turn_indices[&id], 3);
    }
}
