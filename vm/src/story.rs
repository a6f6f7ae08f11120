//! The story: step engine, control flow, and the host API.
//!
//! Execution follows a fetch → dispatch → commit shape:
//! - `step` fetches the node at the current pointer (descending into
//!   containers and recording visits on the way),
//! - `perform` dispatches logic and flow-control nodes, while plain content
//!   lands on the evaluation stack or the output stream,
//! - `advance` commits the pointer move, following a pending divert or
//!   climbing out of exhausted containers, popping frames as needed.
//!
//! A `continue_story` call repeats steps until the output stream ends in a
//! newline or the pointer dies; choices generated along the way are handed
//! to the host, which picks one to resume.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use skein_types::{ListDefinitions, Path, StoryList, Value};
use tracing::debug;

use crate::callstack::FrameKind;
use crate::choice::{Choice, ChoicePoint};
use crate::error::StoryError;
use crate::external::{ExternalFunction, ExternalFunctions, HostValue};
use crate::loader::{self, LoadedStory};
use crate::natives::NativeOp;
use crate::node::{ContentTree, ControlCommand, Divert, Node, NodeId, VariableAssignment};
use crate::outstream::{self, StreamItem};
use crate::pointer::Pointer;
use crate::state::StoryState;

/// Name of the container run to completion at construction to initialize
/// global variables.
const GLOBAL_DECL: &str = "global decl";

/// A logic or flow-control instruction lifted out of the content tree for
/// dispatch.
enum Logic {
    Command(ControlCommand),
    Divert(Divert),
    Reference(String),
    Assignment(VariableAssignment),
    Native(NativeOp),
    Choice(ChoicePoint),
}

/// A loaded story and its runtime state.
pub struct Story {
    pub(crate) tree: ContentTree,
    pub(crate) list_definitions: ListDefinitions,
    pub(crate) state: StoryState,
    externals: ExternalFunctions,
}

impl Story {
    /// Construct a story from a compiled story document.
    ///
    /// Runs the `global decl` container to completion (when present) so
    /// globals are initialized, then rewinds to the start.
    ///
    /// # Errors
    ///
    /// Document problems are load errors; a failing global declaration
    /// surfaces as the underlying runtime error.
    pub fn new(json: &str) -> Result<Self, StoryError> {
        let LoadedStory {
            tree,
            list_definitions,
            version,
        } = loader::load_document(json)?;
        debug!(version, "story document loaded");

        let state = StoryState::new(tree.root());
        let mut story = Self {
            tree,
            list_definitions,
            state,
            externals: ExternalFunctions::new(),
        };
        story.reset_globals()?;
        Ok(story)
    }

    fn reset_globals(&mut self) -> Result<(), StoryError> {
        let has_decl = self
            .tree
            .container(self.tree.root())
            .is_some_and(|c| c.named.contains_key(GLOBAL_DECL));
        if has_decl {
            self.choose_path(GLOBAL_DECL)?;
            self.continue_maximally()?;
        }
        self.state.go_to_start();
        Ok(())
    }

    // ---- Host API ----

    /// The runtime state (read-only).
    #[must_use]
    pub fn state(&self) -> &StoryState {
        &self.state
    }

    /// The story's list definitions.
    #[must_use]
    pub fn list_definitions(&self) -> &ListDefinitions {
        &self.list_definitions
    }

    /// Whether `continue_story` can produce more content right now.
    #[must_use]
    pub fn can_continue(&self) -> bool {
        self.can_continue_internal() && self.state.flow().choices.is_empty()
    }

    /// Run until the next newline, choice batch, or the end of content;
    /// returns the chunk's rendered text.
    ///
    /// # Errors
    ///
    /// A fatal step error is recorded on the state and returned; the story
    /// is then in an inconsistent state until reset or restored.
    pub fn continue_story(&mut self) -> Result<String, StoryError> {
        self.continue_internal()?;
        Ok(self.state.current_text())
    }

    /// Continue repeatedly until content runs out or choices are pending.
    ///
    /// # Errors
    ///
    /// Propagates the first fatal step error.
    pub fn continue_maximally(&mut self) -> Result<String, StoryError> {
        let mut text = String::new();
        while self.can_continue() {
            text.push_str(&self.continue_story()?);
        }
        Ok(text)
    }

    /// The rendered text of the current chunk.
    #[must_use]
    pub fn current_text(&self) -> String {
        self.state.current_text()
    }

    /// Tags attached to the current chunk's output.
    #[must_use]
    pub fn current_tags(&self) -> Vec<String> {
        self.state.current_tags()
    }

    /// The choices generated by the last chunk.
    #[must_use]
    pub fn current_choices(&self) -> &[Choice] {
        &self.state.flow().choices
    }

    /// Select a choice by its index in `current_choices`.
    ///
    /// If the generating thread has since ended, its snapshot is restored
    /// first. Counts one turn and diverts to the choice's target.
    ///
    /// # Errors
    ///
    /// Out-of-range indices and unresolvable targets are errors.
    pub fn choose_choice(&mut self, index: usize) -> Result<(), StoryError> {
        let count = self.state.flow().choices.len();
        if index >= count {
            return Err(StoryError::ChoiceOutOfRange { index, count });
        }
        let choice = self.state.flow().choices[index].clone();
        debug!(index, text = %choice.text, "choice taken");

        if let Some(thread) = choice.thread_at_generation {
            if thread.index != self.state.callstack().current_thread().index {
                self.state.callstack_mut().set_current_thread(thread)?;
            }
        }
        self.state.current_turn_index += 1;
        self.choose_path_internal(&choice.target_path)
    }

    /// Move the pointer to a named path and clear pending choices.
    ///
    /// # Errors
    ///
    /// Unresolvable paths are runtime errors.
    pub fn choose_path(&mut self, path: &str) -> Result<(), StoryError> {
        self.choose_path_internal(&Path::from_str(path))
    }

    fn choose_path_internal(&mut self, path: &Path) -> Result<(), StoryError> {
        let pointer = self.tree.pointer_at_path(path);
        if pointer.is_null() {
            return Err(StoryError::UnresolvedPath(path.to_string()));
        }
        self.state.set_current_pointer(pointer);
        self.state.flow_mut().choices.clear();
        Ok(())
    }

    /// Bind a host function.
    ///
    /// # Errors
    ///
    /// Duplicate bindings are errors.
    pub fn bind_external(&mut self, name: &str, function: ExternalFunction) -> Result<(), StoryError> {
        self.externals.bind(name, function)
    }

    /// Remove a host-function binding.
    pub fn unbind_external(&mut self, name: &str) {
        self.externals.unbind(name);
    }

    /// Switch to a named flow, creating it on first use.
    pub fn switch_flow(&mut self, name: &str) {
        self.state.switch_flow(name);
    }

    /// Switch back to the default flow.
    pub fn switch_to_default_flow(&mut self) {
        self.state.switch_to_default_flow();
    }

    /// Remove a named flow.
    ///
    /// # Errors
    ///
    /// The default flow cannot be removed.
    pub fn remove_flow(&mut self, name: &str) -> Result<(), StoryError> {
        self.state.remove_flow(name)
    }

    /// Serialize the full runtime state to a save document.
    ///
    /// # Errors
    ///
    /// Serialization failures (not expected for well-formed state).
    pub fn save(&self) -> Result<String, StoryError> {
        crate::savestate::save(self)
    }

    /// Restore the full runtime state from a save document produced by
    /// [`Story::save`] on the same story tree.
    ///
    /// Saved paths that no longer resolve degrade to null pointers with
    /// warnings on the state.
    ///
    /// # Errors
    ///
    /// Malformed documents and incompatible saves are state errors.
    pub fn load(&mut self, text: &str) -> Result<(), StoryError> {
        crate::savestate::load(self, text)
    }

    /// Invoke a named story function from the host, off to the side of
    /// normal flow. Returns the text the function printed and its return
    /// value (`None` for void).
    ///
    /// # Errors
    ///
    /// Unknown function names and step errors inside the function.
    pub fn evaluate_function(
        &mut self,
        name: &str,
        args: &[HostValue],
    ) -> Result<(String, HostValue), StoryError> {
        let container = self
            .tree
            .at_path(&Path::from_str(name))
            .node
            .filter(|id| self.tree.node(*id).is_container())
            .ok_or_else(|| StoryError::NoSuchFunction(name.to_string()))?;

        let original_height = self.state.evaluation_stack.len();
        self.push_frame(FrameKind::FunctionFromHost);
        // Enter at the container itself so its visit is recorded.
        self.state.set_current_pointer(Pointer::new(container, -1));
        for arg in args {
            self.state.push_eval(arg.clone().into_value());
        }

        let mut text = String::new();
        while self.can_continue_internal() {
            self.continue_internal()?;
            text.push_str(&self.state.current_text());
            // Choices cannot be taken from inside a host evaluation.
            if !self.state.flow().choices.is_empty() {
                self.state.add_warning(format!(
                    "function '{name}' generated choices; they are discarded"
                ));
                break;
            }
        }
        self.state.complete_function_evaluation_from_host()?;

        let result = if self.state.evaluation_stack.len() > original_height {
            let value = self.state.pop_eval("function result")?;
            self.state.evaluation_stack.truncate(original_height);
            HostValue::from_value(&value)?
        } else {
            HostValue::None
        };
        Ok((text, result))
    }

    // ---- The step loop ----

    fn can_continue_internal(&self) -> bool {
        !self.state.current_pointer().is_null()
    }

    fn continue_internal(&mut self) -> Result<(), StoryError> {
        self.state.reset_output();

        while self.can_continue_internal() {
            if let Err(error) = self.step() {
                self.state.add_error(error.to_string());
                return Err(error);
            }
            if self.state.output_ends_in_newline() {
                break;
            }
        }
        Ok(())
    }

    fn step(&mut self) -> Result<(), StoryError> {
        let mut pointer = self.state.current_pointer();
        if pointer.is_null() {
            return Ok(());
        }

        // Descend into containers, recording visits on entry.
        let mut node_id = pointer.resolve(&self.tree);
        while let Some(id) = node_id {
            let Some(container) = self.tree.container(id) else {
                break;
            };
            let empty = container.children.is_empty();
            self.record_visit(id);
            if empty {
                break;
            }
            pointer = Pointer::start_of(id);
            node_id = pointer.resolve(&self.tree);
        }
        self.state.set_current_pointer(pointer);

        let current = pointer.resolve(&self.tree);
        let consumed = match current {
            Some(id) => self.perform(id)?,
            None => true,
        };

        // Flow control may have ended the story mid-step.
        if self.state.current_pointer().is_null() {
            return Ok(());
        }

        if let Some(id) = current {
            if !consumed && !self.tree.node(id).is_container() {
                match self.tree.node(id) {
                    Node::Glue => self.state.push_output(StreamItem::Glue),
                    node => {
                        if let Some(value) = node.as_value() {
                            if self.state.in_expression_evaluation() {
                                self.state.push_eval(value);
                            } else {
                                self.state.push_output(StreamItem::Value(value));
                            }
                        }
                    }
                }
            }
        }

        self.advance()
    }

    /// Count a container entry, honoring its counting flags. Entries made
    /// by the descend loop are always at the container's start, which is
    /// what start-only counting requires.
    fn record_visit(&mut self, id: NodeId) {
        let Some(container) = self.tree.container(id) else {
            return;
        };
        let (visits, turns) = (container.visits_counted, container.turns_counted);
        if visits {
            self.state.increment_visit_count(id);
        }
        if turns {
            self.state.record_turn_index(id);
        }
    }

    /// Dispatch logic and flow-control nodes; returns false for plain
    /// content. The instruction is lifted out of the tree first so the
    /// dispatch can mutate state freely.
    fn perform(&mut self, id: NodeId) -> Result<bool, StoryError> {
        let logic = match self.tree.node(id) {
            Node::ControlCommand(command) => Logic::Command(*command),
            Node::Divert(divert) => Logic::Divert(divert.clone()),
            Node::VariableReference(reference) => Logic::Reference(reference.name.clone()),
            Node::VariableAssignment(assignment) => Logic::Assignment(assignment.clone()),
            Node::NativeCall(op) => Logic::Native(*op),
            Node::ChoicePoint(point) => Logic::Choice(point.clone()),
            _ => return Ok(false),
        };

        match logic {
            Logic::Command(command) => self.perform_command(command)?,
            Logic::Divert(divert) => self.perform_divert(&divert)?,
            Logic::Reference(name) => self.perform_variable_reference(&name),
            Logic::Assignment(assignment) => {
                let value = self.state.pop_eval("variable assignment")?;
                let state = &mut self.state;
                let flow = state
                    .flows
                    .get_mut(&state.current_flow_name)
                    .expect("current flow exists");
                state
                    .variables
                    .assign(&assignment, value, &mut flow.callstack)?;
            }
            Logic::Native(op) => self.perform_native(op)?,
            Logic::Choice(point) => self.process_choice(&point, id)?,
        }
        Ok(true)
    }

    fn perform_variable_reference(&mut self, name: &str) {
        let value = self.state.variables.get(name, self.state.callstack());
        let value = match value {
            Some(value) => value,
            None => {
                self.state
                    .add_warning(format!("variable '{name}' is not defined; substituting 0"));
                Value::Int(0)
            }
        };
        self.state.push_eval(value);
    }

    fn perform_native(&mut self, op: NativeOp) -> Result<(), StoryError> {
        let arity = op.arity();
        let mut params = vec![Value::Void; arity];
        // Popped right-to-left: the first pushed argument is params[0].
        for slot in params.iter_mut().rev() {
            *slot = self.state.pop_eval(op.token())?;
        }
        let result = op.call(&params)?;
        self.state.push_eval(result);
        Ok(())
    }

    // ---- Control commands ----

    #[allow(clippy::too_many_lines)]
    fn perform_command(&mut self, command: ControlCommand) -> Result<(), StoryError> {
        debug!(command = command.token(), "control command");
        match command {
            ControlCommand::EvalStart => self.state.set_in_expression_evaluation(true),
            ControlCommand::EvalEnd => self.state.set_in_expression_evaluation(false),
            ControlCommand::EvalOutput => {
                let value = self.state.pop_eval("out")?;
                if value != Value::Void {
                    // Emitted as its text form so string building can fold
                    // it together with surrounding atoms.
                    self.state
                        .push_output(StreamItem::Value(Value::Str(value.to_text())));
                }
            }
            ControlCommand::Duplicate => {
                let top = self
                    .state
                    .peek_eval()
                    .cloned()
                    .ok_or(StoryError::StackUnderflow("du"))?;
                self.state.push_eval(top);
            }
            ControlCommand::PopEvaluatedValue => {
                self.state.pop_eval("pop")?;
            }
            ControlCommand::PopFunction => {
                // A return inside a host-driven evaluation ends that
                // evaluation instead of popping a story frame.
                if self.state.try_exit_function_evaluation_from_host() {
                    return Ok(());
                }
                let was_evaluating = self.state.in_expression_evaluation();
                self.state.pop_callstack(FrameKind::Function)?;
                if was_evaluating {
                    self.state.push_eval(Value::Void);
                }
            }
            ControlCommand::PopTunnel => {
                if self.state.try_exit_function_evaluation_from_host() {
                    return Ok(());
                }
                // An onward target may sit on the stack; plain returns may
                // leave a Void there, cleaned up by the height truncation.
                let onward = match self.state.peek_eval() {
                    Some(Value::DivertTarget(path)) => Some(path.clone()),
                    _ => None,
                };
                if onward.is_some() {
                    self.state.pop_eval("->->")?;
                }
                self.state.pop_callstack(FrameKind::Tunnel)?;
                if let Some(path) = onward {
                    self.divert_to_path(&path)?;
                }
            }
            ControlCommand::BeginString => {
                if !self.state.in_expression_evaluation() {
                    self.state
                        .add_warning("string building started outside expression evaluation");
                }
                self.state.set_in_expression_evaluation(false);
                self.state.push_output(StreamItem::StringStart);
            }
            ControlCommand::EndString => {
                let text =
                    outstream::fold_since_marker(&mut self.state.flow_mut().output, &StreamItem::StringStart);
                let text = match text {
                    Some(text) => text,
                    None => {
                        self.state
                            .add_warning("string building ended without a start marker");
                        String::new()
                    }
                };
                self.state.push_eval(Value::Str(text));
                self.state.set_in_expression_evaluation(true);
            }
            ControlCommand::NoOp => {}
            ControlCommand::ChoiceCount => {
                let count = self.state.flow().choices.len() as i64;
                self.state.push_eval(Value::Int(count));
            }
            ControlCommand::Turns => {
                let turns = i64::from(self.state.current_turn_index) + 1;
                self.state.push_eval(Value::Int(turns));
            }
            ControlCommand::TurnsSince => {
                let container = self.pop_container_target("turns")?;
                let turns_counted = self
                    .tree
                    .container(container)
                    .is_some_and(|c| c.turns_counted);
                if !turns_counted {
                    self.state.add_warning(format!(
                        "turns-since target '{}' does not count turns",
                        self.tree.path_of(container)
                    ));
                }
                let result = match self.state.turn_indices.get(&container) {
                    Some(turn) => i64::from(self.state.current_turn_index - turn),
                    None => -1,
                };
                self.state.push_eval(Value::Int(result));
            }
            ControlCommand::ReadCount => {
                let container = self.pop_container_target("readc")?;
                let count = i64::from(self.state.visit_count(container));
                self.state.push_eval(Value::Int(count));
            }
            ControlCommand::Random => {
                let max = self.pop_int("rnd")?;
                let min = self.pop_int("rnd")?;
                if max < min {
                    return Err(StoryError::BadRandomRange { min, max });
                }
                let range = max - min + 1;
                let draw = self.state.next_random();
                self.state.push_eval(Value::Int(min + draw.rem_euclid(range)));
            }
            ControlCommand::SeedRandom => {
                let seed = self.pop_int("srnd")?;
                self.state.seed_random(seed);
                self.state.push_eval(Value::Void);
            }
            ControlCommand::VisitIndex => {
                let container = self
                    .state
                    .current_pointer()
                    .container
                    .expect("stepping requires a live pointer");
                let count = i64::from(self.state.visit_count(container)) - 1;
                self.state.push_eval(Value::Int(count));
            }
            ControlCommand::SequenceShuffleIndex => {
                let index = self.next_sequence_shuffle_index()?;
                self.state.push_eval(Value::Int(index));
            }
            ControlCommand::StartThread => self.state.next_divert_forks = true,
            ControlCommand::Done => {
                if self.state.callstack().can_pop_thread() {
                    self.state
                        .callstack_mut()
                        .pop_thread()
                        .expect("thread count checked");
                    // Pin the divert at the surviving thread's pointer so
                    // the advance does not walk into popped content.
                    self.state.diverted_pointer = self.state.current_pointer();
                } else {
                    self.state.set_current_pointer(Pointer::NULL);
                }
            }
            ControlCommand::End => self.state.set_current_pointer(Pointer::NULL),
            ControlCommand::ListFromInt => {
                let value = self.pop_int("listInt")?;
                let name = match self.state.pop_eval("listInt")? {
                    Value::Str(name) => name,
                    other => {
                        return Err(StoryError::BadOperand {
                            expected: "list name string",
                            context: "listInt",
                            found: other.kind(),
                        })
                    }
                };
                let definition = self
                    .list_definitions
                    .get(&name)
                    .ok_or_else(|| StoryError::NoSuchList(name.clone()))?;
                let list = match definition.item_with_value(value as i32) {
                    Some(item) => StoryList::single(item, value as i32),
                    None => {
                        let mut empty = StoryList::new();
                        empty.origins.push(name);
                        empty
                    }
                };
                self.state.push_eval(Value::List(list));
            }
            ControlCommand::ListRange => {
                let max = self.pop_range_bound("range")?;
                let min = self.pop_range_bound("range")?;
                let list = match self.state.pop_eval("range")? {
                    Value::List(list) => list,
                    other => {
                        return Err(StoryError::BadOperand {
                            expected: "list",
                            context: "range",
                            found: other.kind(),
                        })
                    }
                };
                self.state.push_eval(Value::List(list.range(min, max)));
            }
            ControlCommand::ListRandom => {
                let list = match self.state.pop_eval("lrnd")? {
                    Value::List(list) => list,
                    other => {
                        return Err(StoryError::BadOperand {
                            expected: "list",
                            context: "lrnd",
                            found: other.kind(),
                        })
                    }
                };
                let picked = if list.is_empty() {
                    let mut empty = StoryList::new();
                    empty.origins = list.origins.clone();
                    empty
                } else {
                    let draw = self.state.next_random() as usize;
                    let (item, value) = list
                        .items
                        .iter()
                        .nth(draw % list.len())
                        .map(|(k, v)| (k.clone(), *v))
                        .expect("non-empty list has items");
                    StoryList::single(item, value)
                };
                self.state.push_eval(Value::List(picked));
            }
            ControlCommand::BeginTag => self.state.push_output(StreamItem::TagStart),
            ControlCommand::EndTag => {
                let text =
                    outstream::fold_since_marker(&mut self.state.flow_mut().output, &StreamItem::TagStart);
                match text {
                    Some(text) => self.state.push_output(StreamItem::Tag(text)),
                    None => self
                        .state
                        .add_warning("tag ended without a start marker"),
                }
            }
        }
        Ok(())
    }

    // ---- Diverts ----

    fn perform_divert(&mut self, divert: &Divert) -> Result<(), StoryError> {
        // The fork path pushes the frame itself (before copying the
        // thread), so it must not be pushed a second time below.
        let mut frame_pushed = false;
        if self.state.next_divert_forks {
            self.fork_at_divert(divert);
            frame_pushed = divert.pushes_to_stack;
        }

        if divert.is_conditional {
            let condition = self.state.pop_eval("conditional divert")?;
            if !condition.is_truthy() {
                return Ok(());
            }
        }

        if divert.is_external {
            let name = divert
                .target
                .as_ref()
                .map(Path::to_string)
                .unwrap_or_default();
            return self.call_external(&name, divert.external_args);
        }

        let mut target = divert.target.clone();
        if let Some(variable) = &divert.variable_name {
            let value = self.state.variables.get(variable, self.state.callstack());
            match value {
                Some(Value::DivertTarget(path)) => target = Some(path),
                Some(other) => {
                    return Err(StoryError::BadVariableDivert {
                        name: variable.clone(),
                        reason: format!("holds a {:?} value, not a divert target", other.kind()),
                    })
                }
                None => {
                    return Err(StoryError::BadVariableDivert {
                        name: variable.clone(),
                        reason: "variable is not defined".to_string(),
                    })
                }
            }
        }

        if divert.pushes_to_stack && !frame_pushed {
            self.push_frame(divert.stack_push_kind);
        }

        let Some(target) = target else {
            return Ok(());
        };
        self.divert_to_path(&target)
    }

    /// Fork for a `thread` command: the fresh thread takes the divert, and
    /// the forking thread is advanced past it so the forked content runs
    /// exactly once.
    fn fork_at_divert(&mut self, divert: &Divert) {
        if divert.pushes_to_stack {
            self.push_frame(divert.stack_push_kind);
        }
        self.state.next_divert_forks = false;

        let callstack = self.state.callstack_mut();
        callstack.fork_thread();
        let forking = callstack.threads.len() - 2;
        let frame = callstack.threads[forking]
            .frames
            .last_mut()
            .expect("thread has frames");
        frame.pointer = frame.pointer.next();
        debug!(thread = callstack.current_thread().index, "thread forked");
    }

    fn divert_to_path(&mut self, target: &Path) -> Result<(), StoryError> {
        let mut target = target.clone();
        if target.is_relative() {
            if let Some(base) = self.state.current_pointer().path(&self.tree) {
                target = base.appended(&target);
            }
        }
        let pointer = self.tree.pointer_at_path(&target);
        if pointer.is_null() {
            return Err(StoryError::UnresolvedPath(target.to_string()));
        }
        debug!(target = %target, "divert");
        self.state.diverted_pointer = pointer;
        Ok(())
    }

    fn push_frame(&mut self, kind: FrameKind) {
        let eval_height = self.state.evaluation_stack.len();
        let output_len = self.state.flow().output.len();
        self.state.callstack_mut().push(kind, eval_height, output_len);
    }

    fn call_external(&mut self, name: &str, num_args: usize) -> Result<(), StoryError> {
        if !self.externals.is_bound(name) {
            // A same-named story function serves as the fallback.
            let fallback = self
                .tree
                .at_path(&Path::from_str(name))
                .node
                .filter(|id| self.tree.node(*id).is_container());
            if let Some(container) = fallback {
                debug!(name, "external function unbound; falling back to story function");
                self.push_frame(FrameKind::Function);
                self.state.diverted_pointer = Pointer::new(container, -1);
                return Ok(());
            }
            return Err(StoryError::UnboundExternal(name.to_string()));
        }

        let mut args = Vec::with_capacity(num_args);
        for _ in 0..num_args {
            let value = self.state.pop_eval("external call")?;
            args.push(HostValue::from_value(&value)?);
        }
        args.reverse();

        let result = self.externals.call(name, &args)?;
        self.state.push_eval(result.into_value());
        Ok(())
    }

    // ---- Choices ----

    /// Evaluate a choice point: pop its flagged operands (condition, then
    /// choice-only text, then start text), and append a choice to the
    /// current flow unless the condition suppressed it. A once-only point
    /// whose target container has already been visited is suppressed too.
    fn process_choice(&mut self, point: &ChoicePoint, id: NodeId) -> Result<(), StoryError> {
        let mut show = true;
        if point.has_condition {
            let condition = self.state.pop_eval("choice condition")?;
            if !condition.is_truthy() {
                show = false;
            }
        }

        let mut choice_only = String::new();
        let mut start = String::new();
        if point.has_choice_only_content {
            if let Value::Str(s) = self.state.pop_eval("choice-only content")? {
                choice_only = s;
            }
        }
        if point.has_start_content {
            if let Value::Str(s) = self.state.pop_eval("choice start content")? {
                start = s;
            }
        }

        let source_path = self.tree.path_of(id);
        let target_path = source_path.appended(&point.path_on_choice);

        if show && point.once_only {
            let target = self
                .tree
                .at_path(&target_path)
                .node
                .filter(|t| self.tree.node(*t).is_container());
            if let Some(target) = target {
                if self.state.visit_count(target) > 0 {
                    show = false;
                }
            }
        }

        if !show {
            return Ok(());
        }

        let thread = self.state.callstack().current_thread().clone();

        let flow = self.state.flow_mut();
        let choice = Choice {
            text: format!("{start}{choice_only}").trim().to_string(),
            index: flow.choices.len(),
            target_path,
            source_path: source_path.to_string(),
            thread_index: thread.index,
            thread_at_generation: Some(thread),
            invisible_default: point.invisible_default,
            tags: Vec::new(),
        };
        debug!(text = %choice.text, target = %choice.target_path, "choice generated");
        flow.choices.push(choice);
        Ok(())
    }

    // ---- Advancing ----

    /// Commit the pointer move after a step: follow a pending divert, or
    /// increment and climb out of exhausted containers, auto-popping
    /// frames along the way.
    fn advance(&mut self) -> Result<(), StoryError> {
        self.state.set_previous_pointer(self.state.current_pointer());

        if !self.state.diverted_pointer.is_null() {
            let diverted = self.state.diverted_pointer;
            self.state.set_current_pointer(diverted);
            self.state.diverted_pointer = Pointer::NULL;
            if !self.state.current_pointer().is_null() {
                return Ok(());
            }
            // A null divert target falls through to a normal increment.
        }

        if !self.increment_content_pointer() {
            let mut popped = false;
            if self.state.callstack().can_pop_kind(FrameKind::Function) {
                self.state.pop_callstack(FrameKind::Function)?;
                if self.state.in_expression_evaluation() {
                    self.state.push_eval(Value::Void);
                }
                popped = true;
            } else if self.state.callstack().current_frame().kind == FrameKind::FunctionFromHost {
                // Ends the host-driven evaluation; the caller's pointer
                // must not advance under it.
                self.state.try_exit_function_evaluation_from_host();
            } else if self.state.callstack().can_pop() {
                let kind = self.state.callstack().current_frame().kind;
                if kind == FrameKind::Tunnel {
                    self.state
                        .add_warning("tunnel ended without an onward return; popping automatically");
                }
                self.state.pop_callstack(kind)?;
                popped = true;
            }

            if popped && !self.state.current_pointer().is_null() {
                return self.advance();
            }
        }
        Ok(())
    }

    /// Step the pointer one slot, climbing to the parent each time a
    /// container's content is exhausted. Returns false when the climb runs
    /// out of parents.
    fn increment_content_pointer(&mut self) -> bool {
        let mut successful = true;
        let mut pointer = self.state.current_pointer();
        pointer.index += 1;

        loop {
            let Some(container_id) = pointer.container else {
                break;
            };
            let len = self
                .tree
                .container(container_id)
                .map_or(0, |c| c.children.len());
            if pointer.index >= 0 && (pointer.index as usize) < len {
                break;
            }

            successful = false;
            let Some(parent) = self.tree.parent(container_id) else {
                break;
            };
            if self.tree.container(parent).is_none() {
                break;
            }
            let Some(index) = self.tree.index_in_parent(container_id) else {
                break;
            };
            pointer = Pointer::new(parent, index as i32 + 1);
            successful = true;
        }

        if !successful {
            pointer = Pointer::NULL;
        }
        self.state.set_current_pointer(pointer);
        successful
    }

    // ---- Command helpers ----

    fn pop_int(&mut self, context: &'static str) -> Result<i64, StoryError> {
        let value = self.state.pop_eval(context)?;
        value.as_int().ok_or(StoryError::BadOperand {
            expected: "integer",
            context,
            found: value.kind(),
        })
    }

    fn pop_range_bound(&mut self, context: &'static str) -> Result<i32, StoryError> {
        let value = self.state.pop_eval(context)?;
        match &value {
            Value::List(list) => Ok(list.max_value()),
            _ => value
                .as_int()
                .map(|i| i as i32)
                .ok_or(StoryError::BadOperand {
                    expected: "integer or list",
                    context,
                    found: value.kind(),
                }),
        }
    }

    /// Pop a divert target and resolve it to a container.
    fn pop_container_target(&mut self, context: &'static str) -> Result<NodeId, StoryError> {
        let value = self.state.pop_eval(context)?;
        let Value::DivertTarget(path) = value else {
            return Err(StoryError::BadOperand {
                expected: "divert target",
                context,
                found: value.kind(),
            });
        };
        let id = self
            .tree
            .at_path(&path)
            .node
            .ok_or_else(|| StoryError::UnresolvedPath(path.to_string()))?;
        if self.tree.node(id).is_container() {
            Ok(id)
        } else {
            self.tree
                .parent(id)
                .ok_or_else(|| StoryError::UnresolvedPath(path.to_string()))
        }
    }

    /// The shuffle index of a sequence: cycles through all elements once
    /// per loop, in an order derived from the story seed and the sequence's
    /// own path, without repeats within a loop.
    fn next_sequence_shuffle_index(&mut self) -> Result<i64, StoryError> {
        let num_elements = self.pop_int("seq")?;
        if num_elements <= 0 {
            return Err(StoryError::BadOperand {
                expected: "positive element count",
                context: "seq",
                found: skein_types::ValueKind::Int,
            });
        }
        let seq_count = self.pop_int("seq")?;
        let loop_index = seq_count / num_elements;
        let iteration_index = seq_count % num_elements;

        let container = self
            .state
            .current_pointer()
            .container
            .expect("stepping requires a live pointer");
        let path_hash: i64 = self
            .tree
            .path_of(container)
            .to_string()
            .chars()
            .map(|c| i64::from(c as u32))
            .sum();
        let seed = (path_hash + loop_index + self.state.story_seed) as u64;
        let mut rng = StdRng::seed_from_u64(seed);

        let mut unpicked: Vec<i64> = (0..num_elements).collect();
        let mut chosen = 0;
        for _ in 0..=iteration_index {
            let slot = rng.gen::<u32>() as usize % unpicked.len();
            chosen = unpicked.remove(slot);
        }
        Ok(chosen)
    }
}

impl std::fmt::Debug for Story {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Story")
            .field("flow", &self.state.current_flow_name)
            .field("pointer", &self.state.current_pointer())
            .finish_non_exhaustive()
    }
}
