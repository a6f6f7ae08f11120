//! Flows: parallel execution contexts of one story.
//!
//! A flow bundles a call stack, an output stream, and the choices pending
//! in it. A story holds a named map of flows with a distinguished default;
//! exactly one flow is current at any instant.

use crate::callstack::CallStack;
use crate::choice::Choice;
use crate::node::NodeId;
use crate::outstream::StreamItem;

/// Name of the flow every story starts in.
pub const DEFAULT_FLOW: &str = "DEFAULT_FLOW";

/// One execution context: call stack, output, and pending choices.
#[derive(Debug, Clone, PartialEq)]
pub struct Flow {
    /// The flow's name.
    pub name: String,
    /// The flow's call stack.
    pub callstack: CallStack,
    /// Content emitted since the last chunk reset.
    pub output: Vec<StreamItem>,
    /// Choices generated and not yet consumed.
    pub choices: Vec<Choice>,
}

impl Flow {
    /// A fresh flow rooted at the story's main container.
    #[must_use]
    pub fn new(name: &str, main_container: NodeId) -> Self {
        Self {
            name: name.to_string(),
            callstack: CallStack::new(main_container),
            output: Vec::new(),
            choices: Vec::new(),
        }
    }
}
