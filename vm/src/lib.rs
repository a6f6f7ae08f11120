//! Stepwise virtual machine for compiled interactive-fiction stories.
//!
//! This crate executes a previously compiled story tree (serialized as
//! JSON) as a stateful machine: the host calls [`Story::continue_story`] to
//! receive text, inspects [`Story::current_choices`], and resumes with
//! [`Story::choose_choice`]. Full runtime state round-trips through
//! [`Story::save`] / [`Story::load`].
//!
//! # Architecture
//!
//! - **Content tree** ([`node::ContentTree`]): immutable nodes in one
//!   owning arena, addressed by [`skein_types::Path`]
//! - **Loader** ([`loader`]): the compiled JSON document → content tree
//! - **Call stack** ([`callstack::CallStack`]): threads of frames with
//!   temporaries
//! - **Step engine** ([`story::Story`]): fetch → dispatch → advance
//! - **Output stream** ([`outstream`]): glue-aware text assembly
//! - **Serialization** ([`story::Story::save`]): version-stamped state
//!   documents
//!
//! # Usage
//!
//! ```no_run
//! use skein_vm::Story;
//!
//! # fn main() -> Result<(), skein_vm::StoryError> {
//! let mut story = Story::new(r#"{"inkVersion": 21, "root": ["^Hi", "\n", "done"]}"#)?;
//! while story.can_continue() {
//!     print!("{}", story.continue_story()?);
//! }
//! for (i, choice) in story.current_choices().iter().enumerate() {
//!     println!("{}: {}", i + 1, choice.text);
//! }
//! # Ok(())
//! # }
//! ```

pub mod callstack;
pub mod choice;
pub mod error;
pub mod external;
pub mod flow;
pub mod loader;
pub mod natives;
pub mod node;
pub mod outstream;
pub mod pointer;
mod savestate;
pub mod state;
pub mod story;
pub mod variables;

pub use callstack::{CallStack, Frame, FrameKind, Thread};
pub use choice::{Choice, ChoicePoint};
pub use error::{ErrorKind, StoryError};
pub use external::{ExternalFunction, HostValue};
pub use flow::{Flow, DEFAULT_FLOW};
pub use natives::NativeOp;
pub use node::{Container, ContentTree, ControlCommand, Node, NodeId};
pub use outstream::StreamItem;
pub use pointer::Pointer;
pub use state::StoryState;
pub use story::Story;
