//! Value model for the skein story runtime.
//!
//! This crate holds the pure data types the virtual machine computes with:
//! - **Paths** ([`path::Path`]): dotted addresses into the story content tree
//! - **Values** ([`value::Value`]): the typed runtime values that flow through
//!   the evaluation stack, variables, and output stream
//! - **Lists** ([`list::StoryList`]): ordered named-flag sets with origin
//!   definitions
//!
//! Nothing here knows about the content tree or the step engine; those live
//! in `skein-vm`.

pub mod list;
pub mod path;
pub mod value;

pub use list::{ListDefinition, ListDefinitions, ListItem, StoryList};
pub use path::{Component, Path};
pub use value::{Value, ValueKind, VariablePointer};
