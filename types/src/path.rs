//! Dotted content paths.
//!
//! A path addresses a node in the story content tree: a sequence of
//! components, each an integer index into a container's ordered children or
//! a name in its named-child map. The reserved name `^` steps to the parent.
//! A leading `.` in the string form marks the path as relative; relative
//! paths are resolved against a context path with [`Path::appended`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// Reserved component name meaning "parent container".
pub const PARENT_NAME: &str = "^";

/// One step of a [`Path`]: an index into ordered content or a named child.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Component {
    /// Index into a container's ordered children.
    Index(usize),
    /// Name in a container's named-child map (`^` means parent).
    Name(String),
}

impl Component {
    /// Component that steps to the parent container.
    #[must_use]
    pub fn to_parent() -> Self {
        Self::Name(PARENT_NAME.to_string())
    }

    /// Whether this component is the parent step.
    #[must_use]
    pub fn is_parent(&self) -> bool {
        matches!(self, Self::Name(n) if n == PARENT_NAME)
    }

    /// Whether this component is an index.
    #[must_use]
    pub fn is_index(&self) -> bool {
        matches!(self, Self::Index(_))
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "{i}"),
            Self::Name(n) => f.write_str(n),
        }
    }
}

/// An address into the story content tree.
///
/// Paths are value types: cheap to clone, compared and hashed by their
/// components. The string form (`a.3.b`, relative: `.^.b`) is the wire
/// encoding used in compiled stories and save documents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Path {
    components: Vec<Component>,
    relative: bool,
}

impl Path {
    /// The empty absolute path (the root container).
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    /// The empty relative path (the context node itself).
    #[must_use]
    pub fn to_self() -> Self {
        Self {
            components: Vec::new(),
            relative: true,
        }
    }

    /// Build a path from components.
    #[must_use]
    pub fn new(components: Vec<Component>, relative: bool) -> Self {
        Self {
            components,
            relative,
        }
    }

    /// Parse the dotted string form. A leading `.` marks a relative path;
    /// numeric components become indices, everything else names.
    #[must_use]
    pub fn from_str(s: &str) -> Self {
        let (relative, rest) = match s.strip_prefix('.') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        if rest.is_empty() {
            return Self {
                components: Vec::new(),
                relative,
            };
        }
        let components = rest
            .split('.')
            .map(|part| match part.parse::<usize>() {
                Ok(i) => Component::Index(i),
                Err(_) => Component::Name(part.to_string()),
            })
            .collect();
        Self {
            components,
            relative,
        }
    }

    /// The components of this path, in order.
    #[must_use]
    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// Whether the path is resolved relative to a context node.
    #[must_use]
    pub fn is_relative(&self) -> bool {
        self.relative
    }

    /// Whether the path has no components.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Number of components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// First component, if any.
    #[must_use]
    pub fn head(&self) -> Option<&Component> {
        self.components.first()
    }

    /// Everything after the first component, as a relative path.
    #[must_use]
    pub fn tail(&self) -> Self {
        if self.components.len() >= 2 {
            Self {
                components: self.components[1..].to_vec(),
                relative: false,
            }
        } else {
            Self::to_self()
        }
    }

    /// Compose a (usually relative) path onto this one.
    ///
    /// Leading `^` components of `other` drop trailing components of `self`;
    /// the remainder is appended. An absolute `other` replaces `self`
    /// entirely.
    #[must_use]
    pub fn appended(&self, other: &Path) -> Self {
        if !other.relative {
            return other.clone();
        }

        let upward = other
            .components
            .iter()
            .take_while(|c| c.is_parent())
            .count();
        let keep = self.components.len().saturating_sub(upward);

        let mut components = Vec::with_capacity(keep + other.components.len() - upward);
        components.extend_from_slice(&self.components[..keep]);
        components.extend_from_slice(&other.components[upward..]);
        Self {
            components,
            relative: false,
        }
    }

    /// Append a single component.
    #[must_use]
    pub fn with_component(&self, component: Component) -> Self {
        let mut components = self.components.clone();
        components.push(component);
        Self {
            components,
            relative: self.relative,
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.relative {
            f.write_str(".")?;
        }
        for (i, comp) in self.components.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{comp}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_absolute_and_relative_forms() {
        let p = Path::from_str("a.3.b");
        assert!(!p.is_relative());
        assert_eq!(
            p.components(),
            &[
                Component::Name("a".into()),
                Component::Index(3),
                Component::Name("b".into())
            ]
        );

        let r = Path::from_str(".^.sibling");
        assert!(r.is_relative());
        assert!(r.components()[0].is_parent());
    }

    #[test]
    fn string_round_trip() {
        for s in ["", "a.b.c", "0.1.2", "knot.stitch.3", ".^.^.next", "."] {
            let p = Path::from_str(s);
            // "." and "" both have canonical forms; re-parse must agree.
            assert_eq!(Path::from_str(&p.to_string()), p, "round-trip of {s:?}");
        }
    }

    #[test]
    fn appended_consumes_parent_steps() {
        let base = Path::from_str("knot.0.2");
        let rel = Path::from_str(".^.^.c-0");
        assert_eq!(base.appended(&rel).to_string(), "knot.c-0");
    }

    #[test]
    fn appended_absolute_replaces() {
        let base = Path::from_str("a.b");
        let abs = Path::from_str("x.y");
        assert_eq!(base.appended(&abs), abs);
    }

    #[test]
    fn tail_of_short_path_is_self() {
        let p = Path::from_str("only");
        assert_eq!(p.tail(), Path::to_self());
    }
}
