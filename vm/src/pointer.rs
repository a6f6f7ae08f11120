//! The execution cursor.
//!
//! A pointer addresses one slot of one container: `(container, index)`.
//! Index −1 means the container itself; an index at or past the end is the
//! sentinel the step engine reads as "unwind". A null pointer has no
//! container and ends its frame.

use skein_types::{Component, Path};

use crate::node::{ContentTree, Node, NodeId};

/// A `(container, index)` cursor into the content tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pointer {
    /// The container being executed, absent for the null pointer.
    pub container: Option<NodeId>,
    /// Slot within the container; −1 addresses the container itself.
    pub index: i32,
}

impl Pointer {
    /// The null pointer.
    pub const NULL: Pointer = Pointer {
        container: None,
        index: -1,
    };

    /// A pointer at a specific slot.
    #[must_use]
    pub fn new(container: NodeId, index: i32) -> Self {
        Self {
            container: Some(container),
            index,
        }
    }

    /// A pointer at the first slot of a container.
    #[must_use]
    pub fn start_of(container: NodeId) -> Self {
        Self::new(container, 0)
    }

    /// Whether this is the null pointer.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.container.is_none()
    }

    /// The node this pointer addresses: the container itself for index −1,
    /// the child for an in-range index, nothing past the end.
    #[must_use]
    pub fn resolve(&self, tree: &ContentTree) -> Option<NodeId> {
        let container = self.container?;
        if self.index < 0 {
            return Some(container);
        }
        match tree.node(container) {
            Node::Container(c) => c.children.get(self.index as usize).copied(),
            _ => None,
        }
    }

    /// The same pointer advanced one slot. No bounds check: the step
    /// engine interprets overflow.
    #[must_use]
    pub fn next(&self) -> Self {
        match self.container {
            Some(c) => Self::new(c, self.index + 1),
            None => *self,
        }
    }

    /// The path of the addressed slot, or of the container for index −1.
    /// Null pointers have no path.
    #[must_use]
    pub fn path(&self, tree: &ContentTree) -> Option<Path> {
        let container = self.container?;
        let base = tree.path_of(container);
        if self.index >= 0 {
            Some(base.with_component(Component::Index(self.index as usize)))
        } else {
            Some(base)
        }
    }
}

impl Default for Pointer {
    fn default() -> Self {
        Self::NULL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Container;

    #[test]
    fn resolve_follows_the_index_rules() {
        let mut tree = ContentTree::new();
        let root = tree.root();
        let atom = tree.insert(Node::StringAtom("x".into()), root);
        tree.container_mut(root).children.push(atom);

        assert_eq!(Pointer::new(root, -1).resolve(&tree), Some(root));
        assert_eq!(Pointer::new(root, 0).resolve(&tree), Some(atom));
        assert_eq!(Pointer::new(root, 1).resolve(&tree), None);
        assert_eq!(Pointer::NULL.resolve(&tree), None);
    }

    #[test]
    fn next_does_not_bounds_check() {
        let tree = ContentTree::new();
        let p = Pointer::start_of(tree.root());
        assert_eq!(p.next().index, 1);
        assert_eq!(p.next().next().index, 2);
        assert!(Pointer::NULL.next().is_null());
    }

    #[test]
    fn path_appends_the_index() {
        let mut tree = ContentTree::new();
        let root = tree.root();
        let knot = tree.insert(
            Node::Container(Container {
                name: Some("knot".into()),
                ..Container::default()
            }),
            root,
        );
        tree.container_mut(root).children.push(knot);
        tree.container_mut(root).named.insert("knot".into(), knot);

        let p = Pointer::new(knot, 2);
        assert_eq!(p.path(&tree).unwrap().to_string(), "knot.2");
        assert_eq!(
            Pointer::new(knot, -1).path(&tree).unwrap().to_string(),
            "knot"
        );
        assert_eq!(Pointer::NULL.path(&tree), None);
    }
}
