//! The content tree: nodes, containers, and path resolution.
//!
//! A compiled story is a tree of immutable nodes owned by a single arena
//! ([`ContentTree`]). Parent links are non-owning arena ids, used only for
//! path resolution; children are owned by their container's ordered list or
//! named map. Nodes are created once by the loader and never mutated
//! afterwards.

use std::collections::BTreeMap;
use std::fmt;

use skein_types::{Component, Path, StoryList, Value, VariablePointer};

use crate::callstack::FrameKind;
use crate::choice::ChoicePoint;
use crate::natives::NativeOp;
use crate::pointer::Pointer;

/// Arena id of a node in a [`ContentTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Engine command embedded in the content stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// `ev` — enter expression evaluation.
    EvalStart,
    /// `/ev` — leave expression evaluation.
    EvalEnd,
    /// `out` — pop one value; emit it to the output stream unless Void.
    EvalOutput,
    /// `du` — duplicate the top of the evaluation stack.
    Duplicate,
    /// `pop` — discard the top of the evaluation stack.
    PopEvaluatedValue,
    /// `~ret` — return from a function frame.
    PopFunction,
    /// `->->` — return from a tunnel frame, optionally onward.
    PopTunnel,
    /// `str` — begin string building.
    BeginString,
    /// `/str` — end string building.
    EndString,
    /// `nop` — no operation.
    NoOp,
    /// `choiceCnt` — push the number of choices generated this chunk.
    ChoiceCount,
    /// `turn` — push the current turn index.
    Turns,
    /// `turns` — push turns since a container was last visited.
    TurnsSince,
    /// `readc` — push a container's visit count.
    ReadCount,
    /// `rnd` — push a seeded random integer in a popped range.
    Random,
    /// `srnd` — reseed story randomness from a popped value.
    SeedRandom,
    /// `visit` — push the current container's visit count minus one.
    VisitIndex,
    /// `seq` — push the next shuffle index of a sequence.
    SequenceShuffleIndex,
    /// `thread` — the next divert forks the current thread.
    StartThread,
    /// `done` — finish the current thread, or stop if it is the last.
    Done,
    /// `end` — stop the story.
    End,
    /// `listInt` — push the list item with a popped value.
    ListFromInt,
    /// `range` — keep list items within a popped range.
    ListRange,
    /// `lrnd` — push a random item of a popped list.
    ListRandom,
    /// `#` — begin a tag.
    BeginTag,
    /// `/#` — end a tag.
    EndTag,
}

impl ControlCommand {
    /// Parse a command token from the compiled story or a save document.
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "ev" => Self::EvalStart,
            "/ev" => Self::EvalEnd,
            "out" => Self::EvalOutput,
            "du" => Self::Duplicate,
            "pop" => Self::PopEvaluatedValue,
            "~ret" => Self::PopFunction,
            "->->" => Self::PopTunnel,
            "str" => Self::BeginString,
            "/str" => Self::EndString,
            "nop" => Self::NoOp,
            "choiceCnt" => Self::ChoiceCount,
            "turn" => Self::Turns,
            "turns" => Self::TurnsSince,
            "readc" => Self::ReadCount,
            "rnd" => Self::Random,
            "srnd" => Self::SeedRandom,
            "visit" => Self::VisitIndex,
            "seq" => Self::SequenceShuffleIndex,
            "thread" => Self::StartThread,
            "done" => Self::Done,
            "end" => Self::End,
            "listInt" => Self::ListFromInt,
            "range" => Self::ListRange,
            "lrnd" => Self::ListRandom,
            "#" => Self::BeginTag,
            "/#" => Self::EndTag,
            _ => return None,
        })
    }

    /// The wire token for this command.
    #[must_use]
    pub fn token(self) -> &'static str {
        match self {
            Self::EvalStart => "ev",
            Self::EvalEnd => "/ev",
            Self::EvalOutput => "out",
            Self::Duplicate => "du",
            Self::PopEvaluatedValue => "pop",
            Self::PopFunction => "~ret",
            Self::PopTunnel => "->->",
            Self::BeginString => "str",
            Self::EndString => "/str",
            Self::NoOp => "nop",
            Self::ChoiceCount => "choiceCnt",
            Self::Turns => "turn",
            Self::TurnsSince => "turns",
            Self::ReadCount => "readc",
            Self::Random => "rnd",
            Self::SeedRandom => "srnd",
            Self::VisitIndex => "visit",
            Self::SequenceShuffleIndex => "seq",
            Self::StartThread => "thread",
            Self::Done => "done",
            Self::End => "end",
            Self::ListFromInt => "listInt",
            Self::ListRange => "range",
            Self::ListRandom => "lrnd",
            Self::BeginTag => "#",
            Self::EndTag => "/#",
        }
    }
}

/// An instruction that moves the pointer, optionally pushing a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Divert {
    /// Literal target path, absent for pure variable diverts.
    pub target: Option<Path>,
    /// Variable holding the target, for variable diverts.
    pub variable_name: Option<String>,
    /// Whether the divert pushes a frame before moving.
    pub pushes_to_stack: bool,
    /// Kind of frame pushed (tunnel or function).
    pub stack_push_kind: FrameKind,
    /// Whether the target names an external (host) function.
    pub is_external: bool,
    /// Whether a popped condition gates the divert.
    pub is_conditional: bool,
    /// Argument count marshalled to an external function.
    pub external_args: usize,
}

impl Divert {
    /// A plain divert with no target yet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            target: None,
            variable_name: None,
            pushes_to_stack: false,
            stack_push_kind: FrameKind::Tunnel,
            is_external: false,
            is_conditional: false,
            external_args: 0,
        }
    }

    /// A divert that pushes a frame of the given kind.
    #[must_use]
    pub fn pushing(kind: FrameKind) -> Self {
        Self {
            pushes_to_stack: true,
            stack_push_kind: kind,
            ..Self::new()
        }
    }
}

impl Default for Divert {
    fn default() -> Self {
        Self::new()
    }
}

/// A read of a named variable, pushing its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableReference {
    /// Name of the variable to read.
    pub name: String,
}

/// A write of a popped value into a named variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableAssignment {
    /// Name of the variable to write.
    pub name: String,
    /// Whether this assignment declares the variable.
    pub new_declaration: bool,
    /// Whether the variable is global (`VAR=`) or temporary (`temp=`).
    pub global: bool,
}

/// One node of the content tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// A container of child nodes.
    Container(Container),
    /// A text atom.
    StringAtom(String),
    /// An integer literal.
    IntValue(i64),
    /// A float literal.
    FloatValue(f64),
    /// A boolean literal.
    BoolValue(bool),
    /// A list literal.
    ListValue(StoryList),
    /// A divert-target literal.
    DivertTargetValue(Path),
    /// A variable-pointer literal.
    VariablePointerValue(VariablePointer),
    /// Newline suppression marker.
    Glue,
    /// The no-result sentinel.
    Void,
    /// An engine command.
    ControlCommand(ControlCommand),
    /// A built-in operator.
    NativeCall(NativeOp),
    /// A pointer move.
    Divert(Divert),
    /// A variable read.
    VariableReference(VariableReference),
    /// A variable write.
    VariableAssignment(VariableAssignment),
    /// A choice generator.
    ChoicePoint(ChoicePoint),
}

impl Node {
    /// The value this node denotes, if it is value-like. Containers,
    /// commands, and flow instructions have no value.
    #[must_use]
    pub fn as_value(&self) -> Option<Value> {
        Some(match self {
            Self::StringAtom(s) => Value::Str(s.clone()),
            Self::IntValue(i) => Value::Int(*i),
            Self::FloatValue(f) => Value::Float(*f),
            Self::BoolValue(b) => Value::Bool(*b),
            Self::ListValue(l) => Value::List(l.clone()),
            Self::DivertTargetValue(p) => Value::DivertTarget(p.clone()),
            Self::VariablePointerValue(vp) => Value::VariablePointer(vp.clone()),
            Self::Void => Value::Void,
            _ => return None,
        })
    }

    /// Whether this node is a container.
    #[must_use]
    pub fn is_container(&self) -> bool {
        matches!(self, Self::Container(_))
    }
}

/// A node that owns ordered children and a named-child map.
///
/// Named children need not appear in the ordered sequence; both are
/// addressable by path. The three flags opt the container into visit
/// counting, turn indexing, and start-only counting.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Container {
    /// Optional name, also a key in the parent's named map.
    pub name: Option<String>,
    /// Ordered children.
    pub children: Vec<NodeId>,
    /// Named children (includes named ordered children).
    pub named: BTreeMap<String, NodeId>,
    /// Whether visits to this container are counted.
    pub visits_counted: bool,
    /// Whether the turn index of the latest visit is recorded.
    pub turns_counted: bool,
    /// Whether counting applies only when entered at the start.
    pub counting_at_start_only: bool,
}

impl Container {
    /// The child a single path component selects, if present. The parent
    /// component `^` is resolved by the tree, not here.
    #[must_use]
    pub fn child_at(&self, component: &Component) -> Option<NodeId> {
        match component {
            Component::Index(i) => self.children.get(*i).copied(),
            Component::Name(name) => self.named.get(name).copied(),
        }
    }
}

/// Result of resolving a path against the tree.
///
/// `approximate` marks a resolution that had to treat a leaf node as
/// transparent context and continue from its parent, which happens with
/// compiler-emitted paths that encode context rather than strict descent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchResult {
    /// The resolved node, if any.
    pub node: Option<NodeId>,
    /// Whether resolution was approximate.
    pub approximate: bool,
}

impl SearchResult {
    fn miss() -> Self {
        Self {
            node: None,
            approximate: false,
        }
    }
}

struct Entry {
    node: Node,
    parent: Option<NodeId>,
}

/// The arena owning every node of one compiled story.
pub struct ContentTree {
    entries: Vec<Entry>,
    root: NodeId,
}

impl ContentTree {
    /// A tree holding only an empty root container.
    #[must_use]
    pub fn new() -> Self {
        let entries = vec![Entry {
            node: Node::Container(Container::default()),
            parent: None,
        }];
        Self {
            entries,
            root: NodeId(0),
        }
    }

    /// The root container's id.
    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// The node stored under an id.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.entries[id.index()].node
    }

    /// The parent container's id, absent for the root.
    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.entries[id.index()].parent
    }

    /// The container stored under an id, if the node is one.
    #[must_use]
    pub fn container(&self, id: NodeId) -> Option<&Container> {
        match self.node(id) {
            Node::Container(c) => Some(c),
            _ => None,
        }
    }

    /// Insert a node under a parent. The loader wires the id into the
    /// parent's child list or named map afterwards.
    pub(crate) fn insert(&mut self, node: Node, parent: NodeId) -> NodeId {
        let id = NodeId(u32::try_from(self.entries.len()).expect("content tree overflow"));
        self.entries.push(Entry {
            node,
            parent: Some(parent),
        });
        id
    }

    pub(crate) fn container_mut(&mut self, id: NodeId) -> &mut Container {
        match &mut self.entries[id.index()].node {
            Node::Container(c) => c,
            _ => unreachable!("container_mut on a non-container node"),
        }
    }

    /// The component addressing `id` within its parent: the child's name if
    /// it is registered in the named map, otherwise its ordered index.
    #[must_use]
    pub fn component_in_parent(&self, id: NodeId) -> Option<Component> {
        let parent = self.parent(id)?;
        let container = self.container(parent)?;

        if let Node::Container(c) = self.node(id) {
            if let Some(name) = &c.name {
                if container.named.get(name) == Some(&id) {
                    return Some(Component::Name(name.clone()));
                }
            }
        }
        if let Some(i) = container.children.iter().position(|c| *c == id) {
            return Some(Component::Index(i));
        }
        container
            .named
            .iter()
            .find(|(_, child)| **child == id)
            .map(|(name, _)| Component::Name(name.clone()))
    }

    /// The ordered index of `id` within its parent, if it has one.
    #[must_use]
    pub fn index_in_parent(&self, id: NodeId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.container(parent)?
            .children
            .iter()
            .position(|c| *c == id)
    }

    /// The absolute path of a node, built by walking parent links.
    #[must_use]
    pub fn path_of(&self, id: NodeId) -> Path {
        let mut components = Vec::new();
        let mut cur = id;
        while let Some(parent) = self.parent(cur) {
            if let Some(comp) = self.component_in_parent(cur) {
                components.push(comp);
            }
            cur = parent;
        }
        components.reverse();
        Path::new(components, false)
    }

    /// Resolve an absolute path, tolerating approximate descent (§ approx:
    /// a name component requested on a leaf is looked up in the leaf's
    /// parent instead).
    #[must_use]
    pub fn at_path(&self, path: &Path) -> SearchResult {
        let mut cur = self.root;
        let mut approximate = false;

        for component in path.components() {
            if component.is_parent() {
                match self.parent(cur) {
                    Some(p) => cur = p,
                    None => return SearchResult::miss(),
                }
                continue;
            }

            match self.node(cur) {
                Node::Container(c) => match c.child_at(component) {
                    Some(child) => cur = child,
                    None => return SearchResult::miss(),
                },
                _ => {
                    // Leaf reached mid-path: try the component against the
                    // leaf's parent and keep going from there.
                    let found = self
                        .parent(cur)
                        .and_then(|p| self.container(p))
                        .and_then(|c| c.child_at(component));
                    match found {
                        Some(child) => {
                            cur = child;
                            approximate = true;
                        }
                        None => return SearchResult::miss(),
                    }
                }
            }
        }

        SearchResult {
            node: Some(cur),
            approximate,
        }
    }

    /// Resolve a path to a pointer: containers point at themselves
    /// (index −1), so the step engine's descend records their visit before
    /// entering; leaves point at their slot in their parent.
    #[must_use]
    pub fn pointer_at_path(&self, path: &Path) -> Pointer {
        if path.is_empty() {
            return Pointer::NULL;
        }
        match self.at_path(path).node {
            Some(id) if self.node(id).is_container() => Pointer::new(id, -1),
            Some(id) => self.pointer_to(id),
            None => Pointer::NULL,
        }
    }

    /// The pointer addressing a node from inside its parent.
    #[must_use]
    pub fn pointer_to(&self, id: NodeId) -> Pointer {
        if self.parent(id).is_none() {
            return if self.node(id).is_container() {
                Pointer::start_of(id)
            } else {
                Pointer::NULL
            };
        }
        match (self.parent(id), self.index_in_parent(id)) {
            (Some(parent), Some(index)) => Pointer::new(parent, index as i32),
            _ => Pointer::NULL,
        }
    }
}

impl Default for ContentTree {
    fn default() -> Self {
        Self::new()
    }
}
