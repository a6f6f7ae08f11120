//! Loading compiled story documents.
//!
//! The compiled story is a JSON object with an `inkVersion` tag, a `root`
//! array holding the content tree, and optional `listDefs`. Arrays become
//! containers (a trailing object carries container metadata); strings and
//! objects encode the atomic forms dispatched below.

use serde_json::Value as Json;
use skein_types::{ListDefinition, ListDefinitions, ListItem, Path, StoryList, VariablePointer};

use crate::callstack::FrameKind;
use crate::choice::ChoicePoint;
use crate::error::StoryError;
use crate::natives::NativeOp;
use crate::node::{
    Container, ContentTree, ControlCommand, Divert, Node, NodeId, VariableAssignment,
    VariableReference,
};

/// The newest story-format version this runtime understands.
pub const SUPPORTED_VERSION: i64 = 21;

/// A parsed story document.
pub struct LoadedStory {
    /// The content tree.
    pub tree: ContentTree,
    /// List definitions from `listDefs`.
    pub list_definitions: ListDefinitions,
    /// The document's `inkVersion` tag.
    pub version: i64,
}

/// Parse a compiled story document.
///
/// # Errors
///
/// Malformed JSON, structural violations, and unknown tokens are load
/// errors.
pub fn load_document(text: &str) -> Result<LoadedStory, StoryError> {
    let doc: Json = serde_json::from_str(text)?;
    let doc = doc
        .as_object()
        .ok_or_else(|| StoryError::BadStructure("document is not an object".to_string()))?;

    let version = doc
        .get("inkVersion")
        .and_then(Json::as_i64)
        .ok_or_else(|| StoryError::BadStructure("missing inkVersion".to_string()))?;
    if version > SUPPORTED_VERSION {
        tracing::warn!(version, supported = SUPPORTED_VERSION, "story format is newer than this runtime");
    }

    let root = doc
        .get("root")
        .ok_or_else(|| StoryError::BadStructure("missing root".to_string()))?;
    let root = root
        .as_array()
        .ok_or_else(|| StoryError::BadStructure("root is not an array".to_string()))?;

    let mut tree = ContentTree::new();
    let root_id = tree.root();
    fill_container(&mut tree, root_id, root)?;

    let list_definitions = doc
        .get("listDefs")
        .map(parse_list_definitions)
        .transpose()?
        .unwrap_or_default();

    Ok(LoadedStory {
        tree,
        list_definitions,
        version,
    })
}

fn parse_list_definitions(token: &Json) -> Result<ListDefinitions, StoryError> {
    let map = token
        .as_object()
        .ok_or_else(|| StoryError::BadStructure("listDefs is not an object".to_string()))?;
    let mut defs = ListDefinitions::new();
    for (name, items_token) in map {
        let items_map = items_token.as_object().ok_or_else(|| {
            StoryError::BadStructure(format!("list definition '{name}' is not an object"))
        })?;
        let mut items = std::collections::BTreeMap::new();
        for (item_name, value) in items_map {
            let value = value.as_i64().ok_or_else(|| {
                StoryError::BadStructure(format!("list item '{name}.{item_name}' is not an integer"))
            })?;
            items.insert(item_name.clone(), value as i32);
        }
        defs.insert(ListDefinition::new(name, items));
    }
    Ok(defs)
}

/// Populate a container from its source array: ordered content first, then
/// the trailing metadata object (name, flags, named children).
fn fill_container(tree: &mut ContentTree, id: NodeId, array: &[Json]) -> Result<(), StoryError> {
    let mut content_len = array.len();
    if let Some(last) = array.last() {
        if last.is_object() || last.is_null() {
            content_len -= 1;
        }
    }

    for token in &array[..content_len] {
        let Some(child) = build_node(tree, id, token)? else {
            continue;
        };
        tree.container_mut(id).children.push(child);
        // Named containers in ordered content are addressable by name too.
        let child_name = match tree.node(child) {
            Node::Container(c) => c.name.clone(),
            _ => None,
        };
        if let Some(name) = child_name {
            tree.container_mut(id).named.insert(name, child);
        }
    }

    if let Some(Json::Object(meta)) = array.last() {
        for (key, value) in meta {
            match key.as_str() {
                "#n" => {
                    if let Some(name) = value.as_str() {
                        tree.container_mut(id).name = Some(name.to_string());
                    }
                }
                "#f" => {
                    let flags = value.as_i64().unwrap_or(0);
                    let container = tree.container_mut(id);
                    container.visits_counted = flags & 1 != 0;
                    container.turns_counted = flags & 2 != 0;
                    container.counting_at_start_only = flags & 4 != 0;
                }
                // Reserved keys with no content meaning.
                "flg" | "listDefs" => {}
                name => {
                    if tree.container(id).is_some_and(|c| c.named.contains_key(name)) {
                        return Err(StoryError::BadStructure(format!(
                            "duplicate named content '{name}'"
                        )));
                    }
                    let Some(child) = build_node(tree, id, value)? else {
                        continue;
                    };
                    if tree.node(child).is_container() {
                        tree.container_mut(child).name = Some(name.to_string());
                    }
                    tree.container_mut(id).named.insert(name.to_string(), child);
                }
            }
        }
    }

    Ok(())
}

/// Build one node (and its subtree) under a parent. JSON null yields no
/// node.
fn build_node(
    tree: &mut ContentTree,
    parent: NodeId,
    token: &Json,
) -> Result<Option<NodeId>, StoryError> {
    let node = match token {
        Json::Null => return Ok(None),
        Json::Bool(b) => Node::BoolValue(*b),
        Json::Number(n) => number_node(n)?,
        Json::String(s) => string_node(s)?,
        Json::Array(array) => {
            let id = tree.insert(Node::Container(Container::default()), parent);
            fill_container(tree, id, array)?;
            return Ok(Some(id));
        }
        Json::Object(map) => object_node(map)?,
    };
    Ok(Some(tree.insert(node, parent)))
}

fn number_node(n: &serde_json::Number) -> Result<Node, StoryError> {
    if let Some(i) = n.as_i64() {
        return Ok(Node::IntValue(i));
    }
    match n.as_f64() {
        Some(f) if f == f.trunc() && f.abs() < (i64::MAX as f64) => Ok(Node::IntValue(f as i64)),
        Some(f) => Ok(Node::FloatValue(f)),
        None => Err(StoryError::UnknownToken(n.to_string())),
    }
}

fn string_node(s: &str) -> Result<Node, StoryError> {
    if let Some(text) = s.strip_prefix('^') {
        return Ok(Node::StringAtom(text.to_string()));
    }
    match s {
        "\n" => return Ok(Node::StringAtom("\n".to_string())),
        "<>" => return Ok(Node::Glue),
        "void" => return Ok(Node::Void),
        _ => {}
    }

    // Divert shorthands: "-> target" and "->t-> target". Bare targets are
    // sibling references, made relative to the enclosing container.
    if let Some(target) = s.strip_prefix("-> ") {
        let mut divert = Divert::new();
        divert.target = Some(shorthand_target(target));
        return Ok(Node::Divert(divert));
    }
    if let Some(target) = s.strip_prefix("->t-> ") {
        let mut divert = Divert::pushing(FrameKind::Tunnel);
        divert.target = Some(shorthand_target(target));
        return Ok(Node::Divert(divert));
    }

    if let Some(command) = ControlCommand::from_token(s) {
        return Ok(Node::ControlCommand(command));
    }
    if let Some(op) = NativeOp::from_token(s) {
        // Bare "^" was consumed as a text prefix above; the document
        // encodes intersection as "L^".
        return Ok(Node::NativeCall(op));
    }

    Err(StoryError::UnknownToken(s.to_string()))
}

fn shorthand_target(target: &str) -> Path {
    if target.starts_with('.') {
        Path::from_str(target)
    } else {
        Path::from_str(&format!(".^.{target}"))
    }
}

fn object_node(map: &serde_json::Map<String, Json>) -> Result<Node, StoryError> {
    // Dispatch on the first recognized key.
    if let Some(target) = map.get("->") {
        let target = expect_str(target, "->")?;
        let mut divert = Divert::new();
        if map.contains_key("var") {
            divert.variable_name = Some(target.to_string());
        } else {
            divert.target = Some(Path::from_str(target));
        }
        divert.is_conditional = map.contains_key("c");
        return Ok(Node::Divert(divert));
    }
    if let Some(target) = map.get("->t->") {
        let mut divert = Divert::pushing(FrameKind::Tunnel);
        divert.target = Some(Path::from_str(expect_str(target, "->t->")?));
        divert.is_conditional = map.contains_key("c");
        return Ok(Node::Divert(divert));
    }
    if let Some(target) = map.get("f()") {
        let mut divert = Divert::pushing(FrameKind::Function);
        divert.target = Some(Path::from_str(expect_str(target, "f()")?));
        return Ok(Node::Divert(divert));
    }
    if let Some(target) = map.get("x()") {
        let mut divert = Divert::new();
        divert.is_external = true;
        divert.target = Some(Path::from_str(expect_str(target, "x()")?));
        divert.external_args = map
            .get("exArgs")
            .and_then(Json::as_u64)
            .unwrap_or(0) as usize;
        return Ok(Node::Divert(divert));
    }
    if let Some(name) = map.get("VAR?") {
        return Ok(Node::VariableReference(VariableReference {
            name: expect_str(name, "VAR?")?.to_string(),
        }));
    }
    if let Some(name) = map.get("VAR=") {
        return Ok(Node::VariableAssignment(VariableAssignment {
            name: expect_str(name, "VAR=")?.to_string(),
            new_declaration: !map.contains_key("re"),
            global: true,
        }));
    }
    if let Some(name) = map.get("temp=") {
        return Ok(Node::VariableAssignment(VariableAssignment {
            name: expect_str(name, "temp=")?.to_string(),
            new_declaration: !map.contains_key("re"),
            global: false,
        }));
    }
    for key in ["*", "+"] {
        if let Some(path) = map.get(key) {
            let mut point = ChoicePoint::new(Path::from_str(expect_str(path, "choice point")?));
            if let Some(flags) = map.get("flg").and_then(Json::as_u64) {
                point.set_flags(flags as u32);
            }
            return Ok(Node::ChoicePoint(point));
        }
    }
    if let Some(target) = map.get("^->") {
        return Ok(Node::DivertTargetValue(Path::from_str(expect_str(
            target, "^->",
        )?)));
    }
    if let Some(name) = map.get("^var") {
        let context = map.get("ci").and_then(Json::as_i64).unwrap_or(-1);
        return Ok(Node::VariablePointerValue(VariablePointer::new(
            expect_str(name, "^var")?,
            context as i32,
        )));
    }
    if map.contains_key("list") {
        return Ok(Node::ListValue(parse_list_value(map)?));
    }

    Err(StoryError::UnknownToken(
        serde_json::to_string(map).unwrap_or_else(|_| "<object>".to_string()),
    ))
}

/// Parse a list-value object: `{"list": {"Origin.item": n, …}, "origins": […]}`.
pub(crate) fn parse_list_value(
    map: &serde_json::Map<String, Json>,
) -> Result<StoryList, StoryError> {
    let items = map
        .get("list")
        .and_then(Json::as_object)
        .ok_or_else(|| StoryError::BadStructure("list value has no item map".to_string()))?;

    let mut list = StoryList::new();
    for (full_name, value) in items {
        let value = value.as_i64().ok_or_else(|| {
            StoryError::BadStructure(format!("list item '{full_name}' is not an integer"))
        })?;
        list.insert(ListItem::from_full_name(full_name), value as i32);
    }
    if let Some(origins) = map.get("origins").and_then(Json::as_array) {
        for origin in origins {
            if let Some(name) = origin.as_str() {
                list.origins.push(name.to_string());
            }
        }
    }
    Ok(list)
}

fn expect_str<'a>(token: &'a Json, context: &str) -> Result<&'a str, StoryError> {
    token
        .as_str()
        .ok_or_else(|| StoryError::BadStructure(format!("{context} target is not a string")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn load(root: Json) -> LoadedStory {
        let doc = json!({"inkVersion": 21, "root": root});
        load_document(&doc.to_string()).unwrap()
    }

    #[test]
    fn text_atoms_and_commands() {
        let story = load(json!(["^Hello", "\n", "<>", "void", "done", "end"]));
        let root = story.tree.container(story.tree.root()).unwrap();
        assert_eq!(root.children.len(), 6);
        assert_eq!(
            story.tree.node(root.children[0]),
            &Node::StringAtom("Hello".into())
        );
        assert_eq!(story.tree.node(root.children[2]), &Node::Glue);
        assert_eq!(story.tree.node(root.children[3]), &Node::Void);
        assert_eq!(
            story.tree.node(root.children[4]),
            &Node::ControlCommand(ControlCommand::Done)
        );
    }

    #[test]
    fn numbers_split_into_int_and_float() {
        let story = load(json!([5, 5.0, 2.5, true]));
        let root = story.tree.container(story.tree.root()).unwrap();
        assert_eq!(story.tree.node(root.children[0]), &Node::IntValue(5));
        assert_eq!(story.tree.node(root.children[1]), &Node::IntValue(5));
        assert_eq!(story.tree.node(root.children[2]), &Node::FloatValue(2.5));
        assert_eq!(story.tree.node(root.children[3]), &Node::BoolValue(true));
    }

    #[test]
    fn container_metadata() {
        let story = load(json!([
            ["^inner", {"#n": "knot", "#f": 3, "stitch": ["^named content", null]}]
        ]));
        let root_id = story.tree.root();
        let root = story.tree.container(root_id).unwrap();
        let knot_id = root.children[0];
        let knot = story.tree.container(knot_id).unwrap();

        assert_eq!(knot.name.as_deref(), Some("knot"));
        assert!(knot.visits_counted);
        assert!(knot.turns_counted);
        assert!(!knot.counting_at_start_only);
        assert!(knot.named.contains_key("stitch"));
        // Named container from metadata is addressable but not ordered.
        let stitch = knot.named["stitch"];
        assert!(!knot.children.contains(&stitch));
        assert_eq!(story.tree.path_of(stitch).to_string(), "knot.stitch");
        // The ordered named container is registered in the parent's map.
        assert_eq!(root.named.get("knot"), Some(&knot_id));
    }

    #[test]
    fn divert_forms() {
        let story = load(json!([
            {"->": "knot"},
            {"->": "target_var", "var": true, "c": true},
            {"->t->": "tunnel"},
            {"f()": "func"},
            {"x()": "host_fn", "exArgs": 2},
            "-> sibling",
            "->t-> sibling"
        ]));
        let root = story.tree.container(story.tree.root()).unwrap();

        let get = |i: usize| match story.tree.node(root.children[i]) {
            Node::Divert(d) => d.clone(),
            other => panic!("expected divert, got {other:?}"),
        };

        assert_eq!(get(0).target.unwrap().to_string(), "knot");
        let var = get(1);
        assert_eq!(var.variable_name.as_deref(), Some("target_var"));
        assert!(var.is_conditional);
        assert!(var.target.is_none());
        let tunnel = get(2);
        assert!(tunnel.pushes_to_stack);
        assert_eq!(tunnel.stack_push_kind, FrameKind::Tunnel);
        let func = get(3);
        assert_eq!(func.stack_push_kind, FrameKind::Function);
        let ext = get(4);
        assert!(ext.is_external);
        assert_eq!(ext.external_args, 2);
        assert_eq!(get(5).target.unwrap().to_string(), ".^.sibling");
        assert!(get(6).pushes_to_stack);
    }

    #[test]
    fn variable_operations() {
        let story = load(json!([
            {"VAR?": "x"},
            {"VAR=": "x"},
            {"VAR=": "x", "re": true},
            {"temp=": "t"}
        ]));
        let root = story.tree.container(story.tree.root()).unwrap();

        assert!(matches!(
            story.tree.node(root.children[0]),
            Node::VariableReference(r) if r.name == "x"
        ));
        assert!(matches!(
            story.tree.node(root.children[1]),
            Node::VariableAssignment(a) if a.new_declaration && a.global
        ));
        assert!(matches!(
            story.tree.node(root.children[2]),
            Node::VariableAssignment(a) if !a.new_declaration
        ));
        assert!(matches!(
            story.tree.node(root.children[3]),
            Node::VariableAssignment(a) if !a.global
        ));
    }

    #[test]
    fn choice_points_and_value_literals() {
        let story = load(json!([
            {"*": ".^.c-0", "flg": 18},
            {"^->": "knot.0"},
            {"^var": "x", "ci": 0},
            {"list": {"Kit.lamp": 1}, "origins": ["Kit"]}
        ]));
        let root = story.tree.container(story.tree.root()).unwrap();

        match story.tree.node(root.children[0]) {
            Node::ChoicePoint(cp) => {
                assert!(cp.has_start_content);
                assert!(cp.once_only);
                assert!(!cp.has_condition);
            }
            other => panic!("expected choice point, got {other:?}"),
        }
        assert!(matches!(
            story.tree.node(root.children[1]),
            Node::DivertTargetValue(p) if p.to_string() == "knot.0"
        ));
        assert!(matches!(
            story.tree.node(root.children[2]),
            Node::VariablePointerValue(vp) if vp.context_index == 0
        ));
        assert!(matches!(
            story.tree.node(root.children[3]),
            Node::ListValue(l) if l.len() == 1 && l.origins == vec!["Kit".to_string()]
        ));
    }

    #[test]
    fn list_defs_are_parsed() {
        let doc = json!({
            "inkVersion": 21,
            "root": ["done", null],
            "listDefs": {"Kit": {"lamp": 1, "rope": 2}}
        });
        let story = load_document(&doc.to_string()).unwrap();
        let def = story.list_definitions.get("Kit").unwrap();
        assert_eq!(def.value_of("rope"), Some(2));
    }

    #[test]
    fn malformed_documents_are_load_errors() {
        assert!(load_document("not json").is_err());
        assert!(load_document(r#"{"inkVersion": 21}"#).is_err());
        assert!(load_document(r#"{"root": []}"#).is_err());

        let doc = json!({"inkVersion": 21, "root": ["mystery-token"]});
        assert!(matches!(
            load_document(&doc.to_string()),
            Err(StoryError::UnknownToken(t)) if t == "mystery-token"
        ));
    }

    #[test]
    fn duplicate_named_content_is_rejected() {
        let doc = json!({
            "inkVersion": 21,
            "root": [
                ["^x", {"#n": "knot"}],
                {"knot": ["^y", null]}
            ]
        });
        assert!(matches!(
            load_document(&doc.to_string()),
            Err(StoryError::BadStructure(_))
        ));
    }
}
