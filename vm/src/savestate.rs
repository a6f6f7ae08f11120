//! Save and restore of full runtime state.
//!
//! The save document is JSON keyed exactly as the wire format prescribes:
//! per-flow call stacks (threads of frames with `cPath`/`idx`/`exp`/`type`/
//! `temp`), output streams, pending choices with thread snapshots for
//! choices whose generating thread has ended, globals, the evaluation
//! stack, visit bookkeeping keyed by container path, and the randomness
//! state. Values use the same atomic encodings as the compiled story.
//! Loading tolerates paths that no longer resolve by substituting null
//! pointers and warning.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use skein_types::{Path, Value, VariablePointer};

use crate::callstack::{CallStack, Frame, FrameKind, Thread};
use crate::choice::Choice;
use crate::error::StoryError;
use crate::flow::Flow;
use crate::loader;
use crate::outstream::StreamItem;
use crate::pointer::Pointer;
use crate::state::{StoryState, FORMAT_VERSION, SAVE_VERSION};
use crate::story::Story;

#[derive(Debug, Serialize, Deserialize)]
struct SaveDoc {
    flows: BTreeMap<String, FlowDto>,
    #[serde(rename = "currentFlowName")]
    current_flow_name: String,
    #[serde(rename = "variablesState")]
    variables_state: BTreeMap<String, Json>,
    #[serde(rename = "evalStack")]
    eval_stack: Vec<Json>,
    #[serde(
        rename = "currentDivertTarget",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    current_divert_target: Option<String>,
    #[serde(rename = "visitCounts")]
    visit_counts: BTreeMap<String, i32>,
    #[serde(rename = "turnIndices")]
    turn_indices: BTreeMap<String, i32>,
    #[serde(rename = "turnIdx")]
    turn_idx: i32,
    #[serde(rename = "storySeed")]
    story_seed: i64,
    #[serde(rename = "previousRandom")]
    previous_random: i64,
    #[serde(rename = "inkSaveVersion")]
    save_version: i32,
    #[serde(rename = "inkFormatVersion")]
    format_version: i32,
}

#[derive(Debug, Serialize, Deserialize)]
struct FlowDto {
    callstack: CallStackDto,
    #[serde(rename = "outputStream")]
    output_stream: Vec<Json>,
    #[serde(
        rename = "choiceThreads",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    choice_threads: BTreeMap<String, ThreadDto>,
    #[serde(
        rename = "currentChoices",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    current_choices: Vec<ChoiceDto>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CallStackDto {
    threads: Vec<ThreadDto>,
    #[serde(rename = "threadCounter")]
    thread_counter: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ThreadDto {
    callstack: Vec<FrameDto>,
    #[serde(rename = "threadIndex")]
    thread_index: i64,
    #[serde(
        rename = "previousContentObject",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    previous_content_object: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FrameDto {
    #[serde(rename = "cPath", default, skip_serializing_if = "Option::is_none")]
    c_path: Option<String>,
    idx: i32,
    exp: bool,
    #[serde(rename = "type")]
    kind: u8,
    #[serde(rename = "temp", default, skip_serializing_if = "BTreeMap::is_empty")]
    temporaries: BTreeMap<String, Json>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChoiceDto {
    text: String,
    index: usize,
    #[serde(rename = "originalChoicePath")]
    source_path: String,
    #[serde(rename = "originalThreadIndex")]
    thread_index: i64,
    #[serde(rename = "targetPath")]
    target_path: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tags: Vec<String>,
}

// ---- Saving ----

/// Serialize the story's full runtime state.
pub(crate) fn save(story: &Story) -> Result<String, StoryError> {
    let state = &story.state;

    let mut flows = BTreeMap::new();
    for (name, flow) in &state.flows {
        flows.insert(name.clone(), flow_to_dto(story, flow));
    }

    let variables_state = state
        .variables
        .globals
        .iter()
        .map(|(name, value)| (name.clone(), value_to_json(value)))
        .collect();

    let doc = SaveDoc {
        flows,
        current_flow_name: state.current_flow_name.clone(),
        variables_state,
        eval_stack: state.evaluation_stack.iter().map(value_to_json).collect(),
        current_divert_target: state
            .diverted_pointer
            .path(&story.tree)
            .map(|p| p.to_string()),
        visit_counts: state
            .visit_counts
            .iter()
            .map(|(id, count)| (story.tree.path_of(*id).to_string(), *count))
            .collect(),
        turn_indices: state
            .turn_indices
            .iter()
            .map(|(id, turn)| (story.tree.path_of(*id).to_string(), *turn))
            .collect(),
        turn_idx: state.current_turn_index,
        story_seed: state.story_seed,
        previous_random: state.previous_random,
        save_version: SAVE_VERSION,
        format_version: FORMAT_VERSION,
    };

    Ok(serde_json::to_string(&doc)?)
}

fn flow_to_dto(story: &Story, flow: &Flow) -> FlowDto {
    // Thread snapshots must be written for choices whose generating thread
    // is no longer on the call stack.
    let mut choice_threads = BTreeMap::new();
    for choice in &flow.choices {
        let live = flow
            .callstack
            .threads
            .iter()
            .any(|t| t.index == choice.thread_index);
        if !live {
            if let Some(thread) = &choice.thread_at_generation {
                choice_threads.insert(
                    choice.thread_index.to_string(),
                    thread_to_dto(story, thread),
                );
            }
        }
    }

    FlowDto {
        callstack: CallStackDto {
            threads: flow
                .callstack
                .threads
                .iter()
                .map(|t| thread_to_dto(story, t))
                .collect(),
            thread_counter: flow.callstack.thread_counter,
        },
        output_stream: flow.output.iter().map(|i| stream_item_to_json(i)).collect(),
        choice_threads,
        current_choices: flow
            .choices
            .iter()
            .map(|c| ChoiceDto {
                text: c.text.clone(),
                index: c.index,
                source_path: c.source_path.clone(),
                thread_index: c.thread_index,
                target_path: c.target_path.to_string(),
                tags: c.tags.clone(),
            })
            .collect(),
    }
}

fn thread_to_dto(story: &Story, thread: &Thread) -> ThreadDto {
    ThreadDto {
        callstack: thread
            .frames
            .iter()
            .map(|frame| FrameDto {
                c_path: frame
                    .pointer
                    .container
                    .map(|id| story.tree.path_of(id).to_string()),
                idx: frame.pointer.index,
                exp: frame.in_expression_evaluation,
                kind: frame.kind.tag(),
                temporaries: frame
                    .temporaries
                    .iter()
                    .map(|(name, value)| (name.clone(), value_to_json(value)))
                    .collect(),
            })
            .collect(),
        thread_index: thread.index,
        previous_content_object: thread
            .previous_pointer
            .path(&story.tree)
            .map(|p| p.to_string()),
    }
}

/// A runtime value in its atomic wire form.
fn value_to_json(value: &Value) -> Json {
    match value {
        Value::Void => Json::from("void"),
        Value::Bool(b) => Json::from(*b),
        Value::Int(i) => Json::from(*i),
        Value::Float(f) => Json::from(*f),
        Value::Str(s) => {
            if value.is_newline() {
                Json::from("\n")
            } else {
                Json::from(format!("^{s}"))
            }
        }
        Value::List(list) => {
            let items: serde_json::Map<String, Json> = list
                .items
                .iter()
                .map(|(item, v)| (item.full_name(), Json::from(*v)))
                .collect();
            let mut map = serde_json::Map::new();
            map.insert("list".to_string(), Json::Object(items));
            if list.is_empty() && !list.origins.is_empty() {
                map.insert(
                    "origins".to_string(),
                    Json::Array(list.origins.iter().map(|o| Json::from(o.clone())).collect()),
                );
            }
            Json::Object(map)
        }
        Value::DivertTarget(path) => {
            serde_json::json!({ "^->": path.to_string() })
        }
        Value::VariablePointer(vp) => {
            serde_json::json!({ "^var": vp.name, "ci": vp.context_index })
        }
    }
}

fn stream_item_to_json(item: &StreamItem) -> Json {
    match item {
        StreamItem::Value(value) => value_to_json(value),
        StreamItem::Glue => Json::from("<>"),
        StreamItem::StringStart => Json::from("str"),
        StreamItem::TagStart => Json::from("#"),
        StreamItem::Tag(text) => serde_json::json!({ "#": text }),
    }
}

// ---- Loading ----

/// Restore the story's full runtime state from a save document.
pub(crate) fn load(story: &mut Story, text: &str) -> Result<(), StoryError> {
    let doc: SaveDoc = serde_json::from_str(text)?;
    if doc.save_version > SAVE_VERSION {
        return Err(StoryError::IncompatibleState(format!(
            "save version {} is newer than supported version {SAVE_VERSION}",
            doc.save_version
        )));
    }

    let mut state = StoryState::new(story.tree.root());
    let mut warnings = Vec::new();

    state.variables.globals = doc
        .variables_state
        .iter()
        .map(|(name, token)| Ok((name.clone(), json_to_value(token)?)))
        .collect::<Result<_, StoryError>>()?;

    state.evaluation_stack = doc
        .eval_stack
        .iter()
        .map(json_to_value)
        .collect::<Result<_, StoryError>>()?;

    state.diverted_pointer = match &doc.current_divert_target {
        Some(path) => restore_pointer_at(story, path, &mut warnings),
        None => Pointer::NULL,
    };

    state.visit_counts = restore_counts(story, &doc.visit_counts, &mut warnings);
    state.turn_indices = restore_counts(story, &doc.turn_indices, &mut warnings);
    state.current_turn_index = doc.turn_idx;
    state.story_seed = doc.story_seed;
    state.previous_random = doc.previous_random;

    state.flows.clear();
    for (name, flow_dto) in &doc.flows {
        let flow = restore_flow(story, name, flow_dto, &mut warnings)?;
        state.flows.insert(name.clone(), flow);
    }
    if !state.flows.contains_key(&doc.current_flow_name) {
        return Err(StoryError::IncompatibleState(format!(
            "current flow '{}' is not among the saved flows",
            doc.current_flow_name
        )));
    }
    state.current_flow_name = doc.current_flow_name.clone();

    state.warnings = warnings;
    story.state = state;
    Ok(())
}

fn restore_counts(
    story: &Story,
    counts: &BTreeMap<String, i32>,
    warnings: &mut Vec<String>,
) -> BTreeMap<crate::node::NodeId, i32> {
    let mut out = BTreeMap::new();
    for (path, count) in counts {
        let id = story
            .tree
            .at_path(&Path::from_str(path))
            .node
            .filter(|id| story.tree.node(*id).is_container());
        match id {
            Some(id) => {
                out.insert(id, *count);
            }
            None => warnings.push(format!(
                "saved count for '{path}' no longer resolves to a container; dropped"
            )),
        }
    }
    out
}

fn restore_flow(
    story: &Story,
    name: &str,
    dto: &FlowDto,
    warnings: &mut Vec<String>,
) -> Result<Flow, StoryError> {
    let mut callstack = CallStack::new(story.tree.root());
    callstack.thread_counter = dto.callstack.thread_counter;
    callstack.threads = dto
        .callstack
        .threads
        .iter()
        .map(|t| restore_thread(story, t, warnings))
        .collect::<Result<_, StoryError>>()?;
    if callstack.threads.is_empty() {
        return Err(StoryError::IncompatibleState(format!(
            "flow '{name}' has no threads"
        )));
    }

    let output = dto
        .output_stream
        .iter()
        .map(json_to_stream_item)
        .collect::<Result<_, StoryError>>()?;

    let mut choices = Vec::with_capacity(dto.current_choices.len());
    for choice_dto in &dto.current_choices {
        let thread_at_generation = match dto.choice_threads.get(&choice_dto.thread_index.to_string())
        {
            Some(thread_dto) => Some(restore_thread(story, thread_dto, warnings)?),
            None => callstack
                .threads
                .iter()
                .find(|t| t.index == choice_dto.thread_index)
                .cloned(),
        };
        choices.push(Choice {
            text: choice_dto.text.clone(),
            index: choice_dto.index,
            target_path: Path::from_str(&choice_dto.target_path),
            source_path: choice_dto.source_path.clone(),
            thread_index: choice_dto.thread_index,
            thread_at_generation,
            invisible_default: false,
            tags: choice_dto.tags.clone(),
        });
    }

    Ok(Flow {
        name: name.to_string(),
        callstack,
        output,
        choices,
    })
}

fn restore_thread(
    story: &Story,
    dto: &ThreadDto,
    warnings: &mut Vec<String>,
) -> Result<Thread, StoryError> {
    let mut frames = Vec::with_capacity(dto.callstack.len());
    for frame_dto in &dto.callstack {
        let kind = FrameKind::from_tag(frame_dto.kind).ok_or_else(|| {
            StoryError::IncompatibleState(format!("unknown frame type tag {}", frame_dto.kind))
        })?;
        let pointer = match &frame_dto.c_path {
            Some(c_path) => restore_container_pointer(story, c_path, frame_dto.idx, warnings),
            None => Pointer::NULL,
        };
        let mut frame = Frame::new(kind, pointer, frame_dto.exp);
        for (name, token) in &frame_dto.temporaries {
            frame.temporaries.insert(name.clone(), json_to_value(token)?);
        }
        frames.push(frame);
    }
    if frames.is_empty() {
        return Err(StoryError::IncompatibleState(
            "saved thread has no frames".to_string(),
        ));
    }

    let previous_pointer = match &dto.previous_content_object {
        Some(path) => restore_pointer_at(story, path, warnings),
        None => Pointer::NULL,
    };

    Ok(Thread {
        frames,
        index: dto.thread_index,
        previous_pointer,
    })
}

/// Resolve a saved container path + index to a pointer, degrading to null
/// with a warning when the story tree no longer matches.
fn restore_container_pointer(
    story: &Story,
    c_path: &str,
    index: i32,
    warnings: &mut Vec<String>,
) -> Pointer {
    let path = Path::from_str(c_path);
    let result = story.tree.at_path(&path);
    if result.approximate {
        warnings.push(format!("saved pointer '{c_path}' resolved approximately"));
    }
    match result.node {
        Some(id) if story.tree.node(id).is_container() => Pointer::new(id, index),
        Some(id) => match story.tree.parent(id) {
            Some(parent) => Pointer::new(parent, index),
            None => Pointer::NULL,
        },
        None => {
            warnings.push(format!(
                "saved pointer '{c_path}' no longer resolves; substituting null"
            ));
            Pointer::NULL
        }
    }
}

/// Resolve a saved content path (container path + slot) to a pointer.
fn restore_pointer_at(story: &Story, path: &str, warnings: &mut Vec<String>) -> Pointer {
    let pointer = story.tree.pointer_at_path(&Path::from_str(path));
    if pointer.is_null() {
        warnings.push(format!(
            "saved path '{path}' no longer resolves; substituting null"
        ));
    }
    pointer
}

// ---- Value decoding ----

/// Decode an atomic wire form back into a value. Unlike the story loader,
/// whole floats keep their float tag here (`5.0` reloads as a float).
fn json_to_value(token: &Json) -> Result<Value, StoryError> {
    match token {
        Json::Bool(b) => Ok(Value::Bool(*b)),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Int(i))
            } else {
                n.as_f64()
                    .map(Value::Float)
                    .ok_or_else(|| StoryError::IncompatibleState(format!("bad number {n}")))
            }
        }
        Json::String(s) => {
            if let Some(text) = s.strip_prefix('^') {
                return Ok(Value::Str(text.to_string()));
            }
            match s.as_str() {
                "\n" => Ok(Value::Str("\n".to_string())),
                "void" => Ok(Value::Void),
                other => Err(StoryError::IncompatibleState(format!(
                    "unknown value token '{other}' in save document"
                ))),
            }
        }
        Json::Object(map) => {
            if let Some(target) = map.get("^->").and_then(Json::as_str) {
                return Ok(Value::DivertTarget(Path::from_str(target)));
            }
            if let Some(name) = map.get("^var").and_then(Json::as_str) {
                let context = map.get("ci").and_then(Json::as_i64).unwrap_or(-1);
                return Ok(Value::VariablePointer(VariablePointer::new(
                    name,
                    context as i32,
                )));
            }
            if map.contains_key("list") {
                return Ok(Value::List(loader::parse_list_value(map)?));
            }
            Err(StoryError::IncompatibleState(format!(
                "unknown value object in save document: {}",
                Json::Object(map.clone())
            )))
        }
        other => Err(StoryError::IncompatibleState(format!(
            "unexpected token in save document: {other}"
        ))),
    }
}

fn json_to_stream_item(token: &Json) -> Result<StreamItem, StoryError> {
    if let Json::String(s) = token {
        match s.as_str() {
            "<>" => return Ok(StreamItem::Glue),
            "str" => return Ok(StreamItem::StringStart),
            "#" => return Ok(StreamItem::TagStart),
            _ => {}
        }
    }
    if let Json::Object(map) = token {
        if let Some(text) = map.get("#").and_then(Json::as_str) {
            return Ok(StreamItem::Tag(text.to_string()));
        }
    }
    Ok(StreamItem::Value(json_to_value(token)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_types::{ListItem, StoryList};

    #[test]
    fn atomic_value_forms_round_trip() {
        let values = vec![
            Value::Void,
            Value::Bool(true),
            Value::Int(-3),
            Value::Float(2.5),
            Value::Str("hi".into()),
            Value::Str("\n".into()),
            Value::DivertTarget(Path::from_str("knot.0")),
            Value::VariablePointer(VariablePointer::new("x", 1)),
            Value::List(StoryList::single(ListItem::new("Kit", "lamp"), 1)),
        ];
        for value in values {
            let encoded = value_to_json(&value);
            let decoded = json_to_value(&encoded).unwrap();
            assert_eq!(decoded, value, "round-trip of {encoded}");
        }
    }

    #[test]
    fn whole_floats_keep_their_tag() {
        let encoded = value_to_json(&Value::Float(5.0));
        assert_eq!(encoded.to_string(), "5.0");
        assert_eq!(json_to_value(&encoded).unwrap(), Value::Float(5.0));
    }

    #[test]
    fn empty_list_keeps_origins() {
        let mut list = StoryList::new();
        list.origins.push("Kit".to_string());
        let encoded = value_to_json(&Value::List(list.clone()));
        let decoded = json_to_value(&encoded).unwrap();
        assert_eq!(decoded, Value::List(list));
    }

    #[test]
    fn stream_items_round_trip() {
        let items = vec![
            StreamItem::Value(Value::Str("text".into())),
            StreamItem::Glue,
            StreamItem::StringStart,
            StreamItem::TagStart,
            StreamItem::Tag("mood: dark".into()),
        ];
        for item in items {
            let encoded = stream_item_to_json(&item);
            let decoded = json_to_stream_item(&encoded).unwrap();
            assert_eq!(decoded, item, "round-trip of {encoded}");
        }
    }

    #[test]
    fn unknown_tokens_are_state_errors() {
        assert!(json_to_value(&Json::from("mystery")).is_err());
        assert!(json_to_value(&serde_json::json!({"wat": 1})).is_err());
    }
}
