//! Flows, list operations, sequences, and the counting commands, driven
//! end-to-end.

use serde_json::json;
use skein_vm::{Story, StoryError, DEFAULT_FLOW};

fn story(root: serde_json::Value) -> Story {
    let doc = json!({"inkVersion": 21, "root": root});
    Story::new(&doc.to_string()).unwrap()
}

#[test]
fn flows_run_independently_and_resume() {
    let mut s = story(json!(["^first", "\n", "^second", "\n", "done"]));
    assert_eq!(s.continue_story().unwrap(), "first\n");

    // A fresh flow starts from the top with its own call stack.
    s.switch_flow("side");
    assert_eq!(s.state().current_flow_name, "side");
    assert_eq!(s.continue_story().unwrap(), "first\n");
    assert_eq!(s.continue_story().unwrap(), "second\n");

    // The default flow kept its position.
    s.switch_to_default_flow();
    assert_eq!(s.state().current_flow_name, DEFAULT_FLOW);
    assert_eq!(s.continue_story().unwrap(), "second\n");
}

#[test]
fn flow_removal_rules() {
    let mut s = story(json!(["^x", "\n", "done"]));
    s.switch_flow("side");
    assert_eq!(s.state().flows.len(), 2);

    // Removing the current flow drops back to the default.
    s.remove_flow("side").unwrap();
    assert_eq!(s.state().current_flow_name, DEFAULT_FLOW);
    assert!(matches!(
        s.remove_flow("side"),
        Err(StoryError::NoSuchFlow(_))
    ));
    assert!(matches!(
        s.remove_flow(DEFAULT_FLOW),
        Err(StoryError::CannotRemoveDefaultFlow)
    ));
}

#[test]
fn flows_survive_a_save_round_trip() {
    let text = json!({"inkVersion": 21, "root": ["^a", "\n", "^b", "\n", "done"]}).to_string();
    let mut s = Story::new(&text).unwrap();
    s.continue_story().unwrap();
    s.switch_flow("side");
    s.continue_story().unwrap();

    let saved = s.save().unwrap();
    let mut restored = Story::new(&text).unwrap();
    restored.load(&saved).unwrap();

    assert_eq!(restored.state().current_flow_name, "side");
    assert_eq!(restored.state().flows.len(), 2);
    // The side flow continues where it stopped; the default likewise.
    assert_eq!(restored.continue_story().unwrap(), "b\n");
    restored.switch_to_default_flow();
    assert_eq!(restored.continue_story().unwrap(), "b\n");
}

#[test]
fn list_from_int_looks_up_the_definition() {
    let doc = json!({
        "inkVersion": 21,
        "root": [
            "ev", "str", "^Kit", "/str", 2, "listInt", "out", "/ev", "\n", "done"
        ],
        "listDefs": {"Kit": {"lamp": 1, "rope": 2, "torch": 3}}
    });
    let mut s = Story::new(&doc.to_string()).unwrap();
    assert_eq!(s.continue_story().unwrap(), "rope\n");
}

#[test]
fn list_from_int_with_unknown_definition_is_an_error() {
    let mut s = story(json!([
        "ev", "str", "^Ghost", "/str", 1, "listInt", "/ev", "done"
    ]));
    assert!(matches!(
        s.continue_story(),
        Err(StoryError::NoSuchList(name)) if name == "Ghost"
    ));
}

#[test]
fn list_range_keeps_values_between_the_bounds() {
    let mut s = story(json!([
        "ev",
        {"list": {"Kit.lamp": 1, "Kit.rope": 2, "Kit.torch": 3}},
        1, 2, "range", "out", "/ev", "\n", "done"
    ]));
    assert_eq!(s.continue_story().unwrap(), "lamp, rope\n");
}

#[test]
fn list_random_draws_a_member_deterministically() {
    let root = json!([
        "ev", 5, "srnd", "pop",
        {"list": {"Kit.lamp": 1, "Kit.rope": 2, "Kit.torch": 3}},
        "lrnd", "out", "/ev", "\n", "done"
    ]);
    let mut a = story(root.clone());
    let mut b = story(root);

    let text_a = a.continue_story().unwrap();
    assert_eq!(text_a, b.continue_story().unwrap());
    let item = text_a.trim();
    assert!(
        ["lamp", "rope", "torch"].contains(&item),
        "unexpected item {item}"
    );
}

#[test]
fn list_union_and_difference_through_operators() {
    let mut s = story(json!([
        "ev",
        {"list": {"Kit.lamp": 1}},
        {"list": {"Kit.rope": 2}},
        "+",
        {"list": {"Kit.lamp": 1}},
        "-",
        "out", "/ev", "\n", "done"
    ]));
    assert_eq!(s.continue_story().unwrap(), "rope\n");
}

#[test]
fn sequence_shuffle_visits_every_element_once_per_loop() {
    // Three draws of a three-element shuffle within one loop must be a
    // permutation of 0..3, whatever the story seed is.
    let mut s = story(json!([
        "ev",
        0, 3, "seq", "out",
        1, 3, "seq", "out",
        2, 3, "seq", "out",
        "/ev", "\n", "done"
    ]));
    let text = s.continue_story().unwrap();
    let mut digits: Vec<char> = text.trim().chars().collect();
    digits.sort_unstable();
    assert_eq!(digits, vec!['0', '1', '2'], "draws were {text:?}");
}

#[test]
fn sequence_shuffle_is_stable_for_a_seed() {
    let root = json!([
        "ev", 11, "srnd", "pop", 0, 4, "seq", "out", "/ev", "\n", "done"
    ]);
    let mut a = story(root.clone());
    let mut b = story(root);
    assert_eq!(
        a.continue_story().unwrap(),
        b.continue_story().unwrap()
    );
}

#[test]
fn choice_count_observes_the_current_batch() {
    let mut s = story(json!([
        [
            "ev", "str", "^Only option", "/str", "/ev", {"*": ".^.c-0", "flg": 20},
            "ev", "choiceCnt", "out", "/ev", "\n",
            {"c-0": ["^Taken.", "\n", "done", null]}
        ],
        "done"
    ]));
    assert_eq!(s.continue_story().unwrap(), "1\n");
    assert_eq!(s.current_choices().len(), 1);
}

#[test]
fn visit_index_counts_from_zero() {
    let mut s = story(json!([
        {"->": "knot"},
        {"knot": ["ev", "visit", "out", "/ev", "\n", "done", {"#f": 1}]}
    ]));
    assert_eq!(s.continue_story().unwrap(), "0\n");
}

#[test]
fn turns_since_reports_the_gap_to_the_visit() {
    let mut s = story(json!([
        {"->": "knot"},
        {
            "knot": [
                "ev", {"^->": "knot"}, "turns", "out", "/ev", "\n",
                "done",
                {"#f": 3}
            ]
        }
    ]));
    // Visited this turn: zero turns since.
    assert_eq!(s.continue_story().unwrap(), "0\n");
}

#[test]
fn turns_since_is_minus_one_for_unvisited_targets() {
    let mut s = story(json!([
        "ev", {"^->": "knot"}, "turns", "out", "/ev", "\n",
        "done",
        {"knot": ["^never seen", "\n", "done", {"#f": 3}]}
    ]));
    assert_eq!(s.continue_story().unwrap(), "-1\n");
}
