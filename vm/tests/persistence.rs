//! Save/load round-trips of full runtime state.

use serde_json::json;
use skein_vm::{Story, StoryError};

fn doc(root: serde_json::Value) -> String {
    json!({"inkVersion": 21, "root": root}).to_string()
}

fn choice_story_doc() -> String {
    doc(json!([
        [
            "ev", 3, {"VAR=": "score"}, "/ev",
            "^A line first.", "\n",
            "ev", "str", "^Option A", "/str", "/ev", {"*": ".^.c-0", "flg": 20},
            "ev", "str", "^Option B", "/str", "/ev", {"*": ".^.c-1", "flg": 20},
            {
                "c-0": ["^You chose A.", "\n", "done", null],
                "c-1": ["^You chose B.", "\n", "done", null]
            }
        ],
        "done"
    ]))
}

#[test]
fn save_and_restore_mid_choice() {
    let text = choice_story_doc();
    let mut original = Story::new(&text).unwrap();
    original.continue_maximally().unwrap();
    assert_eq!(original.current_choices().len(), 2);

    let saved = original.save().unwrap();

    let mut restored = Story::new(&text).unwrap();
    restored.load(&saved).unwrap();

    // Pointer, choices, globals, and output stream line up.
    assert_eq!(
        restored.state().current_pointer(),
        original.state().current_pointer()
    );
    let restored_choices = restored.current_choices();
    let original_choices = original.current_choices();
    assert_eq!(restored_choices.len(), original_choices.len());
    for (a, b) in original_choices.iter().zip(restored_choices) {
        assert_eq!(a.text, b.text);
        assert_eq!(a.index, b.index);
        assert_eq!(a.target_path, b.target_path);
        assert_eq!(a.thread_index, b.thread_index);
    }
    assert_eq!(
        restored.state().variables.globals,
        original.state().variables.globals
    );
    assert_eq!(restored.current_text(), original.current_text());

    // Both stories continue identically after the same choice.
    original.choose_choice(1).unwrap();
    restored.choose_choice(1).unwrap();
    assert_eq!(
        restored.continue_maximally().unwrap(),
        original.continue_maximally().unwrap()
    );
}

#[test]
fn save_load_save_is_stable() {
    let text = choice_story_doc();
    let mut story = Story::new(&text).unwrap();
    story.continue_maximally().unwrap();

    let first = story.save().unwrap();
    let mut reloaded = Story::new(&text).unwrap();
    reloaded.load(&first).unwrap();
    let second = reloaded.save().unwrap();

    assert_eq!(first, second);
}

#[test]
fn visit_counts_and_randomness_survive_a_round_trip() {
    let text = doc(json!([
        {"->": "knot"},
        {
            "knot": [
                "^visited", "\n",
                "ev", 9, "srnd", "pop", "/ev",
                "done",
                {"#f": 1}
            ]
        }
    ]));
    let mut story = Story::new(&text).unwrap();
    story.continue_maximally().unwrap();

    let saved = story.save().unwrap();
    let mut restored = Story::new(&text).unwrap();
    restored.load(&saved).unwrap();

    assert_eq!(restored.state().visit_counts, story.state().visit_counts);
    assert_eq!(restored.state().story_seed, 9);
    assert_eq!(restored.state().previous_random, 0);
    assert_eq!(
        restored.state().current_turn_index,
        story.state().current_turn_index
    );
}

#[test]
fn choice_thread_snapshots_survive_a_round_trip() {
    let text = doc(json!([
        "thread",
        {"->": "opts"},
        "^main", "\n",
        "done",
        {
            "opts": [
                "ev", "str", "^Go", "/str", "/ev", {"*": ".^.c-0", "flg": 20},
                "done",
                {"c-0": ["^Gone", "\n", "done", null]}
            ]
        }
    ]));
    let mut story = Story::new(&text).unwrap();
    assert_eq!(story.continue_maximally().unwrap(), "main\n");

    // The choice's generating thread has ended, so the save must carry its
    // snapshot.
    let saved = story.save().unwrap();
    assert!(saved.contains("choiceThreads"));

    let mut restored = Story::new(&text).unwrap();
    restored.load(&saved).unwrap();
    restored.choose_choice(0).unwrap();
    assert_eq!(restored.continue_maximally().unwrap(), "Gone\n");
}

#[test]
fn temporaries_and_frames_survive_a_round_trip() {
    // Save taken while inside a tunnel with a live temporary.
    let text = doc(json!([
        {"->t->": "tunnel"},
        "^after", "\n",
        "done",
        {
            "tunnel": [
                "ev", 5, {"temp=": "depth"}, "/ev",
                "^inside", "\n",
                "ev", {"VAR?": "depth"}, "out", "/ev", "\n",
                "->->",
                null
            ]
        }
    ]));
    let mut story = Story::new(&text).unwrap();
    assert_eq!(story.continue_story().unwrap(), "inside\n");

    let saved = story.save().unwrap();
    let mut restored = Story::new(&text).unwrap();
    restored.load(&saved).unwrap();

    assert_eq!(restored.state().callstack().depth(), 2);
    assert_eq!(restored.continue_maximally().unwrap(), "5\nafter\n");
}

#[test]
fn loading_onto_a_changed_tree_degrades_with_warnings() {
    let original_text = doc(json!([
        {"->": "knot"},
        {"knot": ["^in knot", "\n", "done", {"#f": 1}]}
    ]));
    let mut story = Story::new(&original_text).unwrap();
    story.continue_maximally().unwrap();
    let saved = story.save().unwrap();

    // A tree where the knot no longer exists.
    let changed_text = doc(json!(["^different", "\n", "done"]));
    let mut changed = Story::new(&changed_text).unwrap();
    changed.load(&saved).unwrap();
    assert!(!changed.state().warnings.is_empty());
}

#[test]
fn newer_save_versions_are_rejected() {
    let text = doc(json!(["^x", "\n", "done"]));
    let mut story = Story::new(&text).unwrap();
    let saved = story.save().unwrap();
    let bumped = saved.replace("\"inkSaveVersion\":10", "\"inkSaveVersion\":99");
    assert!(matches!(
        story.load(&bumped),
        Err(StoryError::IncompatibleState(_))
    ));
    let _ = story.continue_maximally().unwrap();
}

#[test]
fn malformed_save_documents_are_errors() {
    let text = doc(json!(["^x", "\n", "done"]));
    let mut story = Story::new(&text).unwrap();
    assert!(story.load("not json").is_err());
    assert!(story.load("{}").is_err());
}
