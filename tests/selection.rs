//! Filtering, focus, zero-test handling and queue ordering.

mod common;

use common::Recorder;
use proctor::hash::generate_hash;
use proctor::report::Status;
use proctor::{FailureStore, MemoryStore, RunConfig, Suite};

fn register_xy(suite: &Suite) {
    suite.module("letters", |s| {
        s.test("x1", |assert| assert.ok(true, ""));
        s.test("y1", |assert| assert.ok(true, ""));
        s.test("x2", |assert| assert.ok(true, ""));
    });
}

#[test]
fn test_inverted_filter_excludes_matches() {
    let suite = Suite::new(RunConfig::default().with_filter("!y"));
    let recorder = Recorder::attach(&suite);
    register_xy(&suite);
    let report = suite.run_blocking().unwrap();
    assert_eq!(recorder.started(), vec!["x1", "x2"]);
    assert_eq!(report.test_counts.total, 2);
    // The suite still completes once its remaining test is accounted for.
    assert!(recorder.outline().contains(&"suiteEnd:letters".to_string()));
}

#[test]
fn test_regex_filter() {
    let suite = Suite::new(RunConfig::default().with_filter("/letters: X\\d/i"));
    let recorder = Recorder::attach(&suite);
    register_xy(&suite);
    suite.run_blocking().unwrap();
    assert_eq!(recorder.started(), vec!["x1", "x2"]);
}

#[test]
fn test_module_and_test_id_filters() {
    let suite = Suite::new(RunConfig::default().with_module("LETTERS"));
    let recorder = Recorder::attach(&suite);
    register_xy(&suite);
    suite.test("loose", |assert| assert.ok(true, ""));
    suite.run_blocking().unwrap();
    assert_eq!(recorder.started(), vec!["x1", "y1", "x2"]);

    let id = generate_hash(&["letters", "y1"]);
    let suite = Suite::new(RunConfig::default().with_test_id(id));
    let recorder = Recorder::attach(&suite);
    register_xy(&suite);
    suite.run_blocking().unwrap();
    assert_eq!(recorder.started(), vec!["y1"]);
}

#[test]
fn test_zero_tests_is_a_failure() {
    let suite = Suite::new(RunConfig::default().with_filter("zzz"));
    let recorder = Recorder::attach(&suite);
    register_xy(&suite);
    let report = suite.run_blocking().unwrap();
    assert_eq!(report.status, Status::Failed);
    assert_eq!(report.test_counts.total, 1);
    assert_eq!(
        recorder.failures("global failure"),
        vec!["No tests matched the filter \"zzz\"."]
    );
}

#[test]
fn test_zero_tests_allowed() {
    let suite = Suite::new(RunConfig::default().with_fail_on_zero_tests(false));
    let report = suite.run_blocking().unwrap();
    assert!(report.passed());
    assert_eq!(report.test_counts.total, 0);
}

#[test]
fn test_empty_suite_reports_no_tests_run() {
    let suite = Suite::default();
    let recorder = Recorder::attach(&suite);
    let report = suite.run_blocking().unwrap();
    assert!(!report.passed());
    assert_eq!(recorder.failures("global failure"), vec!["No tests were run."]);
}

#[test]
fn test_focused_group() {
    let suite = Suite::default();
    let recorder = Recorder::attach(&suite);
    suite.module("before focus", |s| {
        s.test("dropped", |assert| assert.ok(true, ""));
    });
    suite.module_only("focus", |s| {
        s.test("kept", |assert| assert.ok(true, ""));
        s.module("nested", |s| {
            s.test("kept too", |assert| assert.ok(true, ""));
        });
    });
    suite.module("after focus", |s| {
        s.test("ignored", |assert| assert.ok(true, ""));
    });
    suite.run_blocking().unwrap();
    assert_eq!(recorder.started(), vec!["kept", "kept too"]);
}

#[test]
fn test_focused_test() {
    let suite = Suite::default();
    let recorder = Recorder::attach(&suite);
    suite.test("dropped", |assert| assert.ok(true, ""));
    suite.module("g", |s| {
        s.test_only("focus", |assert| assert.ok(true, ""));
        s.test_only("second focus", |assert| assert.ok(true, ""));
        s.test("ignored", |assert| assert.ok(true, ""));
    });
    suite.run_blocking().unwrap();
    assert_eq!(recorder.started(), vec!["focus", "second focus"]);
}

#[test]
fn test_previous_failures_run_first() {
    let store = MemoryStore::with_failures([(generate_hash(&["g", "c"]), 1)]);
    let suite = Suite::with_store(RunConfig::default(), store.clone());
    let recorder = Recorder::attach(&suite);
    suite.module("g", |s| {
        for name in ["a", "b", "c"] {
            s.test(name, |assert| assert.ok(true, ""));
        }
    });
    suite.run_blocking().unwrap();
    assert_eq!(recorder.started(), vec!["c", "a", "b"]);
    let starts: Vec<bool> = recorder
        .events()
        .iter()
        .filter_map(|e| match e {
            proctor::Event::TestStart(t) => Some(t.previous_failure),
            _ => None,
        })
        .collect();
    assert_eq!(starts, vec![true, false, false]);
    // A clean run forgets everything.
    assert!(store.is_empty());
}

#[test]
fn test_reorder_disabled_keeps_registration_order() {
    let store = MemoryStore::with_failures([(generate_hash(&["g", "c"]), 1)]);
    let suite = Suite::with_store(RunConfig::default().with_reorder(false), store);
    let recorder = Recorder::attach(&suite);
    suite.module("g", |s| {
        for name in ["a", "b", "c"] {
            s.test(name, |assert| assert.ok(true, ""));
        }
    });
    suite.run_blocking().unwrap();
    assert_eq!(recorder.started(), vec!["a", "b", "c"]);
}

#[test]
fn test_failures_are_recorded_in_store() {
    let store = MemoryStore::new();
    let suite = Suite::with_store(RunConfig::default(), store.clone());
    suite.module("g", |s| {
        s.test("bad", |assert| {
            assert.ok(false, "");
            assert.ok(false, "");
        });
        s.test("good", |assert| assert.ok(true, ""));
    });
    suite.run_blocking().unwrap();
    assert_eq!(store.previous_failure(&generate_hash(&["g", "bad"])), Some(2));
    assert_eq!(store.previous_failure(&generate_hash(&["g", "good"])), None);
}

#[test]
fn test_seeded_order_is_reproducible() {
    let order = |seed: &str| {
        let suite = Suite::new(RunConfig::default().with_seed(seed));
        let recorder = Recorder::attach(&suite);
        suite.module("g", |s| {
            for i in 0..12 {
                s.test(&format!("t{i}"), |assert| assert.ok(true, ""));
            }
        });
        suite.run_blocking().unwrap();
        recorder.started()
    };
    let first = order("seed-1");
    assert_eq!(first, order("seed-1"));
    let mut sorted = first.clone();
    sorted.sort();
    let mut expected: Vec<String> = (0..12).map(|i| format!("t{i}")).collect();
    expected.sort();
    assert_eq!(sorted, expected);
}
