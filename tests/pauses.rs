//! Async bodies, pauses and timeouts, driven on a current-thread tokio runtime.

mod common;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use common::{entries, log, push, Recorder};
use proctor::report::Status;
use proctor::{Assert, EngineError, Matcher, Outcome, ProtocolError, Release, RunConfig, Suite};

#[tokio::test]
async fn test_async_body_is_awaited() {
    let suite = Suite::default();
    let recorder = Recorder::attach(&suite);
    let calls = log();
    let l = calls.clone();
    suite.test_async("sleeps", move |assert| {
        let l = l.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            push(&l, "woke");
            assert.ok(true, "after sleep");
            Ok(())
        }
    });
    let l = calls.clone();
    suite.test("next", move |assert| {
        push(&l, "next");
        assert.ok(true, "");
    });

    let report = suite.run().await.unwrap();
    assert!(report.passed());
    assert_eq!(entries(&calls), vec!["woke", "next"]);
    assert_eq!(recorder.test_end("sleeps").assertions.len(), 1);
}

#[tokio::test]
async fn test_rejected_future_fails_the_test() {
    let suite = Suite::default();
    let recorder = Recorder::attach(&suite);
    suite.test_async("rejects", |_| async { anyhow::bail!("nope") });
    suite.module("g", |s| {
        s.before(|_| Outcome::pending(async { Err(anyhow::anyhow!("hook nope")) }));
        s.test("t", |assert| assert.ok(true, ""));
    });
    suite.run().await.unwrap();
    assert_eq!(
        recorder.failures("rejects"),
        vec!["Promise rejected during \"rejects\": nope"]
    );
    assert_eq!(
        recorder.failures("t"),
        vec!["Promise rejected before \"t\": hook nope"]
    );
}

#[tokio::test]
async fn test_pause_released_from_spawned_task() {
    let suite = Suite::default();
    let recorder = Recorder::attach(&suite);
    suite.test("waits", |assert| {
        let release = assert.pause(2);
        for delay in [3, 6] {
            let release = release.clone();
            let assert = assert.clone();
            tokio::task::spawn_local(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                assert.ok(true, "tick");
                release.release().unwrap();
            });
        }
    });
    suite.run().await.unwrap();
    let end = recorder.test_end("waits");
    assert_eq!(end.status, Status::Passed);
    assert_eq!(end.assertions.len(), 2);
}

#[tokio::test]
async fn test_failing_spawned_work_fails_the_test() {
    let suite = Suite::default();
    let recorder = Recorder::attach(&suite);
    suite.test("panics", |assert| {
        let release = assert.pause(1);
        assert.spawn(async move {
            tokio::task::yield_now().await;
            if !release.is_cancelled() {
                panic!("worker crashed");
            }
            Ok::<(), anyhow::Error>(())
        });
    });
    suite.test("errors", |assert| {
        let _release = assert.pause(1);
        assert.spawn(async { anyhow::bail!("worker failed") });
    });
    suite.test("next", |assert| assert.ok(true, ""));

    let report = tokio::time::timeout(Duration::from_secs(3), suite.run())
        .await
        .expect("run stalled on failed spawned work")
        .unwrap();
    let died = recorder.failures("panics");
    assert!(died[0].starts_with("Died on test #1"), "{died:?}");
    assert!(died[0].ends_with(": worker crashed"), "{died:?}");
    let died = recorder.failures("errors");
    assert!(died[0].ends_with(": worker failed"), "{died:?}");
    assert_eq!(recorder.test_end("next").status, Status::Passed);
    assert_eq!(report.test_counts.failed, 2);
}

#[tokio::test]
async fn test_pause_from_finished_test_is_an_error() {
    let suite = Suite::default();
    let recorder = Recorder::attach(&suite);
    let stash: Rc<RefCell<Option<Assert>>> = Rc::new(RefCell::new(None));
    let slot = stash.clone();
    suite.test("first", move |assert| {
        *slot.borrow_mut() = Some(assert.clone());
        assert.ok(true, "");
    });
    let slot = stash.clone();
    suite.test("second", move |assert| {
        let stale = slot.borrow().clone().unwrap();
        let err = stale.try_pause(1).unwrap_err();
        assert.ok(matches!(err, ProtocolError::PauseOutsideTest { .. }), "");
    });
    suite.run().await.unwrap();
    assert_eq!(recorder.test_end("second").status, Status::Passed);

    let stale = stash.borrow_mut().take().unwrap();
    let err = stale.try_pause(1).unwrap_err();
    assert_eq!(err.test_name(), "first");
}

#[tokio::test]
async fn test_release_protocol_errors() {
    let suite = Suite::default();
    let stash: Rc<RefCell<Option<Release>>> = Rc::new(RefCell::new(None));
    let slot = stash.clone();
    suite.test("double", move |assert| {
        let release = assert.pause(1);
        release.release().unwrap();
        let err = release.release().unwrap_err();
        assert.ok(matches!(err, ProtocolError::AlreadyReleased { pause: 1, .. }), "");
        *slot.borrow_mut() = Some(release);
    });
    suite.run().await.unwrap();

    let release = stash.borrow_mut().take().unwrap();
    let err = release.release().unwrap_err();
    assert!(matches!(err, ProtocolError::ReleaseAfterRunFinished { .. }));
    assert_eq!(err.test_name(), "double");
}

#[tokio::test]
async fn test_cancelled_pause_release_is_ignored() {
    let suite = Suite::default();
    let recorder = Recorder::attach(&suite);
    let stash: Rc<RefCell<Option<Release>>> = Rc::new(RefCell::new(None));
    let slot = stash.clone();
    suite.test("first", move |assert| {
        let release = assert.pause(2);
        release.release().unwrap();
        *slot.borrow_mut() = Some(release);
        assert.ok(true, "");
        Outcome::Threw(anyhow::anyhow!("gave up"))
    });
    let slot = stash.clone();
    suite.test("second", move |assert| {
        let release = slot.borrow().clone().unwrap();
        assert.ok(release.is_cancelled(), "");
        assert.ok(release.release().is_ok(), "");
    });
    suite.run().await.unwrap();
    assert_eq!(recorder.test_end("second").status, Status::Passed);
    let died = recorder.failures("first");
    assert!(died[0].ends_with(": gave up"), "{died:?}");
}

#[tokio::test]
async fn test_live_pause_released_in_other_test_is_an_error() {
    let suite = Suite::default();
    let recorder = Recorder::attach(&suite);
    let stash: Rc<RefCell<Option<Release>>> = Rc::new(RefCell::new(None));
    let slot = stash.clone();
    suite.test("owner", move |assert| {
        let release = assert.pause(2);
        *slot.borrow_mut() = Some(release.clone());
        let assert = assert.clone();
        tokio::task::spawn_local(async move {
            release.release().unwrap();
            release.release().unwrap();
            assert.ok(true, "");
        });
    });
    let slot = stash.clone();
    suite.test("intruder", move |assert| {
        let release = slot.borrow().clone().unwrap();
        let err = release.release().unwrap_err();
        assert.ok(matches!(err, ProtocolError::ReleaseDuringOtherTest { .. }), "");
    });
    suite.run().await.unwrap();
    assert_eq!(recorder.test_end("intruder").status, Status::Passed);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_fails_and_run_continues() {
    let suite = Suite::new(RunConfig::default().with_test_timeout(50));
    let recorder = Recorder::attach(&suite);
    suite.test("hangs", |assert| {
        let _never = assert.pause(1);
        assert.ok(true, "");
    });
    suite.test("after", |assert| assert.ok(true, ""));
    let report = suite.run().await.unwrap();
    assert_eq!(
        recorder.failures("hangs"),
        vec!["Test took longer than 50ms; test timed out."]
    );
    assert_eq!(recorder.test_end("after").status, Status::Passed);
    assert_eq!(report.test_counts.failed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_per_test_timeout_overrides_config() {
    let suite = Suite::new(RunConfig::default().with_test_timeout(10_000));
    let recorder = Recorder::attach(&suite);
    suite.test_async("slow", |assert| async move {
        assert.timeout(20);
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(())
    });
    suite.run().await.unwrap();
    assert_eq!(
        recorder.failures("slow"),
        vec!["Test took longer than 20ms; test timed out."]
    );
}

#[tokio::test(start_paused = true)]
async fn test_release_after_timeout_is_ignored() {
    let suite = Suite::new(RunConfig::default().with_test_timeout(10));
    let recorder = Recorder::attach(&suite);
    let outcome = log();
    let l = outcome.clone();
    suite.test("late", move |assert| {
        let release = assert.pause(1);
        let l = l.clone();
        tokio::task::spawn_local(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            push(&l, format!("{:?}", release.release()));
        });
        assert.ok(true, "");
    });
    suite.test_async("after", |assert| async move {
        assert.timeout(1_000);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert.ok(true, "");
        Ok(())
    });
    suite.run().await.unwrap();
    assert_eq!(
        recorder.failures("late"),
        vec!["Test took longer than 10ms; test timed out."]
    );
    assert_eq!(recorder.test_end("after").status, Status::Passed);
    assert_eq!(entries(&outcome), vec!["Ok(())"]);
}

#[tokio::test]
async fn test_timeout_zero_requires_synchronous_test() {
    let suite = Suite::default();
    let recorder = Recorder::attach(&suite);
    suite.test("sync only", |assert| {
        assert.timeout(0);
        let _release = assert.pause(1);
        assert.ok(true, "");
    });
    suite.test("after", |assert| assert.ok(true, ""));
    suite.run().await.unwrap();
    assert_eq!(
        recorder.failures("sync only"),
        vec!["Test did not finish synchronously even though assert.timeout( 0 ) was used."]
    );
    assert_eq!(recorder.test_end("after").status, Status::Passed);
}

#[tokio::test]
async fn test_throws_and_rejects() {
    #[derive(Debug, thiserror::Error)]
    #[error("parse error at {0}")]
    struct ParseError(usize);

    let suite = Suite::default();
    let recorder = Recorder::attach(&suite);
    suite.test("throws", |assert| {
        assert.throws(|| -> anyhow::Result<()> { Err(ParseError(3).into()) }, Matcher::is::<ParseError>(), "");
        assert.throws(|| -> anyhow::Result<()> { anyhow::bail!("bad input") }, Matcher::message("bad input"), "");
        assert.throws(|| -> anyhow::Result<()> { panic!("exploded") }, Matcher::pattern("explo").unwrap(), "");
    });
    suite.test("does not throw", |assert| {
        assert.throws(|| Ok(1), Matcher::Any, "");
    });
    suite.test("rejects", |assert| {
        assert.rejects(async { Err::<(), _>(anyhow::anyhow!("denied")) }, Matcher::message("denied"), "");
    });
    suite.test("resolves", |assert| {
        assert.rejects(async { Ok::<_, anyhow::Error>(5) }, Matcher::Any, "");
    });
    suite.run().await.unwrap();

    assert_eq!(recorder.test_end("throws").status, Status::Passed);
    assert_eq!(recorder.test_end("rejects").status, Status::Passed);
    assert_eq!(
        recorder.failures("does not throw"),
        vec!["Expected the block to fail."]
    );
    assert_eq!(
        recorder.failures("resolves"),
        vec!["The future passed to assert.rejects in \"resolves\" did not reject."]
    );
}

#[tokio::test]
async fn test_run_cannot_be_reentered() {
    let suite = Suite::default();
    let recorder = Recorder::attach(&suite);
    let handle = suite.clone();
    suite.test_async("reenters", move |assert| {
        let handle = handle.clone();
        async move {
            let err = handle.run().await.unwrap_err();
            assert.ok(matches!(err, EngineError::AlreadyRunning), "");
            Ok(())
        }
    });
    suite.run().await.unwrap();
    assert_eq!(recorder.test_end("reenters").status, Status::Passed);
}
