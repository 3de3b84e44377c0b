//! Flush Strategy Tests
//!
//! These tests drive deferred consumers through both shipped hosts.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use ripple_core::{FlushStrategy, ManualHost, Runtime, TokioHost};

fn recording_consumer(
    rt: &Runtime,
    strategy: FlushStrategy,
    value: &ripple_core::Source<i32>,
) -> (ripple_core::Consumer, Rc<RefCell<Vec<i32>>>) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let consumer = {
        let (value, seen) = (value.clone(), seen.clone());
        rt.consumer_with(strategy, move || seen.borrow_mut().push(value.get()))
    };
    (consumer, seen)
}

/// Test that a debounced consumer runs once after the quiet period.
#[test]
fn debounce_coalesces_a_burst() {
    let rt = Runtime::new();
    let host = ManualHost::new();
    let value = rt.source(0);
    let (_consumer, seen) = recording_consumer(
        &rt,
        FlushStrategy::debounce(host.clone(), Duration::from_millis(100)),
        &value,
    );

    value.set(1);
    host.advance(Duration::from_millis(60));
    value.set(2);
    host.advance(Duration::from_millis(60));
    value.set(3);
    assert_eq!(*seen.borrow(), vec![0]);
    assert_eq!(host.pending(), 1);

    host.advance(Duration::from_millis(100));
    assert_eq!(*seen.borrow(), vec![0, 3]);
    assert_eq!(host.pending(), 0);
}

/// Test that a debounce reading through a derived value is pushed back too.
#[test]
fn debounce_through_derived_restarts_on_each_write() {
    let rt = Runtime::new();
    let host = ManualHost::new();
    let value = rt.source(0);
    let doubled = {
        let value = value.clone();
        rt.derived(move || value.get() * 2)
    };
    let seen = Rc::new(RefCell::new(Vec::new()));
    let _consumer = {
        let (doubled, seen) = (doubled.clone(), seen.clone());
        rt.consumer_with(
            FlushStrategy::debounce(host.clone(), Duration::from_millis(100)),
            move || seen.borrow_mut().push(doubled.get()),
        )
    };

    value.set(1);
    host.advance(Duration::from_millis(60));
    value.set(2);
    host.advance(Duration::from_millis(60));
    assert_eq!(*seen.borrow(), vec![0]);
    assert_eq!(host.pending(), 1);

    host.advance(Duration::from_millis(40));
    assert_eq!(*seen.borrow(), vec![0, 4]);
    assert_eq!(doubled.compute_count(), 2);
}

/// Test that a frame consumer waits for the frame boundary.
#[test]
fn next_frame_defers_until_frame() {
    let rt = Runtime::new();
    let host = ManualHost::new();
    let value = rt.source(0);
    let (_consumer, seen) =
        recording_consumer(&rt, FlushStrategy::next_frame(host.clone()), &value);

    value.set(1);
    value.set(2);
    host.run_ticks();
    assert_eq!(*seen.borrow(), vec![0]);

    host.run_frame();
    assert_eq!(*seen.borrow(), vec![0, 2]);
}

/// Test that a deferred run is skipped if the value went back.
#[test]
fn deferred_run_skips_when_inputs_settle_back() {
    let rt = Runtime::new();
    let host = ManualHost::new();
    let value = rt.source(0);
    let doubled = {
        let value = value.clone();
        rt.derived(move || value.get() * 2)
    };
    let runs = Rc::new(RefCell::new(0));
    let _consumer = {
        let (doubled, runs) = (doubled.clone(), runs.clone());
        rt.consumer_with(FlushStrategy::next_tick(host.clone()), move || {
            doubled.get();
            *runs.borrow_mut() += 1;
        })
    };

    value.set(1);
    value.set(0);
    host.run_ticks();
    assert_eq!(*runs.borrow(), 1);
}

/// Test that disposal cancels a pending deferred run.
#[test]
fn dispose_cancels_scheduled_run() {
    let rt = Runtime::new();
    let host = ManualHost::new();
    let value = rt.source(0);
    let (consumer, seen) =
        recording_consumer(&rt, FlushStrategy::next_tick(host.clone()), &value);

    value.set(1);
    assert_eq!(host.pending(), 1);
    consumer.dispose();
    assert_eq!(host.pending(), 0);

    host.run_ticks();
    assert_eq!(*seen.borrow(), vec![0]);
}

/// Test that a task firing after the runtime is dropped does nothing.
#[test]
fn task_after_runtime_drop_is_inert() {
    let host = ManualHost::new();
    let seen = {
        let rt = Runtime::new();
        let value = rt.source(0);
        let (_consumer, seen) =
            recording_consumer(&rt, FlushStrategy::next_tick(host.clone()), &value);
        value.set(1);
        seen
    };

    assert_eq!(host.run_ticks(), 1);
    assert_eq!(*seen.borrow(), vec![0]);
}

/// Test the tokio host with virtual time.
#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn tokio_debounce_runs_after_quiet_period() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let rt = Runtime::new();
            let value = rt.source(0);
            let (_consumer, seen) = recording_consumer(
                &rt,
                FlushStrategy::debounce(TokioHost::new(), Duration::from_millis(50)),
                &value,
            );

            value.set(1);
            tokio::time::sleep(Duration::from_millis(30)).await;
            value.set(2);
            tokio::time::sleep(Duration::from_millis(30)).await;
            assert_eq!(*seen.borrow(), vec![0]);

            tokio::time::sleep(Duration::from_millis(30)).await;
            assert_eq!(*seen.borrow(), vec![0, 2]);
        })
        .await;
}

/// Test the tokio host's tick timing.
#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn tokio_tick_runs_after_yield() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let rt = Runtime::new();
            let value = rt.source(0);
            let (_consumer, seen) =
                recording_consumer(&rt, FlushStrategy::next_tick(TokioHost::new()), &value);

            value.set(1);
            value.set(2);
            assert_eq!(*seen.borrow(), vec![0]);

            tokio::time::sleep(Duration::from_millis(1)).await;
            assert_eq!(*seen.borrow(), vec![0, 2]);
        })
        .await;
}
