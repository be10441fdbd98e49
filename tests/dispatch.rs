//! Dispatcher properties: registration-order invocation, timer cadence,
//! unroutable-frame handling, and soft runtime errors.

mod common;

use std::sync::Mutex;

use agentlink::ClientError;
use agentlink::runtime::{BufferedOutbox, Executor, Source};
use agentlink::session::Arena;
use common::{MockError, Recorder, data, establish_session, journal};
use embassy_time::{Duration, MockDriver};
use futures_executor::block_on;

/// Tests that move the mock clock serialize on this lock; the driver is
/// process-global.
static TIME_LOCK: Mutex<()> = Mutex::new(());

#[test]
fn simultaneously_ready_sources_fire_in_registration_order() {
    block_on(async {
        let mut region = [0u8; 2048];
        let mut arena = Arena::new(&mut region);
        let (mut session, state) = establish_session(&mut arena).await;
        {
            let mut state = state.borrow_mut();
            // Arrival order is the reverse of registration order.
            state.rx.push_back(data("beta", b"2"));
            state.rx.push_back(data("alpha", b"1"));
        }

        let journal = journal();
        let mut alpha = Recorder::new("alpha", &journal);
        let mut beta = Recorder::new("beta", &journal);
        let mut executor = Executor::<4>::new();
        executor.register(Source::Topic("alpha"), &mut alpha).unwrap();
        executor.register(Source::Topic("beta"), &mut beta).unwrap();

        let mut outbox = BufferedOutbox::<8>::new();
        let report = executor
            .spin(&mut session, Duration::from_millis(10), &mut outbox)
            .await
            .unwrap();

        assert_eq!(report.messages, 2);
        assert_eq!(*journal.borrow(), ["alpha:msg:alpha", "beta:msg:beta"]);
    });
}

#[test]
fn timer_source_fires_every_cycle() {
    let _guard = TIME_LOCK.lock().unwrap();
    block_on(async {
        let mut region = [0u8; 2048];
        let mut arena = Arena::new(&mut region);
        let (mut session, _state) = establish_session(&mut arena).await;

        let journal = journal();
        let mut tick = Recorder::new("tick", &journal);
        let mut executor = Executor::<1>::new();
        executor
            .register(Source::Timer(Duration::from_millis(10)), &mut tick)
            .unwrap();

        let mut outbox = BufferedOutbox::<8>::new();
        for cycle in 0..5 {
            MockDriver::get().advance(Duration::from_millis(10));
            let report = executor
                .spin(&mut session, Duration::from_ticks(0), &mut outbox)
                .await
                .unwrap();
            assert_eq!(report.timers_fired, 1, "cycle {cycle}");
        }
        assert_eq!(journal.borrow().len(), 5);
    });
}

#[test]
fn due_timer_precedes_later_registered_subscription() {
    let _guard = TIME_LOCK.lock().unwrap();
    block_on(async {
        let mut region = [0u8; 2048];
        let mut arena = Arena::new(&mut region);
        let (mut session, state) = establish_session(&mut arena).await;
        state.borrow_mut().rx.push_back(data("cmd", b"x"));

        let journal = journal();
        let mut tick = Recorder::new("tick", &journal);
        let mut cmd = Recorder::new("cmd", &journal);
        let mut executor = Executor::<2>::new();
        executor
            .register(Source::Timer(Duration::from_millis(10)), &mut tick)
            .unwrap();
        executor.register(Source::Topic("cmd"), &mut cmd).unwrap();

        MockDriver::get().advance(Duration::from_millis(10));
        let mut outbox = BufferedOutbox::<8>::new();
        let report = executor
            .spin(&mut session, Duration::from_ticks(0), &mut outbox)
            .await
            .unwrap();

        assert_eq!((report.timers_fired, report.messages), (1, 1));
        assert_eq!(*journal.borrow(), ["tick:timer", "cmd:msg:cmd"]);
    });
}

#[test]
fn unroutable_frames_are_dropped_not_carried_over() {
    block_on(async {
        let mut region = [0u8; 2048];
        let mut arena = Arena::new(&mut region);
        let (mut session, state) = establish_session(&mut arena).await;
        state.borrow_mut().rx.push_back(data("nobody/home", b"?"));

        let journal = journal();
        let mut cmd = Recorder::new("cmd", &journal);
        let mut executor = Executor::<1>::new();
        executor.register(Source::Topic("cmd"), &mut cmd).unwrap();

        let mut outbox = BufferedOutbox::<8>::new();
        let report = executor
            .spin(&mut session, Duration::from_millis(10), &mut outbox)
            .await
            .unwrap();
        assert_eq!(report.dropped, 1);
        assert_eq!(report.messages, 0);

        let report = executor
            .spin(&mut session, Duration::from_millis(10), &mut outbox)
            .await
            .unwrap();
        assert_eq!(report.dropped, 0);
        assert!(journal.borrow().is_empty());
    });
}

#[test]
fn transport_trouble_is_reported_after_dispatch() {
    block_on(async {
        let mut region = [0u8; 2048];
        let mut arena = Arena::new(&mut region);
        let (mut session, state) = establish_session(&mut arena).await;
        {
            let mut state = state.borrow_mut();
            state.rx.push_back(data("cmd", b"go"));
            state.fail_recv_when_empty = true;
        }

        let journal = journal();
        let mut cmd = Recorder::new("cmd", &journal);
        let mut executor = Executor::<1>::new();
        executor.register(Source::Topic("cmd"), &mut cmd).unwrap();

        // The ingest error comes back to the caller, but the frame that had
        // already arrived was still dispatched: the dispatcher survives a
        // bad cycle.
        let mut outbox = BufferedOutbox::<8>::new();
        let err = executor
            .spin(&mut session, Duration::from_millis(10), &mut outbox)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Transport(MockError(_))));
        assert_eq!(*journal.borrow(), ["cmd:msg:cmd"]);

        // And the next cycle works again once the transport recovers.
        state.borrow_mut().fail_recv_when_empty = false;
        let report = executor
            .spin(&mut session, Duration::from_millis(10), &mut outbox)
            .await
            .unwrap();
        assert_eq!(report.messages, 0);
    });
}

#[test]
fn callback_publishes_are_captured_in_the_outbox() {
    block_on(async {
        let mut region = [0u8; 2048];
        let mut arena = Arena::new(&mut region);
        let (mut session, state) = establish_session(&mut arena).await;
        state.borrow_mut().rx.push_back(data("cmd", b"on"));

        let journal = journal();
        let mut cmd = Recorder::responding("cmd", &journal, "cmd/ack", b"ok");
        let mut executor = Executor::<1>::new();
        executor.register(Source::Topic("cmd"), &mut cmd).unwrap();

        let mut outbox = BufferedOutbox::<8>::new();
        executor
            .spin(&mut session, Duration::from_millis(10), &mut outbox)
            .await
            .unwrap();

        assert_eq!(outbox.len(), 1);
        let entry = outbox.get(0).unwrap();
        assert_eq!(entry.topic.as_str(), "cmd/ack");
        assert_eq!(&entry.payload[..], b"ok");
    });
}

#[test]
fn registration_overflow_is_refused_loudly() {
    let journal = journal();
    let mut first = Recorder::new("first", &journal);
    let mut second = Recorder::new("second", &journal);
    let mut executor = Executor::<1>::new();
    executor.register(Source::Topic("a"), &mut first).unwrap();
    let err = executor
        .register(Source::Topic("b"), &mut second)
        .unwrap_err();
    assert_eq!(err, agentlink::runtime::RegisterError::Exhausted);
    assert_eq!(executor.len(), 1);
    assert_eq!(executor.capacity(), 1);
}
