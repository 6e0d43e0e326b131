use std::time::{Duration, Instant};

use strata::{
    AddError, AddingMode, CancelToken, Error, LevelingConfig, LevelingQueue, MemoryQueue,
    TakeError,
};

const NO_WAIT: Option<Duration> = Some(Duration::ZERO);
const POLL: Duration = Duration::from_millis(10);

fn queue(
    high_cap: usize,
    low_cap: usize,
    mode: AddingMode,
    background_transfer: bool,
) -> LevelingQueue<u32> {
    LevelingQueue::with_config(
        Box::new(MemoryQueue::with_poll_period(Some(high_cap), POLL)),
        Box::new(MemoryQueue::with_poll_period(Some(low_cap), POLL)),
        LevelingConfig {
            mode,
            background_transfer,
            poll_period: POLL,
        },
    )
    .expect("queue")
}

#[test]
fn tripped_token_rejects_add_up_front() {
    let queue = queue(2, 2, AddingMode::PreferLiveData, false);
    let token = CancelToken::new();
    token.cancel();
    match queue.try_add(7, NO_WAIT, &token) {
        Err(AddError::Rejected(item, Error::Cancelled)) => assert_eq!(item, 7),
        other => panic!("expected cancelled, got {other:?}"),
    }
}

#[test]
fn cancellation_unblocks_a_waiting_consumer() {
    let queue = std::sync::Arc::new(queue(2, 2, AddingMode::PreferLiveData, false));
    let token = CancelToken::new();
    let consumer_token = token.clone();
    let consumer = std::thread::spawn(move || {
        let started = Instant::now();
        let result = queue.try_take(None, &consumer_token);
        (result, started.elapsed())
    });

    std::thread::sleep(Duration::from_millis(30));
    token.cancel();
    let (result, elapsed) = consumer.join().unwrap();
    assert!(matches!(result, Err(TakeError::Fault(Error::Cancelled))));
    // Bounded by the wait slice, with generous slack for a loaded machine.
    assert!(elapsed < Duration::from_secs(2), "took {elapsed:?}");
}

#[test]
fn cancellation_unblocks_a_waiting_producer_and_returns_the_item() {
    let queue = std::sync::Arc::new(queue(1, 1, AddingMode::PreferLiveData, false));
    let token = CancelToken::never();
    queue.try_add(1, NO_WAIT, &token).unwrap();
    queue.try_add(2, NO_WAIT, &token).unwrap();

    let producer_token = CancelToken::new();
    let cancel = producer_token.clone();
    let blocked = queue.clone();
    let producer =
        std::thread::spawn(move || blocked.try_add(3, None, &producer_token));

    std::thread::sleep(Duration::from_millis(30));
    cancel.cancel();
    match producer.join().unwrap() {
        Err(AddError::Rejected(item, Error::Cancelled)) => assert_eq!(item, 3),
        other => panic!("expected cancelled, got {other:?}"),
    }
    assert_eq!(queue.len(), Some(2));
}

#[test]
fn timed_out_add_hands_the_item_back() {
    let queue = queue(1, 1, AddingMode::PreferLiveData, false);
    let token = CancelToken::never();
    queue.try_add(1, NO_WAIT, &token).unwrap();
    queue.try_add(2, NO_WAIT, &token).unwrap();

    let started = Instant::now();
    match queue.try_add(3, Some(Duration::from_millis(40)), &token) {
        Err(AddError::Full(item)) => assert_eq!(item, 3),
        other => panic!("expected full, got {other:?}"),
    }
    assert!(started.elapsed() >= Duration::from_millis(40));
}

#[test]
fn timed_out_take_is_empty_not_a_fault() {
    let queue = queue(2, 2, AddingMode::PreferLiveData, false);
    let token = CancelToken::never();
    match queue.try_take(Some(Duration::from_millis(40)), &token) {
        Err(TakeError::Empty) => {}
        other => panic!("expected empty, got {other:?}"),
    }
}

#[test]
fn dispose_is_idempotent_and_rejects_everything() {
    let queue = queue(2, 2, AddingMode::PreserveOrder, true);
    let token = CancelToken::never();
    queue.try_add(1, NO_WAIT, &token).unwrap();

    queue.dispose();
    queue.dispose();
    assert!(queue.is_disposed());

    assert!(matches!(
        queue.try_add(2, NO_WAIT, &token),
        Err(AddError::Rejected(2, Error::Disposed))
    ));
    assert!(matches!(
        queue.try_take(NO_WAIT, &token),
        Err(TakeError::Fault(Error::Disposed))
    ));
    assert!(matches!(queue.add_forced(3), Err(Error::Disposed)));
    assert!(matches!(queue.add_forced_to_high(4), Err(Error::Disposed)));
}

#[test]
fn dispose_unblocks_a_waiting_consumer() {
    for background_transfer in [false, true] {
        let queue = std::sync::Arc::new(queue(
            2,
            2,
            AddingMode::PreserveOrder,
            background_transfer,
        ));
        let blocked = queue.clone();
        let consumer = std::thread::spawn(move || {
            let started = Instant::now();
            let result = blocked.try_take(None, &CancelToken::never());
            (result, started.elapsed())
        });

        std::thread::sleep(Duration::from_millis(30));
        queue.dispose();

        let (result, elapsed) = consumer.join().unwrap();
        match result {
            Err(TakeError::Fault(err)) => {
                assert!(err.is_disposed() || err.is_cancelled(), "got {err}")
            }
            other => panic!("expected a fault, got {other:?}"),
        }
        assert!(elapsed < Duration::from_secs(2), "took {elapsed:?}");
    }
}

#[test]
fn drop_disposes_and_joins_the_worker() {
    let queue = queue(1, 4, AddingMode::PreserveOrder, true);
    let token = CancelToken::never();
    for value in 1..=3 {
        queue.try_add(value, NO_WAIT, &token).unwrap();
    }
    // Dropping must stop the worker mid-transfer without hanging.
    drop(queue);
}

#[test]
fn no_admission_is_lost_when_disposal_interrupts_a_transfer() {
    // The fast tier is kept full so the worker is parked inside its blocking
    // add when disposal lands; the in-flight item must be restored first.
    for _round in 0..20 {
        let queue = queue(1, 8, AddingMode::PreserveOrder, true);
        let token = CancelToken::never();
        for value in 1..=4 {
            queue.try_add(value, NO_WAIT, &token).unwrap();
        }
        std::thread::sleep(Duration::from_millis(5));
        queue.dispose();
        // The worker has joined; anything it had in hand is back in a tier.
        assert_eq!(queue.len(), Some(4), "an admission was dropped");
    }
}
