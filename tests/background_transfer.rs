use std::time::{Duration, Instant};

use strata::{AddingMode, CancelToken, LevelingConfig, LevelingQueue, MemoryQueue, TakeError};

const NO_WAIT: Option<Duration> = Some(Duration::ZERO);

fn queue(high_cap: usize, low_cap: usize, mode: AddingMode) -> LevelingQueue<u32> {
    let poll = Duration::from_millis(10);
    LevelingQueue::with_config(
        Box::new(MemoryQueue::with_poll_period(Some(high_cap), poll)),
        Box::new(MemoryQueue::with_poll_period(Some(low_cap), poll)),
        LevelingConfig {
            mode,
            background_transfer: true,
            poll_period: poll,
        },
    )
    .expect("queue")
}

fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let started = Instant::now();
    while started.elapsed() < limit {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn ordered_takes_stay_fifo_with_slow_consumer() {
    let queue = queue(1, 10, AddingMode::PreserveOrder);
    let token = CancelToken::never();
    for value in 1..=5 {
        queue.try_add(value, NO_WAIT, &token).unwrap();
    }

    std::thread::sleep(Duration::from_millis(50));

    let mut drained = Vec::new();
    for _ in 0..5 {
        drained.push(queue.try_take(Some(Duration::from_secs(2)), &token).unwrap());
    }
    assert_eq!(drained, vec![1, 2, 3, 4, 5]);
}

#[test]
fn idle_queue_drains_the_slow_tier() {
    let queue = queue(4, 10, AddingMode::PreserveOrder);
    let token = CancelToken::never();
    for value in 1..=6 {
        queue.try_add(value, NO_WAIT, &token).unwrap();
    }

    // Make room in the fast tier, then leave the queue alone.
    assert_eq!(queue.try_take(Some(Duration::from_secs(2)), &token).unwrap(), 1);
    assert_eq!(queue.try_take(Some(Duration::from_secs(2)), &token).unwrap(), 2);

    assert!(
        wait_until(Duration::from_secs(3), || queue.low().is_empty()),
        "slow tier never drained"
    );

    let mut drained = Vec::new();
    for _ in 0..4 {
        drained.push(queue.try_take(Some(Duration::from_secs(2)), &token).unwrap());
    }
    assert_eq!(drained, vec![3, 4, 5, 6]);
}

#[test]
fn preempted_transfer_loses_nothing() {
    let queue = queue(1, 1, AddingMode::PreserveOrder);
    let token = CancelToken::never();
    queue.try_add(1, NO_WAIT, &token).unwrap();
    queue.try_add(2, NO_WAIT, &token).unwrap();

    let mut drained = Vec::new();
    drained.push(queue.try_take(Some(Duration::from_secs(2)), &token).unwrap());

    // Cancel a consumer mid-wait while the worker migrates the second item.
    let consumer_token = CancelToken::new();
    let cancel = consumer_token.clone();
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        cancel.cancel();
    });
    match queue.try_take(None, &consumer_token) {
        Ok(item) => drained.push(item),
        Err(TakeError::Fault(err)) => {
            assert!(err.is_cancelled(), "unexpected fault: {err}");
        }
        Err(other) => panic!("unexpected result: {other:?}"),
    }
    canceller.join().unwrap();

    while drained.len() < 2 {
        drained.push(queue.try_take(Some(Duration::from_secs(2)), &token).unwrap());
    }
    assert_eq!(drained, vec![1, 2]);
}

#[test]
fn live_mode_promotes_spilled_items_to_the_fast_tier() {
    let queue = queue(2, 10, AddingMode::PreferLiveData);
    let token = CancelToken::never();
    for value in 1..=6 {
        queue.try_add(value, NO_WAIT, &token).unwrap();
    }

    // Drain the fast tier; the worker should refill it from the slow tier.
    queue.try_take(Some(Duration::from_secs(2)), &token).unwrap();
    queue.try_take(Some(Duration::from_secs(2)), &token).unwrap();

    assert!(
        wait_until(Duration::from_secs(3), || {
            queue.high().len() == Some(2) || queue.low().is_empty()
        }),
        "nothing was promoted"
    );

    let mut drained = Vec::new();
    for _ in 0..4 {
        drained.push(queue.try_take(Some(Duration::from_secs(2)), &token).unwrap());
    }
    drained.sort_unstable();
    assert_eq!(drained, vec![3, 4, 5, 6]);
}

#[test]
fn producers_and_consumers_agree_under_churn() {
    const PRODUCERS: u32 = 3;
    const PER_PRODUCER: u32 = 100;

    let queue = std::sync::Arc::new(queue(2, 1000, AddingMode::PreserveOrder));
    let mut producers = Vec::new();
    for producer in 0..PRODUCERS {
        let queue = queue.clone();
        producers.push(std::thread::spawn(move || {
            let token = CancelToken::never();
            for sequence in 0..PER_PRODUCER {
                let value = producer * PER_PRODUCER + sequence;
                queue
                    .try_add(value, Some(Duration::from_secs(5)), &token)
                    .unwrap();
            }
        }));
    }

    let token = CancelToken::never();
    let mut drained = Vec::new();
    while drained.len() < (PRODUCERS * PER_PRODUCER) as usize {
        drained.push(
            queue
                .try_take(Some(Duration::from_secs(5)), &token)
                .unwrap(),
        );
    }
    for producer in producers {
        producer.join().unwrap();
    }

    // Nothing lost, nothing duplicated.
    let mut sorted = drained.clone();
    sorted.sort_unstable();
    let expected: Vec<u32> = (0..PRODUCERS * PER_PRODUCER).collect();
    assert_eq!(sorted, expected);

    // Admissions of one producer are ordered, so each producer's items come
    // out as an increasing subsequence.
    for producer in 0..PRODUCERS {
        let range = producer * PER_PRODUCER..(producer + 1) * PER_PRODUCER;
        let observed: Vec<u32> = drained
            .iter()
            .copied()
            .filter(|value| range.contains(value))
            .collect();
        let mut ordered = observed.clone();
        ordered.sort_unstable();
        assert_eq!(observed, ordered, "producer {producer} reordered");
    }
}
