//! Integration tests for concurrent collections.
//!
//! These tests drive collections from several threads at once and check
//! completeness, snapshot isolation, event ordering and the coalesced
//! refresh signal.

use rstest::rstest;
use snapmap::CollectionConfig;
use snapmap::collections::{ConcurrentDictionary, ConcurrentList, ConcurrentSortedDictionary};
use snapmap::concurrent::{ChangeAction, ChangeEvent};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        if Instant::now() > deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(2));
    }
    true
}

// =============================================================================
// Completeness under contention
// =============================================================================

#[rstest]
#[case(2, 500)]
#[case(8, 250)]
fn test_concurrent_adds_are_all_applied(#[case] threads: usize, #[case] per_thread: usize) {
    let dictionary = Arc::new(ConcurrentDictionary::new());
    let (_, events) = dictionary.subscribe_channel();
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|thread_index| {
            let dictionary = Arc::clone(&dictionary);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for item in 0..per_thread {
                    dictionary.add((thread_index, item), item).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(dictionary.len(), threads * per_thread);
    for thread_index in 0..threads {
        for item in 0..per_thread {
            assert_eq!(dictionary.get(&(thread_index, item)), Ok(item));
        }
    }

    let versions: Vec<u64> = events.try_iter().map(|event| event.version).collect();
    assert_eq!(versions.len(), threads * per_thread);
    assert!(versions.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(dictionary.version(), versions.last().copied().unwrap());
}

#[rstest]
fn test_concurrent_mixed_writers_keep_invariants() {
    let list = Arc::new(ConcurrentList::new());
    list.extend(0..100).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|thread_index| {
            let list = Arc::clone(&list);
            thread::spawn(move || {
                for round in 0..200 {
                    match (thread_index + round) % 3 {
                        0 => {
                            list.insert(round % (list.len() + 1).min(50), round).ok();
                        }
                        1 => {
                            list.remove_at(0).ok();
                        }
                        _ => {
                            list.push(round).unwrap();
                        }
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let snapshot = list.to_snapshot();
    assert!(snapshot.check_invariants());
    assert_eq!(snapshot.len(), list.len());
}

// =============================================================================
// Snapshot isolation
// =============================================================================

#[rstest]
fn test_snapshot_is_unaffected_by_later_writes() {
    let dictionary = Arc::new(ConcurrentDictionary::new());
    dictionary.add_range((0..100).map(|key| (key, key))).unwrap();
    let snapshot = dictionary.to_snapshot();

    let writer = {
        let dictionary = Arc::clone(&dictionary);
        thread::spawn(move || {
            for key in 0..100 {
                dictionary.set(key, -key).unwrap();
            }
            dictionary.remove_range(0, 50).unwrap();
        })
    };
    writer.join().unwrap();

    assert_eq!(snapshot.len(), 100);
    assert!(snapshot.iter().all(|(key, value)| key == value));
    assert_eq!(dictionary.len(), 50);
    assert_eq!(dictionary.get(&99), Ok(-99));
}

#[rstest]
fn test_iteration_during_writes_sees_one_version() {
    let list = Arc::new(ConcurrentList::new());
    list.extend(0..1000).unwrap();

    let writer = {
        let list = Arc::clone(&list);
        thread::spawn(move || {
            for value in 0..500 {
                list.insert(0, -value).unwrap();
            }
        })
    };

    let observed: Vec<i32> = list.iter().collect();
    writer.join().unwrap();

    let count = observed.len();
    assert!((1000..=1500).contains(&count));
    let inserted = count - 1000;
    assert!(observed[..inserted].iter().all(|value| *value <= 0));
    assert_eq!(observed[inserted..], (0..1000).collect::<Vec<_>>()[..]);
}

// =============================================================================
// Event scenarios
// =============================================================================

#[rstest]
fn test_add_range_then_add_fires_one_event_per_call() {
    let dictionary = ConcurrentDictionary::new();
    let (_, events) = dictionary.subscribe_channel();

    dictionary.add_range([("p", 1), ("q", 2), ("r", 3)]).unwrap();
    dictionary.add("s", 4).unwrap();

    let received: Vec<ChangeEvent<&str, i32>> = events.try_iter().collect();
    assert_eq!(received.len(), 2);

    assert_eq!(received[0].action, ChangeAction::Add);
    assert_eq!(received[0].index, Some(0));
    assert_eq!(
        received[0]
            .new_items
            .iter()
            .map(|item| (item.index, item.key))
            .collect::<Vec<_>>(),
        vec![(0, "p"), (1, "q"), (2, "r")]
    );

    assert_eq!(received[1].index, Some(3));
    assert_eq!(received[1].new_items.len(), 1);
    assert!(received[0].version < received[1].version);
}

#[rstest]
fn test_insert_at_front_shifts_others() {
    let dictionary = ConcurrentDictionary::new();
    dictionary.add_range([("p", 1), ("q", 2), ("r", 3)]).unwrap();
    let (_, events) = dictionary.subscribe_channel();

    dictionary.insert(0, "x", 0).unwrap();

    assert_eq!(dictionary.keys(), vec!["x", "p", "q", "r"]);
    assert_eq!(dictionary.index_of("r"), Some(3));
    let event = events.try_recv().unwrap();
    assert_eq!(event.action, ChangeAction::Add);
    assert_eq!(event.index, Some(0));
    assert!(events.try_recv().is_err());
}

#[rstest]
fn test_callback_sees_committed_state() {
    let dictionary: Arc<ConcurrentDictionary<&'static str, i32>> = Arc::new(ConcurrentDictionary::new());
    let observed = Arc::new(Mutex::new(Vec::new()));
    {
        let reader = Arc::clone(&dictionary);
        let observed = Arc::clone(&observed);
        dictionary.subscribe_fn(move |event| {
            observed.lock().unwrap().push((event.version, reader.len()));
        });
    }

    dictionary.add("a", 1).unwrap();
    dictionary.add("b", 2).unwrap();

    let observed = observed.lock().unwrap().clone();
    assert_eq!(observed.len(), 2);
    assert_eq!(observed[0].1, 1);
    assert_eq!(observed[1].1, 2);
}

#[rstest]
fn test_reentrant_listener_write_is_delivered_after() {
    let dictionary = Arc::new(ConcurrentDictionary::new());
    let (_, events) = dictionary.subscribe_channel();
    {
        let writer = Arc::downgrade(&dictionary);
        dictionary.subscribe_fn(move |event: &ChangeEvent<String, i32>| {
            let Some(writer) = writer.upgrade() else {
                return;
            };
            if event.action == ChangeAction::Add && event.new_items[0].key == "trigger" {
                writer.add("echo".to_string(), 0).unwrap();
            }
        });
    }

    dictionary.add("trigger".to_string(), 1).unwrap();

    let keys: Vec<String> = events
        .try_iter()
        .map(|event| event.new_items[0].key.clone())
        .collect();
    assert_eq!(keys, vec!["trigger", "echo"]);
    assert_eq!(dictionary.len(), 2);
}

#[rstest]
fn test_events_from_many_writers_arrive_in_commit_order() {
    let dictionary = Arc::new(ConcurrentDictionary::new());
    let versions = Arc::new(Mutex::new(Vec::new()));
    {
        let versions = Arc::clone(&versions);
        dictionary.subscribe_fn(move |event: &ChangeEvent<usize, usize>| {
            versions.lock().unwrap().push(event.version);
        });
    }

    let handles: Vec<_> = (0..6)
        .map(|thread_index| {
            let dictionary = Arc::clone(&dictionary);
            thread::spawn(move || {
                for item in 0..100 {
                    dictionary.add(thread_index * 1000 + item, item).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let versions = versions.lock().unwrap().clone();
    assert_eq!(versions.len(), 600);
    assert!(versions.windows(2).all(|pair| pair[0] + 1 == pair[1]));
}

#[rstest]
fn test_panicking_listener_does_not_poison_collection() {
    tracing_subscriber::fmt().with_test_writer().try_init().ok();
    let dictionary = ConcurrentDictionary::new();
    dictionary.subscribe_fn(|_: &ChangeEvent<i32, i32>| panic!("listener failure"));
    let (_, events) = dictionary.subscribe_channel();

    dictionary.add(1, 1).unwrap();
    dictionary.add(2, 2).unwrap();

    assert_eq!(dictionary.len(), 2);
    assert_eq!(events.try_iter().count(), 2);
}

#[rstest]
fn test_sorted_dictionary_events_report_sorted_positions() {
    let dictionary: ConcurrentSortedDictionary<i32, ()> = ConcurrentSortedDictionary::new();
    dictionary.add_range([(10, ()), (30, ())]).unwrap();
    let (_, events) = dictionary.subscribe_channel();

    assert_eq!(dictionary.add(20, ()), Ok(1));
    let event = events.try_recv().unwrap();
    assert_eq!(event.index, Some(1));
    assert_eq!(event.new_items[0].key, 20);
}

// =============================================================================
// Coalesced refresh signal
// =============================================================================

#[rstest]
fn test_burst_of_writes_produces_one_refresh() {
    let config = CollectionConfig::default()
        .with_name("burst")
        .with_refresh_window(Duration::from_millis(500));
    let dictionary = ConcurrentDictionary::with_config(config);
    let refreshes = Arc::new(AtomicUsize::new(0));
    {
        let refreshes = Arc::clone(&refreshes);
        dictionary
            .set_refresh_consumer(move || {
                refreshes.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
    }

    for key in 0..100 {
        dictionary.add(key, key).unwrap();
    }

    assert!(wait_until(|| refreshes.load(Ordering::SeqCst) > 0));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(refreshes.load(Ordering::SeqCst), 1);
}

#[rstest]
fn test_flush_refresh_delivers_immediately() {
    let config = CollectionConfig::default().with_refresh_window(Duration::from_secs(60));
    let list = ConcurrentList::with_config(config);
    let refreshes = Arc::new(AtomicUsize::new(0));
    {
        let refreshes = Arc::clone(&refreshes);
        list.collection()
            .set_refresh_consumer(move || {
                refreshes.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
    }

    list.push(1).unwrap();
    list.push(2).unwrap();
    list.collection().flush_refresh();
    list.collection().flush_refresh();

    assert_eq!(refreshes.load(Ordering::SeqCst), 1);
}

#[rstest]
fn test_refresh_consumer_may_write_during_flush() {
    let config = CollectionConfig::default().with_refresh_window(Duration::from_secs(60));
    let dictionary: Arc<ConcurrentDictionary<i32, i32>> = Arc::new(ConcurrentDictionary::with_config(config));
    {
        let weak = Arc::downgrade(&dictionary);
        dictionary
            .set_refresh_consumer(move || {
                if let Some(dictionary) = weak.upgrade() {
                    dictionary.try_add(999, 0).unwrap();
                }
            })
            .unwrap();
    }
    dictionary.add(1, 1).unwrap();

    let (done, finished) = crossbeam_channel::bounded(1);
    let flusher = {
        let dictionary = Arc::clone(&dictionary);
        thread::spawn(move || {
            dictionary.flush_refresh();
            done.send(()).unwrap();
        })
    };

    assert!(finished.recv_timeout(Duration::from_secs(5)).is_ok());
    flusher.join().unwrap();
    assert_eq!(dictionary.get(&999), Ok(0));
    assert_eq!(dictionary.keys(), vec![1, 999]);
}

#[rstest]
fn test_failed_write_does_not_signal_refresh() {
    let config = CollectionConfig::default().with_refresh_window(Duration::from_secs(60));
    let dictionary = ConcurrentDictionary::with_config(config);
    dictionary.add(1, 1).unwrap();
    let refreshes = Arc::new(AtomicUsize::new(0));
    {
        let refreshes = Arc::clone(&refreshes);
        dictionary
            .set_refresh_consumer(move || {
                refreshes.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
    }

    assert!(dictionary.add(1, 2).is_err());
    assert!(!dictionary.remove(&7));
    dictionary.flush_refresh();

    assert_eq!(refreshes.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Round trip and concurrent batch scenario
// =============================================================================

#[rstest]
fn test_snapshot_round_trip_through_add_range() {
    let source = ConcurrentDictionary::new();
    source.add_range([("c", 3), ("a", 1)]).unwrap();
    source.insert(1, "b", 2).unwrap();

    let copy = ConcurrentDictionary::new();
    copy.add_range(source.to_snapshot()).unwrap();

    assert_eq!(copy.to_vec(), source.to_vec());
    assert_eq!(copy.to_vec(), vec![("c", 3), ("b", 2), ("a", 1)]);
}

#[rstest]
fn test_concurrent_add_range_and_add_fire_one_event_each() {
    let dictionary = Arc::new(ConcurrentDictionary::new());
    let (_, events) = dictionary.subscribe_channel();
    let barrier = Arc::new(Barrier::new(2));

    let batch = {
        let dictionary = Arc::clone(&dictionary);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            dictionary.add_range([("p", 1), ("q", 2)]).unwrap();
        })
    };
    let single = {
        let dictionary = Arc::clone(&dictionary);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            dictionary.add("r", 3).unwrap();
        })
    };
    batch.join().unwrap();
    single.join().unwrap();

    assert_eq!(dictionary.len(), 3);
    let received: Vec<ChangeEvent<&str, i32>> = events.try_iter().collect();
    assert_eq!(received.len(), 2);
    assert!(received.iter().all(|event| event.action == ChangeAction::Add));
    let mut sizes: Vec<usize> = received.iter().map(|event| event.new_items.len()).collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![1, 2]);
}
