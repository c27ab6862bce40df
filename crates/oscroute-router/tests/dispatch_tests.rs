//! Dispatch table behaviour under concurrent registration

use oscroute_core::Message;
use oscroute_router::{Dispatcher, RouterError};
use std::sync::Arc;
use std::thread;

fn noop(_: &Message) {}

#[test]
fn test_patterns_listing() {
    let dispatcher = Dispatcher::new();
    let a = dispatcher.map("/mixer/*/gain", noop).unwrap();
    let b = dispatcher.map("/mixer/[0-9]/mute", noop).unwrap();

    assert_eq!(
        dispatcher.patterns(),
        vec![
            (a, "/mixer/*/gain".to_string()),
            (b, "/mixer/[0-9]/mute".to_string())
        ]
    );
    assert_eq!(dispatcher.matches("/mixer/3/mute"), vec![b]);
    assert_eq!(dispatcher.matches("/mixer/master/gain"), vec![a]);
}

#[test]
fn test_invalid_patterns_rejected() {
    let dispatcher = Dispatcher::new();
    for pattern in ["", "no-slash", "/a/{b,c", "/a/[z-a]"] {
        assert!(
            matches!(dispatcher.map(pattern, noop), Err(RouterError::Pattern(_))),
            "{:?} accepted",
            pattern
        );
    }
    assert!(dispatcher.is_empty());
}

#[test]
fn test_concurrent_map_unmap_and_lookup() {
    let dispatcher = Dispatcher::new();
    let stable = dispatcher.map("/stable/*", noop).unwrap();

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let dispatcher = dispatcher.clone();
            thread::spawn(move || {
                for i in 0..200 {
                    let id = dispatcher
                        .map(&format!("/churn/{}/{}", t, i), noop)
                        .unwrap();
                    assert!(dispatcher.unmap(id));
                }
            })
        })
        .collect();

    let reader = {
        let dispatcher = dispatcher.clone();
        thread::spawn(move || {
            for _ in 0..1000 {
                assert_eq!(dispatcher.matches("/stable/x"), vec![stable]);
            }
        })
    };

    for writer in writers {
        writer.join().unwrap();
    }
    reader.join().unwrap();
    assert_eq!(dispatcher.len(), 1);
}

#[test]
fn test_ids_increase_across_threads() {
    let dispatcher = Arc::new(Dispatcher::new());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let dispatcher = Arc::clone(&dispatcher);
            thread::spawn(move || {
                (0..50)
                    .map(|_| dispatcher.map("/same", noop).unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut all: Vec<_> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    all.sort();
    all.dedup();
    assert_eq!(all.len(), 200);

    // Match order follows id order
    assert_eq!(dispatcher.matches("/same"), all);
}
