//! Reclaimer behaviour under many owners and threads.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;

use jamspell_native::{NativeHandle, Reclaimer};

type Log = Arc<Mutex<HashMap<NativeHandle, usize>>>;

fn destructor(log: &Log) -> Box<dyn FnOnce(NativeHandle) + Send> {
    let log = Arc::clone(log);
    Box::new(move |h| *log.lock().unwrap().entry(h).or_insert(0) += 1)
}

#[test]
fn every_handle_released_exactly_once() {
    let reclaimer = Arc::new(Reclaimer::start("it-exactly-once").unwrap());
    let log: Log = Arc::default();

    let workers: Vec<_> = (0..8)
        .map(|t| {
            let reclaimer = Arc::clone(&reclaimer);
            let log = Arc::clone(&log);
            thread::spawn(move || {
                for i in 0..250 {
                    let handle = NativeHandle::from_raw(1 + t * 1000 + i);
                    let owner = reclaimer.track(handle, destructor(&log)).unwrap();
                    drop(owner);
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }

    assert!(reclaimer.sync());
    let log = log.lock().unwrap();
    assert_eq!(log.len(), 2000);
    assert!(log.values().all(|&count| count == 1));
    assert_eq!(reclaimer.tracked(), 2000);
    assert_eq!(reclaimer.reclaimed(), 2000);
    assert_eq!(reclaimer.failed(), 0);
}

#[test]
fn live_owners_are_never_released() {
    let reclaimer = Reclaimer::start("it-live").unwrap();
    let log: Log = Arc::default();

    let owners: Vec<_> = (1..=10)
        .map(|i| reclaimer.track(NativeHandle::from_raw(i), destructor(&log)).unwrap())
        .collect();
    let (kept, dropped): (Vec<_>, Vec<_>) = owners.into_iter().partition(|o| o.handle().addr() % 2 == 0);
    drop(dropped);

    assert!(reclaimer.sync());
    {
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 5);
        assert!(log.keys().all(|h| h.addr() % 2 == 1));
    }

    drop(kept);
    assert!(reclaimer.sync());
    assert_eq!(log.lock().unwrap().len(), 10);
}

#[test]
fn owner_moved_across_threads_is_released_after_last_use() {
    let reclaimer = Reclaimer::start("it-moved").unwrap();
    let log: Log = Arc::default();
    let owner = reclaimer.track(NativeHandle::from_raw(42), destructor(&log)).unwrap();

    let handle = thread::spawn(move || owner.handle()).join().unwrap();
    assert_eq!(handle, NativeHandle::from_raw(42));

    assert!(reclaimer.sync());
    assert_eq!(log.lock().unwrap().get(&handle), Some(&1));
}

#[test]
fn global_reclaimer_is_shared() {
    let a = Reclaimer::global() as *const Reclaimer;
    let b = Reclaimer::global() as *const Reclaimer;
    assert_eq!(a, b);

    let log: Log = Arc::default();
    drop(Reclaimer::global().track(NativeHandle::from_raw(7), destructor(&log)));
    assert!(Reclaimer::global().sync());
    assert_eq!(log.lock().unwrap().get(&NativeHandle::from_raw(7)), Some(&1));
}
