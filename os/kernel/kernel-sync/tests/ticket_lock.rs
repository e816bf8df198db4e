use kernel_sync::{RawLock, RawTicket, TicketLock};
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn try_lock_fails_while_held() {
    let l = TicketLock::new(5u32);
    let g = l.lock();
    assert!(l.is_locked());
    assert!(l.try_lock().is_none());
    drop(g);
    assert!(!l.is_locked());
    let g = l.try_lock().expect("lock is free");
    assert_eq!(*g, 5);
}

#[test]
fn ticket_lock_counts_exactly() {
    let threads = 4;
    let iters = 2_000;
    let lock = Arc::new(TicketLock::new(0usize));
    let start = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for _ in 0..iters {
                    *lock.lock() += 1;
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(*lock.lock(), threads * iters);
}

#[test]
fn queue_depth_tracks_holder() {
    let raw = RawTicket::new();
    assert_eq!(raw.queued(), 0);
    raw.lock();
    assert_eq!(raw.queued(), 1);
    unsafe { raw.unlock() };
    assert_eq!(raw.queued(), 0);
}
