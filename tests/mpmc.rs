use dmxp_actor::MPMC::Buffer::RingBuffer;
use dmxp_actor::MPMC::{Address, GlobalQueue, Inbox, Message};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

#[test]
fn mpmc_correctness_many_threads() {
    let buffer = Arc::new(RingBuffer::with_capacity(1024));

    let producers = 4;
    let consumers = 4;
    let msgs_per_producer = 1000u64;
    let total_msgs = producers * msgs_per_producer;

    let mut handles = vec![];

    // Spawn producers
    for p_id in 0..producers {
        let buffer = buffer.clone();
        handles.push(thread::spawn(move || {
            for i in 0..msgs_per_producer {
                // Producer id in the high bits
                let mut value = (p_id << 32) | i;
                while let Err(back) = buffer.enqueue(value) {
                    value = back;
                    thread::yield_now();
                }
            }
        }));
    }

    // Spawn consumers
    let received_count = Arc::new(AtomicU64::new(0));
    let seen = Arc::new(parking_lot::Mutex::new(HashSet::new()));
    for _ in 0..consumers {
        let buffer = buffer.clone();
        let received_count = received_count.clone();
        let seen = seen.clone();
        handles.push(thread::spawn(move || loop {
            if let Some(value) = buffer.dequeue() {
                assert!(seen.lock().insert(value), "duplicate {value:x}");
                received_count.fetch_add(1, Ordering::Relaxed);
            } else {
                if received_count.load(Ordering::Relaxed) >= total_msgs {
                    break;
                }
                thread::yield_now();
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(received_count.load(Ordering::SeqCst), total_msgs);
    assert_eq!(seen.lock().len() as u64, total_msgs);
}

/// Many threads pushing into many inboxes while workers drain the ring:
/// an inbox is never on the ring twice and nothing is lost.
#[test]
fn global_ring_holds_each_inbox_once() {
    let global = Arc::new(GlobalQueue::with_capacity(16));
    let inboxes: Vec<Arc<Inbox>> = (1..=64).map(|i| Inbox::new(Address(i))).collect();
    let per_thread: i32 = 2000;
    let producers: u32 = 4;

    let mut handles = vec![];
    for p in 0..producers {
        let global = global.clone();
        let inboxes = inboxes.clone();
        handles.push(thread::spawn(move || {
            let mut rng = fastrand::Rng::with_seed(p as u64);
            for i in 0..per_thread {
                let inbox = &inboxes[rng.usize(..inboxes.len())];
                assert!(inbox.push(Message::new(Address(p), i, 0, None), &global));
            }
        }));
    }

    let delivered = Arc::new(AtomicU64::new(0));
    let total = (per_thread as u64) * producers as u64;
    for _ in 0..4 {
        let global = global.clone();
        let delivered = delivered.clone();
        handles.push(thread::spawn(move || {
            while delivered.load(Ordering::SeqCst) < total {
                let Some(inbox) = global.pop() else {
                    thread::yield_now();
                    continue;
                };
                assert!(inbox.in_global());
                while inbox.pop().is_some() {
                    delivered.fetch_add(1, Ordering::SeqCst);
                }
                if inbox.finish() {
                    global.push(inbox);
                }
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(delivered.load(Ordering::SeqCst), total);
    assert!(global.is_empty());
    for inbox in &inboxes {
        assert!(inbox.is_empty());
        assert!(!inbox.in_global());
    }
}

#[test]
fn mpmc_throughput_print() {
    let buffer = Arc::new(RingBuffer::with_capacity(4096));

    let start = std::time::Instant::now();
    let count = 100_000u64;

    let b_prod = buffer.clone();
    let p = thread::spawn(move || {
        for i in 0..count {
            let mut value = i;
            while let Err(back) = b_prod.enqueue(value) {
                value = back;
                std::hint::spin_loop();
            }
        }
    });

    let b_cons = buffer.clone();
    let c = thread::spawn(move || {
        let mut rx = 0;
        while rx < count {
            if b_cons.dequeue().is_some() {
                rx += 1;
            } else {
                std::hint::spin_loop();
            }
        }
    });

    p.join().unwrap();
    c.join().unwrap();

    let elapsed = start.elapsed();
    println!(
        "Throughput: {:.2} million ops/sec",
        (count as f64 / elapsed.as_secs_f64()) / 1_000_000.0
    );
}
