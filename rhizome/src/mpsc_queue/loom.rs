use super::*;
use crate::loom::{self, sync::Arc, thread};
use std::{boxed::Box, pin::Pin, vec::Vec};

#[test]
fn no_loss_two_producers() {
    const THREADS: i32 = 2;
    const MSGS: i32 = 2;
    producers_test(THREADS, MSGS, THREADS * MSGS);
}

#[test]
fn dropping_the_queue_doesnt_leak() {
    // Only consume half of the nodes that are pushed; dropping the queue must
    // drop the rest.
    const THREADS: i32 = 2;
    const MSGS: i32 = 2;
    producers_test(THREADS, MSGS, (THREADS * MSGS) / 2);
}

fn producers_test(threads: i32, msgs: i32, total_msgs: i32) {
    loom::model(move || {
        let q = Arc::new(MpscQueue::<Entry>::new_with_stub(entry(666)));

        let producers: Vec<_> = (0..threads)
            .map(|thread| {
                let q = q.clone();
                thread::spawn(move || {
                    for i in 0..msgs {
                        q.push(entry(thread * msgs + i));
                    }
                })
            })
            .collect();

        let mut next_seq = std::vec![0; threads as usize];
        let mut i = 0;
        while i < total_msgs {
            match q.try_pop() {
                Ok(node) => {
                    let (thread, seq) = (node.val / msgs, node.val % msgs);
                    assert_eq!(next_seq[thread as usize], seq, "reordered pushes");
                    next_seq[thread as usize] += 1;
                    i += 1;
                    tracing::info!(?node, "pop {}/{}", i, total_msgs);
                }
                Err(TryPopError::Busy) => {
                    panic!("the queue should never be busy, as there is only a single consumer!")
                }
                Err(err) => {
                    tracing::info!(?err, "pop error");
                    thread::yield_now();
                }
            }
        }

        for producer in producers {
            producer.join().unwrap();
        }
    })
}

#[test]
fn drain_after_push_sees_the_node() {
    // A drain that happens after the producer's push has returned (which is
    // what a wake signal sent after the push establishes) must see the node.
    loom::model(|| {
        let q = Arc::new(MpscQueue::<Entry>::new_with_stub(entry(666)));
        let pushed = Arc::new(loom::sync::atomic::AtomicBool::new(false));

        let producer = {
            let q = q.clone();
            let pushed = pushed.clone();
            thread::spawn(move || {
                q.push(entry(1));
                pushed.store(true, Release);
            })
        };

        let consumer = q.consume();
        let mut popped = 0;
        loop {
            // observe the "wake" before draining.
            let woken = pushed.load(Acquire);
            popped += consumer.drain_with(|node| assert_eq!(node.val, 1));
            if woken {
                break;
            }
            thread::yield_now();
        }
        assert_eq!(popped, 1);
        drop(consumer);

        producer.join().unwrap();
    })
}

#[test]
fn competing_consumers() {
    // Consumers racing for the consumer role must never both pop at once.
    const THREADS: i32 = 2;
    const MSGS: i32 = THREADS;

    fn do_rx(q: Arc<MpscQueue<Entry>>) {
        while let Some(node) = q.pop() {
            tracing::info!(?node, "pop");
        }
    }

    loom::model(|| {
        let q = Arc::new(MpscQueue::<Entry>::new_with_stub(entry(666)));

        let mut threads: Vec<_> = (0..THREADS)
            .map(|thread| {
                let q = q.clone();
                thread::spawn(move || {
                    for i in 0..MSGS {
                        q.push(entry(thread * MSGS + i));
                    }
                })
            })
            .collect();

        threads.push(thread::spawn({
            let q = q.clone();
            move || do_rx(q)
        }));
        do_rx(q);

        for thread in threads {
            thread.join().unwrap();
        }
    })
}

#[derive(Debug)]
#[repr(C)]
struct Entry {
    links: Links<Entry>,
    val: i32,
    // participate in loom's leak checking
    _track: Arc<()>,
}

unsafe impl Linked<Links<Self>> for Entry {
    type Handle = Pin<Box<Entry>>;

    fn into_ptr(handle: Pin<Box<Entry>>) -> NonNull<Entry> {
        unsafe { NonNull::from(Box::leak(Pin::into_inner_unchecked(handle))) }
    }

    unsafe fn from_ptr(ptr: NonNull<Entry>) -> Pin<Box<Entry>> {
        Pin::new_unchecked(Box::from_raw(ptr.as_ptr()))
    }

    unsafe fn links(target: NonNull<Entry>) -> NonNull<Links<Entry>> {
        target.cast()
    }
}

fn entry(val: i32) -> Pin<Box<Entry>> {
    Box::pin(Entry {
        links: Links::new(),
        val,
        _track: Arc::new(()),
    })
}
