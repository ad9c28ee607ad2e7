use super::*;
use crate::loom::{self, sync::Arc, thread};
use proptest::prelude::*;
use std::{collections::VecDeque, pin::Pin, vec::Vec};
use test_util::*;

#[test]
fn pop_empty() {
    let q = MpscQueue::<Entry>::new_with_stub(entry(666));
    assert_eq!(q.pop(), None);
}

#[test]
fn try_pop_empty() {
    let q = MpscQueue::<Entry>::new_with_stub(entry(666));
    assert_eq!(q.try_pop(), Err(TryPopError::Empty));
}

#[test]
fn push_pop() {
    let q = MpscQueue::<Entry>::new_with_stub(entry(666));
    q.push(entry(1));
    assert_eq!(q.pop(), Some(entry(1)));
    assert_eq!(q.pop(), None);
}

#[test]
fn pops_oldest_first() {
    let q = MpscQueue::<Entry>::new_with_stub(entry(666));
    for i in 0..5 {
        q.push(entry(i));
    }
    let popped: Vec<i32> = q.consume().map(|e| e.val).collect();
    assert_eq!(popped, [0, 1, 2, 3, 4]);
}

#[test]
fn try_pop_busy() {
    let q = MpscQueue::<Entry>::new_with_stub(entry(666));

    let consumer = q.try_consume().expect("must acquire consumer");
    assert!(q.try_consume().is_none());
    assert_eq!(consumer.try_pop(), Err(TryPopError::Empty));

    q.push(entry(1));
    assert_eq!(q.try_pop(), Err(TryPopError::Busy));
    assert_eq!(consumer.try_pop(), Ok(entry(1)));
    assert_eq!(consumer.try_pop(), Err(TryPopError::Empty));

    drop(consumer);
    assert_eq!(q.try_pop(), Err(TryPopError::Empty));
}

#[test]
fn drain_runs_in_order() {
    let q = MpscQueue::<Entry>::new_with_stub(entry(666));
    for i in 0..10 {
        q.push(entry(i));
    }

    let mut seen = Vec::new();
    let popped = q.consume().drain_with(|e| seen.push(e.val));
    assert_eq!(popped, 10);
    assert_eq!(seen, (0..10).collect::<Vec<_>>());
}

#[test]
fn drain_n_respects_limit() {
    let q = MpscQueue::<Entry>::new_with_stub(entry(666));
    for i in 0..10 {
        q.push(entry(i));
    }

    let consumer = q.consume();
    let mut seen = Vec::new();
    let drain = consumer.drain_n_with(4, |e| seen.push(e.val));
    assert_eq!(drain.popped, 4);
    assert!(drain.has_remaining);
    assert!(!drain.inconsistent);

    let drain = consumer.drain_n_with(100, |e| seen.push(e.val));
    assert_eq!(drain.popped, 6);
    assert!(!drain.has_remaining);
    assert_eq!(seen, (0..10).collect::<Vec<_>>());
}

#[test]
fn repeated_empty_drains_are_stable() {
    let q = MpscQueue::<Entry>::new_with_stub(entry(666));
    let consumer = q.consume();
    for _ in 0..8 {
        assert_eq!(consumer.drain_with(|_| panic!("queue is empty")), 0);
    }

    q.push(entry(1));
    q.push(entry(2));
    let mut seen = Vec::new();
    consumer.drain_with(|e| seen.push(e.val));
    assert_eq!(seen, [1, 2]);
    assert_eq!(consumer.drain_with(|_| panic!("queue is empty")), 0);
}

#[test]
fn linked_pending_is_inconsistent() {
    let q = MpscQueue::<Entry>::new_with_stub(entry(666));
    q.push(entry(1));

    // Play the first half of a push by hand: publish the node as the new
    // head, but don't link it to its predecessor yet.
    let pending = Entry::into_ptr(entry(2));
    unsafe {
        #[cfg(debug_assertions)]
        links(pending).state.store(state::QUEUED, Release);
        links(pending).next.store(ptr::null_mut(), Relaxed);
    }
    let prev = q.head.swap(pending.as_ptr(), AcqRel);

    let consumer = q.consume();
    assert_eq!(consumer.try_pop(), Err(TryPopError::Inconsistent));

    let drain = consumer.drain_with(|_| panic!("nothing is linked yet"));
    assert_eq!(drain, 0);

    // ...and now the second half.
    unsafe {
        links(non_null(prev)).next.store(pending.as_ptr(), Release);
    }

    assert_eq!(consumer.try_pop(), Ok(entry(1)));
    assert_eq!(consumer.try_pop(), Ok(entry(2)));
    assert_eq!(consumer.try_pop(), Err(TryPopError::Empty));
}

#[test]
fn linked_pending_behind_the_stub_is_inconsistent() {
    let q = MpscQueue::<Entry>::new_with_stub(entry(666));

    let pending = Entry::into_ptr(entry(1));
    unsafe {
        #[cfg(debug_assertions)]
        links(pending).state.store(state::QUEUED, Release);
        links(pending).next.store(ptr::null_mut(), Relaxed);
    }
    let prev = q.head.swap(pending.as_ptr(), AcqRel);
    assert_eq!(prev, q.stub.as_ptr());

    // the queue looks empty from the tail, but it isn't.
    assert_eq!(q.try_pop(), Err(TryPopError::Inconsistent));

    unsafe {
        links(non_null(prev)).next.store(pending.as_ptr(), Release);
    }
    assert_eq!(q.try_pop(), Ok(entry(1)));
    assert_eq!(q.try_pop(), Err(TryPopError::Empty));
}

#[test]
fn popped_nodes_are_never_touched_again() {
    // Scribble over every node's links as soon as it has been popped. If the
    // queue ever follows a popped node's `next` pointer again, it will find
    // garbage.
    const POISON: i32 = -0xdead;
    let nodes: Vec<&'static Pooled> = (0..64).map(pooled).collect();
    let q = MpscQueue::<Pooled>::new_with_stub(pooled(666));
    let consumer = q.consume();

    let mut seen = Vec::new();
    for round in 0..4 {
        for (i, node) in nodes.iter().enumerate() {
            node.val.store(round, Relaxed);
            q.push(*node);
            // interleave pops with pushes, so that the queue keeps
            // passing through its single-node and stub states.
            if i % 3 != 0 {
                continue;
            }
            if let Ok(popped) = consumer.try_pop() {
                seen.push(popped.val.load(Relaxed));
                poison(popped, POISON);
            }
        }
        consumer.drain_with(|popped| {
            seen.push(popped.val.load(Relaxed));
            poison(popped, POISON);
        });
    }

    assert_eq!(seen.len(), nodes.len() * 4);
    assert!(!seen.contains(&POISON));

    fn poison(node: &'static Pooled, poison: i32) {
        node.val.store(poison, Relaxed);
        node.links
            .next
            .store(0xdead_0000 as *mut Pooled, Relaxed);
    }
}

#[test]
fn static_stub() {
    static STUB: Pooled = Pooled::new_stub();
    static Q: MpscQueue<Pooled> = unsafe { MpscQueue::new_with_static_stub(&STUB) };

    Q.push(pooled(1));
    Q.push(pooled(2));
    assert_eq!(Q.pop().map(|n| n.val.load(Relaxed)), Some(1));
    assert_eq!(Q.pop().map(|n| n.val.load(Relaxed)), Some(2));
    assert!(Q.pop().is_none());
}

#[test]
#[cfg(debug_assertions)]
#[should_panic(expected = "already queued")]
fn push_queued_node_panics() {
    let q = MpscQueue::<Pooled>::new_with_stub(pooled(666));
    let node = pooled(1);
    q.push(node);
    q.push(node);
}

#[test]
#[cfg(debug_assertions)]
fn popped_nodes_can_be_pushed_again() {
    let q = MpscQueue::<Pooled>::new_with_stub(pooled(666));
    let node = pooled(1);
    q.push(node);
    assert!(node.links.is_queued());

    let popped = q.pop().expect("node was pushed");
    assert!(!popped.links.is_queued());
    q.push(popped);
    assert!(q.pop().is_some());
}

#[test]
fn dropping_the_queue_drops_nodes() {
    let dropped = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    {
        let q = MpscQueue::<Counted>::new_with_stub(counted(&dropped));
        for _ in 0..3 {
            q.push(counted(&dropped));
        }
        let popped = q.pop();
        drop(popped);
        assert_eq!(dropped.load(Relaxed), 1);
    }
    // two queued nodes, plus the stub.
    assert_eq!(dropped.load(Relaxed), 4);
}

#[test]
fn queue_is_send_sync() {
    crate::util::assert_send_sync::<MpscQueue<Entry>>();
}

#[test]
fn consumers_are_send() {
    fn assert_send<S: Send>() {}
    assert_send::<Consumer<'static, Entry>>();
    #[cfg(feature = "alloc")]
    assert_send::<OwnedConsumer<Entry>>();
}

#[test]
#[cfg(feature = "alloc")]
fn owned_consumer_pops_on_another_thread() {
    let q = Arc::new(MpscQueue::<Entry>::new_with_stub(entry(666)));
    for i in 1..=3 {
        q.push(entry(i));
    }

    let consumer = q.clone().consume_owned();
    let popped = thread::spawn(move || {
        let mut vals = Vec::new();
        consumer.drain_with(|node| vals.push(node.val));
        vals
    })
    .join()
    .unwrap();

    assert_eq!(popped, vec![1, 2, 3]);
    // dropping the consumer on the other thread released the role.
    assert!(q.try_consume().is_some());
}

#[test]
fn fifo_per_producer() {
    const THREADS: i32 = if_miri(3, 8);
    const MSGS: i32 = if_miri(10, 1000);

    loom::model(|| {
        let q = Arc::new(MpscQueue::<Entry>::new_with_stub(entry(666)));

        let threads: Vec<_> = (0..THREADS)
            .map(|thread| {
                let q = q.clone();
                thread::spawn(move || {
                    for i in 0..MSGS {
                        q.push(entry(thread * MSGS + i));
                        test_trace!(thread, "push msg {}/{}", i, MSGS);
                    }
                })
            })
            .collect();

        let mut next_seq = vec![0; THREADS as usize];
        let mut recvd = 0;
        while recvd < THREADS * MSGS {
            match q.try_pop() {
                Ok(msg) => {
                    let (thread, seq) = (msg.val / MSGS, msg.val % MSGS);
                    assert_eq!(
                        next_seq[thread as usize], seq,
                        "thread {thread}'s messages were reordered"
                    );
                    next_seq[thread as usize] += 1;
                    recvd += 1;
                }
                Err(TryPopError::Busy) => {
                    panic!("the queue should never be busy, as there is only one consumer")
                }
                Err(_) => thread::yield_now(),
            }
        }

        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(q.try_pop(), Err(TryPopError::Empty));
        assert!(next_seq.iter().all(|&n| n == MSGS));
    })
}

#[test]
fn push_does_not_wait_for_the_consumer() {
    use std::time::{Duration, Instant};

    const MSGS: i32 = if_miri(10, 10_000);

    let q = Arc::new(MpscQueue::<Entry>::new_with_stub(entry(666)));
    // the consumer role is held for the whole test, and nobody pops.
    let consumer = q.consume();

    let producer = {
        let q = q.clone();
        thread::spawn(move || {
            let start = Instant::now();
            for i in 0..MSGS {
                q.push(entry(i));
            }
            start.elapsed()
        })
    };

    let elapsed = producer.join().unwrap();
    assert!(
        elapsed < Duration::from_secs(10),
        "pushing {MSGS} nodes took {elapsed:?} with a stalled consumer"
    );
    assert_eq!(consumer.drain_with(|_| {}), MSGS as usize);
}

#[derive(Debug, Clone)]
enum Op {
    Push(i32),
    Pop,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![any::<i32>().prop_map(Op::Push), Just(Op::Pop)]
}

proptest! {
    #[test]
    fn behaves_like_a_fifo(ops in proptest::collection::vec(op(), 0..256)) {
        let q = MpscQueue::<Entry>::new_with_stub(entry(666));
        let mut model = VecDeque::new();
        for op in ops {
            match op {
                Op::Push(val) => {
                    q.push(entry(val));
                    model.push_back(val);
                }
                Op::Pop => {
                    prop_assert_eq!(q.pop().map(|e| e.val), model.pop_front());
                }
            }
        }
        let rest: Vec<i32> = q.consume().map(|e| e.val).collect();
        prop_assert_eq!(rest, model.into_iter().collect::<Vec<_>>());
    }
}

const fn if_miri(miri: i32, not_miri: i32) -> i32 {
    if cfg!(miri) {
        miri
    } else {
        not_miri
    }
}

mod test_util {
    use super::*;
    use std::sync::atomic::{AtomicI32, AtomicUsize};

    #[derive(Debug)]
    #[repr(C)]
    pub(super) struct Entry {
        links: Links<Entry>,
        pub(super) val: i32,
    }

    impl PartialEq for Entry {
        fn eq(&self, other: &Self) -> bool {
            self.val == other.val
        }
    }

    unsafe impl Linked<Links<Self>> for Entry {
        type Handle = Pin<Box<Entry>>;

        fn into_ptr(handle: Pin<Box<Entry>>) -> NonNull<Entry> {
            unsafe { NonNull::from(Box::leak(Pin::into_inner_unchecked(handle))) }
        }

        unsafe fn from_ptr(ptr: NonNull<Entry>) -> Pin<Box<Entry>> {
            // Safety: every `Entry` handed to a queue came from a pinned box.
            Pin::new_unchecked(Box::from_raw(ptr.as_ptr()))
        }

        unsafe fn links(target: NonNull<Entry>) -> NonNull<Links<Entry>> {
            // Safety: `Entry` is `repr(C)`, and the links are its first field.
            target.cast()
        }
    }

    pub(super) fn entry(val: i32) -> Pin<Box<Entry>> {
        Box::pin(Entry {
            links: Links::new(),
            val,
        })
    }

    /// A node whose storage outlives the queue, the way a pooled or static
    /// node would.
    #[derive(Debug)]
    #[repr(C)]
    pub(super) struct Pooled {
        pub(super) links: Links<Pooled>,
        pub(super) val: AtomicI32,
    }

    impl Pooled {
        pub(super) const fn new_stub() -> Self {
            Self {
                links: Links::new_stub(),
                val: AtomicI32::new(-1),
            }
        }
    }

    unsafe impl Linked<Links<Self>> for Pooled {
        type Handle = &'static Pooled;

        fn into_ptr(handle: &'static Pooled) -> NonNull<Pooled> {
            NonNull::from(handle)
        }

        unsafe fn from_ptr(ptr: NonNull<Pooled>) -> &'static Pooled {
            &*ptr.as_ptr()
        }

        unsafe fn links(target: NonNull<Pooled>) -> NonNull<Links<Pooled>> {
            target.cast()
        }
    }

    pub(super) fn pooled(val: i32) -> &'static Pooled {
        Box::leak(Box::new(Pooled {
            links: Links::new(),
            val: AtomicI32::new(val),
        }))
    }

    /// A node that counts how many times nodes of its kind are dropped.
    #[repr(C)]
    pub(super) struct Counted {
        links: Links<Counted>,
        dropped: Arc<AtomicUsize>,
    }

    impl Drop for Counted {
        fn drop(&mut self) {
            self.dropped.fetch_add(1, Relaxed);
        }
    }

    unsafe impl Linked<Links<Self>> for Counted {
        type Handle = Pin<Box<Counted>>;

        fn into_ptr(handle: Pin<Box<Counted>>) -> NonNull<Counted> {
            unsafe { NonNull::from(Box::leak(Pin::into_inner_unchecked(handle))) }
        }

        unsafe fn from_ptr(ptr: NonNull<Counted>) -> Pin<Box<Counted>> {
            Pin::new_unchecked(Box::from_raw(ptr.as_ptr()))
        }

        unsafe fn links(target: NonNull<Counted>) -> NonNull<Links<Counted>> {
            target.cast()
        }
    }

    pub(super) fn counted(dropped: &Arc<AtomicUsize>) -> Pin<Box<Counted>> {
        Box::pin(Counted {
            links: Links::new(),
            dropped: dropped.clone(),
        })
    }
}
