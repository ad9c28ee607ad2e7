use hyphae::{EventLoop, Handle, Signal};
use std::{
    sync::{Arc, Barrier, Mutex},
    thread,
    time::{Duration, Instant},
};

mod util;
use util::{assert_fifo_per_producer, trace_init};

type Log = Arc<Mutex<Vec<(usize, usize)>>>;

fn spawn_producers<S: Signal + 'static>(
    handle: &Handle<S>,
    log: &Log,
    producers: usize,
    tasks: usize,
) -> Vec<thread::JoinHandle<()>> {
    let barrier = Arc::new(Barrier::new(producers));
    (0..producers)
        .map(|producer| {
            let handle = handle.clone();
            let log = log.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for seq in 0..tasks {
                    let log = log.clone();
                    handle
                        .spawn(move || log.lock().unwrap().push((producer, seq)))
                        .expect("loop closed while producers were running");
                }
            })
        })
        .collect()
}

fn run_until_closed<S: Signal + 'static>(
    mut event_loop: EventLoop<S>,
    producers: usize,
    tasks: usize,
) {
    let log = Log::default();
    let handle = event_loop.handle();
    let threads = spawn_producers(&handle, &log, producers, tasks);
    let closer = thread::spawn(move || {
        for thread in threads {
            thread.join().unwrap();
        }
        handle.close();
    });

    event_loop.run().unwrap();
    closer.join().unwrap();
    assert_fifo_per_producer(&log.lock().unwrap(), producers, tasks);
}

#[test]
fn two_producers_with_periodic_drains() {
    const TASKS: usize = 1000;
    trace_init();

    let mut event_loop = EventLoop::new();
    let log = Log::default();
    let threads = spawn_producers(&event_loop.handle(), &log, 2, TASKS);

    let deadline = Instant::now() + Duration::from_secs(60);
    let mut executed = 0;
    while executed < 2 * TASKS {
        assert!(Instant::now() < deadline, "only {executed} tasks ran");
        executed += event_loop.tick().executed;
        thread::sleep(Duration::from_micros(100));
    }

    for thread in threads {
        thread.join().unwrap();
    }
    // nothing is left over.
    assert_eq!(event_loop.tick().executed, 0);
    assert_fifo_per_producer(&log.lock().unwrap(), 2, TASKS);
}

#[test]
fn no_loss_thread_signal() {
    trace_init();
    run_until_closed(EventLoop::new(), 8, 1000);
}

#[test]
fn no_loss_thread_signal_small_budget() {
    trace_init();
    let event_loop = EventLoop::builder().drain_budget(7).build();
    run_until_closed(event_loop, 4, 1000);
}

#[cfg(target_os = "linux")]
#[test]
fn no_loss_eventfd() {
    trace_init();
    let signal = hyphae::EventFd::new().unwrap();
    run_until_closed(EventLoop::with_signal(signal), 8, 1000);
}

#[test]
fn push_does_not_wait_for_the_loop() {
    trace_init();
    let mut event_loop = EventLoop::new();
    let handle = event_loop.handle();

    // the loop thread is busy running this task while the producer pushes.
    let (started_tx, started_rx) = std::sync::mpsc::channel();
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    handle
        .spawn(move || {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        })
        .unwrap();

    let producer = {
        let handle = handle.clone();
        thread::spawn(move || {
            started_rx.recv().unwrap();
            for _ in 0..10_000 {
                handle.spawn(|| {}).unwrap();
            }
            release_tx.send(()).unwrap();
        })
    };

    let mut executed = 0;
    while executed < 10_001 {
        executed += event_loop.tick().executed;
    }
    producer.join().unwrap();
}
