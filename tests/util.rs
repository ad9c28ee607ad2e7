#![allow(dead_code)]

pub fn trace_init() {
    use tracing_subscriber::filter::LevelFilter;
    let _ = tracing_subscriber::fmt()
        .with_max_level(LevelFilter::TRACE)
        .with_test_writer()
        .try_init();
}

/// Checks that `log` holds exactly `tasks` entries from each of `producers`
/// threads, and that each thread's entries are in the order it pushed them.
pub fn assert_fifo_per_producer(log: &[(usize, usize)], producers: usize, tasks: usize) {
    assert_eq!(log.len(), producers * tasks, "wrong number of tasks ran");
    let mut next = vec![0; producers];
    for &(producer, seq) in log {
        assert_eq!(
            seq, next[producer],
            "producer {producer}'s task {seq} ran out of order (expected {})",
            next[producer]
        );
        next[producer] += 1;
    }
    assert!(next.iter().all(|&n| n == tasks), "tasks were lost: {next:?}");
}
