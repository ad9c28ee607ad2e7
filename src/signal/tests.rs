use super::*;
use std::sync::Arc;

const SHORT: Duration = Duration::from_millis(10);
const LONG: Duration = Duration::from_secs(10);

fn pending_notification_is_consumed(signal: &impl Signal) {
    signal.notify().unwrap();
    assert!(signal.wait(Some(LONG)).unwrap());
    // consumed, so the next wait times out.
    assert!(!signal.wait(Some(SHORT)).unwrap());
}

fn notifications_coalesce(signal: &impl Signal) {
    for _ in 0..10 {
        signal.notify().unwrap();
    }
    assert!(signal.wait(Some(LONG)).unwrap());
    assert!(!signal.wait(Some(SHORT)).unwrap());
}

fn times_out_without_notification(signal: &impl Signal) {
    let start = Instant::now();
    assert!(!signal.wait(Some(SHORT)).unwrap());
    assert!(start.elapsed() >= SHORT);
}

fn wakes_a_waiting_thread<S: Signal + 'static>(signal: S) {
    let signal = Arc::new(signal);
    let notifier = {
        let signal = signal.clone();
        thread::spawn(move || {
            thread::sleep(SHORT);
            signal.notify().unwrap();
        })
    };

    assert!(signal.wait(None).unwrap());
    notifier.join().unwrap();
}

#[test]
fn thread_signal_pending_notification_is_consumed() {
    pending_notification_is_consumed(&ThreadSignal::new());
}

#[test]
fn thread_signal_notifications_coalesce() {
    notifications_coalesce(&ThreadSignal::new());
}

#[test]
fn thread_signal_times_out() {
    times_out_without_notification(&ThreadSignal::new());
}

#[test]
fn thread_signal_wakes_a_waiting_thread() {
    wakes_a_waiting_thread(ThreadSignal::new());
}

#[test]
fn thread_signal_survives_many_handoffs() {
    let signal = Arc::new(ThreadSignal::new());
    let acks = Arc::new(ThreadSignal::new());
    let notifier = {
        let signal = signal.clone();
        let acks = acks.clone();
        thread::spawn(move || {
            for _ in 0..1000 {
                signal.notify().unwrap();
                assert!(acks.wait(Some(LONG)).unwrap(), "waiter never acked");
            }
        })
    };

    for _ in 0..1000 {
        assert!(signal.wait(Some(LONG)).unwrap(), "notification was lost");
        acks.notify().unwrap();
    }
    notifier.join().unwrap();
}

#[test]
fn thread_signal_follows_the_waiter_to_a_new_thread() {
    let signal = Arc::new(ThreadSignal::new());

    // the first waiter times out and goes away.
    {
        let signal = signal.clone();
        let timed_out = thread::spawn(move || signal.wait(Some(SHORT)).unwrap());
        assert!(!timed_out.join().unwrap());
    }

    let parked = {
        let signal = signal.clone();
        thread::spawn(move || signal.wait(Some(LONG)).unwrap())
    };
    while signal.state.load(Acquire) != PARKED {
        thread::yield_now();
    }
    signal.notify().unwrap();
    assert!(parked.join().unwrap(), "the second waiter was never woken");
}

#[cfg(target_os = "linux")]
mod eventfd {
    use super::*;

    #[test]
    fn pending_notification_is_consumed() {
        super::pending_notification_is_consumed(&EventFd::new().unwrap());
    }

    #[test]
    fn notifications_coalesce() {
        super::notifications_coalesce(&EventFd::new().unwrap());
    }

    #[test]
    fn times_out() {
        super::times_out_without_notification(&EventFd::new().unwrap());
    }

    #[test]
    fn wakes_a_waiting_thread() {
        super::wakes_a_waiting_thread(EventFd::new().unwrap());
    }

    #[test]
    fn reset_counts_notifications() {
        let fd = EventFd::new().unwrap();
        assert_eq!(fd.reset().unwrap(), 0);
        for _ in 0..3 {
            fd.notify().unwrap();
        }
        assert_eq!(fd.reset().unwrap(), 3);
        assert_eq!(fd.reset().unwrap(), 0);
    }
}
