//! Shutdown-signal wiring, exercised in an isolated test binary so the
//! mask manipulation cannot interfere with other test threads.

use std::time::Duration;

use hive_server::signal::ShutdownSignal;
use nix::sys::signal::{SigSet, Signal};

#[test]
fn test_mask_inherited_and_signalfd_fires() {
    let mut signals = ShutdownSignal::install().unwrap();

    // Threads spawned after install inherit the blocked mask, so a
    // process-directed SIGTERM cannot take them down with the default
    // disposition.
    let helper = std::thread::spawn(|| {
        let mask = SigSet::thread_get_mask().unwrap();
        assert!(mask.contains(Signal::SIGTERM));
        assert!(mask.contains(Signal::SIGINT));
        assert!(mask.contains(Signal::SIGQUIT));
        std::thread::sleep(Duration::from_millis(50));
    });

    // Direct a SIGTERM at this thread; it must surface through the
    // signalfd instead of terminating the process.
    unsafe {
        let tid = libc::syscall(libc::SYS_gettid);
        libc::syscall(libc::SYS_tgkill, libc::getpid(), tid, libc::SIGTERM);
    }
    assert_eq!(signals.wait(), Some(libc::SIGTERM));

    helper.join().unwrap();
}
