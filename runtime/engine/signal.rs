//! Operating system signal capture
//!
//! The installed handler is async-signal-safe: it only sets a bit in a process wide mask. The
//! engine folds that mask in to its own pending set at checkpoints.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

static PENDING: AtomicU64 = AtomicU64::new(0);

extern "C" fn record_signal(signo: libc::c_int) {
    if (0..64).contains(&signo) {
        PENDING.fetch_or(1 << signo, Ordering::SeqCst);
    }
}

/// Routes a signal to the pending mask
pub fn install(signo: i32) -> io::Result<()> {
    let previous = unsafe { libc::signal(signo, record_signal as libc::sighandler_t) };

    if previous == libc::SIG_ERR {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Clears and returns the pending signals selected by `mask`
pub(crate) fn take(mask: u64) -> u64 {
    PENDING.fetch_and(!mask, Ordering::SeqCst) & mask
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn raised_signal_is_pending() {
        install(libc::SIGUSR2).unwrap();
        unsafe {
            libc::raise(libc::SIGUSR2);
        }

        let mask = 1 << libc::SIGUSR2;
        assert_eq!(mask, take(mask));
        assert_eq!(0, take(mask));
    }
}
