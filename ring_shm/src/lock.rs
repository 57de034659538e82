//! Shared-memory spin mutex for cooperating non-real-time parties.
//!
//! The lock word lives in the ring header and holds the pid of the holder,
//! or zero when free. A word held by a dead process is taken over, so a
//! crashed producer cannot wedge the ring. Acquisition spins, then yields;
//! it is never used unless the ring was created with a mutex flag.

use crate::platform::{get_current_pid, is_process_alive};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::warn;

const SPINS_BEFORE_YIELD: u32 = 64;

/// Held lock; releases the word on drop.
pub(crate) struct SpinGuard<'a> {
    word: &'a AtomicU32,
}

impl Drop for SpinGuard<'_> {
    fn drop(&mut self) {
        self.word.store(0, Ordering::Release);
    }
}

/// Acquire the lock in `word`, blocking until it is free.
pub(crate) fn acquire(word: &AtomicU32) -> SpinGuard<'_> {
    let me = get_current_pid();
    let mut spins = 0u32;

    loop {
        match word.compare_exchange_weak(0, me, Ordering::Acquire, Ordering::Relaxed) {
            Ok(_) => return SpinGuard { word },
            Err(holder) if holder != 0 && holder != me && !is_process_alive(holder) => {
                if word
                    .compare_exchange(holder, me, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    warn!("Reclaimed ring lock held by dead process {}", holder);
                    return SpinGuard { word };
                }
            }
            Err(_) => {}
        }

        spins += 1;
        if spins < SPINS_BEFORE_YIELD {
            std::hint::spin_loop();
        } else {
            std::thread::yield_now();
        }
    }
}

/// Holder pid of `word`, if locked.
pub(crate) fn holder(word: &AtomicU32) -> Option<u32> {
    match word.load(Ordering::Acquire) {
        0 => None,
        pid => Some(pid),
    }
}
