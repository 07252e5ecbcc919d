//! Cross-thread preemption signal.

use std::sync::atomic::{AtomicBool, Ordering};

/// Flag set by a higher-priority scheduler (possibly on another thread) to
/// make this scheduler yield the GPU between command slices.
///
/// This is the only cross-thread state in the crate. Readers treat each load
/// as a consistent snapshot; there is no other synchronization between the
/// two schedulers.
#[derive(Debug, Default)]
pub struct PreemptionFlag {
    preempted: AtomicBool,
}

impl PreemptionFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.preempted.store(true, Ordering::Release);
    }

    pub fn reset(&self) {
        self.preempted.store(false, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.preempted.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn set_and_reset_are_observable_through_clones_of_the_handle() {
        let flag = Arc::new(PreemptionFlag::new());
        let other = Arc::clone(&flag);

        assert!(!flag.is_set());
        other.set();
        assert!(flag.is_set());
        other.reset();
        assert!(!flag.is_set());
    }

    #[test]
    fn set_is_visible_across_threads() {
        let flag = Arc::new(PreemptionFlag::new());
        let writer = Arc::clone(&flag);

        let handle = std::thread::spawn(move || writer.set());
        handle.join().expect("writer thread panicked");

        assert!(flag.is_set());
    }
}
