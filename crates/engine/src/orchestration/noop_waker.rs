//! The standard hand-rolled "do nothing" waker, used to drive a future
//! exactly once outside a real async runtime.
//!
//! Every capability future's `poll()` is itself synchronous — it either
//! resolves immediately from the replay index or parks forever — so there
//! is never a second poll to wake up for. A no-op `RawWakerVTable` makes
//! that explicit instead of pulling in a runtime just to get a `Waker`.

use std::task::{RawWaker, RawWakerVTable, Waker};

unsafe fn clone(data: *const ()) -> RawWaker {
    RawWaker::new(data, &VTABLE)
}

unsafe fn wake(_data: *const ()) {}

unsafe fn wake_by_ref(_data: *const ()) {}

unsafe fn drop(_data: *const ()) {}

static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, wake, wake_by_ref, drop);

pub fn noop_waker() -> Waker {
    let raw = RawWaker::new(std::ptr::null(), &VTABLE);
    unsafe { Waker::from_raw(raw) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::task::Context;

    #[test]
    fn builds_a_waker_without_panicking() {
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        // Exercising the vtable through a manual wake must not panic.
        cx.waker().clone().wake();
    }
}
