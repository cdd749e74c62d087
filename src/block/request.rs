//! Request/handler completion (component K, §4.11): `req_done` runs under
//! the handler's spinlock, counts completions, records the first non-zero
//! error, and wakes the synchronous waiter (or schedules the async event)
//! once every sub-request has completed. Grounded in the teacher's
//! synchronous `BlockDevice::read_sectors`/`write_sectors` calls, extended
//! with the split/scatter completion tracking the spec requires (a single
//! logical request can fan out into `num` sub-requests against a stacked
//! provider).

use crate::error::KernelError;
use alloc::sync::Arc;
use spin::Mutex;

#[derive(Default)]
struct HandlerState {
    num: u32,
    done: u32,
    first_error: Option<KernelError>,
    handler_started: bool,
    async_scheduled: bool,
}

/// Tracks completion of a request that has fanned out into `num`
/// sub-requests (e.g. a large I/O split across a stacked provider's block
/// size). A caller waiting synchronously polls [`Handler::is_complete`]
/// after being woken; an asynchronous caller's event firing is represented
/// here as `async_scheduled` flipping once.
pub struct Handler {
    state: Mutex<HandlerState>,
}

impl Handler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { state: Mutex::new(HandlerState::default()) })
    }

    /// Called once the handler knows how many sub-requests it issued. If
    /// every sub-request had already completed by the time this runs (a
    /// request that completes inline, before `handler_start` is even
    /// called), the async event is scheduled immediately (§4.11).
    pub fn handler_start(&self, num: u32) {
        let mut s = self.state.lock();
        s.num = num;
        s.handler_started = true;
        if s.done >= s.num && !s.async_scheduled {
            s.async_scheduled = true;
        }
    }

    /// `req_done(req, err)`: increments `done`, records the first non-zero
    /// error, and if this was the last sub-request, marks completion.
    pub fn req_done(&self, err: Option<KernelError>) {
        let mut s = self.state.lock();
        s.done += 1;
        if s.first_error.is_none() {
            s.first_error = err;
        }
        if s.handler_started && s.done >= s.num && !s.async_scheduled {
            s.async_scheduled = true;
        }
    }

    pub fn is_complete(&self) -> bool {
        let s = self.state.lock();
        s.handler_started && s.done >= s.num
    }

    pub fn async_event_fired(&self) -> bool {
        self.state.lock().async_scheduled
    }

    pub fn result(&self) -> Result<(), KernelError> {
        let s = self.state.lock();
        match s.first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completes_after_all_subrequests_done() {
        let h = Handler::new();
        h.handler_start(3);
        h.req_done(None);
        h.req_done(None);
        assert!(!h.is_complete());
        h.req_done(None);
        assert!(h.is_complete());
        assert!(h.result().is_ok());
    }

    #[test]
    fn records_first_nonzero_error_only() {
        let h = Handler::new();
        h.handler_start(2);
        h.req_done(Some(KernelError::Io));
        h.req_done(Some(KernelError::OutOfMemory));
        assert_eq!(h.result(), Err(KernelError::Io));
    }

    #[test]
    fn inline_completion_before_handler_start_fires_async_immediately() {
        let h = Handler::new();
        h.req_done(None);
        h.handler_start(1);
        assert!(h.async_event_fired());
    }
}
