//! The control tasklet: lifecycle requests for the proxy's own tasklets
//! (spec §4.I).
//!
//! Grounded on `posix_ctrl_handler.c`'s `PosixCtrlTaskletCallHandler`,
//! which switches on `call->type` alone (no `func` sub-dispatch, no
//! argument list) and invokes one of three lifecycle callbacks. Here
//! those callbacks are supplied by whoever owns the surrounding
//! [`crate::PosixProxy`], so this module stays decoupled from how
//! tasklets are actually constructed.

use tee_xtasklet::TaskHandler;

/// `enum PosixCtrlCallTypes` verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CtrlCallType {
    /// Bring up the control tasklet itself.
    RegisterCtrlTasklet = 0,
    /// Bring up (another) data tasklet.
    RegisterDataTasklet = 1,
    /// Tear down every tasklet this proxy owns.
    UnregisterAllTasklet = 2,
}

impl CtrlCallType {
    fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(CtrlCallType::RegisterCtrlTasklet),
            1 => Some(CtrlCallType::RegisterDataTasklet),
            2 => Some(CtrlCallType::UnregisterAllTasklet),
            _ => None,
        }
    }
}

/// The control tasklet's [`TaskHandler`]: decodes a bare `call_type` out
/// of the request payload and runs the matching lifecycle callback.
pub struct ControlHandler {
    on_register_ctrl: Box<dyn Fn() -> i64 + Send + Sync>,
    on_register_data: Box<dyn Fn() -> i64 + Send + Sync>,
    on_unregister_all: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl ControlHandler {
    /// Build a handler wired to the three lifecycle callbacks. Each
    /// returns the raw `long` the original's `PosixCtrlTaskletCallHandler`
    /// would have returned — for `RegisterCtrlTasklet`, success is a
    /// positive count; for the other two, success is `0`.
    pub fn new(
        on_register_ctrl: impl Fn() -> i64 + Send + Sync + 'static,
        on_register_data: impl Fn() -> i64 + Send + Sync + 'static,
        on_unregister_all: impl Fn() -> i64 + Send + Sync + 'static,
    ) -> Self {
        ControlHandler {
            on_register_ctrl: Box::new(on_register_ctrl),
            on_register_data: Box::new(on_register_data),
            on_unregister_all: Box::new(on_unregister_all),
        }
    }
}

impl TaskHandler for ControlHandler {
    fn handle(&self, payload: &[u8]) -> Vec<u8> {
        let ret = if payload.len() < 4 {
            tracing::warn!("control tasklet request shorter than its call_type field");
            1
        } else {
            let call_type = u32::from_ne_bytes(payload[0..4].try_into().unwrap());
            match CtrlCallType::from_u32(call_type) {
                Some(CtrlCallType::RegisterCtrlTasklet) => (self.on_register_ctrl)(),
                Some(CtrlCallType::RegisterDataTasklet) => (self.on_register_data)(),
                Some(CtrlCallType::UnregisterAllTasklet) => (self.on_unregister_all)(),
                None => {
                    tracing::warn!(call_type, "invalid posix ctrl call type");
                    1
                }
            }
        };
        ret.to_ne_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    fn wire(call_type: u32) -> Vec<u8> {
        call_type.to_ne_bytes().to_vec()
    }

    #[test]
    fn dispatches_to_the_matching_callback() {
        let data_calls = Arc::new(AtomicI64::new(0));
        let data_calls_for_cb = data_calls.clone();
        let handler = ControlHandler::new(
            || 1,
            move || {
                data_calls_for_cb.fetch_add(1, Ordering::SeqCst);
                0
            },
            || 0,
        );
        let ret = i64::from_ne_bytes(handler.handle(&wire(1)).try_into().unwrap());
        assert_eq!(ret, 0);
        assert_eq!(data_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unknown_call_type_reports_failure() {
        let handler = ControlHandler::new(|| 1, || 0, || 0);
        let ret = i64::from_ne_bytes(handler.handle(&wire(99)).try_into().unwrap());
        assert_eq!(ret, 1);
    }

    #[test]
    fn truncated_payload_reports_failure() {
        let handler = ControlHandler::new(|| 1, || 0, || 0);
        let ret = i64::from_ne_bytes(handler.handle(&[0, 0]).try_into().unwrap());
        assert_eq!(ret, 1);
    }
}
