//! A pool of warm sessions against one Trusted Application.
//!
//! Grounded on `original_source/include/cloud/tee_session_pool.h` and
//! `src/libteec_vendor/tee_session_pool.c`: a background thread keeps a
//! floor of ready sessions open so callers on the hot path avoid paying
//! `TEEC_OpenSession`'s cost, a counting semaphore bounds how many
//! callers can be mid-acquire at once, and a session that comes back
//! from an invoke with `TargetDead` is quarantined rather than returned
//! to the pool. The original's `sem_t` is replaced by a
//! [`parking_lot::Condvar`] guarding a plain count, and the creation
//! thread is `std::thread` rather than a raw `pthread_create`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tee_wire::client::ClientLogin;
use tee_wire::error::TeeError;
use tee_wire::Uuid;

use crate::marshal::Param;
use crate::registry::{SessionHandle, SessionSource};

/// Floor on the number of sessions a pool keeps warm, mirroring
/// `SESSION_POOL_CAP_MIN`.
pub const SESSION_POOL_CAP_MIN: usize = 5;

/// Ceiling on the number of sessions a pool will ever open, mirroring
/// `SESSION_POOL_CAP_MAX`.
pub const SESSION_POOL_CAP_MAX: usize = 100;

struct Slot {
    handle: SessionHandle,
    in_use: bool,
    dead: bool,
}

struct Inner {
    slots: Vec<Slot>,
    target_cap: usize,
}

/// A bounded pool of sessions opened against a single `ta_uuid`.
pub struct SessionPool {
    context: Arc<dyn SessionSource>,
    ta_uuid: Uuid,
    inner: Mutex<Inner>,
    available: Condvar,
    shutdown: AtomicBool,
    warmup_thread: Mutex<Option<JoinHandle<()>>>,
}

impl SessionPool {
    /// Create a pool targeting `cap` warm sessions (clamped to
    /// `[SESSION_POOL_CAP_MIN, SESSION_POOL_CAP_MAX]`) and spawn the
    /// background thread that fills it.
    pub fn new(context: Arc<dyn SessionSource>, ta_uuid: Uuid, cap: usize) -> Arc<Self> {
        let target_cap = cap.clamp(SESSION_POOL_CAP_MIN, SESSION_POOL_CAP_MAX);
        let pool = Arc::new(SessionPool {
            context,
            ta_uuid,
            inner: Mutex::new(Inner {
                slots: Vec::with_capacity(target_cap),
                target_cap,
            }),
            available: Condvar::new(),
            shutdown: AtomicBool::new(false),
            warmup_thread: Mutex::new(None),
        });

        let warmup_pool = pool.clone();
        let handle = std::thread::spawn(move || warmup_pool.warmup_loop());
        *pool.warmup_thread.lock() = Some(handle);
        pool
    }

    fn warmup_loop(self: Arc<Self>) {
        while !self.shutdown.load(Ordering::Acquire) {
            let need = {
                let inner = self.inner.lock();
                inner.target_cap.saturating_sub(inner.slots.len())
            };
            if need == 0 {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            match self.context.open_session(
                self.ta_uuid,
                ClientLogin::PUBLIC,
                &mut [Param::None, Param::None, Param::None, Param::None],
            ) {
                Ok(handle) => {
                    let mut inner = self.inner.lock();
                    inner.slots.push(Slot {
                        handle,
                        in_use: false,
                        dead: false,
                    });
                    drop(inner);
                    self.available.notify_one();
                }
                Err(e) => {
                    tracing::warn!(error = %e, "session pool warm-up failed to open a session");
                    std::thread::sleep(Duration::from_millis(200));
                }
            }
        }
    }

    /// Borrow a live session, waiting for one to become free if every
    /// warm session is currently checked out.
    pub fn acquire(&self, timeout: Duration) -> Option<SessionHandle> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(slot) = inner.slots.iter_mut().find(|s| !s.in_use && !s.dead) {
                slot.in_use = true;
                return Some(slot.handle);
            }
            let timed_out = self.available.wait_for(&mut inner, timeout).timed_out();
            if timed_out {
                return None;
            }
        }
    }

    /// Return a session previously obtained from [`Self::acquire`].
    pub fn release(&self, session: SessionHandle) {
        let mut inner = self.inner.lock();
        if let Some(slot) = inner.slots.iter_mut().find(|s| s.handle == session) {
            slot.in_use = false;
        }
        drop(inner);
        self.available.notify_one();
    }

    /// Quarantine a session that an invoke reported as dead: it is
    /// dropped from rotation and the warm-up thread replaces it.
    pub fn mark_dead(&self, session: SessionHandle) {
        let mut inner = self.inner.lock();
        if let Some(slot) = inner.slots.iter_mut().find(|s| s.handle == session) {
            slot.dead = true;
            slot.in_use = false;
        }
        inner.slots.retain(|s| !s.dead);
    }

    /// Acquire a session, invoke `cmd_id`, and release it — quarantining
    /// the session instead of returning it to the pool if the TEE
    /// reports it dead.
    pub fn invoke(
        &self,
        cmd_id: u32,
        params: &mut [Param<'_>; tee_wire::PARAM_NUM],
        timeout: Duration,
    ) -> Result<(), TeeError> {
        let session = self.acquire(timeout).ok_or(TeeError::Interrupted)?;
        let result = self.context.invoke_command(session, cmd_id, params);
        match &result {
            Err(TeeError::TargetDead) => self.mark_dead(session),
            _ => self.release(session),
        }
        result
    }

    /// Current number of warm sessions, used and idle combined.
    pub fn warm_count(&self) -> usize {
        self.inner.lock().slots.len()
    }

    /// `(opened, in_use)` snapshot, mirroring the original's
    /// `TEEC_SessionPoolQuery`.
    pub fn query(&self) -> (usize, usize) {
        let inner = self.inner.lock();
        let in_use = inner.slots.iter().filter(|s| s.in_use).count();
        (inner.slots.len(), in_use)
    }

    /// Render the usage and dead-flag state as fixed-width text, 32
    /// slots per line, for diagnostic logging. Mirrors the original's
    /// `DumpSessionPool`.
    pub fn dump(&self) -> String {
        let inner = self.inner.lock();
        let mut out = String::new();
        for (line_no, chunk) in inner.slots.chunks(32).enumerate() {
            out.push_str(&format!("usage[{line_no:>3}]: "));
            for slot in chunk {
                out.push(if slot.in_use { '1' } else { '0' });
            }
            out.push('\n');
            out.push_str(&format!("dead [{line_no:>3}]: "));
            for slot in chunk {
                out.push(if slot.dead { '1' } else { '0' });
            }
            out.push('\n');
        }
        out
    }

    /// Signal the warm-up thread to stop. The thread is not joined here;
    /// callers that need join semantics keep their own handle.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.available.notify_all();
    }
}

impl Drop for SessionPool {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.warmup_thread.lock().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use crate::arena::Arena;

    use super::*;

    /// A [`SessionSource`] fake that mints sessions from a local arena
    /// instead of opening a real device, with a hook to fail the Nth
    /// `invoke_command` call with `TargetDead`.
    struct FakeSource {
        arena: Mutex<Arena<()>>,
        invoke_count: AtomicUsize,
        die_on_invoke: Option<usize>,
    }

    impl FakeSource {
        fn new(die_on_invoke: Option<usize>) -> Self {
            FakeSource {
                arena: Mutex::new(Arena::new()),
                invoke_count: AtomicUsize::new(0),
                die_on_invoke,
            }
        }
    }

    impl SessionSource for FakeSource {
        fn open_session(
            &self,
            _ta_uuid: Uuid,
            _login: ClientLogin,
            _params: &mut [Param<'_>; tee_wire::PARAM_NUM],
        ) -> Result<SessionHandle, TeeError> {
            Ok(SessionHandle::from_handle(self.arena.lock().insert(())))
        }

        fn invoke_command(
            &self,
            _session: SessionHandle,
            _cmd_id: u32,
            _params: &mut [Param<'_>; tee_wire::PARAM_NUM],
        ) -> Result<(), TeeError> {
            let count = self.invoke_count.fetch_add(1, Ordering::SeqCst) + 1;
            if self.die_on_invoke == Some(count) {
                Err(TeeError::TargetDead)
            } else {
                Ok(())
            }
        }
    }

    fn uuid() -> Uuid {
        Uuid::from_bytes([7; 16])
    }

    fn no_params<'a>() -> [Param<'a>; tee_wire::PARAM_NUM] {
        [Param::None, Param::None, Param::None, Param::None]
    }

    /// Scenario 1: pool warm-up. Capacity 5 eventually opens exactly 5
    /// idle sessions with nothing checked out.
    #[test]
    fn warm_up_fills_to_capacity() {
        let source: Arc<dyn SessionSource> = Arc::new(FakeSource::new(None));
        let pool = SessionPool::new(source, uuid(), 5);
        for _ in 0..200 {
            if pool.query() == (5, 0) {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(pool.query(), (5, 0));
    }

    /// Scenario 2: dead-session quarantine. A session that comes back
    /// `TargetDead` from `invoke` is dropped from rotation rather than
    /// returned to the idle set.
    #[test]
    fn dead_session_is_quarantined_not_recycled() {
        let source: Arc<dyn SessionSource> = Arc::new(FakeSource::new(Some(3)));
        let pool = SessionPool::new(source, uuid(), SESSION_POOL_CAP_MIN);
        for _ in 0..200 {
            if pool.warm_count() == SESSION_POOL_CAP_MIN {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(pool.warm_count(), SESSION_POOL_CAP_MIN);

        let mut params = no_params();
        for i in 1..=3 {
            let result = pool.invoke(0, &mut params, Duration::from_secs(1));
            if i < 3 {
                assert!(result.is_ok());
            } else {
                assert!(matches!(result, Err(TeeError::TargetDead)));
            }
        }

        // The dead slot was dropped immediately, not returned idle.
        assert_eq!(pool.warm_count(), SESSION_POOL_CAP_MIN - 1);
        assert_eq!(pool.query().1, 0);

        // The warm-up thread replaces it back up to capacity.
        for _ in 0..200 {
            if pool.warm_count() == SESSION_POOL_CAP_MIN && pool.query() == (SESSION_POOL_CAP_MIN, 0) {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(pool.query(), (SESSION_POOL_CAP_MIN, 0));
    }

    #[test]
    fn dump_renders_fixed_width_lines() {
        let source: Arc<dyn SessionSource> = Arc::new(FakeSource::new(None));
        let pool = SessionPool::new(source, uuid(), SESSION_POOL_CAP_MIN);
        for _ in 0..200 {
            if pool.warm_count() == SESSION_POOL_CAP_MIN {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        let text = pool.dump();
        assert!(text.contains("usage["));
        assert!(text.contains("dead ["));
    }
}
