//! An explicit runtime value that owns a context and the session pools
//! built on top of it.
//!
//! The original client keeps no global state of its own, but every CA
//! built against it typically stashes one static `TEEC_Context` and a
//! handful of `SessionPool *` in file-scope globals initialized once at
//! process start. `Runtime` replaces that convention with a value the
//! composition root constructs once and threads through explicitly, so
//! nothing here reaches for a `static` or `OnceLock`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tee_driver::CLIENT_DEV_PATH;
use tee_wire::error::TeeError;
use tee_wire::Uuid;

use crate::pool::SessionPool;
use crate::registry::Context;

/// Owns one TEE context and the session pools opened against it.
pub struct Runtime {
    context: Arc<Context>,
    pools: Mutex<HashMap<Uuid, Arc<SessionPool>>>,
}

impl Runtime {
    /// Initialize a context against the given device path (usually
    /// [`CLIENT_DEV_PATH`]).
    pub fn new(device_path: &str) -> Result<Self, TeeError> {
        Ok(Runtime {
            context: Arc::new(Context::initialize(device_path)?),
            pools: Mutex::new(HashMap::new()),
        })
    }

    /// Initialize a context against the default client device.
    pub fn default_device() -> Result<Self, TeeError> {
        Self::new(CLIENT_DEV_PATH)
    }

    /// The underlying context, for callers that want one-shot sessions
    /// instead of a pool.
    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// Fetch or lazily create the session pool for `ta_uuid`, sized to
    /// `cap` warm sessions the first time it is created.
    pub fn pool_for(&self, ta_uuid: Uuid, cap: usize) -> Arc<SessionPool> {
        let mut pools = self.pools.lock();
        pools
            .entry(ta_uuid)
            .or_insert_with(|| SessionPool::new(self.context.clone(), ta_uuid, cap))
            .clone()
    }

    /// Default acquire timeout used by convenience call sites.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
}
