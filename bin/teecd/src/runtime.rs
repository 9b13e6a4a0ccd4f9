//! The daemon's explicit runtime value: owns the broker, the three host
//! agents, and the POSIX proxy's tasklets, mirroring how
//! `tee_client::Runtime` replaces the original's file-scope globals with
//! one value the composition root builds and threads through (spec §9).

use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::thread::JoinHandle;

use tee_agent::error::AgentError;
use tee_agent::{AgentChannel, FsAgent, MiscAgent, SeclibAgent};
use tee_broker::{Broker, BrokerConfig};
use tee_driver::DeviceHandle;
use tee_posix_proxy::{ControlHandler, DataTaskletHandler, PkgSweeper, ProxyContext};
use tee_xtasklet::{Xtasklet, XtaskletMemory};

use crate::config::Config;
use crate::error::{Result, TeecdError};

/// One shared-memory region backing a tasklet's task/result queue pair.
/// Allocated as an anonymous `mmap`, rather than the original's
/// `shmget`/`shmat` pair — there is no second process on this side of the
/// boundary to share the mapping with by key, only threads within this
/// one daemon, so a private anonymous mapping needs no key-collision
/// bookkeeping (see DESIGN.md).
struct TaskletMemory {
    ptr: *mut u8,
    len: usize,
}

impl TaskletMemory {
    fn new(len: usize) -> std::io::Result<Self> {
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error());
        }
        Ok(TaskletMemory { ptr: ptr as *mut u8, len })
    }
}

// SAFETY: the mapping outlives every `Xtasklet` built over it (the
// runtime holds both for as long as it lives).
unsafe impl Send for TaskletMemory {}

impl Drop for TaskletMemory {
    fn drop(&mut self) {
        unsafe { libc::munmap(self.ptr as *mut libc::c_void, self.len) };
    }
}

/// Owns every long-lived piece of daemon state: the broker listen loop,
/// the three agent channels, and the control/data tasklet pair. Held for
/// its `Drop` glue; `main` just keeps this alive until shutdown.
pub struct Runtime {
    _driver: DeviceHandle,
    broker_thread: JoinHandle<()>,
    _agent_threads: Vec<JoinHandle<()>>,
    _ctrl_tasklet: Xtasklet,
    _data_tasklet: Xtasklet,
    _ctrl_mem: TaskletMemory,
    _data_mem: TaskletMemory,
    _sweeper: PkgSweeper,
}

const CTRL_TASKLET_BUFFER_BYTES: usize = 2 * 4 * 1024; // two 4 KiB halves

impl Runtime {
    /// Probe the driver, bring up the broker, register every agent, and
    /// stand up the POSIX proxy's tasklets. Any failure here is the
    /// startup self-check spec §7 calls out for a distinguishable exit
    /// code — nothing partially built is left running.
    pub fn start(config: &Config) -> Result<Self> {
        let broker = Arc::new(Broker::new(BrokerConfig {
            socket: config.broker_socket(),
            client_device_path: config.client_device_path.clone(),
            private_device_path: config.private_device_path.clone(),
            passwd_path: config.passwd_path.clone(),
        }));
        broker.negotiate_version(config.expect_protocol_major, config.expect_protocol_minor)?;

        let broker_for_thread = broker.clone();
        let broker_thread = std::thread::Builder::new()
            .name("teecd-broker".into())
            .spawn(move || {
                if let Err(e) = broker_for_thread.run() {
                    tracing::error!(error = %e, "broker accept loop exited");
                }
            })
            .expect("spawning the broker thread");

        let agent_threads = spawn_agents(config)?;

        // Held only so its fd stays open and reserved for the lifetime of
        // the proxy; the POSIX handlers never issue ioctls through it.
        let driver = DeviceHandle::open(&config.client_device_path).map_err(AgentError::from)?;
        let proxy_ctx = Arc::new(ProxyContext::new(driver.as_raw_fd(), -1));

        let ctrl_mem = TaskletMemory::new(CTRL_TASKLET_BUFFER_BYTES)?;
        let ctrl_handler = ControlHandler::new(|| 1, || 0, || 0);
        let ctrl_tasklet = unsafe {
            Xtasklet::new(XtaskletMemory { shm: ctrl_mem.ptr, shm_size: ctrl_mem.len }, 1, ctrl_handler)?
        };

        let data_buffer_bytes = config.data_tasklet_buffer_kb * 1024 * 2;
        let data_mem = TaskletMemory::new(data_buffer_bytes)?;
        let data_handler = DataTaskletHandler::new(proxy_ctx.clone());
        let data_tasklet = unsafe {
            Xtasklet::new(
                XtaskletMemory { shm: data_mem.ptr, shm_size: data_mem.len },
                config.data_tasklet_concurrency,
                data_handler,
            )?
        };

        let sweeper = PkgSweeper::spawn(proxy_ctx);

        Ok(Runtime {
            _driver: driver,
            broker_thread,
            _agent_threads: agent_threads,
            _ctrl_tasklet: ctrl_tasklet,
            _data_tasklet: data_tasklet,
            _ctrl_mem: ctrl_mem,
            _data_mem: data_mem,
            _sweeper: sweeper,
        })
    }

    /// Block the calling thread until the broker's accept loop exits.
    /// Every other piece of daemon state (agents, tasklets, the sweeper)
    /// stays alive as long as `self` does, so callers just hold onto the
    /// `Runtime` and call this once.
    pub fn wait(self) {
        let _ = self.broker_thread.join();
    }
}

fn spawn_agents(config: &Config) -> Result<Vec<JoinHandle<()>>> {
    let mut threads = Vec::with_capacity(3);

    let fs_channel = AgentChannel::register(&config.client_device_path, tee_agent::ids::FS, tee_agent::TRANS_BUFF_SIZE)?;
    threads.push(
        std::thread::Builder::new()
            .name("teecd-agent-fs".into())
            .spawn(move || {
                let agent = FsAgent::default();
                fs_channel.run(|control| agent.dispatch(control));
            })
            .expect("spawning the fs agent thread"),
    );

    let misc_channel =
        AgentChannel::register(&config.client_device_path, tee_agent::ids::MISC, tee_agent::TRANS_BUFF_SIZE)?;
    threads.push(
        std::thread::Builder::new()
            .name("teecd-agent-misc".into())
            .spawn(move || {
                let agent = MiscAgent;
                misc_channel.run(|control| agent.dispatch(control));
            })
            .expect("spawning the misc agent thread"),
    );

    let seclib_device = DeviceHandle::open(&config.client_device_path).map_err(AgentError::from)?;
    let seclib_channel = AgentChannel::register(
        &config.client_device_path,
        tee_agent::ids::SECFILE_LOAD,
        tee_agent::TRANS_BUFF_SIZE,
    )?;
    let dynamic_ta_dir = config.dynamic_ta_dir.clone();
    threads.push(
        std::thread::Builder::new()
            .name("teecd-agent-seclib".into())
            .spawn(move || {
                let agent = SeclibAgent::new(dynamic_ta_dir);
                seclib_channel.run(|control| agent.dispatch(&seclib_device, control));
            })
            .expect("spawning the seclib agent thread"),
    );

    Ok(threads)
}
