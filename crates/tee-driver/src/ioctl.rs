//! Raw `ioctl(2)` request numbers and typed wrapper functions.
//!
//! Every request shares magic `'t'` (`TC_NS_CLIENT_IOC_MAGIC`) with the
//! original kernel module; the numbers below are copied verbatim from
//! `original_source/src/inc/tc_ns_client.h` so that a real
//! `/dev/tc_ns_client` node would answer them identically.

use nix::{ioctl_readwrite, ioctl_write_buf};
use tee_wire::client::ClientContext;

use crate::types::{AgentIoctlArgs, SecLoadIoctlArgs, TeeInfo, TeeTime};

const TC_NS_CLIENT_IOC_MAGIC: u8 = b't';

ioctl_readwrite!(ioctl_open_session, TC_NS_CLIENT_IOC_MAGIC, 1, ClientContext);
ioctl_readwrite!(ioctl_close_session, TC_NS_CLIENT_IOC_MAGIC, 2, ClientContext);
ioctl_readwrite!(ioctl_send_cmd, TC_NS_CLIENT_IOC_MAGIC, 3, ClientContext);
ioctl_readwrite!(ioctl_release_shared_mem, TC_NS_CLIENT_IOC_MAGIC, 4, u32);
ioctl_readwrite!(ioctl_wait_event, TC_NS_CLIENT_IOC_MAGIC, 5, u32);
ioctl_readwrite!(ioctl_send_event_response, TC_NS_CLIENT_IOC_MAGIC, 6, u32);
ioctl_readwrite!(ioctl_register_agent, TC_NS_CLIENT_IOC_MAGIC, 7, AgentIoctlArgs);
ioctl_readwrite!(ioctl_unregister_agent, TC_NS_CLIENT_IOC_MAGIC, 8, u32);
ioctl_readwrite!(ioctl_load_app, TC_NS_CLIENT_IOC_MAGIC, 9, SecLoadIoctlArgs);
ioctl_readwrite!(ioctl_cancel_cmd, TC_NS_CLIENT_IOC_MAGIC, 13, ClientContext);
// TC_NS_CLIENT_IOCTL_LOGIN: driver reads a caller-assembled identity
// descriptor (length-prefixed exe path + username) straight off a
// pointer, so this is a write-only buf ioctl rather than a typed struct.
ioctl_write_buf!(ioctl_set_login_identity, TC_NS_CLIENT_IOC_MAGIC, 14, u8);
ioctl_readwrite!(ioctl_sync_sys_time, TC_NS_CLIENT_IOC_MAGIC, 17, TeeTime);
ioctl_readwrite!(ioctl_get_tee_version, TC_NS_CLIENT_IOC_MAGIC, 21, u32);
ioctl_readwrite!(ioctl_get_tee_info, TC_NS_CLIENT_IOC_MAGIC, 26, TeeInfo);
