//! Storage-root routing for the FS agent.
//!
//! Grounded on `original_source/src/teecd/fs_work_agent.c`
//! (`JoinFileName`/`JoinFileNameTransient`/`DoJoinFileName`/`GetDefaultDir`/
//! `GetTransientDir`/`GetPersistentDir`) and the path prefixes defined in
//! `original_source/src/teecd/tee_ca_daemon.h`. The `TEE_OBJECT_STORAGE_CE`
//! vendor partition and the `SEC_STORAGE_DATA_MDC_PATH` OEM override are
//! left out as device-specific extensions outside this component.

use std::path::{Path, PathBuf};

use crate::error::{AgentError, Result};

/// Default root a transient (cache-like, per-install) storage name
/// resolves under when no per-user subdirectory applies (`USER_DATA_DIR`).
pub const DEFAULT_USER_DATA_DIR: &str = "/var/itrustee/sec_storage_data/";
/// Default filesystem root persistent names resolve directly under
/// (`ROOT_DIR`).
pub const DEFAULT_ROOT_DIR: &str = "/";
/// Prefix a caller's name must carry to be routed to persistent storage.
pub const SFS_PARTITION_PERSISTENT: &str = "var/itrustee/sec_storage_data/";
/// Prefix a caller's name must carry to be routed to transient storage.
pub const SFS_PARTITION_TRANSIENT: &str = "sec_storage_data/";
/// Transient subspace reserved for a TA's "personalization" data.
pub const SFS_PARTITION_TRANSIENT_PERSO: &str = "sec_storage_data/_perso";
/// Transient subspace reserved for a TA's private data.
pub const SFS_PARTITION_TRANSIENT_PRIVATE: &str = "sec_storage_data/_private";
/// Per-user symlink directory nested under the transient root.
pub const SFS_PARTITION_USER_SYMLINK: &str = "sec_storage_data_users/";
/// Names containing this substring are rejected outright (`..` escape).
pub const FILE_NAME_INVALID_STR: &str = "../";

/// The two storage roots `JoinFileName` resolves against. Kept
/// configurable (rather than baked in as the original's literal `#define`s)
/// so the agent can be pointed at a scratch directory under test instead of
/// the real `/var/itrustee` and `/` of a running device.
#[derive(Debug, Clone)]
pub struct StorageRoots {
    /// Transient storage root (`GetTransientDir`).
    pub transient: PathBuf,
    /// Persistent storage root (`GetPersistentDir`).
    pub persistent: PathBuf,
}

impl Default for StorageRoots {
    fn default() -> Self {
        StorageRoots {
            transient: PathBuf::from(DEFAULT_USER_DATA_DIR),
            persistent: PathBuf::from(DEFAULT_ROOT_DIR),
        }
    }
}

fn push_str(root: &Path, suffix: &str) -> String {
    let mut s = root.to_string_lossy().into_owned();
    if !s.ends_with('/') {
        s.push('/');
    }
    s.push_str(suffix);
    s
}

/// Resolve `name` (as handed to the FS agent's open/create/rename/etc.
/// commands by the TEE) to the real filesystem path a request against
/// `user_id` may touch (`JoinFileName`).
///
/// - Names under [`SFS_PARTITION_TRANSIENT_PERSO`] or
///   [`SFS_PARTITION_TRANSIENT_PRIVATE`] and other transient names resolve
///   under `roots.transient`, nested one level deeper per non-zero
///   `user_id` under [`SFS_PARTITION_USER_SYMLINK`].
/// - Names under [`SFS_PARTITION_PERSISTENT`] resolve under
///   `roots.persistent`.
/// - Anything else resolves under `roots.persistent` with
///   [`SFS_PARTITION_PERSISTENT`] inserted, matching `GetDefaultDir`.
pub fn resolve_path(name: &str, user_id: u32, roots: &StorageRoots) -> Result<PathBuf> {
    if name.contains(FILE_NAME_INVALID_STR) {
        return Err(AgentError::PathRejected(format!("{name} contains a path traversal segment")));
    }

    if name.starts_with(SFS_PARTITION_TRANSIENT) {
        return join_transient(name, user_id, roots);
    }

    let path = if name.starts_with(SFS_PARTITION_PERSISTENT) {
        push_str(&roots.persistent, name)
    } else {
        push_str(&roots.persistent, &format!("{SFS_PARTITION_PERSISTENT}{name}"))
    };
    Ok(PathBuf::from(path))
}

fn join_transient(name: &str, user_id: u32, roots: &StorageRoots) -> Result<PathBuf> {
    if user_id != 0 {
        let rest = name.strip_prefix(SFS_PARTITION_TRANSIENT).ok_or_else(|| {
            AgentError::PathRejected(format!("{name} is shorter than its own transient prefix"))
        })?;
        if rest.is_empty() {
            return Err(AgentError::PathRejected(format!("{name} has no path remaining after its prefix")));
        }
        let suffix = format!("{SFS_PARTITION_USER_SYMLINK}{user_id}/{rest}");
        Ok(PathBuf::from(push_str(&roots.transient, &suffix)))
    } else {
        Ok(PathBuf::from(push_str(&roots.transient, name)))
    }
}

/// Whether `name` falls under a "personalization"/"private" transient
/// subspace that this agent treats no differently at resolution time but
/// which callers may want to distinguish for quota or eviction policy.
pub fn is_transient_perso_or_private(name: &str) -> bool {
    name.starts_with(SFS_PARTITION_TRANSIENT_PERSO) || name.starts_with(SFS_PARTITION_TRANSIENT_PRIVATE)
}

/// Create every missing directory component of `path`'s parent, mirroring
/// `CreateDir`'s incremental `mkdir` walk (ownership/mode fixups on real
/// hardware are left to the surrounding OS image's permissions, not this
/// agent).
pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roots() -> StorageRoots {
        StorageRoots::default()
    }

    #[test]
    fn rejects_a_traversal_attempt() {
        let err = resolve_path("sec_storage_data/../../etc/passwd", 0, &roots()).unwrap_err();
        assert!(matches!(err, AgentError::PathRejected(_)));
    }

    #[test]
    fn routes_transient_names_for_the_root_user_under_the_transient_root() {
        // USER_DATA_DIR already ends in `sec_storage_data/`, so a root-user
        // transient name (which also carries that prefix) lands nested one
        // level deeper, matching `SEC_STORAGE_DATA_DIR` in the original.
        let path = resolve_path("sec_storage_data/app1/file.txt", 0, &roots()).unwrap();
        assert_eq!(path, PathBuf::from("/var/itrustee/sec_storage_data/sec_storage_data/app1/file.txt"));
    }

    #[test]
    fn routes_transient_names_for_a_non_root_user_through_the_symlink_dir() {
        let path = resolve_path("sec_storage_data/app1/file.txt", 7, &roots()).unwrap();
        assert_eq!(
            path,
            PathBuf::from("/var/itrustee/sec_storage_data/sec_storage_data_users/7/app1/file.txt")
        );
    }

    #[test]
    fn routes_persistent_names_directly_under_root() {
        let path = resolve_path("var/itrustee/sec_storage_data/app1/file.txt", 0, &roots()).unwrap();
        assert_eq!(path, PathBuf::from("/var/itrustee/sec_storage_data/app1/file.txt"));
    }

    #[test]
    fn routes_unrecognized_names_to_the_default_persistent_dir() {
        let path = resolve_path("app1/file.txt", 0, &roots()).unwrap();
        assert_eq!(path, PathBuf::from("/var/itrustee/sec_storage_data/app1/file.txt"));
    }

    #[test]
    fn honors_custom_roots_for_sandboxed_deployments() {
        let custom = StorageRoots { transient: PathBuf::from("/tmp/t"), persistent: PathBuf::from("/tmp/p") };
        let path = resolve_path("app1/file.txt", 0, &custom).unwrap();
        assert_eq!(path, PathBuf::from("/tmp/p/var/itrustee/sec_storage_data/app1/file.txt"));
    }
}
