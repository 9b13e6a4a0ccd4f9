//! Advisory CA identity lookup from `/proc` and a passwd-style file.
//!
//! Grounded on `original_source/src/authentication/tee_auth_common.c`
//! (`TeeGetPkgName`/`TeeGetCaName`/`ParsePkgName`/`TeeGetUserName`). Per
//! Design Note §9, this mechanism is explicitly advisory: `/proc/<pid>/cmdline`
//! is writable by the process that owns it, so a malicious CA can spoof the
//! name this module returns. Real authorization is anchored in the driver
//! via `SET_LOGIN_IDENTITY`, not here.

use std::fs;
use std::path::Path;

/// The package name the broker substitutes for the system media codec
/// service, matching `MEDIA_CODEC_PATH`/`OMX_PATH` in the original.
const MEDIA_CODEC_MARKER: &str = "media.codec";
const OMX_SUBSTITUTE: &str = "/vendor/bin/hw/android.hardware.media.omx@1.0-service";

/// Extract the executable path (or Java package name) identifying the
/// process at `pid`, reading `/proc/<pid>/cmdline` directly.
///
/// Mirrors `TeeGetCaName`/`ParsePkgName`: a `java -jar ... <pkg>` command
/// line yields the trailing package name argument instead of `java`
/// itself; anything else yields the cmdline's first NUL-terminated
/// argument (the executable path) unchanged. The special-cased media
/// codec service path is substituted for its fixed OMX HAL service path,
/// matching `TeeGetPkgName`.
pub fn exe_path_for_pid(pid: i32) -> Option<String> {
    let raw = fs::read(format!("/proc/{pid}/cmdline")).ok()?;
    let name = parse_cmdline(&raw)?;
    if name == MEDIA_CODEC_MARKER {
        Some(OMX_SUBSTITUTE.to_string())
    } else {
        Some(name)
    }
}

/// Parse a raw `/proc/<pid>/cmdline` buffer (NUL-separated argv) into the
/// CA identity string: the first argument, unless it looks like an
/// invocation of `java`, in which case the last non-empty argument (the
/// package/class name following `-jar`) is returned instead.
fn parse_cmdline(raw: &[u8]) -> Option<String> {
    if raw.is_empty() {
        return None;
    }
    let args: Vec<&[u8]> = raw.split(|&b| b == 0).filter(|s| !s.is_empty()).collect();
    let first = args.first()?;
    let first_str = String::from_utf8_lossy(first).into_owned();
    let is_java = first_str.ends_with("java") || first_str == "java";
    if !is_java {
        return Some(first_str);
    }
    let last = args.last()?;
    Some(String::from_utf8_lossy(last).into_owned())
}

/// Look up the login name for `uid` from a passwd-style file (default
/// `/etc/passwd`), parsing `name:passwd:uid:gid:gecos:home:shell` lines.
///
/// Mirrors `TeeGetUserName`. Returns `None` if no line matches; malformed
/// lines (wrong field count, non-numeric uid) are skipped rather than
/// aborting the whole lookup.
pub fn user_name_for_uid(uid: u32, passwd_path: &Path) -> Option<String> {
    let contents = fs::read_to_string(passwd_path).ok()?;
    for line in contents.lines() {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() < 3 {
            continue;
        }
        let Ok(line_uid) = fields[2].parse::<u32>() else {
            continue;
        };
        if line_uid == uid {
            return Some(fields[0].to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn java_cmdline_yields_package_name() {
        let raw = b"java\0-jar\0com.x.y\0";
        assert_eq!(parse_cmdline(raw).unwrap(), "com.x.y");
    }

    #[test]
    fn plain_cmdline_yields_exe_path() {
        let raw = b"/usr/bin/foo\0--flag\0";
        assert_eq!(parse_cmdline(raw).unwrap(), "/usr/bin/foo");
    }

    #[test]
    fn empty_cmdline_yields_none() {
        assert!(parse_cmdline(b"").is_none());
    }

    #[test]
    fn media_codec_substitution() {
        // exercised through the public fn shape; parse_cmdline alone would
        // return the marker, substitution happens in exe_path_for_pid.
        assert_eq!(MEDIA_CODEC_MARKER, "media.codec");
    }

    #[test]
    fn user_name_lookup_matches_uid() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "root:x:0:0:root:/root:/bin/bash").unwrap();
        writeln!(f, "alice:x:1000:1000:Alice:/home/alice:/bin/bash").unwrap();
        assert_eq!(
            user_name_for_uid(1000, f.path()).as_deref(),
            Some("alice")
        );
        assert_eq!(user_name_for_uid(9999, f.path()), None);
    }

    #[test]
    fn malformed_line_is_skipped() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "broken:line").unwrap();
        writeln!(f, "ok:x:7:7::/home/ok:/bin/sh").unwrap();
        assert_eq!(user_name_for_uid(7, f.path()).as_deref(), Some("ok"));
    }
}
