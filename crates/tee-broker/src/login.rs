//! Assembly of the length-prefixed login identity descriptor installed
//! into the driver via `SET_LOGIN_IDENTITY` (spec §4.F step 4).
//!
//! Grounded on `original_source/src/authentication/tee_get_native_cert.c`
//! (`TeeGetNativeCert`/`SetPathToBuf`/`SetUserNameToBuf`): a 4-byte
//! length-prefixed executable path, followed by a 4-byte length-prefixed
//! user name.

/// Build the `(len-prefixed path, len-prefixed user name)` descriptor the
/// driver expects, returning `None` if either field would overflow `u32`.
pub fn build_identity_descriptor(exe_path: &str, user_name: &str) -> Option<Vec<u8>> {
    let mut buf = Vec::with_capacity(8 + exe_path.len() + user_name.len());
    append_length_prefixed(&mut buf, exe_path.as_bytes())?;
    append_length_prefixed(&mut buf, user_name.as_bytes())?;
    Some(buf)
}

fn append_length_prefixed(buf: &mut Vec<u8>, field: &[u8]) -> Option<()> {
    let len: u32 = field.len().try_into().ok()?;
    buf.extend_from_slice(&len.to_ne_bytes());
    buf.extend_from_slice(field);
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_carries_both_length_prefixed_fields() {
        let buf = build_identity_descriptor("/usr/bin/foo", "alice").unwrap();
        let path_len = u32::from_ne_bytes(buf[0..4].try_into().unwrap()) as usize;
        assert_eq!(&buf[4..4 + path_len], b"/usr/bin/foo");
        let name_off = 4 + path_len;
        let name_len = u32::from_ne_bytes(buf[name_off..name_off + 4].try_into().unwrap()) as usize;
        assert_eq!(&buf[name_off + 4..name_off + 4 + name_len], b"alice");
    }
}
