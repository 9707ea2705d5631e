use log::warn;

use crate::region::Region;
use crate::ConnectorConfig;

/// Decodes the optional device-name window from a mapped control region.
///
/// Register content is untrusted input: the read never exceeds
/// `cfg.name_max_len` bytes regardless of termination, stops at the first
/// NUL, and keeps only the leading valid UTF-8. Hitting the length bound
/// without a terminator is non-fatal and logged (the name is truncated, the
/// device stays usable). Returns `None` when the window does not fit in the
/// region or decodes to nothing, leaving the caller's default in place.
pub(crate) fn decode_device_name(region0: &Region, cfg: &ConnectorConfig) -> Option<String> {
    if cfg.name_max_len == 0 {
        return None;
    }
    let end = cfg.name_offset.checked_add(cfg.name_max_len)?;
    if end > region0.len() {
        return None;
    }

    let mut raw = vec![0u8; cfg.name_max_len];
    // SAFETY: the window [name_offset, name_offset + name_max_len) was
    // bounds-checked against the live mapping above.
    unsafe {
        std::ptr::copy_nonoverlapping(
            region0.as_ptr().add(cfg.name_offset) as *const u8,
            raw.as_mut_ptr(),
            cfg.name_max_len,
        );
    }

    let terminated = raw.iter().position(|&b| b == 0);
    let bytes = match terminated {
        Some(nul) => &raw[..nul],
        None => {
            warn!(
                "Device name window unterminated after {} bytes; truncating",
                cfg.name_max_len
            );
            &raw[..]
        }
    };

    let name = match std::str::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => {
            warn!(
                "Device name window holds invalid UTF-8 at byte {}; truncating",
                e.valid_up_to()
            );
            // The prefix up to valid_up_to() is valid by construction.
            std::str::from_utf8(&bytes[..e.valid_up_to()]).unwrap_or("")
        }
    };

    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
