use super::CapabilityMask;
use crate::config::types::{JailError, Result};
use std::fs;

/// Value of a hexadecimal mask line (`CapBnd:\t000001ffffffffff`) in a
/// status file, if present
pub fn parse_status_mask(status: &str, key: &str) -> Option<CapabilityMask> {
    status
        .lines()
        .find_map(|line| line.strip_prefix(key)?.strip_prefix(':'))
        .and_then(|v| u64::from_str_radix(v.trim(), 16).ok())
        .map(CapabilityMask)
}

/// Bounding set of the calling process
pub fn bounding_set() -> Result<CapabilityMask> {
    let status = fs::read_to_string("/proc/self/status")?;
    parse_status_mask(&status, "CapBnd")
        .ok_or_else(|| JailError::Process("no CapBnd line in /proc/self/status".to_string()))
}
