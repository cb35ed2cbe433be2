//! CPU affinity staged by a sandbox and reapplied by joiners.

use crate::config::types::{JailError, Result};
use nix::sched::{sched_setaffinity, CpuSet};
use nix::unistd::Pid;
use std::fs;
use std::path::Path;

/// Bit `n` set means cpu `n` is allowed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuMask(pub u64);

impl CpuMask {
    /// Hexadecimal mask, optional `0x` prefix
    pub fn parse(text: &str) -> Result<Self> {
        let t = text.trim();
        let digits = t.strip_prefix("0x").unwrap_or(t);
        match u64::from_str_radix(digits, 16) {
            Ok(0) | Err(_) => Err(JailError::Config(format!("invalid cpu mask {:?}", t))),
            Ok(v) => Ok(CpuMask(v)),
        }
    }

    pub fn load(staged: &Path) -> Result<Self> {
        Self::parse(&fs::read_to_string(staged)?)
    }

    pub fn cpus(self) -> impl Iterator<Item = usize> {
        (0..64).filter(move |n| self.0 & (1u64 << n) != 0)
    }

    /// Pin the calling process
    pub fn apply(self) -> Result<()> {
        let mut set = CpuSet::new();
        for cpu in self.cpus() {
            set.set(cpu)
                .map_err(|e| JailError::Process(format!("cpu {}: {}", cpu, e)))?;
        }
        sched_setaffinity(Pid::from_raw(0), &set)
            .map_err(|e| JailError::Process(format!("cannot set cpu affinity: {}", e)))?;
        log::debug!("CPU affinity set to {:#x}", self.0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_masks() {
        assert_eq!(CpuMask::parse("3\n").unwrap(), CpuMask(3));
        assert_eq!(CpuMask::parse("0x10").unwrap(), CpuMask(0x10));
        assert!(CpuMask::parse("0").is_err());
        assert!(CpuMask::parse("cpu0").is_err());
    }

    #[test]
    fn lists_selected_cpus() {
        let cpus: Vec<usize> = CpuMask(0b1010).cpus().collect();
        assert_eq!(cpus, vec![1, 3]);
    }
}
