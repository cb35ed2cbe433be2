//! Pre-built seccomp filter loading.
//!
//! Filters are staged by the sandbox as raw arrays of classic-BPF
//! `sock_filter` records. A joiner loads them verbatim; nothing is compiled
//! here.

use crate::config::types::{JailError, Result};
use crate::kernel::capabilities::set_no_new_privs;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// Size of one `sock_filter` record: u16 code, u8 jt, u8 jf, u32 k
pub const RECORD_SIZE: usize = 8;

/// Largest program the kernel accepts (BPF_MAXINSNS)
const MAX_INSNS: usize = 4096;

/// A filter program read from disk
#[derive(Clone)]
pub struct FilterProgram {
    insns: Vec<libc::sock_filter>,
}

impl std::fmt::Debug for FilterProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterProgram")
            .field("len", &self.insns.len())
            .finish()
    }
}

impl FilterProgram {
    /// Decode native-endian records
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() || bytes.len() % RECORD_SIZE != 0 {
            return Err(JailError::Filter(format!(
                "filter size {} is not a positive multiple of {}",
                bytes.len(),
                RECORD_SIZE
            )));
        }
        let insns: Vec<libc::sock_filter> = bytes
            .chunks_exact(RECORD_SIZE)
            .map(|r| libc::sock_filter {
                code: u16::from_ne_bytes([r[0], r[1]]),
                jt: r[2],
                jf: r[3],
                k: u32::from_ne_bytes([r[4], r[5], r[6], r[7]]),
            })
            .collect();
        if insns.len() > MAX_INSNS {
            return Err(JailError::Filter(format!(
                "filter has {} instructions, limit is {}",
                insns.len(),
                MAX_INSNS
            )));
        }
        Ok(Self { insns })
    }

    /// Read a staged filter. `Ok(None)` when the file does not exist.
    pub fn read(path: &Path) -> Result<Option<Self>> {
        match fs::read(path) {
            Ok(bytes) => Self::from_bytes(&bytes)
                .map(Some)
                .map_err(|e| JailError::Filter(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(JailError::Filter(format!(
                "cannot read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    pub fn len(&self) -> usize {
        self.insns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insns.is_empty()
    }

    /// Install the program on the calling thread. Sets no_new_privs first.
    pub fn install(&self) -> Result<()> {
        set_no_new_privs()?;

        let prog = libc::sock_fprog {
            len: self.insns.len() as libc::c_ushort,
            filter: self.insns.as_ptr() as *mut libc::sock_filter,
        };
        // SAFETY: prog points into self.insns, which outlives the call; the
        // kernel copies the program before returning.
        let ret = unsafe {
            libc::prctl(
                libc::PR_SET_SECCOMP,
                libc::SECCOMP_MODE_FILTER,
                &prog as *const libc::sock_fprog,
            )
        };
        if ret != 0 {
            return Err(JailError::Filter(format!(
                "cannot load seccomp filter: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(())
    }
}

/// Load the filter staged at `path`. Returns false when the file is absent.
pub fn load_filter(path: &Path) -> Result<bool> {
    match FilterProgram::read(path)? {
        Some(program) => {
            program.install()?;
            log::debug!(
                "Loaded seccomp filter {} ({} instructions)",
                path.display(),
                program.len()
            );
            Ok(true)
        }
        None => {
            log::debug!("No seccomp filter at {}", path.display());
            Ok(false)
        }
    }
}

/// Load a filter the target is known to run under; a missing file means
/// the staged copy was lost and the join must not go ahead without it.
pub fn load_required_filter(path: &Path) -> Result<()> {
    if load_filter(path)? {
        return Ok(());
    }
    Err(JailError::Filter(format!(
        "seccomp filter {} is missing",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(code: u16, jt: u8, jf: u8, k: u32) -> Vec<u8> {
        let mut out = code.to_ne_bytes().to_vec();
        out.push(jt);
        out.push(jf);
        out.extend_from_slice(&k.to_ne_bytes());
        out
    }

    #[test]
    fn decodes_native_records() {
        // BPF_RET | BPF_K, SECCOMP_RET_ALLOW
        let mut bytes = record(0x06, 0, 0, 0x7fff_0000);
        bytes.extend(record(0x20, 1, 2, 4));
        let program = FilterProgram::from_bytes(&bytes).unwrap();
        assert_eq!(program.len(), 2);
        assert_eq!(program.insns[0].k, 0x7fff_0000);
        assert_eq!(program.insns[1].jt, 1);
        assert_eq!(program.insns[1].jf, 2);
    }

    #[test]
    fn truncated_file_is_a_filter_error() {
        let bytes = record(0x06, 0, 0, 0);
        let err = FilterProgram::from_bytes(&bytes[..7]).unwrap_err();
        assert!(matches!(err, JailError::Filter(_)));
        assert!(FilterProgram::from_bytes(&[]).is_err());
    }

    #[test]
    fn missing_filter_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!load_filter(&dir.path().join("seccomp")).unwrap());
    }

    #[test]
    fn truncated_staged_file_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seccomp.protocol");
        fs::write(&path, [0u8; 12]).unwrap();
        let err = FilterProgram::read(&path).unwrap_err();
        assert!(err.to_string().contains("seccomp.protocol"));
    }
}
