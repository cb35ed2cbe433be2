/// Mount table inspection from /proc/self/mountinfo
use crate::config::types::{JailError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Mount entry from /proc/self/mountinfo
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub mount_id: u32,
    pub parent_id: u32,
    pub mount_point: PathBuf,
    pub mount_options: String,
    pub filesystem_type: String,
}

/// Read and parse /proc/self/mountinfo
pub fn read_mountinfo() -> Result<Vec<MountEntry>> {
    let content = fs::read_to_string("/proc/self/mountinfo").map_err(|e| {
        JailError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to read /proc/self/mountinfo: {}", e),
        ))
    })?;
    Ok(parse_mountinfo(&content))
}

pub fn parse_mountinfo(content: &str) -> Vec<MountEntry> {
    content.lines().filter_map(parse_mountinfo_line).collect()
}

/// Parse a single line from /proc/self/mountinfo
/// Format: mount_id parent_id major:minor root mount_point options [optional...] - fs_type source super_options
fn parse_mountinfo_line(line: &str) -> Option<MountEntry> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 10 {
        return None;
    }

    let mount_id = parts[0].parse::<u32>().ok()?;
    let parent_id = parts[1].parse::<u32>().ok()?;
    let mount_point = PathBuf::from(unescape(parts[4]));
    let mount_options = parts[5].to_string();

    let sep_pos = parts.iter().position(|&p| p == "-")?;
    let filesystem_type = parts.get(sep_pos + 1)?.to_string();

    Some(MountEntry {
        mount_id,
        parent_id,
        mount_point,
        mount_options,
        filesystem_type,
    })
}

/// The kernel escapes space, tab, newline and backslash as `\ooo`
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let oct = &bytes[i + 1..i + 4];
            let parsed = std::str::from_utf8(oct)
                .ok()
                .and_then(|s| u8::from_str_radix(s, 8).ok());
            if let Some(v) = parsed {
                out.push(v);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Mount point containing `path`: the longest mount point that prefixes it
pub fn mount_point_of<'a>(entries: &'a [MountEntry], path: &Path) -> Option<&'a Path> {
    entries
        .iter()
        .map(|e| e.mount_point.as_path())
        .filter(|mp| path.starts_with(mp))
        .max_by_key(|mp| mp.components().count())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
22 1 8:1 / / rw,relatime shared:1 - ext4 /dev/sda1 rw
25 22 0:23 / /sys rw,nosuid,nodev,noexec,relatime shared:7 - sysfs sysfs rw
40 22 8:2 / /home rw,relatime shared:30 - ext4 /dev/sda2 rw
41 40 8:3 / /home/my\\040data rw - ext4 /dev/sda3 rw";

    #[test]
    fn parses_entries() {
        let entries = parse_mountinfo(SAMPLE);
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[1].mount_id, 25);
        assert_eq!(entries[1].parent_id, 22);
        assert_eq!(entries[1].mount_point, PathBuf::from("/sys"));
        assert_eq!(entries[1].filesystem_type, "sysfs");
    }

    #[test]
    fn unescapes_octal_sequences() {
        let entries = parse_mountinfo(SAMPLE);
        assert_eq!(entries[3].mount_point, PathBuf::from("/home/my data"));
    }

    #[test]
    fn finds_longest_mount_point() {
        let entries = parse_mountinfo(SAMPLE);
        assert_eq!(
            mount_point_of(&entries, Path::new("/home/user")),
            Some(Path::new("/home"))
        );
        assert_eq!(
            mount_point_of(&entries, Path::new("/usr/bin")),
            Some(Path::new("/"))
        );
    }

    #[test]
    fn skips_short_lines() {
        assert!(parse_mountinfo("garbage line").is_empty());
    }
}
