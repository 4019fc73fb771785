//! Linux probe reading `/proc/[pid]/` accounting files.

use std::collections::{HashMap, HashSet};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};

use nix::sys::signal;
use nix::unistd::{Pid, SysconfVar, sysconf};

use super::{ProbeError, ProbeSample, SystemProbe};

/// Probe backed by the proc filesystem.
pub struct ProcfsProbe {
    proc_path: PathBuf,
    clk_tck: u64,
    page_size: u64,
}

impl ProcfsProbe {
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    /// Uses an alternative proc root (for tests).
    pub fn with_root(proc_path: impl Into<PathBuf>) -> Self {
        Self {
            proc_path: proc_path.into(),
            clk_tck: sysconf(SysconfVar::CLK_TCK)
                .ok()
                .flatten()
                .map(|v| v as u64)
                .unwrap_or(100),
            page_size: sysconf(SysconfVar::PAGE_SIZE)
                .ok()
                .flatten()
                .map(|v| v as u64)
                .unwrap_or(4096),
        }
    }
}

impl Default for ProcfsProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemProbe for ProcfsProbe {
    fn alive(&self, pid: u32) -> bool {
        // Signal 0 checks existence without delivering anything.
        signal::kill(Pid::from_raw(pid as i32), None).is_ok()
    }

    fn sample(&self, pid: u32) -> Result<ProbeSample, ProbeError> {
        let proc_dir = self.proc_path.join(pid.to_string());

        let stat_content = std::fs::read_to_string(proc_dir.join("stat"))
            .map_err(|_| ProbeError::ProcessGone(pid))?;
        let cpu_ticks = parse_stat_ticks(&stat_content).map_err(ProbeError::Parse)?;

        let statm_content = std::fs::read_to_string(proc_dir.join("statm"))
            .map_err(|_| ProbeError::ProcessGone(pid))?;
        let rss_pages = parse_statm_rss(&statm_content).map_err(ProbeError::Parse)?;

        Ok(ProbeSample {
            rss_bytes: rss_pages * self.page_size,
            cpu_ticks,
        })
    }

    fn clock_ticks(&self) -> u64 {
        self.clk_tck
    }

    fn listening_sockets(&self, pid: u32) -> Vec<String> {
        let inodes = match socket_inodes(&self.proc_path, pid) {
            Ok(set) if !set.is_empty() => set,
            _ => return Vec::new(),
        };

        // Socket tables live under the pid's own net namespace view.
        let net_dir = self.proc_path.join(pid.to_string()).join("net");
        let mut listeners = Vec::new();

        if let Ok(content) = std::fs::read_to_string(net_dir.join("tcp")) {
            listeners.extend(listening_in_table(&content, &inodes, "tcp", false));
        }
        if let Ok(content) = std::fs::read_to_string(net_dir.join("tcp6")) {
            listeners.extend(listening_in_table(&content, &inodes, "tcp6", true));
        }

        listeners.sort();
        listeners.dedup();
        listeners
    }
}

/// Parses `/proc/[pid]/stat` and returns utime + stime ticks.
///
/// The comm field (2nd) may contain spaces and parentheses; fields are
/// counted from the last `)`.
fn parse_stat_ticks(content: &str) -> Result<u64, String> {
    let close = content
        .rfind(')')
        .ok_or_else(|| "no comm delimiter in stat".to_string())?;
    let rest = content[close + 1..].trim_start();
    let fields: Vec<&str> = rest.split_whitespace().collect();

    // After comm: field 0 is state; utime/stime are stat fields 14/15,
    // which land at offsets 11/12 here.
    let utime: u64 = fields
        .get(11)
        .ok_or_else(|| "stat too short for utime".to_string())?
        .parse()
        .map_err(|e| format!("bad utime: {}", e))?;
    let stime: u64 = fields
        .get(12)
        .ok_or_else(|| "stat too short for stime".to_string())?
        .parse()
        .map_err(|e| format!("bad stime: {}", e))?;

    Ok(utime + stime)
}

/// Parses `/proc/[pid]/statm` and returns the resident set in pages.
fn parse_statm_rss(content: &str) -> Result<u64, String> {
    content
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| "statm too short".to_string())?
        .parse()
        .map_err(|e| format!("bad rss: {}", e))
}

/// Collects socket inodes owned by the pid from `/proc/[pid]/fd/*` links.
fn socket_inodes(proc_path: &Path, pid: u32) -> std::io::Result<HashSet<u64>> {
    let fd_dir = proc_path.join(pid.to_string()).join("fd");
    let mut inodes = HashSet::new();

    for entry in std::fs::read_dir(fd_dir)? {
        let entry = entry?;
        if let Ok(target) = std::fs::read_link(entry.path())
            && let Some(inode) = parse_socket_link(&target.to_string_lossy())
        {
            inodes.insert(inode);
        }
    }
    Ok(inodes)
}

/// Extracts the inode from a `socket:[12345]` fd link target.
fn parse_socket_link(target: &str) -> Option<u64> {
    target
        .strip_prefix("socket:[")?
        .strip_suffix(']')?
        .parse()
        .ok()
}

/// Scans one `/proc/net/tcp{,6}` table for LISTEN sockets whose inode is in
/// `owned`, formatting them as `proto:addr:port`.
fn listening_in_table(
    content: &str,
    owned: &HashSet<u64>,
    proto: &str,
    v6: bool,
) -> Vec<String> {
    const TCP_LISTEN: &str = "0A";

    let mut out = Vec::new();
    for line in content.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        // sl local_address rem_address st ... inode is field 9
        if fields.len() < 10 || fields[3] != TCP_LISTEN {
            continue;
        }
        let Ok(inode) = fields[9].parse::<u64>() else {
            continue;
        };
        if !owned.contains(&inode) {
            continue;
        }
        if let Some(addr) = parse_hex_addr(fields[1], v6) {
            out.push(format!("{}:{}", proto, addr));
        }
    }
    out
}

/// Decodes a kernel hex socket address (`0100007F:1F90`) into `ip:port`.
fn parse_hex_addr(s: &str, v6: bool) -> Option<String> {
    let (addr_hex, port_hex) = s.split_once(':')?;
    let port = u16::from_str_radix(port_hex, 16).ok()?;

    if v6 {
        if addr_hex.len() != 32 {
            return None;
        }
        // Four little-endian 32-bit groups.
        let mut bytes = [0u8; 16];
        for (group, chunk) in bytes.chunks_exact_mut(4).enumerate() {
            let word = u32::from_str_radix(&addr_hex[group * 8..group * 8 + 8], 16).ok()?;
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        Some(format!("[{}]:{}", Ipv6Addr::from(bytes), port))
    } else {
        if addr_hex.len() != 8 {
            return None;
        }
        let word = u32::from_str_radix(addr_hex, 16).ok()?;
        let ip = Ipv4Addr::from(word.to_le_bytes());
        Some(format!("{}:{}", ip, port))
    }
}
