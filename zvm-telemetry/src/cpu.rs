//! CPU list and CPU time parsing.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{ProbeError, Result};

/// Cumulative CPU times in nanoseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuStats {
    /// Time spent in the kernel (system + irq + softirq)
    pub kernel_ns: u64,
    /// Time spent in user space (user + nice)
    pub user_ns: u64,
    /// Idle time
    pub idle_ns: u64,
    /// Time waiting for I/O
    pub iowait_ns: u64,
}

/// Parse a kernel CPU list such as `0-3,8,10-11`.
pub fn parse_cpu_list(path: &Path, text: &str) -> Result<Vec<u32>> {
    let parse_err = |detail: String| ProbeError::Parse {
        path: path.to_path_buf(),
        detail,
    };

    let mut cpus = Vec::new();
    for part in text.trim().split(',').filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((lo, hi)) => {
                let lo: u32 = lo.trim().parse()
                    .map_err(|_| parse_err(format!("bad range start '{}'", lo)))?;
                let hi: u32 = hi.trim().parse()
                    .map_err(|_| parse_err(format!("bad range end '{}'", hi)))?;
                if hi < lo {
                    return Err(parse_err(format!("inverted range '{}'", part)));
                }
                cpus.extend(lo..=hi);
            }
            None => {
                let cpu: u32 = part.trim().parse()
                    .map_err(|_| parse_err(format!("bad cpu '{}'", part)))?;
                cpus.push(cpu);
            }
        }
    }
    cpus.sort_unstable();
    cpus.dedup();
    Ok(cpus)
}

/// Clock ticks per second used by `/proc/stat`.
fn clock_ticks() -> u64 {
    // SAFETY: sysconf has no preconditions.
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 { ticks as u64 } else { 100 }
}

/// Extract the times for `cpu` (or the aggregate line) from `/proc/stat`.
pub fn parse_proc_stat(path: &Path, text: &str, cpu: Option<u32>) -> Result<CpuStats> {
    parse_proc_stat_with_ticks(path, text, cpu, clock_ticks())
}

fn parse_proc_stat_with_ticks(
    path: &Path,
    text: &str,
    cpu: Option<u32>,
    ticks_per_sec: u64,
) -> Result<CpuStats> {
    let wanted = match cpu {
        Some(n) => format!("cpu{}", n),
        None => "cpu".to_string(),
    };

    let line = text.lines()
        .find(|l| l.split_whitespace().next() == Some(wanted.as_str()))
        .ok_or_else(|| match cpu {
            Some(n) => ProbeError::Unavailable(format!("cpu {} not present", n)),
            None => ProbeError::Parse {
                path: path.to_path_buf(),
                detail: "missing aggregate cpu line".to_string(),
            },
        })?;

    let fields: Vec<u64> = line.split_whitespace()
        .skip(1)
        .map(|f| f.parse::<u64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| ProbeError::Parse {
            path: path.to_path_buf(),
            detail: format!("{}: {}", wanted, e),
        })?;

    if fields.len() < 4 {
        return Err(ProbeError::Parse {
            path: path.to_path_buf(),
            detail: format!("{} has {} fields", wanted, fields.len()),
        });
    }

    let field = |i: usize| fields.get(i).copied().unwrap_or(0);
    let ns = |ticks: u64| ticks.saturating_mul(1_000_000_000 / ticks_per_sec);

    Ok(CpuStats {
        user_ns: ns(field(0) + field(1)),
        kernel_ns: ns(field(2) + field(5) + field(6)),
        idle_ns: ns(field(3)),
        iowait_ns: ns(field(4)),
    })
}

/// Build an online bitmap covering every present CPU.
pub fn cpu_map(present: &[u32], online: &[u32]) -> Vec<bool> {
    let len = present.iter().max().map(|m| *m as usize + 1).unwrap_or(0);
    let mut map = vec![false; len];
    for cpu in online {
        if let Some(slot) = map.get_mut(*cpu as usize) {
            *slot = true;
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAT: &str = "\
cpu  100 20 30 400 5 6 7 0 0 0
cpu0 50 10 15 200 2 3 4 0 0 0
cpu1 50 10 15 200 3 3 3 0 0 0
intr 12345
";

    #[test]
    fn test_parse_cpu_list() {
        let p = Path::new("online");
        assert_eq!(parse_cpu_list(p, "0-3,8,10-11\n").unwrap(), vec![0, 1, 2, 3, 8, 10, 11]);
        assert_eq!(parse_cpu_list(p, "5").unwrap(), vec![5]);
        assert!(parse_cpu_list(p, "").unwrap().is_empty());
        assert!(parse_cpu_list(p, "3-1").is_err());
        assert!(parse_cpu_list(p, "a-b").is_err());
    }

    #[test]
    fn test_parse_proc_stat_aggregate() {
        let stats = parse_proc_stat_with_ticks(Path::new("stat"), STAT, None, 100).unwrap();
        assert_eq!(stats.user_ns, 120 * 10_000_000);
        assert_eq!(stats.kernel_ns, 43 * 10_000_000);
        assert_eq!(stats.idle_ns, 400 * 10_000_000);
        assert_eq!(stats.iowait_ns, 5 * 10_000_000);
    }

    #[test]
    fn test_parse_proc_stat_single_cpu() {
        let stats = parse_proc_stat_with_ticks(Path::new("stat"), STAT, Some(1), 100).unwrap();
        assert_eq!(stats.idle_ns, 200 * 10_000_000);

        let missing = parse_proc_stat_with_ticks(Path::new("stat"), STAT, Some(7), 100);
        assert!(matches!(missing, Err(ProbeError::Unavailable(_))));
    }

    #[test]
    fn test_cpu_map() {
        assert_eq!(cpu_map(&[0, 1, 2, 3], &[0, 2, 3]), vec![true, false, true, true]);
        assert!(cpu_map(&[], &[]).is_empty());
    }
}
