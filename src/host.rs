//! Host environment probes recorded into the journal skeleton at init.
//!
//! Every probe degrades to an "unknown" value instead of failing: missing
//! proc files, absent tools, or unparseable output must never block the
//! test run being journaled.

use std::fs;
use std::process::Command;

use regex::Regex;

/// Fully qualified host name, from the kernel with an environment fallback.
pub fn hostname() -> String {
    fs::read_to_string("/proc/sys/kernel/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok().filter(|s| !s.is_empty()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Machine architecture the journal binary was built for.
pub fn arch() -> String {
    std::env::consts::ARCH.to_string()
}

/// CPU summary as `"<count> x <model>"`, from `/proc/cpuinfo`.
pub fn cpu_summary() -> String {
    let expr = Regex::new(r"^model name\s*:\s*(.+)$").expect("static regex is valid");
    let mut count = 0u32;
    let mut model = "unknown".to_string();
    if let Ok(content) = fs::read_to_string("/proc/cpuinfo") {
        for line in content.lines() {
            if let Some(caps) = expr.captures(line) {
                count += 1;
                model = caps[1].trim().to_string();
            }
        }
    }
    format!("{} x {}", count, model)
}

/// RAM summary as `"<megabytes> MB"`, from `/proc/meminfo`.
pub fn ram_summary() -> String {
    let expr = Regex::new(r"^MemTotal:\s+(\d+)\s+kB$").expect("static regex is valid");
    let size = fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|content| {
            content.lines().find_map(|line| {
                expr.captures(line)
                    .and_then(|caps| caps[1].parse::<u64>().ok())
            })
        })
        .map(|kb| (kb / 1024).to_string())
        .unwrap_or_else(|| "unknown".to_string());
    format!("{} MB", size)
}

/// Aggregate local disk capacity as `"<gigabytes> GB"`, summed over the
/// `df` report of local non-tmpfs filesystems. `"unknown"` when nothing
/// could be read.
pub fn disk_summary() -> String {
    let output = Command::new("df")
        .args(["-k", "-P", "--local", "--exclude-type=tmpfs"])
        .output();
    let Ok(output) = output else {
        return "unknown".to_string();
    };

    let expr = Regex::new(r"^(/\S+)\s+(\d+)\s+\d+\s+\d+\s+\d+%\s+\S+$")
        .expect("static regex is valid");
    let mut size_kb = 0u64;
    for line in String::from_utf8_lossy(&output.stdout).lines() {
        if let Some(caps) = expr.captures(line.trim_end()) {
            size_kb += caps[2].parse::<u64>().unwrap_or(0);
        }
    }
    if size_kb == 0 {
        "unknown".to_string()
    } else {
        format!("{:.1} GB", size_kb as f64 / 1024.0 / 1024.0)
    }
}

/// Distribution description string.
pub fn release() -> String {
    fs::read_to_string("/etc/redhat-release")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
