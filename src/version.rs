//! Checksums, version ordering and host platform detection.

use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::Result;

const CHUNK_SIZE: usize = 8192;

/// Hex-encoded SHA-256 of a file, streamed in fixed-size chunks.
pub fn checksum(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// True iff `version` is one or more dot-separated runs of ASCII digits.
pub fn is_valid_version(version: &str) -> bool {
    !version.is_empty()
        && version
            .split('.')
            .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
}

/// Component-wise numeric comparison; missing trailing components count as 0,
/// so `1.2` and `1.2.0` are equal.
///
/// Components are compared as digit strings, so there is no upper bound on
/// their magnitude. Components that are not all digits compare as 0. Callers
/// validate with [`is_valid_version`] first.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let left = components(a);
    let right = components(b);
    let len = left.len().max(right.len());
    for i in 0..len {
        let l = left.get(i).copied().unwrap_or("0");
        let r = right.get(i).copied().unwrap_or("0");
        match l.len().cmp(&r.len()).then_with(|| l.cmp(r)) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Each component with leading zeros stripped, `"0"` for zero or non-numeric.
fn components(version: &str) -> Vec<&str> {
    version
        .split('.')
        .map(|part| {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return "0";
            }
            match part.trim_start_matches('0') {
                "" => "0",
                digits => digits,
            }
        })
        .collect()
}

/// Operating system and architecture of the running host, e.g. `("linux", "x86_64")`.
pub fn host_platform() -> (String, String) {
    (
        std::env::consts::OS.to_lowercase(),
        std::env::consts::ARCH.to_lowercase(),
    )
}
