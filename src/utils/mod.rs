//! Small I/O helpers shared by the analyzers and the orchestrator.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use md5::Md5;
use sha2::{Digest, Sha256};

/// SHA-256 and MD5 of a file, streamed in 4 KiB chunks.
pub fn hash_file(path: &Path) -> std::io::Result<(String, String)> {
    let mut file = File::open(path)?;
    let mut sha256 = Sha256::new();
    let mut md5 = Md5::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        sha256.update(&buf[..n]);
        md5.update(&buf[..n]);
    }
    Ok((hex::encode(sha256.finalize()), hex::encode(md5.finalize())))
}

/// Host platform name in the vocabulary signatures use.
pub fn host_platform() -> &'static str {
    match std::env::consts::OS {
        "linux" => "linux",
        "macos" => "macos",
        "windows" => "windows",
        other => {
            // Unknown hosts still scan; only platform-universal signatures apply.
            tracing::debug!("unmapped host platform '{}'", other);
            "unknown"
        }
    }
}
