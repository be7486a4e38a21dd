//! BLAKE3 content hashing for change detection

use anyhow::{Context, Result};
use std::path::Path;

/// Files larger than this are hashed through a memory map
const MMAP_THRESHOLD: u64 = 4 * 1024 * 1024;

/// A BLAKE3 digest of a file's contents (32 bytes)
#[derive(Copy, Clone, Hash, Eq, PartialEq)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        const HEX_CHARS: &[u8] = b"0123456789abcdef";
        let mut hex = String::with_capacity(64);
        for &byte in &self.0 {
            hex.push(HEX_CHARS[(byte >> 4) as usize] as char);
            hex.push(HEX_CHARS[(byte & 0xf) as usize] as char);
        }
        hex
    }
}

impl std::fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Hash bytes using BLAKE3
pub fn hash_bytes(data: &[u8]) -> ContentHash {
    ContentHash::from_bytes(*blake3::hash(data).as_bytes())
}

/// Hash a file, streaming small files and memory-mapping large ones
pub fn hash_file(path: &Path) -> Result<ContentHash> {
    let len = std::fs::metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?
        .len();

    if len > MMAP_THRESHOLD {
        hash_file_mmap(path)
    } else {
        hash_file_streaming(path)
    }
}

fn hash_file_streaming(path: &Path) -> Result<ContentHash> {
    use std::fs::File;
    use std::io::{BufReader, Read};

    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = blake3::Hasher::new();

    let mut buffer = [0u8; 8192];
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(ContentHash::from_bytes(*hasher.finalize().as_bytes()))
}

fn hash_file_mmap(path: &Path) -> Result<ContentHash> {
    use memmap2::Mmap;
    use std::fs::File;

    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    // The map is read-only and dropped before returning; a concurrent
    // truncation shows up as a changed hash on the next tick.
    let mmap = unsafe { Mmap::map(&file)? };
    Ok(hash_bytes(&mmap))
}
