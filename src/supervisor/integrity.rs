// Binary Integrity
//
// Checks a miner binary before every spawn: it must exist, be executable
// and, when pinned, match its recorded SHA-256.

use crate::error::{MinerError, Result};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

pub trait BinaryVerifier: Send + Sync {
    fn verify(&self, binary: &Path) -> Result<()>;
}

/// Existence and permission check only
#[derive(Debug, Default, Clone)]
pub struct PresenceVerifier;

impl BinaryVerifier for PresenceVerifier {
    fn verify(&self, binary: &Path) -> Result<()> {
        let metadata = match std::fs::metadata(binary) {
            Ok(m) if m.is_file() => m,
            _ => return Err(MinerError::BinaryMissing(binary.to_path_buf())),
        };

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if metadata.permissions().mode() & 0o111 == 0 {
                return Err(MinerError::BinaryNotExecutable(binary.to_path_buf()));
            }
        }
        #[cfg(not(unix))]
        let _ = metadata;

        Ok(())
    }
}

/// Pinned SHA-256 registry keyed by file name
#[derive(Debug, Default, Clone)]
pub struct ChecksumVerifier {
    pins: HashMap<String, String>,
}

impl ChecksumVerifier {
    pub fn new(pins: HashMap<String, String>) -> Self {
        let pins = pins
            .into_iter()
            .map(|(name, hash)| (name, hash.trim().to_lowercase()))
            .collect();
        Self { pins }
    }

    /// Load `{"xmrig": "<sha256 hex>", ...}`
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let pins: HashMap<String, String> = serde_json::from_str(&content)?;
        debug!(count = pins.len(), "loaded pinned checksums");
        Ok(Self::new(pins))
    }
}

impl BinaryVerifier for ChecksumVerifier {
    fn verify(&self, binary: &Path) -> Result<()> {
        PresenceVerifier.verify(binary)?;

        let name = binary
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let Some(expected) = self.pins.get(&name) else {
            warn!(binary = %binary.display(), "no pinned checksum, skipping hash check");
            return Ok(());
        };

        let actual = sha256_file(binary)?;
        if &actual != expected {
            warn!(binary = %binary.display(), %expected, %actual, "checksum mismatch");
            return Err(MinerError::BinaryChecksumMismatch(binary.to_path_buf()));
        }
        Ok(())
    }
}

/// Hex SHA-256 of a file, streamed
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    fn write_binary(dir: &TempDir, name: &str, content: &str, mode: u32) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).unwrap();
        path
    }

    #[test]
    fn test_missing_binary() {
        let dir = TempDir::new().unwrap();
        let err = PresenceVerifier.verify(&dir.path().join("xmrig")).unwrap_err();
        assert!(matches!(err, MinerError::BinaryMissing(_)));

        // a directory is not a binary
        let err = PresenceVerifier.verify(dir.path()).unwrap_err();
        assert!(matches!(err, MinerError::BinaryMissing(_)));
    }

    #[test]
    fn test_not_executable() {
        let dir = TempDir::new().unwrap();
        let path = write_binary(&dir, "xmrig", "hello", 0o644);
        let err = PresenceVerifier.verify(&path).unwrap_err();
        assert!(matches!(err, MinerError::BinaryNotExecutable(_)));
    }

    #[test]
    fn test_sha256_file() {
        let dir = TempDir::new().unwrap();
        let path = write_binary(&dir, "xmrig", "hello", 0o755);
        assert_eq!(sha256_file(&path).unwrap(), HELLO_SHA256);
    }

    #[test]
    fn test_pinned_checksum() {
        let dir = TempDir::new().unwrap();
        let good = write_binary(&dir, "xmrig", "hello", 0o755);
        let bad = write_binary(&dir, "cpuminer-opt", "tampered", 0o755);
        let unpinned = write_binary(&dir, "other", "whatever", 0o755);

        let mut pins = HashMap::new();
        pins.insert("xmrig".to_string(), HELLO_SHA256.to_uppercase());
        pins.insert("cpuminer-opt".to_string(), HELLO_SHA256.to_string());
        let verifier = ChecksumVerifier::new(pins);

        assert!(verifier.verify(&good).is_ok());
        assert!(matches!(
            verifier.verify(&bad),
            Err(MinerError::BinaryChecksumMismatch(_))
        ));
        assert!(verifier.verify(&unpinned).is_ok());
    }

    #[test]
    fn test_checksum_registry_from_file() {
        let dir = TempDir::new().unwrap();
        let registry = dir.path().join("checksums.json");
        std::fs::write(&registry, format!(r#"{{"xmrig": "{}"}}"#, HELLO_SHA256)).unwrap();
        let verifier = ChecksumVerifier::from_file(&registry).unwrap();
        let path = write_binary(&dir, "xmrig", "hello", 0o755);
        assert!(verifier.verify(&path).is_ok());
    }
}
