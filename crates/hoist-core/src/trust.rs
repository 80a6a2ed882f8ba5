//! Client-side trust-on-first-use pinning of server keys.
//!
//! The first successful contact with an address records the server's key
//! fingerprint. Every later contact must present the same fingerprint; a
//! mismatch aborts the connection before any credentials or data are sent.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::TrustError;

/// Outcome of checking a presented key against the pin store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustDecision {
    /// No pin existed for the address; the fingerprint has been recorded.
    FirstUse,
    /// The presented fingerprint matches the recorded pin.
    Known,
}

/// On-disk format: a single JSON object mapping addresses to fingerprints.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PinFile {
    pins: HashMap<String, String>,
}

/// Persistent map of `host:port` to public-key fingerprint.
#[derive(Debug)]
pub struct TrustStore {
    path: PathBuf,
    pins: HashMap<String, String>,
}

impl TrustStore {
    /// Load the pin file at `path`, starting empty when the file does not
    /// exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, TrustError> {
        let path = path.into();
        let pins = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let file: PinFile = serde_json::from_str(&raw)?;
            file.pins
        } else {
            HashMap::new()
        };
        Ok(Self { path, pins })
    }

    /// Check `fingerprint` for `addr`, pinning it on first use.
    ///
    /// A recorded pin is never overwritten here; a mismatch is an error that
    /// carries both fingerprints so the caller can show them.
    pub fn evaluate(&mut self, addr: &str, fingerprint: &str) -> Result<TrustDecision, TrustError> {
        match self.pins.get(addr) {
            Some(pinned) if pinned == fingerprint => Ok(TrustDecision::Known),
            Some(pinned) => Err(TrustError::Mismatch {
                addr: addr.to_string(),
                pinned: pinned.clone(),
                presented: fingerprint.to_string(),
            }),
            None => {
                self.pins
                    .insert(addr.to_string(), fingerprint.to_string());
                self.persist()?;
                Ok(TrustDecision::FirstUse)
            }
        }
    }

    /// The pinned fingerprint for `addr`, if any.
    pub fn pinned(&self, addr: &str) -> Option<&str> {
        self.pins.get(addr).map(String::as_str)
    }

    /// Drop the pin for `addr`. This is an explicit operator action; nothing
    /// in the protocol path calls it.
    pub fn forget(&mut self, addr: &str) -> Result<bool, TrustError> {
        let removed = self.pins.remove(addr).is_some();
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<(), TrustError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = PinFile {
            pins: self.pins.clone(),
        };
        let raw = serde_json::to_string_pretty(&file)?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &Path) -> TrustStore {
        TrustStore::open(dir.join("known_servers.json")).unwrap()
    }

    #[test]
    fn test_first_use_pins() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());

        let decision = store.evaluate("example.org:1819", "aabbcc").unwrap();
        assert_eq!(decision, TrustDecision::FirstUse);
        assert_eq!(store.pinned("example.org:1819"), Some("aabbcc"));
    }

    #[test]
    fn test_known_fingerprint_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());

        store.evaluate("example.org:1819", "aabbcc").unwrap();
        let decision = store.evaluate("example.org:1819", "aabbcc").unwrap();
        assert_eq!(decision, TrustDecision::Known);
    }

    #[test]
    fn test_mismatch_keeps_pin() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());

        store.evaluate("example.org:1819", "aabbcc").unwrap();
        let err = store.evaluate("example.org:1819", "ddeeff").unwrap_err();
        match err {
            TrustError::Mismatch {
                pinned, presented, ..
            } => {
                assert_eq!(pinned, "aabbcc");
                assert_eq!(presented, "ddeeff");
            }
            other => panic!("unexpected error: {other}"),
        }

        // The bad fingerprint must not replace the pin.
        assert_eq!(store.pinned("example.org:1819"), Some("aabbcc"));
    }

    #[test]
    fn test_pins_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_servers.json");

        {
            let mut store = TrustStore::open(&path).unwrap();
            store.evaluate("a:1", "fp-a").unwrap();
            store.evaluate("b:2", "fp-b").unwrap();
        }

        let mut store = TrustStore::open(&path).unwrap();
        assert_eq!(store.pinned("a:1"), Some("fp-a"));
        assert_eq!(store.evaluate("b:2", "fp-b").unwrap(), TrustDecision::Known);
    }

    #[test]
    fn test_forget_removes_pin() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());

        store.evaluate("gone:1", "fp").unwrap();
        assert!(store.forget("gone:1").unwrap());
        assert!(!store.forget("gone:1").unwrap());
        assert_eq!(store.evaluate("gone:1", "fp2").unwrap(), TrustDecision::FirstUse);
    }

    #[test]
    fn test_addresses_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(dir.path());

        store.evaluate("one:1819", "fp-one").unwrap();
        // Same fingerprint on a different address is still a first use.
        assert_eq!(
            store.evaluate("two:1819", "fp-one").unwrap(),
            TrustDecision::FirstUse
        );
    }
}
