use std::fmt::Write as _;

use log::{info, warn};
use sha2::{Digest, Sha256};

use crate::error::FirmwareError;

/// Persistent copy of the running firmware image.
pub trait FirmwareStore {
    fn load(&mut self) -> Result<Option<Vec<u8>>, FirmwareError>;
    fn store(&mut self, image: &[u8]) -> Result<(), FirmwareError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateDecision {
    /// Fetched body was empty; the stored copy is kept.
    Empty,
    Unchanged,
    Replace { digest: String, size: usize },
}

impl UpdateDecision {
    pub fn requires_restart(&self) -> bool {
        matches!(self, Self::Replace { .. })
    }
}

/// Incremental SHA-256 over an image that is streamed rather than buffered.
#[derive(Clone, Default)]
pub struct FirmwareDigest {
    hasher: Sha256,
    len: usize,
}

impl FirmwareDigest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.len = self.len.saturating_add(chunk.len());
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn finish(self) -> String {
        let mut hex = String::with_capacity(64);
        for byte in self.hasher.finalize() {
            let _ = write!(&mut hex, "{byte:02x}");
        }
        hex
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut digest = FirmwareDigest::new();
    digest.update(bytes);
    digest.finish()
}

/// Byte-for-byte comparison; no signature or version check.
pub fn decide_update(fetched: &[u8], stored: Option<&[u8]>) -> UpdateDecision {
    if fetched.is_empty() {
        return UpdateDecision::Empty;
    }
    if stored == Some(fetched) {
        return UpdateDecision::Unchanged;
    }
    UpdateDecision::Replace {
        digest: sha256_hex(fetched),
        size: fetched.len(),
    }
}

/// Same decision for a streamed image, where only the digest of the stored
/// copy is kept.
pub fn decide_streamed(fetched: FirmwareDigest, stored_digest: Option<&str>) -> UpdateDecision {
    if fetched.is_empty() {
        return UpdateDecision::Empty;
    }
    let size = fetched.len();
    let digest = fetched.finish();
    if stored_digest.is_some_and(|stored| stored.eq_ignore_ascii_case(&digest)) {
        return UpdateDecision::Unchanged;
    }
    UpdateDecision::Replace { digest, size }
}

/// Fetches the published image and overwrites the store when it differs.
/// The caller restarts when the decision says so; there is no rollback.
pub fn check_for_update<F, S>(fetch: F, store: &mut S) -> Result<UpdateDecision, FirmwareError>
where
    F: FnOnce() -> Result<Vec<u8>, FirmwareError>,
    S: FirmwareStore + ?Sized,
{
    let fetched = fetch()?;
    let stored = store.load()?;
    let decision = decide_update(&fetched, stored.as_deref());

    match &decision {
        UpdateDecision::Empty => warn!("firmware fetch returned an empty body; keeping current image"),
        UpdateDecision::Unchanged => info!("firmware is up to date"),
        UpdateDecision::Replace { digest, size } => {
            store.store(&fetched)?;
            info!("firmware replaced ({size} bytes, sha256 {digest})");
        }
    }
    Ok(decision)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Default)]
    struct MemoryStore {
        image: Option<Vec<u8>>,
        writes: usize,
    }

    impl FirmwareStore for MemoryStore {
        fn load(&mut self) -> Result<Option<Vec<u8>>, FirmwareError> {
            Ok(self.image.clone())
        }

        fn store(&mut self, image: &[u8]) -> Result<(), FirmwareError> {
            self.image = Some(image.to_vec());
            self.writes += 1;
            Ok(())
        }
    }

    #[test]
    fn first_fetch_writes_image() {
        let mut store = MemoryStore::default();
        let decision = check_for_update(|| Ok(b"v1".to_vec()), &mut store).unwrap();

        assert!(decision.requires_restart());
        assert_eq!(store.image.as_deref(), Some(&b"v1"[..]));
    }

    #[test]
    fn identical_image_is_left_alone() {
        let mut store = MemoryStore {
            image: Some(b"v1".to_vec()),
            writes: 0,
        };
        let decision = check_for_update(|| Ok(b"v1".to_vec()), &mut store).unwrap();

        assert_eq!(decision, UpdateDecision::Unchanged);
        assert_eq!(store.writes, 0);
    }

    #[test]
    fn empty_body_never_overwrites() {
        let mut store = MemoryStore {
            image: Some(b"v1".to_vec()),
            writes: 0,
        };
        let decision = check_for_update(|| Ok(Vec::new()), &mut store).unwrap();

        assert_eq!(decision, UpdateDecision::Empty);
        assert!(!decision.requires_restart());
        assert_eq!(store.image.as_deref(), Some(&b"v1"[..]));
    }

    #[test]
    fn fetch_failure_propagates_without_touching_store() {
        let mut store = MemoryStore::default();
        let result = check_for_update(|| Err(FirmwareError::Fetch("dns".to_string())), &mut store);

        assert!(matches!(result, Err(FirmwareError::Fetch(_))));
        assert_eq!(store.writes, 0);
    }

    #[test]
    fn streamed_image_matches_stored_digest() {
        let mut digest = FirmwareDigest::new();
        digest.update(b"firm");
        digest.update(b"ware");
        let stored = sha256_hex(b"firmware").to_ascii_uppercase();

        assert_eq!(decide_streamed(digest, Some(&stored)), UpdateDecision::Unchanged);
    }

    #[test]
    fn streamed_image_differs_or_is_empty() {
        let mut digest = FirmwareDigest::new();
        digest.update(b"v2");
        assert_eq!(
            decide_streamed(digest, Some(&sha256_hex(b"v1"))),
            UpdateDecision::Replace {
                digest: sha256_hex(b"v2"),
                size: 2,
            }
        );

        assert_eq!(
            decide_streamed(FirmwareDigest::new(), None),
            UpdateDecision::Empty
        );
    }

    #[test]
    fn digest_is_lowercase_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
