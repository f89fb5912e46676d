use std::sync::atomic::{AtomicUsize, Ordering};

/// A fixed ring of API credentials with a rotating cursor.
///
/// Jobs share one rotator. The cursor is a relaxed atomic: two jobs hitting a
/// rate limit at the same moment may both rotate, or one may read a credential
/// the other just rotated away from. Either way the worst case is one extra
/// attempt with an already-throttled key.
///
/// # Example
///
/// ```rust
/// use stock_tagger::credentials::CredentialRotator;
///
/// let keys = CredentialRotator::from_csv("K1, K2,,K3");
/// assert_eq!(keys.len(), 3);
/// assert_eq!(keys.current(), Some("K1"));
/// assert_eq!(keys.rotate(), Some("K2"));
/// ```
#[derive(Debug, Default)]
pub struct CredentialRotator {
    keys: Vec<String>,
    cursor: AtomicUsize,
}

impl CredentialRotator {
    /// Build a pool from individual credentials, dropping blank entries.
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keys = keys
            .into_iter()
            .map(|k| k.as_ref().trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        Self {
            keys,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Build a pool from a comma-separated credential string.
    pub fn from_csv(csv: &str) -> Self {
        Self::new(csv.split(','))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The active credential, or `None` for an empty pool.
    pub fn current(&self) -> Option<&str> {
        if self.keys.is_empty() {
            return None;
        }
        let idx = self.cursor.load(Ordering::Relaxed) % self.keys.len();
        Some(&self.keys[idx])
    }

    /// Advance to the next credential (wrapping) and return it.
    pub fn rotate(&self) -> Option<&str> {
        if self.keys.is_empty() {
            return None;
        }
        let len = self.keys.len();
        let next = (self.cursor.load(Ordering::Relaxed) + 1) % len;
        self.cursor.store(next, Ordering::Relaxed);
        Some(&self.keys[next])
    }
}
