//! Per-method coverage bitmap.
//!
//! One byte per entry, zero meaning "not hit since the last dump". The hot
//! path writes entries with plain relaxed stores and never takes a lock; the
//! dumper reads entries and clears the ones it reported. A hit landing between
//! that read and the clear can be lost, which coverage tolerates: the next
//! execution of the same offset sets the entry again.

use std::sync::atomic::{AtomicU8, Ordering};

pub struct CoverageBitmap {
    entries: Box<[AtomicU8]>,
}

impl CoverageBitmap {
    /// Zeroed bitmap with `len` entries
    pub fn new(len: usize) -> Self {
        Self {
            entries: (0..len).map(|_| AtomicU8::new(0)).collect(),
        }
    }

    /// Bitmap with one entry per code unit of a method body
    pub fn for_code_units(insns_size: u32) -> Self {
        Self::new(insns_size as usize)
    }

    /// Bitmap initialized from raw entry values
    pub fn from_entries(entries: &[u8]) -> Self {
        Self {
            entries: entries.iter().map(|&v| AtomicU8::new(v)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a hit. Out-of-range indices are ignored.
    #[inline]
    pub fn mark(&self, index: usize) {
        if let Some(entry) = self.entries.get(index) {
            entry.store(1, Ordering::Relaxed);
        }
    }

    /// Whether `index` was hit since the last reset; out-of-range reads as not hit
    #[inline]
    pub fn is_hit(&self, index: usize) -> bool {
        self.entries
            .get(index)
            .is_some_and(|e| e.load(Ordering::Relaxed) != 0)
    }

    /// Whether any entry is hit
    pub fn any_hit(&self) -> bool {
        self.any_hit_within(self.len())
    }

    /// Whether any of the first `limit` entries is hit. Checks the first
    /// entry before scanning.
    pub fn any_hit_within(&self, limit: usize) -> bool {
        let entries = &self.entries[..limit.min(self.entries.len())];
        match entries.split_first() {
            None => false,
            Some((first, _)) if first.load(Ordering::Relaxed) != 0 => true,
            Some((_, rest)) => rest.iter().any(|e| e.load(Ordering::Relaxed) != 0),
        }
    }

    /// Number of hit entries
    pub fn hit_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.load(Ordering::Relaxed) != 0)
            .count()
    }

    /// Copy of the current entry values, normalized to 0/1
    pub fn snapshot(&self) -> Vec<u8> {
        self.entries
            .iter()
            .map(|e| u8::from(e.load(Ordering::Relaxed) != 0))
            .collect()
    }

    /// Reset one entry to not-hit
    #[inline]
    pub(crate) fn clear(&self, index: usize) {
        if let Some(entry) = self.entries.get(index) {
            entry.store(0, Ordering::Relaxed);
        }
    }
}

impl std::fmt::Debug for CoverageBitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoverageBitmap")
            .field("len", &self.len())
            .field("hits", &self.hit_count())
            .finish()
    }
}
