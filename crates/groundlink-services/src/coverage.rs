//! Chunk range tracker.
//!
//! A file's coverage is a sorted list of inclusive byte ranges. After every
//! insertion no two ranges overlap or touch; adjacent ranges are merged.
//! Pure data structure, no I/O.

use serde::Serialize;

/// Inclusive byte range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ChunkRange {
    pub start: u64,
    pub end: u64,
}

impl ChunkRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Byte count. Never zero for a well-formed range.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Coverage {
    ranges: Vec<ChunkRange>,
}

impl Coverage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ranges(&self) -> &[ChunkRange] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    /// Insert `range`, merging with overlapping or adjacent ranges.
    /// Returns whether the set changed. Ranges with `end < start` are ignored.
    pub fn add_range(&mut self, range: ChunkRange) -> bool {
        if range.end < range.start {
            return false;
        }

        // First range that could merge: its end reaches start-1.
        let lo = self
            .ranges
            .partition_point(|r| r.end.saturating_add(1) < range.start);
        // One past the last range that could merge: its start <= end+1.
        let hi = self
            .ranges
            .partition_point(|r| r.start <= range.end.saturating_add(1));

        if lo < hi {
            let first = self.ranges[lo];
            if hi - lo == 1 && first.start <= range.start && first.end >= range.end {
                return false;
            }
            let merged = ChunkRange {
                start: first.start.min(range.start),
                end: self.ranges[hi - 1].end.max(range.end),
            };
            self.ranges.splice(lo..hi, std::iter::once(merged));
        } else {
            self.ranges.insert(lo, range);
        }
        true
    }

    /// Remove `range` from the set, splitting ranges it cuts through.
    /// Returns whether the set changed.
    pub fn remove_range(&mut self, range: ChunkRange) -> bool {
        if range.end < range.start {
            return false;
        }
        let mut changed = false;
        let mut out = Vec::with_capacity(self.ranges.len() + 1);
        for r in self.ranges.drain(..) {
            if r.end < range.start || r.start > range.end {
                out.push(r);
                continue;
            }
            changed = true;
            if r.start < range.start {
                out.push(ChunkRange::new(r.start, range.start - 1));
            }
            if r.end > range.end {
                out.push(ChunkRange::new(range.end + 1, r.end));
            }
        }
        self.ranges = out;
        changed
    }

    /// Complement of the coverage within `[0, file_size-1]`, ascending,
    /// at most `max_results` entries.
    pub fn missing_ranges(&self, file_size: u64, max_results: usize) -> Vec<ChunkRange> {
        let mut holes = Vec::new();
        if file_size == 0 {
            return holes;
        }
        let last = file_size - 1;
        let mut next = 0u64;
        for r in &self.ranges {
            if holes.len() >= max_results || next > last {
                return holes;
            }
            if r.start > next {
                holes.push(ChunkRange::new(next, (r.start - 1).min(last)));
            }
            match r.end.checked_add(1) {
                Some(n) => next = next.max(n),
                None => return holes,
            }
        }
        if holes.len() < max_results && next <= last {
            holes.push(ChunkRange::new(next, last));
        }
        holes
    }

    pub fn total_bytes(&self) -> u64 {
        self.ranges.iter().map(ChunkRange::len).sum()
    }

    /// True iff a single range spans `[0, file_size-1]`.
    pub fn is_complete(&self, file_size: u64) -> bool {
        file_size > 0
            && self.ranges.len() == 1
            && self.ranges[0].start == 0
            && self.ranges[0].end == file_size - 1
    }

    /// Drop everything beyond `[0, file_size-1]`.
    pub fn clamp(&mut self, file_size: u64) {
        if file_size == 0 {
            self.ranges.clear();
            return;
        }
        let last = file_size - 1;
        self.ranges.retain(|r| r.start <= last);
        if let Some(r) = self.ranges.last_mut() {
            r.end = r.end.min(last);
        }
    }
}

impl FromIterator<ChunkRange> for Coverage {
    fn from_iter<I: IntoIterator<Item = ChunkRange>>(iter: I) -> Self {
        let mut c = Coverage::new();
        for r in iter {
            c.add_range(r);
        }
        c
    }
}
