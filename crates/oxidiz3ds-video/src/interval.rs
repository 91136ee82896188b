//! Half-open physical address intervals and the ordered interval map that the
//! surface cache, the dirty region map, the page counter and every surface's
//! invalid region set are built on.
//!
//! An [`IntervalMap`] stores non-overlapping, non-empty runs keyed by their start
//! address. Neighbouring runs that touch and carry equal payloads are always
//! coalesced, so the number of runs stays proportional to the number of distinct
//! owners rather than to the number of writes.

use std::collections::BTreeMap;
use std::fmt;

/// Guest physical address
pub type PAddr = u32;

/// A `[start, end)` range of guest physical memory.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SurfaceInterval {
    pub start: PAddr,
    pub end: PAddr,
}

impl fmt::Debug for SurfaceInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#010X}, {:#010X})", self.start, self.end)
    }
}

impl SurfaceInterval {
    pub const fn new(start: PAddr, end: PAddr) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    /// Interval covering `size` bytes from `addr`, clamped at the top of the address space.
    pub const fn from_size(addr: PAddr, size: u32) -> Self {
        Self::new(addr, addr.saturating_add(size))
    }

    pub const fn len(&self) -> u32 {
        self.end - self.start
    }

    pub const fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Intersection of two intervals. Disjoint inputs give an empty interval.
    pub fn intersect(&self, other: &SurfaceInterval) -> SurfaceInterval {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end).max(start);
        SurfaceInterval { start, end }
    }

    pub fn overlaps(&self, other: &SurfaceInterval) -> bool {
        !self.intersect(other).is_empty()
    }

    /// Whether `other` lies entirely inside `self`.
    pub fn contains(&self, other: &SurfaceInterval) -> bool {
        other.is_empty() || (self.start <= other.start && other.end <= self.end)
    }
}

#[derive(Debug, Clone)]
struct Run<V> {
    end: PAddr,
    value: V,
}

/// Ordered map from disjoint address runs to payloads.
#[derive(Debug, Clone)]
pub struct IntervalMap<V> {
    runs: BTreeMap<PAddr, Run<V>>,
}

impl<V> Default for IntervalMap<V> {
    fn default() -> Self {
        Self {
            runs: BTreeMap::new(),
        }
    }
}

impl<V: Clone + PartialEq> IntervalMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Number of stored runs
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn clear(&mut self) {
        self.runs.clear();
    }

    /// All runs in address order.
    pub fn iter(&self) -> impl Iterator<Item = (SurfaceInterval, &V)> + '_ {
        self.runs
            .iter()
            .map(|(&start, run)| (SurfaceInterval::new(start, run.end), &run.value))
    }

    /// Runs overlapping `interval`, unclipped, in address order.
    ///
    /// Costs one tree descent plus the number of runs yielded.
    pub fn range(&self, interval: SurfaceInterval) -> impl Iterator<Item = (SurfaceInterval, &V)> + '_ {
        let first = self
            .runs
            .range(..=interval.start)
            .next_back()
            .filter(|(_, run)| run.end > interval.start)
            .map_or(interval.start, |(&start, _)| start);

        (!interval.is_empty())
            .then(|| self.runs.range(first..interval.end))
            .into_iter()
            .flatten()
            .map(|(&start, run)| (SurfaceInterval::new(start, run.end), &run.value))
    }

    /// Runs overlapping `interval`, clipped to it.
    pub fn clipped(&self, interval: SurfaceInterval) -> impl Iterator<Item = (SurfaceInterval, &V)> + '_ {
        self.range(interval)
            .map(move |(run, value)| (run.intersect(&interval), value))
    }

    /// Payload stored at `addr`, if any.
    pub fn get(&self, addr: PAddr) -> Option<&V> {
        self.runs
            .range(..=addr)
            .next_back()
            .filter(|(_, run)| run.end > addr)
            .map(|(_, run)| &run.value)
    }

    /// Whether every byte of `interval` is mapped.
    pub fn covers(&self, interval: SurfaceInterval) -> bool {
        let mut cursor = interval.start;
        for (run, _) in self.range(interval) {
            if run.start > cursor {
                return false;
            }
            cursor = cursor.max(run.end);
            if cursor >= interval.end {
                return true;
            }
        }
        cursor >= interval.end
    }

    /// Whether any byte of `interval` is mapped.
    pub fn intersects(&self, interval: SurfaceInterval) -> bool {
        self.range(interval).next().is_some()
    }

    /// Rewrites every byte of `interval`.
    ///
    /// `f` is called once per existing run (clipped to `interval`) and once per
    /// unmapped gap with `None`. Returning `None` leaves the piece unmapped.
    pub fn update<F>(&mut self, interval: SurfaceInterval, mut f: F)
    where
        F: FnMut(Option<&V>) -> Option<V>,
    {
        if interval.is_empty() {
            return;
        }
        self.split_at(interval.start);
        self.split_at(interval.end);

        let starts: Vec<PAddr> = self
            .runs
            .range(interval.start..interval.end)
            .map(|(&start, _)| start)
            .collect();

        let mut cursor = interval.start;
        for start in starts {
            let Some(run) = self.runs.remove(&start) else {
                continue;
            };
            if cursor < start
                && let Some(value) = f(None)
            {
                self.runs.insert(cursor, Run { end: start, value });
            }
            if let Some(value) = f(Some(&run.value)) {
                self.runs.insert(start, Run { end: run.end, value });
            }
            cursor = run.end;
        }
        if cursor < interval.end
            && let Some(value) = f(None)
        {
            self.runs.insert(
                cursor,
                Run {
                    end: interval.end,
                    value,
                },
            );
        }

        self.coalesce(interval);
    }

    /// Maps `interval` to `value`, replacing anything previously there.
    pub fn set(&mut self, interval: SurfaceInterval, value: V) {
        self.update(interval, |_| Some(value.clone()));
    }

    /// Unmaps `interval`.
    pub fn erase(&mut self, interval: SurfaceInterval) {
        self.update(interval, |_| None);
    }

    /// Unmaps every interval of `regions`.
    pub fn subtract_regions(&mut self, regions: &IntervalSet) {
        for interval in regions.intervals() {
            self.erase(interval);
        }
    }

    fn split_at(&mut self, pos: PAddr) {
        let Some((_, run)) = self.runs.range_mut(..pos).next_back() else {
            return;
        };
        if run.end <= pos {
            return;
        }
        let tail = Run {
            end: run.end,
            value: run.value.clone(),
        };
        run.end = pos;
        self.runs.insert(pos, tail);
    }

    fn coalesce(&mut self, interval: SurfaceInterval) {
        let first = self
            .runs
            .range(..interval.start)
            .next_back()
            .map_or(interval.start, |(&start, _)| start);
        let starts: Vec<PAddr> = self
            .runs
            .range(first..=interval.end)
            .map(|(&start, _)| start)
            .collect();

        let mut prev: Option<PAddr> = None;
        for start in starts {
            if let Some(prev_start) = prev {
                let mergeable = match (self.runs.get(&prev_start), self.runs.get(&start)) {
                    (Some(a), Some(b)) => a.end == start && a.value == b.value,
                    _ => false,
                };
                if mergeable {
                    if let Some(run) = self.runs.remove(&start)
                        && let Some(prev_run) = self.runs.get_mut(&prev_start)
                    {
                        prev_run.end = run.end;
                    }
                    continue;
                }
            }
            prev = Some(start);
        }
    }
}

/// A set of disjoint address intervals.
pub type IntervalSet = IntervalMap<()>;

impl IntervalMap<()> {
    pub fn from_interval(interval: SurfaceInterval) -> Self {
        let mut set = Self::new();
        set.insert(interval);
        set
    }

    pub fn insert(&mut self, interval: SurfaceInterval) {
        self.set(interval, ());
    }

    pub fn intervals(&self) -> impl Iterator<Item = SurfaceInterval> + '_ {
        self.iter().map(|(interval, _)| interval)
    }

    /// Lowest interval in the set.
    pub fn first(&self) -> Option<SurfaceInterval> {
        self.intervals().next()
    }

    /// `self & interval`
    pub fn intersection(&self, interval: SurfaceInterval) -> IntervalSet {
        let mut out = IntervalSet::new();
        for (clipped, _) in self.clipped(interval) {
            out.insert(clipped);
        }
        out
    }

    pub fn union_with(&mut self, other: &IntervalSet) {
        for interval in other.intervals() {
            self.insert(interval);
        }
    }

    /// Total number of bytes in the set.
    pub fn total_len(&self) -> u64 {
        self.intervals().map(|interval| interval.len() as u64).sum()
    }
}
