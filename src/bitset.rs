//! Run-compressed bitset representation for leaf sets in phylogenetic trees.
//!
//! # Overview
//! A bitset records which leaves belong to a clade. Each leaf owns one bit
//! position in the shared index space `[1, N]`.
//!
//! Instead of one bit per leaf, the set is stored as a sorted list of maximal
//! runs of consecutive set bits. Leaf indices are handed out in post-order, so
//! every clade of the reference tree is a single run and its complement is at
//! most two; clades of the second tree stay short as long as the trees agree
//! locally. Union, difference and intersection tests cost O(runs), not O(N).
//!
//! # Example
//! For leaves [A, B, C, D, E] mapped to indices [1, 2, 3, 4, 5]:
//! - Clade {A, B, C} → one run `[1, 4)`
//! - Clade {A, C, D} → two runs `[1, 2)`, `[3, 5)`

use std::fmt;

use itertools::Itertools;

/// A set of leaf indices stored as sorted, disjoint, non-adjacent half-open runs.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct Bitset {
    runs: Vec<(usize, usize)>,
}

impl Bitset {
    /// Creates an empty bitset.
    pub fn new() -> Self {
        Bitset { runs: Vec::new() }
    }

    /// Creates the full universe `{1, ..., num_leaves}`.
    ///
    /// # Example
    /// ```
    /// # use tree_incompat::bitset::Bitset;
    /// let all = Bitset::full(4);
    /// assert_eq!(all.count_ones(), 4);
    /// assert!(all.contains(1) && all.contains(4));
    /// assert!(!all.contains(0) && !all.contains(5));
    /// ```
    pub fn full(num_leaves: usize) -> Self {
        if num_leaves == 0 {
            Bitset::new()
        } else {
            Bitset {
                runs: vec![(1, num_leaves + 1)],
            }
        }
    }

    /// Sets the bit at the given index to 1.
    ///
    /// # Example
    /// ```
    /// # use tree_incompat::bitset::Bitset;
    /// let mut bs = Bitset::new();
    /// bs.set(3);
    /// bs.set(1);
    /// bs.set(2); // bridges {1} and {3}
    /// assert_eq!(bs.run_count(), 1);
    /// assert_eq!(bs.count_ones(), 3);
    /// ```
    pub fn set(&mut self, idx: usize) {
        // first run that contains idx or ends right before it
        let pos = self.runs.partition_point(|&(_, end)| end < idx);

        if let Some(&(start, end)) = self.runs.get(pos) {
            if start <= idx && idx < end {
                return;
            }
            if end == idx {
                self.runs[pos].1 = idx + 1;
                if let Some(&(next_start, next_end)) = self.runs.get(pos + 1) {
                    if next_start == idx + 1 {
                        self.runs[pos].1 = next_end;
                        self.runs.remove(pos + 1);
                    }
                }
                return;
            }
            if start == idx + 1 {
                self.runs[pos].0 = idx;
                return;
            }
        }
        self.runs.insert(pos, (idx, idx + 1));
    }

    /// True iff the bit at `idx` is set.
    pub fn contains(&self, idx: usize) -> bool {
        let pos = self.runs.partition_point(|&(_, end)| end <= idx);
        self.runs.get(pos).is_some_and(|&(start, _)| start <= idx)
    }

    /// Performs bitwise OR with another bitset (union operation).
    ///
    /// Merges two leaf sets: `self` becomes `self ∪ other`
    ///
    /// # Example
    /// ```
    /// # use tree_incompat::bitset::Bitset;
    /// let mut left: Bitset = [1, 2].into_iter().collect();
    /// let right: Bitset = [3, 7].into_iter().collect();
    /// left.or_assign(&right);
    /// assert_eq!(left.iter().collect::<Vec<_>>(), vec![1, 2, 3, 7]);
    /// assert_eq!(left.run_count(), 2);
    /// ```
    pub fn or_assign(&mut self, other: &Bitset) {
        if other.runs.is_empty() {
            return;
        }
        let mut merged: Vec<(usize, usize)> =
            Vec::with_capacity(self.runs.len() + other.runs.len());
        for (start, end) in self.runs.iter().copied().merge(other.runs.iter().copied()) {
            match merged.last_mut() {
                Some(last) if start <= last.1 => last.1 = last.1.max(end),
                _ => merged.push((start, end)),
            }
        }
        self.runs = merged;
    }

    /// Returns `self \ other`.
    ///
    /// # Example
    /// ```
    /// # use tree_incompat::bitset::Bitset;
    /// let clade: Bitset = [2, 3].into_iter().collect();
    /// let comp = Bitset::full(5).and_not(&clade);
    /// assert_eq!(comp.iter().collect::<Vec<_>>(), vec![1, 4, 5]);
    /// ```
    pub fn and_not(&self, other: &Bitset) -> Bitset {
        let mut runs = Vec::with_capacity(self.runs.len() + 1);
        let mut k = 0;

        for &(s, e) in &self.runs {
            let mut start = s;
            while start < e {
                match other.runs.get(k) {
                    Some(&(os, oe)) if os < e => {
                        if oe <= start {
                            k += 1;
                            continue;
                        }
                        if os > start {
                            runs.push((start, os));
                        }
                        start = oe;
                        if oe <= e {
                            k += 1;
                        }
                    }
                    _ => {
                        runs.push((start, e));
                        start = e;
                    }
                }
            }
        }

        Bitset { runs }
    }

    /// True iff the two sets share at least one index.
    #[inline]
    pub fn intersects(&self, other: &Bitset) -> bool {
        let (mut i, mut j) = (0, 0);
        while let (Some(&(s1, e1)), Some(&(s2, e2))) = (self.runs.get(i), other.runs.get(j)) {
            if e1 <= s2 {
                i += 1;
            } else if e2 <= s1 {
                j += 1;
            } else {
                return true;
            }
        }
        false
    }

    /// Counts the number of set bits (population count).
    ///
    /// Returns how many leaves are in this clade.
    #[inline]
    pub fn count_ones(&self) -> usize {
        self.runs.iter().map(|&(s, e)| e - s).sum()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Number of maximal runs of set bits, the storage cost of the set.
    #[inline]
    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    /// Set indices in increasing order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.runs.iter().flat_map(|&(s, e)| s..e)
    }
}

impl FromIterator<usize> for Bitset {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut bs = Bitset::new();
        for idx in iter {
            bs.set(idx);
        }
        bs
    }
}

/// Formats as runs, e.g. `{1-3,7}`.
impl fmt::Display for Bitset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = self
            .runs
            .iter()
            .map(|&(s, e)| if e - s == 1 { s.to_string() } else { format!("{}-{}", s, e - 1) })
            .join(",");
        write!(f, "{{{body}}}")
    }
}
