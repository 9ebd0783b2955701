//! Multi-part Mann-Kendall breakpoint search.
//!
//! A series is split into `nparts` contiguous segments by `nparts - 1` cut
//! indices (a cut is the first index of the next segment). Each segment gets a
//! Mann-Kendall test and the partition is accepted when every segment shows its
//! expected behaviour:
//!
//! - increasing: `Z > 0` and `p < alpha`
//! - decreasing: `Z < 0` and `p < alpha`
//! - no trend: `|Z| < no_trend_z`
//!
//! Among accepted partitions the one with the largest summed `|Z|` over the
//! trending segments wins; ties go to the lexicographically smallest cuts.
//!
//! Candidate partitions come from a lazy odometer ([`CutCandidates`]) so the
//! combinatorial space is never materialized. Efficient mode ([`EfficientSearch`])
//! restricts the noisy-realization search to windows around the breakpoints
//! found on the noise-free series.

use crate::errors::{validate_data_length, validate_finite, DetectionPowerError, DetectionPowerResult};
use crate::math_utils::{sign, standard_normal_quantile, two_sided_normal_p};
use crate::trend_stats::{
    has_ties, mann_kendall_s, mann_kendall_variance, mann_kendall_z, tie_correction,
    MIN_TREND_SAMPLES,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Default two-sided level below which a segment counts as trend-free.
pub const DEFAULT_NO_TREND_ALPHA: f64 = 0.50;

/// Expected behaviour of one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendSign {
    /// Significant downward trend
    Decreasing,
    /// No significant trend
    NoTrend,
    /// Significant upward trend
    Increasing,
}

impl TrendSign {
    /// Parse the `-1 / 0 / 1` convention.
    pub fn from_i8(value: i8) -> DetectionPowerResult<Self> {
        match value {
            -1 => Ok(TrendSign::Decreasing),
            0 => Ok(TrendSign::NoTrend),
            1 => Ok(TrendSign::Increasing),
            other => Err(DetectionPowerError::configuration(
                "expect_slope",
                format!("{} is not one of -1, 0, 1", other),
            )),
        }
    }

    /// Parse a whole `-1 / 0 / 1` pattern.
    pub fn pattern(values: &[i8]) -> DetectionPowerResult<Vec<Self>> {
        values.iter().map(|&v| Self::from_i8(v)).collect()
    }

    /// The `-1 / 0 / 1` convention.
    pub fn as_i8(&self) -> i8 {
        match self {
            TrendSign::Decreasing => -1,
            TrendSign::NoTrend => 0,
            TrendSign::Increasing => 1,
        }
    }

    /// Direction of a statistic.
    pub fn of(value: f64) -> Self {
        match sign(value) {
            1 => TrendSign::Increasing,
            -1 => TrendSign::Decreasing,
            _ => TrendSign::NoTrend,
        }
    }
}

impl fmt::Display for TrendSign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i8())
    }
}

/// Mann-Kendall statistics of one segment `[start, end)`.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentTrend {
    /// First index of the segment
    pub start: usize,
    /// One past the last index
    pub end: usize,
    /// S statistic
    pub s: i64,
    /// Tie-corrected variance of S
    pub var_s: f64,
    /// Normal score
    pub z: f64,
    /// Two-sided p-value
    pub p_value: f64,
    /// Expected behaviour
    pub expected: TrendSign,
}

/// Best partition of a series.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiPartResult {
    /// Cut indices
    pub cuts: Vec<usize>,
    /// Per-segment statistics
    pub segments: Vec<SegmentTrend>,
    /// Summed `|Z|` of the trending segments
    pub score: f64,
    /// Whether every segment shows its expected behaviour
    pub matches_expected: bool,
}

/// Exhaustive or position-restricted multi-part Mann-Kendall search.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiPartSearch {
    expected: Vec<TrendSign>,
    min_part_size: usize,
    alpha: f64,
    no_trend_z: f64,
}

impl MultiPartSearch {
    /// Search for `nparts` segments following `expected`.
    ///
    /// The no-trend cutoff defaults to the `1 - 0.25` normal quantile
    /// (`no_trend_alpha = 0.5`).
    pub fn new(
        nparts: usize,
        expected: Vec<TrendSign>,
        min_part_size: usize,
        alpha: f64,
    ) -> DetectionPowerResult<Self> {
        if nparts == 0 {
            return Err(DetectionPowerError::configuration("nparts", "must be at least 1"));
        }
        if expected.len() != nparts {
            return Err(DetectionPowerError::configuration(
                "expect_slope",
                format!(
                    "pattern has {} entries but nparts is {}",
                    expected.len(),
                    nparts
                ),
            ));
        }
        if min_part_size < MIN_TREND_SAMPLES {
            return Err(DetectionPowerError::configuration(
                "min_part_size",
                format!("must be at least {}", MIN_TREND_SAMPLES),
            ));
        }
        if !(alpha > 0.0 && alpha < 1.0) {
            return Err(DetectionPowerError::configuration(
                "min_p_value",
                format!("{} outside (0, 1)", alpha),
            ));
        }
        let no_trend_z = standard_normal_quantile(1.0 - DEFAULT_NO_TREND_ALPHA / 2.0)?;
        Ok(Self {
            expected,
            min_part_size,
            alpha,
            no_trend_z,
        })
    }

    /// Set the no-trend cutoff from a two-sided level.
    pub fn with_no_trend_alpha(mut self, no_trend_alpha: f64) -> DetectionPowerResult<Self> {
        if !(no_trend_alpha > 0.0 && no_trend_alpha < 1.0) {
            return Err(DetectionPowerError::configuration(
                "no_trend_alpha",
                format!("{} outside (0, 1)", no_trend_alpha),
            ));
        }
        self.no_trend_z = standard_normal_quantile(1.0 - no_trend_alpha / 2.0)?;
        Ok(self)
    }

    /// Set the no-trend cutoff directly as a `|Z|` bound.
    pub fn with_no_trend_z(mut self, no_trend_z: f64) -> DetectionPowerResult<Self> {
        validate_finite(no_trend_z, "no_trend_z")?;
        if no_trend_z <= 0.0 {
            return Err(DetectionPowerError::configuration("no_trend_z", "must be positive"));
        }
        self.no_trend_z = no_trend_z;
        Ok(self)
    }

    /// Number of segments.
    pub fn nparts(&self) -> usize {
        self.expected.len()
    }

    /// Expected pattern.
    pub fn expected(&self) -> &[TrendSign] {
        &self.expected
    }

    /// Minimum segment length.
    pub fn min_part_size(&self) -> usize {
        self.min_part_size
    }

    /// No-trend `|Z|` cutoff.
    pub fn no_trend_z(&self) -> f64 {
        self.no_trend_z
    }

    /// Shortest series that admits a partition.
    pub fn min_length(&self) -> usize {
        self.nparts() * self.min_part_size
    }

    /// Every valid partition of a series of length `n`, in lexicographic order.
    pub fn candidates(&self, n: usize) -> CutCandidates {
        let all: Vec<usize> = (0..=n).collect();
        CutCandidates::new(n, self.min_part_size, vec![all; self.nparts() - 1])
    }

    /// Valid partitions whose `k`-th cut is drawn from `positions[k]`.
    pub fn candidates_within(
        &self,
        n: usize,
        positions: &[Vec<usize>],
    ) -> DetectionPowerResult<CutCandidates> {
        if positions.len() != self.nparts() - 1 {
            return Err(DetectionPowerError::configuration(
                "positions",
                format!(
                    "{} position lists for {} cuts",
                    positions.len(),
                    self.nparts() - 1
                ),
            ));
        }
        let lists = positions
            .iter()
            .map(|p| {
                let mut p = p.clone();
                p.sort_unstable();
                p.dedup();
                p
            })
            .collect();
        Ok(CutCandidates::new(n, self.min_part_size, lists))
    }

    /// Exhaustive search. `None` means no partition shows the expected pattern.
    pub fn search(&self, data: &[f64]) -> DetectionPowerResult<Option<MultiPartResult>> {
        validate_data_length(data, self.min_length())?;
        self.best_of(data, self.candidates(data.len()))
    }

    /// Search restricted to per-cut candidate positions.
    pub fn search_within(
        &self,
        data: &[f64],
        positions: &[Vec<usize>],
    ) -> DetectionPowerResult<Option<MultiPartResult>> {
        validate_data_length(data, self.min_length())?;
        let candidates = self.candidates_within(data.len(), positions)?;
        self.best_of(data, candidates)
    }

    /// Statistics of one explicit partition.
    pub fn evaluate(&self, data: &[f64], cuts: &[usize]) -> DetectionPowerResult<MultiPartResult> {
        validate_data_length(data, self.min_length())?;
        if cuts.len() != self.nparts() - 1 {
            return Err(DetectionPowerError::configuration(
                "cuts",
                format!("{} cuts for {} segments", cuts.len(), self.nparts()),
            ));
        }
        let bounds = segment_bounds(cuts, data.len());
        if bounds.windows(2).any(|w| w[1] < w[0] + self.min_part_size) {
            return Err(DetectionPowerError::configuration(
                "cuts",
                format!("{:?} leaves a segment shorter than {}", cuts, self.min_part_size),
            ));
        }
        let mut cache = SegmentCache::new(data);
        Ok(self.describe(&mut cache, cuts.to_vec()))
    }

    fn best_of(
        &self,
        data: &[f64],
        candidates: CutCandidates,
    ) -> DetectionPowerResult<Option<MultiPartResult>> {
        let mut cache = SegmentCache::new(data);
        let best = candidates
            .filter_map(|cuts| self.score(&mut cache, &cuts).map(|score| (cuts, score)))
            .fold(None, |best: Option<(Vec<usize>, f64)>, (cuts, score)| match best {
                Some((_, top)) if score <= top => best,
                _ => Some((cuts, score)),
            });
        Ok(best.map(|(cuts, _)| self.describe(&mut cache, cuts)))
    }

    /// Score of an eligible partition, `None` when any segment misbehaves.
    fn score(&self, cache: &mut SegmentCache<'_>, cuts: &[usize]) -> Option<f64> {
        let bounds = segment_bounds(cuts, cache.data.len());
        let mut score = 0.0;
        for (w, expected) in bounds.windows(2).zip(&self.expected) {
            let (s, var_s) = cache.stats(w[0], w[1]);
            let z = mann_kendall_z(s, var_s);
            if !self.segment_ok(*expected, z) {
                return None;
            }
            if *expected != TrendSign::NoTrend {
                score += z.abs();
            }
        }
        Some(score)
    }

    fn segment_ok(&self, expected: TrendSign, z: f64) -> bool {
        match expected {
            TrendSign::Increasing => z > 0.0 && two_sided_normal_p(z) < self.alpha,
            TrendSign::Decreasing => z < 0.0 && two_sided_normal_p(z) < self.alpha,
            TrendSign::NoTrend => z.abs() < self.no_trend_z,
        }
    }

    fn describe(&self, cache: &mut SegmentCache<'_>, cuts: Vec<usize>) -> MultiPartResult {
        let bounds = segment_bounds(&cuts, cache.data.len());
        let segments: Vec<SegmentTrend> = bounds
            .windows(2)
            .zip(&self.expected)
            .map(|(w, &expected)| {
                let (s, var_s) = cache.stats(w[0], w[1]);
                let z = mann_kendall_z(s, var_s);
                SegmentTrend {
                    start: w[0],
                    end: w[1],
                    s,
                    var_s,
                    z,
                    p_value: two_sided_normal_p(z),
                    expected,
                }
            })
            .collect();
        let matches_expected = segments.iter().all(|seg| self.segment_ok(seg.expected, seg.z));
        let score = segments
            .iter()
            .filter(|seg| seg.expected != TrendSign::NoTrend)
            .map(|seg| seg.z.abs())
            .sum();
        MultiPartResult {
            cuts,
            segments,
            score,
            matches_expected,
        }
    }
}

fn segment_bounds(cuts: &[usize], n: usize) -> Vec<usize> {
    let mut bounds = Vec::with_capacity(cuts.len() + 2);
    bounds.push(0);
    bounds.extend_from_slice(cuts);
    bounds.push(n);
    bounds
}

// ============================================================================
// CANDIDATE ENUMERATION
// ============================================================================

/// Lazy lexicographic enumeration of cut tuples.
///
/// Cut `k` is drawn from a sorted position list; every segment, including the
/// first and the last, must hold at least `min_part_size` points.
#[derive(Debug, Clone)]
pub struct CutCandidates {
    n: usize,
    min_part_size: usize,
    lists: Vec<Vec<usize>>,
    idx: Vec<usize>,
    started: bool,
    exhausted: bool,
}

impl CutCandidates {
    fn new(n: usize, min_part_size: usize, lists: Vec<Vec<usize>>) -> Self {
        let k = lists.len();
        Self {
            n,
            min_part_size,
            lists,
            idx: vec![0; k],
            started: false,
            exhausted: false,
        }
    }

    fn cut(&self, level: usize) -> usize {
        self.lists[level][self.idx[level]]
    }

    /// First position index `>= from` at `level` that leaves room for the
    /// previous cut and for every remaining segment.
    fn first_valid(&self, level: usize, from: usize) -> Option<usize> {
        let k = self.lists.len();
        let m = self.min_part_size;
        let lower = if level == 0 { m } else { self.cut(level - 1) + m };
        let upper = self.n.checked_sub((k - level) * m)?;
        let list = &self.lists[level];
        let start = from.max(list.partition_point(|&p| p < lower));
        match list.get(start) {
            Some(&p) if p <= upper => Some(start),
            _ => None,
        }
    }

    /// Fill levels `level..` with their first valid positions, backtracking
    /// when a level has none. Returns false once the space is exhausted.
    fn settle(&mut self, mut level: usize, mut from: usize) -> bool {
        let k = self.lists.len();
        loop {
            match self.first_valid(level, from) {
                Some(i) => {
                    self.idx[level] = i;
                    if level + 1 == k {
                        return true;
                    }
                    level += 1;
                    from = 0;
                }
                None => {
                    if level == 0 {
                        return false;
                    }
                    level -= 1;
                    from = self.idx[level] + 1;
                }
            }
        }
    }
}

impl Iterator for CutCandidates {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        let k = self.lists.len();
        if k == 0 {
            self.exhausted = true;
            return (self.n >= self.min_part_size).then(Vec::new);
        }
        let found = if self.started {
            let last = k - 1;
            let from = self.idx[last] + 1;
            self.settle(last, from)
        } else {
            self.started = true;
            self.settle(0, 0)
        };
        if !found {
            self.exhausted = true;
            return None;
        }
        Some((0..k).map(|level| self.cut(level)).collect())
    }
}

// ============================================================================
// SEGMENT STATISTICS CACHE
// ============================================================================

/// Memoized segment S statistics and tie terms for one realization.
///
/// A new segment is derived from a cached neighbour differing by one point at
/// either end when possible, so sweeping a cut costs `O(n)` per step.
struct SegmentCache<'a> {
    data: &'a [f64],
    has_ties: bool,
    s_memo: HashMap<(usize, usize), i64>,
    tie_memo: HashMap<(usize, usize), f64>,
}

impl<'a> SegmentCache<'a> {
    fn new(data: &'a [f64]) -> Self {
        Self {
            data,
            has_ties: has_ties(data),
            s_memo: HashMap::new(),
            tie_memo: HashMap::new(),
        }
    }

    fn stats(&mut self, start: usize, end: usize) -> (i64, f64) {
        let s = self.s(start, end);
        let ties = if self.has_ties {
            let data = self.data;
            *self
                .tie_memo
                .entry((start, end))
                .or_insert_with(|| tie_correction(&data[start..end]))
        } else {
            0.0
        };
        (s, mann_kendall_variance(end - start, ties))
    }

    fn s(&mut self, a: usize, b: usize) -> i64 {
        if let Some(&s) = self.s_memo.get(&(a, b)) {
            return s;
        }
        let x = self.data;
        let memo = &self.s_memo;
        let s = if let Some(&prev) = (b > a + 1).then(|| memo.get(&(a, b - 1))).flatten() {
            // append x[b-1]
            prev + x[a..b - 1].iter().map(|&xi| sign(x[b - 1] - xi)).sum::<i64>()
        } else if let Some(&prev) = (a > 0).then(|| memo.get(&(a - 1, b))).flatten() {
            // drop x[a-1]
            prev - x[a..b].iter().map(|&xk| sign(xk - x[a - 1])).sum::<i64>()
        } else if let Some(&prev) = memo.get(&(a + 1, b)) {
            // prepend x[a]
            prev + x[a + 1..b].iter().map(|&xk| sign(xk - x[a])).sum::<i64>()
        } else if let Some(&prev) = memo.get(&(a, b + 1)) {
            // drop x[b]
            prev - x[a..b].iter().map(|&xi| sign(x[b] - xi)).sum::<i64>()
        } else {
            mann_kendall_s(&x[a..b])
        };
        self.s_memo.insert((a, b), s);
        s
    }
}

// ============================================================================
// EFFICIENT MODE
// ============================================================================

/// Spacing between candidate cut positions, constant or a function of the
/// series length. Always at least 1.
#[derive(Clone)]
pub enum CheckStep {
    /// Same step for every length
    Constant(usize),
    /// Step computed from the series length
    Function(Arc<dyn Fn(usize) -> usize + Send + Sync>),
}

impl CheckStep {
    /// Constant step.
    pub fn constant(step: usize) -> Self {
        CheckStep::Constant(step)
    }

    /// Step computed from the series length.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(usize) -> usize + Send + Sync + 'static,
    {
        CheckStep::Function(Arc::new(f))
    }

    /// Step for a series of length `n`.
    pub fn step_for(&self, n: usize) -> usize {
        let step = match self {
            CheckStep::Constant(step) => *step,
            CheckStep::Function(f) => f(n),
        };
        step.max(1)
    }
}

impl Default for CheckStep {
    fn default() -> Self {
        CheckStep::Constant(1)
    }
}

impl From<usize> for CheckStep {
    fn from(step: usize) -> Self {
        CheckStep::Constant(step)
    }
}

impl fmt::Debug for CheckStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckStep::Constant(step) => f.debug_tuple("Constant").field(step).finish(),
            CheckStep::Function(_) => f.write_str("Function(..)"),
        }
    }
}

/// Efficient-mode controls.
#[derive(Debug, Clone)]
pub struct EfficientSearch {
    /// Candidate spacing
    pub check_step: CheckStep,
    /// Series at or below this length are searched exhaustively
    pub efficient_min: usize,
    /// Half-width of the search window around each coarse cut, as a fraction
    /// of the series length
    pub window: f64,
}

impl Default for EfficientSearch {
    fn default() -> Self {
        Self {
            check_step: CheckStep::default(),
            efficient_min: 10,
            window: 0.05,
        }
    }
}

/// How the noisy realizations of one scenario are searched.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchPlan {
    /// Every valid partition
    Exhaustive,
    /// Only partitions drawn from the per-cut position lists
    Restricted {
        /// Candidate positions of each cut
        positions: Vec<Vec<usize>>,
        /// Breakpoints of the noise-free series, if it had any
        coarse_cuts: Option<Vec<usize>>,
    },
}

impl SearchPlan {
    /// Search one realization under this plan.
    pub fn search(
        &self,
        search: &MultiPartSearch,
        data: &[f64],
    ) -> DetectionPowerResult<Option<MultiPartResult>> {
        match self {
            SearchPlan::Exhaustive => search.search(data),
            SearchPlan::Restricted { positions, .. } => search.search_within(data, positions),
        }
    }
}

impl EfficientSearch {
    /// Check the window controls.
    pub fn validate(&self) -> DetectionPowerResult<()> {
        validate_finite(self.window, "mpmk_window")?;
        if !(0.0..=1.0).contains(&self.window) {
            return Err(DetectionPowerError::configuration(
                "mpmk_window",
                format!("{} outside [0, 1]", self.window),
            ));
        }
        Ok(())
    }

    /// Plan the noisy searches from the noise-free series.
    ///
    /// Candidates of a restricted plan are a subset of the exhaustive ones, so
    /// efficient mode can only miss partitions, never invent them.
    pub fn plan(&self, search: &MultiPartSearch, truth: &[f64]) -> DetectionPowerResult<SearchPlan> {
        let n = truth.len();
        if n <= self.efficient_min || n < search.min_length() {
            return Ok(SearchPlan::Exhaustive);
        }

        let step = self.check_step.step_for(n);
        let m = search.min_part_size();
        let stepped: Vec<usize> = (m..=n - m).step_by(step).collect();
        let full = vec![stepped; search.nparts() - 1];

        match search.search_within(truth, &full)? {
            Some(coarse) => {
                let half = (self.window * n as f64).ceil() as usize;
                let positions = coarse
                    .cuts
                    .iter()
                    .map(|&c| {
                        let first = c - (half.min(c) / step) * step;
                        (first..=c + half).step_by(step).collect()
                    })
                    .collect();
                log::debug!(
                    "efficient search: coarse cuts {:?}, window ±{} step {}",
                    coarse.cuts,
                    half,
                    step
                );
                Ok(SearchPlan::Restricted {
                    positions,
                    coarse_cuts: Some(coarse.cuts),
                })
            }
            None => {
                log::debug!("efficient search: no breakpoints in noise-free series, stepping full range");
                Ok(SearchPlan::Restricted {
                    positions: full,
                    coarse_cuts: None,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search(pattern: &[i8], min_part_size: usize) -> MultiPartSearch {
        MultiPartSearch::new(
            pattern.len(),
            TrendSign::pattern(pattern).unwrap(),
            min_part_size,
            0.05,
        )
        .unwrap()
    }

    /// Rises for `up` points, then falls for `down` points.
    fn peak(up: usize, down: usize) -> Vec<f64> {
        let mut data: Vec<f64> = (0..up).map(|i| i as f64).collect();
        data.extend((0..down).map(|i| up as f64 - 2.0 - i as f64 * 0.8));
        data
    }

    #[test]
    fn test_candidates_lexicographic_and_bounded() {
        let s = search(&[1, 0, -1], 3);
        let all: Vec<Vec<usize>> = s.candidates(10).collect();
        assert_eq!(all, vec![vec![3, 6], vec![3, 7], vec![4, 7]]);

        let two = search(&[1, -1], 3);
        assert_eq!(two.candidates(10).count(), 5);
        assert_eq!(two.candidates(5).count(), 0);
    }

    #[test]
    fn test_candidates_within_positions() {
        let s = search(&[1, 0, -1], 3);
        let positions = vec![vec![6, 3, 3], vec![4, 9, 7]];
        let got: Vec<Vec<usize>> = s.candidates_within(12, &positions).unwrap().collect();
        assert_eq!(got, vec![vec![3, 7], vec![3, 9], vec![6, 9]]);
        assert!(s.candidates_within(12, &positions[..1]).is_err());
    }

    #[test]
    fn test_pattern_length_must_match_nparts() {
        let err = MultiPartSearch::new(3, TrendSign::pattern(&[1, -1]).unwrap(), 5, 0.05);
        assert!(matches!(err, Err(DetectionPowerError::Configuration { .. })));
        assert!(MultiPartSearch::new(2, TrendSign::pattern(&[1, -1]).unwrap(), 2, 0.05).is_err());
        assert!(TrendSign::from_i8(2).is_err());
    }

    #[test]
    fn test_search_finds_peak() {
        let data = peak(20, 20);
        let found = search(&[1, -1], 5).search(&data).unwrap().expect("peak should match");
        assert!(found.matches_expected);
        assert!((18..=22).contains(&found.cuts[0]), "cut {:?}", found.cuts);
        assert!(found.segments[0].z > 0.0 && found.segments[1].z < 0.0);
    }

    #[test]
    fn test_search_none_when_pattern_absent() {
        let rising: Vec<f64> = (0..40).map(|i| i as f64).collect();
        assert!(search(&[1, -1], 5).search(&rising).unwrap().is_none());
    }

    #[test]
    fn test_equal_scores_prefer_earliest_cuts() {
        let flat = vec![3.0; 30];
        let found = search(&[0, 0], 5).search(&flat).unwrap().unwrap();
        assert_eq!(found.cuts, vec![5]);
        assert_eq!(found.score, 0.0);
    }

    #[test]
    fn test_segment_cache_matches_direct() {
        let data: Vec<f64> = (0..25).map(|i| ((i * 7) % 11) as f64 + 0.1 * i as f64).collect();
        let mut cache = SegmentCache::new(&data);
        let order = [(0, 10), (0, 11), (1, 11), (2, 11), (2, 10), (5, 25), (4, 25), (4, 24)];
        for &(a, b) in &order {
            assert_eq!(cache.s(a, b), mann_kendall_s(&data[a..b]), "segment {}..{}", a, b);
        }
    }

    #[test]
    fn test_evaluate_rejects_short_segments() {
        let data = peak(20, 20);
        let s = search(&[1, -1], 5);
        assert!(s.evaluate(&data, &[3]).is_err());
        let r = s.evaluate(&data, &[20]).unwrap();
        assert_eq!(r.segments.len(), 2);
        assert_eq!(r.segments[1].end, 40);
    }

    #[test]
    fn test_plan_short_series_is_exhaustive() {
        let eff = EfficientSearch::default();
        let plan = eff.plan(&search(&[1, -1], 3), &peak(5, 5)).unwrap();
        assert_eq!(plan, SearchPlan::Exhaustive);
    }

    #[test]
    fn test_plan_windows_around_coarse_cut() {
        let eff = EfficientSearch {
            check_step: CheckStep::constant(2),
            efficient_min: 10,
            window: 0.1,
        };
        let data = peak(30, 30);
        match eff.plan(&search(&[1, -1], 5), &data).unwrap() {
            SearchPlan::Restricted {
                positions,
                coarse_cuts: Some(coarse),
            } => {
                let c = coarse[0];
                assert!(positions[0].contains(&c));
                assert!(positions[0].iter().all(|p| p.abs_diff(c) <= 6 && (p + 6 - c) % 2 == 0));
            }
            other => panic!("expected a windowed plan, got {:?}", other),
        }
    }

    #[test]
    fn test_plan_falls_back_to_stepped_full_range() {
        let eff = EfficientSearch::default();
        let flat = vec![1.0; 40];
        match eff.plan(&search(&[1, -1], 5), &flat).unwrap() {
            SearchPlan::Restricted {
                positions,
                coarse_cuts: None,
            } => assert_eq!(positions[0], (5..=35).collect::<Vec<_>>()),
            other => panic!("expected full-range fallback, got {:?}", other),
        }
    }

    #[test]
    fn test_check_step_function_matches_constant() {
        let data = peak(30, 30);
        let s = search(&[1, -1], 5);
        let constant = EfficientSearch {
            check_step: CheckStep::constant(3),
            ..Default::default()
        };
        let function = EfficientSearch {
            check_step: CheckStep::from_fn(|_| 3),
            ..Default::default()
        };
        assert_eq!(constant.plan(&s, &data).unwrap(), function.plan(&s, &data).unwrap());
        assert_eq!(CheckStep::from_fn(|_| 0).step_for(100), 1);
        assert_eq!(CheckStep::from_fn(|n| n / 10).step_for(100), 10);
    }

    #[test]
    fn test_restricted_search_is_subset_of_exhaustive() {
        let data = peak(25, 25);
        let s = search(&[1, -1], 5);
        let exhaustive = s.search(&data).unwrap();
        let within = s.search_within(&data, &[vec![7, 24, 41]]).unwrap();
        if within.is_some() {
            assert!(exhaustive.is_some());
            assert!(exhaustive.unwrap().score >= within.unwrap().score);
        }
    }
}
