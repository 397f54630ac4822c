//! Dynamic time warping over feature sequences
//!
//! Computes a normalized alignment distance between two variable-length
//! sequences of K-dimensional feature vectors, optionally constrained to a
//! Sakoe-Chiba band around the diagonal and optionally returning the
//! alignment path.
//!
//! The cost matrix lives in a flat scratch buffer owned by the aligner and
//! reused across calls, so repeated comparisons against the same master do
//! not reallocate. The aligner never fails: degenerate inputs (an empty
//! sequence, a band too narrow to reach the far corner) yield an infinite
//! distance.

use tracing::trace;

/// Configuration for the aligner.
#[derive(Debug, Clone)]
pub struct DtwConfig {
    /// Band half-width as a fraction of `max(len1, len2)`; clamped to [0, 1].
    pub window_ratio: f32,

    /// Whether the Sakoe-Chiba band constraint applies.
    pub use_window: bool,

    /// Multiplier applied to each local distance.
    pub distance_weight: f32,

    /// Divide the final distance by `len1 + len2`.
    pub normalize_distance: bool,

    /// Use the unrolled inner loop for the local distance.
    pub enable_simd: bool,
}

impl Default for DtwConfig {
    fn default() -> Self {
        Self {
            window_ratio: 0.1,
            use_window: true,
            distance_weight: 1.0,
            normalize_distance: true,
            enable_simd: true,
        }
    }
}

/// One step of an alignment path, as 0-based (sequence1, sequence2) indices.
pub type PathStep = (usize, usize);

/// Direction tags stored during the forward pass.
const DIAGONAL: u8 = 0;
const UP: u8 = 1;
const LEFT: u8 = 2;

/// DTW comparator with reusable scratch storage.
pub struct DtwComparator {
    config: DtwConfig,
    cost: Vec<f32>,
    tags: Vec<u8>,
}

impl DtwComparator {
    pub fn new(config: DtwConfig) -> Self {
        Self {
            config,
            cost: Vec::new(),
            tags: Vec::new(),
        }
    }

    pub fn config(&self) -> &DtwConfig {
        &self.config
    }

    /// Replace the configuration wholesale.
    pub fn set_config(&mut self, mut config: DtwConfig) {
        config.window_ratio = config.window_ratio.clamp(0.0, 1.0);
        self.config = config;
    }

    /// Clamp `ratio` into [0, 1] and install it.
    pub fn set_window_ratio(&mut self, ratio: f32) {
        self.config.window_ratio = ratio.clamp(0.0, 1.0);
    }

    pub fn window_ratio(&self) -> f32 {
        self.config.window_ratio
    }

    /// Distance between two sequences.
    pub fn compare(&mut self, seq1: &[Vec<f32>], seq2: &[Vec<f32>]) -> f32 {
        self.compute(seq1, seq2, false).0
    }

    /// Distance plus the alignment path from `(0, 0)` to
    /// `(len1 - 1, len2 - 1)`, monotonic in both indices.
    pub fn compare_with_path(
        &mut self,
        seq1: &[Vec<f32>],
        seq2: &[Vec<f32>],
    ) -> (f32, Vec<PathStep>) {
        let (distance, path) = self.compute(seq1, seq2, true);
        (distance, path.unwrap_or_default())
    }

    fn compute(
        &mut self,
        seq1: &[Vec<f32>],
        seq2: &[Vec<f32>],
        want_path: bool,
    ) -> (f32, Option<Vec<PathStep>>) {
        let len1 = seq1.len();
        let len2 = seq2.len();

        if len1 == 0 || len2 == 0 {
            return (f32::INFINITY, want_path.then(Vec::new));
        }

        let cols = len2 + 1;
        let cells = (len1 + 1) * cols;
        self.cost.clear();
        self.cost.resize(cells, f32::INFINITY);
        if want_path {
            self.tags.clear();
            self.tags.resize(cells, DIAGONAL);
        }
        self.cost[0] = 0.0;

        let window = if self.config.use_window {
            (len1.max(len2) as f32 * self.config.window_ratio) as i64
        } else {
            i64::MAX
        };
        let weight = self.config.distance_weight;
        let unrolled = self.config.enable_simd;

        for i in 1..=len1 {
            let j_lo = ((i as i64 - window).max(1)) as usize;
            let j_hi = ((i as i64).saturating_add(window)).min(len2 as i64) as usize;
            if j_lo > j_hi {
                continue;
            }

            let row = i * cols;
            let prev_row = (i - 1) * cols;
            for j in j_lo..=j_hi {
                let local = weight * euclidean(&seq1[i - 1], &seq2[j - 1], unrolled);

                let diagonal = self.cost[prev_row + j - 1];
                let up = self.cost[prev_row + j];
                let left = self.cost[row + j - 1];

                // Tie-break order: diagonal beats up beats left.
                let (best, tag) = if diagonal <= up && diagonal <= left {
                    (diagonal, DIAGONAL)
                } else if up <= left {
                    (up, UP)
                } else {
                    (left, LEFT)
                };

                self.cost[row + j] = local + best;
                if want_path {
                    self.tags[row + j] = tag;
                }
            }
        }

        let mut distance = self.cost[len1 * cols + len2];
        if self.config.normalize_distance {
            distance /= (len1 + len2) as f32;
        }

        trace!(len1, len2, distance, "dtw compared");

        let path = if want_path && distance.is_finite() {
            let mut path = Vec::with_capacity(len1 + len2);
            let mut i = len1;
            let mut j = len2;
            while i > 0 && j > 0 {
                path.push((i - 1, j - 1));
                match self.tags[i * cols + j] {
                    DIAGONAL => {
                        i -= 1;
                        j -= 1;
                    }
                    UP => i -= 1,
                    _ => j -= 1,
                }
            }
            path.reverse();
            Some(path)
        } else {
            want_path.then(Vec::new)
        };

        (distance, path)
    }
}

impl std::fmt::Debug for DtwComparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DtwComparator")
            .field("config", &self.config)
            .finish()
    }
}

/// Euclidean distance between two feature vectors.
///
/// The unrolled variant processes four lanes per iteration, which the
/// auto-vectorizer turns into SIMD on targets that have it; the scalar
/// fold is kept for A/B comparison via `enable_simd`.
fn euclidean(a: &[f32], b: &[f32], unrolled: bool) -> f32 {
    let n = a.len().min(b.len());
    if !unrolled {
        return a[..n]
            .iter()
            .zip(&b[..n])
            .map(|(&x, &y)| (x - y) * (x - y))
            .sum::<f32>()
            .sqrt();
    }

    let mut acc = [0.0f32; 4];
    let chunks = n / 4;
    for c in 0..chunks {
        let base = c * 4;
        for lane in 0..4 {
            let d = a[base + lane] - b[base + lane];
            acc[lane] += d * d;
        }
    }
    let mut total: f32 = acc.iter().sum();
    for k in chunks * 4..n {
        let d = a[k] - b[k];
        total += d * d;
    }
    total.sqrt()
}
