use rayon::prelude::*;
use scroll_stitch_common::config::StitchConfig;
use scroll_stitch_common::frame::{Frame, GrayscaleBuffer};
use tracing::{debug, warn};

/// Search range for the overlap between a top and a bottom frame, in raw rows.
///
/// `max` is the shorter frame's height. `min` is the larger of the configured
/// floor and the configured fraction of `max`; for very short frames it can
/// exceed `max`, in which case no estimate is in bounds and [`verify_overlap`]
/// substitutes its fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlapBounds {
    pub min: u32,
    pub max: u32,
}

impl OverlapBounds {
    pub fn for_heights(top_height: u32, bottom_height: u32, config: &StitchConfig) -> Self {
        let max = top_height.min(bottom_height);
        let fraction = (config.min_overlap_fraction * max as f64).floor() as u32;
        Self {
            min: config.min_overlap_floor.max(fraction),
            max,
        }
    }

    pub fn contains(&self, overlap: u32) -> bool {
        overlap >= self.min && overlap <= self.max
    }

    /// Candidate overlaps in evaluation order: a coarse pass from `max` down to
    /// `min + fine_window`, then a fine pass from there down to `min`.
    pub fn candidates(&self, config: &StitchConfig) -> Vec<u32> {
        let coarse_step = config.coarse_step.max(1);
        let fine_step = config.fine_step.max(1);
        let fine_top = self.min.saturating_add(config.fine_window);
        let mut out = Vec::new();

        let mut o = self.max;
        while o > fine_top && o >= self.min {
            out.push(o);
            match o.checked_sub(coarse_step) {
                Some(next) => o = next,
                None => break,
            }
        }

        // Frames shorter than the fine window still get the full-overlap candidate.
        if self.max < fine_top && self.max >= self.min {
            out.push(self.max);
        }
        let mut o = fine_top;
        while o >= self.min {
            if o <= self.max && out.last() != Some(&o) {
                out.push(o);
            }
            match o.checked_sub(fine_step) {
                Some(next) => o = next,
                None => break,
            }
        }
        out
    }
}

/// Result of one overlap search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlapEstimate {
    pub overlap: u32,
    pub score: f64,
    /// Number of candidates scored before the search stopped.
    pub evaluated: usize,
    /// Whether a candidate scored below `good_enough_score`.
    pub early_exit: bool,
}

/// Estimate how many raw rows at the bottom of `top` repeat at the top of
/// `bottom`. Both frames must have the same raw width.
///
/// Only the last `max` rows of `top` can take part in an overlap, so only
/// those are converted to grayscale; a tall running composite costs no more
/// than a single frame. Never fails: if grayscale extraction fails the
/// minimum overlap is returned.
pub fn estimate_overlap(top: &Frame, bottom: &Frame, config: &StitchConfig) -> u32 {
    let bounds = OverlapBounds::for_heights(top.height(), bottom.height(), config);
    let tail_start = top.height() - bounds.max;

    let (top_tail, bottom_gray) = match (
        top.to_grayscale_rows(tail_start, bounds.max),
        bottom.to_grayscale(),
    ) {
        (Ok(t), Ok(b)) => (t, b),
        (Err(e), _) | (_, Err(e)) => {
            warn!(error = %e, min_overlap = bounds.min, "grayscale extraction failed, using minimum overlap");
            return bounds.min;
        }
    };

    search_overlap(&top_tail, &bottom_gray, bounds, config).overlap
}

/// Coarse-to-fine search over `bounds.candidates`, stopping at the first
/// candidate scoring below `good_enough_score`. `top_tail` holds at least the
/// last `bounds.max` rows of the top frame.
///
/// Buffers that cannot hold a `bounds.max` overlap, or differ in width, yield
/// `bounds.min`.
pub fn search_overlap(
    top_tail: &GrayscaleBuffer,
    bottom: &GrayscaleBuffer,
    bounds: OverlapBounds,
    config: &StitchConfig,
) -> OverlapEstimate {
    let mut estimate = OverlapEstimate {
        overlap: bounds.min,
        score: f64::INFINITY,
        evaluated: 0,
        early_exit: false,
    };

    if top_tail.width != bottom.width
        || top_tail.height < bounds.max
        || bottom.height < bounds.max
    {
        warn!(
            top_width = top_tail.width,
            bottom_width = bottom.width,
            top_rows = top_tail.height,
            bottom_rows = bottom.height,
            max_overlap = bounds.max,
            min_overlap = bounds.min,
            "grayscale buffers do not match frame geometry, using minimum overlap"
        );
        return estimate;
    }

    for overlap in bounds.candidates(config) {
        let score = score_overlap(top_tail, bottom, overlap, config);
        estimate.evaluated += 1;
        if score < estimate.score {
            estimate.score = score;
            estimate.overlap = overlap;
        }
        if score < config.good_enough_score {
            estimate.early_exit = true;
            break;
        }
    }

    debug!(
        best_overlap = estimate.overlap,
        best_score = format!("{:.2}", estimate.score),
        min_overlap = bounds.min,
        max_overlap = bounds.max,
        evaluated = estimate.evaluated,
        early_exit = estimate.early_exit,
        "overlap estimated"
    );
    estimate
}

/// Reject estimates outside `bounds`, substituting
/// `round(fallback_overlap_fraction * max)`.
pub fn verify_overlap(overlap: u32, bounds: OverlapBounds, config: &StitchConfig) -> u32 {
    if bounds.contains(overlap) {
        return overlap;
    }
    let fallback = (config.fallback_overlap_fraction * bounds.max as f64).round() as u32;
    warn!(
        overlap,
        min_overlap = bounds.min,
        max_overlap = bounds.max,
        fallback,
        "overlap estimate out of bounds, using fallback"
    );
    fallback
}

/// Mean squared grayscale difference between the bottom `overlap` rows of
/// `top` and the top `overlap` rows of `bottom`, over a sparse sample grid.
///
/// Returns infinity when nothing can be sampled.
pub fn score_overlap(
    top: &GrayscaleBuffer,
    bottom: &GrayscaleBuffer,
    overlap: u32,
    config: &StitchConfig,
) -> f64 {
    let width = top.width.min(bottom.width);
    if overlap == 0 || overlap > top.height || overlap > bottom.height || width == 0 {
        return f64::INFINITY;
    }

    let row_stride = config.row_stride.max(1);
    let col_step = (width / config.column_divisor.max(1)).max(1) as usize;
    let top_start = top.height - overlap;
    let sampled_rows = overlap.div_ceil(row_stride);

    let row_diff = |i: u32| -> (u64, u64) {
        let r = i * row_stride;
        let a = top.row(top_start + r);
        let b = bottom.row(r);
        let mut sum = 0u64;
        let mut count = 0u64;
        for x in (0..width as usize).step_by(col_step) {
            let d = a[x] as i32 - b[x] as i32;
            sum += (d * d) as u64;
            count += 1;
        }
        (sum, count)
    };

    // Integer partial sums, so the parallel reduction is exact.
    let (sum, count) = if config.parallel {
        (0..sampled_rows)
            .into_par_iter()
            .map(row_diff)
            .reduce(|| (0, 0), |x, y| (x.0 + y.0, x.1 + y.1))
    } else {
        (0..sampled_rows)
            .map(row_diff)
            .fold((0, 0), |x, y| (x.0 + y.0, x.1 + y.1))
    };

    if count == 0 {
        return f64::INFINITY;
    }
    sum as f64 / count as f64
}
