//! Mean-per-bin aggregation of scattered `(x, y)` samples.
//!
//! `edges` lists the left edge of every bin; the right edge of the last bin is
//! extrapolated as `2 * edges[n-1] - edges[n-2]`. Bins are half-open
//! `[left, right)`. Empty bins yield NaN so that they can never be mistaken
//! for a measured zero.

/// Average `ys` over the bins of `xs` defined by ascending `edges`.
///
/// Pairs with a NaN `x` or `y` are ignored. Fewer than two edges give no
/// usable bin width, so every output is NaN.
pub fn bin(xs: &[f64], ys: &[f64], edges: &[f64]) -> Vec<f64> {
    let n = edges.len();
    if n < 2 {
        return vec![f64::NAN; n];
    }
    let last_edge = 2.0 * edges[n - 1] - edges[n - 2];

    let mut sums = vec![0.0; n];
    let mut counts = vec![0usize; n];
    for (&x, &y) in xs.iter().zip(ys) {
        if x.is_nan() || y.is_nan() || x < edges[0] || x >= last_edge {
            continue;
        }
        // First edge strictly greater than x, minus one, is the bin.
        // Non-finite edges can leave no edge at or below x.
        let Some(bin) = edges.partition_point(|&edge| edge <= x).checked_sub(1) else {
            continue;
        };
        sums[bin] += y;
        counts[bin] += 1;
    }

    sums.iter()
        .zip(&counts)
        .map(|(&sum, &count)| {
            if count == 0 {
                f64::NAN
            } else {
                sum / count as f64
            }
        })
        .collect()
}

/// `points` evenly spaced edges from `start` to `stop` inclusive.
pub fn linspace(start: f64, stop: f64, points: usize) -> Vec<f64> {
    match points {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (points - 1) as f64;
            (0..points).map(|k| start + step * k as f64).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-12, "{a} != {b}");
    }

    #[test]
    fn test_symmetric_two_bins() {
        let xs = [-1.0, -0.5, 0.0, 0.5, 1.0];
        let out = bin(&xs, &xs, &[-1.0, 0.0, 1.0]);

        assert_eq!(out.len(), 3);
        assert_close(out[0], -0.75);
        // [0, 1) holds 0.0 and 0.5
        assert_close(out[1], 0.25);
        // The last edge opens a bin [1, 2) holding 1.0
        assert_close(out[2], 1.0);
    }

    #[test]
    fn test_empty_bins_are_nan() {
        let out = bin(&[0.1, 0.15], &[3.0, 5.0], &[0.0, 1.0, 2.0, 3.0]);
        assert_close(out[0], 4.0);
        assert!(out[1].is_nan());
        assert!(out[2].is_nan());
        assert!(out[3].is_nan());
    }

    #[test]
    fn test_order_independent() {
        let xs = [0.9, -0.2, 0.3, -0.7, 0.1];
        let ys = [1.0, 2.0, 3.0, 4.0, 5.0];
        let edges = [-1.0, -0.5, 0.0, 0.5];
        let forward = bin(&xs, &ys, &edges);

        let rev_x: Vec<f64> = xs.iter().rev().copied().collect();
        let rev_y: Vec<f64> = ys.iter().rev().copied().collect();
        let backward = bin(&rev_x, &rev_y, &edges);

        for (a, b) in forward.iter().zip(&backward) {
            assert!((a.is_nan() && b.is_nan()) || (a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_rebinning_is_idempotent() {
        let edges = linspace(-1.0, 1.0, 9);
        let xs: Vec<f64> = (0..200).map(|k| -1.0 + k as f64 * 0.0101).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 3.0 * x).collect();
        let once = bin(&xs, &ys, &edges);
        let twice = bin(&edges, &once, &edges);

        for (a, b) in once.iter().zip(&twice) {
            assert!((a.is_nan() && b.is_nan()) || (a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_out_of_range_and_nan_ignored() {
        let out = bin(&[-5.0, f64::NAN, 0.5, 9.0], &[1.0, 1.0, 2.0, 1.0], &[0.0, 1.0]);
        assert_close(out[0], 2.0);
        assert!(out[1].is_nan());
    }

    #[test]
    fn test_degenerate_edges() {
        assert!(bin(&[0.0], &[1.0], &[]).is_empty());
        assert!(bin(&[0.0], &[1.0], &[0.0])[0].is_nan());
    }

    #[test]
    fn test_non_finite_edges_yield_nan() {
        let edges = linspace(-1.0, f64::INFINITY, 3);
        let out = bin(&[-0.5, 0.0, 0.5], &[1.0, 2.0, 3.0], &edges);
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|v| v.is_nan()));

        let out = bin(&[0.0], &[1.0], &[f64::NAN, 0.5, 1.0]);
        assert!(out.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_linspace() {
        assert_eq!(linspace(-1.0, 1.0, 5), vec![-1.0, -0.5, 0.0, 0.5, 1.0]);
        assert_eq!(linspace(2.0, 3.0, 1), vec![2.0]);
        assert!(linspace(0.0, 1.0, 0).is_empty());
    }
}
