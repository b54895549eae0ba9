//! Small numeric helpers shared by calibration and transport extraction.
//!
//! All functions return NaN instead of failing on empty or degenerate input.

/// Arithmetic mean.
pub fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return f64::NAN;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Population standard deviation.
pub fn std_dev(xs: &[f64]) -> f64 {
    let m = mean(xs);
    if m.is_nan() {
        return f64::NAN;
    }
    let var = xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / xs.len() as f64;
    var.sqrt()
}

/// Root mean square, `sqrt(mean(x²))`.
pub fn rms(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return f64::NAN;
    }
    (xs.iter().map(|x| x * x).sum::<f64>() / xs.len() as f64).sqrt()
}

/// Peak-to-peak span `max - min`.
pub fn peak_to_peak(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return f64::NAN;
    }
    let (min, max) = xs
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| {
            (lo.min(x), hi.max(x))
        });
    max - min
}

/// Ordinary least-squares fit `y = slope * x + intercept`.
///
/// Returns `(NaN, NaN)` for fewer than two points or when `x` has no spread.
pub fn linear_fit(xs: &[f64], ys: &[f64]) -> (f64, f64) {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return (f64::NAN, f64::NAN);
    }
    let (xs, ys) = (&xs[..n], &ys[..n]);
    let mx = mean(xs);
    let my = mean(ys);
    let (sxy, sxx) = xs
        .iter()
        .zip(ys)
        .fold((0.0, 0.0), |(sxy, sxx), (&x, &y)| {
            (sxy + (x - mx) * (y - my), sxx + (x - mx).powi(2))
        });
    if sxx == 0.0 {
        return (f64::NAN, f64::NAN);
    }
    let slope = sxy / sxx;
    (slope, my - slope * mx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_series() {
        let v = [5.0, 5.0, 5.0, 5.0];
        assert_eq!(mean(&v), 5.0);
        assert_eq!(std_dev(&v), 0.0);
        assert_eq!(peak_to_peak(&v), 0.0);
        assert_eq!(rms(&v), 5.0);
    }

    #[test]
    fn test_empty_is_nan() {
        assert!(mean(&[]).is_nan());
        assert!(std_dev(&[]).is_nan());
        assert!(rms(&[]).is_nan());
        assert!(peak_to_peak(&[]).is_nan());
        let (slope, icpt) = linear_fit(&[], &[]);
        assert!(slope.is_nan() && icpt.is_nan());
    }

    #[test]
    fn test_linear_fit_exact_line() {
        let xs: Vec<f64> = (0..50).map(|k| -1.0 + k as f64 * 0.04).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 2.5 * x - 0.3).collect();
        let (slope, icpt) = linear_fit(&xs, &ys);
        assert!((slope - 2.5).abs() < 1e-12);
        assert!((icpt + 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_linear_fit_without_spread() {
        let (slope, _) = linear_fit(&[1.0, 1.0, 1.0], &[0.0, 1.0, 2.0]);
        assert!(slope.is_nan());
    }

    #[test]
    fn test_std_dev_population() {
        assert!((std_dev(&[1.0, 3.0]) - 1.0).abs() < 1e-12);
    }
}
