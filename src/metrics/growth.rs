//! Day-over-day growth factor.
//!
//! With daily increments `d[k] = s[k+1] - s[k]`, the growth factor is
//! `g[k] = d[k+1] / d[k]`. A zero increment in the denominator would give
//! Inf or NaN; those entries are reported as 0. This understates the jump
//! right after a reporting gap, and downstream consumers rely on the
//! zero-filled values, so it stays that way.

/// Growth factors of a cumulative series; length `max(0, n - 2)`.
pub fn growth_factor(series: &[i64]) -> Vec<f64> {
    if series.len() < 3 {
        return Vec::new();
    }

    let deltas: Vec<f64> = series.windows(2).map(|w| (w[1] - w[0]) as f64).collect();
    deltas
        .windows(2)
        .map(|d| {
            let ratio = d[1] / d[0];
            if ratio.is_finite() { ratio } else { 0.0 }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubling_series_has_constant_growth() {
        assert_eq!(growth_factor(&[1, 2, 4, 8, 16]), vec![2.0, 2.0, 2.0]);
    }

    #[test]
    fn flat_series_is_zero_filled() {
        assert_eq!(growth_factor(&[0, 0, 0]), vec![0.0]);
        assert_eq!(growth_factor(&[5, 5, 5, 5]), vec![0.0, 0.0]);
    }

    #[test]
    fn gap_boundaries_become_zero() {
        // Increments: 2, 0, 3, 3 -> 0/2, 3/0 (inf), 3/3
        assert_eq!(growth_factor(&[1, 3, 3, 6, 9]), vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn short_series_have_no_growth() {
        assert!(growth_factor(&[]).is_empty());
        assert!(growth_factor(&[4]).is_empty());
        assert!(growth_factor(&[4, 9]).is_empty());
    }
}
