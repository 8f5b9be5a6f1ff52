/// Bollinger Bands over the last `period` closes
///
/// Middle is the simple mean; upper/lower are `middle ± k * stddev`, using the
/// population standard deviation (divide by N).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

impl BollingerBands {
    pub fn bandwidth(&self) -> f64 {
        self.upper - self.lower
    }
}

/// Calculate the bands for the most recent window of `closes`
///
/// Returns None until at least `period` closes are available.
pub fn calculate_bollinger(closes: &[f64], period: usize, k: f64) -> Option<BollingerBands> {
    if period == 0 || closes.len() < period {
        return None;
    }

    let window = &closes[closes.len() - period..];
    let middle = window.iter().sum::<f64>() / period as f64;
    let variance = window
        .iter()
        .map(|c| {
            let diff = c - middle;
            diff * diff
        })
        .sum::<f64>()
        / period as f64;
    let stddev = variance.sqrt();

    Some(BollingerBands {
        upper: middle + k * stddev,
        middle,
        lower: middle - k * stddev,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_data() {
        assert!(calculate_bollinger(&[1.0, 2.0], 3, 2.0).is_none());
    }

    #[test]
    fn test_flat_prices_zero_bandwidth() {
        let bands = calculate_bollinger(&[100.0; 20], 20, 2.0).unwrap();
        assert_eq!(bands.middle, 100.0);
        assert_eq!(bands.bandwidth(), 0.0);
    }

    #[test]
    fn test_known_values() {
        // mean = 5, population variance = 4, stddev = 2
        let closes = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let bands = calculate_bollinger(&closes, 8, 2.0).unwrap();
        assert!((bands.middle - 5.0).abs() < 1e-12);
        assert!((bands.upper - 9.0).abs() < 1e-12);
        assert!((bands.lower - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_uses_latest_window() {
        let closes = [1000.0, 10.0, 10.0, 10.0];
        let bands = calculate_bollinger(&closes, 3, 2.0).unwrap();
        assert_eq!(bands.middle, 10.0);
    }
}
