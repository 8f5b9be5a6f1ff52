/// Relative Strength Index with Wilder smoothing
///
/// The first `period` price changes are averaged to seed the gain/loss
/// averages; every later change updates them as
/// `avg = (avg * (period - 1) + new) / period`.
///
/// Values:
/// - RSI > 70: Overbought
/// - RSI < 30: Oversold
///
/// An average loss of zero yields 100, which includes a flat price series.
pub fn calculate_rsi(prices: &[f64], period: usize) -> Option<f64> {
    let mut rsi = WilderRsi::new(period);
    let mut last = None;
    for &price in prices {
        last = rsi.next(price);
    }
    last
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

/// Incremental Wilder RSI, fed one close at a time
#[derive(Debug, Clone)]
pub struct WilderRsi {
    period: usize,
    prev_close: Option<f64>,
    changes_seen: usize,
    seed_gain: f64,
    seed_loss: f64,
    avg_gain: f64,
    avg_loss: f64,
    value: Option<f64>,
}

impl WilderRsi {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            prev_close: None,
            changes_seen: 0,
            seed_gain: 0.0,
            seed_loss: 0.0,
            avg_gain: 0.0,
            avg_loss: 0.0,
            value: None,
        }
    }

    /// Feed the next close; returns the RSI once `period` changes are known
    pub fn next(&mut self, close: f64) -> Option<f64> {
        let Some(prev) = self.prev_close.replace(close) else {
            return None;
        };

        let change = close - prev;
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        self.changes_seen += 1;

        let period = self.period as f64;
        if self.changes_seen < self.period {
            self.seed_gain += gain;
            self.seed_loss += loss;
            return None;
        }

        if self.changes_seen == self.period {
            self.avg_gain = (self.seed_gain + gain) / period;
            self.avg_loss = (self.seed_loss + loss) / period;
        } else {
            self.avg_gain = (self.avg_gain * (period - 1.0) + gain) / period;
            self.avg_loss = (self.avg_loss * (period - 1.0) + loss) / period;
        }

        let rsi = rsi_from_averages(self.avg_gain, self.avg_loss);
        self.value = Some(rsi);
        Some(rsi)
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub fn period(&self) -> usize {
        self.period
    }
}
