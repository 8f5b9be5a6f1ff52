use chrono::{DateTime, TimeZone, Utc};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::sync::Arc;

use crate::error::EngineError;
use crate::execution::FeedEvent;
use crate::models::{Candle, Tick};
use crate::Result;

const KLINES_PATH: &str = "/fapi/v1/klines";

// Type alias for the rate limiter to simplify signatures
type RestRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

fn millis_to_utc(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| EngineError::malformed(format!("timestamp out of range: {ms}")))
}

fn parse_price(field: &str, raw: &str) -> Result<f64> {
    raw.parse::<f64>()
        .map_err(|_| EngineError::malformed(format!("field `{field}` is not a number: {raw:?}")))
}

/// Kline payload of a `<symbol>@kline_<interval>` stream event
#[derive(Debug, Deserialize)]
struct KlinePayload {
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "x")]
    closed: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "e")]
enum StreamEvent {
    #[serde(rename = "kline")]
    Kline {
        #[serde(rename = "E")]
        event_time: i64,
        #[serde(rename = "k")]
        kline: KlinePayload,
    },
    #[serde(rename = "aggTrade")]
    AggTrade {
        #[serde(rename = "p")]
        price: String,
        #[serde(rename = "T")]
        trade_time: i64,
    },
}

/// Decode one text frame into feed events
///
/// Kline updates yield a Tick at the current close, plus a closed Candle when
/// the bucket is final. Unknown event types decode to nothing.
pub fn parse_stream_message(text: &str) -> Result<Vec<FeedEvent>> {
    let mut value: serde_json::Value = serde_json::from_str(text)?;

    // Combined streams wrap the payload as {"stream": ..., "data": {...}}
    if let Some(data) = value.get_mut("data") {
        value = data.take();
    }

    let kind = value
        .get("e")
        .and_then(|e| e.as_str())
        .ok_or_else(|| EngineError::malformed("missing event type"))?;
    if kind != "kline" && kind != "aggTrade" {
        tracing::debug!(event = kind, "Ignoring stream event");
        return Ok(Vec::new());
    }

    match serde_json::from_value::<StreamEvent>(value)? {
        StreamEvent::Kline { event_time, kline } => {
            let close = parse_price("c", &kline.close)?;
            let mut events = vec![FeedEvent::Tick(Tick::new(millis_to_utc(event_time)?, close))];
            if kline.closed {
                events.push(FeedEvent::CandleClosed(Candle {
                    open_time: millis_to_utc(kline.open_time)?,
                    open: parse_price("o", &kline.open)?,
                    high: parse_price("h", &kline.high)?,
                    low: parse_price("l", &kline.low)?,
                    close,
                    volume: parse_price("v", &kline.volume)?,
                    closed: true,
                }));
            }
            Ok(events)
        }
        StreamEvent::AggTrade { price, trade_time } => Ok(vec![FeedEvent::Tick(Tick::new(
            millis_to_utc(trade_time)?,
            parse_price("p", &price)?,
        ))]),
    }
}

fn parse_rest_kline(row: &[serde_json::Value]) -> Result<Candle> {
    if row.len() < 6 {
        return Err(EngineError::malformed("kline row too short"));
    }
    let open_time = row[0]
        .as_i64()
        .ok_or_else(|| EngineError::malformed("kline open time is not an integer"))?;
    let num = |idx: usize, name: &str| -> Result<f64> {
        match &row[idx] {
            serde_json::Value::String(s) => parse_price(name, s),
            serde_json::Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| EngineError::malformed(format!("field `{name}` out of range"))),
            _ => Err(EngineError::malformed(format!("field `{name}` has wrong type"))),
        }
    };

    Ok(Candle {
        open_time: millis_to_utc(open_time)?,
        open: num(1, "open")?,
        high: num(2, "high")?,
        low: num(3, "low")?,
        close: num(4, "close")?,
        volume: num(5, "volume")?,
        closed: true,
    })
}

/// Futures REST client for the one-shot history bootstrap
///
/// Cloneable; clones share the rate limiter.
#[derive(Clone)]
pub struct BinanceRestClient {
    client: Client,
    base_url: String,
    page_size: usize,
    rate_limiter: Arc<RestRateLimiter>,
}

impl BinanceRestClient {
    pub fn new(base_url: &str, page_size: usize, requests_per_sec: u32) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;

        let quota = Quota::per_second(NonZeroU32::new(requests_per_sec).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            page_size: page_size.max(1),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    async fn fetch_page(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
        end_time: Option<i64>,
    ) -> Result<Vec<Candle>> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}{}", self.base_url, KLINES_PATH);
        let mut request = self.client.get(&url).query(&[
            ("symbol", symbol.to_uppercase()),
            ("interval", interval.to_string()),
            ("limit", limit.to_string()),
        ]);
        if let Some(end) = end_time {
            request = request.query(&[("endTime", end.to_string())]);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(EngineError::Bootstrap(format!("klines API error ({status}): {body}")));
        }

        let rows: Vec<Vec<serde_json::Value>> = response.json().await?;
        rows.iter().map(|row| parse_rest_kline(row)).collect()
    }

    /// Fetch the last `count` closed candles, oldest first
    ///
    /// Pages backwards with `endTime`. The newest kline returned by the API is
    /// still forming and is dropped.
    pub async fn fetch_recent_closed(
        &self,
        symbol: &str,
        interval: &str,
        count: usize,
    ) -> Result<Vec<Candle>> {
        let wanted = count + 1;
        let mut candles: Vec<Candle> = Vec::with_capacity(wanted);
        let mut end_time: Option<i64> = None;

        while candles.len() < wanted {
            let limit = (wanted - candles.len()).min(self.page_size);
            let mut page = self.fetch_page(symbol, interval, limit, end_time).await?;
            if page.is_empty() {
                break;
            }
            page.sort_by_key(|c| c.open_time);
            end_time = Some(page[0].open_time.timestamp_millis() - 1);

            let fetched = page.len();
            page.append(&mut candles);
            candles = page;

            tracing::debug!(fetched, total = candles.len(), "Loaded kline page");
            if fetched < limit {
                break;
            }
        }

        candles.dedup_by_key(|c| c.open_time);
        candles.pop();
        let skip = candles.len().saturating_sub(count);
        let candles: Vec<Candle> = candles.into_iter().skip(skip).collect();

        tracing::info!(
            symbol = %symbol,
            candles = candles.len(),
            "📊 Bootstrapped closed candles"
        );
        Ok(candles)
    }
}
