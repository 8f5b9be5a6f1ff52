use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::api::{parse_stream_message, BinanceRestClient};
use crate::error::EngineError;
use crate::models::{Candle, Tick};
use crate::Result;

/// What the feed reader reports to the engine
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Connected,
    Disconnected { reason: String },
    Tick(Tick),
    CandleClosed(Candle),
    /// Recent closed history fetched right after (re)connecting
    Bootstrap(Vec<Candle>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Kline,
    AggTrade,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    pub ws_base_url: String,
    pub rest_base_url: String,
    pub stream: StreamKind,
    pub interval: String,
    pub bootstrap_count: usize,
    pub idle_timeout_secs: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub page_size: usize,
    pub rest_requests_per_sec: u32,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            ws_base_url: "wss://fstream.binance.com/ws".to_string(),
            rest_base_url: "https://fapi.binance.com".to_string(),
            stream: StreamKind::Kline,
            interval: "1m".to_string(),
            bootstrap_count: 1000,
            idle_timeout_secs: 30,
            backoff_base_ms: 1000,
            backoff_max_ms: 30_000,
            page_size: 1500,
            rest_requests_per_sec: 5,
        }
    }
}

impl FeedSettings {
    pub fn validate(&self) -> Result<()> {
        if self.ws_base_url.is_empty() || self.rest_base_url.is_empty() {
            return Err(EngineError::config("feed urls must not be empty"));
        }
        if self.interval.is_empty() {
            return Err(EngineError::config("feed interval must not be empty"));
        }
        if self.idle_timeout_secs == 0 {
            return Err(EngineError::config("idle_timeout_secs must be non-zero"));
        }
        if self.backoff_base_ms == 0 || self.backoff_max_ms < self.backoff_base_ms {
            return Err(EngineError::config(
                "backoff_base_ms must be non-zero and not above backoff_max_ms",
            ));
        }
        Ok(())
    }
}

/// Exponential reconnect backoff with up to 10% jitter
#[derive(Debug, Clone)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
    attempt: u32,
}

impl Backoff {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms,
            max_ms,
            attempt: 0,
        }
    }

    /// Delay before the given attempt (1-based), without jitter
    pub fn base_delay(&self, attempt: u32) -> u64 {
        let exp = attempt.saturating_sub(1).min(30);
        self.base_ms.saturating_mul(1u64 << exp).min(self.max_ms)
    }

    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let delay = self.base_delay(self.attempt);
        let jitter = rand::thread_rng().gen_range(0..=delay / 10);
        Duration::from_millis(delay + jitter)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Streaming subscription for one symbol, reconnecting until shut down
pub struct PriceFeed {
    symbol: String,
    settings: FeedSettings,
    rest: BinanceRestClient,
}

impl PriceFeed {
    pub fn new(symbol: &str, settings: FeedSettings) -> Result<Self> {
        settings.validate()?;
        let rest = BinanceRestClient::new(
            &settings.rest_base_url,
            settings.page_size,
            settings.rest_requests_per_sec,
        )?;
        Ok(Self {
            symbol: symbol.to_lowercase(),
            settings,
            rest,
        })
    }

    pub fn stream_url(&self) -> String {
        let base = self.settings.ws_base_url.trim_end_matches('/');
        match self.settings.stream {
            StreamKind::Kline => format!("{}/{}@kline_{}", base, self.symbol, self.settings.interval),
            StreamKind::AggTrade => format!("{}/{}@aggTrade", base, self.symbol),
        }
    }

    /// Reader loop: connect, forward events, reconnect on any transport error
    ///
    /// Returns once `shutdown` flips to true or the receiver is dropped.
    pub async fn run(self, tx: mpsc::Sender<FeedEvent>, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = Backoff::new(self.settings.backoff_base_ms, self.settings.backoff_max_ms);

        loop {
            if *shutdown.borrow() || tx.is_closed() {
                break;
            }

            match self.run_connection(&tx, &mut shutdown, &mut backoff).await {
                Ok(()) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Feed connection lost");
                    if tx
                        .send(FeedEvent::Disconnected {
                            reason: e.to_string(),
                        })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }

            let delay = backoff.next_delay();
            tracing::info!(
                attempt = backoff.attempt(),
                delay_ms = delay.as_millis() as u64,
                "🔄 Reconnecting"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!("Feed reader stopped");
    }

    /// One connection lifetime
    ///
    /// Ok(()) means shutdown was requested; Err means reconnect.
    async fn run_connection(
        &self,
        tx: &mpsc::Sender<FeedEvent>,
        shutdown: &mut watch::Receiver<bool>,
        backoff: &mut Backoff,
    ) -> Result<()> {
        let url = self.stream_url();
        tracing::info!(url = %url, "🔗 Connecting to market stream");

        let (ws, _) = connect_async(url.as_str()).await?;
        backoff.reset();
        if tx.send(FeedEvent::Connected).await.is_err() {
            return Ok(());
        }
        tracing::info!("✅ Market stream connected");

        match self
            .rest
            .fetch_recent_closed(&self.symbol, &self.settings.interval, self.settings.bootstrap_count)
            .await
        {
            Ok(candles) => {
                if tx.send(FeedEvent::Bootstrap(candles)).await.is_err() {
                    return Ok(());
                }
            }
            Err(e) => {
                let e = EngineError::Bootstrap(e.to_string());
                tracing::warn!(error = %e, "History bootstrap failed, starting cold");
            }
        }

        let (mut write, mut read) = ws.split();
        let idle = Duration::from_secs(self.settings.idle_timeout_secs);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                next = tokio::time::timeout(idle, read.next()) => {
                    let message = match next {
                        Err(_) => {
                            return Err(EngineError::Transport(format!(
                                "no message for {}s",
                                idle.as_secs()
                            )))
                        }
                        Ok(None) => return Err(EngineError::Transport("stream ended".to_string())),
                        Ok(Some(message)) => message?,
                    };

                    match message {
                        Message::Text(text) => match parse_stream_message(&text) {
                            Ok(events) => {
                                for event in events {
                                    if tx.send(event).await.is_err() {
                                        return Ok(());
                                    }
                                }
                            }
                            Err(e) => tracing::warn!(error = %e, "Skipping feed message"),
                        },
                        Message::Ping(payload) => write.send(Message::Pong(payload)).await?,
                        Message::Close(frame) => {
                            return Err(EngineError::Transport(format!(
                                "closed by server: {frame:?}"
                            )))
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}
