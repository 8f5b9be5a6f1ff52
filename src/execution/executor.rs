use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::EngineError;
use crate::models::Direction;
use crate::Result;

/// Order handed to the execution collaborator
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub direction: Direction,
    pub stake: f64,
    pub leverage: u32,
    /// Price the signal fired at; paper fills use it directly
    pub reference_price: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub quantity: f64,
    pub avg_price: f64,
    pub order_id: String,
}

/// Places orders on behalf of the engine
///
/// An `Err` means no position may be opened for the signal.
#[async_trait]
pub trait TradeExecutor: Send + Sync {
    async fn execute(&self, order: &OrderRequest) -> Result<Fill>;
}

/// Fills every order at the signal price without touching a venue
#[derive(Debug, Default)]
pub struct PaperExecutor {
    next_id: AtomicU64,
}

impl PaperExecutor {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TradeExecutor for PaperExecutor {
    async fn execute(&self, order: &OrderRequest) -> Result<Fill> {
        if !(order.reference_price.is_finite() && order.reference_price > 0.0) {
            return Err(EngineError::Execution(format!(
                "invalid reference price {}",
                order.reference_price
            )));
        }
        if order.stake <= 0.0 {
            return Err(EngineError::Execution("stake must be positive".to_string()));
        }

        let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let notional = order.stake * f64::from(order.leverage.max(1));
        let fill = Fill {
            quantity: notional / order.reference_price,
            avg_price: order.reference_price,
            order_id: format!("paper-{n}"),
        };

        tracing::debug!(
            symbol = %order.symbol,
            direction = %order.direction,
            stake = order.stake,
            order_id = %fill.order_id,
            "Paper fill"
        );

        Ok(fill)
    }
}
