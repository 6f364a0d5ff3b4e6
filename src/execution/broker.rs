use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::backtest::Direction;
use crate::store::trades::TradeStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Mkt,
    Lmt,
    Stp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub direction: Direction,
    pub quantity: i64,
    pub order_type: OrderType,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub net_liquidation: f64,
    pub buying_power: f64,
    /// Peak-to-now drawdown fraction of account equity.
    pub current_drawdown: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatusReport {
    pub status: TradeStatus,
    pub filled_quantity: i64,
    pub avg_fill_price: f64,
}

/// Broker failures split by retryability: transient errors (network, 5xx,
/// rate limit) may be retried with backoff; permanent errors never are.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("transient broker error: {0}")]
    Transient(String),
    #[error("permanent broker error: {0}")]
    Permanent(String),
}

#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn account(&self) -> Result<AccountSnapshot, BrokerError>;
    async fn submit_order(&self, order: &OrderRequest) -> Result<String, BrokerError>;
    async fn order_status(&self, order_id: &str) -> Result<OrderStatusReport, BrokerError>;
}

struct PaperState {
    account: AccountSnapshot,
    orders: HashMap<String, (OrderRequest, OrderStatusReport)>,
    untradable: HashSet<String>,
    transient_failures_remaining: u32,
}

/// In-process simulated broker: orders fill immediately at the limit (or
/// stop) price. Used when no broker URL is configured and by the tests.
pub struct PaperBroker {
    state: Mutex<PaperState>,
}

impl PaperBroker {
    pub fn new(net_liquidation: f64, buying_power: f64) -> Self {
        Self {
            state: Mutex::new(PaperState {
                account: AccountSnapshot {
                    net_liquidation,
                    buying_power,
                    current_drawdown: 0.0,
                },
                orders: HashMap::new(),
                untradable: HashSet::new(),
                transient_failures_remaining: 0,
            }),
        }
    }

    pub fn set_drawdown(&self, drawdown: f64) {
        self.state.lock().account.current_drawdown = drawdown;
    }

    pub fn mark_untradable(&self, symbol: &str) {
        self.state.lock().untradable.insert(symbol.to_uppercase());
    }

    /// Fail the next `count` submissions with a transient error.
    pub fn fail_next_submits(&self, count: u32) {
        self.state.lock().transient_failures_remaining = count;
    }

    pub fn submitted_order_count(&self) -> usize {
        self.state.lock().orders.len()
    }
}

#[async_trait]
impl BrokerClient for PaperBroker {
    async fn account(&self) -> Result<AccountSnapshot, BrokerError> {
        Ok(self.state.lock().account)
    }

    async fn submit_order(&self, order: &OrderRequest) -> Result<String, BrokerError> {
        let mut state = self.state.lock();
        if state.transient_failures_remaining > 0 {
            state.transient_failures_remaining -= 1;
            return Err(BrokerError::Transient("simulated outage".into()));
        }
        if state.untradable.contains(&order.symbol.to_uppercase()) {
            return Err(BrokerError::Permanent(format!(
                "SYMBOL_NOT_TRADABLE: {}",
                order.symbol
            )));
        }
        if order.quantity <= 0 {
            return Err(BrokerError::Permanent("quantity must be positive".into()));
        }
        let fill_price = order
            .limit_price
            .or(order.stop_price)
            .unwrap_or_default();
        let order_id = format!("paper-{}", Uuid::new_v4());
        state.orders.insert(
            order_id.clone(),
            (
                order.clone(),
                OrderStatusReport {
                    status: TradeStatus::Filled,
                    filled_quantity: order.quantity,
                    avg_fill_price: fill_price,
                },
            ),
        );
        Ok(order_id)
    }

    async fn order_status(&self, order_id: &str) -> Result<OrderStatusReport, BrokerError> {
        self.state
            .lock()
            .orders
            .get(order_id)
            .map(|(_, report)| report.clone())
            .ok_or_else(|| BrokerError::Permanent(format!("unknown order {order_id}")))
    }
}

/// HTTP adapter to a remote broker service.
pub struct HttpBroker {
    base_url: String,
    client: reqwest::Client,
}

impl HttpBroker {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn classify(status: reqwest::StatusCode, body: &str) -> BrokerError {
        if status.as_u16() == 429 || status.is_server_error() {
            BrokerError::Transient(format!("{status}: {body}"))
        } else {
            BrokerError::Permanent(format!("{status}: {body}"))
        }
    }
}

#[async_trait]
impl BrokerClient for HttpBroker {
    async fn account(&self) -> Result<AccountSnapshot, BrokerError> {
        let response = self
            .client
            .get(format!("{}/account", self.base_url))
            .send()
            .await
            .map_err(|e| BrokerError::Transient(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify(status, &body));
        }
        response
            .json()
            .await
            .map_err(|e| BrokerError::Permanent(format!("bad account payload: {e}")))
    }

    async fn submit_order(&self, order: &OrderRequest) -> Result<String, BrokerError> {
        let response = self
            .client
            .post(format!("{}/orders", self.base_url))
            .json(order)
            .send()
            .await
            .map_err(|e| BrokerError::Transient(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify(status, &body));
        }
        #[derive(Deserialize)]
        struct Submitted {
            order_id: String,
        }
        response
            .json::<Submitted>()
            .await
            .map(|s| s.order_id)
            .map_err(|e| BrokerError::Permanent(format!("bad submit payload: {e}")))
    }

    async fn order_status(&self, order_id: &str) -> Result<OrderStatusReport, BrokerError> {
        let response = self
            .client
            .get(format!("{}/orders/{order_id}", self.base_url))
            .send()
            .await
            .map_err(|e| BrokerError::Transient(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify(status, &body));
        }
        response
            .json()
            .await
            .map_err(|e| BrokerError::Permanent(format!("bad status payload: {e}")))
    }
}
