use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::store::signals::{SignalStatus, StoredSignal};
use crate::strategy::SignalType;

/// Qualitative tier derived from numeric confidence by fixed bands:
/// [0, 0.5) weak, [0.5, 0.75) moderate, [0.75, 1] strong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strength {
    Weak,
    Moderate,
    Strong,
}

impl Strength {
    pub fn from_confidence(confidence: f64) -> Strength {
        if confidence >= 0.75 {
            Strength::Strong
        } else if confidence >= 0.5 {
            Strength::Moderate
        } else {
            Strength::Weak
        }
    }
}

/// Canonical filterable signal envelope handed to in-process subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalProduct {
    pub signal: StoredSignal,
    pub strength: Strength,
}

impl SignalProduct {
    pub fn from_stored(signal: StoredSignal) -> Self {
        let strength = Strength::from_confidence(signal.confidence);
        Self { signal, strength }
    }
}

/// Predicate filter a subscription carries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalFilterSpec {
    pub symbol: Option<String>,
    pub strategy_id: Option<String>,
    pub direction: Option<SignalType>,
    pub min_confidence: Option<f64>,
    pub min_strength: Option<Strength>,
    /// Drop cancelled/expired envelopes. Defaults on.
    #[serde(default = "default_true")]
    pub exclude_terminated: bool,
}

fn default_true() -> bool {
    true
}

impl SignalFilterSpec {
    pub fn matches(&self, product: &SignalProduct) -> bool {
        let signal = &product.signal;
        if self.exclude_terminated
            && matches!(signal.status, SignalStatus::Cancelled | SignalStatus::Expired)
        {
            return false;
        }
        if let Some(symbol) = &self.symbol {
            if !signal.symbol.eq_ignore_ascii_case(symbol) {
                return false;
            }
        }
        if let Some(strategy) = &self.strategy_id {
            if signal.strategy_id.as_deref() != Some(strategy.as_str()) {
                return false;
            }
        }
        if let Some(direction) = self.direction {
            if signal.signal_type != direction {
                return false;
            }
        }
        if let Some(min) = self.min_confidence {
            if signal.confidence < min {
                return false;
            }
        }
        if let Some(min) = self.min_strength {
            if product.strength < min {
                return false;
            }
        }
        true
    }
}

/// `Signal -> Option<Signal>`: returning `None` drops the signal.
pub type Middleware = Arc<dyn Fn(SignalProduct) -> Option<SignalProduct> + Send + Sync>;

struct Subscription {
    filter: SignalFilterSpec,
    sink: mpsc::UnboundedSender<SignalProduct>,
}

#[derive(Default)]
struct PublisherInner {
    subscriptions: Vec<Subscription>,
    middleware: Vec<Middleware>,
}

/// Synchronous in-process fan-out. Middleware runs in registration order
/// before delivery; subscribers receive matching envelopes in registration
/// order. Lists are copied under the lock, fan-out happens outside it.
#[derive(Default)]
pub struct SignalPublisher {
    inner: Mutex<PublisherInner>,
    published: std::sync::atomic::AtomicU64,
    dropped: std::sync::atomic::AtomicU64,
}

impl SignalPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, filter: SignalFilterSpec) -> mpsc::UnboundedReceiver<SignalProduct> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().subscriptions.push(Subscription {
            filter,
            sink: tx,
        });
        rx
    }

    pub fn add_middleware(&self, middleware: Middleware) {
        self.inner.lock().middleware.push(middleware);
    }

    /// Returns the number of subscribers the envelope reached; `None` means
    /// a middleware dropped it.
    pub fn publish(&self, product: SignalProduct) -> Option<usize> {
        let (middleware, sinks): (Vec<Middleware>, Vec<(SignalFilterSpec, _)>) = {
            let inner = self.inner.lock();
            (
                inner.middleware.clone(),
                inner
                    .subscriptions
                    .iter()
                    .map(|s| (s.filter.clone(), s.sink.clone()))
                    .collect(),
            )
        };

        let mut current = product;
        for stage in &middleware {
            match stage(current) {
                Some(next) => current = next,
                None => {
                    self.dropped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    return None;
                }
            }
        }

        let mut delivered = 0usize;
        for (filter, sink) in &sinks {
            if filter.matches(&current) && sink.send(current.clone()).is_ok() {
                delivered += 1;
            }
        }
        self.published.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Some(delivered)
    }

    pub fn published_count(&self) -> u64 {
        self.published.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn stored(confidence: f64, symbol: &str) -> StoredSignal {
        StoredSignal {
            id: Uuid::new_v4(),
            strategy_id: Some("rsi_momentum_v1".into()),
            artifact_id: None,
            artifact_hash: None,
            symbol: symbol.into(),
            signal_type: SignalType::Buy,
            confidence,
            entry_price: Some(190.0),
            stop_loss: Some(185.0),
            take_profits: vec![200.0],
            reason: String::new(),
            indicators: serde_json::Value::Null,
            status: SignalStatus::Pending,
            correlation_id: None,
            created_at: Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap(),
            expires_at: None,
        }
    }

    #[test]
    fn strength_bands() {
        assert_eq!(Strength::from_confidence(0.0), Strength::Weak);
        assert_eq!(Strength::from_confidence(0.49), Strength::Weak);
        assert_eq!(Strength::from_confidence(0.5), Strength::Moderate);
        assert_eq!(Strength::from_confidence(0.74), Strength::Moderate);
        assert_eq!(Strength::from_confidence(0.75), Strength::Strong);
        assert_eq!(Strength::from_confidence(1.0), Strength::Strong);
    }

    #[test]
    fn strength_is_monotone_in_confidence() {
        let mut last = Strength::Weak;
        for step in 0..=100 {
            let strength = Strength::from_confidence(f64::from(step) / 100.0);
            assert!(strength >= last);
            last = strength;
        }
    }

    #[test]
    fn filter_by_symbol_and_confidence() {
        let product = SignalProduct::from_stored(stored(0.8, "AAPL"));
        let mut filter = SignalFilterSpec {
            symbol: Some("aapl".into()),
            min_confidence: Some(0.7),
            ..SignalFilterSpec::default()
        };
        assert!(filter.matches(&product));
        filter.min_confidence = Some(0.9);
        assert!(!filter.matches(&product));
    }

    #[test]
    fn filter_excludes_terminated_by_default() {
        let mut signal = stored(0.8, "AAPL");
        signal.status = SignalStatus::Cancelled;
        let product = SignalProduct::from_stored(signal);
        assert!(!SignalFilterSpec::default().matches(&product));
        let permissive = SignalFilterSpec {
            exclude_terminated: false,
            ..SignalFilterSpec::default()
        };
        assert!(permissive.matches(&product));
    }

    #[test]
    fn publish_fans_out_to_matching_subscribers() {
        let publisher = SignalPublisher::new();
        let mut aapl_rx = publisher.subscribe(SignalFilterSpec {
            symbol: Some("AAPL".into()),
            ..SignalFilterSpec::default()
        });
        let mut msft_rx = publisher.subscribe(SignalFilterSpec {
            symbol: Some("MSFT".into()),
            ..SignalFilterSpec::default()
        });

        let delivered = publisher
            .publish(SignalProduct::from_stored(stored(0.8, "AAPL")))
            .unwrap();
        assert_eq!(delivered, 1);
        assert!(aapl_rx.try_recv().is_ok());
        assert!(msft_rx.try_recv().is_err());
    }

    #[test]
    fn middleware_can_transform_and_drop() {
        let publisher = SignalPublisher::new();
        let mut rx = publisher.subscribe(SignalFilterSpec::default());

        publisher.add_middleware(Arc::new(|mut product| {
            product.signal.reason = "tagged".into();
            Some(product)
        }));
        publisher.add_middleware(Arc::new(|product| {
            if product.signal.confidence < 0.5 {
                None
            } else {
                Some(product)
            }
        }));

        assert!(publisher
            .publish(SignalProduct::from_stored(stored(0.8, "AAPL")))
            .is_some());
        assert_eq!(rx.try_recv().unwrap().signal.reason, "tagged");

        assert!(publisher
            .publish(SignalProduct::from_stored(stored(0.2, "AAPL")))
            .is_none());
        assert!(rx.try_recv().is_err());
        assert_eq!(publisher.published_count(), 1);
        assert_eq!(publisher.dropped_count(), 1);
    }

    #[test]
    fn strength_filter_uses_ordering() {
        let product = SignalProduct::from_stored(stored(0.6, "AAPL"));
        let wants_strong = SignalFilterSpec {
            min_strength: Some(Strength::Strong),
            ..SignalFilterSpec::default()
        };
        let wants_moderate = SignalFilterSpec {
            min_strength: Some(Strength::Moderate),
            ..SignalFilterSpec::default()
        };
        assert!(!wants_strong.matches(&product));
        assert!(wants_moderate.matches(&product));
    }
}
