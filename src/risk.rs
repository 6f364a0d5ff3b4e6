use serde::{Deserialize, Serialize};

/// Portfolio read-model the gates evaluate against.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PortfolioState {
    pub net_liquidation: f64,
    pub open_positions: u32,
    /// Today's cumulative dollar risk across submitted trades.
    pub daily_risk_dollars: f64,
    /// Current peak-to-now drawdown fraction.
    pub drawdown: f64,
}

/// The trade the policy is asked to admit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProposedTrade {
    pub entry_price: f64,
    pub stop_loss: f64,
    pub risk_amount: f64,
    /// Risk as a fraction of net liquidation.
    pub risk_fraction: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationCode {
    RiskPerTradeExceeded,
    DailyLossExceeded,
    MaxPositionsExceeded,
    DrawdownExceeded,
    StopTooTight,
}

impl ViolationCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ViolationCode::RiskPerTradeExceeded => "RISK_PER_TRADE_EXCEEDED",
            ViolationCode::DailyLossExceeded => "DAILY_LOSS_EXCEEDED",
            ViolationCode::MaxPositionsExceeded => "MAX_POSITIONS_EXCEEDED",
            ViolationCode::DrawdownExceeded => "DRAWDOWN_EXCEEDED",
            ViolationCode::StopTooTight => "STOP_TOO_TIGHT",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub code: ViolationCode,
    pub message: String,
}

impl Violation {
    pub fn new(code: ViolationCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Versioned portfolio-level policy. Policies are immutable after
/// construction; a change ships as a new version string.
///
/// Evaluation is monotone: each rule appends independently, so adding a
/// failing condition never removes previously reported violations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskPolicy {
    pub version: String,
    pub max_risk_per_trade: f64,
    pub max_daily_loss: f64,
    pub max_open_positions: u32,
    pub max_drawdown: f64,
    pub min_stop_distance_pct: f64,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            version: "v1".to_string(),
            max_risk_per_trade: 0.02,
            max_daily_loss: 5_000.0,
            max_open_positions: 5,
            max_drawdown: 0.15,
            min_stop_distance_pct: 0.005,
        }
    }
}

impl RiskPolicy {
    pub fn with_version(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            ..Self::default()
        }
    }

    /// Empty set = pass.
    pub fn evaluate(&self, state: &PortfolioState, proposed: &ProposedTrade) -> Vec<Violation> {
        let mut violations = Vec::new();

        if proposed.risk_fraction > self.max_risk_per_trade {
            violations.push(Violation::new(
                ViolationCode::RiskPerTradeExceeded,
                format!(
                    "per-trade risk {:.4} exceeds limit {:.4}",
                    proposed.risk_fraction, self.max_risk_per_trade
                ),
            ));
        }

        if state.daily_risk_dollars + proposed.risk_amount > self.max_daily_loss {
            violations.push(Violation::new(
                ViolationCode::DailyLossExceeded,
                format!(
                    "daily risk {:.2} + {:.2} exceeds limit {:.2}",
                    state.daily_risk_dollars, proposed.risk_amount, self.max_daily_loss
                ),
            ));
        }

        if state.open_positions >= self.max_open_positions {
            violations.push(Violation::new(
                ViolationCode::MaxPositionsExceeded,
                format!(
                    "{} open positions at limit {}",
                    state.open_positions, self.max_open_positions
                ),
            ));
        }

        if state.drawdown > self.max_drawdown {
            violations.push(Violation::new(
                ViolationCode::DrawdownExceeded,
                format!(
                    "drawdown {:.4} exceeds limit {:.4}",
                    state.drawdown, self.max_drawdown
                ),
            ));
        }

        if proposed.entry_price > 0.0 {
            let stop_distance_pct =
                (proposed.entry_price - proposed.stop_loss).abs() / proposed.entry_price;
            if stop_distance_pct < self.min_stop_distance_pct {
                violations.push(Violation::new(
                    ViolationCode::StopTooTight,
                    format!(
                        "stop distance {:.4} below minimum {:.4}",
                        stop_distance_pct, self.min_stop_distance_pct
                    ),
                ));
            }
        }

        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_state() -> PortfolioState {
        PortfolioState {
            net_liquidation: 100_000.0,
            open_positions: 1,
            daily_risk_dollars: 500.0,
            drawdown: 0.02,
        }
    }

    fn ok_trade() -> ProposedTrade {
        ProposedTrade {
            entry_price: 190.0,
            stop_loss: 185.0,
            risk_amount: 1_000.0,
            risk_fraction: 0.01,
        }
    }

    #[test]
    fn clean_state_passes() {
        let violations = RiskPolicy::default().evaluate(&ok_state(), &ok_trade());
        assert!(violations.is_empty());
    }

    #[test]
    fn position_limit_at_boundary_violates() {
        let mut state = ok_state();
        state.open_positions = 5;
        let violations = RiskPolicy::default().evaluate(&state, &ok_trade());
        assert!(violations
            .iter()
            .any(|v| v.code == ViolationCode::MaxPositionsExceeded));
    }

    #[test]
    fn daily_loss_includes_proposed_risk() {
        let mut state = ok_state();
        state.daily_risk_dollars = 4_500.0; // + 1000 proposed crosses 5000
        let violations = RiskPolicy::default().evaluate(&state, &ok_trade());
        assert!(violations
            .iter()
            .any(|v| v.code == ViolationCode::DailyLossExceeded));
    }

    #[test]
    fn tight_stop_violates() {
        let mut trade = ok_trade();
        trade.stop_loss = 189.9; // ~0.05% away
        let violations = RiskPolicy::default().evaluate(&ok_state(), &trade);
        assert!(violations.iter().any(|v| v.code == ViolationCode::StopTooTight));
    }

    #[test]
    fn oversized_trade_risk_violates() {
        let mut trade = ok_trade();
        trade.risk_fraction = 0.05;
        let violations = RiskPolicy::default().evaluate(&ok_state(), &trade);
        assert!(violations
            .iter()
            .any(|v| v.code == ViolationCode::RiskPerTradeExceeded));
    }

    #[test]
    fn drawdown_violates() {
        let mut state = ok_state();
        state.drawdown = 0.20;
        let violations = RiskPolicy::default().evaluate(&state, &ok_trade());
        assert!(violations
            .iter()
            .any(|v| v.code == ViolationCode::DrawdownExceeded));
    }

    #[test]
    fn evaluation_is_monotone() {
        // Start with one violating condition, then add another; the first
        // violation must still be reported.
        let mut state = ok_state();
        state.open_positions = 5;
        let first = RiskPolicy::default().evaluate(&state, &ok_trade());
        assert_eq!(first.len(), 1);

        state.drawdown = 0.30;
        let second = RiskPolicy::default().evaluate(&state, &ok_trade());
        assert!(second.len() > first.len());
        for violation in &first {
            assert!(second.iter().any(|v| v.code == violation.code));
        }
    }

    #[test]
    fn codes_serialize_screaming_snake() {
        let json = serde_json::to_string(&ViolationCode::MaxPositionsExceeded).unwrap();
        assert_eq!(json, "\"MAX_POSITIONS_EXCEEDED\"");
        assert_eq!(
            ViolationCode::StopTooTight.as_str(),
            "STOP_TOO_TIGHT"
        );
    }
}
