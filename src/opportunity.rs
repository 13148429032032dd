//! Arbitrage opportunity model

use alloy_primitives::{Address, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwapAction {
    Swap,
}

/// One leg of a route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteStep {
    pub venue: String,
    pub token_in: Address,
    pub amount_in: U256,
    pub token_out: Address,
    pub amount_out: U256,
    pub action: SwapAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyType {
    CrossVenue,
    Triangular,
}

/// Only `Detected` is produced here; the rest belong to the execution side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpportunityStatus {
    Detected,
    Validated,
    Submitted,
    Executed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrageOpportunity {
    pub id: Uuid,
    pub route: Vec<RouteStep>,

    /// Gross profit, native wei
    pub expected_profit: U256,
    /// `expected_profit - gas_cost`
    pub expected_profit_after_gas: U256,
    /// Raw price spread in percent (0.05 = 0.05%)
    pub expected_profit_percentage: f64,

    /// Gas units for the whole route
    pub gas_estimate: u64,
    /// Unbuffered cost in wei
    pub gas_cost: U256,
    pub gas_price: u128,
    pub priority_fee: u128,

    pub strategy: StrategyType,
    pub confidence: f64,
    pub risk_score: f64,
    pub status: OpportunityStatus,
    pub created_at: DateTime<Utc>,
    pub metadata: BTreeMap<String, String>,
}

impl ArbitrageOpportunity {
    /// Token the route starts with
    pub fn input_token(&self) -> Option<Address> {
        self.route.first().map(|s| s.token_in)
    }

    pub fn input_amount(&self) -> U256 {
        self.route.first().map(|s| s.amount_in).unwrap_or_default()
    }

    /// Whether `token` appears anywhere in the route
    pub fn touches(&self, token: &Address) -> bool {
        self.route
            .iter()
            .any(|s| s.token_in == *token || s.token_out == *token)
    }
}
