//! Trade submission
//!
//! The detector only reports. Turning a stored opportunity into a trade goes
//! through `TradeService`, which enforces the execution mode and the kill
//! switch, sizes the input with the allocator and hands the route to a
//! `TradeExecutor`.

use alloy_primitives::{B256, U256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::allocator::Allocator;
use crate::config::{Config, ExecutionMode};
use crate::opportunity::{ArbitrageOpportunity, RouteStep};
use crate::store::OpportunityStore;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("trading is disabled ({0})")]
    TradingDisabled(String),

    #[error("opportunity {0} not found")]
    OpportunityNotFound(Uuid),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    /// Built and checked, nothing sent
    Simulated,
    Submitted,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: Uuid,
    pub opportunity_id: Uuid,
    pub status: TradeStatus,
    pub transaction_hash: Option<B256>,
    /// Input amount actually used, smallest units of the input token
    pub amount: U256,
    /// Route output minus input, scaled to `amount`
    pub net_profit: U256,
    pub created_at: DateTime<Utc>,
}

/// Something that can carry out a route
#[async_trait]
pub trait TradeExecutor: Send + Sync {
    async fn execute(
        &self,
        opportunity_id: Uuid,
        route: &[RouteStep],
        amount: U256,
        options: &BTreeMap<String, String>,
    ) -> Result<TradeRecord, ExecutionError>;
}

/// Walks the route proportionally and reports what the trade would return
#[derive(Debug, Default, Clone)]
pub struct DryRunExecutor;

impl DryRunExecutor {
    /// Expected output of `route` when entered with `amount`
    fn project(route: &[RouteStep], amount: U256) -> Result<U256, ExecutionError> {
        let mut current = amount;
        for (i, step) in route.iter().enumerate() {
            if i > 0 && step.token_in != route[i - 1].token_out {
                return Err(ExecutionError::ExecutionFailed(format!("route breaks at step {}", i)));
            }
            if step.amount_in.is_zero() {
                return Err(ExecutionError::ExecutionFailed(format!("step {} has no input", i)));
            }
            current = current.saturating_mul(step.amount_out) / step.amount_in;
        }
        Ok(current)
    }
}

#[async_trait]
impl TradeExecutor for DryRunExecutor {
    async fn execute(
        &self,
        opportunity_id: Uuid,
        route: &[RouteStep],
        amount: U256,
        options: &BTreeMap<String, String>,
    ) -> Result<TradeRecord, ExecutionError> {
        if route.is_empty() {
            return Err(ExecutionError::ExecutionFailed("empty route".to_string()));
        }
        let out = Self::project(route, amount)?;
        let net_profit = out.saturating_sub(amount);

        info!("🔬 DRY RUN: {} steps, in {} -> out {}", route.len(), amount, out);
        if !options.is_empty() {
            info!("   Options: {:?}", options);
        }

        Ok(TradeRecord {
            id: Uuid::new_v4(),
            opportunity_id,
            status: TradeStatus::Simulated,
            transaction_hash: None,
            amount,
            net_profit,
            created_at: Utc::now(),
        })
    }
}

pub struct TradeService {
    store: Arc<OpportunityStore>,
    allocator: Arc<Allocator>,
    executor: Arc<dyn TradeExecutor>,
    mode: ExecutionMode,
    emergency_stop: bool,
}

impl TradeService {
    pub fn new(
        store: Arc<OpportunityStore>,
        allocator: Arc<Allocator>,
        executor: Arc<dyn TradeExecutor>,
        mode: ExecutionMode,
        emergency_stop: bool,
    ) -> Self {
        Self {
            store,
            allocator,
            executor,
            mode,
            emergency_stop,
        }
    }

    pub fn from_config(
        config: &Config,
        store: Arc<OpportunityStore>,
        allocator: Arc<Allocator>,
        executor: Arc<dyn TradeExecutor>,
    ) -> Self {
        Self::new(store, allocator, executor, config.execution_mode, config.emergency_stop)
    }

    fn check_enabled(&self) -> Result<(), ExecutionError> {
        if self.emergency_stop {
            return Err(ExecutionError::TradingDisabled("emergency stop is active".to_string()));
        }
        if self.mode == ExecutionMode::Simulation {
            return Err(ExecutionError::TradingDisabled(format!("execution mode is {}", self.mode)));
        }
        Ok(())
    }

    /// Execute a stored opportunity.
    ///
    /// `amount` defaults to the route's own input amount; either way it is
    /// clamped to the allocator's range for the input token.
    pub async fn submit(
        &self,
        id: Uuid,
        amount: Option<U256>,
        options: BTreeMap<String, String>,
    ) -> Result<TradeRecord, ExecutionError> {
        self.check_enabled()?;

        let opportunity = self
            .store
            .get_by_id(&id)
            .ok_or(ExecutionError::OpportunityNotFound(id))?;
        self.submit_opportunity(&opportunity, amount, options).await
    }

    async fn submit_opportunity(
        &self,
        opportunity: &ArbitrageOpportunity,
        amount: Option<U256>,
        options: BTreeMap<String, String>,
    ) -> Result<TradeRecord, ExecutionError> {
        let token = opportunity
            .input_token()
            .ok_or_else(|| ExecutionError::ExecutionFailed("opportunity has no route".to_string()))?;
        let requested = amount.unwrap_or_else(|| opportunity.input_amount());
        let sized = self
            .allocator
            .clamp(token, requested)
            .await
            .map_err(|e| ExecutionError::ExecutionFailed(e.to_string()))?;

        if sized != requested {
            info!("Allocator resized trade {} -> {}", requested, sized);
        }

        match self.executor.execute(opportunity.id, &opportunity.route, sized, &options).await {
            Ok(record) => Ok(record),
            Err(e) => {
                warn!("Execution of {} failed: {}", opportunity.id, e);
                Err(e)
            }
        }
    }
}
