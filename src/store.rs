//! Latest detection results
//!
//! Readers load an immutable snapshot; a cycle publishes its results by
//! swapping the whole snapshot, so a reader never sees a half-written list.

use alloy_primitives::Address;
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::opportunity::ArbitrageOpportunity;

#[derive(Debug, Default)]
struct Snapshot {
    /// Ranked as the detector returned them
    opportunities: Vec<ArbitrageOpportunity>,
    by_id: HashMap<Uuid, usize>,
    updated_at: Option<DateTime<Utc>>,
}

/// Listing filters; `None` means no constraint
#[derive(Debug, Clone, Default)]
pub struct OpportunityFilter {
    /// Inclusive lower bound on `expected_profit_percentage`
    pub min_profit_pct: Option<f64>,
    /// Inclusive upper bound on `risk_score`
    pub max_risk: Option<f64>,
    /// Input token, or any token in the route
    pub token: Option<Address>,
}

impl OpportunityFilter {
    fn accepts(&self, opp: &ArbitrageOpportunity) -> bool {
        if let Some(min) = self.min_profit_pct {
            if opp.expected_profit_percentage < min {
                return false;
            }
        }
        if let Some(max) = self.max_risk {
            if opp.risk_score > max {
                return false;
            }
        }
        if let Some(token) = self.token {
            if opp.input_token() != Some(token) && !opp.touches(&token) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Default)]
pub struct OpportunityStore {
    snapshot: ArcSwap<Snapshot>,
}

impl OpportunityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a completed cycle, replacing everything held before
    pub fn replace_all(&self, opportunities: Vec<ArbitrageOpportunity>) {
        let by_id = opportunities
            .iter()
            .enumerate()
            .map(|(i, opp)| (opp.id, i))
            .collect();
        let count = opportunities.len();

        self.snapshot.store(Arc::new(Snapshot {
            opportunities,
            by_id,
            updated_at: Some(Utc::now()),
        }));
        debug!("Opportunity store replaced ({} entries)", count);
    }

    pub fn get_by_id(&self, id: &Uuid) -> Option<ArbitrageOpportunity> {
        let snapshot = self.snapshot.load();
        snapshot
            .by_id
            .get(id)
            .and_then(|&i| snapshot.opportunities.get(i))
            .cloned()
    }

    /// One page of the filtered list plus the filtered total
    pub fn list(&self, filter: &OpportunityFilter, limit: usize, offset: usize) -> (Vec<ArbitrageOpportunity>, usize) {
        let snapshot = self.snapshot.load();
        let matching: Vec<&ArbitrageOpportunity> = snapshot
            .opportunities
            .iter()
            .filter(|opp| filter.accepts(opp))
            .collect();
        let total = matching.len();
        let page = matching.into_iter().skip(offset).take(limit).cloned().collect();
        (page, total)
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().opportunities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// When the last cycle was published; `None` before the first one
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.snapshot.load().updated_at
    }
}
