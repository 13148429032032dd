//! Cross-venue grouping of pairs by unordered token identity

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::registry::Venue;
use crate::tokens::PairKey;
use crate::venues::TokenPair;

/// One economic pair and the pool each venue offers for it
#[derive(Debug, Clone)]
pub struct PairGroup {
    pub key: PairKey,
    pub venues: BTreeMap<String, (Arc<Venue>, TokenPair)>,
}

/// Group by `PairKey`, dropping groups only one venue trades.
///
/// A venue listing several pools for the same pair (fee tiers) is represented
/// by its lowest-fee pool. Output is ordered by key.
pub fn group_pairs(fetched: Vec<(Arc<Venue>, Vec<TokenPair>)>) -> Vec<PairGroup> {
    let mut groups: BTreeMap<PairKey, BTreeMap<String, (Arc<Venue>, TokenPair)>> = BTreeMap::new();

    for (venue, pairs) in fetched {
        for pair in pairs {
            if pair.token0 == pair.token1 {
                continue;
            }
            let by_venue = groups.entry(pair.key()).or_default();
            match by_venue.get(&venue.name) {
                Some((_, existing)) if existing.fee <= pair.fee => {}
                _ => {
                    by_venue.insert(venue.name.clone(), (venue.clone(), pair));
                }
            }
        }
    }

    groups
        .into_iter()
        .filter(|(_, venues)| venues.len() >= 2)
        .map(|(key, venues)| PairGroup { key, venues })
        .collect()
}
