/*!
 * Market aggregation
 *
 * Groups canonical claims into (zip code, specialty) markets, sums revenue
 * and services per provider, and computes each provider's market share.
 * Claims can be absorbed in chunks, so the multi-gigabyte raw files never
 * need to be resident all at once.
 */

use std::collections::{BTreeMap, HashMap};

use crate::data_types::{CanonicalClaim, ProviderMarketRecord, ZipCode};
use crate::normalize::UNKNOWN_PROVIDER;

/// Streaming aggregator from canonical claims to provider-market records
///
/// Providers inside a market keep first-encountered input order; that order
/// is the documented tie-break for "top provider" when revenues are equal.
/// Claims with an empty NPI all accumulate under one unknown-provider
/// bucket per market rather than being dropped.
#[derive(Debug, Default)]
pub struct MarketAggregator {
    markets: BTreeMap<(ZipCode, String), MarketAccumulator>,
    claims_seen: usize,
}

#[derive(Debug, Default)]
struct MarketAccumulator {
    /// First-encountered provider order
    providers: Vec<ProviderAccumulator>,
    /// NPI -> position in `providers`
    index: HashMap<String, usize>,
}

#[derive(Debug)]
struct ProviderAccumulator {
    npi: String,
    name: String,
    revenue: f64,
    services: f64,
}

impl MarketAggregator {
    /// Create an empty aggregator
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb a chunk of canonical claims
    pub fn absorb<I>(&mut self, claims: I)
    where
        I: IntoIterator<Item = CanonicalClaim>,
    {
        for claim in claims {
            self.claims_seen += 1;
            let key = (claim.zip_code.clone(), claim.specialty.clone());
            let market = self.markets.entry(key).or_default();

            match market.index.get(&claim.npi).copied() {
                Some(pos) => {
                    let provider = &mut market.providers[pos];
                    provider.revenue += claim.revenue;
                    provider.services += claim.services;
                    if provider.name == UNKNOWN_PROVIDER
                        && claim.provider_name != UNKNOWN_PROVIDER
                    {
                        provider.name = claim.provider_name;
                    }
                }
                None => {
                    market.index.insert(claim.npi.clone(), market.providers.len());
                    market.providers.push(ProviderAccumulator {
                        name: if claim.provider_name.is_empty() {
                            UNKNOWN_PROVIDER.to_string()
                        } else {
                            claim.provider_name
                        },
                        npi: claim.npi,
                        revenue: claim.revenue,
                        services: claim.services,
                    });
                }
            }
        }
    }

    /// Number of claims absorbed so far
    pub fn claims_seen(&self) -> usize {
        self.claims_seen
    }

    /// Number of distinct markets seen so far
    pub fn market_count(&self) -> usize {
        self.markets.len()
    }

    /// Finish aggregation, producing one record per (zip, specialty, provider)
    ///
    /// Records are ordered by market key, then by first-encountered provider
    /// order within each market. A market whose total revenue is zero yields
    /// share 0 for every member.
    pub fn finish(self) -> Vec<ProviderMarketRecord> {
        let mut records = Vec::new();

        for ((zip_code, specialty), market) in self.markets {
            let total_market_revenue: f64 =
                market.providers.iter().map(|p| p.revenue).sum();
            let provider_count = market.providers.len();

            for provider in market.providers {
                let market_share_percentage = if total_market_revenue > 0.0 {
                    provider.revenue / total_market_revenue * 100.0
                } else {
                    0.0
                };

                records.push(ProviderMarketRecord {
                    zip_code: zip_code.clone(),
                    specialty: specialty.clone(),
                    provider_name: provider.name,
                    provider_npi: provider.npi,
                    provider_revenue: provider.revenue,
                    provider_services: provider.services,
                    market_share_percentage,
                    provider_count,
                    total_market_revenue,
                    market_position: 0,
                    share_gap_to_leader: 0.0,
                    is_dominant: false,
                    is_second_place: false,
                    is_third_place: false,
                });
            }
        }

        records
    }
}

/// Aggregate a full claim set in one call
pub fn aggregate_claims<I>(claims: I) -> Vec<ProviderMarketRecord>
where
    I: IntoIterator<Item = CanonicalClaim>,
{
    let mut aggregator = MarketAggregator::new();
    aggregator.absorb(claims);
    aggregator.finish()
}
