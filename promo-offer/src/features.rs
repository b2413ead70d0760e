use crate::model::FeatureMatrix;
use promo_core::{FeatureVector, IdKey, OfferFeature, PromoError, PromoResult, RecordRow};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Missing-value and match-rate policy for the offer join.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JoinConfig {
    /// Substituted for every attribute of an unmatched offer, and for empty cells
    /// of a matched one.
    pub missing_feature_default: f64,
    /// Lowest acceptable fraction of records that find their offer. A join with
    /// zero matches is always rejected.
    pub min_match_rate: f64,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            missing_feature_default: 0.0,
            min_match_rate: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinStats {
    pub records: usize,
    pub matched: usize,
    /// Offer rows skipped because an earlier row had the same id
    pub duplicate_offers: usize,
    /// Attribute values replaced by the default (unmatched records count twice)
    pub defaulted_values: usize,
}

impl JoinStats {
    pub fn match_rate(&self) -> f64 {
        if self.records == 0 {
            return 0.0;
        }
        self.matched as f64 / self.records as f64
    }
}

/// A record paired with the features derived for it.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedRecord<'a> {
    pub record: &'a RecordRow,
    pub features: FeatureVector,
}

#[derive(Debug, Clone)]
pub struct JoinOutput<'a> {
    /// Same length and order as the input records
    pub rows: Vec<JoinedRecord<'a>>,
    pub stats: JoinStats,
}

impl JoinOutput<'_> {
    pub fn feature_matrix(&self) -> FeatureMatrix {
        let vectors: Vec<FeatureVector> = self.rows.iter().map(|r| r.features).collect();
        FeatureMatrix::from_vectors(&vectors)
    }
}

/// Left-joins records against the offer reference table.
///
/// Both sides carry `IdKey`s, so offer ids are canonicalized identically before
/// matching (`"42"`, `"42.0"` and `42` all meet). Every record survives the join;
/// an offer that cannot be found yields the configured default for both attributes.
pub struct FeatureJoiner {
    config: JoinConfig,
}

impl FeatureJoiner {
    pub fn new(config: JoinConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &JoinConfig {
        &self.config
    }

    /// Join without the match-rate guard. Never fails and never drops a record.
    pub fn join<'a>(&self, records: &'a [RecordRow], offers: &[OfferFeature]) -> JoinOutput<'a> {
        let (lookup, duplicate_offers) = index_offers(offers);
        if duplicate_offers > 0 {
            warn!(
                "Offer table has {} duplicate offer ids; keeping the first occurrence of each",
                duplicate_offers
            );
        }

        let mut stats = JoinStats {
            records: records.len(),
            duplicate_offers,
            ..Default::default()
        };

        let rows = records
            .iter()
            .map(|record| {
                let offer = lookup.get(&record.offer_id).copied();
                if offer.is_some() {
                    stats.matched += 1;
                }
                let (features, defaulted) = self.features_for(offer);
                stats.defaulted_values += defaulted;
                JoinedRecord { record, features }
            })
            .collect();

        debug!(
            "Joined {} records against {} offers ({} matched)",
            stats.records,
            lookup.len(),
            stats.matched
        );

        JoinOutput { rows, stats }
    }

    /// Join, then reject the result if too few records found their offer.
    ///
    /// A zero match rate almost always means the two tables encode offer ids
    /// differently; silently scoring everything on default features would hide that.
    pub fn join_checked<'a>(
        &self,
        records: &'a [RecordRow],
        offers: &[OfferFeature],
    ) -> PromoResult<JoinOutput<'a>> {
        let output = self.join(records, offers);
        let stats = output.stats;
        if stats.records == 0 {
            return Ok(output);
        }

        let rate = stats.match_rate();
        if stats.matched == 0 || rate < self.config.min_match_rate {
            return Err(PromoError::JoinKeyMismatch {
                matched: stats.matched,
                total: stats.records,
                min_rate: self.config.min_match_rate,
            });
        }
        if rate < 0.5 {
            warn!("Only {:.1}% of records matched an offer", rate * 100.0);
        }
        Ok(output)
    }

    fn features_for(&self, offer: Option<&OfferFeature>) -> (FeatureVector, usize) {
        let default = self.config.missing_feature_default;
        match offer {
            None => (FeatureVector::uniform(default), FeatureVector::WIDTH),
            Some(offer) => {
                let defaulted = [offer.discount_rate, offer.redemption_frequency]
                    .iter()
                    .filter(|v| v.is_none())
                    .count();
                let features = FeatureVector::new(
                    offer.discount_rate.unwrap_or(default),
                    offer.redemption_frequency.unwrap_or(default),
                );
                (features, defaulted)
            }
        }
    }
}

impl Default for FeatureJoiner {
    fn default() -> Self {
        Self::new(JoinConfig::default())
    }
}

/// First occurrence wins; returns the lookup and the number of skipped duplicates.
fn index_offers(offers: &[OfferFeature]) -> (HashMap<&IdKey, &OfferFeature>, usize) {
    let mut lookup = HashMap::with_capacity(offers.len());
    let mut duplicates = 0;
    for offer in offers {
        if lookup.contains_key(&offer.offer_id) {
            duplicates += 1;
            continue;
        }
        lookup.insert(&offer.offer_id, offer);
    }
    (lookup, duplicates)
}
