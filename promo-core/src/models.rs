use crate::key::IdKey;
use serde::{Deserialize, Serialize};

/// A record to train on or score: one candidate offer for one user in one context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordRow {
    pub user_id: IdKey,
    pub context_id: IdKey,
    pub offer_id: IdKey,
    pub date_key: IdKey,
    /// Present only on training rows
    pub label: Option<bool>,
}

impl RecordRow {
    pub fn new(user_id: &str, context_id: &str, offer_id: &str, date_key: &str) -> Self {
        Self {
            user_id: IdKey::new(user_id),
            context_id: IdKey::new(context_id),
            offer_id: IdKey::new(offer_id),
            date_key: IdKey::new(date_key),
            label: None,
        }
    }

    pub fn with_label(mut self, label: bool) -> Self {
        self.label = Some(label);
        self
    }

    pub fn group_key(&self) -> GroupKey {
        GroupKey {
            user_id: self.user_id.clone(),
            context_id: self.context_id.clone(),
            date_key: self.date_key.clone(),
        }
    }
}

/// Reference attributes of an offer.
///
/// `None` marks a missing cell in the source table; the joiner decides what it becomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferFeature {
    pub offer_id: IdKey,
    pub redemption_frequency: Option<f64>,
    pub discount_rate: Option<f64>,
}

impl OfferFeature {
    /// NaN inputs are stored as missing.
    pub fn new(offer_id: &str, redemption_frequency: f64, discount_rate: f64) -> Self {
        Self {
            offer_id: IdKey::new(offer_id),
            redemption_frequency: Some(redemption_frequency).filter(|v| !v.is_nan()),
            discount_rate: Some(discount_rate).filter(|v| !v.is_nan()),
        }
    }
}

/// Model input derived from one record. Always fully populated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub discount_rate: f64,
    pub redemption_frequency: f64,
}

impl FeatureVector {
    pub const WIDTH: usize = 2;

    pub fn new(discount_rate: f64, redemption_frequency: f64) -> Self {
        Self {
            discount_rate,
            redemption_frequency,
        }
    }

    pub fn uniform(value: f64) -> Self {
        Self::new(value, value)
    }

    pub fn to_array(&self) -> [f64; Self::WIDTH] {
        [self.discount_rate, self.redemption_frequency]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRow {
    pub record: RecordRow,
    pub score: f64,
}

/// Identity of the set of rows competing for the same top-K slots.
///
/// Ordered by user, then context, then date.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey {
    pub user_id: IdKey,
    pub context_id: IdKey,
    pub date_key: IdKey,
}

/// One line of the final output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedRow {
    pub user_id: IdKey,
    pub context_id: IdKey,
    pub offer_id: IdKey,
    pub date_key: IdKey,
    pub score: f64,
}

impl From<ScoredRow> for RankedRow {
    fn from(row: ScoredRow) -> Self {
        Self {
            user_id: row.record.user_id,
            context_id: row.record.context_id,
            offer_id: row.record.offer_id,
            date_key: row.record.date_key,
            score: row.score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_key_ordering() {
        let a = RecordRow::new("2", "10", "A", "2024-01-01").group_key();
        let b = RecordRow::new("10", "1", "A", "2024-01-01").group_key();
        let c = RecordRow::new("2", "10", "B", "2024-01-02").group_key();
        assert!(a < b);
        assert!(a < c);
        assert_eq!(a, RecordRow::new("2.0", "10", "Z", "2024-01-01").group_key());
    }

    #[test]
    fn test_offer_feature_nan_is_missing() {
        let offer = OfferFeature::new("A", f64::NAN, 0.25);
        assert_eq!(offer.redemption_frequency, None);
        assert_eq!(offer.discount_rate, Some(0.25));
    }

    #[test]
    fn test_ranked_row_from_scored() {
        let scored = ScoredRow {
            record: RecordRow::new("1", "10", "A", "2024-01-01").with_label(true),
            score: 0.75,
        };
        let ranked = RankedRow::from(scored);
        assert_eq!(ranked.offer_id.as_str(), "A");
        assert_eq!(ranked.score, 0.75);
    }
}
