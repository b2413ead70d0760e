use promo_core::{GroupKey, PromoError, PromoResult, RankedRow, ScoredRow};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::debug;

pub const DEFAULT_TOP_K: usize = 7;

/// Keeps the `top_k` best-scoring rows of every (user, context, date) group.
///
/// Within a group rows are ordered by score, highest first. Equal scores keep
/// their input order, so the row that came first wins the tie. Groups are
/// emitted in ascending key order, independent of how the input was arranged.
#[derive(Debug, Clone)]
pub struct GroupRanker {
    top_k: usize,
}

impl GroupRanker {
    pub fn new(top_k: usize) -> PromoResult<Self> {
        if top_k == 0 {
            return Err(PromoError::ValidationError("top_k must be at least 1".into()));
        }
        Ok(Self { top_k })
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn rank(&self, rows: Vec<ScoredRow>) -> Vec<RankedRow> {
        let input_rows = rows.len();
        let mut groups: BTreeMap<GroupKey, Vec<(usize, ScoredRow)>> = BTreeMap::new();
        for (position, row) in rows.into_iter().enumerate() {
            groups
                .entry(row.record.group_key())
                .or_default()
                .push((position, row));
        }

        let group_count = groups.len();
        let mut ranked = Vec::with_capacity(input_rows);
        for (_, mut members) in groups {
            members.sort_by(|(pos_a, a), (pos_b, b)| {
                compare_scores(a.score, b.score).then_with(|| pos_a.cmp(pos_b))
            });
            ranked.extend(
                members
                    .into_iter()
                    .take(self.top_k)
                    .map(|(_, row)| RankedRow::from(row)),
            );
        }

        debug!(
            "Ranked {} rows in {} groups down to {}",
            input_rows,
            group_count,
            ranked.len()
        );
        ranked
    }
}

impl Default for GroupRanker {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
        }
    }
}

/// Descending by score; NaN sorts after every number.
fn compare_scores(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}

/// Number of distinct groups in ranked output (groups are contiguous).
pub fn count_groups(rows: &[RankedRow]) -> usize {
    rows.windows(2)
        .filter(|pair| {
            let (a, b) = (&pair[0], &pair[1]);
            (&a.user_id, &a.context_id, &a.date_key) != (&b.user_id, &b.context_id, &b.date_key)
        })
        .count()
        + usize::from(!rows.is_empty())
}
