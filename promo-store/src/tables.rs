use crate::app_config::SchemaConfig;
use crate::{StoreError, StoreResult};
use csv::{ReaderBuilder, StringRecord, Trim};
use promo_core::{IdKey, OfferFeature, PromoError, RecordRow};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::info;

/// Reads record and offer tables from delimited text with a header row.
///
/// Key columns are canonicalized on the way in, so both tables meet the joiner
/// with the same representation of `offer_id`.
pub struct TableSource {
    schema: SchemaConfig,
}

struct RecordColumns {
    user_id: usize,
    context_id: usize,
    offer_id: usize,
    date_key: usize,
    label: Option<usize>,
}

impl TableSource {
    pub fn new(schema: SchemaConfig) -> Self {
        Self { schema }
    }

    pub fn load_records(
        &self,
        path: &Path,
        table: &str,
        labelled: bool,
    ) -> StoreResult<Vec<RecordRow>> {
        let file = File::open(path).map_err(|e| StoreError::io(path, e))?;
        let records = self.read_records(file, table, labelled)?;
        info!("Loaded {} {} records from {}", records.len(), table, path.display());
        Ok(records)
    }

    pub fn load_offers(&self, path: &Path) -> StoreResult<Vec<OfferFeature>> {
        let file = File::open(path).map_err(|e| StoreError::io(path, e))?;
        let offers = self.read_offers(file)?;
        info!("Loaded {} offers from {}", offers.len(), path.display());
        Ok(offers)
    }

    /// `labelled` makes the label column required; otherwise it is ignored.
    pub fn read_records<R: Read>(
        &self,
        reader: R,
        table: &str,
        labelled: bool,
    ) -> StoreResult<Vec<RecordRow>> {
        let mut rdr = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
        let headers = rdr.headers()?.clone();
        let s = &self.schema;
        let columns = RecordColumns {
            user_id: column_index(&headers, &s.user_id, table)?,
            context_id: column_index(&headers, &s.context_id, table)?,
            offer_id: column_index(&headers, &s.offer_id, table)?,
            date_key: column_index(&headers, &s.date_key, table)?,
            label: if labelled {
                Some(column_index(&headers, &s.label, table)?)
            } else {
                None
            },
        };

        let mut records = Vec::new();
        for row in rdr.records() {
            let row = row?;
            let line = line_of(&row);
            let key = |idx: usize, name: &str| read_key(&row, idx, name, table, line);
            let label = match columns.label {
                Some(idx) => {
                    let raw = row.get(idx).unwrap_or_default();
                    Some(parse_label(raw).ok_or_else(|| {
                        schema_error(table, format!("line {}: invalid label '{}'", line, raw))
                    })?)
                }
                None => None,
            };
            records.push(RecordRow {
                user_id: key(columns.user_id, &s.user_id)?,
                context_id: key(columns.context_id, &s.context_id)?,
                offer_id: key(columns.offer_id, &s.offer_id)?,
                date_key: key(columns.date_key, &s.date_key)?,
                label,
            });
        }
        Ok(records)
    }

    pub fn read_offers<R: Read>(&self, reader: R) -> StoreResult<Vec<OfferFeature>> {
        const TABLE: &str = "offers";
        let mut rdr = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
        let headers = rdr.headers()?.clone();
        let s = &self.schema;
        let offer_idx = column_index(&headers, &s.offer_id, TABLE)?;
        let freq_idx = column_index(&headers, &s.redemption_frequency, TABLE)?;
        let discount_idx = column_index(&headers, &s.discount_rate, TABLE)?;

        let mut offers = Vec::new();
        for row in rdr.records() {
            let row = row?;
            let line = line_of(&row);
            offers.push(OfferFeature {
                offer_id: read_key(&row, offer_idx, &s.offer_id, TABLE, line)?,
                redemption_frequency: read_attribute(
                    &row,
                    freq_idx,
                    &s.redemption_frequency,
                    line,
                )?,
                discount_rate: read_attribute(&row, discount_idx, &s.discount_rate, line)?,
            });
        }
        Ok(offers)
    }
}

fn schema_error(table: &str, reason: String) -> StoreError {
    PromoError::schema(table, reason).into()
}

fn column_index(headers: &StringRecord, name: &str, table: &str) -> StoreResult<usize> {
    headers
        .iter()
        .position(|h| h == name)
        .ok_or_else(|| schema_error(table, format!("missing column '{}'", name)))
}

fn line_of(row: &StringRecord) -> u64 {
    row.position().map_or(0, |p| p.line())
}

fn read_key(
    row: &StringRecord,
    idx: usize,
    name: &str,
    table: &str,
    line: u64,
) -> StoreResult<IdKey> {
    let key = IdKey::new(row.get(idx).unwrap_or_default());
    if key.is_empty() {
        return Err(schema_error(table, format!("line {}: empty {}", line, name)));
    }
    Ok(key)
}

/// Empty and NaN cells are missing values; anything else must be a finite number.
fn read_attribute(
    row: &StringRecord,
    idx: usize,
    name: &str,
    line: u64,
) -> StoreResult<Option<f64>> {
    let raw = row.get(idx).unwrap_or_default();
    if raw.is_empty() || raw.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    let problem = match raw.parse::<f64>() {
        Ok(value) if value.is_finite() => return Ok(Some(value)),
        Ok(_) => "not finite",
        Err(_) => "not numeric",
    };
    Err(schema_error(
        "offers",
        format!("line {}: {} is {} ('{}')", line, name, problem, raw),
    ))
}

/// Accepts `true`/`false` and numbers; any non-zero number is positive.
fn parse_label(raw: &str) -> Option<bool> {
    if raw.eq_ignore_ascii_case("true") {
        return Some(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return Some(false);
    }
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| v != 0.0)
}
