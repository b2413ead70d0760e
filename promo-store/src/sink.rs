use crate::app_config::SchemaConfig;
use crate::{StoreError, StoreResult};
use promo_core::RankedRow;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Writes ranked rows as `user, context, offer, date, score` with a fixed number
/// of decimals for the score.
pub struct CsvSink {
    schema: SchemaConfig,
    precision: usize,
}

impl CsvSink {
    pub fn new(schema: SchemaConfig, precision: usize) -> Self {
        Self { schema, precision }
    }

    pub fn write<W: Write>(&self, writer: W, rows: &[RankedRow]) -> StoreResult<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        let s = &self.schema;
        wtr.write_record([&s.user_id, &s.context_id, &s.offer_id, &s.date_key, &s.score])?;
        for row in rows {
            let score = format!("{:.*}", self.precision, row.score);
            wtr.write_record([
                row.user_id.as_str(),
                row.context_id.as_str(),
                row.offer_id.as_str(),
                row.date_key.as_str(),
                score.as_str(),
            ])?;
        }
        wtr.flush().map_err(csv::Error::from)?;
        Ok(())
    }

    /// The file appears only once fully written.
    pub fn write_file(&self, path: &Path, rows: &[RankedRow]) -> StoreResult<()> {
        atomic_write(path, |file| self.write(file, rows))?;
        info!("Wrote {} ranked rows to {}", rows.len(), path.display());
        Ok(())
    }
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> StoreResult<()> {
    atomic_write(path, |file| {
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.flush().map_err(|e| StoreError::io(path, e))
    })
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> StoreResult<T> {
    let file = File::open(path).map_err(|e| StoreError::io(path, e))?;
    Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
}

fn atomic_write<F>(path: &Path, write: F) -> StoreResult<()>
where
    F: FnOnce(&mut File) -> StoreResult<()>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    let tmp = temp_path(path);
    let mut file = File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
    if let Err(e) = write(&mut file) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    if let Err(e) = file.sync_all() {
        let _ = fs::remove_file(&tmp);
        return Err(StoreError::io(&tmp, e));
    }
    drop(file);
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(StoreError::io(path, e));
    }
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use promo_core::IdKey;

    fn row(user: &str, offer: &str, score: f64) -> RankedRow {
        RankedRow {
            user_id: IdKey::new(user),
            context_id: IdKey::new("10"),
            offer_id: IdKey::new(offer),
            date_key: IdKey::new("2024-01-01"),
            score,
        }
    }

    #[test]
    fn test_write_fixed_precision() {
        let sink = CsvSink::new(SchemaConfig::default(), 6);
        let mut out = Vec::new();
        sink.write(&mut out, &[row("1", "A", 0.5), row("1", "B", 1.0 / 3.0)]).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "id1,id2,id3,id5,pred\n1,10,A,2024-01-01,0.500000\n1,10,B,2024-01-01,0.333333\n"
        );
    }

    #[test]
    fn test_write_file_creates_parent_and_no_temp_left() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("submission.csv");
        let sink = CsvSink::new(SchemaConfig::default(), 2);
        sink.write_file(&path, &[row("1", "A", 0.126)]).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.ends_with("1,10,A,2024-01-01,0.13\n"));
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_failed_rename_removes_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taken");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("keep.txt"), "x").unwrap();

        let sink = CsvSink::new(SchemaConfig::default(), 2);
        let err = sink.write_file(&path, &[row("1", "A", 0.5)]).unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
        assert!(!temp_path(&path).exists());
        assert!(path.join("keep.txt").exists());
    }

    #[test]
    fn test_write_keeps_leading_zero_ids() {
        let sink = CsvSink::new(SchemaConfig::default(), 1);
        let mut out = Vec::new();
        sink.write(&mut out, &[row("00012", "007", 0.5)]).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.ends_with("00012,10,007,2024-01-01,0.5\n"));
    }

    #[test]
    fn test_json_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.json");
        let rows = vec![row("1", "A", 0.25)];
        write_json(&path, &rows).unwrap();
        let restored: Vec<RankedRow> = read_json(&path).unwrap();
        assert_eq!(restored, rows);
    }
}
