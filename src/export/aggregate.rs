use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::model::{CallResult, MetricSample, ModelAggregate};
use crate::export::recorder::write_atomic;

/// A record file left out of the aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRecord {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateReport {
    pub models: BTreeMap<String, ModelAggregate>,
    pub skipped: Vec<SkippedRecord>,
    pub records: usize,
}

impl AggregateReport {
    /// Adds an empty aggregate for every listed model that has no records.
    pub fn ensure_models<'a>(&mut self, ids: impl IntoIterator<Item = &'a str>) {
        for id in ids {
            self.models
                .entry(id.to_string())
                .or_insert_with(|| ModelAggregate::empty(id));
        }
    }

    pub fn summary(&self) -> BTreeMap<String, SummaryEntry> {
        self.models
            .iter()
            .map(|(id, agg)| (id.clone(), SummaryEntry::from(agg)))
            .collect()
    }
}

/// Entry of the summary file consumed by dashboards and charts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SummaryEntry {
    pub count: usize,
    pub avg_wer: f64,
    pub avg_cer: f64,
    pub avg_accuracy: f64,
    pub avg_time: f64,
}

impl From<&ModelAggregate> for SummaryEntry {
    fn from(agg: &ModelAggregate) -> Self {
        Self {
            count: agg.count,
            avg_wer: agg.mean_wer,
            avg_cer: agg.mean_cer,
            avg_accuracy: agg.mean_accuracy,
            avg_time: agg.mean_exec_time,
        }
    }
}

/// Reads every record under `folder` and recomputes the per-model means.
///
/// Nothing is cached between calls: the report always reflects the record
/// files present right now. Unreadable or out-of-range records are listed in
/// [`AggregateReport::skipped`] instead of being averaged in. A folder that
/// does not exist yet aggregates to an empty report.
pub fn aggregate_folder(folder: &Path) -> Result<AggregateReport> {
    let (mut records, skipped) = load_records(folder)?;

    // Fixed fold order so the sums do not depend on directory order.
    records.sort_by(|a, b| {
        (a.model_id.as_str(), a.image_path.as_path()).cmp(&(b.model_id.as_str(), b.image_path.as_path()))
    });

    let mut samples: BTreeMap<String, Vec<MetricSample>> = BTreeMap::new();
    for record in &records {
        samples
            .entry(record.model_id.clone())
            .or_default()
            .push(record.sample());
    }

    let models = samples
        .into_iter()
        .map(|(id, samples)| {
            let agg = ModelAggregate::from_samples(id.clone(), &samples);
            (id, agg)
        })
        .collect();

    debug!(folder = %folder.display(), records = records.len(), skipped = skipped.len(), "aggregated folder");
    Ok(AggregateReport {
        models,
        skipped,
        records: records.len(),
    })
}

/// Loads all well-formed records under `folder`; hidden and non-JSON files
/// are ignored, malformed ones are reported as skipped.
pub fn load_records(folder: &Path) -> Result<(Vec<CallResult>, Vec<SkippedRecord>)> {
    let entries = match fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), Vec::new())),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", folder.display()))
        }
    };

    let mut records = Vec::new();
    let mut skipped = Vec::new();
    for entry in entries {
        let path = entry
            .with_context(|| format!("failed to list {}", folder.display()))?
            .path();
        if !is_record_file(&path) {
            continue;
        }
        match read_record(&path) {
            Ok(record) => records.push(record),
            Err(reason) => {
                warn!(path = %path.display(), %reason, "skipping unreadable record");
                skipped.push(SkippedRecord { path, reason });
            }
        }
    }
    skipped.sort_by(|a, b| a.path.cmp(&b.path));
    Ok((records, skipped))
}

fn is_record_file(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .map_or(true, |n| n.starts_with('.'));
    let json = path.extension().and_then(|e| e.to_str()) == Some("json");
    !hidden && json && path.is_file()
}

fn read_record(path: &Path) -> std::result::Result<CallResult, String> {
    let bytes = fs::read(path).map_err(|e| e.to_string())?;
    let record: CallResult = serde_json::from_slice(&bytes).map_err(|e| e.to_string())?;
    record.validate()?;
    Ok(record)
}

/// Path of the summary written next to a record folder: `<folder>.json`.
pub fn summary_path(folder: &Path) -> PathBuf {
    let mut name: OsString = folder.as_os_str().to_owned();
    name.push(".json");
    PathBuf::from(name)
}

/// Writes the summary of `report` to [`summary_path`] and returns that path.
pub fn write_summary(folder: &Path, report: &AggregateReport) -> Result<PathBuf> {
    let path = summary_path(folder);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let data = serde_json::to_vec_pretty(&report.summary())?;
    write_atomic(&path, &data)?;
    Ok(path)
}
