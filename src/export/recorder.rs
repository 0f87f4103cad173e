use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};

use crate::core::model::CallResult;
use crate::export::ResultSink;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Writes one JSON file per (model, image) call into `out_dir`.
///
/// File name is `<image stem>.<encoded model id>.json`, so recording the
/// same pair again replaces the earlier record.
#[derive(Debug, Clone)]
pub struct JsonRecorder {
    out_dir: PathBuf,
}

impl JsonRecorder {
    pub fn new(out_dir: PathBuf) -> Self {
        Self { out_dir }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn record_path(&self, result: &CallResult) -> PathBuf {
        self.out_dir
            .join(record_file_name(&result.model_id, &result.image_path))
    }
}

impl ResultSink for JsonRecorder {
    fn record(&self, result: &CallResult) -> Result<()> {
        fs::create_dir_all(&self.out_dir)
            .with_context(|| format!("failed to create {}", self.out_dir.display()))?;
        let path = self.record_path(result);
        let data = serde_json::to_vec_pretty(result)?;
        write_atomic(&path, &data)
    }
}

pub fn record_file_name(model_id: &str, image: &Path) -> String {
    let stem = image
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    format!("{}.{}.json", stem, encode_model_id(model_id))
}

/// Keeps `[A-Za-z0-9_-]` and percent-encodes every other byte, `.` and `%`
/// included. Distinct ids never share an encoding, and the encoded part holds
/// no `.`, so it cannot merge with a dotted image stem.
pub fn encode_model_id(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'-') {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// Writes `data` to a hidden temporary sibling and renames it into place.
/// Readers see either the previous file or the complete new one.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(
        ".{name}.{}.{}.tmp",
        std::process::id(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    fs::write(&tmp, data).with_context(|| format!("failed to write {}", tmp.display()))?;
    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(err).with_context(|| format!("failed to move record into {}", path.display()));
    }
    Ok(())
}
