use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::crawler::AggregateResult;

/// `<prefix>_results.json`, or `<prefix>_test_<n>.json` for limited runs.
pub fn output_path(prefix: &str, limit: Option<usize>) -> PathBuf {
    match limit {
        Some(n) => PathBuf::from(format!("{}_test_{}.json", prefix, n)),
        None => PathBuf::from(format!("{}_results.json", prefix)),
    }
}

pub fn write_json(path: &Path, result: &AggregateResult) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, result)
        .with_context(|| format!("writing {}", path.display()))?;
    writer.flush()?;
    info!(
        "Wrote {} researchers, {} projects to {}",
        result.researchers.len(),
        result.total_projects,
        path.display()
    );
    Ok(())
}
