use std::{fs, path::Path};

use anyhow::{Context as _, Result};
use csv::Writer;

use crate::telemetry::{Measurement, PersistedRow};

/// Rewrites `path` with a CSV of `rows`.
///
/// The file is written next to `path` first and renamed over it, so readers
/// never see a half-written snapshot.
pub fn write_snapshot<'a>(
    path: &Path,
    rows: impl IntoIterator<Item = &'a PersistedRow>,
) -> Result<usize> {
    let staging = path.with_extension("csv.partial");

    let mut writer = Writer::from_path(&staging)
        .with_context(|| format!("failed to create snapshot file: {staging:?}"))?;

    let mut header = vec!["id", "device_id", "source_address"];
    header.extend(Measurement::ALL.iter().map(|m| m.as_str()));
    header.push("observed_at");
    writer
        .write_record(&header)
        .context("failed to write snapshot header")?;

    let mut written = 0;
    for row in rows {
        let reading = &row.reading;
        let mut record = vec![
            row.id.to_string(),
            reading.device_id.clone(),
            reading.source_address.clone(),
        ];
        record.extend(Measurement::ALL.iter().map(|&m| reading.value(m).to_string()));
        record.push(reading.observed_at.to_rfc3339());

        writer
            .write_record(&record)
            .with_context(|| format!("failed to write snapshot row: {}", row.id))?;
        written += 1;
    }

    writer.flush().context("failed to flush snapshot")?;
    drop(writer);

    fs::rename(&staging, path)
        .with_context(|| format!("failed to move snapshot into place: {path:?}"))?;

    Ok(written)
}
