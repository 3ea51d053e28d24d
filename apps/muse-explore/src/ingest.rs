//! NDJSON artwork ingestion.
//!
//! One JSON object per line:
//! `{"id": "met/436535", "vector": [...], "medium": "Oil on canvas"}`.
//! Malformed or rejected lines are logged and skipped; ingestion keeps
//! going.

use muse_engine::SimilarityEngine;
use muse_store::TagSet;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

#[derive(Debug, Deserialize)]
struct IngestRecord {
    id: String,
    vector: Vec<f32>,
    #[serde(default)]
    medium: Option<String>,
    #[serde(default)]
    period: Option<String>,
    #[serde(default)]
    culture: Option<String>,
}

/// Counts from one ingestion run.
#[derive(Debug, Default, Clone, Copy)]
pub struct IngestReport {
    pub ingested: usize,
    pub failed: usize,
}

/// Feed an NDJSON file into the engine.
pub fn ingest_file(engine: &SimilarityEngine, path: &Path) -> std::io::Result<IngestReport> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut report = IngestReport::default();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let record: IngestRecord = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(line = line_no + 1, %err, "skipping malformed record");
                report.failed += 1;
                continue;
            }
        };

        let tags = TagSet {
            medium: record.medium,
            period: record.period,
            culture: record.culture,
        };

        match engine.put_vector(record.id, record.vector, tags) {
            Ok(()) => report.ingested += 1,
            Err(err) => {
                tracing::warn!(line = line_no + 1, %err, "skipping rejected vector");
                report.failed += 1;
            }
        }

        if report.ingested > 0 && report.ingested % 1000 == 0 {
            tracing::info!(ingested = report.ingested, "ingestion progress");
        }
    }

    Ok(report)
}
