//! Operator CLI for the muse similarity engine.
//!
//! Loads a config, optionally restores a checkpoint and ingests an NDJSON
//! vector dump, then walks the collection by similarity the way the
//! explorer UI would: pick a random seed, fetch its neighbors, hop to the
//! best one, repeat.

mod config;
mod ingest;

use muse_engine::SimilarityEngine;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "muse.yaml".to_string());

    tracing::info!("loading configuration from: {}", config_path);

    let config = if std::path::Path::new(&config_path).exists() {
        config::AppConfig::load_from_file(&config_path)?
    } else {
        tracing::warn!("config file not found, loading from environment variables");
        config::AppConfig::load_from_env()?
    };

    let engine = match &config.checkpoint {
        Some(path) if path.exists() => {
            tracing::info!(path = %path.display(), "restoring engine from checkpoint");
            SimilarityEngine::restore(path, config.engine.clone())?
        }
        _ => SimilarityEngine::new(config.engine.clone())?,
    };

    if let Some(data_file) = &config.data_file {
        tracing::info!(path = %data_file.display(), "ingesting vectors");
        let report = ingest::ingest_file(&engine, data_file)?;
        tracing::info!(
            ingested = report.ingested,
            failed = report.failed,
            "ingestion complete"
        );
    }

    let stats = engine.stats();
    tracing::info!(active = stats.active_records, "collection ready");

    let mut current = engine.seed()?;
    for step in 0..config.walk_steps {
        let neighbors = engine.similar(&current, config.k, &[])?;

        println!("step {}: {}", step, current);
        for neighbor in &neighbors {
            println!("    {:>7.4}  {}", neighbor.score, neighbor.id);
        }

        match neighbors.first() {
            Some(best) => current = best.id.clone(),
            None => break,
        }
    }

    if let Some(path) = &config.checkpoint {
        engine.checkpoint(path)?;
        tracing::info!(path = %path.display(), "checkpoint written");
    }

    Ok(())
}
