//! Index statistics.
//!
//! `fbs stats` prints the number of indexed documents, overall or for one
//! spot. The SQLite backend also gets a per-spot breakdown and the database
//! file size.

use anyhow::Result;
use fbs_core::index::IndexFilter;

use crate::config::{Backend, Config};
use crate::sqlite_index::SqliteIndex;

pub async fn run_stats(config: &Config, spot: Option<&str>) -> Result<()> {
    let index = crate::open_index(config).await?;
    let filter = match spot {
        Some(spot) => IndexFilter::Spot(spot.to_string()),
        None => IndexFilter::All,
    };
    let count = index.count(&filter).await?;

    println!("FBS Index Stats");
    println!("===============");
    println!();
    match config.index.backend {
        Backend::Elasticsearch => {
            println!(
                "  Cluster:     {}",
                config.index.url.as_deref().unwrap_or_default()
            );
            println!("  Index:       {}", config.index.name);
        }
        Backend::Sqlite => {
            let db_size = std::fs::metadata(&config.index.path)
                .map(|m| m.len())
                .unwrap_or(0);
            println!("  Database:    {}", config.index.path.display());
            println!("  Size:        {}", format_bytes(db_size));
        }
    }
    println!();
    match spot {
        Some(spot) => println!("  Documents in spot {}: {}", spot, count),
        None => println!("  Documents:   {}", count),
    }

    if spot.is_none() && config.index.backend == Backend::Sqlite {
        let local = SqliteIndex::open(&config.index.path).await?;
        let by_spot = local.spot_counts().await?;
        if !by_spot.is_empty() {
            println!();
            println!("  By spot:");
            println!("  {:<32} {:>10}", "SPOT", "DOCS");
            println!("  {}", "-".repeat(43));
            for (name, n) in &by_spot {
                println!("  {:<32} {:>10}", name.as_deref().unwrap_or("(none)"), n);
            }
        }
    }
    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
