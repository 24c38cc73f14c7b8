//! Database statistics overview.
//!
//! Summarizes the pipeline tables: cached embeddings, contexts per type,
//! message links, and the embedding queue by status. Used by `cctx stats`.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

/// Context counts for one stored type.
#[derive(Debug, Clone, PartialEq)]
pub struct KindStats {
    pub kind: String,
    pub count: i64,
    pub embedded: i64,
    pub last_updated: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DbStats {
    pub cached_embeddings: i64,
    pub contexts: i64,
    pub links: i64,
    pub by_kind: Vec<KindStats>,
    /// `(status, count)`, pending first.
    pub jobs: Vec<(String, i64)>,
}

/// Gather counts from an open pool.
pub async fn collect_stats(pool: &SqlitePool) -> Result<DbStats> {
    let cached_embeddings: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embedding_cache")
        .fetch_one(pool)
        .await?;
    let contexts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM contexts")
        .fetch_one(pool)
        .await?;
    let links: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM message_contexts")
        .fetch_one(pool)
        .await?;

    let kind_rows = sqlx::query(
        r#"
        SELECT type,
               COUNT(*) AS count,
               COUNT(embedding) AS embedded,
               MAX(updated_at) AS last_updated
        FROM contexts
        GROUP BY type
        ORDER BY count DESC, type ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let by_kind = kind_rows
        .iter()
        .map(|row| KindStats {
            kind: row.get("type"),
            count: row.get("count"),
            embedded: row.get("embedded"),
            last_updated: row.get("last_updated"),
        })
        .collect();

    let job_rows = sqlx::query(
        r#"
        SELECT status, COUNT(*) AS count
        FROM embedding_queue
        GROUP BY status
        ORDER BY CASE status
            WHEN 'pending' THEN 0
            WHEN 'processing' THEN 1
            WHEN 'completed' THEN 2
            ELSE 3
        END
        "#,
    )
    .fetch_all(pool)
    .await?;

    let jobs = job_rows
        .iter()
        .map(|row| (row.get::<String, _>("status"), row.get::<i64, _>("count")))
        .collect();

    Ok(DbStats {
        cached_embeddings,
        contexts,
        links,
        by_kind,
        jobs,
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let stats = collect_stats(&pool).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("chat-context: Database Stats");
    println!("=============================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Cached embeddings: {}", stats.cached_embeddings);
    println!("  Contexts:          {}", stats.contexts);
    println!("  Message links:     {}", stats.links);

    if !stats.by_kind.is_empty() {
        println!();
        println!("  By type:");
        println!(
            "  {:<10} {:>8} {:>10}   {}",
            "TYPE", "COUNT", "EMBEDDED", "LAST UPDATE"
        );
        println!("  {}", "-".repeat(48));
        for k in &stats.by_kind {
            let updated = match k.last_updated {
                Some(ts) => format_ts_relative(ts),
                None => "never".to_string(),
            };
            println!(
                "  {:<10} {:>8} {:>10}   {}",
                k.kind, k.count, k.embedded, updated
            );
        }
    }

    if !stats.jobs.is_empty() {
        println!();
        println!("  Embedding jobs:");
        for (status, count) in &stats.jobs {
            println!("    {:<12} {}", status, count);
        }
    }

    println!();

    pool.close().await;
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

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
