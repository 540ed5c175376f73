//! Operator-facing ingestion summary.
//!
//! Rendered to stdout after a reload so the operator (or a wrapper script)
//! can see exactly what was loaded without parsing log files.

use std::time::Duration;

use crate::ingest::IngestionResult;
use crate::store::StoreInfo;

/// Print the post-ingestion banner to stdout.
pub fn print_summary(result: &IngestionResult, stats: &StoreInfo, bind: &str) {
    println!("{}", render_summary(result, stats, bind));
}

pub fn render_summary(result: &IngestionResult, stats: &StoreInfo, bind: &str) -> String {
    let mut out = String::new();
    out.push('\n');
    out.push_str("╔══════════════════════════════════════════════════╗\n");
    out.push_str("║               INGESTION COMPLETE                 ║\n");
    out.push_str("╚══════════════════════════════════════════════════╝\n");
    out.push('\n');

    out.push_str(&format!("  Time: {}\n\n", format_duration(result.elapsed)));

    out.push_str(&format!(
        "  ── URLs ({}/{} loaded) ──\n",
        result.loaded_urls.len(),
        result.total_urls()
    ));
    if !result.loaded_urls.is_empty() {
        out.push_str("    Loaded:\n");
        for url in &result.loaded_urls {
            out.push_str(&format!("      ✓ {}\n", url));
        }
    }
    if !result.failed_urls.is_empty() {
        out.push_str("    Failed:\n");
        for failure in &result.failed_urls {
            out.push_str(&format!(
                "      ✗ {}\n        reason: {}\n",
                failure.source, failure.reason
            ));
        }
    }
    out.push('\n');

    if result.total_directories() > 0 {
        out.push_str(&format!(
            "  ── Directories ({}/{} ingested) ──\n",
            result.ingested_directories.len(),
            result.total_directories()
        ));
        if !result.ingested_directories.is_empty() {
            out.push_str("    Ingested:\n");
            for dir in &result.ingested_directories {
                out.push_str(&format!("      ✓ {}\n", dir));
            }
        }
        if !result.failed_directories.is_empty() {
            out.push_str("    Failed:\n");
            for failure in &result.failed_directories {
                out.push_str(&format!(
                    "      ✗ {}\n        reason: {}\n",
                    failure.source, failure.reason
                ));
            }
        }
    } else {
        out.push_str("  ── Directories: none configured ──\n");
    }

    if !result.failed_documents.is_empty() {
        out.push_str(&format!(
            "\n  ── Document Failures ({}) ──\n",
            result.failed_documents.len()
        ));
        for failure in &result.failed_documents {
            out.push_str(&format!(
                "      ✗ {}\n        reason: {}\n",
                failure.source, failure.reason
            ));
        }
    }

    out.push('\n');
    out.push_str("  ── Store ──\n");
    out.push_str(&format!("    Documents: {}\n", stats.document_count));
    out.push_str(&format!("    Chunks:    {}\n", stats.chunk_count));
    out.push_str(&format!("    Elements:  {}\n", stats.content_element_count));
    out.push('\n');

    out.push_str(&format!("  docent is listening on {}\n", bind));
    out.push_str(&format!("  Tool endpoint: http://{}/tools/list\n", bind));

    out
}

fn format_duration(d: Duration) -> String {
    let total_sec = d.as_secs();
    if total_sec < 60 {
        return format!("{}s", total_sec);
    }
    let min = total_sec / 60;
    let sec = total_sec % 60;
    format!("{}m {}s", min, sec)
}
