//! Human-readable output

use colored::Colorize;

use sift_core::dedup::{DedupResult, DuplicateReason};
use sift_core::{CandidateChunk, QualityReport, RetrievalOutcome};

/// Truncate a string for display (UTF-8 safe)
pub fn truncate(s: &str, max_chars: usize) -> String {
    let s = s.replace('\n', " ");
    if s.chars().count() <= max_chars {
        s
    } else {
        let truncated: String = s.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

fn print_count(label: &str, count: usize, total: usize) {
    let percentage = if total > 0 {
        (count as f64 / total as f64) * 100.0
    } else {
        0.0
    };
    let bar_width: usize = 30;
    let filled = ((percentage / 100.0) * bar_width as f64) as usize;
    let bar = format!(
        "{}{}",
        "#".repeat(filled),
        "-".repeat(bar_width.saturating_sub(filled))
    );
    println!(
        "  {:18} [{:30}] {:>4} ({:>5.1}%)",
        label,
        bar.green(),
        count,
        percentage
    );
}

fn print_chunk(rank: usize, chunk: &CandidateChunk) {
    let mut tags = Vec::new();
    if let Some(entity) = &chunk.metadata.comparison_entity {
        tags.push(format!("entity={entity}"));
    }
    if let Some(kind) = chunk.metadata.expansion_type {
        tags.push(format!("{kind:?}").to_lowercase());
    }
    if chunk.metadata.original_content.is_some() {
        tags.push("compressed".to_string());
    }

    println!(
        "{:>3}. {} {} {}",
        rank,
        format!("{:.4}", chunk.effective_score()).green(),
        chunk.identity().to_string().white().bold(),
        tags.join(" ").magenta()
    );
    if !chunk.metadata.heading_path.is_empty() {
        println!("     {}", chunk.metadata.heading_path.join(" > ").dimmed());
    }
    println!("     {}", truncate(&chunk.content, 100));
}

pub fn print_outcome(query: &str, outcome: &RetrievalOutcome) {
    let metrics = &outcome.metrics;

    println!("{}", "=== Retrieval ===".cyan().bold());
    println!("{}: {}", "Query".white().bold(), query);
    println!("{}: {}", "Strategy".white().bold(), outcome.strategy_name);
    println!(
        "{}: {} calls, {} candidates, {} after dedup, {} after filter",
        "Pipeline".white().bold(),
        metrics.retrieval_calls,
        metrics.candidates_retrieved,
        metrics.after_dedup,
        metrics.after_filter
    );
    if let Some(provider) = &metrics.reranker_provider {
        let status = if metrics.rerank_success == Some(true) {
            "ok".green()
        } else {
            "fallback".yellow()
        };
        println!("{}: {} ({})", "Reranker".white().bold(), provider, status);
    }
    if metrics.siblings_added > 0 {
        println!("{}: {}", "Siblings Added".white().bold(), metrics.siblings_added);
    }
    if metrics.docs_compressed > 0 {
        println!("{}: {}", "Compressed".white().bold(), metrics.docs_compressed);
    }
    println!("{}: {} ms", "Elapsed".white().bold(), metrics.elapsed_ms);

    if !metrics.degraded.is_empty() {
        println!();
        println!("{}", "Degraded stages:".yellow().bold());
        for degradation in &metrics.degraded {
            println!("  {} {}", "!".yellow(), degradation);
        }
    }

    println!();
    if outcome.documents.is_empty() {
        println!("{}", "No documents.".dimmed());
        return;
    }
    for (i, chunk) in outcome.documents.iter().enumerate() {
        print_chunk(i + 1, chunk);
    }
}

pub fn print_quality(report: &QualityReport, kept: &[CandidateChunk]) {
    println!("{}", "=== Quality Filter ===".cyan().bold());
    print_count("Kept", report.kept, report.input);
    print_count("Junk", report.dropped_junk, report.input);
    print_count("Too small", report.dropped_tiny, report.input);
    print_count("Irrelevant code", report.dropped_code, report.input);
    if report.fell_back {
        println!(
            "{}",
            "Everything was filtered; kept the best chunk instead.".yellow()
        );
    }

    println!();
    for (i, chunk) in kept.iter().enumerate() {
        print_chunk(i + 1, chunk);
    }
}

pub fn print_dedup(workspace: &str, result: &DedupResult, recorded: Option<usize>) {
    let stats = &result.stats;

    println!("{}", "=== Dedup ===".cyan().bold());
    println!("{}: {}", "Workspace".white().bold(), workspace);
    if !stats.store_available {
        println!(
            "{}",
            "Index unavailable: only in-batch duplicates were detected.".red()
        );
    }
    print_count("Unique", stats.unique, stats.total);
    print_count("Already indexed", stats.duplicates_indexed, stats.total);
    print_count("Repeated in batch", stats.duplicates_in_batch, stats.total);
    if let Some(n) = recorded {
        println!("{}: {}", "Recorded".white().bold(), n);
    }

    if !result.duplicates.is_empty() {
        println!();
        for dup in &result.duplicates {
            let reason = match dup.reason {
                DuplicateReason::Indexed => "indexed".yellow(),
                DuplicateReason::InBatch => "in batch".magenta(),
            };
            println!(
                "  {} {} {}",
                reason,
                &dup.content_hash[..12.min(dup.content_hash.len())],
                truncate(&dup.chunk.content, 70).dimmed()
            );
        }
    }
}
