use std::fmt::Write;

use crate::models::{RecapOutput, RecapRow};

/// The presentation layer shows two supervisor slots even when more scores
/// exist; the engine's average still covers the whole list.
fn supervisor_slot(row: &RecapRow, slot: usize) -> String {
    match row.supervisor_scores.get(slot) {
        Some(score) => format!("{score:.1}"),
        None => "-".to_string(),
    }
}

pub fn build_recap_report(period_name: &str, output: &RecapOutput) -> String {
    let mut text = String::new();

    let _ = writeln!(text, "# Crew Performance Recap");
    let _ = writeln!(text, "Period: {period_name}");
    let _ = writeln!(text);
    let _ = writeln!(text, "## Ranking");

    if output.rows.is_empty() {
        let _ = writeln!(text, "No crew to rank for this period.");
    } else {
        for row in &output.rows {
            let _ = writeln!(
                text,
                "{}. {} ({}, {}) crew {:.2} | spv1 {} | spv2 {} | final {:.2} | rated by {}/{} ({:.0}%)",
                row.rank,
                row.full_name,
                row.outlet,
                row.role,
                row.crew_score,
                supervisor_slot(row, 0),
                supervisor_slot(row, 1),
                row.final_score,
                row.actual_assessors,
                row.potential_assessors,
                row.completion_percent()
            );
        }
    }

    let _ = writeln!(text);
    let _ = writeln!(text, "## Best Performers by Aspect");

    for chart in &output.charts {
        let _ = writeln!(text);
        let _ = writeln!(text, "### {}", chart.aspect_key);
        if chart.leaders.is_empty() {
            let _ = writeln!(text, "No ratings for this aspect.");
        } else {
            for leader in &chart.leaders {
                let _ = writeln!(text, "- {} ({:.2})", leader.name, leader.score);
            }
        }
    }

    text
}
