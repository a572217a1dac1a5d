use std::fmt::Write;

use blackjack_rl::training::{BucketStats, ResultsTable};

/// Renders an evaluation as a plain-text table, one row per true-count bucket
/// followed by the total.
pub fn format_results(results: &ResultsTable) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:>6} {:>10} {:>8} {:>8} {:>8} {:>8} {:>11} {:>9}",
        "tc", "episodes", "win %", "loss %", "tie %", "bj %", "avg reward", "per unit"
    );
    for (bucket, stats) in results.rows() {
        write_row(&mut out, &format!("{:+}", bucket), stats);
    }
    write_row(&mut out, "all", &results.overall());
    out
}

fn write_row(out: &mut String, label: &str, stats: &BucketStats) {
    let _ = writeln!(
        out,
        "{:>6} {:>10} {:>8.2} {:>8.2} {:>8.2} {:>8.2} {:>11.4} {:>9.4}",
        label,
        stats.episodes,
        stats.win_rate(),
        stats.loss_rate(),
        stats.tie_rate(),
        stats.blackjack_rate(),
        stats.average_reward(),
        stats.return_per_unit(),
    );
}
