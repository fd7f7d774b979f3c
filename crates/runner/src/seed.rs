//! Queue seeding from a plain list of payload expressions.

use std::path::Path;

use anyhow::Context;

use simflow_core::SettingsGrid;
use simflow_infra::QueueStore;

/// Payload expressions, one per line. Blank lines and `#` comments are
/// skipped.
pub fn read_payloads(path: impl AsRef<Path>) -> anyhow::Result<Vec<String>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading payload list {}", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Expand `payloads` with `grid` and append them to the queue.
pub fn seed_queue(queue: &QueueStore, grid: &SettingsGrid, payloads: Vec<String>) -> anyhow::Result<usize> {
    let jobs = grid.expand(payloads);
    queue
        .append(&jobs)
        .with_context(|| format!("appending to {}", queue.path().display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_list_skips_comments_and_blanks() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("alphas.txt");
        std::fs::write(&list, "# ratios\nrank(close/open)\n\n  -ts_delta(close, 5)  \n").unwrap();

        assert_eq!(
            read_payloads(&list).unwrap(),
            vec!["rank(close/open)", "-ts_delta(close, 5)"]
        );
    }

    #[test]
    fn seeding_expands_over_the_grid() {
        let dir = tempfile::tempdir().unwrap();
        let queue = QueueStore::new(dir.path().join("pending.csv"));
        let grid = SettingsGrid::fast_expression_defaults().axis("decay", [0i64, 4, 8]);

        let written = seed_queue(&queue, &grid, vec!["rank(a)".into(), "rank(b)".into()]).unwrap();

        assert_eq!(written, 6);
        assert_eq!(queue.len().unwrap(), 6);
        let first = queue.peek_batch(1).unwrap().into_descriptors().remove(0);
        assert_eq!(first.payload(), "rank(a)");
    }
}
