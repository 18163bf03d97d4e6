//! `inquest dlq` — inspect dead-lettered messages. Messages land here only
//! after exhausting their retry budget; getting them out again is a human
//! decision, not an automatic one.

use std::path::Path;

use crate::output;

pub fn run(config_path: &Path, json: bool) -> anyhow::Result<()> {
    let (_cfg, _store, queue) = super::open_databases(config_path)?;
    let letters = queue.list_dead_letters()?;

    if json {
        output::print_json(&letters)?;
        return Ok(());
    }

    if letters.is_empty() {
        println!("dead-letter log is empty");
        return Ok(());
    }

    let rows = letters
        .iter()
        .map(|l| {
            vec![
                l.seq.to_string(),
                l.message.issue_id.to_string(),
                l.message.event_log_id.to_string(),
                l.message.attempt.to_string(),
                l.dead_lettered_at.to_rfc3339(),
                l.reason.clone(),
            ]
        })
        .collect();
    output::print_table(
        &["seq", "issue", "event_log", "attempt", "dead_lettered_at", "reason"],
        rows,
    );
    Ok(())
}
