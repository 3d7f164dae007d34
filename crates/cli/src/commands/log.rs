use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use std::path::Path;
use timevault_node::events::{read_intent_log, LogEntry};

pub fn run(path: &Path) -> anyhow::Result<()> {
    let entries = read_intent_log(path)?;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["#", "Entry", "Intent", "Transfer", "Timestamp / Anchor"]);

    let mut unanchored = 0i64;
    for (seq, entry) in entries.iter().enumerate() {
        match entry {
            LogEntry::Intent(intent) => {
                unanchored += 1;
                table.add_row(vec![
                    seq.to_string(),
                    "intent".to_string(),
                    intent.id.clone(),
                    format!("{} -> {}: {} {}", intent.from, intent.to, intent.amount, intent.unit),
                    intent.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
                ]);
            }
            LogEntry::Anchored { intent_id, anchor_id } => {
                unanchored -= 1;
                table.add_row(vec![
                    seq.to_string(),
                    "anchored".to_string(),
                    intent_id.clone(),
                    String::new(),
                    anchor_id.clone(),
                ]);
            }
        }
    }

    println!("\nIntent Log Timeline\n");
    println!("{table}\n");
    if unanchored > 0 {
        println!("{} intent(s) still waiting for an anchor; the node re-anchors them on start.\n", unanchored);
    }

    Ok(())
}
