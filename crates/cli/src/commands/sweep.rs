use chrono::{DateTime, Utc};
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use std::path::Path;
use std::sync::Arc;
use timevault_kernel::DecayPolicy;
use timevault_node::decay::{DecayEngine, SweepReport};

use super::open_vault;

/// Offline decay sweep with the default policy. `now` is RFC 3339.
pub fn run(vault: &Path, now: Option<String>) -> anyhow::Result<SweepReport> {
    let now = match now {
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map_err(|e| anyhow::anyhow!("bad --now {:?}: {}", raw, e))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };

    let store = Arc::new(open_vault(vault)?);
    let engine = DecayEngine::new(store, DecayPolicy::default());
    let report = engine.sweep_now(now);

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Scanned", "Decayed", "Purged", "Permanent"]);
    table.add_row(vec![
        report.scanned.to_string(),
        report.decayed.to_string(),
        report.purged.to_string(),
        report.permanent.to_string(),
    ]);

    println!("\nDecay sweep at {}\n", now.to_rfc3339());
    println!("{table}\n");

    Ok(report)
}
