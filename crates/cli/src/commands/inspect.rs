use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use std::path::Path;
use timevault_node::store::{IndexFile, INDEX_FILE};

use super::open_vault;

pub fn run(vault: &Path) -> anyhow::Result<()> {
    // Read the persisted index before opening rewrites it
    let index_path = vault.join(INDEX_FILE);
    let index_status = if index_path.exists() {
        match IndexFile::load(&index_path) {
            Ok(index) => (
                "FOUND",
                format!("{} digests, {} accounts ({})", index.digests.len(), index.accounts.len(), index.version),
            ),
            Err(e) => ("CORRUPT", e.to_string()),
        }
    } else {
        ("MISSING", String::new())
    };

    let store = open_vault(vault)?;
    let census = store.census();

    println!("\nTimeVault Status Report");
    println!("-----------------------");

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Item", "Count", "Details"]);

    table.add_row(vec![
        "Live anchors".to_string(),
        census.anchors.to_string(),
        format!("{} pending, {} reconstructed", census.pending, census.reconstructed),
    ]);
    table.add_row(vec!["Permanent".to_string(), census.permanent.to_string(), "never decay".to_string()]);
    table.add_row(vec!["Stubs".to_string(), census.stubs.to_string(), String::new()]);
    table.add_row(vec![
        "Corrupt files".to_string(),
        census.corrupt.to_string(),
        if census.corrupt > 0 { "purged by the next sweep".to_string() } else { String::new() },
    ]);
    table.add_row(vec![
        "Index".to_string(),
        census.indexed_digests.to_string(),
        format!("{} {}", index_status.0, index_status.1).trim().to_string(),
    ]);

    println!("{table}\n");

    Ok(())
}
