use std::path::Path;
use timevault_node::store::StoredRecord;

use super::open_vault;

pub fn run(vault: &Path, id: &str) -> anyhow::Result<()> {
    let store = open_vault(vault)?;
    let record = store
        .get(id)
        .ok_or_else(|| anyhow::anyhow!("no anchor or stub with id {}", id))?;

    let label = match &record {
        StoredRecord::Anchor(anchor) => format!("anchor ({:?})", anchor.status).to_lowercase(),
        StoredRecord::Stub(_) => "stub".to_string(),
    };
    println!("\n{} [{}]\n", id, label);
    println!("{}", serde_json::to_string_pretty(&record)?);

    Ok(())
}
