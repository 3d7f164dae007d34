use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use timevault_kernel::{reconstruct_from_stub, DecayPolicy};
use timevault_node::decay::DecayEngine;

use super::open_vault;

/// Print the reconstruction of stub `id`; with `write`, persist it and drop the stub.
pub fn run(vault: &Path, id: &str, write: bool) -> anyhow::Result<()> {
    let store = Arc::new(open_vault(vault)?);
    let now = Utc::now();

    let anchor = if write {
        let engine = DecayEngine::new(store, DecayPolicy::default());
        engine
            .reconstruct(id, now)?
            .ok_or_else(|| anyhow::anyhow!("no stub or anchor with id {}", id))?
    } else {
        let stub = store.get_stub(id).ok_or_else(|| anyhow::anyhow!("no stub with id {}", id))?;
        reconstruct_from_stub(&stub, now)
    };

    println!("{}", serde_json::to_string_pretty(&anchor)?);
    if !write {
        println!("\n(dry run: pass --write to persist)");
    }

    Ok(())
}
