use std::path::Path;
use timevault_node::store::{IndexFile, StoredRecord, INDEX_FILE};

use super::open_vault;

/// Resolve a digest to a record id: the persisted index first, then a full scan.
pub fn resolve(vault: &Path, digest: &str) -> anyhow::Result<Option<String>> {
    if let Ok(index) = IndexFile::load(&vault.join(INDEX_FILE)) {
        if let Some(id) = index.digests.get(digest) {
            return Ok(Some(id.clone()));
        }
    }
    Ok(open_vault(vault)?.find_by_digest(digest))
}

pub fn run(vault: &Path, digest: &str) -> anyhow::Result<()> {
    let id = resolve(vault, digest)?.ok_or_else(|| anyhow::anyhow!("no record with entropy hash {}", digest))?;

    let store = open_vault(vault)?;
    match store.get(&id) {
        Some(StoredRecord::Anchor(anchor)) => {
            println!("\n{} -> live anchor {}\n", digest, id);
            println!("{}", serde_json::to_string_pretty(&anchor)?);
        }
        Some(StoredRecord::Stub(stub)) => {
            println!("\n{} -> stub {} (decayed {})\n", digest, id, stub.decayed_at.to_rfc3339());
            println!("{}", serde_json::to_string_pretty(&stub)?);
            println!("\nRun `timevault reconstruct {}` to regenerate it.", id);
        }
        None => anyhow::bail!("index points at {} but the record is gone", id),
    }

    Ok(())
}
