pub mod keygen;
pub mod inspect;
pub mod show;
pub mod lookup;
pub mod reconstruct;
pub mod sweep;
pub mod log;

use std::path::Path;

use timevault_node::config::SignaturePolicy;
use timevault_node::store::RecordStore;

/// Open an existing vault. Refuses to create one.
pub(crate) fn open_vault(vault: &Path) -> anyhow::Result<RecordStore> {
    if !vault.is_dir() {
        anyhow::bail!("vault directory {:?} does not exist", vault);
    }
    Ok(RecordStore::open(vault, SignaturePolicy::Trust)?)
}
