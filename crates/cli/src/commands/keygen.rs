use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use std::path::Path;
use timevault_node::identity::{self, NODE_ID_FILE, PRIVATE_KEY_FILE, PUBLIC_KEY_FILE};

pub fn run(dir: &Path) -> anyhow::Result<()> {
    let identity = identity::write_new(dir)?;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Field", "Value"]);

    table.add_row(vec!["Node ID".to_string(), identity.node_id().to_string()]);
    table.add_row(vec!["Public key".to_string(), identity.public_key()]);
    for name in [PRIVATE_KEY_FILE, PUBLIC_KEY_FILE, NODE_ID_FILE] {
        table.add_row(vec!["Wrote".to_string(), dir.join(name).display().to_string()]);
    }

    println!("\nNode Identity\n");
    println!("{table}\n");
    println!("Keep {} private. The node never rewrites these files.", PRIVATE_KEY_FILE);

    Ok(())
}
