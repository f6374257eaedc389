use anyhow::Result;

pub mod config;
pub mod inspect;
pub mod serve;
pub mod status;

#[allow(async_fn_in_trait)]
pub trait Command {
    async fn execute(&self) -> Result<()>;
}

pub async fn show_how_to_use() -> Result<()> {
    println!("🛰️  Cluster Coordinator - Agent Node Task Placement");
    println!();
    println!("To get started:");
    println!("  🚀 cluster-coordinator serve     # Run the coordinator");
    println!("  📊 cluster-coordinator status    # Overview from a running coordinator");
    println!();
    println!("Offline tools:");
    println!("  🔍 cluster-coordinator inspect   # Read a snapshot file");
    println!("  ⚙️  cluster-coordinator config    # Show effective configuration");
    println!();
    println!("💡 Start with 'cluster-coordinator serve', then register nodes against /api/nodes/register");
    Ok(())
}

/// Shorten a timestamp-ish column value for table output
pub(crate) fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        value.to_string()
    } else {
        let mut out: String = value.chars().take(width.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}
