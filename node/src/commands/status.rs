//! `ledgerpdf status`: chain height, tip, and validity at a glance.

use std::sync::Arc;

use clap::Args;
use ledgerpdf_core::Ledger;

use crate::config::LedgerArgs;

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[command(flatten)]
    pub ledger: LedgerArgs,
}

pub async fn run(args: StatusArgs) -> anyhow::Result<()> {
    args.ledger.validate()?;
    let ledger = Arc::new(Ledger::open(args.ledger.ledger_config()).await?);

    let height = ledger.length().await;
    let valid = ledger.is_valid().await;
    let titles = ledger.known_titles().await;

    match ledger.latest().await {
        Some(tip) => println!(
            "height={height} tip_index={} tip_hash={} valid={valid} documents={}",
            tip.index,
            tip.current_hash,
            titles.len()
        ),
        None => println!("height=0 valid={valid} documents=0"),
    }
    Ok(())
}
