//! `ledgerpdf verify`: re-derive a page's digest and signature, and
//! optionally diagnose how supplied text drifted from the ledgered
//! original (spec.md §4.A "verification" / §4 similarity diagnostic).

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use ledgerpdf_core::{Ledger, TextMatcher};

use crate::config::LedgerArgs;
use crate::similarity::KmpTextMatcher;

#[derive(Args, Debug, Clone)]
pub struct VerifyArgs {
    #[command(flatten)]
    pub ledger: LedgerArgs,

    /// Title of the document to verify.
    pub title: String,

    /// One-based page number to verify.
    pub page: u64,

    /// Candidate text to compare against the ledgered page, e.g. a
    /// re-extracted copy of a document suspected of tampering.
    #[arg(long)]
    pub compare_to: Option<PathBuf>,
}

pub async fn run(args: VerifyArgs) -> anyhow::Result<()> {
    args.ledger.validate()?;
    let ledger = Arc::new(Ledger::open(args.ledger.ledger_config()).await?);

    let pages = ledger.get_by_title(&args.title).await;
    let block = pages
        .iter()
        .find(|b| b.data.as_page().map(|p| p.page) == Some(args.page - 1))
        .ok_or_else(|| anyhow::anyhow!("no page {} recorded for \"{}\"", args.page, args.title))?;
    let page = block.data.as_page().expect("looked up by page index, must be a Page block");

    let digest = ledgerpdf_core::page_digest(&page.content, &page.title, args.page as i64);
    let signature_valid = ledgerpdf_crypto::verify_digest(&digest, &block.signature, &page.public_key)?;
    let hash_valid = block.recompute_hash() == block.current_hash;

    println!("block {}: hash valid = {hash_valid}, signature valid = {signature_valid}", block.index);

    if let Some(compare_path) = &args.compare_to {
        let candidate = std::fs::read_to_string(compare_path)
            .map_err(|e| anyhow::anyhow!("reading {}: {e}", compare_path.display()))?;
        let result = KmpTextMatcher.compare(&page.content, &candidate);
        println!("text comparison: {:?} ({:.1}% similar)", result.kind, result.similarity);
    }

    if !hash_valid || !signature_valid {
        anyhow::bail!("page {} of \"{}\" failed verification", args.page, args.title);
    }
    Ok(())
}
