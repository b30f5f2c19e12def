//! `ledgerpdf register`: submit a document's pages for signing and mining
//! (spec.md §4.A "submission" / §4.D "document task").

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use ledgerpdf_core::{Ledger, NullCoordinator, PageRecord};
use ledgerpdf_consensus::{DocumentTask, MiningWorker, WorkerConfig};

use crate::config::LedgerArgs;
use crate::pdf::{JsonPagesReader, PdfReader};

#[derive(Args, Debug, Clone)]
pub struct RegisterArgs {
    #[command(flatten)]
    pub ledger: LedgerArgs,

    /// Pre-extracted pages file (a JSON array of per-page strings).
    pub document: PathBuf,

    /// Document title; defaults to the document file's name.
    #[arg(long)]
    pub title: Option<String>,

    /// PEM private key used to sign each page digest.
    #[arg(long)]
    pub private_key: PathBuf,

    /// PEM public key stored alongside each page, for later verification.
    #[arg(long)]
    pub public_key: PathBuf,
}

pub async fn run(args: RegisterArgs) -> anyhow::Result<()> {
    args.ledger.validate()?;
    let ledger = Arc::new(Ledger::open(args.ledger.ledger_config()).await?);

    let reader = JsonPagesReader;
    let known_titles = ledger.known_titles().await;
    let title = match &args.title {
        Some(title) => title.clone(),
        None => reader
            .title(&args.document, &known_titles)?
            .ok_or_else(|| anyhow::anyhow!("a document titled after this file name is already registered"))?,
    };

    let (private_key, public_key) = crate::keys::load_keypair(&args.private_key, &args.public_key)?;
    let pages = reader.pages(&args.document)?;
    if pages.is_empty() {
        anyhow::bail!("{} contains no pages", args.document.display());
    }

    let mut signed_pages = Vec::with_capacity(pages.len());
    for (i, content) in pages.iter().enumerate() {
        let page_number = i as i64 + 1;
        let digest = ledgerpdf_core::page_digest(content, &title, page_number);
        let signature = ledgerpdf_crypto::sign_digest(&digest, &private_key)?;
        signed_pages.push((
            PageRecord {
                title: title.clone(),
                page: i as u64,
                content: content.clone(),
                public_key: public_key.clone(),
            },
            signature,
        ));
    }

    let worker = MiningWorker::new(ledger.clone(), Arc::new(NullCoordinator), WorkerConfig::default());
    worker.enqueue(DocumentTask::new(signed_pages)).await;

    let run_handle = tokio::spawn(worker.clone().run());
    worker.wait_idle().await;
    worker.stop();
    run_handle.await?;

    println!("registered \"{title}\" ({} pages); chain height is now {}", pages.len(), ledger.length().await);
    Ok(())
}
