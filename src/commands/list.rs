use color_eyre::Result;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{args::ListArgs, engine::Engine};

use super::{format_entry, write_line};

pub async fn run_list<W: AsyncWrite + Unpin>(args: ListArgs, engine: &Engine, out: &mut W) -> Result<()> {
    let entries = engine.list(&args.source).await?;

    for entry in &entries {
        write_line(out, &format_entry(entry)).await?;
    }
    out.flush().await?;

    info!(
        "Listed {} entries ({} bytes) in '{}'",
        entries.len(),
        entries.iter().map(|e| e.length).sum::<u64>(),
        args.source
    );

    Ok(())
}
