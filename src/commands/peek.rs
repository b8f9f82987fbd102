use color_eyre::Result;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{args::PeekArgs, engine::Engine};

use super::{format_entry, write_line};

pub async fn run_peek<W: AsyncWrite + Unpin>(args: PeekArgs, engine: &Engine, out: &mut W) -> Result<()> {
    let entry = engine.peek(&args.source, &args.entry).await?;
    write_line(out, &format_entry(&entry)).await?;
    out.flush().await?;
    Ok(())
}
