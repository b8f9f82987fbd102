use std::time::Instant;

use color_eyre::Result;
use futures::StreamExt;
use humantime::format_duration;
use tokio::{
    fs::File,
    io::{AsyncWrite, AsyncWriteExt},
};

use crate::{args::ReadArgs, engine::Engine, range_stream::RangeStream};

async fn copy_stream<W: AsyncWrite + Unpin>(mut stream: RangeStream, out: &mut W) -> Result<u64> {
    let mut written = 0;
    while let Some(buf) = stream.next().await {
        let buf = buf?;
        out.write_all(&buf).await?;
        written += buf.len() as u64;
    }
    out.flush().await?;
    Ok(written)
}

pub async fn run_read<W: AsyncWrite + Unpin>(args: ReadArgs, engine: &Engine, out: &mut W) -> Result<()> {
    let start_time = Instant::now();
    let stream = engine
        .read_range(&args.source, &args.entry, args.start, args.end)
        .await?;

    let written = match &args.output {
        Some(path) => copy_stream(stream, &mut File::create(path).await?).await?,
        None => copy_stream(stream, out).await?,
    };

    info!(
        "Read {} bytes of '{}' in {}",
        written,
        args.entry,
        format_duration(start_time.elapsed())
    );

    Ok(())
}
