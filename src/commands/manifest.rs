use std::time::Instant;

use color_eyre::Result;
use humantime::format_duration;
use tokio::{
    fs::write,
    io::{AsyncWrite, AsyncWriteExt},
};

use crate::{args::ManifestArgs, engine::Engine, manifest::ProgressHooks};

use super::write_line;

fn progress_hooks() -> ProgressHooks {
    ProgressHooks::new()
        .on_entry(|p| info!("[{}/{}] {}", p.current, p.total, p.path))
        .on_chunk(|p| {
            if p.count > 1 {
                debug!(
                    "'{}': chunk {}/{} ({}/{} bytes)",
                    p.path,
                    p.index + 1,
                    p.count,
                    p.bytes_done,
                    p.bytes_total
                );
            }
        })
}

pub async fn run_manifest<W: AsyncWrite + Unpin>(
    args: ManifestArgs,
    engine: &Engine,
    out: &mut W,
) -> Result<()> {
    let start_time = Instant::now();
    let manifest = engine
        .generate_manifest(&args.source, progress_hooks())
        .await?;
    let json = manifest.to_json(args.pretty)?;

    match &args.output {
        Some(path) => write(path, json).await?,
        None => {
            write_line(out, &json).await?;
            out.flush().await?;
        }
    }

    info!(
        "Generated manifest of {} entries ({} chunks, {} bytes) in {}",
        manifest.len(),
        manifest.total_chunks(),
        manifest.total_bytes(),
        format_duration(start_time.elapsed())
    );

    Ok(())
}
