use std::time::Instant;

use color_eyre::{eyre::bail, Result};
use humantime::format_duration;
use tokio::{
    fs::read_to_string,
    io::{AsyncWrite, AsyncWriteExt},
};

use crate::{args::VerifyArgs, engine::Engine, manifest::Manifest};

use super::write_line;

pub async fn run_verify<W: AsyncWrite + Unpin>(args: VerifyArgs, engine: &Engine, out: &mut W) -> Result<()> {
    let start_time = Instant::now();
    let manifest = Manifest::from_json(&read_to_string(&args.manifest).await?)?;

    let handle = engine.open(&args.source).await?;
    let report = handle.verify_manifest(manifest).await?;

    for path in &report.missing {
        write_line(out, &format!("missing\t{path}")).await?;
    }
    write_line(
        out,
        &format!("chunks ok: {}, chunks bad: {}", report.chunks_ok, report.chunks_bad),
    )
    .await?;
    out.flush().await?;

    info!(
        "Verified '{}' against '{}' in {}",
        args.source,
        args.manifest,
        format_duration(start_time.elapsed())
    );

    if !report.is_ok() {
        bail!(
            "'{}' does not match its manifest ({} bad chunks, {} missing entries)",
            args.source,
            report.chunks_bad,
            report.missing.len()
        );
    }

    Ok(())
}
