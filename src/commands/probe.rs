use std::path::Path;

use color_eyre::Result;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{args::ProbeArgs, source::has_source_for_path};

use super::write_line;

pub async fn run_probe<W: AsyncWrite + Unpin>(args: ProbeArgs, out: &mut W) -> Result<()> {
    let path = Path::new(&args.path);
    let kind = if !has_source_for_path(path) {
        "unsupported"
    } else if path.is_dir() {
        "directory"
    } else {
        "zip archive"
    };

    write_line(out, &format!("{}: {}", args.path, kind)).await?;
    out.flush().await?;
    Ok(())
}
