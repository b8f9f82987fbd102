pub mod list;
pub mod manifest;
pub mod peek;
pub mod probe;
pub mod read;
pub mod verify;

use color_eyre::Result;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::source::Entry;

async fn write_line<W: AsyncWrite + Unpin>(out: &mut W, line: &str) -> Result<()> {
    out.write_all(line.as_bytes()).await?;
    out.write_all(b"\n").await?;
    Ok(())
}

fn format_entry(entry: &Entry) -> String {
    format!("{:06o}\t{}\t{}", entry.permissions, entry.length, entry.path)
}
