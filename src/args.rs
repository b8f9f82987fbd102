use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[clap(
        short,
        long,
        global = true,
        help = "Path to the engine config yaml file. Falls back to DEPOT_CONFIG, then to defaults."
    )]
    pub config: Option<String>,

    #[clap(subcommand)]
    pub subcmd: SubCommand,
}

#[derive(Parser, Debug, Clone)]
pub enum SubCommand {
    #[clap(name = "probe")]
    Probe(ProbeArgs),

    #[clap(name = "list")]
    List(ListArgs),

    #[clap(name = "peek")]
    Peek(PeekArgs),

    #[clap(name = "read")]
    Read(ReadArgs),

    #[clap(name = "manifest")]
    Manifest(ManifestArgs),

    #[clap(name = "verify")]
    Verify(VerifyArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct ProbeArgs {
    #[clap(help = "Path to check for a directory or zip archive.")]
    pub path: String,
}

#[derive(Parser, Debug, Clone)]
pub struct ListArgs {
    #[clap(help = "Path to the source directory or zip archive.")]
    pub source: String,
}

#[derive(Parser, Debug, Clone)]
pub struct PeekArgs {
    #[clap(help = "Path to the source directory or zip archive.")]
    pub source: String,

    #[clap(help = "Slash separated path of the entry inside the source.")]
    pub entry: String,
}

#[derive(Parser, Debug, Clone)]
pub struct ReadArgs {
    #[clap(help = "Path to the source directory or zip archive.")]
    pub source: String,

    #[clap(help = "Slash separated path of the entry inside the source.")]
    pub entry: String,

    #[clap(long, help = "First byte to read. Defaults to the start of the entry.")]
    pub start: Option<u64>,

    #[clap(
        long,
        help = "Byte to stop before (exclusive). Clamped to the entry length, defaults to it."
    )]
    pub end: Option<u64>,

    #[clap(short, long, help = "File to write the bytes to instead of stdout.")]
    pub output: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct ManifestArgs {
    #[clap(help = "Path to the source directory or zip archive.")]
    pub source: String,

    #[clap(short, long, help = "File to write the manifest json to instead of stdout.")]
    pub output: Option<String>,

    #[clap(long, help = "Pretty print the manifest json.")]
    pub pretty: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct VerifyArgs {
    #[clap(help = "Path to the source directory or zip archive.")]
    pub source: String,

    #[clap(help = "Path to a manifest json generated from the source.")]
    pub manifest: String,
}

#[must_use]
pub fn parse_args() -> Args {
    Args::parse()
}
