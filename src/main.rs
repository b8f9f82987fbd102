use std::time::Duration;

use color_eyre::eyre::Result;
use depot::{
    args::{parse_args, Args, SubCommand},
    commands::{
        list::run_list, manifest::run_manifest, peek::run_peek, probe::run_probe, read::run_read,
        verify::run_verify,
    },
    config::EngineConfig,
    engine::Engine,
};
use dotenvy::dotenv;
use pretty_env_logger::formatted_timed_builder;
use tokio::{io::stdout, runtime::Builder};

extern crate pretty_env_logger;
#[macro_use]
extern crate log;

const DEFAULT_DEBUG_LOG_LEVEL: &str = "depot=trace";
const DEFAULT_RELEASE_LOG_LEVEL: &str = "depot=info";

const CONFIG_ENV_VAR: &str = "DEPOT_CONFIG";

async fn load_config(path: Option<String>) -> Result<EngineConfig> {
    let Some(path) = path.or_else(|| std::env::var(CONFIG_ENV_VAR).ok()) else {
        return Ok(EngineConfig::default());
    };
    debug!("Loading config from '{}'", path);
    EngineConfig::from_path(&path).await
}

async fn async_main(args: Args) -> Result<()> {
    let config = load_config(args.config).await?;
    let engine = Engine::new(config)?;
    let mut out = stdout();

    match args.subcmd {
        SubCommand::Probe(probe_args) => {
            run_probe(probe_args, &mut out).await?;
        }
        SubCommand::List(list_args) => {
            run_list(list_args, &engine, &mut out).await?;
        }
        SubCommand::Peek(peek_args) => {
            run_peek(peek_args, &engine, &mut out).await?;
        }
        SubCommand::Read(read_args) => {
            run_read(read_args, &engine, &mut out).await?;
        }
        SubCommand::Manifest(manifest_args) => {
            run_manifest(manifest_args, &engine, &mut out).await?;
        }
        SubCommand::Verify(verify_args) => {
            run_verify(verify_args, &engine, &mut out).await?;
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    color_eyre::install()?;

    // Load vars inside .env into env vars, does nothing if the file does not exist.
    let _ = dotenv();

    let default_log_level = if cfg!(debug_assertions) {
        DEFAULT_DEBUG_LOG_LEVEL
    } else {
        DEFAULT_RELEASE_LOG_LEVEL
    };

    let mut log_builder = formatted_timed_builder();
    log_builder.parse_filters(
        &std::env::var("RUST_LOG").unwrap_or_else(|_| default_log_level.to_string()),
    );
    log_builder.try_init()?;

    let args = parse_args();

    let runtime = Builder::new_multi_thread()
        .thread_keep_alive(Duration::from_secs(20))
        .enable_all()
        .build()?;
    runtime.block_on(async_main(args))
}
