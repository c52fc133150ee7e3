use std::path::PathBuf;

use anyhow::bail;
use clap::Parser;
use netwatch::{
    config::{list_config_files, read_config_file, resolve_config_path},
    console::{Console, StopReason},
    manager::{ManagerHandle, SessionSettings},
    sink::StdoutRenderer,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

/// Sends each agent its checks and prints the results they stream back
#[derive(Debug, Clone, Parser)]
#[command(version)]
struct Args {
    /// Config file, or the name of a configuration saved in --config-dir
    #[arg(short, required_unless_present = "list")]
    file: Option<String>,

    /// Directory holding saved configurations
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// List the configurations saved in --config-dir and exit
    #[arg(long, requires = "config_dir")]
    list: bool,

    /// Most verbose log level written to stderr
    #[arg(long, default_value_t = LevelFilter::TRACE)]
    log_level: LevelFilter,
}

fn init(level: LevelFilter) {
    let filter = filter::Targets::new()
        .with_targets(vec![("netwatch", level), ("netwatch_manager", level)]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init(args.log_level);
    trace!("started with args: {args:?}");

    if args.list {
        if let Some(dir) = &args.config_dir {
            for path in list_config_files(dir)? {
                if let Some(name) = path.file_stem() {
                    println!("{}", name.to_string_lossy());
                }
            }
        }
        return Ok(());
    }

    let Some(file) = &args.file else {
        bail!("no configuration file given");
    };
    let path = resolve_config_path(args.config_dir.as_deref(), file);
    let mut console = Console::stdin();

    loop {
        let config = read_config_file(&path)?;
        if config.is_empty() {
            bail!("{} does not configure any agent", path.display());
        }
        eprint!("{config}");

        let manager = ManagerHandle::spawn(
            &config,
            StdoutRenderer,
            SessionSettings::from_env(),
            &CancellationToken::new(),
        );

        let reason = console
            .wait_for_stop_or_interrupt("Enter 'stop' to terminate manager: ")
            .await?;
        let rendered = manager.stop().await;
        info!("session ended after {rendered} results");

        if reason == StopReason::EndOfInput || !console.confirm("Start a new session?").await? {
            break;
        }
        info!("reloading {}", path.display());
    }

    Ok(())
}
