use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use clap::Parser;
use netwatch::{
    agent::{AgentServer, AgentSettings},
    console::{Console, StopReason},
    probes::{NetworkProbes, Probe},
    util::get_addr,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

/// Runs the checks a netwatch manager sends and streams their results back
#[derive(Debug, Clone, Parser)]
#[command(version)]
struct Args {
    /// Port to listen on for the manager
    port: u16,

    /// Address to bind
    #[arg(long, default_value_t = get_addr())]
    bind: IpAddr,

    /// Most verbose log level written to stderr
    #[arg(long, default_value_t = LevelFilter::TRACE)]
    log_level: LevelFilter,

    /// Do not print forwarded results to stdout
    #[arg(short, long)]
    quiet: bool,
}

fn init(level: LevelFilter) {
    let filter = filter::Targets::new()
        .with_targets(vec![("netwatch", level), ("netwatch_agent", level)]);
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

    let probe: Arc<dyn Probe> = Arc::new(NetworkProbes::new()?);
    let settings = AgentSettings {
        echo_results: !args.quiet,
        ..AgentSettings::default()
    };
    let addr = SocketAddr::new(args.bind, args.port);
    let mut console = Console::stdin();

    loop {
        let server = AgentServer::bind(addr, probe.clone(), settings.clone()).await?;
        let agent = server.spawn(&CancellationToken::new());

        let reason = console
            .wait_for_stop_or_interrupt("Enter 'stop' to terminate agent: ")
            .await?;
        agent.stop().await;

        if reason == StopReason::EndOfInput || !console.confirm("Start a new session?").await? {
            break;
        }
        info!("starting a new session");
    }

    Ok(())
}
