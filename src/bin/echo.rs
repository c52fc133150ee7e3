use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use clap::Parser;
use netwatch::{
    console::Console,
    echo::{DEFAULT_ECHO_PORT, EchoServer},
};
use tokio_util::sync::CancellationToken;
use tracing::{level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

/// Echoes every byte back, as a target for Echo checks
#[derive(Debug, Clone, Parser)]
#[command(version)]
struct Args {
    #[arg(short, long, default_value_t = DEFAULT_ECHO_PORT)]
    port: u16,

    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    bind: IpAddr,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("netwatch", LevelFilter::DEBUG),
        ("netwatch_echo", LevelFilter::TRACE),
    ]);
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
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let server = EchoServer::bind(SocketAddr::new(args.bind, args.port)).await?;
    let handle = server.spawn(&CancellationToken::new());

    Console::stdin()
        .wait_for_stop_or_interrupt("Enter 'stop' to kill server: ")
        .await?;
    handle.stop().await;

    Ok(())
}
