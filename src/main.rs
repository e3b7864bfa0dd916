use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use chat_relay::{
    cli::{Cli, Command, ServeArgs},
    client,
    config::Config,
    server::RelayServer,
    tls,
};

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args).await?,
        Command::Client(args) => client::run(args).await?,
    }

    Ok(())
}

async fn serve(args: ServeArgs) -> Result<()> {
    let config = Config::from_env();
    let acceptor = match config.tls_paths()? {
        Some((cert, key)) => Some(tls::load_acceptor(cert, key)?),
        None => None,
    };

    let listener = match args.listen {
        Some(addr) => TcpListener::bind(addr).await?,
        None => TcpListener::bind(config.bind_addr()).await?,
    };

    let server = RelayServer::new(listener, acceptor);
    let addr = server.local_addr()?;
    info!("relay listening on {}", addr);

    if let Err(err) = server.run_until_ctrl_c().await {
        warn!("relay exited with error: {err:?}");
        return Err(err);
    }

    Ok(())
}
