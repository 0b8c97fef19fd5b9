use clap::Parser;
use log::info;
use server::network::{Server, ServerConfig};

/// Networked competition aggregation server.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Reader pool size: worker threads handling socket I/O and parsing
    p_r: usize,

    /// Writer pool size: aggregation workers draining the ingestion queue
    p_w: usize,

    /// Ranking cache validity window in milliseconds
    delta_t: i64,

    /// TCP port to listen on
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    if args.p_r == 0 || args.p_w == 0 {
        return Err("worker pool sizes must be at least 1".into());
    }

    info!(
        "starting server with p_r={} p_w={} delta_t={}ms port={}",
        args.p_r, args.p_w, args.delta_t, args.port
    );

    // Total OS parallelism matches the two configured pools: connection I/O
    // tasks ride the runtime workers, aggregation tasks occupy the rest.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(args.p_r + args.p_w)
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let mut config = ServerConfig::new(args.p_w, args.delta_t);
        config.port = args.port;

        let server = Server::bind(config).await?;
        let handle = server.handle();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received; shutting down");
                handle.shutdown();
            }
        });

        server.run().await?;
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;

    Ok(())
}
