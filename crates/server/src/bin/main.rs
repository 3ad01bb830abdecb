use sluice_server::SluiceServer;

#[derive(clap::Parser)]
#[command(name = "sluice", about = "Streaming SQL gateway over a shared Postgres pool")]
struct Args {
    #[arg(long, default_value = "config/sluice.yaml")]
    config: String,

    /// Override the configured listen address, e.g. 0.0.0.0:8080.
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = <Args as clap::Parser>::parse();

    let mut server = SluiceServer::new().with_config(&args.config);
    if let Some(listen) = &args.listen {
        server = server.with_listen_addr(listen);
    }

    server.run().await
}
