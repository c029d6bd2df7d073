use clap::Parser;
use docqa_server::{ServerArgs, run_server, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing();

    run_server(ServerArgs::parse()).await
}
