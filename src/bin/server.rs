use clap::Parser;

use tally::env::Env;
use tally::{launch, setup_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = Env::parse();
    let config = env.into_config()?;

    setup_tracing(&config.log_level);

    launch(config).await
}
