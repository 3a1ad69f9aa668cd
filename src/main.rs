/// Review Desk - moderation service for student content
use anyhow::Context;
use review_desk::{config::ServerConfig, server, AppContext};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env().context("loading configuration")?;

    let filter = tracing_subscriber::EnvFilter::try_new(&config.logging.level)
        .context("parsing log filter")?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    print_banner();

    let ctx = AppContext::new(config)
        .await
        .context("initialising application context")?;

    server::serve(ctx).await?;

    Ok(())
}

fn print_banner() {
    println!(
        r#"
    ____            _                 ____            __
   / __ \___ _   __(_)__ _      __   / __ \___  _____/ /__
  / /_/ / _ \ | / / / _ \ | /| / /  / / / / _ \/ ___/ //_/
 / _, _/  __/ |/ / /  __/ |/ |/ /  / /_/ /  __(__  ) ,<
/_/ |_|\___/|___/_/\___/|__/|__/  /_____/\___/____/_/|_|

        Student content moderation v{}
        "#,
        env!("CARGO_PKG_VERSION")
    );
}
