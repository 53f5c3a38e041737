//! aurorawatch - print the current AuroraWatch UK alert status.
//!
//! Reads configuration from `<user config dir>/aurorawatch/config.ini` and
//! `AURORAWATCH_*` environment variables, then prints the status, the level
//! descriptions, the latest activity reading and any current messages. All
//! output comes from one snapshot, so it describes a single moment.
//!
//! Set `RUST_LOG=aurorawatch=debug` to see cache decisions.

use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use aurorawatch::{AuroraWatch, AuroraWatchClient, ClientConfig, Message};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays clean for the report
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("aurorawatch=info".parse()?))
        .init();

    let config = ClientConfig::load()?;
    info!(base_url = %config.base_url, lang = %config.lang, "Querying AuroraWatch UK");

    let client = AuroraWatchClient::new(config)?;
    let snapshot = client.snapshot();

    let status = snapshot.status().await?;
    println!("Status:      {}", status.level);
    println!("Color:       {}", snapshot.status_color().await?);
    println!("Description: {}", snapshot.status_description().await?);
    println!("Meaning:     {}", snapshot.status_meaning().await?);
    println!("Updated:     {}", status.updated.to_rfc3339());
    println!("Next update: {}", status.expires.to_rfc3339());
    print_messages(status.displayable_messages());

    println!();
    println!("Levels:");
    for (level, description) in snapshot.descriptions().await?.iter() {
        println!("  {:<7} {}  {}", level.as_str(), description.color, description.description);
    }

    match snapshot.activity().await {
        Ok(activity) => {
            let latest = activity.latest();
            println!();
            println!(
                "Latest activity: {} nT at {} ({})",
                latest.rounded_value(),
                latest.datetime.to_rfc3339(),
                latest.level
            );
            print_messages(activity.displayable_messages());
        }
        Err(e) => warn!(error = %e, "Activity unavailable"),
    }

    Ok(())
}

fn print_messages<'a>(messages: impl Iterator<Item = &'a Message>) {
    for message in messages {
        println!("  [{}] {}", message.priority.as_str(), message.description);
        if let Some(url) = &message.url {
            println!("        {}", url);
        }
    }
}
