use anyhow::Result;
use time::{format_description, UtcOffset};
use tracing_subscriber::filter::dynamic_filter_fn;
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::cli::Cli;
use crate::config::FileConfig;

pub fn init(cli: &Cli, config: &FileConfig) -> Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        let level = match cli.verbose {
            0 if config.logging.debug => "sshesame_proxy=debug",
            0 => "sshesame_proxy=info",
            1 => "sshesame_proxy=debug",
            2 => "sshesame_proxy=debug,russh=debug",
            _ => "debug",
        };
        std::env::set_var("RUST_LOG", level);
    }

    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    let timer = OffsetTime::new(
        offset,
        format_description::parse("[day].[month].[year] [hour]:[minute]:[second]")
            .expect("static format description"),
    );

    let env_filter = std::sync::Arc::new(EnvFilter::from_default_env());
    let json_layer = config.logging.json.then(|| {
        let env_filter = env_filter.clone();
        tracing_subscriber::fmt::layer()
            .json()
            .with_timer(timer.clone())
            .with_filter(dynamic_filter_fn(move |m, c| env_filter.enabled(m, c.clone())))
    });
    let text_layer = (!config.logging.json).then(|| {
        let env_filter = env_filter.clone();
        tracing_subscriber::fmt::layer()
            .with_timer(timer)
            .with_filter(dynamic_filter_fn(move |m, c| env_filter.enabled(m, c.clone())))
    });

    tracing_subscriber::registry()
        .with(json_layer)
        .with(text_layer)
        .init();

    Ok(())
}
