mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use omnidb_dispatch::{
    AjaxRequest, CookieJar, Dispatcher, DispatcherBuilder, DispatcherConfig, Outcome, TracingUi,
    TransportSecurity,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::{AppConfig, LoggingConfig};

/// Issue `OmniDB` calls from the command line
#[derive(Parser)]
#[command(name = "omnidb-dispatch")]
#[command(about = "Issue OmniDB calls through the session dispatcher")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Base URL override (overrides config)
    #[arg(long)]
    base_url: Option<String>,

    /// Allow plain HTTP targets (overrides config)
    #[arg(long)]
    insecure: bool,

    /// Session cookies as a cookie string, e.g. "sessionid=..; omnidb_csrftoken=.."
    #[arg(long)]
    cookie: Option<String>,

    /// Print effective configuration (JSON) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Issue one call and print its outcome
    Call {
        /// Path appended to the base URL, e.g. `get_database_list/`
        url: String,

        /// JSON payload sent as `data`
        #[arg(short, long, default_value = "null")]
        data: String,

        /// Do not drive the loading indicator
        #[arg(long)]
        no_loading: bool,

        /// Show the cancel button while the call runs
        #[arg(long)]
        cancel_button: bool,

        /// Cancel the call after this long, e.g. `2s`
        #[arg(long, value_parser = humantime::parse_duration)]
        cancel_after: Option<Duration>,
    },
    /// Validate configuration and exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(base_url) = &cli.base_url {
        base_url.clone_into(&mut config.dispatcher.base_url);
    }
    if cli.insecure {
        config.dispatcher.transport = TransportSecurity::AllowInsecureHttp;
    }

    init_logging(&config.logging, cli.verbose);

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let dispatcher = build_dispatcher(config.dispatcher, cli.cookie.as_deref())?;

    match cli.command.unwrap_or(Commands::Check) {
        Commands::Check => {
            tracing::info!("configuration is valid");
            println!("Configuration is valid");
            Ok(())
        }
        Commands::Call {
            url,
            data,
            no_loading,
            cancel_button,
            cancel_after,
        } => {
            let payload: serde_json::Value =
                serde_json::from_str(&data).context("--data is not valid JSON")?;
            let request = AjaxRequest::new(url)
                .data(&payload)
                .loading(!no_loading)
                .cancel_button(cancel_button);
            call(&dispatcher, request, cancel_after).await
        }
    }
}

/// Dispatcher for the effective config, seeded with the `--cookie` string.
fn build_dispatcher(config: DispatcherConfig, cookie: Option<&str>) -> Result<Dispatcher> {
    let cookies = cookie.map_or_else(CookieJar::new, CookieJar::from_cookie_string);

    DispatcherBuilder::with_config(config)
        .cookie_jar(Arc::new(cookies))
        .ui(Arc::new(TracingUi))
        .build()
        .context("failed to build dispatcher")
}

async fn call(
    dispatcher: &Dispatcher,
    request: AjaxRequest,
    cancel_after: Option<Duration>,
) -> Result<()> {
    let pending = dispatcher.exec(request)?;

    if let Some(delay) = cancel_after {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if dispatcher.cancel() {
                tracing::info!(?delay, "cancelled active call");
            }
        });
    }

    let outcome = pending.await;
    let report = match &outcome {
        Outcome::Success(envelope) => json!({"outcome": "success", "data": envelope.data}),
        Outcome::AppError(envelope) => json!({
            "outcome": "app_error",
            "error_id": envelope.error_id,
            "data": envelope.data,
        }),
        Outcome::SessionExpired(_) => json!({"outcome": "session_expired"}),
        Outcome::Transport(err) if err.is_aborted() => json!({"outcome": "aborted"}),
        Outcome::Transport(err) => json!({
            "outcome": "transport_error",
            "status_text": err.status_text(),
            "error": err.to_string(),
        }),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    if outcome.is_success() {
        Ok(())
    } else {
        anyhow::bail!("call did not succeed")
    }
}

/// `RUST_LOG` wins over `-v`, which wins over the configured level.
fn init_logging(logging: &LoggingConfig, verbose: u8) {
    let level = match verbose {
        0 => logging.level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Logs go to stderr; stdout carries the outcome
    if logging.json {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_build_dispatcher_seeds_cookies() {
        let config = DispatcherConfig::local("http://127.0.0.1:8000/");
        let dispatcher =
            build_dispatcher(config, Some("sessionid=s1; omnidb_csrftoken=abc%3D")).unwrap();

        assert_eq!(dispatcher.csrf_token().as_deref(), Some("abc="));
        assert_eq!(dispatcher.config().base_url, "http://127.0.0.1:8000/");
    }

    #[test]
    fn test_build_dispatcher_without_cookies() {
        let dispatcher = build_dispatcher(DispatcherConfig::default(), None).unwrap();
        assert!(dispatcher.cookies().is_empty());
    }

    #[test]
    fn test_build_dispatcher_rejects_plain_http_without_insecure() {
        let config = DispatcherConfig {
            base_url: "http://127.0.0.1:8000/".to_owned(),
            ..DispatcherConfig::default()
        };
        let err = build_dispatcher(config, None).unwrap_err();
        assert!(format!("{err:#}").contains("HTTPS is required"), "{err:#}");
    }
}
