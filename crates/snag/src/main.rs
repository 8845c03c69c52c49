use anyhow::Context;
use clap::Parser;
use futures::future::join_all;
use snag::config::{RulesFile, SessionConfig};
use snag::{FetchRequest, HttpTransport, Session};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Issue requests through an interception session and print the call stack.
#[derive(Parser, Debug)]
#[command(name = "snag", version)]
struct Args {
    /// Session configuration (YAML)
    #[arg(short, long, env = "SNAG_CONFIG")]
    config: Option<String>,

    /// Mock and throttle rules (YAML)
    #[arg(short, long, env = "SNAG_RULES")]
    rules: Option<String>,

    /// Page URL used when no config file is given
    #[arg(long, default_value = "http://localhost/")]
    page_url: String,

    /// URL to request, absolute or relative to the page; repeatable
    #[arg(short, long = "url", required = true)]
    urls: Vec<String>,

    /// HTTP method for every request
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
}

/// `RUST_LOG` directives when set and valid, `info` otherwise.
fn log_filter(directives: Option<String>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => SessionConfig::from_file(path)
            .with_context(|| format!("loading session config '{path}'"))?,
        None => SessionConfig::new(args.page_url.clone()),
    };
    config.validate()?;

    let session = Session::new(config.clone())?;
    if let Some(path) = &args.rules {
        let rules = RulesFile::from_file(path).with_context(|| format!("loading rules '{path}'"))?;
        session.load_rules(&rules)?;
    }

    let transport = Arc::new(HttpTransport::new(&config.transport)?);
    let fetch = session.install_fetch(transport);

    let calls = args.urls.iter().map(|url| {
        let fetch = fetch.clone();
        let request = FetchRequest::new(args.method.clone(), url.clone());
        async move {
            match fetch.fetch(request).await {
                Ok(response) => {
                    info!(
                        url = %response.url(),
                        status = response.status(),
                        outcome = ?response.outcome(),
                        "response"
                    );
                    if let Err(e) = response.bytes().await {
                        error!("{url}: body failed: {e}");
                    }
                }
                Err(e) => error!("{url}: {} ({})", e, e.name()),
            }
        }
    });
    join_all(calls).await;

    println!("{}", serde_json::to_string_pretty(&session.entries())?);
    Ok(())
}
