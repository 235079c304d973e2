//! QuickCert - Local Certificate Authority
//!
//! Creates (or reuses) the `QuickCert CA` root in the output directory, issues
//! the server and client certificates named on the command line, and
//! optionally keeps serving certificates over HTTP.
//!
//! ```bash
//! quickcert -o certs -D example.com,192.0.2.1 -C alice
//! quickcert -o certs -S -p 8080
//! ```

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;

use quickcert::configs::{AppConfig, Cli};
use quickcert::issuance::IssuanceContext;
use quickcert::protocol::Protocol;
use quickcert::webserver;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = AppConfig::resolve(cli).context("Invalid configuration")?;

    let context = IssuanceContext::bootstrap(config.issuance_settings(), &config.output_dir)
        .context("Failed to initialize root authority")?;
    info!(
        "root authority ready in {}",
        context.storage().output_dir().display()
    );
    let protocol = Arc::new(Protocol::new(Arc::new(context)));

    let report = protocol.run_batch(&config.domains, &config.clients);

    if config.server.enabled {
        return webserver::start_webserver(&config.server, protocol);
    }

    if !report.is_success() {
        bail!(
            "{} of {} certificate(s) failed",
            report.failed.len(),
            report.failed.len() + report.issued.len()
        );
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();
}
