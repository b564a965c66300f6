//! # Filings Enqueue
//!
//! Publish one envelope (read from a JSON file or stdin) onto the job queue,
//! optionally delayed.
//!
//! ```bash
//! filings-enqueue --delay-ms 5000 job.json
//! echo '{"type":"DOCUMENT_SQL","payload":{"path":"/tmp/a.sql"}}' | filings-enqueue -
//! ```

use std::io::Read;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;

use filings_pipeline::config::BrokerSettings;
use filings_pipeline::logging::init_structured_logging;
use filings_pipeline::messaging::{EnvelopePublisher, QueueEnvelope, QueuePublisher};

#[derive(Parser)]
#[command(name = "filings-enqueue")]
#[command(about = "Publish a job envelope to the filings queue")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Envelope JSON file, or `-` for stdin
    envelope: PathBuf,

    /// Defer delivery by this many milliseconds
    #[arg(short, long, default_value_t = 0)]
    delay_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_structured_logging();

    let body = if cli.envelope.as_os_str() == "-" {
        let mut body = String::new();
        std::io::stdin()
            .read_to_string(&mut body)
            .context("reading envelope from stdin")?;
        body
    } else {
        std::fs::read_to_string(&cli.envelope)
            .with_context(|| format!("reading {}", cli.envelope.display()))?
    };

    let envelope = QueueEnvelope::decode(body.as_bytes())?;

    let publisher = QueuePublisher::new(BrokerSettings::from_env()?);
    publisher.connect().await?;
    publisher.send_to_queue(&envelope, cli.delay_ms).await;
    publisher.disconnect().await;

    if publisher.stats().dropped() > 0 {
        bail!("envelope {} was not accepted by the broker", envelope.link_type());
    }

    info!(
        link_type = %envelope.link_type(),
        delay_ms = cli.delay_ms,
        "Envelope enqueued"
    );
    Ok(())
}
