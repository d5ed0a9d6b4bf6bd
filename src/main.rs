use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use email_to_pdf::config::{ConnectionParams, ConverterConfig};
use email_to_pdf::mailbox::{ImapMailbox, SearchCriteria};
use email_to_pdf::pipeline::{Coordinator, RunReport};
use email_to_pdf::render::PdfEngine;

/// How long abandoned (timed-out) workers may delay process exit.
///
/// A worker still running when the grace expires is killed wherever it is.
/// If that is between reserving a name and writing the document, an empty
/// `.pdf` stays behind and later runs number around it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Convert emails to PDF based on search criteria.
#[derive(Debug, Parser)]
#[command(name = "email-to-pdf", version, about)]
struct Args {
    /// IMAP server host
    #[arg(long)]
    host: String,

    /// IMAP server port
    #[arg(long)]
    port: u16,

    /// Email username
    #[arg(long)]
    username: String,

    /// Email password
    #[arg(long)]
    password: String,

    /// Search for emails from this address
    #[arg(long = "from-email")]
    from_email: String,

    /// Search for emails with this subject
    #[arg(long)]
    subject: String,

    /// Product label used in output file names
    #[arg(long, default_value = "Lyft")]
    label: String,

    /// Directory receiving the PDFs
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Seconds to wait for each message before giving up on it
    #[arg(long, default_value_t = 60)]
    task_timeout_secs: u64,

    /// Maximum concurrent workers (default: available parallelism)
    #[arg(long)]
    max_workers: Option<usize>,

    /// Write a JSON report of every outcome to this file
    #[arg(long)]
    report: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(args));
    // Timed-out workers are abandoned, not awaited.
    runtime.shutdown_timeout(SHUTDOWN_GRACE);

    Ok(())
}

/// Run-level failures are reported, not turned into an exit code.
async fn run(args: Args) {
    let params = Arc::new(ConnectionParams {
        host: args.host,
        port: args.port,
        username: args.username,
        password: secrecy::SecretString::from(args.password),
    });
    let mailbox = match ImapMailbox::new(params) {
        Ok(mailbox) => Arc::new(mailbox),
        Err(e) => {
            tracing::error!("Cannot prepare mailbox client: {e}");
            println!("Error: {e}");
            return;
        }
    };

    let config = ConverterConfig {
        label: args.label,
        output_dir: args.output_dir,
        task_timeout: Duration::from_secs(args.task_timeout_secs),
        max_workers: args.max_workers,
        ..Default::default()
    };
    let criteria = SearchCriteria::new(args.from_email, args.subject);
    let coordinator = Coordinator::new(mailbox, Arc::new(PdfEngine), config);

    match coordinator
        .run(&criteria, |record| println!("{}", record.report_line()))
        .await
    {
        Ok(report) => {
            println!("{}", report.summary());
            if let Some(path) = args.report {
                write_report(&path, &report);
            }
        }
        Err(e) => {
            tracing::error!("Run aborted: {e}");
            println!("Error: {e}");
        }
    }
}

fn write_report(path: &Path, report: &RunReport) {
    let written = File::create(path)
        .map_err(anyhow::Error::from)
        .and_then(|file| serde_json::to_writer_pretty(file, report).map_err(Into::into));
    match written {
        Ok(()) => tracing::info!(path = %path.display(), "Report written"),
        Err(e) => tracing::error!(path = %path.display(), "Failed to write report: {e}"),
    }
}
