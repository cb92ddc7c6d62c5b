//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Fetch a batch of content-addressed blobs from one origin.
///
/// Content ids are read from the arguments, or one per line from stdin.
/// Concurrency adapts to the rate-limit headers the origin returns.
#[derive(Parser, Debug)]
#[command(name = "blobfetch")]
#[command(author, version, about)]
pub struct Args {
    /// Content ids to fetch (reads stdin when omitted)
    pub ids: Vec<String>,

    /// URL template; `{cid}` is replaced by the percent-encoded content id
    #[arg(short = 'u', long)]
    pub url_template: Option<String>,

    /// Maximum concurrent fetches before throttling (1-100) [default: 3]
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: Option<u8>,

    /// Maximum attempts per item (1-10) [default: 3]
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub max_retries: Option<u8>,

    /// Write each payload to `<DIR>/<content-id>`
    #[arg(short = 'o', long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Print the run summary as JSON on stdout
    #[arg(long)]
    pub json: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}
