//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

use trialscan_core::jobs::{
    DEFAULT_COMPANY_COLUMN, DEFAULT_DEVICE_COLUMN, DEFAULT_ID_COLUMN, DEFAULT_TRIAL_URL_COLUMN,
};
use trialscan_core::{Job, MAX_CONCURRENCY};

/// Enrich device and clearance identifiers with trial links and literature.
///
/// Each job reads a delimited table, runs every row through a chain of
/// rate-limited lookups, and writes one output row per input row.
#[derive(Parser, Debug)]
#[command(name = "trialscan")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Job to run
    #[command(subcommand)]
    pub command: Command,
}

/// One subcommand per job.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Device + company to the first matching article (author: title)
    Literature {
        /// Device name column
        #[arg(long, default_value = DEFAULT_DEVICE_COLUMN)]
        device_column: String,

        /// Company column (blank values drop the affiliation clause)
        #[arg(long, default_value = DEFAULT_COMPANY_COLUMN)]
        company_column: String,

        /// Search device names only, ignoring the company column
        #[arg(long)]
        no_company: bool,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// 510(k) ID to the ClinicalTrials.gov link on its FDA page
    TrialLinks {
        /// Clearance ID column
        #[arg(long, default_value = DEFAULT_ID_COLUMN)]
        id_column: String,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// ClinicalTrials.gov URL to the abstracts of every linked publication
    TrialAbstracts {
        /// Key column copied to the output
        #[arg(long, default_value = DEFAULT_ID_COLUMN)]
        id_column: String,

        /// Trial URL column
        #[arg(long, default_value = DEFAULT_TRIAL_URL_COLUMN)]
        url_column: String,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// 510(k) ID through FDA page and trial publications to abstracts
    TrialChain {
        /// Clearance ID column
        #[arg(long, default_value = DEFAULT_ID_COLUMN)]
        id_column: String,

        #[command(flatten)]
        common: CommonArgs,
    },
}

impl Command {
    /// Returns the job and its shared arguments.
    #[must_use]
    pub fn into_job(self) -> (Job, CommonArgs) {
        match self {
            Self::Literature {
                device_column,
                company_column,
                no_company,
                common,
            } => (
                Job::Literature {
                    device_column,
                    company_column: (!no_company).then_some(company_column),
                },
                common,
            ),
            Self::TrialLinks { id_column, common } => (Job::TrialLinks { id_column }, common),
            Self::TrialAbstracts {
                id_column,
                url_column,
                common,
            } => (
                Job::TrialAbstracts {
                    id_column,
                    url_column,
                },
                common,
            ),
            Self::TrialChain { id_column, common } => (Job::TrialChain { id_column }, common),
        }
    }
}

/// Arguments shared by every job.
#[derive(ClapArgs, Debug, Clone)]
pub struct CommonArgs {
    /// Input table (CSV with a header row)
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output file (written once at the end of the run)
    #[arg(short, long)]
    pub output: PathBuf,

    /// Config file (default: $XDG_CONFIG_HOME/trialscan/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Contact email sent to NCBI (or set NCBI_EMAIL)
    #[arg(long)]
    pub email: Option<String>,

    /// Tool name sent to NCBI
    #[arg(long)]
    pub tool: Option<String>,

    /// NCBI API key (or set NCBI_API_KEY); allows a faster request rate
    #[arg(long)]
    pub api_key: Option<String>,

    /// Records processed concurrently (1-32)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=MAX_CONCURRENCY as i64))]
    pub concurrency: Option<u8>,

    /// Attempts per request, including the first (1-10)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u32).range(1..=10))]
    pub max_attempts: Option<u32>,

    /// Output column delimiter (single character, `\t` for tab)
    #[arg(short = 'd', long)]
    pub delimiter: Option<String>,

    /// Input column delimiter (default `,`)
    #[arg(long)]
    pub input_delimiter: Option<String>,
}
