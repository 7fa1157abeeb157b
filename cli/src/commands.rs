pub mod probe;
pub mod ranges;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use rangeping_common::config::{self, Config, ProbeMethod};

#[derive(Parser)]
#[command(name = "rangeping")]
#[command(about = "Finds the best-answering addresses of published IP ranges.")]
#[command(version)]
pub struct CommandLine {
    #[command(subcommand)]
    pub command: Commands,

    /// Show debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Probe every address of the given (or published) ranges
    #[command(alias = "p")]
    Probe {
        /// CIDR blocks to probe instead of the published list
        cidrs: Vec<String>,

        /// Read the range list from a file instead of downloading it
        #[arg(long, value_name = "PATH")]
        ranges_file: Option<PathBuf>,

        #[command(flatten)]
        options: ProbeOptions,
    },
    /// List the published ranges and their sizes
    #[command(alias = "r")]
    Ranges {
        /// Read the range list from a file instead of downloading it
        #[arg(long, value_name = "PATH")]
        ranges_file: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Method {
    Icmp,
    Tcp,
}

impl From<Method> for ProbeMethod {
    fn from(method: Method) -> Self {
        match method {
            Method::Icmp => ProbeMethod::Icmp,
            Method::Tcp => ProbeMethod::Tcp,
        }
    }
}

#[derive(Args, Debug)]
pub struct ProbeOptions {
    /// Targets probed at the same time
    #[arg(short, long, default_value_t = config::DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Echo requests sent to each target
    #[arg(short = 'n', long, default_value_t = config::DEFAULT_ECHO_LIMIT)]
    pub count: u64,

    /// Milliseconds between echo requests
    #[arg(long, default_value_t = 100)]
    pub period_ms: u64,

    /// Milliseconds after which a reply no longer counts
    #[arg(long, default_value_t = 1000)]
    pub timeout_ms: u64,

    #[arg(short, long, value_enum, default_value_t = Method::Icmp)]
    pub method: Method,

    /// Port connected to by the tcp method
    #[arg(short, long, default_value_t = config::DEFAULT_TCP_PORT)]
    pub port: u16,

    /// Probe only this many random addresses of each range
    #[arg(short, long)]
    pub sample: Option<usize>,

    /// Rows shown in the result list
    #[arg(short, long, default_value_t = 20)]
    pub top: usize,

    /// Do not listen for the 'q' key
    #[arg(long)]
    pub no_input: bool,
}

impl ProbeOptions {
    pub fn to_config(&self, verbose: bool) -> Config {
        Config {
            concurrency: self.concurrency.max(1),
            echo_limit: self.count,
            period: Duration::from_millis(self.period_ms.max(1)),
            timeout: Duration::from_millis(self.timeout_ms),
            method: self.method.into(),
            port: self.port,
            sample: self.sample,
            top: self.top,
            no_input: self.no_input,
            verbose,
        }
    }
}

impl CommandLine {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
