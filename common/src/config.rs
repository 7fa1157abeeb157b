use std::time::Duration;

pub const DEFAULT_CONCURRENCY: usize = 100;
pub const DEFAULT_ECHO_LIMIT: u64 = 8;
pub const DEFAULT_PERIOD: Duration = Duration::from_millis(100);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_TCP_PORT: u16 = 443;

/// How echo exchanges are carried out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProbeMethod {
    /// ICMP echo request/reply over a raw socket (requires privileges).
    #[default]
    Icmp,
    /// A TCP connect attempt stands in for each echo request.
    Tcp,
}

/// Run configuration, built once by the front end and passed down explicitly.
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum number of targets probed at the same time.
    pub concurrency: usize,
    /// Echo exchanges per target.
    pub echo_limit: u64,
    pub period: Duration,
    pub timeout: Duration,
    pub method: ProbeMethod,
    /// Destination port of the TCP method.
    pub port: u16,
    /// Probe only this many random addresses of each range.
    pub sample: Option<usize>,
    /// Rows printed in the result table.
    pub top: usize,
    /// Disables the interactive key listener.
    pub no_input: bool,
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            echo_limit: DEFAULT_ECHO_LIMIT,
            period: DEFAULT_PERIOD,
            timeout: DEFAULT_TIMEOUT,
            method: ProbeMethod::default(),
            port: DEFAULT_TCP_PORT,
            sample: None,
            top: 20,
            no_input: false,
            verbose: false,
        }
    }
}

impl Config {
    /// Engine-level settings shared by every echo engine of a run.
    pub fn echo(&self) -> EchoConfig {
        EchoConfig {
            period: self.period,
            timeout: self.timeout,
            port: self.port,
        }
    }
}

/// Pacing and timeout of echo exchanges. Owned by engines, not sessions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EchoConfig {
    /// Delay between consecutive echo requests.
    pub period: Duration,
    /// Replies slower than this are not counted.
    pub timeout: Duration,
    pub port: u16,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Config::default().echo()
    }
}
