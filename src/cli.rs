use clap::Parser;
use pi_stream::streaming::config::{
    DEFAULT_CHUNK_SIZE, DEFAULT_DELAY_MS, DEFAULT_RING_SIZE, DEFAULT_START,
};
use pi_stream::streaming::source::{DEFAULT_API_URL, DEFAULT_TIMEOUT_SECS};

pub const DEFAULT_STALL_TIMEOUT_MS: u64 = 10_000;

#[derive(Parser)]
#[command(
    name = "pi-stream",
    version,
    about = "Stream the digits of pi at a steady cadence",
    long_about = "Stream the digits of pi, one digit per tick, prefetching windows from\n\
                  the pi.delivery API (or a fixed digit string given with --digits)."
)]
pub struct Cli {
    /// Offset of the first digit
    #[arg(long, env = "PI_STREAM_START", default_value_t = DEFAULT_START)]
    pub start: u64,

    /// Digits fetched per ring slot
    #[arg(long, env = "PI_STREAM_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Number of prefetch slots
    #[arg(long, env = "PI_STREAM_RING_SIZE", default_value_t = DEFAULT_RING_SIZE)]
    pub ring_size: usize,

    /// Milliseconds between digits
    #[arg(long, env = "PI_STREAM_DELAY_MS", default_value_t = DEFAULT_DELAY_MS)]
    pub delay_ms: u64,

    /// Milliseconds between readiness checks of a slot (defaults to --delay-ms)
    #[arg(long, env = "PI_STREAM_RETRY_WAIT_MS")]
    pub retry_wait_ms: Option<u64>,

    /// Stop after this many digits
    #[arg(long)]
    pub count: Option<u64>,

    /// Exit when no digit arrives for this long after a fetch failed
    #[arg(long, env = "PI_STREAM_STALL_TIMEOUT_MS", default_value_t = DEFAULT_STALL_TIMEOUT_MS)]
    pub stall_timeout_ms: u64,

    /// Digit API endpoint
    #[arg(long, env = "PI_STREAM_API_URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,

    /// HTTP request timeout in seconds
    #[arg(long, env = "PI_STREAM_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout_secs: u64,

    /// Serve digits from this string instead of the API
    #[arg(long, conflicts_with = "api_url")]
    pub digits: Option<String>,

    /// Print one JSON event per line
    #[arg(long)]
    pub json: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
