use clap::Parser;
use pi_stream::{create_source, DigitEvent, SourceConfig, StreamEngine, StreamEngineConfig};
use std::io::Write;
use std::time::Duration;

mod cli;
mod exit_codes;

use cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let exit_code = run(cli).await;

    std::process::exit(exit_code);
}

async fn run(cli: Cli) -> i32 {
    let source_config = match cli.digits {
        Some(digits) => SourceConfig::Static {
            digits,
            latency_ms: None,
        },
        None => SourceConfig::Http {
            api_url: cli.api_url,
            timeout_secs: cli.timeout_secs,
        },
    };

    let source = match create_source(source_config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::CONFIG_ERROR;
        }
    };

    let config = StreamEngineConfig {
        ring_size: cli.ring_size,
        chunk_size: cli.chunk_size,
        delay_ms: cli.delay_ms,
        start: cli.start,
        retry_wait_ms: cli.retry_wait_ms,
        ..Default::default()
    };

    let retry_wait_ms = config.retry_wait_ms();
    let engine = match StreamEngine::new(config, source) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::CONFIG_ERROR;
        }
    };

    let mut events = engine.subscribe();

    if let Err(e) = engine.start().await {
        eprintln!("Error: failed to start stream: {}", e);
        return exit_codes::START_FAILED;
    }

    // A failed prefetch stalls its slot until stop; silence after one ends the run
    let stall_timeout = Duration::from_millis(cli.stall_timeout_ms).max(
        Duration::from_millis(cli.delay_ms.saturating_add(retry_wait_ms)).saturating_mul(2),
    );

    let mut printed = 0u64;
    loop {
        if cli.count.is_some_and(|count| printed >= count) {
            break;
        }

        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                if let Err(e) = print_event(&event, cli.json) {
                    log::warn!("Failed to write to stdout: {}", e);
                    break;
                }
                printed += 1;
            }
            _ = tokio::time::sleep(stall_timeout) => {
                let stats = engine.stats();
                if stats.fetch_failures > 0 {
                    engine.stop();
                    if !cli.json {
                        println!();
                    }
                    eprintln!(
                        "Error: stream stalled after {} failed fetch(es) at position {:?}",
                        stats.fetch_failures, stats.position
                    );
                    return exit_codes::STREAM_STALLED;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted");
                break;
            }
        }
    }

    engine.stop();

    if !cli.json {
        println!();
    }
    log::info!("{}", serde_json::to_string(&engine.stats()).unwrap_or_default());

    exit_codes::SUCCESS
}

fn print_event(event: &DigitEvent, json: bool) -> std::io::Result<()> {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    if json {
        let line = serde_json::to_string(event).map_err(std::io::Error::other)?;
        writeln!(handle, "{}", line)?;
    } else {
        write!(handle, "{}", event.digit)?;
    }
    handle.flush()
}
