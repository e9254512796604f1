//! Play - Records an RTMP stream to an FLV file
//!
//! Run with: cargo run --example play -- rtmp://localhost/live/test_key output.flv [seconds]
//!
//! Uses the blocking client, so `main` is a plain function: the client owns
//! its own runtime. Recording stops when the server ends the stream or after
//! the optional number of seconds.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::time::{Duration, Instant};

use rtmp_session::{ClientConfig, RtmpClient};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rtmp_session=info".parse()?)
                .add_directive("play=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: play <rtmp_url> <output.flv> [seconds]");
        eprintln!("Example: play rtmp://localhost/live/test_key recording.flv 30");
        std::process::exit(1);
    }
    let url = &args[1];
    let limit = args
        .get(3)
        .map(|s| s.parse::<u64>().map(Duration::from_secs))
        .transpose()?;

    let client = RtmpClient::new(ClientConfig::default().read_timeout(Duration::from_secs(5)))?;
    let code = client.open(url, false, true);
    if code != 1 {
        eprintln!("Open failed with code {}", code);
        std::process::exit(1);
    }
    println!("Recording {} to {}", url, args[2]);

    let mut output = BufWriter::new(File::create(&args[2])?);
    let mut buf = vec![0u8; 64 * 1024];
    let started = Instant::now();

    loop {
        if limit.is_some_and(|limit| started.elapsed() >= limit) {
            break;
        }
        match client.read(&mut buf, 0, 64 * 1024) {
            0 => tracing::debug!("No data within read timeout"),
            n if n > 0 => output.write_all(&buf[..n as usize])?,
            code => {
                println!("Stream ended (code {})", code);
                break;
            }
        }
    }

    output.flush()?;
    let stats = client.stats();
    client.close();

    println!(
        "Recorded {} bytes in {} reads ({} kbps)",
        stats.bytes_read,
        stats.reads,
        stats.bitrate() / 1000
    );
    Ok(())
}
