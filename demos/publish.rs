//! Publish - Pushes an FLV file to an RTMP server in real time
//!
//! Run with: cargo run --example publish -- input.flv rtmp://localhost/live/test_key
//!
//! The file is demuxed locally only to pace the upload by tag timestamps;
//! each tag is then handed to the session as FLV bytes, the same way a
//! caller streaming from an encoder would.

use std::time::Duration;

use bytes::BytesMut;
use rtmp_session::media::FlvDemuxer;
use rtmp_session::{ClientConfig, RtmpSession};
use tokio::time::Instant;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rtmp_session=info".parse()?)
                .add_directive("publish=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: publish <input.flv> <rtmp_url>");
        eprintln!("Example: publish recording.flv rtmp://localhost/live/test_key");
        std::process::exit(1);
    }

    let file = tokio::fs::read(&args[1]).await?;
    let tags = FlvDemuxer::new().push(&file)?;
    println!("Loaded {} tags from {}", tags.len(), args[1]);

    let session = RtmpSession::new(ClientConfig::default());
    session.open(&args[2], true, true).await?;
    println!("Publishing to {}", args[2]);

    let started = Instant::now();
    let mut buf = BytesMut::new();
    let mut stop = std::pin::pin!(tokio::signal::ctrl_c());

    for tag in &tags {
        let due = started + Duration::from_millis(tag.timestamp.into());
        tokio::select! {
            _ = tokio::time::sleep_until(due) => {}
            _ = &mut stop => {
                println!("Interrupted");
                break;
            }
        }

        buf.clear();
        tag.write_to(&mut buf);
        if let Err(e) = session.write(&buf).await {
            eprintln!("Write failed: {}", e);
            break;
        }
    }

    let stats = session.stats().await;
    session.close().await;
    println!(
        "Sent {} bytes in {} writes over {:?}",
        stats.bytes_written,
        stats.writes,
        stats.duration()
    );
    Ok(())
}
