use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::error;

use clinic_log::backend::{SinkKind, SinkTarget};
use clinic_log::context::FutureExt;
use clinic_log::init::{init_logging_with_config, LoggingConfig};

#[tokio::main]
async fn main() {
    let config = LoggingConfig {
        service_name: "load_test".to_string(),
        sink: SinkTarget::new(SinkKind::Noop),
        channel_buffer: 50_000,
        batch_size: 1_000,
        flush_interval: Duration::from_millis(200),
        ..LoggingConfig::default()
    };
    let handle = match init_logging_with_config(config) {
        Ok(handle) => handle,
        Err(err) => {
            eprintln!("cannot initialize logging: {err}");
            return;
        }
    };

    let n: u64 = 100_000;
    let start = Instant::now();

    async {
        for i in 0..n {
            error!(iteration = i, email = "dev@x.com", "default load test error");
        }
    }
    .in_log_scope(None)
    .await;

    let elapsed = start.elapsed();
    println!(
        "sent {} events in {:?} (~{:.0} ev/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );

    // Give background task a little time to drain the channel
    sleep(Duration::from_secs(2)).await;
    if let Some(output) = handle.logger.output() {
        println!("{:?}", output.stats());
    }
}
