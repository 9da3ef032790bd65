//! Two overlapping requests logging through `tracing` and the facade.
//!
//! Run with `CLINIC_LOG_SINK=file://logs/app.log` to write to a file
//! instead of stdout.

use serde_json::json;
use tokio::time::{sleep, Duration};
use tracing::info;

use clinic_log::context::{ContextMap, ContextStore, ContextValue, FutureExt};
use clinic_log::formatter::LOG_GLOBAL_DURATION;
use clinic_log::init::init_logging_from_env;

#[tokio::main]
async fn main() {
    let handle = match init_logging_from_env() {
        Ok(handle) => handle,
        Err(err) => {
            eprintln!("cannot initialize logging: {err}");
            std::process::exit(1);
        }
    };

    let requests = [("patient-portal", 17, 30), ("study-admin", 4, 10)].map(|(route, user_id, work_ms)| {
        let logger = handle.logger.clone();
        tokio::spawn(
            async move {
                logger.context().set(ContextMap::from([(
                    "customer".to_string(),
                    ContextValue::from(json!({"userId": user_id})),
                )]));

                info!(route, "request received");
                sleep(Duration::from_millis(work_ms)).await;

                logger.info(
                    "Sending reminder to {}",
                    vec![json!(r#"{"email": "dev@mailinator.com"}"#)],
                    Some(json!({"iban": "DE05202208445090025780", "scheduleId": "s-1"})),
                );
                logger.info("request finished", vec![], Some(json!({LOG_GLOBAL_DURATION: true})));
            }
            .in_log_scope(None),
        )
    });

    for request in requests {
        if let Err(err) = request.await {
            eprintln!("request task failed: {err}");
        }
    }

    // The global subscriber keeps its own logger clone, so wait for the
    // last flush interval instead of joining the worker.
    sleep(Duration::from_millis(1_500)).await;
}
