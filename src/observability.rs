//! Logging setup and run-level events.

use std::io::IsTerminal;
use std::sync::Once;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Crates that log at `LOADER_LOG` (default `info`) unless `RUST_LOG` names them.
const LOADER_CRATES: &[&str] = &["s3_to_warehouse", "refresh_snapshots"];

static LOADER_LOG_ENV_VAR: &str = "LOADER_LOG";

/// Installs the global tracing subscriber. Safe to call more than once.
pub fn init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let (env_filter, log_level) = env_filter_and_log_level();

        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_ansi(std::io::stderr().is_terminal())
            .with_writer(std::io::stderr)
            .init();

        tracing::info!("log level: {}", log_level);
    });
}

fn env_filter_and_log_level() -> (EnvFilter, String) {
    let directive_string = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_default();
    let log_level = std::env::var(LOADER_LOG_ENV_VAR).unwrap_or_else(|_| "info".to_string());
    (build_filter(&directive_string, &log_level), log_level)
}

fn build_filter(directive_string: &str, log_level: &str) -> EnvFilter {
    let mut env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .parse_lossy(directive_string);

    for crate_name in LOADER_CRATES {
        if directive_string.contains(&format!("{}=", crate_name)) {
            continue;
        }
        match format!("{}={}", crate_name, log_level).parse() {
            Ok(directive) => env_filter = env_filter.add_directive(directive),
            Err(e) => eprintln!("ignoring bad {} value '{}': {}", LOADER_LOG_ENV_VAR, log_level, e),
        }
    }
    env_filter
}

/// Payload identifying a run in job events, e.g. `--schema mongo`.
pub fn job_payload(namespace: &str) -> String {
    format!("--schema {}", namespace)
}

/// Emits the one `job-finished` event of a run: value 1 on success, 0 on failure.
pub fn job_finished(payload: &str, success: bool) {
    let value = u8::from(success);
    tracing::info!(
        target: "job_finished",
        payload = payload,
        value = value,
        "job-finished"
    );
}
