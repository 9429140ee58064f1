use tokio::sync::watch;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use treasury_guard::config::LoggingConfig;

pub fn init_logging(logging: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},treasury_guard=debug", logging.level))
    });

    // File logging only when TREASURY_LOG_DIR is set.
    let log_dir = std::env::var("TREASURY_LOG_DIR").ok();

    // `tracing_appender::rolling::daily` panics when it cannot create the first
    // file, and release builds abort on panic, so check writability first.
    let file_layer = log_dir.as_deref().and_then(|dir| {
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!(
                "Warning: Could not create log directory {} ({}), file logging disabled",
                dir, e
            );
            return None;
        }
        let write_test = std::path::Path::new(dir).join(".treasury_write_test");
        match std::fs::OpenOptions::new().create(true).append(true).open(&write_test) {
            Ok(_) => {
                let _ = std::fs::remove_file(&write_test);
                let appender = tracing_appender::rolling::daily(dir, "treasury-guard.log");
                let (writer, guard) = tracing_appender::non_blocking(appender);
                // flushed on exit only while the guard lives; the process runs until shutdown
                Box::leak(Box::new(guard));
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false)
                        .with_target(true),
                )
            }
            Err(e) => {
                eprintln!(
                    "Warning: Could not write to log directory {} ({}), file logging disabled",
                    dir, e
                );
                None
            }
        }
    });

    let (json_console, plain_console) = if logging.json {
        (
            Some(tracing_subscriber::fmt::layer().json().with_target(true)),
            None,
        )
    } else {
        (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            ),
        )
    };

    let file_logging_enabled = file_layer.is_some();
    tracing_subscriber::registry()
        .with(filter)
        .with(json_console)
        .with(plain_console)
        .with(file_layer)
        .init();

    if let (true, Some(dir)) = (file_logging_enabled, log_dir) {
        eprintln!("Logging to: {}/treasury-guard.log", dir);
    }
}

pub fn init_logging_simple() {
    // Minimal logging for one-shot commands
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

/// Tell the ticker to stop. Returns false when it had already exited.
pub fn signal_shutdown(shutdown_tx: &watch::Sender<bool>) -> bool {
    match shutdown_tx.send(true) {
        Ok(()) => true,
        Err(e) => {
            warn!("Ticker stopped before shutdown was signalled: {}", e);
            false
        }
    }
}
