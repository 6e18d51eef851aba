use std::{fs::OpenOptions, path::Path, sync::Mutex};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::Result;

/// Initialize logging/tracing for the bot.
///
/// Logs go to stderr and, when `log_file` is given, are appended to that file
/// as plain text. Safe to call more than once; later calls are ignored.
pub fn init(service_name: &str, log_file: Option<&Path>) -> Result<()> {
    // Default: info for our crates, warn for everything else.
    // Can be overridden with `RUST_LOG`.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,nab=info,nab_core=info,nab_telegram=info,nab_vk=info,nab_twitter=info,{service_name}=info"
        ))
    });

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_ansi(true))
        .with(file_layer)
        .try_init();

    Ok(())
}
