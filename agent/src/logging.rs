//! Diagnostic tracing for the agent runtime.
//!
//! Tracing goes to stderr. It is separate from the run's product output: the
//! final answer on stdout and status updates printed by the CLI.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset.
///
/// `verbose` surfaces this crate's round, tool and delegation events while
/// keeping dependencies (HTTP client, runtime) at `warn`.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose { "warn,agent=debug" } else { "warn" }
}

/// Install the stderr subscriber. `RUST_LOG` wins over `verbose`.
///
/// # Example
/// ```bash
/// RUST_LOG=agent::dispatch=trace agent run --task "summarise the repo"
/// ```
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose)
                .compact(),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_enables_crate_debug_only() {
        assert_eq!(default_directive(false), "warn");
        assert_eq!(default_directive(true), "warn,agent=debug");
        assert!(default_directive(true).parse::<EnvFilter>().is_ok());
    }
}
