//! Tracing setup for the binaries, with feature-gated Chrome profiling.
//!
//! [`init`] installs the process-wide subscriber. Log output goes to stderr
//! through `tracing_subscriber::fmt`, filtered by `RUST_LOG` (default `warn`),
//! so stdout stays reserved for scores.
//!
//! With the `profiling` feature, a `tracing-chrome` layer additionally records
//! the `load_checkpoint`, `mel`, `forward` and `predict` spans to
//! `trace.json`. Open it in `chrome://tracing` or
//! [Perfetto](https://ui.perfetto.dev).

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Guard that flushes the trace file on drop.
///
/// Hold this in `main()`; the trace is written when the guard is dropped.
#[cfg(feature = "profiling")]
pub struct ProfilingGuard {
    _guard: tracing_chrome::FlushGuard,
}

/// Zero-size guard when profiling is disabled.
#[cfg(not(feature = "profiling"))]
pub struct ProfilingGuard;

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install the global subscriber.
///
/// `default_level` applies when `RUST_LOG` is unset. Returns `Some(guard)`
/// when the `profiling` feature is active; the caller must hold it until the
/// end of the program.
///
/// # Example
///
/// ```rust,ignore
/// let _guard = vove::profiling::init("warn");
/// // ... run workload ...
/// ```
pub fn init(default_level: &str) -> Option<ProfilingGuard> {
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    #[cfg(feature = "profiling")]
    {
        use tracing_chrome::ChromeLayerBuilder;

        let (chrome_layer, guard) = ChromeLayerBuilder::new()
            .file("trace.json")
            .include_args(true)
            .build();

        tracing_subscriber::registry()
            .with(env_filter(default_level))
            .with(fmt_layer)
            .with(chrome_layer)
            .init();

        tracing::info!("Profiling enabled, trace will be written to trace.json");
        Some(ProfilingGuard { _guard: guard })
    }

    #[cfg(not(feature = "profiling"))]
    {
        tracing_subscriber::registry()
            .with(env_filter(default_level))
            .with(fmt_layer)
            .init();
        None
    }
}
