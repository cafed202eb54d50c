use std::sync::OnceLock;

use config::{LogConfig, LogFormat};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Install the global subscriber once for the process.
///
/// Events go to stderr so they never interleave with the chat on stdout.
/// The `[log]` section picks filter and format, `RUST_LOG` and
/// `MEDCHAT_LOG_FORMAT` override it for a single run.
pub(crate) fn init_tracing(conf: &LogConfig) {
    TRACING_INIT.get_or_init(|| {
        let (directives, format) = resolve(
            conf,
            non_empty_var("RUST_LOG"),
            non_empty_var("MEDCHAT_LOG_FORMAT"),
        );
        let filter = EnvFilter::try_new(&directives).unwrap_or_else(|err| {
            eprintln!("invalid log filter `{directives}` ({err}), using `warn`");
            EnvFilter::new("warn")
        });

        let (compact, json) = match format {
            LogFormat::Compact => (Some(fmt::layer().compact().with_writer(std::io::stderr)), None),
            LogFormat::Json => (None, Some(fmt::layer().json().with_writer(std::io::stderr))),
        };

        if let Err(err) = tracing_subscriber::registry()
            .with(filter)
            .with(compact)
            .with(json)
            .try_init()
        {
            eprintln!("tracing init skipped: {err}");
        }
    });
}

/// Environment values beat the config file; an unknown format name is ignored
fn resolve(
    conf: &LogConfig,
    env_filter: Option<String>,
    env_format: Option<String>,
) -> (String, LogFormat) {
    let directives = env_filter.unwrap_or_else(|| conf.filter.clone());
    let format = match env_format.as_deref().map(str::to_ascii_lowercase).as_deref() {
        Some("json") => LogFormat::Json,
        Some("compact") => LogFormat::Compact,
        _ => conf.format,
    };
    (directives, format)
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}
