//! Logging setup: maps CLI verbosity flags and `--log target=level`
//! overrides onto tracing-subscriber filter directives. `RUST_LOG` wins
//! outright when set.

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Steady-state levels: request and lifecycle areas at info, per-line
/// protocol areas at warn.
const DEFAULT_DIRECTIVES: &[&str] = &[
    "scribe::startup=info",
    "scribe::api=info",
    "scribe::gateway=info",
    "scribe::supervisor=info",
    "scribe::restart=info",
    "scribe::assembler=info",
    "scribe::forwarder=info",
    "scribe::parser=warn",
    "scribe::correlator=warn",
    "scribe::transcript=warn",
    "tower_http=warn",
];

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("Invalid log format: '{}'. Use 'text' or 'json'.", s)),
        }
    }
}

/// Filter directives plus output format, resolved once at startup.
#[derive(Debug, Clone)]
pub struct LogConfig {
    directives: Vec<String>,
    pub format: LogFormat,
}

impl LogConfig {
    /// Resolve the CLI flags into filter directives. Quiet outranks trace
    /// outranks debug outranks verbose; overrides land last and win.
    pub fn from_cli(
        verbose: bool,
        debug: bool,
        trace: bool,
        quiet: bool,
        log_overrides: Vec<String>,
        format: LogFormat,
    ) -> Self {
        let base: &[&str] = if quiet {
            &["scribe=warn", "tower_http=error"]
        } else if trace {
            &["scribe=trace", "tower_http=trace"]
        } else if debug {
            &["scribe=debug", "tower_http=debug"]
        } else if verbose {
            &["scribe=info", "tower_http=info"]
        } else {
            DEFAULT_DIRECTIVES
        };

        let mut directives: Vec<String> = base.iter().map(|s| s.to_string()).collect();
        for spec in &log_overrides {
            directives.extend(parse_overrides(spec));
        }

        Self { directives, format }
    }

    fn filter(&self) -> EnvFilter {
        if let Ok(env_filter) = EnvFilter::try_from_default_env() {
            return env_filter;
        }
        EnvFilter::try_new(self.directives.join(","))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Parse one `--log` value: comma-separated `target=level` pairs. Bare
/// targets get the `scribe::` prefix; `tower_http` passes through.
/// Malformed pairs and unknown levels are dropped.
fn parse_overrides(spec: &str) -> Vec<String> {
    let mut out = Vec::new();
    for part in spec.split(',') {
        let Some((target, level)) = part.split_once('=') else {
            continue;
        };
        let target = target.trim();
        let level = level.trim().to_lowercase();
        if !matches!(
            level.as_str(),
            "trace" | "debug" | "info" | "warn" | "error" | "off"
        ) {
            continue;
        }
        let target = if target.starts_with("scribe::") || target == "tower_http" {
            target.to_string()
        } else {
            format!("scribe::{target}")
        };
        out.push(format!("{target}={level}"));
    }
    out
}

/// Install the global tracing subscriber.
pub fn init(config: &LogConfig) {
    let filter = config.filter();
    match config.format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .init(),
    }
}
