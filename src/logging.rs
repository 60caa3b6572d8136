use std::sync::Once;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "portald=info";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

static INIT_ONCE: Once = Once::new();

// stdout is the IPC channel, so logs go to stderr.
pub fn init(filter: &str, format: LogFormat) {
    INIT_ONCE.call_once(|| {
        let env_filter =
            EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        let builder = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_ansi(false);
        let installed = match format {
            LogFormat::Text => builder.try_init(),
            LogFormat::Json => builder.json().try_init(),
        };
        if let Err(e) = installed {
            eprintln!("portald: logging already initialised: {e}");
        }
    });
}
