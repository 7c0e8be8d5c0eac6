use tracing_subscriber::EnvFilter;

use crate::cli::LogOutput;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn init(output: LogOutput) {
    match output {
        LogOutput::None => {}
        LogOutput::Console => tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .init(),
        LogOutput::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter())
            .init(),
    }
}
