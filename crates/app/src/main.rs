use std::path::PathBuf;
use std::process::ExitCode;

use murmur::MirrorSettings;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let settings_path = std::env::args_os().nth(1).map(PathBuf::from);
    let (settings, load_error) = match MirrorSettings::load(settings_path.as_deref()) {
        Ok(settings) => (settings, None),
        Err(error) => (MirrorSettings::default(), Some(error)),
    };

    init_tracing(&settings.log_filter);
    if let Some(error) = load_error {
        tracing::warn!(error = %error, "failed to load settings, using defaults");
    }

    match murmur::terminal::run(settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(error = %error, "murmur exited with an error");
            eprintln!("murmur: {error}");
            ExitCode::FAILURE
        }
    }
}

// Logs go to stderr so they never interleave with the rendered conversation.
fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
