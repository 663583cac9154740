use std::process::ExitCode;
use tracing::error;
use video_merge::Config;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let config = match Config::load() {
        Ok(config) => config,
        Err(error) => {
            error!(?error, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    if let Err(error) = video_merge::run(config).await {
        error!(?error, "Video merge server stopped");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
