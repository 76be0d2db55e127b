use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match agentdesk_server::app::run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "agentdesk server failed to start");
            eprintln!("agentdesk-server: {err}");
            ExitCode::FAILURE
        }
    }
}
