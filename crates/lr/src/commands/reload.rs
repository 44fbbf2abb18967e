//! `lr reload` command implementation.

use clap::Args;

use crate::error::CliError;
use crate::output::Output;

/// Arguments for the reload command.
#[derive(Args)]
pub(crate) struct ReloadArgs {
    /// Event stream URL of the running server.
    #[arg(long, env = "LR_URL", default_value = "http://127.0.0.1:7979/livereloadevents")]
    url: String,
}

impl ReloadArgs {
    /// Execute the reload command.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot be reached or refuses the reload.
    pub(crate) async fn execute(self) -> Result<(), CliError> {
        let response = reqwest::Client::new()
            .post(&self.url)
            .send()
            .await
            .map_err(|source| CliError::Request {
                url: self.url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CliError::Status {
                url: self.url,
                status,
            });
        }

        Output::new().success(&format!("Reload sent to {}", self.url));
        Ok(())
    }
}
