use anyhow::Result;
use copilot_core::BackendClient;

use crate::ui;
use crate::Settings;

pub async fn run(settings: &Settings) -> Result<()> {
    let backend = BackendClient::new(&settings.config.backend_url)?;

    let spinner = ui::spinner("Starting ingestion...");
    let result = backend.ingest_data().await;
    spinner.finish_and_clear();

    let response = result?;
    ui::success(&response.message);
    ui::hint("Run `copilot status` to see which documents are ready.");
    Ok(())
}
