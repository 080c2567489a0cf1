use anyhow::{anyhow, Result};
use copilot_core::{annotate, annotate_plain, BackendClient};

use crate::ui;
use crate::Settings;

pub async fn run(
    settings: &Settings,
    query: &str,
    document: Option<String>,
    pick: bool,
    html: bool,
) -> Result<()> {
    let backend = BackendClient::new(&settings.config.backend_url)?;

    let document = if pick {
        Some(pick_document(&backend).await?)
    } else {
        document
    };

    let spinner = ui::spinner("Searching your documents...");
    let result = backend.search(query, document.as_deref()).await;
    spinner.finish_and_clear();

    let answer = result?.response;
    if html {
        println!("{}", annotate(&answer).markup);
    } else {
        println!();
        print!("{}", annotate_plain(&answer));
        println!();
    }
    Ok(())
}

async fn pick_document(backend: &BackendClient) -> Result<String> {
    let status = backend.ingestion_status().await?;
    if status.files.is_empty() {
        return Err(anyhow!("No ingested documents to choose from"));
    }
    let items: Vec<&str> = status.files.iter().map(String::as_str).collect();
    let selection = ui::prompt_select("Which document?", &items)?;
    Ok(status.files[selection].clone())
}
