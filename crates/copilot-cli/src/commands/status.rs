use anyhow::Result;
use console::style;
use serde::Serialize;

use copilot_core::{BackendClient, IngestionProgress, SessionStore};

use crate::bridge_client::BridgeSocketClient;
use crate::ui;
use crate::Settings;

#[derive(Serialize)]
struct Status {
    backend: BackendStatus,
    bridge_running: bool,
    signed_in_as: Option<String>,
    ingestion: Option<IngestionJson>,
}

#[derive(Serialize)]
struct BackendStatus {
    url: String,
    reachable: bool,
    error: Option<String>,
}

#[derive(Serialize)]
struct IngestionJson {
    ingestion_status: IngestionProgress,
    files: Vec<String>,
}

pub async fn run(settings: &Settings, json: bool) -> Result<()> {
    let backend = BackendClient::new(&settings.config.backend_url)?;
    let bridge = BridgeSocketClient::new(&settings.paths.bridge_socket_path);
    let session = SessionStore::new(&settings.paths.session_path).load().ok().flatten();

    let spinner = (!json).then(|| ui::spinner("Checking backend..."));
    let reachable = backend.hello().await;
    let ingestion = match &reachable {
        Ok(_) => Some(backend.ingestion_status().await),
        Err(_) => None,
    };
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    let status = Status {
        backend: BackendStatus {
            url: backend.base_url().to_string(),
            reachable: reachable.is_ok(),
            error: reachable.as_ref().err().map(|e| e.to_string()),
        },
        bridge_running: bridge.is_daemon_running(),
        signed_in_as: session.map(|s| s.username),
        ingestion: match &ingestion {
            Some(Ok(status)) => Some(IngestionJson {
                ingestion_status: status.ingestion_status.clone(),
                files: status.files.clone(),
            }),
            _ => None,
        },
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!();
    match &status.backend.error {
        None => ui::success(&format!("Backend reachable at {}", status.backend.url)),
        Some(err) => {
            ui::error(&format!("Backend unreachable at {}", status.backend.url));
            ui::hint(err);
        }
    }

    if status.bridge_running {
        ui::success("Token bridge running");
    } else {
        ui::info(&format!("{} Token bridge not running", style("○").dim()));
    }

    match &status.signed_in_as {
        Some(username) => ui::info(&format!("Signed in as {}", style(username).bold())),
        None => ui::info("Not signed in"),
    }

    match ingestion {
        Some(Ok(ingestion)) => {
            println!();
            ui::info(&format!(
                "{} {}",
                style("Documents ingested:").bold(),
                ingestion.ingestion_status
            ));
            if ingestion.files.is_empty() {
                ui::hint("No files yet. Run `copilot auth`, then `copilot ingest`.");
            }
            for file in &ingestion.files {
                ui::info(&format!("  • {}", file));
            }
        }
        Some(Err(err)) => ui::error(&format!("Could not read ingestion status: {}", err)),
        None => {}
    }
    println!();

    Ok(())
}
