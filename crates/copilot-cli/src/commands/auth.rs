use std::sync::Arc;

use anyhow::Result;
use copilot_auth_bridge::{AuthError, AuthFlowCoordinator, LoopbackWebAuth};
use copilot_core::BackendClient;

use crate::ui;
use crate::Settings;

pub async fn run(settings: &Settings, no_browser: bool) -> Result<()> {
    let config = &settings.config;
    let backend = BackendClient::new(&config.backend_url)?;

    ui::header("Authorize Drive access");
    if !no_browser {
        ui::info("Opening browser for authorization...");
    }

    let spinner = ui::spinner("Waiting for authorization...");

    // If no browser comes up, the user still needs the URL
    let notice_spinner = spinner.clone();
    let mut web_auth = LoopbackWebAuth::new(config.oauth.callback_port)
        .with_wait(config.auth_timeout())
        .with_url_notice(move |url| {
            notice_spinner.suspend(|| {
                ui::info("Open this URL in a browser on this machine:");
                println!();
                println!("    {}", url);
                println!();
            })
        });
    if no_browser {
        web_auth = web_auth.without_browser();
    }

    let coordinator =
        AuthFlowCoordinator::new(config.oauth.clone(), Arc::new(web_auth), Arc::new(backend))
            .with_auth_timeout(config.auth_timeout());

    let outcome = coordinator.begin_authorization().await;
    spinner.finish_and_clear();

    match outcome {
        Ok(authorization) => {
            ui::success("Authorized. The backend will start ingesting your Drive.");
            ui::hint(&format!("Backend replied: {}", authorization.exchange_response));
            ui::hint("Run `copilot status` to follow ingestion.");
            Ok(())
        }
        Err(AuthError::Cancelled) => {
            ui::error("Authorization cancelled.");
            Err(AuthError::Cancelled.into())
        }
        Err(err) => {
            ui::error(&format!("Authorization failed: {}", err));
            Err(err.into())
        }
    }
}
