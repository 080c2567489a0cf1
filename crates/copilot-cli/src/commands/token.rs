use anyhow::{bail, Result};

use crate::bridge_client::BridgeSocketClient;
use crate::ui;
use crate::Settings;

pub async fn run(settings: &Settings, raw: bool) -> Result<()> {
    let client = BridgeSocketClient::new(&settings.paths.bridge_socket_path);

    if !client.is_daemon_running() {
        println!();
        ui::error("Token bridge not running. Start it with:");
        println!("    copilot-bridge");
        bail!("token bridge not running at {}", settings.paths.bridge_socket_path.display());
    }

    let spinner = ui::spinner("Waiting for the bridge (finish sign-in in your browser)...");
    let token = client
        .get_auth_token(settings.config.bridge_timeout())
        .await;
    spinner.finish_and_clear();

    match token {
        Ok(token) if raw => {
            println!("{}", token);
            Ok(())
        }
        Ok(token) => {
            ui::success(&format!("Got access token {}", ui::mask(&token)));
            ui::hint("Pass --raw to print the full token.");
            Ok(())
        }
        Err(err) => {
            ui::error(&format!("Token request failed: {}", err));
            Err(err)
        }
    }
}
