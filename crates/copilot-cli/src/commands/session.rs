use anyhow::Result;
use chrono::Utc;
use copilot_core::{BackendClient, BackendError, Session, SessionStore};

use crate::ui;
use crate::Settings;

pub async fn login(settings: &Settings, username: Option<String>) -> Result<()> {
    let store = SessionStore::new(&settings.paths.session_path);
    let backend = BackendClient::new(&settings.config.backend_url)?;

    let username = match username {
        Some(username) => username,
        None => ui::prompt_input("Username")?,
    };
    let password = ui::prompt_password("Password")?;

    let spinner = ui::spinner("Signing in...");
    let result = backend.login(&username, &password).await;
    spinner.finish_and_clear();

    let login = match result {
        Ok(login) => login,
        Err(BackendError::Status { detail, .. }) => {
            ui::error(&format!("Sign-in failed: {}", detail));
            return Err(anyhow::anyhow!(detail));
        }
        Err(err) => return Err(err.into()),
    };

    settings.paths.ensure_dirs()?;
    store.save(&Session {
        username: username.clone(),
        user_id: login.user_id.to_string(),
        signed_in_at: Utc::now(),
    })?;

    ui::success(&format!("Signed in as {}", username));
    Ok(())
}

pub fn logout(settings: &Settings) -> Result<()> {
    let store = SessionStore::new(&settings.paths.session_path);
    if store.clear()? {
        ui::success("Signed out");
    } else {
        ui::info("Not signed in");
    }
    Ok(())
}

pub fn whoami(settings: &Settings) -> Result<()> {
    let store = SessionStore::new(&settings.paths.session_path);
    match store.load()? {
        Some(session) => ui::info(&format!(
            "{} (user id {}, since {})",
            session.username,
            session.user_id,
            session.signed_in_at.format("%Y-%m-%d %H:%M")
        )),
        None => ui::info("Not signed in. Run `copilot login`."),
    }
    Ok(())
}
