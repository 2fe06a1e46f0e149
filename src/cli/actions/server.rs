use crate::cli::{actions::Action, globals::GlobalArgs};
use crate::gateway;
use anyhow::Result;
use tracing::warn;

/// Handle the server action
pub async fn handle(action: Action, globals: &GlobalArgs) -> Result<()> {
    match action {
        Action::Server { port, settings } => {
            if globals.dev_secrets {
                warn!("running with INSECURE development secrets, do not expose this instance");
            }

            gateway::new(port, settings, globals).await?;
        }
    }

    Ok(())
}
