pub mod server;

use crate::gateway::GatewaySettings;

#[derive(Debug)]
pub enum Action {
    Server {
        port: u16,
        settings: GatewaySettings,
    },
}
