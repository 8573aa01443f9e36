//! Spawning server: one collaborator process per accepted connection.

use simple_message::config::ServerConfig;
use simple_message::logging;
use simple_message::server::{Dispatch, Server};
use tracing::info;

#[tokio::main]
async fn main() {
    let program = std::env::args()
        .next()
        .unwrap_or_else(|| "simple_message_server".to_string());

    let config = match ServerConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{program} - config: {e}");
            std::process::exit(e.exit_code());
        }
    };

    logging::init(&config.log_level);
    info!(
        host = %config.host,
        port = config.port,
        backlog = config.backlog,
        collaborator = %config.collaborator.display(),
        "Starting simple message server"
    );

    let dispatch = Dispatch::process(
        config.collaborator.clone(),
        config.collaborator_args.clone(),
    );

    // Server is dropped, closing the listener, before exit
    let result = match Server::bind(&config, dispatch) {
        Ok(server) => server.run().await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("{program} - {}: {e}", e.operation());
        std::process::exit(e.exit_code());
    }
}
