//! Post one message to a simple message server and store the attachments
//! it sends back.

use simple_message::client;
use simple_message::config::ClientConfig;
use simple_message::logging;
use tracing::debug;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let program = std::env::args()
        .next()
        .unwrap_or_else(|| "simple_message_client".to_string());

    let config = match ClientConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{program} - config: {e}");
            std::process::exit(e.exit_code());
        }
    };

    logging::init(&config.log_level);
    debug!(
        server = %config.server,
        port = config.port,
        user = %config.user,
        output_dir = %config.output_dir.display(),
        "Starting exchange"
    );

    match client::run(&config).await {
        Ok(received) => {
            println!("status={}", received.status);
            for path in &received.attachments {
                println!("file={}", path.display());
            }
        }
        Err(e) => {
            eprintln!("{program} - {}: {e}", e.operation());
            std::process::exit(e.exit_code());
        }
    }
}
