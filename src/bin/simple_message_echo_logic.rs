//! Stub collaborator: reads one request from stdin and writes a response
//! echoing the message back as a single attachment to stdout.

use simple_message::logging;
use simple_message::protocol::{decode_request, encode_response};
use simple_message::server::echo;
use simple_message::Result;
use tokio::io::BufReader;
use tracing::debug;

async fn run() -> Result<()> {
    let mut input = BufReader::new(tokio::io::stdin());
    let mut output = tokio::io::stdout();

    let request = decode_request(&mut input).await?;
    debug!(user = %request.user, "Echoing request");
    encode_response(&mut output, &echo(&request)).await
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    logging::init("warn");

    if let Err(e) = run().await {
        let program = std::env::args()
            .next()
            .unwrap_or_else(|| "simple_message_echo_logic".to_string());
        eprintln!("{program} - {}: {e}", e.operation());
        std::process::exit(e.exit_code());
    }
}
