//! Minimal RELP sender: ships one syslog message to a server and exits.
//!
//! ```text
//! send -t <target> [-p <port>] [-m <message>]
//! ```

use relp::client::ClientBuilder;
use relp::config::DEFAULT_PORT;
use std::process::ExitCode;

struct Args {
    target: String,
    port: u16,
    message: String,
}

fn usage() -> ! {
    eprintln!("usage: send -t <target> [-p <port>] [-m <message>]");
    std::process::exit(2);
}

fn parse_args() -> Args {
    let mut target = None;
    let mut port = DEFAULT_PORT;
    let mut message = String::from("test message");

    let mut args = std::env::args().skip(1);
    while let Some(flag) = args.next() {
        match flag.as_str() {
            "-t" => target = args.next(),
            "-p" => {
                port = args
                    .next()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or_else(|| usage())
            }
            "-m" => message = args.next().unwrap_or_else(|| usage()),
            _ => usage(),
        }
    }

    Args {
        target: target.unwrap_or_else(|| usage()),
        port,
        message,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = parse_args();

    let mut client = match ClientBuilder::new(args.target.clone())
        .port(args.port)
        .connect()
        .await
    {
        Ok(client) => client,
        Err(e) => {
            eprintln!("error connecting to {}:{}: {e}", args.target, args.port);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = client.send_syslog(args.message.as_bytes()).await {
        eprintln!("error sending message: {e}");
        return ExitCode::FAILURE;
    }
    println!("message sent and acknowledged");

    if let Err(e) = client.disconnect().await {
        eprintln!("error during disconnect: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
