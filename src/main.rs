#![deny(warnings)]
#![deny(clippy::unwrap_used)]

use std::process::ExitCode;

use dotenv::dotenv;
use remote_session::remote::config::resolve_port;
use remote_session::remote::{
    ConnectOptions, Connection, Credentials, RemoteEndpoint, RemoteError, TerminalConfig,
    TransportManager, download, run_command, start_shell, upload,
};
use tracing::{error, info};

const USAGE: &str = "usage: remote-session <exec CMD... | shell | upload LOCAL REMOTE | download REMOTE LOCAL>

Connection settings come from the environment (or a .env file):
  SSH_HOST             host or host:port (required)
  SSH_USER             login name (required)
  SSH_PASSWORD         password authentication
  SSH_KEY_PATH         private key authentication
  SSH_KEY_PASSPHRASE   passphrase for SSH_KEY_PATH
Without SSH_PASSWORD and SSH_KEY_PATH the SSH agent is used.";

enum Action {
    Exec(String),
    Shell,
    Upload(String, String),
    Download(String, String),
}

fn parse_action(args: &[String]) -> Option<Action> {
    match args {
        [cmd, rest @ ..] if cmd == "exec" && !rest.is_empty() => Some(Action::Exec(rest.join(" "))),
        [cmd] if cmd == "shell" => Some(Action::Shell),
        [cmd, local, remote] if cmd == "upload" => {
            Some(Action::Upload(local.clone(), remote.clone()))
        }
        [cmd, remote, local] if cmd == "download" => {
            Some(Action::Download(remote.clone(), local.clone()))
        }
        _ => None,
    }
}

fn credentials_from_env(username: String) -> Credentials {
    let mut credentials = Credentials::new(username);
    if let Ok(path) = std::env::var("SSH_KEY_PATH") {
        credentials =
            credentials.with_key_file(path, std::env::var("SSH_KEY_PASSPHRASE").ok());
    }
    if let Ok(password) = std::env::var("SSH_PASSWORD") {
        credentials = credentials.with_password(password);
    }
    credentials
}

fn endpoint_from_env() -> Result<RemoteEndpoint, String> {
    let host = std::env::var("SSH_HOST").map_err(|_| "SSH_HOST is not set".to_string())?;
    RemoteEndpoint::parse_with_default(&host, resolve_port(None)).map_err(|e| e.to_string())
}

async fn run(connection: &Connection, action: Action) -> Result<i32, RemoteError> {
    match action {
        Action::Exec(command) => {
            let result = run_command(connection, &command).await?;
            print!("{}", result.stdout_lossy());
            eprint!("{}", result.stderr_lossy());
            Ok(result.exit_code)
        }
        Action::Shell => {
            let outcome = start_shell(connection, TerminalConfig::default()).await?;
            info!("Remote session finished");
            Ok(outcome.code())
        }
        Action::Upload(local, remote) => {
            let outcome = upload(connection, &local, &remote).await?;
            info!("{} bytes uploaded", outcome.bytes);
            Ok(0)
        }
        Action::Download(remote, local) => {
            let outcome = download(connection, &remote, &local).await?;
            info!("{} bytes downloaded", outcome.bytes);
            Ok(0)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().expect("valid directive")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(action) = parse_action(&args) else {
        eprintln!("{}", USAGE);
        return ExitCode::from(2);
    };

    let endpoint = match endpoint_from_env() {
        Ok(endpoint) => endpoint,
        Err(e) => {
            eprintln!("{}\n\n{}", e, USAGE);
            return ExitCode::from(2);
        }
    };
    let Ok(username) = std::env::var("SSH_USER") else {
        eprintln!("SSH_USER is not set\n\n{}", USAGE);
        return ExitCode::from(2);
    };

    let manager = TransportManager::new(ConnectOptions::from_env());
    let connection = match manager
        .connect(&endpoint, &credentials_from_env(username))
        .await
    {
        Ok(connection) => connection,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(255);
        }
    };

    let status = run(&connection, action).await;

    if let Err(e) = connection.close().await {
        error!("{}", e);
    }

    match status {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(255)),
        Err(e) => {
            error!("{}", e);
            ExitCode::from(255)
        }
    }
}
