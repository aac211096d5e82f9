//! jrpc-pipe - invoke one JSON-RPC method on a child process.
//!
//! The child is spawned with piped stdin/stdout and spoken to with
//! double line-break framed JSON-RPC. The result is printed to stdout as
//! pretty JSON; logs go to stderr.
//!
//! ```text
//! jrpc-pipe getinfo -- ./counterparty --stdio
//! jrpc-pipe listpeers '{"level":"debug"}' -- ./counterparty
//! ```

use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tokio::process::Command;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jrpc_pipe::ipc::{ClientConfig, IpcClient};

const USAGE: &str = "usage: jrpc-pipe <method> [params-json] -- <command> [args...]";

/// How long the child gets to exit on its own after we close its stdin.
const CHILD_EXIT_GRACE: Duration = Duration::from_millis(500);

/// Parsed command line.
#[derive(Debug, PartialEq)]
struct Invocation {
    method: String,
    params: Value,
    command: String,
    args: Vec<String>,
}

fn parse_args<I>(args: I) -> Result<Invocation>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let mut head = Vec::new();
    for arg in args.by_ref() {
        if arg == "--" {
            break;
        }
        head.push(arg);
    }

    let mut head = head.into_iter();
    let Some(method) = head.next() else {
        bail!("missing method\n{}", USAGE);
    };
    let params = match head.next() {
        Some(raw) => serde_json::from_str(&raw)
            .with_context(|| format!("Invalid params JSON: {}", raw))?,
        None => Value::Object(Default::default()),
    };
    if let Some(extra) = head.next() {
        bail!("unexpected argument {:?}\n{}", extra, USAGE);
    }

    let Some(command) = args.next() else {
        bail!("missing counterparty command after --\n{}", USAGE);
    };

    Ok(Invocation {
        method,
        params,
        command,
        args: args.collect(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries only the result
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "jrpc_pipe=info".into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let invocation = parse_args(std::env::args().skip(1))?;
    tracing::debug!("Invocation: {:?}", invocation);

    let mut child = Command::new(&invocation.command)
        .args(&invocation.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to spawn {}", invocation.command))?;

    let stdin = child
        .stdin
        .take()
        .context("Failed to get stdin handle for counterparty")?;
    let stdout = child
        .stdout
        .take()
        .context("Failed to get stdout handle for counterparty")?;

    let client = IpcClient::with_config(ClientConfig::from_env());
    client.startup(stdout, stdin).await?;

    let result = client.call(&invocation.method, invocation.params).await;

    // Closing our side of stdin lets a well-behaved child exit on its own
    client.shutdown().await;
    match tokio::time::timeout(CHILD_EXIT_GRACE, child.wait()).await {
        Ok(Ok(status)) => tracing::debug!("Counterparty exited: {}", status),
        Ok(Err(e)) => tracing::warn!("Error waiting for counterparty: {}", e),
        Err(_) => {
            tracing::debug!("Counterparty still running, killing");
            let _ = child.kill().await;
        }
    }

    let result = result.with_context(|| format!("Call to {} failed", invocation.method))?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_method_and_command() {
        let parsed = parse_args(args(&["getinfo", "--", "./server", "--stdio"])).unwrap();
        assert_eq!(
            parsed,
            Invocation {
                method: "getinfo".to_string(),
                params: json!({}),
                command: "./server".to_string(),
                args: args(&["--stdio"]),
            }
        );
    }

    #[test]
    fn test_parse_params_json() {
        let parsed =
            parse_args(args(&["listpeers", r#"{"level":"debug"}"#, "--", "server"])).unwrap();
        assert_eq!(parsed.params, json!({"level": "debug"}));
        assert!(parsed.args.is_empty());
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(parse_args(args(&[])).is_err());
        assert!(parse_args(args(&["getinfo"])).is_err());
        assert!(parse_args(args(&["getinfo", "--"])).is_err());
        assert!(parse_args(args(&["getinfo", "{not json", "--", "server"])).is_err());
        assert!(parse_args(args(&["getinfo", "{}", "extra", "--", "server"])).is_err());
    }
}
