use std::io::Write;
use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use gridfs_handler::{FileStoreClient, GridStore, PutOutcome};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::errors::CliError;
use crate::params::Command;

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn print<W: Write>(out: &mut W, line: impl AsRef<str>) -> Result<(), CliError> {
    writeln!(out, "{}", line.as_ref()).map_err(CliError::Stdout)
}

pub async fn dispatch<S, W>(
    client: &FileStoreClient<S>,
    command: Command,
    out: &mut W,
) -> Result<ExitCode, CliError>
where
    S: GridStore,
    W: Write + Send,
{
    match command {
        Command::Put { path, json } => put(client, &path, json, out).await,
        Command::Get { filename, output } => get(client, &filename, output.as_deref(), out).await,
        Command::Delete { id } => {
            client.delete(&id).await?;
            print(out, format!("[delete] id: {}", id))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Demo { path } => demo(client, &path, out).await,
        Command::Soak {
            path,
            iterations,
            interval_ms,
            log,
        } => {
            soak(client, &path, iterations, Duration::from_millis(interval_ms), &log).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn put<S: GridStore, W: Write + Send>(
    client: &FileStoreClient<S>,
    path: &Path,
    json: bool,
    out: &mut W,
) -> Result<ExitCode, CliError> {
    let outcome = client.put(path).await;
    if json {
        print(out, serde_json::to_string(&outcome)?)?;
    } else {
        print(out, format!("[put] {}", outcome))?;
    }
    Ok(exit_code(outcome.is_success()))
}

async fn get<S: GridStore, W: Write + Send>(
    client: &FileStoreClient<S>,
    filename: &str,
    output: Option<&Path>,
    out: &mut W,
) -> Result<ExitCode, CliError> {
    let Some(content) = client.try_get(filename).await? else {
        print(out, format!("[get] no file named '{}'", filename))?;
        return Ok(ExitCode::FAILURE);
    };

    match output {
        Some(target) => {
            tokio::fs::write(target, &content)
                .await
                .map_err(|source| CliError::Io {
                    path: target.to_path_buf(),
                    source,
                })?;
            print(
                out,
                format!("[get] wrote {} bytes to {}", content.len(), target.display()),
            )?;
        }
        None => print(out, format!("[get] content length: {}", content.len()))?,
    }
    Ok(ExitCode::SUCCESS)
}

/// Smoke test: put the file, then read it back by its stored filename.
async fn demo<S: GridStore, W: Write + Send>(
    client: &FileStoreClient<S>,
    path: &Path,
    out: &mut W,
) -> Result<ExitCode, CliError> {
    let outcome = client.put(path).await;
    print(out, format!("[put] {}", outcome))?;
    if !outcome.is_success() {
        return Ok(ExitCode::FAILURE);
    }

    let filename = path.to_string_lossy();
    match client.get(&filename).await {
        Some(content) => {
            print(out, format!("[get] content length: {}", content.len()))?;
            Ok(ExitCode::SUCCESS)
        }
        None => Ok(ExitCode::FAILURE),
    }
}

async fn append_line(
    log: &mut tokio::fs::File,
    log_path: &Path,
    line: String,
) -> Result<(), CliError> {
    log.write_all(format!("{}\n", line).as_bytes())
        .await
        .map_err(|source| CliError::Io {
            path: log_path.to_path_buf(),
            source,
        })
}

/// Stability loop: one put and one read-back per iteration, appended to `log_path`.
pub async fn soak<S: GridStore>(
    client: &FileStoreClient<S>,
    path: &Path,
    iterations: u64,
    interval: Duration,
    log_path: &Path,
) -> Result<(), CliError> {
    let mut log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .await
        .map_err(|source| CliError::Io {
            path: log_path.to_path_buf(),
            source,
        })?;
    let filename = path.to_string_lossy().into_owned();
    let mut failures = 0u64;

    for i in 0..iterations {
        append_line(&mut log, log_path, i.to_string()).await?;
        let outcome: PutOutcome = client.put(path).await;
        append_line(&mut log, log_path, outcome.to_string()).await?;
        if outcome.is_success() {
            if let Some(content) = client.get(&filename).await {
                append_line(&mut log, log_path, format!("content length: {}", content.len())).await?;
            }
        } else {
            failures += 1;
        }
        log.flush().await.map_err(|source| CliError::Io {
            path: log_path.to_path_buf(),
            source,
        })?;

        if i + 1 < iterations {
            tokio::time::sleep(interval).await;
        }
    }

    tracing::info!(iterations, failures, log = %log_path.display(), "soak finished");
    Ok(())
}
