//! `sage-kernel exec` and `sage-kernel interrupt`: a cell in command form.
//!
//! `exec` submits the code, prints each result as it arrives and exits on
//! the terminal payload. Exit code 1 when the cell raised, timed out or lost
//! its kernel.

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use sage_domain::config::Config;
use sage_kernel_proxy::{ExecuteCommand, ExecutionResult, ResultBody};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::bootstrap;

pub async fn exec(
    config: Arc<Config>,
    kernel: String,
    uuid: Option<String>,
    code: String,
    json_output: bool,
) -> anyhow::Result<()> {
    let runtime = bootstrap::build_runtime(config).await?;

    let (tx, mut rx) = mpsc::unbounded_channel::<ExecutionResult>();
    let request_id = uuid.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let cmd = ExecuteCommand::new(request_id, kernel, code, move |result: ExecutionResult| {
        let _ = tx.send(result);
    });

    let accepted = runtime
        .proxy
        .execute(cmd)
        .await
        .context("submitting code")?;
    tracing::debug!(request_id = %accepted.request_id, session_id = %accepted.session_id, "submitted");

    let mut failed = false;
    let mut last: Option<ResultBody> = None;
    while let Some(result) = rx.recv().await {
        if matches!(result.body, ResultBody::Error(_) | ResultBody::Timeout(_)) {
            failed = true;
        }
        if json_output {
            println!("{}", serde_json::to_string(&result)?);
        } else if !(result.done && last.as_ref() == Some(&result.body)) {
            // The terminal payload repeats the last result; print it once.
            print_result(&result);
        }
        if result.done {
            break;
        }
        last = Some(result.body);
    }
    std::io::stdout().flush().ok();

    if let Err(e) = runtime.proxy.cleanup().await {
        tracing::warn!(error = %e, "cleanup incomplete");
    }
    if failed {
        std::process::exit(1);
    }
    Ok(())
}

pub async fn interrupt(config: Arc<Config>, kernel: String) -> anyhow::Result<()> {
    let runtime = bootstrap::build_runtime(config).await?;
    if runtime.proxy.interrupt(&kernel).await {
        println!("interrupted {kernel}");
        Ok(())
    } else {
        anyhow::bail!("gateway did not acknowledge the interrupt for {kernel}")
    }
}

// ── Rendering ─────────────────────────────────────────────────────────

fn print_result(result: &ExecutionResult) {
    match &result.body {
        ResultBody::Stream(content) => {
            let text = content.get("text").and_then(Value::as_str).unwrap_or_default();
            if content.get("name").and_then(Value::as_str) == Some("stderr") {
                eprint!("{text}");
            } else {
                print!("{text}");
            }
        }
        ResultBody::ExecuteResult(content) | ResultBody::DisplayData(content) => {
            if let Some(text) = plain_text(content) {
                println!("{text}");
            } else if let Some(data) = content.get("data") {
                let mimes: Vec<&str> = data
                    .as_object()
                    .map(|m| m.keys().map(String::as_str).collect())
                    .unwrap_or_default();
                println!("[{}]", mimes.join(", "));
            }
        }
        ResultBody::Error(content) => print_error(content),
        ResultBody::ExecuteReply(_) => {}
        ResultBody::Timeout(content) => {
            let elapsed = content.get("elapsed_ms").and_then(Value::as_u64).unwrap_or(0);
            eprintln!("timed out after {elapsed} ms");
        }
    }
}

fn plain_text(content: &Value) -> Option<&str> {
    content.get("data")?.get("text/plain")?.as_str()
}

/// Kernel `error` content carries `ename`/`evalue`/`traceback`; an
/// `execute_reply` error carries the traceback array alone.
fn print_error(content: &Value) {
    let traceback = match content {
        Value::Array(lines) => Some(lines),
        _ => content.get("traceback").and_then(Value::as_array),
    };
    if let Some(lines) = traceback.filter(|l| !l.is_empty()) {
        for line in lines.iter().filter_map(Value::as_str) {
            eprintln!("{line}");
        }
        return;
    }
    let ename = content.get("ename").and_then(Value::as_str).unwrap_or("Error");
    let evalue = content.get("evalue").and_then(Value::as_str).unwrap_or_default();
    eprintln!("{ename}: {evalue}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_text_is_preferred() {
        let content = json!({"data": {"text/plain": "3", "text/html": "<b>3</b>"}});
        assert_eq!(plain_text(&content), Some("3"));
        assert_eq!(plain_text(&json!({"data": {"image/png": "..."}})), None);
    }
}
