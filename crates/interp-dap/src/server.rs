use std::sync::Arc;

use interp_debug::EngineFactory;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::adapter::{Adapter, AdapterOptions, Flow};
use crate::dap::codec::{parse_request, sanitize_json_error_message, DapReader};
use crate::dap::messages::Request;
use crate::dap::types::InitializeArguments;
use crate::error::AdapterResult;
use crate::outbox::Outbox;

/// Serve one debug session over stdio.
pub async fn run_stdio(
    factory: Arc<dyn EngineFactory>,
    options: AdapterOptions,
) -> AdapterResult<()> {
    run(tokio::io::stdin(), tokio::io::stdout(), factory, options).await
}

/// Serve one debug session over an arbitrary byte stream pair.
///
/// Returns after EOF, `disconnect`, or a failed launch, once the engine has been asked to
/// terminate and every queued message has been written.
pub async fn run<R, W>(
    reader: R,
    writer: W,
    factory: Arc<dyn EngineFactory>,
    options: AdapterOptions,
) -> AdapterResult<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (outbox, writer_task) = Outbox::spawn(writer);
    let mut adapter = Adapter::new(factory, options, outbox.clone());
    let mut reader = DapReader::new(reader);

    let result = serve(&mut reader, &mut adapter, &outbox).await;

    adapter.shutdown().await;
    outbox.close();
    if let Err(err) = writer_task.await {
        tracing::warn!(target: "interp.dap", error = %err, "DAP writer task failed");
    }
    result
}

async fn serve<R>(
    reader: &mut DapReader<R>,
    adapter: &mut Adapter,
    outbox: &Outbox,
) -> AdapterResult<()>
where
    R: AsyncRead + Unpin,
{
    while let Some(message) = reader.read_value().await? {
        let request = match parse_request(message) {
            Ok(Some(request)) => request,
            Ok(None) => continue,
            Err(err) => {
                tracing::warn!(
                    target: "interp.dap",
                    error = %err,
                    "dropping malformed request"
                );
                continue;
            }
        };

        if request.command == "initialize" {
            initialize(adapter, outbox, &request)?;
            continue;
        }

        if adapter.process(&request)? == Flow::Stop {
            tracing::info!(
                target: "interp.dap",
                command = request.command.as_str(),
                "ending debug session"
            );
            break;
        }
    }
    Ok(())
}

fn initialize(adapter: &mut Adapter, outbox: &Outbox, request: &Request) -> AdapterResult<()> {
    let args: InitializeArguments = match request.arguments() {
        Ok(args) => args,
        Err(err) => {
            let message = format!(
                "Invalid arguments: {}",
                sanitize_json_error_message(&err.to_string())
            );
            outbox.send_response(request, false, Some(message), None)?;
            return Ok(());
        }
    };
    let capabilities = adapter.initialize(&args);
    outbox.send_response(
        request,
        true,
        Some("Success".to_string()),
        Some(serde_json::to_value(capabilities)?),
    )?;
    Ok(())
}
