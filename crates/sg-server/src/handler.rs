//! Per-message pipeline: translate, query, shape, send.

use futures_util::StreamExt;
use sg_core::{shape, translate, ErrorInfo, WireResponse};
use sg_gateway::DatabaseGateway;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Longest message prefix written to the log.
const LOG_PREVIEW_CHARS: usize = 200;

/// Handles one client message from start to terminal frame.
///
/// Sends zero or more data frames followed by exactly one completion or
/// error frame. Nothing here closes the connection.
pub async fn handle_message(text: &str, gateway: &DatabaseGateway, out: &mpsc::Sender<WireResponse>) {
    info!("Received message: {}", preview(text));

    let request = match translate(text) {
        Ok(request) => request,
        Err(e) => {
            warn!("Rejected message: {}", e);
            send(out, WireResponse::error(ErrorInfo::from(&e))).await;
            return;
        }
    };

    let mut records = gateway.run_query(&request);
    let mut sent = 0usize;

    while let Some(item) = records.next().await {
        let record = match item {
            Ok(record) => record,
            Err(e) => {
                error!("Query failed after {} records: {}", sent, e);
                send(out, WireResponse::error(ErrorInfo::from(&e))).await;
                return;
            }
        };

        match shape(&request.kind, record) {
            Ok(data) => {
                send(out, WireResponse::data(&request.kind, data)).await;
                sent += 1;
            }
            Err(e) => {
                error!("Cannot shape {} result: {}", request.kind, e);
                drop(records);
                send(out, WireResponse::error(ErrorInfo::from(&e))).await;
                return;
            }
        }
    }

    debug!("Query finished with {} records", sent);
    send(out, WireResponse::completion(&request.kind)).await;
}

async fn send(out: &mpsc::Sender<WireResponse>, frame: WireResponse) {
    if out.send(frame).await.is_err() {
        debug!("Connection writer gone, dropping frame");
    }
}

fn preview(text: &str) -> String {
    match text.char_indices().nth(LOG_PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
