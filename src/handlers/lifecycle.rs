use lambda_runtime::LambdaEvent;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::{Instant, timeout_at};
use tracing::{Instrument, error, info, info_span};

use crate::error::StackInitError;
use crate::service::{Provisioner, ResponseSender};
use crate::types::{CustomResourceRequest, CustomResourceResponse, RequestType};

/// Time kept in reserve to deliver the response before the function is killed.
pub const DEADLINE_MARGIN: Duration = Duration::from_secs(1);

/// Route a lifecycle event to its phase handler. Only `Create` touches the database.
pub async fn dispatch<P: Provisioner>(
    request: &CustomResourceRequest,
    provisioner: &P,
) -> Result<CustomResourceResponse, StackInitError> {
    match &request.request_type {
        RequestType::Create => on_create(request, provisioner).await,
        RequestType::Update => Ok(on_update(request)),
        RequestType::Delete => Ok(on_delete(request)),
        RequestType::Other(other) => Err(StackInitError::UnsupportedRequestType(other.clone())),
    }
}

async fn on_create<P: Provisioner>(
    request: &CustomResourceRequest,
    provisioner: &P,
) -> Result<CustomResourceResponse, StackInitError> {
    let provisioned = provisioner.provision().await?;
    Ok(CustomResourceResponse::success(
        request,
        provisioned.physical_resource_id,
        provisioned.data,
    ))
}

// Updates never re-run the init script.
fn on_update(request: &CustomResourceRequest) -> CustomResourceResponse {
    acknowledge(request)
}

// The database is left in place; it goes away with the server itself.
fn on_delete(request: &CustomResourceRequest) -> CustomResourceResponse {
    acknowledge(request)
}

fn acknowledge(request: &CustomResourceRequest) -> CustomResourceResponse {
    let physical_resource_id = request
        .physical_resource_id
        .clone()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| request.logical_resource_id.clone());
    CustomResourceResponse::success(request, physical_resource_id, Default::default())
}

/// Lambda entry point: run the phase handler within the invocation's
/// deadline and report the outcome to the stack.
pub async fn handle_event<P: Provisioner>(
    event: LambdaEvent<CustomResourceRequest>,
    provisioner: &P,
    sender: &ResponseSender,
) -> Result<(), StackInitError> {
    let LambdaEvent { payload, context } = event;
    let deadline = Instant::now() + time_remaining(context.deadline, SystemTime::now());
    let span = info_span!(
        "custom_resource",
        aws_request_id = %context.request_id,
        request_type = %payload.request_type,
        logical_resource_id = %payload.logical_resource_id,
    );
    handle_request(payload, deadline, provisioner, sender)
        .instrument(span)
        .await
}

/// The phase handler must finish [`DEADLINE_MARGIN`] before `deadline`; the
/// response, retries included, must be delivered by `deadline` itself.
pub async fn handle_request<P: Provisioner>(
    request: CustomResourceRequest,
    deadline: Instant,
    provisioner: &P,
    sender: &ResponseSender,
) -> Result<(), StackInitError> {
    let phase_deadline = deadline
        .checked_sub(DEADLINE_MARGIN)
        .unwrap_or_else(Instant::now);
    let phase_budget = phase_deadline.saturating_duration_since(Instant::now());
    let response = match timeout_at(phase_deadline, dispatch(&request, provisioner)).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            error!(error = %e, "phase handler failed");
            CustomResourceResponse::failed(&request, &e.to_string())
        }
        Err(_) => {
            let e = StackInitError::Timeout(phase_budget);
            error!(error = %e, "phase handler did not finish in time");
            CustomResourceResponse::failed(&request, &e.to_string())
        }
    };

    timeout_at(deadline, sender.send(&request.response_url, &response))
        .await
        .map_err(|_| StackInitError::ResponseDeadline)??;
    info!(
        status = ?response.status,
        physical_resource_id = %response.physical_resource_id,
        "response delivered"
    );
    Ok(())
}

/// Time left before `deadline_ms` (epoch millis).
pub fn time_remaining(deadline_ms: u64, now: SystemTime) -> Duration {
    let now = now.duration_since(UNIX_EPOCH).unwrap_or_default();
    Duration::from_millis(deadline_ms).saturating_sub(now)
}
