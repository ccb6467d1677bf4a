use lambda_runtime::{LambdaEvent, service_fn};
use mimalloc::MiMalloc;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use clay_stack_init::handlers::handle_event;
use clay_stack_init::service::{DatabaseProvisioner, ResponseSender};
use clay_stack_init::types::CustomResourceRequest;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), lambda_runtime::Error> {
    dotenvy::dotenv().ok();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            // CloudWatch adds its own timestamps and does not render ANSI.
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false)
                .with_ansi(false)
                .without_time(),
        )
        .init();

    let provisioner = Arc::new(DatabaseProvisioner::from_env());
    let sender = Arc::new(ResponseSender::new()?);

    info!("custom resource handler ready");
    lambda_runtime::run(service_fn(
        move |event: LambdaEvent<CustomResourceRequest>| {
            let provisioner = Arc::clone(&provisioner);
            let sender = Arc::clone(&sender);
            async move {
                handle_event(event, provisioner.as_ref(), sender.as_ref())
                    .await
                    .map_err(lambda_runtime::Error::from)
            }
        },
    ))
    .await
}
