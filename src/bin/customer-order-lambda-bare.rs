//! "Bare" version of the customer-order Lambda.
//!
//! This executable takes the invocation event as plain JSON and returns the
//! `{statusCode, body}` envelope as plain JSON, which is easy to drive locally.
//! For the cloud deployment we use the "proxy event" version, which speaks
//! `lambda_http`'s request/response types instead.

use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde_json::Value;

use customer_order_lambda::Services;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let svcs = Services::init().await?;
    let ref_svcs = &svcs;

    run(service_fn(|event: LambdaEvent<Value>| async move {
        let (payload, _context) = event.into_parts();
        Ok::<_, Error>(ref_svcs.dispatch_json(payload).await)
    }))
    .await?;
    Ok(())
}
