//! "Proxy event" version of the customer-order Lambda.
//!
//! This executable defines a server that expects to be interacted with
//! according to AWS API Gateway's "proxy event" protocol (or a Function URL,
//! which uses the same payload). The envelope's status code and body become
//! the HTTP response.

use lambda_http::{
    http::header::CONTENT_TYPE, run, service_fn, Body, Error, Request, Response,
};

use customer_order_lambda::{InboundEvent, Services};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let svcs = Services::init().await?;
    let ref_svcs = &svcs;

    run(service_fn(|req: Request| async move {
        let event = InboundEvent::from_http_request(&req);
        let envelope = ref_svcs.dispatch(&event).await;

        let resp = Response::builder()
            .status(envelope.status_code)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(envelope.body))
            .map_err(Error::from)?;

        Ok::<_, Error>(resp)
    }))
    .await?;
    Ok(())
}
