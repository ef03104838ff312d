//! "Oneshot" version of the customer-order Lambda.
//!
//! This executable runs one invocation event, read from the JSON file named on
//! the command line (default: `integrations.json`), and prints the resulting
//! envelope. It talks to the real remote services and database, so point
//! `ORDER_API_BASE_URL` and `DB_HOST` & co. somewhere harmless first.

use lambda_runtime::Error;
use serde_json::Value;
use std::{env, fs};

use customer_order_lambda::Services;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let mut args = env::args();
    args.next(); // skip argv[0]

    let event_path = args.next().unwrap_or_else(|| "integrations.json".to_owned());

    let text = fs::read_to_string(&event_path)
        .map_err(|e| -> Error { format!("cannot read event file `{event_path}`: {e}").into() })?;
    let event: Value = serde_json::from_str(&text)?;

    let svcs = Services::init().await?;
    let result = svcs.dispatch_json(event).await;

    serde_json::to_writer_pretty(std::io::stdout().lock(), &result)?;
    println!();
    Ok(())
}
