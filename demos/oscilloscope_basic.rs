//! Claim a Moku, configure the oscilloscope frontend and read one frame.
//!
//! Before running:
//! - Replace the address if the Moku is not reached through its own Wi-Fi
//!   access point.
//! - Set `RUST_LOG=mokuapi=debug` to see the session events.
//!
//! Run with `cargo run --example oscilloscope_basic`.

use std::error::Error;

use mokuapi::oscilloscope::{Coupling, FrontendSettings, Impedance};
use mokuapi::retry::{retry_async, RetryPolicy};
use mokuapi::{Endpoint, SessionClient, SessionError, DEFAULT_DEVICE_ADDRESS};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let address = DEFAULT_DEVICE_ADDRESS;
    let mut client = SessionClient::new(Endpoint::from_host(address)?)?;

    let claimed = client.claim().await?;
    println!("claimed: {claimed:?}");

    let outcome = run(&client).await;

    // Release the device even when a step above failed.
    if let Err(err) = client.relinquish_ownership().await {
        eprintln!("relinquish failed: {err}");
    }
    outcome
}

async fn run(client: &SessionClient) -> Result<(), Box<dyn Error>> {
    let name = retry_async(
        &RetryPolicy::local_network(),
        |_| client.name(),
        SessionError::is_retryable,
    )
    .await?;
    println!("name: {name}");

    let applied = client
        .oscilloscope()
        .set_frontend(&FrontendSettings {
            channel: 1,
            range: "10Vpp".to_string(),
            coupling: Coupling::Ac,
            impedance: Impedance::OneMegaohm,
        })
        .await?;
    println!("frontend range: {}", applied.range);

    match client.oscilloscope().get_data(false).await {
        Ok(frame) => {
            println!("time: {:?}", frame.time);
            if let Some(ch1) = frame.channel("ch1") {
                println!("ch1: {ch1:?}");
            }
        }
        Err(SessionError::Api { code, messages }) => {
            eprintln!("get_data rejected ({code}): {}", messages.join("; "));
        }
        Err(err) => return Err(err.into()),
    }

    Ok(())
}
