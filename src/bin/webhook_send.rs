//! Dev tool: sign and deliver a 3JMS-style image webhook to a running
//! instance. Computes the sha256 from the live image when not supplied,
//! so the fetch-and-segment step's hash check passes.

use anyhow::{Context, Result};
use clap::Parser;
use photopipe_backend::intake::sign_body;
use sha2::{Digest, Sha256};

#[derive(Parser, Debug)]
#[command(name = "webhook_send", about = "Send a signed test webhook")]
struct Args {
    /// Webhook endpoint.
    #[arg(long, default_value = "http://localhost:8080/webhooks/3jms/images")]
    url: String,

    /// Shared webhook secret; unsigned delivery when absent.
    #[arg(long, env = "TJMS_WEBHOOK_SECRET")]
    secret: Option<String>,

    #[arg(long)]
    sku: String,

    /// Source image URL the pipeline will download.
    #[arg(long)]
    image_url: String,

    /// SHA-256 of the source bytes; fetched and computed when omitted.
    #[arg(long)]
    sha256: Option<String>,

    #[arg(long, default_value = "image.created")]
    event: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let client = reqwest::Client::new();

    let sha256 = match args.sha256 {
        Some(hash) => hash,
        None => {
            let bytes = client
                .get(&args.image_url)
                .send()
                .await
                .context("Failed to fetch source image")?
                .error_for_status()
                .context("Source image fetch returned an error status")?
                .bytes()
                .await
                .context("Failed to read source image body")?;
            println!("Fetched {} bytes from {}", bytes.len(), args.image_url);
            hex::encode(Sha256::digest(&bytes))
        }
    };

    let body = serde_json::json!({
        "event": args.event,
        "sku": args.sku,
        "imageUrl": args.image_url,
        "sha256": sha256,
        "takenAt": chrono::Utc::now().to_rfc3339(),
    });
    let raw = serde_json::to_vec(&body)?;

    let mut request = client
        .post(&args.url)
        .header("content-type", "application/json")
        .body(raw.clone());
    if let Some(secret) = &args.secret {
        request = request.header("X-3JMS-Signature", sign_body(secret, &raw));
    }

    let response = request.send().await.context("Webhook delivery failed")?;
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    println!("{}\n{}", status, text);
    Ok(())
}
