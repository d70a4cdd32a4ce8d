//! Download progress tracking example

use std::sync::Arc;
use std::time::Duration;

use urltask::{Observers, ReqwestTransport, Request, RequestTask};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Creating reqwest transport...");

    let transport = Arc::new(
        ReqwestTransport::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("urltask/0.1.0")
            .build()?,
    );

    let request = Request::get("https://httpbin.org/bytes/5242880")? // 5MB for more granular progress
        .header("Accept", "application/octet-stream")?
        .build();

    println!("Starting request task...");

    let task = RequestTask::send(
        transport,
        request,
        Observers::new()
            .on_response(|response| {
                println!("Response status: {}", response.status());
                println!("Expected length: {:?}", response.expected_content_length());
            })
            .on_download_progress(|fraction| match fraction {
                Some(fraction) => println!("Progress: {:.1}%", fraction * 100.0),
                None => println!("Progress: unknown total"),
            })
            .on_completion(|result| match result {
                Ok(body) => println!("Completed with {} bytes", body.len()),
                Err(error) => println!("Failed: {}", error),
            }),
    );

    let body = task.finished().await?;
    println!("Final download: {} bytes", body.len());

    Ok(())
}
