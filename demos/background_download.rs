//! Background download example
//!
//! Starts a background transfer, cancels it halfway to obtain resume data,
//! then continues it from where it stopped with a new task.

use std::sync::Arc;
use std::time::Duration;

use urltask::{BackgroundCompletion, ReqwestTransport, Request, RequestTask};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Starting background download example...");

    let transport = Arc::new(ReqwestTransport::new()?);
    let url = "https://httpbin.org/bytes/102400"; // 100KB

    BackgroundCompletion::shared().set(|| {
        println!("All background transfers delivered");
    });

    let task = RequestTask::builder(transport.clone(), Request::get(url)?.build())
        .background(true)
        .on_download_progress(|fraction| {
            if let Some(fraction) = fraction {
                println!("Downloaded: {:.1}%", fraction * 100.0);
            }
        })
        .start()?;

    tokio::time::sleep(Duration::from_millis(300)).await;

    let Some(resume_data) = task.cancel_producing_resume_data() else {
        println!("Nothing staged yet, waiting for a fresh download instead");
        let task = RequestTask::builder(transport, Request::get(url)?.build())
            .background(true)
            .start()?;
        let body = task.finished().await?;
        println!("Total bytes downloaded: {}", body.len());
        return Ok(());
    };

    println!("Cancelled with {} bytes of resume data", resume_data.len());
    println!("Staging directory: {:?}", urltask::background_session_files_directory());

    let resumed = RequestTask::builder(transport, Request::get(url)?.build())
        .background(true)
        .resume_data(resume_data)
        .start()?;

    let body = resumed.finished().await?;
    println!("✅ Background download completed!");
    println!("Total bytes downloaded: {}", body.len());

    Ok(())
}
