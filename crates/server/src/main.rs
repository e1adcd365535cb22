use anyhow::Result;
use clap::Parser;
use got_ocr_server::{app, args::Args, logging};
use tracing::error;

#[rocket::main]
async fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();
    match app::run(args).await {
        Ok(()) => Ok(()),
        Err(err) => {
            error!(error = %err, "Server failed");
            Err(err)
        }
    }
}
