use anyhow::{bail, Context};
use clap::Subcommand;
use serde_json::{json, Value};

use crate::cli::utils::{output_error, output_success};
use crate::cli::OutputFormat;
use crate::config;
use crate::services::cron_service::CronJob;

#[derive(Subcommand)]
pub enum CronCommands {
    #[command(about = "List the scheduled jobs")]
    List,

    #[command(about = "Run a job now through the server's cron endpoint")]
    Run {
        #[arg(help = "Job name, e.g. create-monthly-invoices")]
        job: String,
        #[arg(long, help = "Server base URL (defaults to the configured public URL)")]
        url: Option<String>,
    },
}

pub async fn handle(cmd: CronCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        CronCommands::List => {
            let jobs: Vec<&str> = CronJob::ALL.iter().map(|job| job.as_str()).collect();
            output_success(&output_format, "Scheduled jobs", Some(json!({ "jobs": jobs })))
        }
        CronCommands::Run { job, url } => {
            let job: CronJob = job.parse().map_err(anyhow::Error::msg)?;
            let config = config::config();
            if config.security.cron_secret.is_empty() {
                bail!("CRON_SECRET is not set");
            }

            let base = url.unwrap_or_else(|| config.api.public_url.clone());
            let endpoint = format!("{}/api/cron/{}", base.trim_end_matches('/'), job);
            let response = reqwest::Client::new()
                .post(&endpoint)
                .bearer_auth(&config.security.cron_secret)
                .send()
                .await
                .with_context(|| format!("calling {}", endpoint))?;

            let status = response.status();
            let body: Value = response.json().await.unwrap_or(Value::Null);
            if !status.is_success() {
                let message = body["error"].as_str().unwrap_or("cron call failed").to_string();
                output_error(&output_format, &message, body["code"].as_str())?;
                bail!("{} returned {}", endpoint, status);
            }

            output_success(&output_format, &format!("Ran {}", job), Some(body["data"].clone()))
        }
    }
}
