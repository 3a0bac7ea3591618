use clap::Subcommand;
use serde_json::json;

use crate::auth::two_factor::current_code;
use crate::cli::{utils::output_success, OutputFormat};

#[derive(Subcommand)]
pub enum TotpCommands {
    #[command(about = "Print the current code for a base32 secret")]
    Code {
        #[arg(help = "Base32 secret as shown during 2FA setup")]
        secret: String,
    },
}

pub async fn handle(cmd: TotpCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        TotpCommands::Code { secret } => {
            let code = current_code(secret.trim())?;
            output_success(&output_format, "Current code", Some(json!({ "code": code })))
        }
    }
}
