use clap::Subcommand;
use serde_json::json;

use crate::auth::hash_password;
use crate::cli::{utils::output_success, OutputFormat};
use crate::database::DatabaseManager;
use crate::services::AdminService;

#[derive(Subcommand)]
pub enum AdminCommands {
    #[command(about = "Create a back-office account")]
    CreateSuperAdmin {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        password: String,
        #[arg(long, default_value = "owner", help = "owner or sales")]
        role: String,
    },

    #[command(about = "Print a bcrypt hash for seeding users by hand")]
    HashPassword {
        #[arg(help = "Plain-text password")]
        password: String,
    },
}

pub async fn handle(cmd: AdminCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        AdminCommands::CreateSuperAdmin {
            email,
            name,
            password,
            role,
        } => {
            let service = AdminService::new(DatabaseManager::pool()?);
            let admin = service.create_super_admin(&email, &name, &password, &role).await?;
            DatabaseManager::close().await;
            output_success(
                &output_format,
                "Super admin created",
                Some(json!({ "id": admin.id, "email": admin.email, "role": admin.role })),
            )
        }
        AdminCommands::HashPassword { password } => {
            let hash = hash_password(&password)?;
            output_success(&output_format, "Password hashed", Some(json!({ "hash": hash })))
        }
    }
}
