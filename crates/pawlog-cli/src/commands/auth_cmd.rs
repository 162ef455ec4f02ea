use crate::auth::{auth_client_for_profile, clear_stored_session, load_stored_session};
use crate::cli::AuthCommands;
use crate::commands::common::SyncContext;
use crate::error::CliError;

pub async fn run_auth(command: AuthCommands, global_profile: Option<&str>) -> Result<(), CliError> {
    let context = SyncContext::load(global_profile)?;
    let profile_name = context.profile_name.as_str();

    match command {
        AuthCommands::Register {
            name,
            email,
            password,
        } => {
            let client = auth_client_for_profile(profile_name, &context.api_base_url()?)?;
            let session = client.register(&name, &email, &password).await?;
            tracing::info!("Registered account for profile '{profile_name}'");
            println!(
                "Registered and signed in profile '{profile_name}' as {}",
                session.user.email
            );
            Ok(())
        }
        AuthCommands::Login { email, password } => {
            let client = auth_client_for_profile(profile_name, &context.api_base_url()?)?;
            let session = client.login(&email, &password).await?;
            println!(
                "Signed in profile '{profile_name}' as {}",
                session.user.email
            );
            Ok(())
        }
        AuthCommands::Status => {
            if let Some(session) = load_stored_session(profile_name)? {
                println!(
                    "Profile '{}' is signed in as {} ({})",
                    profile_name, session.user.email, session.user.name
                );
            } else {
                println!("Profile '{profile_name}' is not signed in.");
            }
            Ok(())
        }
        AuthCommands::Logout => {
            clear_stored_session(profile_name)?;
            println!("Signed out profile '{profile_name}'");
            Ok(())
        }
    }
}
