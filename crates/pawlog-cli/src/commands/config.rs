use pawlog_core::config::normalize_api_base_url;
use pawlog_core::util::normalize_text_option;
use serde::Serialize;

use crate::auth::load_stored_session;
use crate::cli::ConfigCommands;
use crate::config_profiles::{CliProfile, CliProfilesConfig};
use crate::error::CliError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileView {
    pub profile: String,
    pub active: bool,
    pub configured: bool,
    pub api_base_url: String,
    pub push_timeout_secs: u64,
    pub sync_interval_secs: Option<u64>,
    pub signed_in_as: Option<String>,
}

pub fn run_config(command: ConfigCommands, global_profile: Option<&str>) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            api_url,
            push_timeout_secs,
            sync_interval_secs,
            no_activate,
        } => run_config_init(
            global_profile,
            api_url,
            push_timeout_secs,
            sync_interval_secs,
            no_activate,
        ),
        ConfigCommands::Show { json } => run_config_show(global_profile, json),
    }
}

pub fn run_config_init(
    profile_name: Option<&str>,
    api_url: Option<String>,
    push_timeout_secs: Option<u64>,
    sync_interval_secs: Option<u64>,
    no_activate: bool,
) -> Result<(), CliError> {
    let mut config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = config.resolve_profile_name(profile_name);

    let profile = config.profile_mut_or_default(&profile_name);
    apply_profile_updates(profile, api_url, push_timeout_secs, sync_interval_secs)?;

    if !no_activate {
        config.active_profile = Some(profile_name.clone());
    }

    let path = config.save().map_err(CliError::Config)?;
    println!(
        "Profile '{}' initialized at {}",
        profile_name,
        path.display()
    );

    if load_stored_session(&profile_name)?.is_none() {
        println!(
            "Run `pawlog auth login --email <email> --password <password>` to enable sync for '{profile_name}'."
        );
    }
    Ok(())
}

/// Merge explicit flags into a profile and check the result.
pub fn apply_profile_updates(
    profile: &mut CliProfile,
    api_url: Option<String>,
    push_timeout_secs: Option<u64>,
    sync_interval_secs: Option<u64>,
) -> Result<(), CliError> {
    if let Some(url) = normalize_text_option(api_url) {
        profile.api_base_url = Some(normalize_api_base_url(&url).map_err(CliError::Config)?);
    }
    if let Some(secs) = push_timeout_secs {
        if secs == 0 {
            return Err(CliError::Config(
                "push_timeout_secs must be greater than zero".to_string(),
            ));
        }
        profile.push_timeout_secs = Some(secs);
    }
    if let Some(secs) = sync_interval_secs {
        profile.sync_interval_secs = Some(secs);
    }
    profile
        .sync_settings()
        .validate()
        .map_err(CliError::Config)
}

pub fn run_config_show(global_profile: Option<&str>, as_json: bool) -> Result<(), CliError> {
    let config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let view = profile_view(&config, global_profile)?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    let suffix = if view.active { " (active)" } else { "" };
    println!("Profile:        {}{suffix}", view.profile);
    if !view.configured {
        println!("                not initialized; showing defaults");
    }
    println!("API:            {}", view.api_base_url);
    println!("Push timeout:   {}s", view.push_timeout_secs);
    match view.sync_interval_secs {
        Some(secs) => println!("Sync interval:  {secs}s"),
        None => println!("Sync interval:  off"),
    }
    match view.signed_in_as {
        Some(email) => println!("Signed in as:   {email}"),
        None => println!("Signed in as:   (not signed in)"),
    }
    Ok(())
}

pub fn profile_view(
    config: &CliProfilesConfig,
    global_profile: Option<&str>,
) -> Result<ProfileView, CliError> {
    let profile_name = config.resolve_profile_name(global_profile);
    let settings = config
        .sync_settings(&profile_name)
        .map_err(CliError::Config)?;
    let session = load_stored_session(&profile_name)?;

    Ok(ProfileView {
        active: config.active_profile.as_deref() == Some(profile_name.as_str()),
        configured: config.profile(&profile_name).is_some(),
        api_base_url: settings.api_base_url().map_err(CliError::Config)?,
        push_timeout_secs: settings.push_timeout().as_secs(),
        sync_interval_secs: settings.sync_interval().map(|interval| interval.as_secs()),
        signed_in_as: session.map(|session| session.user.email),
        profile: profile_name,
    })
}
