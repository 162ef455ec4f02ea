use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use pawlog_core::CareType;

#[derive(Parser)]
#[command(name = "pawlog")]
#[command(about = "Keep pet care records offline and sync them when you can")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// CLI profile name for API and auth configuration
    #[arg(long, global = true, value_name = "NAME")]
    pub profile: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage animals
    Animal {
        #[command(subcommand)]
        command: AnimalCommands,
    },
    /// Manage care records
    Care {
        #[command(subcommand)]
        command: CareCommands,
    },
    /// Push local changes to the pet-care API
    Sync {
        #[command(subcommand)]
        command: Option<SyncCommands>,
    },
    /// Register, sign in, or sign out of the pet-care API
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
    /// Configure CLI profiles
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Debug, Clone, Default, clap::Args)]
pub struct AnimalFields {
    /// Animal name
    #[arg(long)]
    pub name: Option<String>,
    /// Species (Dog, Cat, Bird, Rabbit, Hamster, Guinea Pig, Other)
    #[arg(long)]
    pub species: Option<String>,
    /// Breed
    #[arg(long)]
    pub breed: Option<String>,
    /// Date of birth (YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    pub born: Option<NaiveDate>,
    /// Weight in kilograms
    #[arg(long, value_name = "KG")]
    pub weight: Option<f64>,
    /// Coat or feather color
    #[arg(long)]
    pub color: Option<String>,
    /// Free-form medical history
    #[arg(long, value_name = "TEXT")]
    pub medical_history: Option<String>,
    /// Vaccination name (repeatable)
    #[arg(long = "vaccination", value_name = "NAME")]
    pub vaccinations: Vec<String>,
    /// Date of the last checkup (YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    pub last_checkup: Option<NaiveDate>,
}

#[derive(Subcommand)]
pub enum AnimalCommands {
    /// Add an animal
    #[command(alias = "new")]
    Add {
        #[command(flatten)]
        fields: AnimalFields,
    },
    /// List animals
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one animal with its sync status
    Show {
        /// Animal ID or unique ID prefix
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change fields of an existing animal
    Edit {
        /// Animal ID or unique ID prefix
        id: String,
        #[command(flatten)]
        fields: AnimalFields,
    },
    /// Delete an animal
    Delete {
        /// Animal ID or unique ID prefix
        id: String,
    },
}

#[derive(Subcommand)]
pub enum CareCommands {
    /// Record a care event
    #[command(alias = "new")]
    Add {
        /// Animal ID or unique ID prefix
        #[arg(long, value_name = "ID")]
        animal: String,
        /// Care type (feeding, grooming, exercise, medication, veterinary)
        #[arg(long = "type", value_name = "TYPE")]
        care_type: CareType,
        /// Date of the event (YYYY-MM-DD, defaults to today)
        #[arg(long, value_name = "DATE")]
        date: Option<NaiveDate>,
        /// Notes
        #[arg(long, default_value = "")]
        notes: String,
        /// When this care is due next (YYYY-MM-DD)
        #[arg(long, value_name = "DATE")]
        next_due: Option<NaiveDate>,
        /// Who performed the care
        #[arg(long, value_name = "NAME")]
        completed_by: Option<String>,
    },
    /// List care records, newest first
    List {
        /// Only show records for this animal (ID or unique ID prefix)
        #[arg(long, value_name = "ID")]
        animal: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a care record
    Delete {
        /// Care record ID or unique ID prefix
        id: String,
    },
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Run a single sync pass (default)
    Run,
    /// Show pending, blocked, and queued work
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Keep syncing in the background until interrupted
    Watch {
        /// Seconds between backend reachability probes
        #[arg(long, default_value = "15", value_name = "SECS")]
        probe_interval: u64,
    },
    /// Inspect the mutation queue
    Queue {
        /// Output as JSON
        #[arg(long)]
        json: bool,
        /// Remove every queued entry (records stay unsynced)
        #[arg(long)]
        drain: bool,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Initialize or update profile config
    Init {
        /// Pet-care API base URL (e.g. <http://localhost:5000>)
        #[arg(long, value_name = "URL")]
        api_url: Option<String>,
        /// Timeout for a single push request
        #[arg(long, value_name = "SECS")]
        push_timeout_secs: Option<u64>,
        /// Background sync interval for `sync watch` (0 disables it)
        #[arg(long, value_name = "SECS")]
        sync_interval_secs: Option<u64>,
        /// Keep current active profile instead of activating this one
        #[arg(long)]
        no_activate: bool,
    },
    /// Print the resolved profile
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Create an account and store the session in the keychain
    Register {
        /// Display name
        #[arg(long)]
        name: String,
        /// Account email
        #[arg(long, value_name = "EMAIL")]
        email: String,
        /// Account password (at least 6 characters)
        #[arg(long, value_name = "PASSWORD")]
        password: String,
    },
    /// Sign in and store the session in the keychain
    Login {
        /// Account email
        #[arg(long, value_name = "EMAIL")]
        email: String,
        /// Account password
        #[arg(long, value_name = "PASSWORD")]
        password: String,
    },
    /// Show auth status for profile
    Status,
    /// Clear the stored session for profile
    Logout,
}
