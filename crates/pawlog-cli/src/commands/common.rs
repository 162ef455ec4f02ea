use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use chrono::Utc;
use pawlog_core::auth::AuthSession;
use pawlog_core::config::SyncSettings;
use pawlog_core::models::{Mutation, KNOWN_SPECIES};
use pawlog_core::sync::HttpRemoteApi;
use pawlog_core::{Animal, CareRecord, RecordId, RecordKind, RecordStore, SyncStatus};
use serde::Serialize;

use crate::auth::load_stored_session;
use crate::config_profiles::CliProfilesConfig;
use crate::error::CliError;

pub const DB_PATH_ENV: &str = "PAWLOG_DB_PATH";
const SHORT_ID_LEN: usize = 13;

/// A record together with its sync indicator, for `--json` output.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordView<'a, T: Serialize> {
    #[serde(flatten)]
    pub record: &'a T,
    pub sync: SyncStatus,
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    if let Some(path) = cli_db_path.or_else(|| env::var_os(DB_PATH_ENV).map(PathBuf::from)) {
        return Ok(path);
    }
    default_db_path()
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("pawlog").join("pawlog.db"))
        .ok_or_else(|| CliError::Config("Failed to resolve CLI data directory".to_string()))
}

pub async fn open_store(db_path: &Path) -> Result<RecordStore, CliError> {
    Ok(RecordStore::open_path(db_path).await?)
}

pub fn normalize_record_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyRecordId)
    } else {
        Ok(trimmed.to_ascii_lowercase())
    }
}

/// Resolve a full id or unique id prefix to a stored record id.
pub async fn resolve_record_id(
    query: &str,
    kind: RecordKind,
    store: &RecordStore,
) -> Result<RecordId, CliError> {
    let query = normalize_record_identifier(query)?;
    let not_found = || match kind {
        RecordKind::Animal => CliError::AnimalNotFound(query.clone()),
        RecordKind::Care => CliError::CareRecordNotFound(query.clone()),
    };

    if let Ok(id) = query.parse::<RecordId>() {
        if store.contains(kind, &id).await? {
            return Ok(id);
        }
        return Err(not_found());
    }

    let matching_ids = match kind {
        RecordKind::Animal => store.find_animal_ids_by_prefix(&query, 3).await?,
        RecordKind::Care => store.find_care_record_ids_by_prefix(&query, 3).await?,
    };

    match matching_ids.as_slice() {
        [] => Err(not_found()),
        [id] => Ok(*id),
        _ => {
            let options = matching_ids
                .iter()
                .map(short_id)
                .collect::<Vec<_>>()
                .join(", ");

            Err(CliError::AmbiguousRecordId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub async fn resolve_animal(query: &str, store: &RecordStore) -> Result<Animal, CliError> {
    let id = resolve_record_id(query, RecordKind::Animal, store).await?;
    store
        .get_animal(&id)
        .await?
        .ok_or_else(|| CliError::AnimalNotFound(query.trim().to_string()))
}

pub async fn resolve_care_record(query: &str, store: &RecordStore) -> Result<CareRecord, CliError> {
    let id = resolve_record_id(query, RecordKind::Care, store).await?;
    store
        .get_care_record(&id)
        .await?
        .ok_or_else(|| CliError::CareRecordNotFound(query.trim().to_string()))
}

pub fn short_id(id: &RecordId) -> String {
    id.to_string().chars().take(SHORT_ID_LEN).collect()
}

/// Match a species case-insensitively against the known list, keeping unknown input as typed.
pub fn canonical_species(input: &str) -> String {
    let trimmed = input.trim();
    KNOWN_SPECIES
        .iter()
        .find(|species| species.eq_ignore_ascii_case(trimmed))
        .map_or_else(|| trimmed.to_string(), |species| (*species).to_string())
}

pub fn text_preview(text: &str, max_chars: usize) -> String {
    let first_line = text.lines().next().unwrap_or("").trim();
    let collapsed = first_line.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn sort_animals(animals: &mut [Animal]) {
    animals.sort_by(|left, right| {
        left.name
            .to_lowercase()
            .cmp(&right.name.to_lowercase())
            .then_with(|| left.id.cmp(&right.id))
    });
}

/// Newest care first; same-day records by most recent edit.
pub fn sort_care_records(records: &mut [CareRecord]) {
    records.sort_by(|left, right| {
        right
            .date
            .cmp(&left.date)
            .then_with(|| right.last_modified.cmp(&left.last_modified))
    });
}

pub fn format_animal_line(animal: &Animal, status: &SyncStatus) -> String {
    let name = text_preview(&animal.name, 20);
    let species = text_preview(&animal.species, 12);
    format!(
        "{:<13}  {name:<20}  {species:<12}  {:>6.1} kg  {}",
        short_id(&animal.id),
        animal.weight,
        status.label()
    )
}

pub fn format_care_line(
    record: &CareRecord,
    animal_names: &HashMap<RecordId, String>,
    status: &SyncStatus,
) -> String {
    let animal_name = animal_names
        .get(&record.animal_id)
        .map_or_else(|| format!("({})", short_id(&record.animal_id)), Clone::clone);
    let animal_name = text_preview(&animal_name, 16);
    let notes = text_preview(&record.notes, 32);
    format!(
        "{:<13}  {}  {:<10}  {animal_name:<16}  {notes:<32}  {}",
        short_id(&record.id),
        record.date,
        record.care_type.as_str(),
        status.label()
    )
}

pub fn format_mutation_line(mutation: &Mutation) -> String {
    format!(
        "{:>6}  {}  {:<6}  {:<6}  {}",
        mutation.seq,
        format_sync_timestamp(mutation.timestamp),
        mutation.kind.as_str(),
        mutation.action.as_str(),
        mutation.record_id
    )
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}

pub fn relative_to_now(timestamp_ms: i64) -> String {
    format_relative_time(timestamp_ms, Utc::now().timestamp_millis())
}

/// Profile name, resolved settings, and stored session for sync commands.
pub struct SyncContext {
    pub profile_name: String,
    pub settings: SyncSettings,
    pub session: Option<AuthSession>,
}

impl SyncContext {
    pub fn load(global_profile: Option<&str>) -> Result<Self, CliError> {
        let config = CliProfilesConfig::load().map_err(CliError::Config)?;
        let profile_name = config.resolve_profile_name(global_profile);
        let settings = config
            .sync_settings(&profile_name)
            .map_err(CliError::Config)?;
        let session = load_stored_session(&profile_name)?;
        Ok(Self {
            profile_name,
            settings,
            session,
        })
    }

    pub fn require_session(&self) -> Result<&AuthSession, CliError> {
        self.session
            .as_ref()
            .ok_or_else(|| CliError::NotSignedIn(self.profile_name.clone()))
    }

    pub fn api_base_url(&self) -> Result<String, CliError> {
        self.settings.api_base_url().map_err(CliError::Config)
    }

    /// HTTP client for the configured API, authenticated as the stored session.
    pub fn remote(&self) -> Result<HttpRemoteApi, CliError> {
        build_remote(&self.settings, self.session.as_ref())
    }
}

pub fn build_remote(
    settings: &SyncSettings,
    session: Option<&AuthSession>,
) -> Result<HttpRemoteApi, CliError> {
    let base_url = settings.api_base_url().map_err(CliError::Config)?;
    let remote = HttpRemoteApi::new(&base_url, settings.push_timeout())?;
    Ok(match session {
        Some(session) => remote.with_bearer_token(session.token.clone()),
        None => remote,
    })
}
