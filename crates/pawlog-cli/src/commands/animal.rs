use std::path::Path;

use pawlog_core::util::normalize_text_option;
use pawlog_core::{Animal, RecordKind, RecordStore};

use crate::cli::{AnimalCommands, AnimalFields};
use crate::commands::common::{
    canonical_species, format_animal_line, open_store, relative_to_now, resolve_animal, short_id,
    sort_animals, RecordView,
};
use crate::error::CliError;

pub async fn run_animal(command: AnimalCommands, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    match command {
        AnimalCommands::Add { fields } => run_animal_add(fields, &store).await,
        AnimalCommands::List { json } => run_animal_list(json, &store).await,
        AnimalCommands::Show { id, json } => run_animal_show(&id, json, &store).await,
        AnimalCommands::Edit { id, fields } => run_animal_edit(&id, fields, &store).await,
        AnimalCommands::Delete { id } => run_animal_delete(&id, &store).await,
    }
}

pub async fn run_animal_add(fields: AnimalFields, store: &RecordStore) -> Result<(), CliError> {
    let animal = build_animal(fields)?;
    let saved = store.put_animal(&animal).await?;
    warn_if_unpushable(&saved);
    println!("{}", saved.id);
    Ok(())
}

pub async fn run_animal_list(as_json: bool, store: &RecordStore) -> Result<(), CliError> {
    let mut animals = store.list_animals().await?;
    sort_animals(&mut animals);

    let mut rows = Vec::with_capacity(animals.len());
    for animal in &animals {
        let status = store.sync_status(RecordKind::Animal, &animal.id).await?;
        rows.push(RecordView {
            record: animal,
            sync: status,
        });
    }

    if as_json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else if rows.is_empty() {
        println!("No animals yet. Add one with `pawlog animal add`.");
    } else {
        for row in &rows {
            println!("{}", format_animal_line(row.record, &row.sync));
        }
    }
    Ok(())
}

pub async fn run_animal_show(query: &str, as_json: bool, store: &RecordStore) -> Result<(), CliError> {
    let animal = resolve_animal(query, store).await?;
    let status = store.sync_status(RecordKind::Animal, &animal.id).await?;

    if as_json {
        let view = RecordView {
            record: &animal,
            sync: status,
        };
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    let remote_id = store.remote_id(RecordKind::Animal, &animal.id).await?;
    let care_count = store.list_care_records_by_animal(&animal.id).await?.len();

    println!("ID:              {}", animal.id);
    println!("Name:            {}", animal.name);
    println!("Species:         {}", animal.species);
    println!("Breed:           {}", animal.breed);
    println!("Born:            {}", animal.date_of_birth);
    println!("Weight:          {} kg", animal.weight);
    if !animal.color.is_empty() {
        println!("Color:           {}", animal.color);
    }
    if !animal.medical_history.is_empty() {
        println!("Medical history: {}", animal.medical_history);
    }
    if !animal.vaccinations.is_empty() {
        println!("Vaccinations:    {}", animal.vaccinations.join(", "));
    }
    if let Some(checkup) = animal.last_checkup {
        println!("Last checkup:    {checkup}");
    }
    println!("Care records:    {care_count}");
    println!("Modified:        {}", relative_to_now(animal.last_modified));
    match status {
        pawlog_core::SyncStatus::Blocked(reason) => println!("Sync:            blocked ({reason})"),
        other => println!("Sync:            {}", other.label()),
    }
    if let Some(remote_id) = remote_id {
        println!("Remote ID:       {remote_id}");
    }
    Ok(())
}

pub async fn run_animal_edit(
    query: &str,
    fields: AnimalFields,
    store: &RecordStore,
) -> Result<(), CliError> {
    let mut animal = resolve_animal(query, store).await?;
    if !apply_animal_fields(&mut animal, fields) {
        return Err(CliError::InvalidInput(
            "No changes given; pass at least one field to update".to_string(),
        ));
    }

    let saved = store.put_animal(&animal).await?;
    warn_if_unpushable(&saved);
    println!("{}", saved.id);
    Ok(())
}

pub async fn run_animal_delete(query: &str, store: &RecordStore) -> Result<(), CliError> {
    let animal = resolve_animal(query, store).await?;
    let orphans = store.list_care_records_by_animal(&animal.id).await?.len();

    store.delete_animal(&animal.id).await?;
    if orphans > 0 {
        eprintln!(
            "Note: {orphans} care record(s) still reference animal {}",
            short_id(&animal.id)
        );
    }
    println!("{}", animal.id);
    Ok(())
}

/// Build a new animal from CLI flags. Name, date of birth, and weight are required.
pub fn build_animal(fields: AnimalFields) -> Result<Animal, CliError> {
    let name = normalize_text_option(fields.name.clone())
        .ok_or_else(|| CliError::InvalidInput("--name is required".to_string()))?;
    let date_of_birth = fields
        .born
        .ok_or_else(|| CliError::InvalidInput("--born is required".to_string()))?;
    let weight = fields
        .weight
        .ok_or_else(|| CliError::InvalidInput("--weight is required".to_string()))?;

    let mut animal = Animal::new(
        name,
        canonical_species(fields.species.as_deref().unwrap_or_default()),
        fields.breed.as_deref().unwrap_or_default().trim(),
        date_of_birth,
        weight,
    );
    apply_animal_fields(&mut animal, fields);
    Ok(animal)
}

/// Copy every given flag onto `animal`. Returns whether anything was given.
pub fn apply_animal_fields(animal: &mut Animal, fields: AnimalFields) -> bool {
    let mut changed = false;
    if let Some(name) = normalize_text_option(fields.name) {
        animal.name = name;
        changed = true;
    }
    if let Some(species) = fields.species {
        animal.species = canonical_species(&species);
        changed = true;
    }
    if let Some(breed) = fields.breed {
        animal.breed = breed.trim().to_string();
        changed = true;
    }
    if let Some(born) = fields.born {
        animal.date_of_birth = born;
        changed = true;
    }
    if let Some(weight) = fields.weight {
        animal.weight = weight;
        changed = true;
    }
    if let Some(color) = fields.color {
        animal.color = color.trim().to_string();
        changed = true;
    }
    if let Some(history) = fields.medical_history {
        animal.medical_history = history.trim().to_string();
        changed = true;
    }
    if !fields.vaccinations.is_empty() {
        animal.vaccinations = fields
            .vaccinations
            .into_iter()
            .filter_map(|name| normalize_text_option(Some(name)))
            .collect();
        changed = true;
    }
    if let Some(checkup) = fields.last_checkup {
        animal.last_checkup = Some(checkup);
        changed = true;
    }
    changed
}

fn warn_if_unpushable(animal: &Animal) {
    let problems = animal.validation_errors();
    if !problems.is_empty() {
        eprintln!(
            "Warning: saved locally, but it will not sync until fixed: {}",
            problems.join("; ")
        );
    }
}
