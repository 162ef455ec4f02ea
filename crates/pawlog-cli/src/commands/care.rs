use std::collections::HashMap;
use std::path::Path;

use chrono::{Local, NaiveDate};
use pawlog_core::util::normalize_text_option;
use pawlog_core::{CareRecord, CareType, RecordKind, RecordStore};

use crate::cli::CareCommands;
use crate::commands::common::{
    format_care_line, open_store, resolve_animal, resolve_care_record, sort_care_records,
    RecordView,
};
use crate::error::CliError;

/// Fields of a new care record as given on the command line.
#[derive(Debug, Clone)]
pub struct NewCareRecord {
    pub animal: String,
    pub care_type: CareType,
    pub date: Option<NaiveDate>,
    pub notes: String,
    pub next_due: Option<NaiveDate>,
    pub completed_by: Option<String>,
}

pub async fn run_care(command: CareCommands, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    match command {
        CareCommands::Add {
            animal,
            care_type,
            date,
            notes,
            next_due,
            completed_by,
        } => {
            let input = NewCareRecord {
                animal,
                care_type,
                date,
                notes,
                next_due,
                completed_by,
            };
            let saved = run_care_add(input, &store).await?;
            println!("{}", saved.id);
            Ok(())
        }
        CareCommands::List { animal, json } => {
            run_care_list(animal.as_deref(), json, &store).await
        }
        CareCommands::Delete { id } => run_care_delete(&id, &store).await,
    }
}

pub async fn run_care_add(input: NewCareRecord, store: &RecordStore) -> Result<CareRecord, CliError> {
    let animal = resolve_animal(&input.animal, store).await?;
    if let Some(next_due) = input.next_due {
        let date = input.date.unwrap_or_else(today);
        if next_due < date {
            return Err(CliError::InvalidInput(format!(
                "--next-due {next_due} is before the care date {date}"
            )));
        }
    }

    let mut record = CareRecord::new(
        animal.id,
        input.care_type,
        input.date.unwrap_or_else(today),
    );
    record.notes = input.notes.trim().to_string();
    record.next_due = input.next_due;
    record.completed_by = normalize_text_option(input.completed_by);

    Ok(store.put_care_record(&record).await?)
}

/// Care records, newest first, optionally for one animal.
pub async fn list_care_records(
    animal_query: Option<&str>,
    store: &RecordStore,
) -> Result<Vec<CareRecord>, CliError> {
    let mut records = if let Some(query) = animal_query {
        let animal = resolve_animal(query, store).await?;
        store.list_care_records_by_animal(&animal.id).await?
    } else {
        store.list_care_records().await?
    };
    sort_care_records(&mut records);
    Ok(records)
}

pub async fn run_care_list(
    animal_query: Option<&str>,
    as_json: bool,
    store: &RecordStore,
) -> Result<(), CliError> {
    let records = list_care_records(animal_query, store).await?;

    let mut rows = Vec::with_capacity(records.len());
    for record in &records {
        let status = store.sync_status(RecordKind::Care, &record.id).await?;
        rows.push(RecordView {
            record,
            sync: status,
        });
    }

    if as_json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    if rows.is_empty() {
        println!("No care records yet.");
        return Ok(());
    }

    let animal_names = store
        .list_animals()
        .await?
        .into_iter()
        .map(|animal| (animal.id, animal.name))
        .collect::<HashMap<_, _>>();
    for row in &rows {
        println!("{}", format_care_line(row.record, &animal_names, &row.sync));
    }
    Ok(())
}

pub async fn run_care_delete(query: &str, store: &RecordStore) -> Result<(), CliError> {
    let record = resolve_care_record(query, store).await?;
    store.delete_care_record(&record.id).await?;
    println!("{}", record.id);
    Ok(())
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}
