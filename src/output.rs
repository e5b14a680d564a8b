//! Final result storage
//!
//! Two sibling Parquet files derived from one output prefix: the aliases
//! table holds every email and every name-with-repo of every person, the
//! identities table holds one row per person with the primary name and the
//! external identity. Downstream tooling expects exactly this pair.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow_array::{Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use crate::error::{IdcanonError, Result};
use crate::people::{NameWithRepo, People, Person};

/// Derive the two file paths from the output prefix; one trailing `.parquet`
/// is stripped first.
pub fn output_paths(output: &str) -> (PathBuf, PathBuf) {
    let base = output.strip_suffix(".parquet").unwrap_or(output);
    (
        PathBuf::from(format!("{}-aliases.parquet", base)),
        PathBuf::from(format!("{}-identities.parquet", base)),
    )
}

/// Write the persons map as the uncompressed aliases + identities pair.
pub fn write_parquet(people: &People, output: &str, provider: &str) -> Result<()> {
    let (aliases_path, identities_path) = output_paths(output);
    write_aliases(people, &aliases_path)?;
    write_identities(people, &identities_path, provider)?;
    tracing::info!(
        aliases = %aliases_path.display(),
        identities = %identities_path.display(),
        "stored the matches"
    );
    Ok(())
}

fn aliases_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("email", DataType::Utf8, false),
        Field::new("name", DataType::Utf8, false),
        Field::new("repo", DataType::Utf8, false),
    ]))
}

fn identities_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("primary_name", DataType::Utf8, false),
        Field::new("external_id_provider", DataType::Utf8, false),
        Field::new("external_id", DataType::Utf8, false),
    ]))
}

fn write_aliases(people: &People, path: &Path) -> Result<()> {
    let mut ids = Vec::new();
    let mut emails = Vec::new();
    let mut names = Vec::new();
    let mut repos = Vec::new();
    for (&id, person) in people.iter() {
        for email in &person.emails {
            ids.push(id);
            emails.push(email.as_str());
            names.push("");
            repos.push("");
        }
        for name in &person.names_with_repos {
            ids.push(id);
            emails.push("");
            names.push(name.name.as_str());
            repos.push(name.repo.as_str());
        }
    }
    let schema = aliases_schema();
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(Int64Array::from(ids)),
            Arc::new(StringArray::from(emails)),
            Arc::new(StringArray::from(names)),
            Arc::new(StringArray::from(repos)),
        ],
    )?;
    write_batch(path, schema, batch)
}

fn write_identities(people: &People, path: &Path, provider: &str) -> Result<()> {
    let mut ids = Vec::new();
    let mut primary_names = Vec::new();
    let mut providers = Vec::new();
    let mut external_ids = Vec::new();
    for (&id, person) in people.iter() {
        ids.push(id);
        primary_names.push(person.primary_name.as_deref().unwrap_or_default());
        providers.push(if person.external_id.is_empty() {
            ""
        } else {
            provider
        });
        external_ids.push(person.external_id.as_str());
    }
    let schema = identities_schema();
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(Int64Array::from(ids)),
            Arc::new(StringArray::from(primary_names)),
            Arc::new(StringArray::from(providers)),
            Arc::new(StringArray::from(external_ids)),
        ],
    )?;
    write_batch(path, schema, batch)
}

fn write_batch(path: &Path, schema: Arc<Schema>, batch: RecordBatch) -> Result<()> {
    let file = File::create(path)?;
    let properties = WriterProperties::builder()
        .set_compression(Compression::UNCOMPRESSED)
        .build();
    let mut writer = ArrowWriter::try_new(file, schema, Some(properties))?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

/// Read the aliases + identities pair back into a persons map, canonicalizing
/// list order. Returns the map and the external id provider stored with it.
pub fn read_parquet(output: &str) -> Result<(People, String)> {
    let (aliases_path, identities_path) = output_paths(output);
    let mut people = People::new();
    let mut provider = String::new();

    for_each_row(&aliases_path, |columns| {
        let id = int_value(columns, 0)?;
        let email = string_value(columns, 1)?;
        let name = string_value(columns, 2)?;
        let repo = string_value(columns, 3)?;
        if people.get(id).is_none() {
            people.insert(Person {
                id,
                ..Person::default()
            });
        }
        let person = people.get_mut(id).expect("person just inserted");
        if !email.is_empty() {
            person.emails.push(email);
        } else if !name.is_empty() {
            person.names_with_repos.push(NameWithRepo { name, repo });
        }
        Ok(())
    })?;

    for_each_row(&identities_path, |columns| {
        let id = int_value(columns, 0)?;
        let primary_name = string_value(columns, 1)?;
        let row_provider = string_value(columns, 2)?;
        let external_id = string_value(columns, 3)?;
        let person = people.get_mut(id).ok_or_else(|| IdcanonError::InputFormat {
            message: format!("identity {} has no aliases", id),
        })?;
        person.primary_name = Some(primary_name).filter(|n| !n.is_empty());
        person.external_id = external_id;
        if provider.is_empty() {
            provider = row_provider;
        }
        Ok(())
    })?;

    for id in people.ids() {
        let person = people.get_mut(id).expect("id listed but person missing");
        person.emails.sort_unstable();
        person.emails.dedup();
        person.names_with_repos.sort_unstable();
        person.names_with_repos.dedup();
    }
    Ok((people, provider))
}

/// Stream every row of one parquet file as a (typed) column slice callback.
fn for_each_row<F>(path: &Path, mut callback: F) -> Result<()>
where
    F: FnMut(&RowView) -> Result<()>,
{
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    for batch in reader {
        let batch = batch?;
        for row in 0..batch.num_rows() {
            callback(&RowView { batch: &batch, row })?;
        }
    }
    Ok(())
}

struct RowView<'a> {
    batch: &'a RecordBatch,
    row: usize,
}

fn int_value(view: &RowView, column: usize) -> Result<i64> {
    view.batch
        .column(column)
        .as_any()
        .downcast_ref::<Int64Array>()
        .map(|a| a.value(view.row))
        .ok_or_else(|| IdcanonError::InputFormat {
            message: format!("column {} is not int64", column),
        })
}

fn string_value(view: &RowView, column: usize) -> Result<String> {
    view.batch
        .column(column)
        .as_any()
        .downcast_ref::<StringArray>()
        .map(|a| a.value(view.row).to_string())
        .ok_or_else(|| IdcanonError::InputFormat {
            message: format!("column {} is not utf8", column),
        })
}
