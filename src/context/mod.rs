//! Per-run context store
//!
//! Append-only record of every field written during one run, plus the
//! execution trace. Each field remembers who wrote it and when; a later
//! writer may only replace it when it declares itself the field's owner.

use crate::capabilities::{Fields, HINTS, REQUEST_TEXT};
use crate::models::{Request, StepExecutionRecord};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Write;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldWriter {
    Request,
    Step { index: usize, capability: String },
}

impl std::fmt::Display for FieldWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldWriter::Request => write!(f, "request"),
            FieldWriter::Step { index, capability } => write!(f, "step {} ({})", index, capability),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub value: Value,
    pub written_by: FieldWriter,
    pub written_at: DateTime<Utc>,
    /// Earlier writers of this field, oldest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub previous_writers: Vec<FieldWriter>,
}

/// Rejected write; nothing from the batch was applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("field '{field}' already written by {owner}")]
pub struct FieldConflict {
    pub field: String,
    pub owner: FieldWriter,
}

#[derive(Debug, Clone)]
pub struct ContextStore {
    run_id: Uuid,
    fields: BTreeMap<String, ContextEntry>,
    trace: Vec<StepExecutionRecord>,
}

impl ContextStore {
    /// Fresh store seeded with the request's text and hints.
    pub fn for_request(request: &Request) -> Result<Self> {
        let mut store = Self {
            run_id: Uuid::new_v4(),
            fields: BTreeMap::new(),
            trace: Vec::new(),
        };

        let mut seed = Fields::new();
        seed.insert(REQUEST_TEXT.to_string(), Value::String(request.text.clone()));
        seed.insert(HINTS.to_string(), serde_json::to_value(&request.hints)?);

        for (field, value) in seed {
            store.fields.insert(
                field,
                ContextEntry {
                    value,
                    written_by: FieldWriter::Request,
                    written_at: request.received_at,
                    previous_writers: Vec::new(),
                },
            );
        }

        Ok(store)
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field).map(|entry| &entry.value)
    }

    pub fn entry(&self, field: &str) -> Option<&ContextEntry> {
        self.fields.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// First of `required` that is not present.
    pub fn first_missing<'a>(&self, required: &'a [String]) -> Option<&'a str> {
        required
            .iter()
            .map(String::as_str)
            .find(|field| !self.contains(field))
    }

    /// Copy of the named fields that are present.
    pub fn subset<'a, I>(&self, names: I) -> Fields
    where
        I: IntoIterator<Item = &'a String>,
    {
        names
            .into_iter()
            .filter_map(|name| self.get(name).map(|v| (name.clone(), v.clone())))
            .collect()
    }

    /// Write a batch of fields atomically.
    ///
    /// Existing fields are replaced only when `owns_fields` is set; otherwise
    /// the whole batch is rejected and the store is left untouched.
    pub fn commit(
        &mut self,
        writer: FieldWriter,
        produced: Fields,
        owns_fields: bool,
    ) -> std::result::Result<Vec<String>, FieldConflict> {
        if !owns_fields {
            if let Some((field, entry)) = produced
                .keys()
                .find_map(|field| self.fields.get(field).map(|entry| (field, entry)))
            {
                return Err(FieldConflict {
                    field: field.clone(),
                    owner: entry.written_by.clone(),
                });
            }
        }

        let now = Utc::now();
        let mut written = Vec::with_capacity(produced.len());

        for (field, value) in produced {
            let previous_writers = match self.fields.remove(&field) {
                Some(mut old) => {
                    old.previous_writers.push(old.written_by);
                    old.previous_writers
                }
                None => Vec::new(),
            };

            written.push(field.clone());
            self.fields.insert(
                field,
                ContextEntry {
                    value,
                    written_by: writer.clone(),
                    written_at: now,
                    previous_writers,
                },
            );
        }

        Ok(written)
    }

    pub fn record(&mut self, record: StepExecutionRecord) {
        self.trace.push(record);
    }

    pub fn trace(&self) -> &[StepExecutionRecord] {
        &self.trace
    }

    /// SHA-256 over the field names and values, in name order.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();

        for (field, entry) in &self.fields {
            hasher.update(field.as_bytes());
            hasher.update([0u8]);
            // Stream JSON directly into hasher (no intermediate String)
            if serde_json::to_writer(HashWriter(&mut hasher), &entry.value).is_err() {
                return String::new();
            }
            hasher.update([0u8]);
        }

        hex::encode(hasher.finalize())
    }
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
