//! Personal data detection
//!
//! Sample rows of every external model are matched against email, phone
//! and Lithuanian personal code patterns. A property is tagged when at
//! least half of its non-empty sampled values match one kind.

use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;
use serde_json::Value;
use spinta_manifest::schema::PrefixDef;
use spinta_manifest::{Manifest, ModelId, PropertyId};
use tracing::{debug, info};

use crate::backend::Backend;
use crate::error::BackendError;
use crate::query::QueryPlan;
use crate::table::TableName;

pub const PII_PREFIX: &str = "pii";
pub const PII_URI: &str = "https://data.gov.lt/pii/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PiiKind {
    Email,
    Phone,
    PersonalCode,
}

impl PiiKind {
    pub fn uri(&self) -> &'static str {
        match self {
            PiiKind::Email => "pii:email",
            PiiKind::Phone => "pii:phone",
            PiiKind::PersonalCode => "pii:id",
        }
    }
}

impl fmt::Display for PiiKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.uri())
    }
}

pub struct PiiDetector {
    email: Regex,
    phone: Regex,
    personal_code: Regex,
}

impl PiiDetector {
    pub fn new() -> Result<Self, BackendError> {
        Ok(Self {
            email: Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$")?,
            phone: Regex::new(r"^(\+3706\d{7}|86\d{7}|\+[1-9]\d{7,14})$")?,
            personal_code: Regex::new(r"^[1-6]\d{10}$")?,
        })
    }

    pub fn classify(&self, value: &str) -> Option<PiiKind> {
        let value = value.trim();
        let compact: String = value.chars().filter(|c| !matches!(c, ' ' | '-' | '(' | ')')).collect();
        if self.email.is_match(value) {
            Some(PiiKind::Email)
        } else if self.personal_code.is_match(value) && personal_code_checksum(value) {
            Some(PiiKind::PersonalCode)
        } else if self.phone.is_match(&compact) {
            Some(PiiKind::Phone)
        } else {
            None
        }
    }
}

/// Control digit check of an 11-digit personal code
fn personal_code_checksum(code: &str) -> bool {
    let digits: Vec<u32> = code.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() != 11 {
        return false;
    }
    let weighted = |weights: [u32; 10]| -> u32 {
        digits.iter().zip(weights).map(|(d, w)| d * w).sum::<u32>() % 11
    };
    let mut control = weighted([1, 2, 3, 4, 5, 6, 7, 8, 9, 1]);
    if control == 10 {
        control = weighted([3, 4, 5, 6, 7, 8, 9, 1, 2, 3]);
        if control == 10 {
            control = 0;
        }
    }
    control == digits[10]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PiiMatch {
    pub model: ModelId,
    pub property: PropertyId,
    pub kind: PiiKind,
}

/// Sample up to `limit` rows per external model and classify every column
pub fn detect_pii(
    manifest: &Manifest,
    backend: &dyn Backend,
    limit: usize,
) -> Result<Vec<PiiMatch>, BackendError> {
    let detector = PiiDetector::new()?;
    let dialect = backend.dialect();
    let mut found = Vec::new();

    for (model_id, model) in manifest.get_models() {
        if model.external.is_empty() {
            continue;
        }
        let mut columns = Vec::new();
        let mut plan = QueryPlan::new(TableName::new(model.external.clone())).limit(limit);
        for &pid in &model.properties {
            let property = manifest.property(pid);
            if property.external.is_empty() || property.synthetic {
                continue;
            }
            plan = plan.column(property.external.clone(), property.name.clone());
            columns.push(pid);
        }
        if columns.is_empty() {
            continue;
        }

        let query = plan.compile(dialect.as_ref())?;
        let rows = {
            let mut tx = backend.begin()?;
            let rows = tx.query(&query.sql, &query.params)?;
            tx.commit()?;
            rows
        };
        debug!(model = %model.name, rows = rows.len(), "sampled");

        for pid in columns {
            let name = &manifest.property(pid).name;
            let mut counts: BTreeMap<PiiKind, usize> = BTreeMap::new();
            let mut total = 0;
            for row in &rows {
                let text = match row.get(name) {
                    Some(Value::String(text)) if !text.trim().is_empty() => text.clone(),
                    Some(Value::Number(number)) => number.to_string(),
                    _ => continue,
                };
                total += 1;
                if let Some(kind) = detector.classify(&text) {
                    *counts.entry(kind).or_default() += 1;
                }
            }
            let best = counts.into_iter().max_by_key(|(_, count)| *count);
            if let Some((kind, count)) = best {
                if count * 2 >= total {
                    found.push(PiiMatch {
                        model: model_id,
                        property: pid,
                        kind,
                    });
                }
            }
        }
    }

    info!(matches = found.len(), "pii detection finished");
    Ok(found)
}

/// Set `uri` of matched properties and declare the `pii` prefix on their
/// datasets
pub fn apply_pii(manifest: &mut Manifest, matches: &[PiiMatch]) {
    for found in matches {
        manifest.property_mut(found.property).attrs.uri = found.kind.uri().to_string();
        let Some(dataset) = manifest.model(found.model).dataset else {
            continue;
        };
        let meta = &mut manifest.dataset_mut(dataset).meta;
        if !meta.prefixes.iter().any(|p| p.name == PII_PREFIX) {
            meta.prefixes.push(PrefixDef {
                name: PII_PREFIX.to_string(),
                uri: PII_URI.to_string(),
                ..PrefixDef::default()
            });
        }
    }
}
