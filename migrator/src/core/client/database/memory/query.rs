//! Evaluation of the MongoDB filter and update subset supported by [`super::MemoryStore`].

use crate::core::client::database::DatabaseError;
use mongodb::bson::{Bson, Document};

/// Values a dotted path reaches, descending into embedded documents and across array elements.
pub fn path_values<'a>(doc: &'a Document, path: &str) -> Vec<&'a Bson> {
    let mut values = Vec::new();
    collect_path(doc, path, &mut values);
    values
}

fn collect_path<'a>(doc: &'a Document, path: &str, values: &mut Vec<&'a Bson>) {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    let Some(value) = doc.get(head) else {
        return;
    };
    match (rest, value) {
        (None, value) => values.push(value),
        (Some(rest), Bson::Document(inner)) => collect_path(inner, rest, values),
        (Some(rest), Bson::Array(items)) => {
            for item in items {
                if let Bson::Document(inner) = item {
                    collect_path(inner, rest, values);
                }
            }
        }
        (Some(_), _) => {}
    }
}

/// Equality with numeric widening, so that `Int32(2)`, `Int64(2)` and `Double(2.0)` compare equal.
pub fn bson_eq(left: &Bson, right: &Bson) -> bool {
    match (as_f64(left), as_f64(right)) {
        (Some(l), Some(r)) => return l == r,
        (Some(_), None) | (None, Some(_)) => return false,
        (None, None) => {}
    }
    match (left, right) {
        (Bson::Array(l), Bson::Array(r)) => l.len() == r.len() && l.iter().zip(r).all(|(a, b)| bson_eq(a, b)),
        (Bson::Document(l), Bson::Document(r)) => {
            l.len() == r.len() && l.iter().all(|(key, value)| r.get(key).is_some_and(|other| bson_eq(value, other)))
        }
        _ => left == right,
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(f64::from(*v)),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

fn is_operator_document(value: &Bson) -> bool {
    matches!(value, Bson::Document(doc) if doc.keys().next().is_some_and(|key| key.starts_with('$')))
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Null => false,
        other => as_f64(other).map(|v| v != 0.0).unwrap_or(true),
    }
}

/// A missing field matches an explicit `null`; an array matches as a whole or through any element.
fn equals_or_null(values: &[&Bson], expected: &Bson) -> bool {
    if values.is_empty() {
        return matches!(expected, Bson::Null);
    }
    values.iter().any(|actual| {
        bson_eq(actual, expected) || matches!(actual, Bson::Array(items) if items.iter().any(|item| bson_eq(item, expected)))
    })
}

pub fn matches(doc: &Document, filter: &Document) -> Result<bool, DatabaseError> {
    for (key, condition) in filter {
        if key == "$and" {
            let Bson::Array(clauses) = condition else {
                return Err(DatabaseError::UnsupportedOperator("$and expects an array".to_string()));
            };
            for clause in clauses {
                let Bson::Document(clause) = clause else {
                    return Err(DatabaseError::UnsupportedOperator("$and expects documents".to_string()));
                };
                if !matches(doc, clause)? {
                    return Ok(false);
                }
            }
            continue;
        }
        if key.starts_with('$') {
            return Err(DatabaseError::UnsupportedOperator(key.clone()));
        }

        let values = path_values(doc, key);
        let satisfied = match condition {
            Bson::Document(operators) if is_operator_document(condition) => {
                let mut satisfied = true;
                for (operator, argument) in operators {
                    satisfied &= match operator.as_str() {
                        "$exists" => !values.is_empty() == truthy(argument),
                        "$ne" => !equals_or_null(&values, argument),
                        "$in" => match argument {
                            Bson::Array(candidates) => candidates.iter().any(|c| equals_or_null(&values, c)),
                            _ => return Err(DatabaseError::UnsupportedOperator("$in expects an array".to_string())),
                        },
                        other => return Err(DatabaseError::UnsupportedOperator(other.to_string())),
                    };
                }
                satisfied
            }
            expected => equals_or_null(&values, expected),
        };
        if !satisfied {
            return Ok(false);
        }
    }
    Ok(true)
}

fn set_path(doc: &mut Document, path: &str, value: Bson) -> Result<(), DatabaseError> {
    match path.split_once('.') {
        None => {
            doc.insert(path, value);
            Ok(())
        }
        Some((head, rest)) => {
            let child = doc.entry(head.to_string()).or_insert_with(|| Bson::Document(Document::new()));
            match child {
                Bson::Document(inner) => set_path(inner, rest, value),
                _ => Err(DatabaseError::UnsupportedOperator(format!("cannot create field '{rest}' in non-document '{head}'"))),
            }
        }
    }
}

fn unset_path(doc: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(inner)) = doc.get_mut(head) {
                unset_path(inner, rest);
            }
        }
    }
}

fn push_path(doc: &mut Document, path: &str, value: Bson) -> Result<(), DatabaseError> {
    match path.split_once('.') {
        None => match doc.get_mut(path) {
            None => {
                doc.insert(path, Bson::Array(vec![value]));
                Ok(())
            }
            Some(Bson::Array(items)) => {
                items.push(value);
                Ok(())
            }
            Some(_) => Err(DatabaseError::UnsupportedOperator(format!("$push target '{path}' is not an array"))),
        },
        Some((head, rest)) => {
            let child = doc.entry(head.to_string()).or_insert_with(|| Bson::Document(Document::new()));
            match child {
                Bson::Document(inner) => push_path(inner, rest, value),
                _ => Err(DatabaseError::UnsupportedOperator(format!("cannot push into non-document '{head}'"))),
            }
        }
    }
}

/// Apply an update document in place. `$setOnInsert` only applies when `inserting`.
pub fn apply_update(doc: &mut Document, update: &Document, inserting: bool) -> Result<(), DatabaseError> {
    for (operator, fields) in update {
        let Bson::Document(fields) = fields else {
            return Err(DatabaseError::UnsupportedOperator(format!("{operator} expects a document")));
        };
        match operator.as_str() {
            "$set" => {
                for (path, value) in fields {
                    set_path(doc, path, value.clone())?;
                }
            }
            "$setOnInsert" => {
                if inserting {
                    for (path, value) in fields {
                        set_path(doc, path, value.clone())?;
                    }
                }
            }
            "$unset" => {
                for (path, _) in fields {
                    unset_path(doc, path);
                }
            }
            "$push" => {
                for (path, value) in fields {
                    push_path(doc, path, value.clone())?;
                }
            }
            other => return Err(DatabaseError::UnsupportedOperator(other.to_string())),
        }
    }
    Ok(())
}

/// Document an upsert starts from: the plain equality clauses of its filter.
pub fn upsert_seed(filter: &Document) -> Result<Document, DatabaseError> {
    let mut seed = Document::new();
    for (key, value) in filter {
        if key.starts_with('$') || is_operator_document(value) {
            continue;
        }
        set_path(&mut seed, key, value.clone())?;
    }
    Ok(seed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;
    use rstest::rstest;

    #[rstest]
    #[case(doc! { "version": 2 }, true)]
    #[case(doc! { "version": 2_i64 }, true)]
    #[case(doc! { "version": 3 }, false)]
    #[case(doc! { "meta.tags": { "$exists": true } }, true)]
    #[case(doc! { "meta.properties": { "$exists": false } }, true)]
    #[case(doc! { "owner": null }, true)]
    #[case(doc! { "meta.tags": { "$ne": ["a"] } }, false)]
    #[case(doc! { "meta.tags": "a" }, true)]
    #[case(doc! { "meta.tags": { "$ne": "a" } }, false)]
    #[case(doc! { "builders.type": "search" }, true)]
    #[case(doc! { "builders.type": { "$ne": "chat" } }, true)]
    #[case(doc! { "builders.type": { "$ne": "search" } }, false)]
    #[case(doc! { "$and": [{ "version": 2 }, { "isTainted": false }] }, true)]
    fn filter_subset_matches_like_mongo(#[case] filter: Document, #[case] expected: bool) {
        let record = doc! {
            "version": 2_i32,
            "isTainted": false,
            "meta": { "tags": ["a"] },
            "builders": [{ "type": "search" }, { "type": "mlt" }],
        };
        assert_eq!(matches(&record, &filter).unwrap(), expected);
    }

    #[rstest]
    fn unknown_operators_are_rejected() {
        let record = doc! { "version": 2 };
        assert!(matches(&record, &doc! { "version": { "$gt": 1 } }).is_err());
        let mut record = record;
        assert!(apply_update(&mut record, &doc! { "$inc": { "version": 1 } }, false).is_err());
    }

    #[rstest]
    fn update_operators_edit_nested_paths() {
        let mut record = doc! { "meta": { "tags": ["a"] } };
        apply_update(
            &mut record,
            &doc! {
                "$set": { "meta.properties.tags": ["a"] },
                "$unset": { "meta.tags": true },
                "$push": { "history": { "outcome": "success" } },
                "$setOnInsert": { "created": true },
            },
            false,
        )
        .unwrap();
        assert_eq!(
            record,
            doc! { "meta": { "properties": { "tags": ["a"] } }, "history": [{ "outcome": "success" }] }
        );
    }

    #[rstest]
    fn upsert_seed_keeps_equality_clauses_only() {
        let seed = upsert_seed(&doc! { "_id": "db-version", "version": 1, "owner": { "$exists": false } }).unwrap();
        assert_eq!(seed, doc! { "_id": "db-version", "version": 1 });
    }
}
