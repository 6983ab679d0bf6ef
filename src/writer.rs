//! Serialized add-or-modify of transformed entries against the target
//! directory, with attribute-merge semantics.
use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use dashmap::DashMap;
use ldap3::{Ldap, LdapError, Mod, Scope, SearchEntry};
use serde_json::Value;
use tracing::info;

use crate::{
	config::LdapConfig,
	entry::{normalize_dn, Attrs, SearchEntryExt, TransformedEntry},
	error::Error,
};

/// Attributes whose target value is the union of existing and supplied
/// values rather than a replacement. Compared case-insensitively.
const MERGE_ATTRIBUTES: [&str; 1] = ["memberUid"];

/// Object classes assumed for added entries that do not declare any.
const DEFAULT_OBJECT_CLASSES: [&str; 2] = ["top", "inetOrgPerson"];

/// Applies one resolved entry to the target directory.
#[async_trait]
pub trait EntryWriter: Send + Sync {
	/// Write `entry`, creating it or merging it into an existing entry.
	async fn store(&self, entry: &TransformedEntry) -> Result<(), Error>;
}

/// Writes transformed entries to the target LDAP server, serializing writes
/// per DN.
pub struct LdapWriter {
	/// Connection details of the target server.
	config: LdapConfig,
	/// Lazily populated lock table keyed by normalized DN. Entries are
	/// retained for the process lifetime.
	locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
	/// Lowercased merge-attribute names.
	merge_attrs: HashSet<String>,
}

impl LdapWriter {
	/// Create a writer for the given target server.
	#[must_use]
	pub fn new(config: LdapConfig) -> Self {
		let merge_attrs = MERGE_ATTRIBUTES.iter().map(|attr| attr.to_lowercase()).collect();
		LdapWriter { config, locks: DashMap::new(), merge_attrs }
	}

	/// Whether supplied values of `attr` are merged with the target's.
	fn is_merge_attr(&self, attr: &str) -> bool {
		self.merge_attrs.contains(&attr.to_lowercase())
	}

	/// The per-DN mutex for `dn`, creating it on first use.
	fn dn_lock(&self, dn: &str) -> Arc<tokio::sync::Mutex<()>> {
		let mut key = normalize_dn(dn);
		if key.is_empty() {
			key = dn.to_owned();
		}
		self.locks.entry(key).or_default().clone()
	}

	/// Read the target entry at `dn`, requesting only the merge attributes.
	/// "No Such Object" means the entry is not present, not an error.
	async fn read_existing(&self, ldap: &mut Ldap, dn: &str) -> Result<Option<SearchEntry>, Error> {
		let mut attrs = vec!["dn".to_owned()];
		attrs.extend(self.merge_attrs.iter().cloned());
		let result = ldap.search(dn, Scope::Base, "(objectClass=*)", attrs).await?;
		match result.success() {
			Ok((entries, _)) => Ok(entries.into_iter().next().map(SearchEntry::construct)),
			Err(LdapError::LdapResult { result }) if result.rc == 32 => Ok(None),
			Err(err) => Err(err.into()),
		}
	}

	/// Add or modify `entry` over an established connection.
	async fn apply(&self, ldap: &mut Ldap, entry: &TransformedEntry) -> Result<(), Error> {
		let existing = self.read_existing(ldap, &entry.dn).await?;
		let (mut attributes, aggregates) = convert_content(&entry.content);

		match existing {
			None => {
				let mut add_attrs: Vec<(String, HashSet<String>)> = attributes
					.into_iter()
					.map(|(attr, values)| (attr, values.into_iter().collect()))
					.collect();
				if !add_attrs.iter().any(|(attr, _)| attr.eq_ignore_ascii_case("objectClass")) {
					add_attrs.push((
						"objectClass".to_owned(),
						DEFAULT_OBJECT_CLASSES.iter().map(ToString::to_string).collect(),
					));
				}
				ldap.add(&entry.dn, add_attrs).await?.success()?;
				info!(dn = %entry.dn, "Added entry to target LDAP");
			}
			Some(current) => {
				for (attr, values) in &mut attributes {
					if !self.is_merge_attr(attr) && !aggregates.contains(&attr.to_lowercase()) {
						continue;
					}
					if values.is_empty() {
						continue;
					}
					let Some(existing_values) = current.attr_ci(attr) else { continue };
					if existing_values.is_empty() {
						continue;
					}
					*values = merge_unique(existing_values, values);
				}
				let mods: Vec<Mod<String>> = attributes
					.into_iter()
					.map(|(attr, values)| Mod::Replace(attr, values.into_iter().collect()))
					.collect();
				ldap.modify(&entry.dn, mods).await?.success()?;
				info!(dn = %entry.dn, "Modified entry in target LDAP");
			}
		}
		Ok(())
	}
}

#[async_trait]
impl EntryWriter for LdapWriter {
	async fn store(&self, entry: &TransformedEntry) -> Result<(), Error> {
		let lock = self.dn_lock(&entry.dn);
		let _guard = lock.lock().await;

		let mut ldap = self.config.connect().await?;
		let result = self.apply(&mut ldap, entry).await;
		let _ = ldap.unbind().await;
		result
	}
}

/// Render one scalar content value as an LDAP attribute value.
fn scalar_to_string(value: &Value) -> String {
	match value {
		Value::String(s) => s.clone(),
		other => other.to_string(),
	}
}

/// Render any content value as a list of LDAP attribute values.
pub(crate) fn value_to_strings(value: &Value) -> Vec<String> {
	match value {
		Value::Array(items) => items.iter().map(scalar_to_string).collect(),
		other => vec![scalar_to_string(other)],
	}
}

/// Convert entry content to attribute-value lists, also reporting which
/// attributes were sequences by construction (lowercased names). Those are
/// merged like the configured merge attributes.
fn convert_content(content: &Attrs) -> (Vec<(String, Vec<String>)>, HashSet<String>) {
	let mut attributes = Vec::with_capacity(content.len());
	let mut aggregates = HashSet::new();
	for (attr, value) in content {
		if matches!(value, Value::Array(_)) {
			aggregates.insert(attr.to_lowercase());
		}
		attributes.push((attr.clone(), value_to_strings(value)));
	}
	(attributes, aggregates)
}

/// Union of `existing` and `incoming`, preserving first-seen order and
/// deduplicating as strings.
pub(crate) fn merge_unique(existing: &[String], incoming: &[String]) -> Vec<String> {
	if existing.is_empty() {
		return incoming.to_vec();
	}
	let mut seen = HashSet::with_capacity(existing.len() + incoming.len());
	let mut merged = Vec::with_capacity(existing.len() + incoming.len());
	for value in existing.iter().chain(incoming) {
		if seen.insert(value.clone()) {
			merged.push(value.clone());
		}
	}
	merged
}

/// Merge one content value pair: if either side is a sequence the union rule
/// applies, otherwise the incoming scalar wins.
fn merge_value(existing: &Value, incoming: &Value) -> Value {
	if matches!(existing, Value::Array(_)) || matches!(incoming, Value::Array(_)) {
		let merged = merge_unique(&value_to_strings(existing), &value_to_strings(incoming));
		Value::Array(merged.into_iter().map(Value::String).collect())
	} else {
		incoming.clone()
	}
}

/// Merge the content of a pending entry into an incoming entry for the same
/// DN.
pub(crate) fn merge_content(existing: Attrs, incoming: Attrs) -> Attrs {
	let mut merged = existing;
	for (attr, value) in incoming {
		match merged.get(&attr) {
			Some(current) => {
				let combined = merge_value(current, &value);
				merged.insert(attr, combined);
			}
			None => {
				merged.insert(attr, value);
			}
		}
	}
	merged
}

#[cfg(test)]
mod tests {
	#![allow(clippy::unwrap_used)]

	use serde_json::json;

	use super::{convert_content, merge_content, merge_unique, merge_value, value_to_strings};
	use crate::entry::Attrs;

	fn strings(values: &[&str]) -> Vec<String> {
		values.iter().map(ToString::to_string).collect()
	}

	#[test]
	fn merge_unique_keeps_first_seen_order() {
		assert_eq!(
			merge_unique(&strings(&["alice"]), &strings(&["bob", "alice", "bob"])),
			strings(&["alice", "bob"])
		);
		assert_eq!(merge_unique(&[], &strings(&["bob"])), strings(&["bob"]));
	}

	#[test]
	fn scalars_are_stringified_like_display() {
		assert_eq!(value_to_strings(&json!("alice")), strings(&["alice"]));
		assert_eq!(value_to_strings(&json!(42)), strings(&["42"]));
		assert_eq!(value_to_strings(&json!(true)), strings(&["true"]));
		assert_eq!(value_to_strings(&json!(["a", 1])), strings(&["a", "1"]));
	}

	#[test]
	fn incoming_scalar_wins_unless_either_side_is_a_sequence() {
		assert_eq!(merge_value(&json!("old"), &json!("new")), json!("new"));
		assert_eq!(merge_value(&json!(["a"]), &json!("b")), json!(["a", "b"]));
		assert_eq!(merge_value(&json!("a"), &json!(["b", "a"])), json!(["a", "b"]));
	}

	#[test]
	fn content_merge_unions_overlapping_keys() {
		let existing: Attrs = [
			("cn".to_owned(), json!("grp")),
			("memberUid".to_owned(), json!(["alice"])),
		]
		.into_iter()
		.collect();
		let incoming: Attrs = [
			("memberUid".to_owned(), json!(["bob"])),
			("gidNumber".to_owned(), json!("100")),
		]
		.into_iter()
		.collect();

		let merged = merge_content(existing, incoming);
		assert_eq!(merged.get("cn").unwrap(), &json!("grp"));
		assert_eq!(merged.get("memberUid").unwrap(), &json!(["alice", "bob"]));
		assert_eq!(merged.get("gidNumber").unwrap(), &json!("100"));
	}

	#[test]
	fn sequences_by_construction_are_marked_aggregate() {
		let content: Attrs = [
			("cn".to_owned(), json!("grp")),
			("supplementalGroups".to_owned(), json!(["0", "100"])),
		]
		.into_iter()
		.collect();
		let (attributes, aggregates) = convert_content(&content);
		assert!(aggregates.contains("supplementalgroups"));
		assert!(!aggregates.contains("cn"));
		assert_eq!(attributes.len(), 2);
	}
}
