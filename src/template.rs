//! Substitution of `$name` binding tokens in transformed entries and
//! dependency declarations.
//!
//! A token matches `$[A-Za-z0-9_.]+`. A known binding is spliced in place of
//! the token, a null binding elides the token, and an unknown binding leaves
//! the literal token in place and flags the string as unresolved.
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::{
	bindings::BindingSnapshot,
	entry::{Attrs, TransformedEntry},
};

/// Pattern for one substitution token.
#[allow(clippy::expect_used)]
static BINDING_PATTERN: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"\$[A-Za-z0-9_.]+").expect("static binding pattern"));

/// Outcome of substituting the tokens of one string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Substituted {
	/// The string with known tokens spliced and null tokens elided.
	pub text: String,
	/// At least one token referenced an unknown binding and was left in place.
	pub missing: bool,
	/// At least one token referenced a null binding and was elided.
	pub null: bool,
}

/// Substitute every token in `input` against the snapshot.
pub(crate) fn resolve_string(input: &str, bindings: &BindingSnapshot) -> Substituted {
	let mut text = String::with_capacity(input.len());
	let mut missing = false;
	let mut null = false;
	let mut last = 0;
	for m in BINDING_PATTERN.find_iter(input) {
		text.push_str(&input[last..m.start()]);
		let name = &input[m.start() + 1..m.end()];
		if let Some(value) = bindings.values.get(name) {
			text.push_str(value);
		} else if bindings.nulls.contains(name) {
			null = true;
		} else {
			missing = true;
			text.push_str(m.as_str());
		}
		last = m.end();
	}
	text.push_str(&input[last..]);
	Substituted { text, missing, null }
}

/// Substitute one content value. Sequence elements are substituted
/// independently; elements that resolve a null binding are dropped entirely,
/// so absent values contribute nothing. Returns the resolved value and
/// whether any string still has unresolved tokens.
pub(crate) fn resolve_value(value: &Value, bindings: &BindingSnapshot) -> (Value, bool) {
	match value {
		Value::String(s) => {
			let substituted = resolve_string(s, bindings);
			(Value::String(substituted.text), substituted.missing)
		}
		Value::Array(items) => {
			let mut out = Vec::with_capacity(items.len());
			let mut missing = false;
			for item in items {
				if let Value::String(s) = item {
					let substituted = resolve_string(s, bindings);
					missing = missing || substituted.missing;
					if substituted.null {
						continue;
					}
					out.push(Value::String(substituted.text));
				} else {
					out.push(item.clone());
				}
			}
			(Value::Array(out), missing)
		}
		other => (other.clone(), false),
	}
}

/// Substitute the DN and every content value of an entry. A DN that resolves
/// a null binding counts as unresolved, deferring the entry.
pub(crate) fn resolve_entry(
	entry: &TransformedEntry,
	bindings: &BindingSnapshot,
) -> (TransformedEntry, bool) {
	let dn = resolve_string(&entry.dn, bindings);
	let mut missing = dn.missing || dn.null;
	let mut content = Attrs::new();
	for (attr, value) in &entry.content {
		let (resolved, value_missing) = resolve_value(value, bindings);
		missing = missing || value_missing;
		content.insert(attr.clone(), resolved);
	}
	(TransformedEntry { dn: dn.text, content }, missing)
}

/// Substitute each dependency declaration. Dependencies that resolve a null
/// binding are dropped.
pub(crate) fn resolve_dependencies(
	deps: &[String],
	bindings: &BindingSnapshot,
) -> (Vec<String>, bool) {
	let mut resolved = Vec::with_capacity(deps.len());
	let mut missing = false;
	for dep in deps {
		let substituted = resolve_string(dep, bindings);
		if substituted.null {
			continue;
		}
		missing = missing || substituted.missing;
		resolved.push(substituted.text);
	}
	(resolved, missing)
}

/// Collect the names of unknown bindings referenced by an entry or its
/// dependency declarations, for diagnostics.
pub(crate) fn collect_missing_bindings(
	entry: &TransformedEntry,
	deps: &[String],
	bindings: &BindingSnapshot,
) -> Vec<String> {
	let mut missing = std::collections::BTreeSet::new();
	collect_from_string(&entry.dn, bindings, &mut missing);
	for value in entry.content.values() {
		match value {
			Value::String(s) => collect_from_string(s, bindings, &mut missing),
			Value::Array(items) => {
				for item in items {
					if let Value::String(s) = item {
						collect_from_string(s, bindings, &mut missing);
					}
				}
			}
			_ => {}
		}
	}
	for dep in deps {
		collect_from_string(dep, bindings, &mut missing);
	}
	missing.into_iter().collect()
}

/// Record the unknown binding names of one string.
fn collect_from_string(
	input: &str,
	bindings: &BindingSnapshot,
	missing: &mut std::collections::BTreeSet<String>,
) {
	for m in BINDING_PATTERN.find_iter(input) {
		let name = &input[m.start() + 1..m.end()];
		if !bindings.values.contains_key(name) && !bindings.nulls.contains(name) {
			missing.insert(name.to_owned());
		}
	}
}

#[cfg(test)]
mod tests {
	#![allow(clippy::unwrap_used)]

	use serde_json::{json, Value};

	use super::{
		collect_missing_bindings, resolve_dependencies, resolve_entry, resolve_string,
		resolve_value,
	};
	use crate::{bindings::BindingSnapshot, entry::TransformedEntry};

	fn snapshot() -> BindingSnapshot {
		let mut snapshot = BindingSnapshot::default();
		snapshot.values.insert("pidUidMap.42".to_owned(), "alice".to_owned());
		snapshot.nulls.insert("pidUidMap.99".to_owned());
		snapshot
	}

	#[test]
	fn splices_known_bindings() {
		let resolved = resolve_string("uid=$pidUidMap.42,ou=u,dc=x", &snapshot());
		assert_eq!(resolved.text, "uid=alice,ou=u,dc=x");
		assert!(!resolved.missing);
		assert!(!resolved.null);
	}

	#[test]
	fn keeps_unknown_tokens_and_flags_missing() {
		let resolved = resolve_string("uid=$unknown,ou=u,dc=x", &snapshot());
		assert_eq!(resolved.text, "uid=$unknown,ou=u,dc=x");
		assert!(resolved.missing);
	}

	#[test]
	fn elides_null_bindings() {
		let resolved = resolve_string("gid=$pidUidMap.99!", &snapshot());
		assert_eq!(resolved.text, "gid=!");
		assert!(resolved.null);
		assert!(!resolved.missing);
	}

	#[test]
	fn drops_null_sequence_elements() {
		let (resolved, missing) =
			resolve_value(&json!(["$pidUidMap.99", "0"]), &snapshot());
		assert_eq!(resolved, json!(["0"]));
		assert!(!missing);
	}

	#[test]
	fn keeps_non_string_sequence_elements() {
		let (resolved, missing) = resolve_value(&json!([42, "$pidUidMap.42"]), &snapshot());
		assert_eq!(resolved, json!([42, "alice"]));
		assert!(!missing);
	}

	#[test]
	fn null_dn_defers_the_entry() {
		let entry = TransformedEntry {
			dn: "uid=$pidUidMap.99,ou=u,dc=x".to_owned(),
			content: crate::entry::Attrs::new(),
		};
		let (_, missing) = resolve_entry(&entry, &snapshot());
		assert!(missing);
	}

	#[test]
	fn null_dependencies_are_dropped() {
		let deps =
			vec!["uid=$pidUidMap.42,ou=u,dc=x".to_owned(), "uid=$pidUidMap.99,ou=u,dc=x".to_owned()];
		let (resolved, missing) = resolve_dependencies(&deps, &snapshot());
		assert_eq!(resolved, vec!["uid=alice,ou=u,dc=x".to_owned()]);
		assert!(!missing);
	}

	#[test]
	fn collects_unknown_names_once() {
		let entry = TransformedEntry {
			dn: "uid=$a,ou=u,dc=x".to_owned(),
			content: [("cn".to_owned(), Value::String("$a $b".to_owned()))].into_iter().collect(),
		};
		let deps = vec!["cn=$pidUidMap.42,$b".to_owned()];
		assert_eq!(
			collect_missing_bindings(&entry, &deps, &snapshot()),
			vec!["a".to_owned(), "b".to_owned()]
		);
	}
}
