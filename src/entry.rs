//! The entry content model shared by the result cache, the hook protocol and
//! the target writer.
use ldap3::SearchEntry;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An entry's attributes: attribute name to scalar string or ordered sequence
/// of scalars.
pub type Attrs = Map<String, Value>;

/// The last-seen snapshot of one source entry within one search. Also the
/// payload posted to hooks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEntry {
	/// Distinguished name of the entry.
	pub dn: String,
	/// Attribute values keyed by attribute name.
	pub content: Attrs,
}

/// A target-directory write request produced by a hook. The DN, string values
/// and dependency declarations may contain `$name` substitution tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformedEntry {
	/// Distinguished name to write to, possibly templated.
	#[serde(default)]
	pub dn: String,
	/// Attribute values keyed by attribute name, possibly templated.
	#[serde(default)]
	pub content: Attrs,
}

/// Lowercase and trim a DN for equality checks. The original casing is kept
/// for LDAP operations and log messages.
#[must_use]
pub fn normalize_dn(dn: &str) -> String {
	dn.trim().to_lowercase()
}

/// Build the content mapping for a source entry: attributes with exactly one
/// value map to the scalar string, attributes with more (or zero) values map
/// to the ordered sequence. Binary attributes are not representable in the
/// JSON hook payload and are skipped.
#[must_use]
pub fn content_from_search(entry: &SearchEntry) -> Attrs {
	let mut content = Attrs::new();
	for (attr, values) in &entry.attrs {
		let value = match values.as_slice() {
			[single] => Value::String(single.clone()),
			many => Value::Array(many.iter().cloned().map(Value::String).collect()),
		};
		content.insert(attr.clone(), value);
	}
	content
}

/// An extension trait for [`SearchEntry`] that provides convenience methods
/// for extracting data.
pub trait SearchEntryExt {
	/// All values of an attribute, matched case-insensitively per LDAP
	/// attribute-name semantics.
	fn attr_ci(&self, attr: &str) -> Option<&[String]>;
}

impl SearchEntryExt for SearchEntry {
	fn attr_ci(&self, attr: &str) -> Option<&[String]> {
		self.attrs
			.iter()
			.find(|(name, _)| name.eq_ignore_ascii_case(attr))
			.map(|(_, values)| values.as_slice())
	}
}

#[cfg(test)]
mod tests {
	#![allow(clippy::unwrap_used)]

	use std::collections::HashMap;

	use ldap3::SearchEntry;
	use serde_json::{json, Value};

	use super::{content_from_search, normalize_dn, SearchEntryExt};

	#[test]
	fn normalizes_dns() {
		assert_eq!(normalize_dn("  UID=Alice,OU=People,DC=X "), "uid=alice,ou=people,dc=x");
		assert_eq!(normalize_dn(""), "");
	}

	#[test]
	fn single_values_become_scalars() {
		let entry = SearchEntry {
			dn: "uid=alice,ou=people,dc=x".to_owned(),
			attrs: HashMap::from([
				("cn".to_owned(), vec!["Alice".to_owned()]),
				("mail".to_owned(), vec!["a@x".to_owned(), "alice@x".to_owned()]),
			]),
			bin_attrs: HashMap::new(),
		};
		let content = content_from_search(&entry);
		assert_eq!(content.get("cn").unwrap(), &Value::String("Alice".to_owned()));
		assert_eq!(content.get("mail").unwrap(), &json!(["a@x", "alice@x"]));
	}

	#[test]
	fn attr_ci_ignores_case() {
		let entry = SearchEntry {
			dn: "cn=grp,ou=g,dc=x".to_owned(),
			attrs: HashMap::from([("memberUid".to_owned(), vec!["alice".to_owned()])]),
			bin_attrs: HashMap::new(),
		};
		assert_eq!(entry.attr_ci("memberuid").unwrap(), ["alice".to_owned()]);
		assert_eq!(entry.attr_ci("MEMBERUID").unwrap(), ["alice".to_owned()]);
		assert!(entry.attr_ci("uid").is_none());
	}
}
