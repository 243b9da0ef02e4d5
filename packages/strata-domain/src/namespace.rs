//! Namespace identifiers and the ownership rules that isolate private graphs.
//!
//! A namespace is rendered as `<kind>[:<value>][:<suffix>]`:
//!
//! - `global` is the shared graph every caller can read.
//! - `domain:<name>` is a shared per-topic graph.
//! - `user:<id>` is the private graph of one identity.
//! - `user:<id>:notes` is that identity's private noting graph.
//!
//! Parsing fails closed and always round-trips through [`Namespace::to_string`].

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub const GLOBAL: &str = "global";
pub const USER_PREFIX: &str = "user";
pub const DOMAIN_PREFIX: &str = "domain";
pub const NOTES_SUFFIX: &str = "notes";

const SEPARATOR: char = ':';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamespaceKind {
	Global,
	User,
	Domain,
}
impl NamespaceKind {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Global => GLOBAL,
			Self::User => USER_PREFIX,
			Self::Domain => DOMAIN_PREFIX,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Namespace {
	Global,
	Domain(String),
	User(String),
	UserNotes(String),
}
impl Namespace {
	pub fn kind(&self) -> NamespaceKind {
		match self {
			Self::Global => NamespaceKind::Global,
			Self::Domain(_) => NamespaceKind::Domain,
			Self::User(_) | Self::UserNotes(_) => NamespaceKind::User,
		}
	}

	pub fn value(&self) -> Option<&str> {
		match self {
			Self::Global => None,
			Self::Domain(value) | Self::User(value) | Self::UserNotes(value) => Some(value),
		}
	}

	pub fn suffix(&self) -> Option<&str> {
		match self {
			Self::UserNotes(_) => Some(NOTES_SUFFIX),
			_ => None,
		}
	}

	/// Private namespaces are readable by their owner only.
	pub fn is_private(&self) -> bool {
		self.kind() == NamespaceKind::User
	}

	pub fn owner(&self) -> Option<&str> {
		match self {
			Self::User(id) | Self::UserNotes(id) => Some(id),
			_ => None,
		}
	}
}
impl fmt::Display for Namespace {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Global => f.write_str(GLOBAL),
			Self::Domain(name) => write!(f, "{DOMAIN_PREFIX}{SEPARATOR}{name}"),
			Self::User(id) => write!(f, "{USER_PREFIX}{SEPARATOR}{id}"),
			Self::UserNotes(id) =>
				write!(f, "{USER_PREFIX}{SEPARATOR}{id}{SEPARATOR}{NOTES_SUFFIX}"),
		}
	}
}
impl FromStr for Namespace {
	type Err = Error;

	fn from_str(raw: &str) -> Result<Self> {
		parse(raw)
	}
}
impl TryFrom<String> for Namespace {
	type Error = Error;

	fn try_from(raw: String) -> Result<Self> {
		parse(&raw)
	}
}
impl From<Namespace> for String {
	fn from(namespace: Namespace) -> Self {
		namespace.to_string()
	}
}

pub fn global() -> Namespace {
	Namespace::Global
}

pub fn user_namespace(identity: &str) -> Result<Namespace> {
	if !is_valid_segment(identity) {
		return Err(Error::InvalidIdentity { identity: identity.to_string() });
	}

	Ok(Namespace::User(identity.to_string()))
}

pub fn notes_namespace(identity: &str) -> Result<Namespace> {
	if !is_valid_segment(identity) {
		return Err(Error::InvalidIdentity { identity: identity.to_string() });
	}

	Ok(Namespace::UserNotes(identity.to_string()))
}

pub fn domain_namespace(name: &str) -> Result<Namespace> {
	if !is_valid_segment(name) {
		return Err(Error::MalformedNamespace { raw: format!("{DOMAIN_PREFIX}{SEPARATOR}{name}") });
	}

	Ok(Namespace::Domain(name.to_string()))
}

pub fn parse(raw: &str) -> Result<Namespace> {
	let malformed = || Error::MalformedNamespace { raw: raw.to_string() };
	let mut parts = raw.split(SEPARATOR);
	let kind = parts.next().ok_or_else(malformed)?;
	let value = parts.next();
	let suffix = parts.next();

	if parts.next().is_some() {
		return Err(malformed());
	}

	let namespace = match (kind, value, suffix) {
		(GLOBAL, None, None) => Namespace::Global,
		(USER_PREFIX, Some(id), None) => Namespace::User(id.to_string()),
		(USER_PREFIX, Some(id), Some(NOTES_SUFFIX)) => Namespace::UserNotes(id.to_string()),
		(DOMAIN_PREFIX, Some(name), None) => Namespace::Domain(name.to_string()),
		_ => return Err(malformed()),
	};

	match namespace.value() {
		Some(value) if !is_valid_segment(value) => Err(malformed()),
		_ => Ok(namespace),
	}
}

/// Shared namespaces are open for reading; private ones belong to exactly one identity.
pub fn is_owned_by(namespace: &Namespace, identity: &str) -> bool {
	match namespace.owner() {
		Some(owner) => owner == identity,
		None => true,
	}
}

pub fn validate_access(namespace: &Namespace, identity: &str) -> bool {
	is_owned_by(namespace, identity)
}

/// Most specific first: the caller's private graph, then the shared graph.
pub fn fallback_chain(identity: Option<&str>) -> Result<Vec<Namespace>> {
	fallback_chain_with_domains(identity, &[])
}

/// Splices shared topic graphs between the private graph and the global graph.
pub fn fallback_chain_with_domains(
	identity: Option<&str>,
	domains: &[String],
) -> Result<Vec<Namespace>> {
	let mut chain = Vec::with_capacity(domains.len() + 2);

	if let Some(identity) = identity {
		chain.push(user_namespace(identity)?);
	}

	for name in domains {
		let namespace = domain_namespace(name)?;

		if !chain.contains(&namespace) {
			chain.push(namespace);
		}
	}

	chain.push(Namespace::Global);

	Ok(chain)
}

fn is_valid_segment(value: &str) -> bool {
	!value.is_empty() && !value.contains(SEPARATOR) && !value.chars().any(char::is_whitespace)
}
