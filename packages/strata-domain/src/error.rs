pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
	#[error("Invalid identity: {identity:?}.")]
	InvalidIdentity { identity: String },
	#[error("Malformed namespace: {raw:?}.")]
	MalformedNamespace { raw: String },
}
