//! Storage contract and built-in single-slot credential stores.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// crates.io
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
// self
use crate::{_prelude::*, auth::Credential};

/// Boxed future returned by [`CredentialStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Single-slot persistence contract for the active credential.
///
/// A store holds at most one credential. Implementations must make each operation atomic with
/// respect to the others; the refresh coordinator serializes writes so stores do not need
/// compare-and-swap semantics.
pub trait CredentialStore
where
	Self: Send + Sync,
{
	/// Returns the stored credential, if any.
	fn load(&self) -> StoreFuture<'_, Option<Credential>>;

	/// Replaces the stored credential.
	fn save(&self, credential: Credential) -> StoreFuture<'_, ()>;

	/// Removes the stored credential. Clearing an empty store succeeds.
	fn clear(&self) -> StoreFuture<'_, ()>;
}

/// Error type produced by [`CredentialStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

/// Derives the storage alias for credentials issued against `base_url`.
///
/// Trailing slashes are ignored so `https://api.example.com` and `https://api.example.com/`
/// share one slot.
pub fn slot_alias(base_url: &Url) -> String {
	let normalized = base_url.as_str().trim_end_matches('/');
	let digest = Sha256::digest(normalized.as_bytes());

	format!("{}-TOKEN", URL_SAFE_NO_PAD.encode(digest))
}
