//! The Lockout set (§3.1, §3.3): (resource, class) pairs for which access has
//! been denied; persisted as a flat set at `cache/rets_lockout.json` and
//! mutated under a single-writer invariant (§5: "only C5 mutates").

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct LockoutKey {
	pub resource_id: String,
	pub class_name: Option<String>,
}

impl LockoutKey {
	pub fn new(resource_id: impl Into<String>, class_name: Option<String>) -> Self {
		Self {
			resource_id: resource_id.into(),
			class_name,
		}
	}

	fn as_token(&self) -> String {
		match &self.class_name {
			Some(class) => format!("{}::{}", self.resource_id, class),
			None => format!("{}::", self.resource_id),
		}
	}

	fn from_token(token: &str) -> Option<Self> {
		let (resource_id, class) = token.split_once("::")?;
		Some(Self {
			resource_id: resource_id.to_string(),
			class_name: if class.is_empty() { None } else { Some(class.to_string()) },
		})
	}
}

pub struct LockoutSet {
	path: PathBuf,
	entries: RwLock<HashSet<LockoutKey>>,
}

impl LockoutSet {
	pub async fn load(path: impl AsRef<Path>) -> Self {
		let path = path.as_ref().to_path_buf();
		let entries = match tokio::fs::read_to_string(&path).await {
			Ok(raw) => serde_json::from_str::<Vec<String>>(&raw)
				.unwrap_or_default()
				.iter()
				.filter_map(|t| LockoutKey::from_token(t))
				.collect(),
			Err(_) => HashSet::new(),
		};

		if !entries.is_empty() {
			info!(count = entries.len(), "loaded lockout set from disk");
		}

		Self {
			path,
			entries: RwLock::new(entries),
		}
	}

	pub async fn contains(&self, key: &LockoutKey) -> bool {
		self.entries.read().await.contains(key)
	}

	pub async fn add(&self, key: LockoutKey) {
		{
			let mut entries = self.entries.write().await;
			if !entries.insert(key.clone()) {
				return;
			}
		}
		warn!(resource_id = %key.resource_id, class_name = ?key.class_name, "adding (resource, class) to lockout set");
		if let Err(e) = self.persist().await {
			warn!(error = %e, "failed to persist lockout set");
		}
	}

	async fn persist(&self) -> std::io::Result<()> {
		let tokens: Vec<String> = self.entries.read().await.iter().map(LockoutKey::as_token).collect();
		if let Some(parent) = self.path.parent() {
			tokio::fs::create_dir_all(parent).await?;
		}
		let bytes = serde_json::to_vec_pretty(&tokens)
			.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
		tokio::fs::write(&self.path, bytes).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn token_round_trips() {
		let key = LockoutKey::new("Property", Some("CI_3".to_string()));
		assert_eq!(key.as_token(), "Property::CI_3");
		assert_eq!(LockoutKey::from_token("Property::CI_3"), Some(key));
	}

	#[test]
	fn token_round_trips_without_class() {
		let key = LockoutKey::new("Office", None);
		assert_eq!(key.as_token(), "Office::");
		assert_eq!(LockoutKey::from_token("Office::"), Some(key));
	}

	#[tokio::test]
	async fn add_and_contains() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("rets_lockout.json");
		let set = LockoutSet::load(&path).await;
		let key = LockoutKey::new("Property", Some("CI_3".to_string()));
		assert!(!set.contains(&key).await);
		set.add(key.clone()).await;
		assert!(set.contains(&key).await);

		// reload from disk to confirm persistence
		let reloaded = LockoutSet::load(&path).await;
		assert!(reloaded.contains(&key).await);
	}
}
