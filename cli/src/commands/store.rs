use serde_json::json;
use tollgate_core::api::{CliError, GovernorError, QuotaKeyedStore};

use super::cli::{StoreArgs, StoreCommand};
use super::emit;

/// Handle store command dispatcher. Returns the process exit code.
pub async fn handle_store(args: StoreArgs, store: &QuotaKeyedStore, json: bool) -> Result<i32, CliError> {
    match args.command {
        StoreCommand::Get { key } => {
            let value = store.get(&key).await.map_err(GovernorError::from)?;
            let found = value.is_some();
            emit(json, &json!({ "key": key, "value": value }), || {
                value.clone().unwrap_or_else(|| format!("(no value for '{key}')"))
            })?;
            Ok(if found { 0 } else { 1 })
        }
        StoreCommand::Set { key, value, strict } => {
            let stored = if strict {
                store.try_set(&key, &value).await.map_err(GovernorError::from)?;
                true
            } else {
                store.set(&key, &value).await.map_err(GovernorError::from)?
            };
            emit(json, &json!({ "key": key, "stored": stored }), || {
                if stored {
                    format!("stored '{key}'")
                } else {
                    format!("refused '{key}': storage quota exceeded")
                }
            })?;
            Ok(if stored { 0 } else { 1 })
        }
        StoreCommand::Remove { key } => {
            store.remove(&key).await.map_err(GovernorError::from)?;
            emit(json, &json!({ "key": key, "removed": true }), || format!("removed '{key}'"))?;
            Ok(0)
        }
        StoreCommand::Usage => {
            let usage = store.usage().map_err(GovernorError::from)?;
            emit(json, &usage, || format!("{} ({} backend)", usage, store.backend_name()))?;
            Ok(0)
        }
        StoreCommand::Cleanup => {
            let report = store.cleanup().await.map_err(GovernorError::from)?;
            emit(json, &report, || report.to_string())?;
            Ok(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tollgate_core::api::{CleanupPolicy, KeyLocks, MemoryBackend};

    fn store(max: u64) -> QuotaKeyedStore {
        QuotaKeyedStore::new(
            Arc::new(MemoryBackend::new()),
            max,
            KeyLocks::new(None, None),
            CleanupPolicy::default(),
        )
    }

    fn set(key: &str, value: &str, strict: bool) -> StoreArgs {
        StoreArgs {
            command: StoreCommand::Set {
                key: key.into(),
                value: value.into(),
                strict,
            },
        }
    }

    #[tokio::test]
    async fn refused_write_exits_non_zero() {
        let store = store(16);
        assert_eq!(handle_store(set("k", "small", false), &store, true).await.unwrap(), 0);
        assert_eq!(
            handle_store(set("other", &"x".repeat(40), false), &store, true).await.unwrap(),
            1
        );

        let err = handle_store(set("other", &"x".repeat(40), true), &store, true)
            .await
            .unwrap_err();
        assert!(matches!(err, CliError::Governor(GovernorError::Store(_))));
    }

    #[tokio::test]
    async fn missing_key_exits_one() {
        let store = store(64);
        let get = StoreArgs {
            command: StoreCommand::Get { key: "nope".into() },
        };
        assert_eq!(handle_store(get, &store, false).await.unwrap(), 1);
    }
}
