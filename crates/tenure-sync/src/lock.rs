//! Per-key async mutual exclusion.

use std::{collections::HashMap, hash::Hash, sync::Arc};

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Hands out one async mutex per key. Holders of different keys never block
/// each other.
#[derive(Debug)]
pub struct KeyedLock<K> {
  slots: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for KeyedLock<K> {
  fn default() -> Self { Self { slots: Mutex::new(HashMap::new()) } }
}

impl<K: Eq + Hash + Clone> KeyedLock<K> {
  pub fn new() -> Self { Self::default() }

  /// Wait for exclusive access to `key`. Released when the guard drops.
  pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
    let slot = {
      let mut slots = self.slots.lock().await;
      // Forget slots nobody holds or waits on.
      slots.retain(|_, slot| Arc::strong_count(slot) > 1);
      slots.entry(key.clone()).or_default().clone()
    };
    slot.lock_owned().await
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use super::*;

  #[tokio::test]
  async fn same_key_is_exclusive() {
    let locks = Arc::new(KeyedLock::new());
    let guard = locks.lock(&1).await;

    let waiter = {
      let locks = locks.clone();
      tokio::spawn(async move {
        let _guard = locks.lock(&1).await;
      })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    drop(guard);
    tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
  }

  #[tokio::test]
  async fn different_keys_do_not_block() {
    let locks = KeyedLock::new();
    let _a = locks.lock(&"a").await;
    tokio::time::timeout(Duration::from_secs(1), locks.lock(&"b")).await.unwrap();
  }
}
