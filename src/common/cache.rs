/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use std::{collections::HashMap, future::Future, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::{dkim::DomainKey, Result};

type KeySlot = Arc<OnceCell<Result<Arc<DomainKey>>>>;

/// Key records fetched during a single verification run, keyed by the
/// `<selector>._domainkey.<domain>` name. Concurrent requests for the same name share
/// one lookup; the map lock is only held while the slot is being located.
#[derive(Default)]
pub struct KeyCache {
    entries: Mutex<HashMap<String, KeySlot, ahash::RandomState>>,
}

impl KeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached outcome for `name`, running `lookup` only if no other task
    /// has already done so. Failures are cached too, so a missing key is reported
    /// identically for every signature that references it.
    pub async fn get_or_lookup<F, Fut>(&self, name: &str, lookup: F) -> Result<Arc<DomainKey>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<DomainKey>>,
    {
        let slot = self.slot(name);
        let result = slot
            .get_or_init(|| async move { lookup().await.map(Arc::new) })
            .await;
        result.clone()
    }

    fn slot(&self, name: &str) -> KeySlot {
        self.entries
            .lock()
            .entry(name.to_lowercase())
            .or_default()
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use crate::{common::parse::TxtRecordParser, dkim::DomainKey, Error};

    use super::KeyCache;

    const KEY: &str = "v=DKIM1; k=ed25519; p=11qYAYKxCrfVS/7TyWQHOg7hcvPapiMlrwIaaPcHURo=";

    #[tokio::test(start_paused = true)]
    async fn concurrent_lookups_are_deduplicated() {
        let cache = Arc::new(KeyCache::new());
        let lookups = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let cache = cache.clone();
            let lookups = lookups.clone();
            tasks.push(tokio::spawn(async move {
                cache
                    .get_or_lookup("sel._domainkey.example.com.", || async move {
                        lookups.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        DomainKey::parse(KEY.as_bytes())
                    })
                    .await
                    .map(|key| key.is_testing())
            }));
        }

        for task in tasks {
            assert_eq!(task.await.unwrap(), Ok(false));
        }
        assert_eq!(lookups.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn failures_are_cached() {
        let cache = KeyCache::new();
        assert!(cache.is_empty());

        for _ in 0..2 {
            assert_eq!(
                cache
                    .get_or_lookup("other._domainkey.example.com.", || async {
                        Err::<DomainKey, _>(Error::DnsTimeout)
                    })
                    .await
                    .map(|_| ()),
                Err(Error::DnsTimeout)
            );
        }

        // The second closure is never run, so its key is not observed.
        assert_eq!(
            cache
                .get_or_lookup("other._domainkey.example.com.", || async {
                    DomainKey::parse(KEY.as_bytes())
                })
                .await
                .map(|_| ()),
            Err(Error::DnsTimeout)
        );
        assert_eq!(cache.len(), 1);
    }
}
