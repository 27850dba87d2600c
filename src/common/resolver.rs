/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use std::{borrow::Cow, future::Future, pin::Pin, sync::Arc, time::Duration};

use trust_dns_resolver::{
    config::{ResolverConfig, ResolverOpts},
    error::{ResolveError, ResolveErrorKind},
    proto::op::ResponseCode,
    TokioAsyncResolver,
};

use crate::Error;

use super::parse::TxtRecordParser;

pub type TxtFuture<'x> = Pin<Box<dyn Future<Output = crate::Result<Vec<Vec<u8>>>> + Send + 'x>>;

/// Source of DNS TXT records. Each returned entry is one record with its character
/// strings already concatenated.
pub trait TxtLookup: Send + Sync {
    fn lookup_txt<'x>(&'x self, name: &'x str) -> TxtFuture<'x>;
}

#[derive(Clone)]
pub struct Resolver {
    lookup: Arc<dyn TxtLookup>,
}

impl Resolver {
    pub fn new_cloudflare_tls() -> Self {
        Self::with_config(ResolverConfig::cloudflare_tls(), ResolverOpts::default())
    }

    pub fn new_cloudflare() -> Self {
        Self::with_config(ResolverConfig::cloudflare(), ResolverOpts::default())
    }

    pub fn new_google() -> Self {
        Self::with_config(ResolverConfig::google(), ResolverOpts::default())
    }

    pub fn new_quad9() -> Self {
        Self::with_config(ResolverConfig::quad9(), ResolverOpts::default())
    }

    pub fn new_quad9_tls() -> Self {
        Self::with_config(ResolverConfig::quad9_tls(), ResolverOpts::default())
    }

    pub fn new_system_conf() -> Result<Self, ResolveError> {
        Ok(Self::from_lookup(TokioAsyncResolver::tokio_from_system_conf()?))
    }

    pub fn with_config(config: ResolverConfig, options: ResolverOpts) -> Self {
        Self::from_lookup(TokioAsyncResolver::tokio(config, options))
    }

    pub fn from_lookup(lookup: impl TxtLookup + 'static) -> Self {
        Resolver {
            lookup: Arc::new(lookup),
        }
    }

    /// Fetches the TXT records at `key` and returns the first one that parses as `T`.
    /// Every attempt is bounded by `timeout`; timeouts and transient failures are
    /// retried up to `retries` times, a missing record never is.
    pub async fn txt_lookup<'x, T: TxtRecordParser>(
        &self,
        key: impl IntoFqdn<'x>,
        timeout: Duration,
        retries: u32,
    ) -> crate::Result<T> {
        let key = key.into_fqdn();
        let mut attempt = 0;

        let records = loop {
            let result = match tokio::time::timeout(timeout, self.lookup.lookup_txt(key.as_ref()))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(Error::DnsTimeout),
            };

            match result {
                Ok(records) => break records,
                Err(err) if err.is_transient() && attempt < retries => {
                    attempt += 1;
                    tracing::debug!(
                        context = "dns",
                        name = key.as_ref(),
                        attempt,
                        reason = %err,
                        "Retrying TXT lookup"
                    );
                }
                Err(err) => {
                    tracing::debug!(
                        context = "dns",
                        name = key.as_ref(),
                        reason = %err,
                        "TXT lookup failed"
                    );
                    return Err(err);
                }
            }
        };

        if records.is_empty() {
            return Err(Error::DnsRecordNotFound(ResponseCode::NoError));
        }

        let mut result = Err(Error::InvalidRecordType);
        for record in &records {
            result = T::parse(record);
            if result.is_ok() {
                break;
            }
        }
        result
    }
}

impl TxtLookup for TokioAsyncResolver {
    fn lookup_txt<'x>(&'x self, name: &'x str) -> TxtFuture<'x> {
        Box::pin(async move {
            let lookup = self.txt_lookup(name).await?;
            Ok(lookup
                .iter()
                .filter_map(|txt| join_txt_data(txt.txt_data()))
                .collect())
        })
    }
}

/// Concatenates the character-strings of one TXT record (RFC 6376 §3.6.2.2).
pub(crate) fn join_txt_data(txt_data: &[Box<[u8]>]) -> Option<Vec<u8>> {
    match txt_data.len() {
        0 => None,
        1 => Some(txt_data[0].to_vec()),
        _ => {
            let mut entry = Vec::with_capacity(255 * txt_data.len());
            for data in txt_data.iter() {
                entry.extend_from_slice(data);
            }
            Some(entry)
        }
    }
}

impl From<ResolveError> for Error {
    fn from(err: ResolveError) -> Self {
        match err.kind() {
            ResolveErrorKind::NoRecordsFound { response_code, .. }
                if matches!(response_code, ResponseCode::NXDomain | ResponseCode::NoError) =>
            {
                Error::DnsRecordNotFound(*response_code)
            }
            ResolveErrorKind::NoRecordsFound { response_code, .. } => {
                Error::DnsError(response_code.to_string())
            }
            ResolveErrorKind::Timeout => Error::DnsTimeout,
            _ => Error::DnsError(err.to_string()),
        }
    }
}

pub trait IntoFqdn<'x> {
    fn into_fqdn(self) -> Cow<'x, str>;
}

impl<'x> IntoFqdn<'x> for String {
    fn into_fqdn(self) -> Cow<'x, str> {
        if self.ends_with('.') {
            self.to_lowercase().into()
        } else {
            format!("{}.", self.to_lowercase()).into()
        }
    }
}

impl<'x> IntoFqdn<'x> for &'x str {
    fn into_fqdn(self) -> Cow<'x, str> {
        if self.ends_with('.') {
            self.to_lowercase().into()
        } else {
            format!("{}.", self.to_lowercase()).into()
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use crate::Error;

    use super::{TxtFuture, TxtLookup};

    /// In-memory TXT source that counts the queries it receives.
    #[derive(Default)]
    pub struct MockLookup {
        records: HashMap<String, Vec<Vec<u8>>>,
        failures: HashMap<String, (Error, usize)>,
        delay: Option<Duration>,
        queries: AtomicUsize,
        failed: AtomicUsize,
    }

    impl MockLookup {
        pub fn new() -> Self {
            Self::default()
        }

        /// Loads `name record` lines as used by the test fixtures.
        pub fn with_records(mut self, records: &str) -> Self {
            for (name, value) in records.lines().filter_map(|r| r.split_once(' ')) {
                self = self.with_record(name, value);
            }
            self
        }

        pub fn with_record(mut self, name: &str, value: &str) -> Self {
            self.records
                .entry(format!("{}.", name.trim_end_matches('.').to_lowercase()))
                .or_default()
                .push(value.as_bytes().to_vec());
            self
        }

        /// Fails the first `times` queries for `name` with `error`.
        pub fn with_failure(mut self, name: &str, error: Error, times: usize) -> Self {
            self.failures.insert(
                format!("{}.", name.trim_end_matches('.').to_lowercase()),
                (error, times),
            );
            self
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn queries(&self) -> usize {
            self.queries.load(Ordering::SeqCst)
        }
    }

    impl TxtLookup for MockLookup {
        fn lookup_txt<'x>(&'x self, name: &'x str) -> TxtFuture<'x> {
            Box::pin(async move {
                self.queries.fetch_add(1, Ordering::SeqCst);
                if let Some(delay) = self.delay {
                    tokio::time::sleep(delay).await;
                }
                if let Some((error, times)) = self.failures.get(name) {
                    if self.failed.fetch_add(1, Ordering::SeqCst) < *times {
                        return Err(error.clone());
                    }
                }
                match self.records.get(name) {
                    Some(records) => Ok(records.clone()),
                    None => Err(Error::DnsRecordNotFound(
                        trust_dns_resolver::proto::op::ResponseCode::NXDomain,
                    )),
                }
            })
        }
    }

    impl TxtLookup for std::sync::Arc<MockLookup> {
        fn lookup_txt<'x>(&'x self, name: &'x str) -> TxtFuture<'x> {
            self.as_ref().lookup_txt(name)
        }
    }
}

#[cfg(test)]
mod test {
    use std::{sync::Arc, time::Duration};

    use trust_dns_resolver::proto::op::ResponseCode;

    use crate::{common::parse::TxtRecordParser, dkim::DomainKey, Error, Resolver};

    use super::{join_txt_data, mock::MockLookup};

    const KEY: &str = "v=DKIM1; k=ed25519; p=11qYAYKxCrfVS/7TyWQHOg7hcvPapiMlrwIaaPcHURo=";
    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn txt_lookup_first_valid_record() {
        let lookup = Arc::new(
            MockLookup::new()
                .with_record("sel._domainkey.example.com", "v=spf1 -all")
                .with_record("sel._domainkey.example.com", KEY),
        );
        let resolver = Resolver::from_lookup(lookup.clone());

        let key = resolver
            .txt_lookup::<DomainKey>("Sel._domainkey.Example.com", TIMEOUT, 1)
            .await
            .unwrap();
        assert!(!key.is_testing());
        assert_eq!(lookup.queries(), 1);

        assert_eq!(
            resolver
                .txt_lookup::<DomainKey>("other._domainkey.example.com.", TIMEOUT, 1)
                .await
                .map(|_| ()),
            Err(Error::DnsRecordNotFound(ResponseCode::NXDomain))
        );
        // NXDOMAIN is not retried.
        assert_eq!(lookup.queries(), 2);
    }

    #[tokio::test]
    async fn txt_lookup_retries_transient_errors() {
        let lookup = Arc::new(
            MockLookup::new()
                .with_record("sel._domainkey.example.com", KEY)
                .with_failure(
                    "sel._domainkey.example.com",
                    Error::DnsError("SERVFAIL".to_string()),
                    1,
                ),
        );
        let resolver = Resolver::from_lookup(lookup.clone());
        assert!(resolver
            .txt_lookup::<DomainKey>("sel._domainkey.example.com", TIMEOUT, 1)
            .await
            .is_ok());
        assert_eq!(lookup.queries(), 2);

        let lookup = Arc::new(MockLookup::new().with_record("sel._domainkey.example.com", KEY).with_failure(
            "sel._domainkey.example.com",
            Error::DnsError("SERVFAIL".to_string()),
            5,
        ));
        let resolver = Resolver::from_lookup(lookup.clone());
        assert_eq!(
            resolver
                .txt_lookup::<DomainKey>("sel._domainkey.example.com", TIMEOUT, 1)
                .await
                .map(|_| ()),
            Err(Error::DnsError("SERVFAIL".to_string()))
        );
        assert_eq!(lookup.queries(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn txt_lookup_timeout() {
        let lookup = Arc::new(
            MockLookup::new()
                .with_record("sel._domainkey.example.com", KEY)
                .with_delay(Duration::from_secs(60)),
        );
        let resolver = Resolver::from_lookup(lookup.clone());
        assert_eq!(
            resolver
                .txt_lookup::<DomainKey>("sel._domainkey.example.com", TIMEOUT, 1)
                .await
                .map(|_| ()),
            Err(Error::DnsTimeout)
        );
        assert_eq!(lookup.queries(), 2);
    }

    #[tokio::test]
    async fn txt_lookup_unparseable_records() {
        let resolver = Resolver::from_lookup(
            MockLookup::new().with_record("sel._domainkey.example.com", "v=DKIM1; k=rsa"),
        );
        assert_eq!(
            resolver
                .txt_lookup::<DomainKey>("sel._domainkey.example.com", TIMEOUT, 0)
                .await
                .map(|_| ()),
            Err(Error::InvalidRecordType)
        );
    }

    #[test]
    fn txt_join_segments() {
        for (segments, expected) in [
            (vec![], None),
            (vec![""], Some("")),
            (vec![KEY], Some(KEY)),
            (
                vec!["v=DKIM1; k=ed25519; ", "p=11qYAYKxCrfVS/7TyWQHOg7hcv", "PapiMlrwIaaPcHURo="],
                Some(KEY),
            ),
        ] {
            let txt_data = segments
                .iter()
                .map(|segment| segment.as_bytes().to_vec().into_boxed_slice())
                .collect::<Vec<_>>();
            assert_eq!(
                join_txt_data(&txt_data),
                expected.map(|record: &str| record.as_bytes().to_vec()),
                "{segments:?}"
            );
        }

        let record = join_txt_data(&[
            b"v=DKIM1; k=ed25519; p=11qYAYKxCrfVS/7TyW".to_vec().into_boxed_slice(),
            b"QHOg7hcvPapiMlrwIaaPcHURo=".to_vec().into_boxed_slice(),
        ])
        .unwrap();
        assert!(DomainKey::parse(&record).is_ok());
    }
}
