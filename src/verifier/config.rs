/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use std::time::Duration;

use serde::{Deserialize, Deserializer};

use super::{Config, PassPolicy};

impl Default for Config {
    fn default() -> Self {
        Config {
            lookup_timeout: Duration::from_secs(5),
            lookup_retries: 1,
            deadline: Duration::from_secs(30),
            max_concurrency: 8,
            pass_policy: PassPolicy::Any,
            allow_sha1: false,
            min_rsa_bits: 1024,
            clock_skew: Duration::from_secs(300),
            reject_partial_body: false,
        }
    }
}

impl Config {
    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    pub fn with_lookup_retries(mut self, retries: u32) -> Self {
        self.lookup_retries = retries;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_pass_policy(mut self, pass_policy: PassPolicy) -> Self {
        self.pass_policy = pass_policy;
        self
    }

    pub fn with_allow_sha1(mut self, allow_sha1: bool) -> Self {
        self.allow_sha1 = allow_sha1;
        self
    }

    pub fn with_min_rsa_bits(mut self, min_rsa_bits: usize) -> Self {
        self.min_rsa_bits = min_rsa_bits;
        self
    }

    pub fn with_clock_skew(mut self, clock_skew: Duration) -> Self {
        self.clock_skew = clock_skew;
        self
    }

    pub fn with_reject_partial_body(mut self, reject_partial_body: bool) -> Self {
        self.reject_partial_body = reject_partial_body;
        self
    }
}

/// Durations are configured as whole seconds.
pub(crate) fn deserialize_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_secs)
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use crate::verifier::{Config, PassPolicy};

    #[test]
    fn config_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.lookup_timeout, Duration::from_secs(5));
        assert_eq!(config.lookup_retries, 1);
        assert_eq!(config.max_concurrency, 8);
        assert_eq!(config.pass_policy, PassPolicy::Any);
        assert!(!config.allow_sha1);
    }

    #[test]
    fn config_parse() {
        let config: Config = serde_json::from_str(
            r#"{
                "lookup_timeout": 2,
                "deadline": 10,
                "pass_policy": "all",
                "allow_sha1": true,
                "min_rsa_bits": 2048,
                "clock_skew": 0,
                "reject_partial_body": true
            }"#,
        )
        .unwrap();

        assert_eq!(
            config,
            Config::default()
                .with_lookup_timeout(Duration::from_secs(2))
                .with_deadline(Duration::from_secs(10))
                .with_pass_policy(PassPolicy::All)
                .with_allow_sha1(true)
                .with_min_rsa_bits(2048)
                .with_clock_skew(Duration::ZERO)
                .with_reject_partial_body(true)
        );

        assert!(serde_json::from_str::<Config>(r#"{"pass_policy": "some"}"#).is_err());
        assert!(serde_json::from_str::<Config>(r#"{"deadline": "5s"}"#).is_err());
    }
}
