/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use std::{sync::Arc, time::Duration};

use serde::Deserialize;

use crate::{dkim::DomainKey, Error, Resolver};

pub mod config;
pub mod engine;

/// Verifies every `DKIM-Signature` of a message and applies the pass policy.
#[derive(Clone)]
pub struct Verifier {
    resolver: Resolver,
    config: Arc<Config>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(deserialize_with = "config::deserialize_secs")]
    pub lookup_timeout: Duration,
    pub lookup_retries: u32,
    #[serde(deserialize_with = "config::deserialize_secs")]
    pub deadline: Duration,
    pub max_concurrency: usize,
    pub pass_policy: PassPolicy,
    pub allow_sha1: bool,
    pub min_rsa_bits: usize,
    #[serde(deserialize_with = "config::deserialize_secs")]
    pub clock_skew: Duration,
    pub reject_partial_body: bool,
}

/// How per-signature outcomes combine into the message verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PassPolicy {
    /// At least one signature verified.
    #[default]
    Any,
    /// Every signature verified.
    All,
}

/// Position of one signature in the verification pipeline. Each transition either
/// advances to the next stage or ends in `Rejected`; no stage is ever revisited.
#[derive(Debug)]
pub enum Stage {
    Parsed,
    BodyChecked,
    KeyResolved(Arc<DomainKey>),
    Verified,
    Rejected(Error),
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Verified | Stage::Rejected(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Parsed => "parsed",
            Stage::BodyChecked => "body-checked",
            Stage::KeyResolved(_) => "key-resolved",
            Stage::Verified => "verified",
            Stage::Rejected(_) => "rejected",
        }
    }
}

#[cfg(test)]
mod test {
    use super::Stage;
    use crate::Error;

    #[test]
    fn stage_terminal() {
        for (stage, is_terminal, name) in [
            (Stage::Parsed, false, "parsed"),
            (Stage::BodyChecked, false, "body-checked"),
            (Stage::Verified, true, "verified"),
            (Stage::Rejected(Error::FailedVerification), true, "rejected"),
        ] {
            assert_eq!(stage.is_terminal(), is_terminal, "{stage:?}");
            assert_eq!(stage.name(), name);
        }
    }
}
