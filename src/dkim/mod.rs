/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use crate::common::crypto::{KeyType, VerifyingKey};

pub use crate::common::crypto::{Algorithm, HashAlgorithm};

pub mod body;
pub mod canonicalize;
pub mod parse;
pub mod verify;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Canonicalization {
    Relaxed,
    #[default]
    Simple,
}

/// One decoded `DKIM-Signature` header.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Signature {
    pub(crate) v: u32,
    pub(crate) a: Algorithm,
    pub(crate) d: String,
    pub(crate) s: String,
    pub(crate) b: Vec<u8>,
    pub(crate) bh: Vec<u8>,
    pub(crate) h: Vec<String>,
    pub(crate) i: String,
    pub(crate) l: Option<u64>,
    pub(crate) x: Option<u64>,
    pub(crate) t: Option<u64>,
    pub(crate) ch: Canonicalization,
    pub(crate) cb: Canonicalization,
}

/// Public key published at `<selector>._domainkey.<domain>`.
pub struct DomainKey {
    pub(crate) p: Box<dyn VerifyingKey + Send + Sync>,
    pub(crate) k: KeyType,
    pub(crate) f: u64,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u64)]
pub(crate) enum Service {
    All = R_SVC_ALL,
    Email = R_SVC_EMAIL,
    Other = R_SVC_OTHER,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u64)]
pub(crate) enum Flag {
    Testing = R_FLAG_TESTING,
    MatchDomain = R_FLAG_MATCH_DOMAIN,
}

pub(crate) const R_HASH_RESTRICTED: u64 = 0x04;
pub(crate) const R_SVC_ALL: u64 = 0x08;
pub(crate) const R_SVC_EMAIL: u64 = 0x10;
pub(crate) const R_SVC_OTHER: u64 = 0x20;
pub(crate) const R_FLAG_TESTING: u64 = 0x40;
pub(crate) const R_FLAG_MATCH_DOMAIN: u64 = 0x80;

impl From<Service> for u64 {
    fn from(v: Service) -> Self {
        v as u64
    }
}

impl From<Flag> for u64 {
    fn from(v: Flag) -> Self {
        v as u64
    }
}

impl Signature {
    pub fn algorithm(&self) -> Algorithm {
        self.a
    }

    pub fn domain(&self) -> &str {
        &self.d
    }

    pub fn selector(&self) -> &str {
        &self.s
    }

    /// Agent or User Identifier (`i=`), defaulting to `@<domain>`.
    pub fn identity(&self) -> std::borrow::Cow<'_, str> {
        if !self.i.is_empty() {
            self.i.as_str().into()
        } else {
            format!("@{}", self.d).into()
        }
    }

    pub fn signed_headers(&self) -> &[String] {
        &self.h
    }

    pub fn body_length(&self) -> Option<u64> {
        self.l
    }

    pub fn timestamp(&self) -> Option<u64> {
        self.t
    }

    pub fn expiration(&self) -> Option<u64> {
        self.x
    }

    pub fn header_canonicalization(&self) -> Canonicalization {
        self.ch
    }

    pub fn body_canonicalization(&self) -> Canonicalization {
        self.cb
    }

    pub fn signs_header(&self, name: &str) -> bool {
        self.h.iter().any(|h| h.eq_ignore_ascii_case(name))
    }

    /// DNS name holding the signer's key record.
    pub fn domain_key(&self) -> String {
        format!(
            "{}._domainkey.{}.",
            self.s,
            self.d.strip_suffix('.').unwrap_or(self.d.as_str())
        )
    }
}

impl DomainKey {
    pub fn has_flag(&self, flag: impl Into<u64>) -> bool {
        (self.f & flag.into()) != 0
    }

    pub fn key_type(&self) -> KeyType {
        self.k
    }

    pub fn is_testing(&self) -> bool {
        self.has_flag(Flag::Testing)
    }

    /// Whether the record's `h=` tag, if any, lists the given hash algorithm.
    pub fn permits_hash(&self, hash: HashAlgorithm) -> bool {
        !self.has_flag(R_HASH_RESTRICTED) || self.has_flag(hash)
    }

    /// Whether the record's `s=` tag, if any, covers email.
    pub fn permits_email(&self) -> bool {
        const RESTRICTED: u64 = R_SVC_ALL | R_SVC_EMAIL | R_SVC_OTHER;
        (self.f & RESTRICTED) == 0 || self.has_flag(R_SVC_ALL | R_SVC_EMAIL)
    }
}

impl std::fmt::Debug for DomainKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainKey")
            .field("k", &self.k)
            .field("f", &self.f)
            .finish()
    }
}

impl std::fmt::Display for Canonicalization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Canonicalization::Relaxed => "relaxed",
            Canonicalization::Simple => "simple",
        })
    }
}
