/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use subtle::ConstantTimeEq;

use crate::{
    common::crypto::{HashAlgorithm, HashOutput},
    Error, Result,
};

use super::Canonicalization;

/// Canonicalizes a message body and hashes the part covered by the signature.
#[derive(Debug, Clone, Copy)]
pub struct BodyHasher {
    canonicalization: Canonicalization,
    hash: HashAlgorithm,
    length: Option<u64>,
}

pub struct BodyHash {
    output: HashOutput,
    signed: u64,
    total: u64,
}

impl BodyHasher {
    pub fn new(canonicalization: Canonicalization, hash: HashAlgorithm) -> Self {
        BodyHasher {
            canonicalization,
            hash,
            length: None,
        }
    }

    /// Restricts hashing to the first `length` bytes of the canonical body (`l=`).
    pub fn with_length(mut self, length: Option<u64>) -> Self {
        self.length = length;
        self
    }

    pub fn hash_body(&self, body: &[u8]) -> Result<BodyHash> {
        let canonical = self.canonicalization.canonical_body(body);
        let total = canonical.len() as u64;
        let signed = match self.length {
            Some(length) if length > total => return Err(Error::BodyTooShort(length)),
            Some(length) => length,
            None => total,
        };

        Ok(BodyHash {
            output: self.hash.hash(&canonical[..signed as usize]),
            signed,
            total,
        })
    }
}

impl BodyHash {
    /// Compares against the declared `bh=` value in constant time.
    pub fn matches(&self, expected: &[u8]) -> bool {
        self.output.as_ref().ct_eq(expected).into()
    }

    pub fn signed_len(&self) -> u64 {
        self.signed
    }

    pub fn total_len(&self) -> u64 {
        self.total
    }

    pub fn is_partial(&self) -> bool {
        self.signed < self.total
    }
}

impl AsRef<[u8]> for BodyHash {
    fn as_ref(&self) -> &[u8] {
        self.output.as_ref()
    }
}
