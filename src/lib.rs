/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

//! # dkim-verify
//!
//! _dkim-verify_ verifies DomainKeys Identified Mail (DKIM) signatures as described in
//! [RFC 6376](https://datatracker.ietf.org/doc/html/rfc6376). Given a raw RFC 5322 message it
//! parses every `DKIM-Signature` header, canonicalizes the signed headers and body, fetches
//! the signer's public key from DNS and checks the signature, returning one typed result per
//! signature plus an overall verdict.
//!
//! Supported algorithms are `rsa-sha256`, `ed25519-sha256` ([RFC 8463](https://datatracker.ietf.org/doc/html/rfc8463))
//! and, when explicitly enabled, the historic `rsa-sha1`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dkim_verify::{verifier::{Config, Verifier}, Outcome, Resolver};
//!
//! let verifier = Verifier::new(Resolver::new_system_conf().unwrap(), Config::default());
//! let verdict = verifier.verify(raw_message).await?;
//!
//! for result in verdict.results() {
//!     println!("{} {} {:?} {}", result.domain(), result.selector(), result.outcome(), result.detail());
//! }
//! assert!(verdict.is_pass());
//! ```

use std::fmt::{self, Display};

use serde::Serialize;
use trust_dns_resolver::proto::op::ResponseCode;

pub mod common;
pub mod dkim;
pub mod verifier;

pub use common::message::{HeaderField, ParsedMessage};
pub use common::resolver::{Resolver, TxtLookup};

/// Terminal outcome of the verification pipeline for one signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Verified,
    BodyMismatch,
    KeyNotFound,
    KeyInvalid,
    SignatureInvalid,
    Malformed,
    UnsupportedAlgorithm,
    Expired,
}

/// Facts about a signature the caller may want to apply policy on, independent of
/// whether it verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "type")]
pub enum Annotation {
    /// The key record carries the `t=y` flag.
    Testing,
    /// The `h=` list does not include `From`.
    FromNotSigned,
    /// An `l=` tag limits the signature to the first `signed` bytes of a `total`-byte
    /// canonical body.
    PartialBody { signed: u64, total: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    index: usize,
    domain: String,
    selector: String,
    outcome: Outcome,
    detail: String,
    annotations: Vec<Annotation>,
    #[serde(skip)]
    error: Option<Error>,
    #[serde(skip)]
    signature_prefix: Vec<u8>,
}

/// Overall summary of a message's signatures after the pass policy was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    Pass,
    Fail,
    NoSignature,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageVerdict {
    results: Vec<VerificationResult>,
    verdict: Verdict,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Message has no header/body separator.")]
    MalformedMessage,
    #[error("Parse error")]
    ParseError,
    #[error("Missing mandatory tag '{0}='.")]
    MissingParameters(&'static str),
    #[error("Base64 encode or decode error.")]
    Base64,
    #[error("Unsupported version in DKIM Signature.")]
    UnsupportedVersion,
    #[error("Unsupported algorithm in DKIM Signature.")]
    UnsupportedAlgorithm,
    #[error("Algorithm {0} is disabled by configuration.")]
    DisabledAlgorithm(&'static str),
    #[error("Unsupported canonicalization method in DKIM Signature.")]
    UnsupportedCanonicalization,
    #[error("Identity (i=) is not within the signing domain.")]
    InvalidIdentity,
    #[error("Signature expiration (x=) precedes its timestamp (t=).")]
    InvalidExpiration,
    #[error("Signature timestamp (t=) is in the future.")]
    FutureTimestamp,
    #[error("Signature expired.")]
    SignatureExpired,
    #[error("Invalid record.")]
    InvalidRecordType,
    #[error("Unsupported key type in DKIM DNS record.")]
    UnsupportedKeyType,
    #[error("Public key for this signature has been revoked.")]
    RevokedPublicKey,
    #[error("Incompatible algorithms used in signature and DKIM DNS record.")]
    IncompatibleAlgorithms,
    #[error("Key record does not permit the signature's hash algorithm.")]
    HashNotPermitted,
    #[error("Key record is not valid for the email service.")]
    ServiceNotPermitted,
    #[error("Public key is {0} bits, below the accepted minimum.")]
    KeyTooSmall(usize),
    #[error("Cryptography layer error: {0}")]
    CryptoError(String),
    #[error("AUID does not match domain name.")]
    FailedAuidMatch,
    #[error("DNS record not found: {0}.")]
    DnsRecordNotFound(ResponseCode),
    #[error("DNS lookup timed out.")]
    DnsTimeout,
    #[error("DNS resolution error: {0}")]
    DnsError(String),
    #[error("Verification deadline exceeded.")]
    DeadlineExceeded,
    #[error("Calculated body hash does not match signature hash.")]
    FailedBodyHashMatch,
    #[error("Body is shorter than the signed length (l={0}).")]
    BodyTooShort(u64),
    #[error("Signature covers only part of the body.")]
    PartialBodyRejected,
    #[error("Signature verification failed.")]
    FailedVerification,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Maps an error raised anywhere in the per-signature pipeline to the outcome
    /// reported for that signature.
    pub fn outcome(&self) -> Outcome {
        match self {
            Error::MalformedMessage
            | Error::ParseError
            | Error::MissingParameters(_)
            | Error::Base64
            | Error::UnsupportedVersion
            | Error::UnsupportedCanonicalization
            | Error::InvalidIdentity
            | Error::InvalidExpiration
            | Error::FutureTimestamp => Outcome::Malformed,
            Error::UnsupportedAlgorithm | Error::DisabledAlgorithm(_) => {
                Outcome::UnsupportedAlgorithm
            }
            Error::SignatureExpired => Outcome::Expired,
            Error::InvalidRecordType
            | Error::UnsupportedKeyType
            | Error::RevokedPublicKey
            | Error::IncompatibleAlgorithms
            | Error::HashNotPermitted
            | Error::ServiceNotPermitted
            | Error::KeyTooSmall(_)
            | Error::CryptoError(_)
            | Error::FailedAuidMatch => Outcome::KeyInvalid,
            Error::DnsRecordNotFound(_)
            | Error::DnsTimeout
            | Error::DnsError(_)
            | Error::DeadlineExceeded => Outcome::KeyNotFound,
            Error::FailedBodyHashMatch | Error::BodyTooShort(_) | Error::PartialBodyRejected => {
                Outcome::BodyMismatch
            }
            Error::FailedVerification => Outcome::SignatureInvalid,
        }
    }

    /// Transient failures that may succeed when the lookup is repeated.
    pub(crate) fn is_transient(&self) -> bool {
        matches!(self, Error::DnsTimeout | Error::DnsError(_))
    }
}

impl Outcome {
    pub fn is_verified(&self) -> bool {
        matches!(self, Outcome::Verified)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Verified => "verified",
            Outcome::BodyMismatch => "body-mismatch",
            Outcome::KeyNotFound => "key-not-found",
            Outcome::KeyInvalid => "key-invalid",
            Outcome::SignatureInvalid => "signature-invalid",
            Outcome::Malformed => "malformed",
            Outcome::UnsupportedAlgorithm => "unsupported-algorithm",
            Outcome::Expired => "expired",
        }
    }
}

impl Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Annotation::Testing => f.write_str("key is in testing mode (t=y)"),
            Annotation::FromNotSigned => {
                f.write_str("From header is not signed, signature is high-risk")
            }
            Annotation::PartialBody { signed, total } => write!(
                f,
                "only {signed} of {total} canonical body bytes are signed (l=)"
            ),
        }
    }
}

impl VerificationResult {
    pub(crate) fn new(
        index: usize,
        domain: impl Into<String>,
        selector: impl Into<String>,
    ) -> Self {
        VerificationResult {
            index,
            domain: domain.into(),
            selector: selector.into(),
            outcome: Outcome::Verified,
            detail: String::new(),
            annotations: Vec::new(),
            error: None,
            signature_prefix: Vec::new(),
        }
    }

    pub(crate) fn with_outcome(mut self, result: crate::Result<()>) -> Self {
        let mut detail = match result {
            Ok(()) => {
                self.outcome = Outcome::Verified;
                self.error = None;
                String::new()
            }
            Err(err) => {
                self.outcome = err.outcome();
                let detail = err.to_string();
                self.error = Some(err);
                detail
            }
        };
        for annotation in &self.annotations {
            if !detail.is_empty() {
                detail.push_str("; ");
            }
            detail.push_str(&annotation.to_string());
        }
        self.detail = detail;
        self
    }

    pub(crate) fn with_annotations(mut self, annotations: Vec<Annotation>) -> Self {
        self.annotations = annotations;
        self
    }

    pub(crate) fn with_signature_prefix(mut self, b: &[u8]) -> Self {
        self.signature_prefix = b.iter().take(6).copied().collect();
        self
    }

    /// Position of the `DKIM-Signature` header among all the message's headers.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }

    /// The error behind a failed outcome.
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn has_annotation(&self, annotation: &Annotation) -> bool {
        self.annotations.contains(annotation)
    }

    pub(crate) fn signature_prefix(&self) -> &[u8] {
        &self.signature_prefix
    }
}

impl MessageVerdict {
    pub(crate) fn new(results: Vec<VerificationResult>, verdict: Verdict) -> Self {
        MessageVerdict { results, verdict }
    }

    /// Per-signature results, in the order the signatures appear in the message.
    pub fn results(&self) -> &[VerificationResult] {
        &self.results
    }

    pub fn verdict(&self) -> Verdict {
        self.verdict
    }

    pub fn is_pass(&self) -> bool {
        self.verdict == Verdict::Pass
    }

    pub fn has_signatures(&self) -> bool {
        !self.results.is_empty()
    }
}

impl Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verdict::Pass => "pass",
            Verdict::Fail => "fail",
            Verdict::NoSignature => "none",
        })
    }
}
