/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use std::fmt::Write;

use mail_builder::encoders::base64::base64_encode;

use crate::{Error, MessageVerdict, Outcome, VerificationResult};

impl MessageVerdict {
    /// Renders the `dkim=` clauses of an `Authentication-Results` header value
    /// (RFC 8601) produced by `hostname`.
    pub fn auth_results(&self, hostname: &str) -> String {
        let mut auth_results = String::with_capacity(64);
        auth_results.push_str(hostname);

        if self.results.is_empty() {
            auth_results.push_str("; dkim=none");
            return auth_results;
        }

        for result in &self.results {
            auth_results.push_str(";\r\n\tdkim=");
            result.as_auth_result(&mut auth_results);
            if !result.domain.is_empty() {
                auth_results.push_str(" header.d=");
                auth_results.push_str(&result.domain);
            }
            if !result.selector.is_empty() {
                auth_results.push_str(" header.s=");
                auth_results.push_str(&result.selector);
            }
            if result.signature_prefix().len() >= 6 {
                auth_results.push_str(" header.b=");
                auth_results.push_str(
                    &String::from_utf8(
                        base64_encode(&result.signature_prefix()[..6]).unwrap_or_default(),
                    )
                    .unwrap_or_default(),
                );
            }
        }

        auth_results
    }
}

pub trait AsAuthResult {
    fn as_auth_result(&self, header: &mut String);
}

impl AsAuthResult for VerificationResult {
    fn as_auth_result(&self, header: &mut String) {
        let error = match (&self.outcome, &self.error) {
            (Outcome::Verified, _) => {
                header.push_str("pass");
                return;
            }
            (_, Some(error)) => error,
            (outcome, None) => {
                write!(header, "permerror ({outcome})").ok();
                return;
            }
        };

        header.push_str(match error {
            Error::DnsTimeout | Error::DnsError(_) | Error::DeadlineExceeded => "temperror",
            Error::SignatureExpired => "neutral",
            Error::DisabledAlgorithm(_) | Error::PartialBodyRejected | Error::KeyTooSmall(_) => {
                "policy"
            }
            Error::FailedBodyHashMatch
            | Error::BodyTooShort(_)
            | Error::FailedVerification
            | Error::FailedAuidMatch => "fail",
            _ => "permerror",
        });
        error.as_auth_result(header);
    }
}

impl AsAuthResult for Error {
    fn as_auth_result(&self, header: &mut String) {
        header.push_str(" (");
        header.push_str(match self {
            Error::MalformedMessage => "malformed message",
            Error::ParseError => "signature parse error",
            Error::MissingParameters(_) => "missing parameters",
            Error::Base64 => "base64 error",
            Error::UnsupportedVersion => "unsupported version",
            Error::UnsupportedAlgorithm => "unsupported algorithm",
            Error::DisabledAlgorithm(_) => "algorithm not accepted",
            Error::UnsupportedCanonicalization => "unsupported canonicalization",
            Error::InvalidIdentity => "invalid identity",
            Error::InvalidExpiration | Error::FutureTimestamp => "invalid timestamp",
            Error::SignatureExpired => "signature expired",
            Error::InvalidRecordType => "invalid dns record type",
            Error::UnsupportedKeyType => "unsupported key type",
            Error::RevokedPublicKey => "revoked public key",
            Error::IncompatibleAlgorithms => "incompatible record/signature algorithms",
            Error::HashNotPermitted => "hash algorithm not permitted by key",
            Error::ServiceNotPermitted => "key not valid for email",
            Error::KeyTooSmall(_) => "key too small",
            Error::CryptoError(_) => "invalid public key",
            Error::FailedAuidMatch => "auid does not match",
            Error::DnsRecordNotFound(_) => "dns record not found",
            Error::DnsTimeout => "dns timeout",
            Error::DnsError(_) => "dns error",
            Error::DeadlineExceeded => "deadline exceeded",
            Error::FailedBodyHashMatch | Error::BodyTooShort(_) => "body hash did not verify",
            Error::PartialBodyRejected => "signature length ignored due to security risk",
            Error::FailedVerification => "verification failed",
        });
        header.push(')');
    }
}

#[cfg(test)]
mod test {
    use trust_dns_resolver::proto::op::ResponseCode;

    use crate::{Error, MessageVerdict, Verdict, VerificationResult};

    #[test]
    fn authentication_results() {
        for (expected_auth_results, result) in [
            (
                "dkim=pass header.d=example.org header.s=myselector header.b=MTIzNDU2",
                VerificationResult::new(0, "example.org", "myselector")
                    .with_signature_prefix(b"123456789")
                    .with_outcome(Ok(())),
            ),
            (
                concat!(
                    "dkim=fail (verification failed) header.d=example.org ",
                    "header.s=myselector"
                ),
                VerificationResult::new(0, "example.org", "myselector")
                    .with_outcome(Err(Error::FailedVerification)),
            ),
            (
                "dkim=fail (body hash did not verify) header.d=example.org header.s=sel",
                VerificationResult::new(0, "example.org", "sel")
                    .with_outcome(Err(Error::FailedBodyHashMatch)),
            ),
            (
                "dkim=temperror (dns timeout) header.d=example.org header.s=sel",
                VerificationResult::new(0, "example.org", "sel")
                    .with_outcome(Err(Error::DnsTimeout)),
            ),
            (
                "dkim=permerror (dns record not found) header.d=example.org header.s=sel",
                VerificationResult::new(0, "example.org", "sel").with_outcome(Err(
                    Error::DnsRecordNotFound(ResponseCode::NXDomain),
                )),
            ),
            (
                "dkim=neutral (signature expired) header.d=example.org header.s=sel",
                VerificationResult::new(0, "example.org", "sel")
                    .with_outcome(Err(Error::SignatureExpired)),
            ),
            (
                "dkim=policy (algorithm not accepted) header.d=example.org header.s=sel",
                VerificationResult::new(0, "example.org", "sel")
                    .with_outcome(Err(Error::DisabledAlgorithm("rsa-sha1"))),
            ),
            (
                "dkim=permerror (missing parameters)",
                VerificationResult::new(0, "", "")
                    .with_outcome(Err(Error::MissingParameters("d"))),
            ),
        ] {
            let verdict = MessageVerdict::new(vec![result], Verdict::Fail);
            assert_eq!(
                verdict.auth_results("mx.example.org"),
                format!("mx.example.org;\r\n\t{expected_auth_results}")
            );
        }

        assert_eq!(
            MessageVerdict::new(vec![], Verdict::NoSignature).auth_results("mx.example.org"),
            "mx.example.org; dkim=none"
        );

        let verdict = MessageVerdict::new(
            vec![
                VerificationResult::new(0, "a.example", "s1")
                    .with_outcome(Err(Error::RevokedPublicKey)),
                VerificationResult::new(1, "b.example", "s2").with_outcome(Ok(())),
            ],
            Verdict::Pass,
        );
        assert_eq!(
            verdict.auth_results("mx"),
            concat!(
                "mx;\r\n\tdkim=permerror (revoked public key) header.d=a.example header.s=s1;",
                "\r\n\tdkim=pass header.d=b.example header.s=s2"
            )
        );
    }
}
