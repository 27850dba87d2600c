/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use std::array::TryFromSliceError;

use rsa::{traits::PublicKeyParts, Pkcs1v15Sign};
use sha2::digest::Digest;

use crate::{dkim::Canonicalization, Error, Result};

use super::{Algorithm, VerifyingKey};

pub(crate) struct RsaPublicKey {
    inner: rsa::RsaPublicKey,
}

impl RsaPublicKey {
    /// Accepts either a SubjectPublicKeyInfo or a bare PKCS#1 `RSAPublicKey` DER blob.
    pub(crate) fn verifying_key_from_bytes(
        bytes: &[u8],
    ) -> Result<Box<dyn VerifyingKey + Send + Sync>> {
        Ok(Box::new(RsaPublicKey {
            inner: <rsa::RsaPublicKey as rsa::pkcs8::DecodePublicKey>::from_public_key_der(bytes)
                .or_else(|_| rsa::pkcs1::DecodeRsaPublicKey::from_pkcs1_der(bytes))
                .map_err(|err| Error::CryptoError(err.to_string()))?,
        }))
    }
}

impl VerifyingKey for RsaPublicKey {
    fn verify<'a>(
        &self,
        headers: &mut dyn Iterator<Item = (&'a [u8], &'a [u8])>,
        signature: &[u8],
        canonicalization: Canonicalization,
        algorithm: Algorithm,
    ) -> Result<()> {
        match algorithm {
            Algorithm::RsaSha256 => {
                let mut hasher = sha2::Sha256::new();
                canonicalization.canonicalize_headers(headers, &mut hasher);
                let hash = hasher.finalize();

                self.inner
                    .verify(
                        Pkcs1v15Sign::new::<sha2::Sha256>(),
                        hash.as_ref(),
                        signature,
                    )
                    .map_err(|_| Error::FailedVerification)
            }
            Algorithm::RsaSha1 => {
                let mut hasher = sha1::Sha1::new();
                canonicalization.canonicalize_headers(headers, &mut hasher);
                let hash = hasher.finalize();

                self.inner
                    .verify(Pkcs1v15Sign::new::<sha1::Sha1>(), hash.as_ref(), signature)
                    .map_err(|_| Error::FailedVerification)
            }
            Algorithm::Ed25519Sha256 => Err(Error::IncompatibleAlgorithms),
        }
    }

    fn key_bits(&self) -> usize {
        self.inner.size() * 8
    }
}

pub(crate) struct Ed25519PublicKey {
    inner: ed25519_dalek::VerifyingKey,
}

impl Ed25519PublicKey {
    pub(crate) fn verifying_key_from_bytes(
        bytes: &[u8],
    ) -> Result<Box<dyn VerifyingKey + Send + Sync>> {
        Ok(Box::new(Ed25519PublicKey {
            inner: ed25519_dalek::VerifyingKey::from_bytes(
                bytes
                    .try_into()
                    .map_err(|err: TryFromSliceError| Error::CryptoError(err.to_string()))?,
            )
            .map_err(|err| Error::CryptoError(err.to_string()))?,
        }))
    }
}

impl VerifyingKey for Ed25519PublicKey {
    fn verify<'a>(
        &self,
        headers: &mut dyn Iterator<Item = (&'a [u8], &'a [u8])>,
        signature: &[u8],
        canonicalization: Canonicalization,
        algorithm: Algorithm,
    ) -> Result<()> {
        if !matches!(algorithm, Algorithm::Ed25519Sha256) {
            return Err(Error::IncompatibleAlgorithms);
        }

        // Ed25519 signs the SHA-256 digest of the header data (RFC 8463).
        let mut hasher = sha2::Sha256::new();
        canonicalization.canonicalize_headers(headers, &mut hasher);
        let hash = hasher.finalize();

        let signature: &[u8; 64] = signature
            .try_into()
            .map_err(|_| Error::FailedVerification)?;

        self.inner
            .verify_strict(
                hash.as_ref(),
                &ed25519_dalek::Signature::from_bytes(signature),
            )
            .map_err(|_| Error::FailedVerification)
    }

    fn key_bits(&self) -> usize {
        256
    }
}

#[cfg(test)]
mod test {
    use mail_parser::decoders::base64::base64_decode;

    use crate::{
        common::crypto::{Algorithm, KeyType},
        dkim::Canonicalization,
        Error,
    };

    const RSA_SPKI: &str = concat!(
        "MIGfMA0GCSqGSIb3DQEBAQUAA4GNADCBiQKBgQDwIRP/UC3SBsEmGqZ9ZJW3/DkMoGeLnQg1fWn7/zYt",
        "IxN2SnFCjxOCKG9v3b4jYfcTNh5ijSsq631uBItLa7od+v/RtdC2UzJ1lWT947qR+Rcac2gbto/NMqJ0",
        "fzfVjH4OuKhitdY9tf6mcwGjaNBcWToIMmPSPDdQPNUYckcQ2QIDAQAB",
    );

    const ED25519_KEY: &str = "11qYAYKxCrfVS/7TyWQHOg7hcvPapiMlrwIaaPcHURo=";

    #[test]
    fn load_public_keys() {
        let rsa = KeyType::Rsa
            .verifying_key(&base64_decode(RSA_SPKI.as_bytes()).unwrap())
            .unwrap();
        assert_eq!(rsa.key_bits(), 1024);

        let ed = KeyType::Ed25519
            .verifying_key(&base64_decode(ED25519_KEY.as_bytes()).unwrap())
            .unwrap();
        assert_eq!(ed.key_bits(), 256);

        assert!(matches!(
            KeyType::Ed25519.verifying_key(b"short"),
            Err(Error::CryptoError(_))
        ));
        assert!(matches!(
            KeyType::Rsa.verifying_key(b"not a key"),
            Err(Error::CryptoError(_))
        ));
    }

    #[test]
    fn reject_wrong_family() {
        let ed = KeyType::Ed25519
            .verifying_key(&base64_decode(ED25519_KEY.as_bytes()).unwrap())
            .unwrap();
        let mut headers = std::iter::empty::<(&[u8], &[u8])>();
        assert_eq!(
            ed.verify(
                &mut headers,
                &[0u8; 64],
                Canonicalization::Relaxed,
                Algorithm::RsaSha256
            ),
            Err(Error::IncompatibleAlgorithms)
        );
        let mut headers = std::iter::empty::<(&[u8], &[u8])>();
        assert_eq!(
            ed.verify(
                &mut headers,
                &[0u8; 12],
                Canonicalization::Relaxed,
                Algorithm::Ed25519Sha256
            ),
            Err(Error::FailedVerification)
        );
    }
}
