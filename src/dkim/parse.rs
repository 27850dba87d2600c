/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use std::slice::Iter;

use mail_parser::decoders::base64::{base64_decode, base64_decode_stream};

use crate::{
    common::{crypto::KeyType, parse::*},
    Error,
};

use super::{
    Algorithm, Canonicalization, DomainKey, Flag, HashAlgorithm, Service, Signature,
    R_HASH_RESTRICTED,
};

impl Signature {
    #[allow(clippy::while_let_on_iterator)]
    pub fn parse(header: &'_ [u8]) -> crate::Result<Self> {
        let mut signature = Signature {
            v: 0,
            a: Algorithm::RsaSha256,
            d: "".into(),
            s: "".into(),
            i: "".into(),
            b: Vec::with_capacity(0),
            bh: Vec::with_capacity(0),
            h: Vec::with_capacity(0),
            l: None,
            x: None,
            t: None,
            ch: Canonicalization::Simple,
            cb: Canonicalization::Simple,
        };
        let header_len = header.len();
        let mut header = header.iter();
        let mut seen: Vec<u64> = Vec::with_capacity(12);
        let mut has_algorithm = false;

        while let Some(key) = header.key() {
            if matches!(key, V | A | B | BH | C | D | H | I | L | S | T | X) {
                if seen.contains(&key) {
                    return Err(Error::ParseError);
                }
                seen.push(key);
            }

            match key {
                V => {
                    signature.v = header.number().ok_or(Error::UnsupportedVersion)? as u32;
                    if signature.v != 1 {
                        return Err(Error::UnsupportedVersion);
                    }
                }
                A => {
                    signature.a = header.algorithm()?;
                    has_algorithm = true;
                }
                B => {
                    signature.b =
                        base64_decode_stream(&mut header, header_len, b';').ok_or(Error::Base64)?
                }
                BH => {
                    signature.bh =
                        base64_decode_stream(&mut header, header_len, b';').ok_or(Error::Base64)?
                }
                C => {
                    let (ch, cb) = header.canonicalization(Canonicalization::Simple)?;
                    signature.ch = ch;
                    signature.cb = cb;
                }
                D => signature.d = header.text(true),
                H => signature.h = header.items(),
                I => signature.i = header.text_qp(),
                L => signature.l = header.number().ok_or(Error::ParseError)?.into(),
                S => signature.s = header.text(true),
                T => signature.t = header.number().ok_or(Error::ParseError)?.into(),
                X => signature.x = header.number().ok_or(Error::ParseError)?.into(),
                _ => header.ignore(),
            }
        }

        for (present, tag) in [
            (signature.v != 0, "v"),
            (has_algorithm, "a"),
            (!signature.b.is_empty(), "b"),
            (!signature.bh.is_empty(), "bh"),
            (!signature.d.is_empty(), "d"),
            (!signature.h.is_empty(), "h"),
            (!signature.s.is_empty(), "s"),
        ] {
            if !present {
                return Err(Error::MissingParameters(tag));
            }
        }

        signature.validate()?;

        Ok(signature)
    }

    fn validate(&self) -> crate::Result<()> {
        // The AUID must be the signing domain or one of its subdomains.
        if !self.i.is_empty() {
            let domain = self
                .i
                .rsplit_once('@')
                .map(|(_, domain)| domain)
                .ok_or(Error::InvalidIdentity)?
                .to_ascii_lowercase();
            if domain != self.d
                && !domain
                    .strip_suffix(self.d.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
            {
                return Err(Error::InvalidIdentity);
            }
        }

        if let (Some(t), Some(x)) = (self.t, self.x) {
            if x < t {
                return Err(Error::InvalidExpiration);
            }
        }

        Ok(())
    }

    /// Extracts whatever `d=` and `s=` values can be read from a header that failed
    /// to parse, so the failure can still be attributed to a signer.
    pub fn parse_identity(header: &[u8]) -> (String, String) {
        let mut header = header.iter();
        let mut domain = String::new();
        let mut selector = String::new();

        while let Some(key) = header.key() {
            match key {
                D if domain.is_empty() => domain = header.text(true),
                S if selector.is_empty() => selector = header.text(true),
                _ => header.ignore(),
            }
        }

        (domain, selector)
    }
}

pub(crate) trait SignatureParser: Sized {
    fn canonicalization(
        &mut self,
        default: Canonicalization,
    ) -> crate::Result<(Canonicalization, Canonicalization)>;
    fn algorithm(&mut self) -> crate::Result<Algorithm>;
}

impl SignatureParser for Iter<'_, u8> {
    fn canonicalization(
        &mut self,
        default: Canonicalization,
    ) -> crate::Result<(Canonicalization, Canonicalization)> {
        let mut cb = default;
        let mut ch = default;

        let mut has_header = false;
        let mut c = None;

        while let Some(char) = self.next() {
            match (char, c) {
                (b's' | b'S', None) => {
                    if self.match_bytes(b"imple") {
                        c = Canonicalization::Simple.into();
                    } else {
                        return Err(Error::UnsupportedCanonicalization);
                    }
                }
                (b'r' | b'R', None) => {
                    if self.match_bytes(b"elaxed") {
                        c = Canonicalization::Relaxed.into();
                    } else {
                        return Err(Error::UnsupportedCanonicalization);
                    }
                }
                (b'/', Some(c_)) if !has_header => {
                    ch = c_;
                    c = None;
                    has_header = true;
                }
                (b';', _) => {
                    break;
                }
                (_, _) => {
                    if !char.is_ascii_whitespace() {
                        return Err(Error::UnsupportedCanonicalization);
                    }
                }
            }
        }

        if let Some(c) = c {
            if has_header {
                cb = c;
            } else {
                ch = c;
            }
        }

        Ok((ch, cb))
    }

    fn algorithm(&mut self) -> crate::Result<Algorithm> {
        match self.next_skip_whitespaces().unwrap_or(0) {
            b'r' | b'R' => {
                if self.match_bytes(b"sa-sha") {
                    let mut algo = 0;

                    for ch in self {
                        match ch {
                            b'1' if algo == 0 => algo = 1,
                            b'2' if algo == 0 => algo = 2,
                            b'5' if algo == 2 => algo = 25,
                            b'6' if algo == 25 => algo = 256,
                            b';' => {
                                break;
                            }
                            _ => {
                                if !ch.is_ascii_whitespace() {
                                    return Err(Error::UnsupportedAlgorithm);
                                }
                            }
                        }
                    }

                    match algo {
                        256 => Ok(Algorithm::RsaSha256),
                        1 => Ok(Algorithm::RsaSha1),
                        _ => Err(Error::UnsupportedAlgorithm),
                    }
                } else {
                    Err(Error::UnsupportedAlgorithm)
                }
            }
            b'e' | b'E' => {
                if self.match_bytes(b"d25519-sha256") && self.seek_tag_end() {
                    Ok(Algorithm::Ed25519Sha256)
                } else {
                    Err(Error::UnsupportedAlgorithm)
                }
            }
            _ => Err(Error::UnsupportedAlgorithm),
        }
    }
}

impl TxtRecordParser for DomainKey {
    #[allow(clippy::while_let_on_iterator)]
    fn parse(header: &[u8]) -> crate::Result<Self> {
        let mut header = header.iter();
        let mut flags = 0;
        let mut key_type = KeyType::Rsa;
        let mut public_key = None;

        while let Some(key) = header.key() {
            match key {
                V => {
                    if !header.match_bytes(b"DKIM1") || !header.seek_tag_end() {
                        return Err(Error::InvalidRecordType);
                    }
                }
                H => flags |= R_HASH_RESTRICTED | header.flags::<HashAlgorithm>(),
                P => public_key = Some(header.tag()),
                S => flags |= header.flags::<Service>(),
                T => flags |= header.flags::<Flag>(),
                K => {
                    if let Some(ch) = header.next_skip_whitespaces() {
                        match ch {
                            b'r' | b'R' => {
                                if header.match_bytes(b"sa") && header.seek_tag_end() {
                                    key_type = KeyType::Rsa;
                                } else {
                                    return Err(Error::UnsupportedKeyType);
                                }
                            }
                            b'e' | b'E' => {
                                if header.match_bytes(b"d25519") && header.seek_tag_end() {
                                    key_type = KeyType::Ed25519;
                                } else {
                                    return Err(Error::UnsupportedKeyType);
                                }
                            }
                            b';' => (),
                            _ => {
                                return Err(Error::UnsupportedKeyType);
                            }
                        }
                    }
                }
                _ => {
                    header.ignore();
                }
            }
        }

        match public_key {
            Some(public_key) if public_key.is_empty() => Err(Error::RevokedPublicKey),
            Some(public_key) => Ok(DomainKey {
                p: key_type.verifying_key(&base64_decode(&public_key).ok_or(Error::Base64)?)?,
                k: key_type,
                f: flags,
            }),
            None => Err(Error::InvalidRecordType),
        }
    }
}

impl ItemParser for HashAlgorithm {
    fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.eq_ignore_ascii_case(b"sha256") {
            HashAlgorithm::Sha256.into()
        } else if bytes.eq_ignore_ascii_case(b"sha1") {
            HashAlgorithm::Sha1.into()
        } else {
            None
        }
    }
}

impl ItemParser for Flag {
    fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.eq_ignore_ascii_case(b"y") {
            Flag::Testing.into()
        } else if bytes.eq_ignore_ascii_case(b"s") {
            Flag::MatchDomain.into()
        } else {
            None
        }
    }
}

impl ItemParser for Service {
    fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.eq(b"*") {
            Service::All.into()
        } else if bytes.eq_ignore_ascii_case(b"email") {
            Service::Email.into()
        } else {
            Service::Other.into()
        }
    }
}
