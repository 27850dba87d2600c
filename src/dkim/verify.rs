/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use crate::{
    common::{crypto::KeyType, message::HeaderField},
    Error, ParsedMessage, Result,
};

use super::{
    body::{BodyHash, BodyHasher},
    DomainKey, Flag, Signature,
};

impl ParsedMessage {
    /// Selects the headers covered by `h=`, in the listed order. A name listed more
    /// than once binds to successively older occurrences, starting from the bottom of
    /// the header block; names with no remaining occurrence contribute nothing. The
    /// `DKIM-Signature` header itself is appended last.
    pub fn signed_headers<'x>(
        &'x self,
        headers: &'x [String],
        dkim_hdr_name: &'x [u8],
        dkim_hdr_value: &'x [u8],
    ) -> impl Iterator<Item = (&'x [u8], &'x [u8])> {
        let mut last_header_pos: Vec<(&str, usize)> = Vec::new();
        headers
            .iter()
            .filter_map(move |h| {
                let idx = match last_header_pos
                    .iter()
                    .position(|(lh, _)| lh.eq_ignore_ascii_case(h))
                {
                    Some(idx) => idx,
                    None => {
                        last_header_pos.push((h.as_str(), 0));
                        last_header_pos.len() - 1
                    }
                };
                let header_pos = &mut last_header_pos[idx].1;

                if let Some((last_pos, header)) = self
                    .headers
                    .iter()
                    .rev()
                    .enumerate()
                    .skip(*header_pos)
                    .find(|(_, header)| header.is(h))
                {
                    *header_pos = last_pos + 1;
                    Some((header.name.as_slice(), header.value.as_slice()))
                } else {
                    *header_pos = self.headers.len();
                    None
                }
            })
            .chain([(dkim_hdr_name, dkim_hdr_value)])
    }
}

impl Signature {
    /// Canonicalizes and hashes the body, then compares the result with `bh=`.
    pub fn verify_body(&self, body: &[u8]) -> Result<BodyHash> {
        let hash = BodyHasher::new(self.cb, self.a.into())
            .with_length(self.l)
            .hash_body(body)?;

        if hash.matches(&self.bh) {
            Ok(hash)
        } else {
            Err(Error::FailedBodyHashMatch)
        }
    }

    /// Checks that a resolved key record may be used for this signature.
    pub fn validate_key(&self, record: &DomainKey, min_rsa_bits: usize) -> Result<()> {
        if record.key_type() != self.a.key_type() {
            return Err(Error::IncompatibleAlgorithms);
        }
        if !record.permits_hash(self.a.into()) {
            return Err(Error::HashNotPermitted);
        }
        if !record.permits_email() {
            return Err(Error::ServiceNotPermitted);
        }
        if record.key_type() == KeyType::Rsa {
            let bits = record.p.key_bits();
            if bits < min_rsa_bits {
                return Err(Error::KeyTooSmall(bits));
            }
        }
        if !self.validate_auid(record) {
            return Err(Error::FailedAuidMatch);
        }

        Ok(())
    }

    /// Enforces the `t=s` flag: the domain of `i=` must equal `d=` exactly.
    pub(crate) fn validate_auid(&self, record: &DomainKey) -> bool {
        if self.i.is_empty() || !record.has_flag(Flag::MatchDomain) {
            return true;
        }

        self.i
            .rsplit_once('@')
            .is_some_and(|(_, domain)| domain.eq_ignore_ascii_case(&self.d))
    }

    /// Rebuilds the signed header data from `message` and checks `b=` against it.
    pub fn verify_headers(
        &self,
        record: &DomainKey,
        message: &ParsedMessage,
        header: &HeaderField,
    ) -> Result<()> {
        let dkim_hdr_value = header.value.as_slice().strip_signature();
        let mut headers = message.signed_headers(&self.h, &header.name, &dkim_hdr_value);
        record.p.verify(&mut headers, &self.b, self.ch, self.a)
    }
}

pub(crate) trait SignatureStripper: Sized {
    fn strip_signature(&self) -> Vec<u8>;
}

impl SignatureStripper for &[u8] {
    /// Empties the value of the `b=` tag and drops the final line break.
    fn strip_signature(&self) -> Vec<u8> {
        let mut unsigned_dkim = Vec::with_capacity(self.len());
        let mut iter = self.iter().enumerate();
        let mut last_ch = b';';
        while let Some((pos, &ch)) = iter.next() {
            match ch {
                b'=' if last_ch == b'b' => {
                    unsigned_dkim.push(ch);
                    #[allow(clippy::while_let_on_iterator)]
                    while let Some((_, &ch)) = iter.next() {
                        if ch == b';' {
                            unsigned_dkim.push(b';');
                            break;
                        }
                    }
                    last_ch = 0;
                }
                b'b' | b'B' if last_ch == b';' => {
                    last_ch = b'b';
                    unsigned_dkim.push(ch);
                }
                b';' => {
                    last_ch = b';';
                    unsigned_dkim.push(ch);
                }
                b'\r' if pos + 2 == self.len() => (),
                b'\n' if pos + 1 == self.len() => (),
                _ => {
                    unsigned_dkim.push(ch);
                    if !ch.is_ascii_whitespace() {
                        last_ch = 0;
                    }
                }
            }
        }
        unsigned_dkim
    }
}
