/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use crate::{Error, Result};

use super::headers::HeaderIterator;

/// A header exactly as it appeared on the wire: the name without the colon and the
/// raw value including folding whitespace and the terminating line break.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: Vec<u8>,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessage {
    pub headers: Vec<HeaderField>,
    pub body: Vec<u8>,
}

impl HeaderField {
    pub fn new(name: &[u8], value: &[u8]) -> Self {
        HeaderField {
            name: name.to_vec(),
            value: value.to_vec(),
        }
    }

    #[inline(always)]
    pub fn is(&self, name: &str) -> bool {
        self.name.trim_ascii_end().eq_ignore_ascii_case(name.as_bytes())
    }
}

impl ParsedMessage {
    /// Splits a raw RFC 5322 message into its ordered header list and body. Header
    /// bytes are kept verbatim so they can be canonicalized later.
    pub fn parse(raw_message: &[u8]) -> Result<Self> {
        let mut iter = HeaderIterator::new(raw_message);
        let mut headers = Vec::new();

        for (name, value) in iter.by_ref() {
            headers.push(HeaderField::new(name, value));
        }

        let body_offset = iter.body_offset().ok_or(Error::MalformedMessage)?;

        Ok(ParsedMessage {
            headers,
            body: raw_message.get(body_offset..).unwrap_or_default().to_vec(),
        })
    }

    /// Indexes of all `DKIM-Signature` headers, top to bottom.
    pub fn signature_indexes(&self) -> impl Iterator<Item = usize> + '_ {
        self.headers
            .iter()
            .enumerate()
            .filter(|(_, header)| header.is("DKIM-Signature"))
            .map(|(index, _)| index)
    }
}
