/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use super::Canonicalization;
use crate::common::headers::Writer;

impl Canonicalization {
    pub fn canonicalize_headers<'a>(
        &self,
        headers: impl Iterator<Item = (&'a [u8], &'a [u8])>,
        hasher: &mut impl Writer,
    ) {
        match self {
            Canonicalization::Relaxed => {
                for (name, value) in headers {
                    for &ch in name {
                        if !ch.is_ascii_whitespace() {
                            hasher.write(&[ch.to_ascii_lowercase()]);
                        }
                    }

                    hasher.write(b":");
                    let mut bw = 0;
                    let mut last_ch = 0;

                    for &ch in value {
                        if !ch.is_ascii_whitespace() {
                            if [b' ', b'\t'].contains(&last_ch) && bw > 0 {
                                hasher.write_len(b" ", &mut bw);
                            }
                            hasher.write_len(&[ch], &mut bw);
                        }
                        last_ch = ch;
                    }

                    if last_ch == b'\n' {
                        hasher.write(b"\r\n");
                    }
                }
            }
            Canonicalization::Simple => {
                for (name, value) in headers {
                    hasher.write(name);
                    hasher.write(b":");

                    // Bare LF line endings are written as CRLF.
                    let mut start = 0;
                    for (pos, &ch) in value.iter().enumerate() {
                        if ch == b'\n' && (pos == 0 || value[pos - 1] != b'\r') {
                            hasher.write(&value[start..pos]);
                            hasher.write(b"\r\n");
                            start = pos + 1;
                        }
                    }
                    hasher.write(&value[start..]);
                }
            }
        }
    }

    /// Writes the canonical form of a message body. Line endings are normalized to
    /// CRLF, trailing empty lines are removed and the final line is always terminated.
    pub fn canonicalize_body(&self, body: &[u8], writer: &mut impl Writer) {
        let mut empty_lines = 0;
        let mut is_empty = true;

        for line in BodyLines::new(body) {
            let is_blank = match self {
                Canonicalization::Relaxed => line.iter().all(|ch| matches!(ch, b' ' | b'\t')),
                Canonicalization::Simple => line.is_empty(),
            };
            if is_blank {
                empty_lines += 1;
                continue;
            }

            for _ in 0..empty_lines {
                writer.write(b"\r\n");
            }
            empty_lines = 0;
            is_empty = false;

            match self {
                Canonicalization::Relaxed => write_relaxed_line(line, writer),
                Canonicalization::Simple => writer.write(line),
            }
            writer.write(b"\r\n");
        }

        if is_empty && *self == Canonicalization::Simple {
            writer.write(b"\r\n");
        }
    }

    pub fn canonical_body(&self, body: &[u8]) -> Vec<u8> {
        let mut canonical = Vec::with_capacity(body.len() + 2);
        self.canonicalize_body(body, &mut canonical);
        canonical
    }
}

// Collapses runs of WSP into one space and drops trailing WSP.
fn write_relaxed_line(line: &[u8], writer: &mut impl Writer) {
    let mut pending_space = false;
    let mut start = None;

    for (pos, &ch) in line.iter().enumerate() {
        if matches!(ch, b' ' | b'\t') {
            if let Some(start) = start.take() {
                writer.write(&line[start..pos]);
            }
            pending_space = true;
        } else if start.is_none() {
            if pending_space {
                writer.write(b" ");
                pending_space = false;
            }
            start = Some(pos);
        }
    }

    if let Some(start) = start {
        writer.write(&line[start..]);
    }
}

/// Iterates over body lines without their terminators. A line ends at LF, with an
/// optional preceding CR; text after the last LF counts as a final line.
struct BodyLines<'x> {
    body: &'x [u8],
    pos: usize,
}

impl<'x> BodyLines<'x> {
    fn new(body: &'x [u8]) -> Self {
        BodyLines { body, pos: 0 }
    }
}

impl<'x> Iterator for BodyLines<'x> {
    type Item = &'x [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.body.get(self.pos..).filter(|rest| !rest.is_empty())?;
        let (line, consumed) = match rest.iter().position(|&ch| ch == b'\n') {
            Some(end) => (&rest[..end], end + 1),
            None => (rest, rest.len()),
        };
        self.pos += consumed;
        Some(line.strip_suffix(b"\r").unwrap_or(line))
    }
}
