/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use std::{
    iter::{Enumerate, Peekable},
    slice::Iter,
};

#[derive(Clone, Copy)]
enum State {
    Name { start: usize },
    Value { start: usize, colon: usize },
}

/// Splits the header section of a raw message into `(name, value)` pairs, where the
/// value keeps its folding whitespace and line terminator.
pub(crate) struct HeaderIterator<'x> {
    message: &'x [u8],
    iter: Peekable<Enumerate<Iter<'x, u8>>>,
    state: State,
    body_start: Option<usize>,
}

pub trait Writer {
    fn write(&mut self, buf: &[u8]);

    fn write_len(&mut self, buf: &[u8], len: &mut usize) {
        self.write(buf);
        *len += buf.len();
    }
}

pub trait Writable {
    fn write(self, writer: &mut impl Writer);
}

impl Writer for Vec<u8> {
    fn write(&mut self, buf: &[u8]) {
        self.extend_from_slice(buf);
    }
}

impl Writable for &[u8] {
    fn write(self, writer: &mut impl Writer) {
        writer.write(self);
    }
}

impl<'x> HeaderIterator<'x> {
    pub fn new(message: &'x [u8]) -> Self {
        HeaderIterator {
            message,
            iter: message.iter().enumerate().peekable(),
            state: State::Name { start: 0 },
            body_start: None,
        }
    }

    /// Offset of the first body byte, available once the iterator reached the empty
    /// line that ends the header section. Returns `None` when no such line exists.
    pub fn body_offset(&self) -> Option<usize> {
        self.body_start
    }
}

impl<'x> Iterator for HeaderIterator<'x> {
    type Item = (&'x [u8], &'x [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let mut last_ch = 0;
        while let Some((pos, &ch)) = self.iter.next() {
            if ch == b':' {
                if let State::Name { start } = &self.state {
                    self.state = State::Value {
                        start: *start,
                        colon: pos,
                    };
                }
            } else if ch == b'\n' {
                match self.state {
                    State::Value { start, colon } => {
                        if self
                            .iter
                            .peek()
                            .map_or(true, |(_, next_byte)| ![b' ', b'\t'].contains(next_byte))
                        {
                            let header_name = self.message.get(start..colon).unwrap_or_default();
                            let header_value =
                                self.message.get(colon + 1..pos + 1).unwrap_or_default();
                            self.state = State::Name { start: pos + 1 };
                            return Some((header_name, header_value));
                        }
                    }
                    State::Name { start } => {
                        if (last_ch == b'\r' && start == pos - 1) || start == pos {
                            // End of headers
                            self.body_start = Some(pos + 1);
                            return None;
                        } else if self
                            .iter
                            .peek()
                            .map_or(true, |(_, next_byte)| ![b' ', b'\t'].contains(next_byte))
                        {
                            // Invalid header, return anyway.
                            let header_name = self.message.get(start..pos + 1).unwrap_or_default();
                            self.state = State::Name { start: pos + 1 };
                            return Some((header_name, b""));
                        }
                    }
                }
            }

            last_ch = ch;
        }

        None
    }
}

#[cfg(test)]
mod test {
    use super::HeaderIterator;

    #[test]
    fn header_iterator() {
        for (message, headers) in [
            (
                "From: a\nTo: b\nEmpty:\nMulti: 1\n 2\nSubject: c\n\nNot-header: ignore\n",
                vec![
                    ("From", " a\n"),
                    ("To", " b\n"),
                    ("Empty", "\n"),
                    ("Multi", " 1\n 2\n"),
                    ("Subject", " c\n"),
                ],
            ),
            (
                ": a\nTo: b\n \n \nc\n:\nFrom : d\nSubject: e\n\nNot-header: ignore\n",
                vec![
                    ("", " a\n"),
                    ("To", " b\n \n \n"),
                    ("c\n", ""),
                    ("", "\n"),
                    ("From ", " d\n"),
                    ("Subject", " e\n"),
                ],
            ),
            (
                concat!(
                    "A: X\r\n",
                    "B : Y\t\r\n",
                    "\tZ  \r\n",
                    "\r\n",
                    " C \r\n",
                    "D \t E\r\n"
                ),
                vec![("A", " X\r\n"), ("B ", " Y\t\r\n\tZ  \r\n")],
            ),
        ] {
            assert_eq!(
                HeaderIterator::new(message.as_bytes())
                    .map(|(h, v)| {
                        (
                            std::str::from_utf8(h).unwrap(),
                            std::str::from_utf8(v).unwrap(),
                        )
                    })
                    .collect::<Vec<_>>(),
                headers
            );
        }
    }

    #[test]
    fn body_offset() {
        for (message, offset) in [
            ("A: b\r\n\r\nbody\r\n", Some(8)),
            ("A: b\r\n\r\n", Some(8)),
            ("A: b\n\nbody", Some(6)),
            ("\r\nbody", Some(2)),
            ("A: b\r\nC: d\r\n", None),
            ("A: b", None),
            ("", None),
        ] {
            let mut iter = HeaderIterator::new(message.as_bytes());
            for _ in iter.by_ref() {}
            assert_eq!(iter.body_offset(), offset, "{message:?}");
        }
    }
}
