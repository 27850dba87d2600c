/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

#![no_main]
use libfuzzer_sys::fuzz_target;

use dkim_verify::{
    common::parse::TxtRecordParser,
    dkim::{DomainKey, Signature},
    ParsedMessage,
};

static RFC822_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz:=- \r\n";
static TXT_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz1=;:";

fuzz_target!(|data: &[u8]| {
    let data_rfc822 = into_alphabet(data, RFC822_ALPHABET);
    let data_txt = into_alphabet(data, TXT_ALPHABET);

    Signature::parse(data).ok();
    Signature::parse(&data_txt).ok();

    Signature::parse_identity(data);
    Signature::parse_identity(&data_txt);

    DomainKey::parse(data).ok();
    DomainKey::parse(&data_txt).ok();

    if let Ok(message) = ParsedMessage::parse(data) {
        message.signature_indexes().count();
    }
    if let Ok(message) = ParsedMessage::parse(&data_rfc822) {
        message.signature_indexes().count();
    }
});

fn into_alphabet(data: &[u8], alphabet: &[u8]) -> Vec<u8> {
    data.iter()
        .map(|&byte| alphabet[byte as usize % alphabet.len()])
        .collect()
}
