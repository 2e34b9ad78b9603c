// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Extraction of DER frames from PEM armored or raw DER input.
//!
//! Input whose first byte looks like DER (a SEQUENCE or INTEGER header)
//! is passed through as a single unlabeled frame. Anything else is
//! treated as PEM text containing one or more
//! `-----BEGIN <label>-----` / `-----END <label>-----` blocks whose
//! base64 body is decoded by the `pem` crate. Character-level armor
//! parsing is delegated entirely to that crate; this module only locates
//! blocks and classifies labels.

use crate::X509DerError as Error;

/// Classification of a PEM block label.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PemLabel {
    Certificate,
    X509Crl,
    RsaPrivateKey,
    DsaPrivateKey,
    EcPrivateKey,
    /// `PRIVATE KEY`: an unencrypted PKCS#8 PrivateKeyInfo.
    PrivateKey,
    EncryptedPrivateKey,
    PublicKey,
    Pkcs7,
    /// Raw DER input with no armor, so no label.
    Der,
    /// A label this library does not recognize; returned verbatim so
    /// callers can decide whether to consume it.
    Other(String),
}

impl PemLabel {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "CERTIFICATE" => Self::Certificate,
            "X509 CRL" => Self::X509Crl,
            "RSA PRIVATE KEY" => Self::RsaPrivateKey,
            "DSA PRIVATE KEY" => Self::DsaPrivateKey,
            "EC PRIVATE KEY" => Self::EcPrivateKey,
            "PRIVATE KEY" => Self::PrivateKey,
            "ENCRYPTED PRIVATE KEY" => Self::EncryptedPrivateKey,
            "PUBLIC KEY" => Self::PublicKey,
            "PKCS7" => Self::Pkcs7,
            other => Self::Other(other.to_string()),
        }
    }

    /// Whether the label denotes private key material of any layout.
    pub fn is_private_key(&self) -> bool {
        matches!(
            self,
            Self::RsaPrivateKey
                | Self::DsaPrivateKey
                | Self::EcPrivateKey
                | Self::PrivateKey
                | Self::EncryptedPrivateKey
        )
    }
}

/// One DER frame extracted from the input.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PemBlock {
    pub label: PemLabel,
    pub der: Vec<u8>,
}

/// Iterate the DER frames of PEM armored or raw DER input lazily.
pub fn iter_blocks(data: &[u8]) -> PemBlocks<'_> {
    PemBlocks {
        data,
        pos: 0,
        raw_der: matches!(data.first(), Some(&0x30) | Some(&0x02)),
        done: false,
    }
}

/// Collect every DER frame of the input.
pub fn read_all(data: &[u8]) -> Result<Vec<PemBlock>, Error> {
    iter_blocks(data).collect()
}

pub struct PemBlocks<'a> {
    data: &'a [u8],
    pos: usize,
    raw_der: bool,
    done: bool,
}

const BEGIN: &str = "-----BEGIN ";
const END: &str = "-----END ";
const DASHES: &str = "-----";

impl<'a> Iterator for PemBlocks<'a> {
    type Item = Result<PemBlock, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        if self.raw_der {
            self.done = true;
            return Some(Ok(PemBlock {
                label: PemLabel::Der,
                der: self.data.to_vec(),
            }));
        }

        // PEM is ASCII; anything else inside a block will fail base64
        // decoding below.
        let text = String::from_utf8_lossy(&self.data[self.pos..]);

        let begin = match text.find(BEGIN) {
            Some(offset) => offset,
            None => {
                self.done = true;
                return None;
            }
        };

        let after_begin = &text[begin + BEGIN.len()..];
        let tag = match after_begin.find(DASHES) {
            Some(end_of_tag) => &after_begin[..end_of_tag],
            None => {
                self.done = true;
                return Some(Err(Error::UnterminatedBlock));
            }
        };

        let end_marker = format!("{}{}{}", END, tag, DASHES);
        let end = match text[begin..].find(&end_marker) {
            Some(offset) => begin + offset + end_marker.len(),
            None => {
                self.done = true;
                return Some(Err(Error::UnterminatedBlock));
            }
        };

        let block_text = &text[begin..end];
        self.pos += end;

        match ::pem::parse(block_text) {
            Ok(parsed) => Some(Ok(PemBlock {
                label: PemLabel::from_tag(&parsed.tag),
                der: parsed.contents,
            })),
            Err(err) => {
                self.done = true;
                Some(Err(Error::BadBase64(err)))
            }
        }
    }
}
