//! Structured capability exchange for the open handshake.
//!
//! Offers travel inside the data area of the `open` command and its response:
//!
//! ```text
//! name=value1,value2
//! name=value
//! name
//! ```
//!
//! separated by LF, with no LF after the last offer. Each value keeps an
//! integer form alongside the string form; it is `-1` whenever the string is
//! not a plain non-negative decimal. Unknown offer names are ignored by both
//! sides for forward compatibility.

use crate::command::CommandStates;
use crate::error::{RelpError, RelpResult};

/// Longest permitted offer name, in octets.
pub const MAX_OFFER_NAME: usize = 32;

/// Longest permitted single offer value, in octets.
pub const MAX_OFFER_VALUE: usize = 255;

/// Informational software identifier sent in the `relp_software` offer.
const RELP_SOFTWARE_URL: &str = "https://crates.io/crates/relp";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferValue {
    pub text: String,
    pub int_val: i64,
}

impl OfferValue {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let int_val = if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
            text.parse().unwrap_or(-1)
        } else {
            -1
        };
        OfferValue { text, int_val }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Offer {
    pub name: String,
    pub values: Vec<OfferValue>,
}

impl Offer {
    /// Integer form of the first value, if there is one.
    pub fn first_int(&self) -> Option<i64> {
        self.values.first().map(|v| v.int_val)
    }
}

/// An ordered list of offers as exchanged during open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Offers(pub Vec<Offer>);

impl Offers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, values: Vec<OfferValue>) {
        self.0.push(Offer {
            name: name.into(),
            values,
        });
    }

    pub fn get(&self, name: &str) -> Option<&Offer> {
        self.0.iter().find(|o| o.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Offer> {
        self.0.iter()
    }

    /// Parse an offer list out of a frame data area.
    pub fn parse(data: &[u8]) -> RelpResult<Offers> {
        let text = std::str::from_utf8(data)
            .map_err(|_| RelpError::InvalidOffer("offer list is not valid UTF-8".into()))?;

        let mut offers = Offers::new();
        for line in text.split('\n') {
            if line.is_empty() {
                continue;
            }
            let (name, rest) = match line.split_once('=') {
                Some((name, rest)) => (name, Some(rest)),
                None => (line, None),
            };
            if name.is_empty() || name.len() > MAX_OFFER_NAME {
                return Err(RelpError::InvalidOffer(format!(
                    "offer name {name:?} out of bounds"
                )));
            }
            let values = match rest {
                None => Vec::new(),
                Some(rest) => {
                    let mut values = Vec::new();
                    for v in rest.split(',') {
                        if v.len() > MAX_OFFER_VALUE {
                            return Err(RelpError::InvalidOffer(format!(
                                "value of offer {name:?} exceeds {MAX_OFFER_VALUE} octets"
                            )));
                        }
                        values.push(OfferValue::new(v));
                    }
                    values
                }
            };
            offers.push(name, values);
        }
        Ok(offers)
    }

    /// Render the offer list for the wire. No LF after the last offer.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for (i, offer) in self.0.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(&offer.name);
            if !offer.values.is_empty() {
                out.push('=');
                for (j, value) in offer.values.iter().enumerate() {
                    if j > 0 {
                        out.push(',');
                    }
                    out.push_str(&value.text);
                }
            }
        }
        out
    }
}

/// Build the offer set this side sends at open time, based on the protocol
/// version and which commands are locally offerable.
pub fn local_offers(protocol_version: u32, commands: &CommandStates) -> Offers {
    let mut offers = Offers::new();
    offers.push(
        "relp_version",
        vec![OfferValue::new(protocol_version.to_string())],
    );
    offers.push(
        "commands",
        commands
            .offerable()
            .into_iter()
            .map(OfferValue::new)
            .collect(),
    );
    offers.push(
        "relp_software",
        vec![
            OfferValue::new(RELP_SOFTWARE_URL),
            OfferValue::new(env!("CARGO_PKG_VERSION")),
            OfferValue::new(env!("CARGO_PKG_NAME")),
        ],
    );
    offers
}
