// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! X.501 distinguished names.

use {
    crate::{
        der::DerObject,
        oid::{
            Oid, OID_COMMON_NAME, OID_COUNTRY_NAME, OID_EMAIL_ADDRESS, OID_LOCALITY_NAME,
            OID_ORGANIZATIONAL_UNIT_NAME, OID_ORGANIZATION_NAME, OID_STATE_PROVINCE_NAME,
        },
        X509DerError as Error,
    },
    std::{
        fmt::{Display, Formatter},
        hash::{Hash, Hasher},
    },
};

/// A single attribute within a relative distinguished name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AttributeTypeAndValue {
    pub attr_type: Oid,
    pub value: AttributeValue,
}

/// An attribute value: decoded text when the value uses a character
/// string type, otherwise the raw DER object.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AttributeValue {
    Text(String),
    Raw(DerObject),
}

impl AttributeValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Raw(_) => None,
        }
    }
}

/// A relative distinguished name: a set of attributes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Rdn(pub Vec<AttributeTypeAndValue>);

/// An RDN sequence.
///
/// Equality and hashing operate on the canonical encoding, making a
/// `Name` usable as an identity key for trust anchors and CRL issuers.
#[derive(Clone, Debug)]
pub struct Name {
    rdns: Vec<Rdn>,
    der: Vec<u8>,
}

impl Name {
    pub fn from_der_object(obj: &DerObject) -> Result<Self, Error> {
        let mut rdns = Vec::new();

        for rdn in obj.as_sequence()? {
            let mut attributes = Vec::new();

            for attribute in rdn.as_set()? {
                let fields = attribute.as_sequence()?;
                if fields.len() != 2 {
                    return Err(Error::malformed(
                        "AttributeTypeAndValue must have two fields",
                    ));
                }

                let attr_type = fields[0].as_oid()?;
                let value = match fields[1].as_string() {
                    Ok(text) => AttributeValue::Text(text),
                    Err(_) => AttributeValue::Raw(fields[1].clone()),
                };

                attributes.push(AttributeTypeAndValue { attr_type, value });
            }

            rdns.push(Rdn(attributes));
        }

        Ok(Self {
            rdns,
            der: obj.encode(),
        })
    }

    pub fn rdns(&self) -> &[Rdn] {
        &self.rdns
    }

    /// Canonical DER encoding of this name.
    pub fn as_der(&self) -> &[u8] {
        &self.der
    }

    /// All commonName attribute values, in RDN-sequence order.
    pub fn common_names(&self) -> Vec<&str> {
        self.rdns
            .iter()
            .flat_map(|rdn| rdn.0.iter())
            .filter(|attr| attr.attr_type == OID_COMMON_NAME)
            .filter_map(|attr| attr.value.as_text())
            .collect()
    }

    /// The most specific commonName: RDNs run general to specific, so
    /// this is the last CN in sequence order.
    pub fn most_specific_common_name(&self) -> Option<&str> {
        self.common_names().last().copied()
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.der.hash(state);
    }
}

fn attribute_abbreviation(oid: &Oid) -> Option<&'static str> {
    for (known, abbreviation) in [
        (OID_COMMON_NAME, "CN"),
        (OID_COUNTRY_NAME, "C"),
        (OID_LOCALITY_NAME, "L"),
        (OID_STATE_PROVINCE_NAME, "ST"),
        (OID_ORGANIZATION_NAME, "O"),
        (OID_ORGANIZATIONAL_UNIT_NAME, "OU"),
        (OID_EMAIL_ADDRESS, "emailAddress"),
    ] {
        if *oid == *known {
            return Some(abbreviation);
        }
    }

    None
}

impl Display for Name {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut first = true;

        for attribute in self.rdns.iter().flat_map(|rdn| rdn.0.iter()) {
            if !first {
                f.write_str(", ")?;
            }
            first = false;

            match attribute_abbreviation(&attribute.attr_type) {
                Some(abbreviation) => f.write_str(abbreviation)?,
                None => write!(f, "{}", attribute.attr_type)?,
            }

            f.write_str("=")?;

            match &attribute.value {
                AttributeValue::Text(text) => f.write_str(text)?,
                AttributeValue::Raw(_) => f.write_str("<binary>")?,
            }
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn build_name(attributes: &[(&[u64], &str)]) -> DerObject {
    DerObject::sequence(
        attributes
            .iter()
            .map(|(oid, value)| {
                DerObject::set(vec![DerObject::sequence(vec![
                    DerObject::oid(&Oid::new(oid.to_vec()).unwrap()),
                    DerObject::utf8_string(value),
                ])])
            })
            .collect(),
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_and_display() {
        let obj = build_name(&[
            (OID_COUNTRY_NAME, "US"),
            (OID_ORGANIZATION_NAME, "Example Corp"),
            (OID_COMMON_NAME, "example.com"),
        ]);

        let name = Name::from_der_object(&obj).unwrap();
        assert_eq!(name.rdns().len(), 3);
        assert_eq!(name.to_string(), "C=US, O=Example Corp, CN=example.com");
    }

    #[test]
    fn most_specific_common_name_is_last() {
        let obj = build_name(&[
            (OID_COMMON_NAME, "broad"),
            (OID_ORGANIZATION_NAME, "org"),
            (OID_COMMON_NAME, "specific.example.com"),
        ]);

        let name = Name::from_der_object(&obj).unwrap();
        assert_eq!(name.common_names(), vec!["broad", "specific.example.com"]);
        assert_eq!(
            name.most_specific_common_name(),
            Some("specific.example.com")
        );
    }

    #[test]
    fn equality_by_encoding() {
        let a = Name::from_der_object(&build_name(&[(OID_COMMON_NAME, "a")])).unwrap();
        let a2 = Name::from_der_object(&build_name(&[(OID_COMMON_NAME, "a")])).unwrap();
        let b = Name::from_der_object(&build_name(&[(OID_COMMON_NAME, "b")])).unwrap();

        assert_eq!(a, a2);
        assert_ne!(a, b);
    }

    #[test]
    fn empty_name_allowed() {
        let name = Name::from_der_object(&DerObject::sequence(vec![])).unwrap();
        assert!(name.rdns().is_empty());
        assert_eq!(name.most_specific_common_name(), None);
    }
}
