// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! High-level interface to X.509 certificates.

use {
    crate::{
        der::{strip_leading_zeros, Class, DerObject, Tag},
        name::Name,
        oid::{Oid, OID_DSA, OID_EC_PUBLIC_KEY, OID_RSA_ENCRYPTION, OID_SUBJECT_ALT_NAME},
        pem::{iter_blocks, PemLabel},
        time::parse_time,
        X509DerError as Error,
    },
    bytes::Bytes,
    chrono::{DateTime, Utc},
    std::{
        cmp::Ordering,
        fmt::{Debug, Formatter},
        hash::{Hash, Hasher},
    },
};

/// The subjectPublicKeyInfo of a certificate.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubjectPublicKeyInfo {
    pub algorithm: Oid,
    pub parameters: Option<DerObject>,
    /// Content of the subjectPublicKey BIT STRING.
    pub public_key: Bytes,
}

/// A single certificate extension, value left opaque.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Extension {
    pub oid: Oid,
    pub critical: bool,
    pub value: Bytes,
}

/// The subset of GeneralName this library consumes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum GeneralName {
    Rfc822Name(String),
    DnsName(String),
    UniformResourceIdentifier(String),
    IpAddress(Vec<u8>),
    /// A variant this library does not interpret; the context tag number
    /// is retained.
    Other(u32),
}

/// A parsed X.509 certificate.
///
/// Instances retain the DER they were constructed from; equality and
/// hashing operate on those bytes.
#[derive(Clone)]
pub struct X509Certificate {
    der: Bytes,
    version: u32,
    serial: Bytes,
    signature_algorithm: Oid,
    issuer: Name,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    subject: Name,
    subject_public_key_info: SubjectPublicKeyInfo,
    extensions: Vec<Extension>,
}

impl X509Certificate {
    /// Construct an instance by parsing DER encoded ASN.1 data.
    pub fn from_der(data: impl AsRef<[u8]>) -> Result<Self, Error> {
        let der = data.as_ref();
        let root = DerObject::decode(der)?;

        Self::from_der_object(&root, Bytes::copy_from_slice(der))
    }

    /// Construct an instance from PEM armored data containing a single
    /// `CERTIFICATE` block.
    pub fn from_pem(data: impl AsRef<[u8]>) -> Result<Self, Error> {
        for block in iter_blocks(data.as_ref()) {
            let block = block?;
            if matches!(block.label, PemLabel::Certificate | PemLabel::Der) {
                return Self::from_der(&block.der);
            }
        }

        Err(Error::CertificateInvalid(
            "no CERTIFICATE block in input".to_string(),
        ))
    }

    /// Construct instances from input with potentially multiple
    /// `CERTIFICATE` blocks. Blocks with other labels are ignored.
    pub fn from_pem_multiple(data: impl AsRef<[u8]>) -> Result<Vec<Self>, Error> {
        iter_blocks(data.as_ref())
            .filter_map(|block| match block {
                Ok(block) if matches!(block.label, PemLabel::Certificate | PemLabel::Der) => {
                    Some(Self::from_der(&block.der))
                }
                Ok(_) => None,
                Err(err) => Some(Err(err)),
            })
            .collect()
    }

    fn from_der_object(root: &DerObject, der: Bytes) -> Result<Self, Error> {
        let invalid = |what: &str| Error::CertificateInvalid(what.to_string());

        let outer = root.as_sequence()?;
        if outer.len() != 3 {
            return Err(invalid("Certificate must have three fields"));
        }

        let tbs = outer[0].as_sequence()?;
        let mut fields = tbs.iter().peekable();

        // version [0] EXPLICIT INTEGER DEFAULT v1
        let mut version = 1;
        if let Some(first) = fields.peek().copied() {
            if first.tag() == Tag::context(0) {
                fields.next();

                let raw = first
                    .children()?
                    .first()
                    .ok_or_else(|| invalid("empty version wrapper"))?
                    .as_u64()?;
                version = u32::try_from(raw)
                    .ok()
                    .and_then(|v| v.checked_add(1))
                    .ok_or_else(|| invalid("version out of range"))?;
            }
        }

        let serial = fields
            .next()
            .ok_or_else(|| invalid("missing serialNumber"))?
            .as_integer_bytes()?
            .clone();

        let signature_algorithm = algorithm_identifier(
            fields.next().ok_or_else(|| invalid("missing signature"))?,
        )?
        .0;

        let issuer =
            Name::from_der_object(fields.next().ok_or_else(|| invalid("missing issuer"))?)?;

        let validity = fields
            .next()
            .ok_or_else(|| invalid("missing validity"))?
            .as_sequence()?;
        if validity.len() != 2 {
            return Err(invalid("validity must have two times"));
        }
        let not_before = parse_time(&validity[0])?;
        let not_after = parse_time(&validity[1])?;

        let subject =
            Name::from_der_object(fields.next().ok_or_else(|| invalid("missing subject"))?)?;

        let spki = fields
            .next()
            .ok_or_else(|| invalid("missing subjectPublicKeyInfo"))?;
        let spki_fields = spki.as_sequence()?;
        if spki_fields.len() != 2 {
            return Err(invalid("subjectPublicKeyInfo must have two fields"));
        }
        let (algorithm, parameters) = algorithm_identifier(&spki_fields[0])?;
        let subject_public_key_info = SubjectPublicKeyInfo {
            algorithm,
            parameters,
            public_key: spki_fields[1].as_bit_string()?,
        };

        // issuerUniqueID [1], subjectUniqueID [2] are skipped;
        // extensions [3] EXPLICIT when present.
        let mut extensions = Vec::new();
        for field in fields {
            if field.tag() == Tag::context(3) {
                let wrapper = field.children()?;
                let list = wrapper
                    .first()
                    .ok_or_else(|| invalid("empty extensions wrapper"))?
                    .as_sequence()?;

                for extension in list {
                    extensions.push(parse_extension(extension)?);
                }
            }
        }

        Ok(Self {
            der,
            version,
            serial,
            signature_algorithm,
            issuer,
            not_before,
            not_after,
            subject,
            subject_public_key_info,
            extensions,
        })
    }

    /// The DER data this certificate was constructed from.
    pub fn as_der(&self) -> &[u8] {
        &self.der
    }

    /// Encode the original certificate data to PEM.
    pub fn encode_pem(&self) -> String {
        ::pem::encode(&::pem::Pem {
            tag: "CERTIFICATE".to_string(),
            contents: self.der.to_vec(),
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Serial number content octets, minimally normalized for comparison.
    pub fn serial(&self) -> &[u8] {
        strip_leading_zeros(&self.serial)
    }

    pub fn signature_algorithm(&self) -> &Oid {
        &self.signature_algorithm
    }

    pub fn issuer(&self) -> &Name {
        &self.issuer
    }

    pub fn subject(&self) -> &Name {
        &self.subject
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    pub fn subject_public_key_info(&self) -> &SubjectPublicKeyInfo {
        &self.subject_public_key_info
    }

    /// Raw data constituting this certificate's public key.
    pub fn public_key_data(&self) -> &Bytes {
        &self.subject_public_key_info.public_key
    }

    pub fn extensions(&self) -> &[Extension] {
        &self.extensions
    }

    pub fn extension(&self, oid: &[u64]) -> Option<&Extension> {
        self.extensions.iter().find(|ext| ext.oid == *oid)
    }

    /// The most specific commonName of the subject.
    pub fn subject_common_name(&self) -> Option<&str> {
        self.subject.most_specific_common_name()
    }

    /// Entries of the subjectAltName extension, empty when absent.
    pub fn subject_alt_names(&self) -> Result<Vec<GeneralName>, Error> {
        let extension = match self.extension(OID_SUBJECT_ALT_NAME) {
            Some(extension) => extension,
            None => return Ok(Vec::new()),
        };

        let mut names = Vec::new();
        for child in DerObject::decode(&extension.value)?.as_sequence()? {
            names.push(parse_general_name(child)?);
        }

        Ok(names)
    }

    /// RSA modulus magnitude, when this is an RSA public key.
    pub fn rsa_modulus(&self) -> Result<Option<Bytes>, Error> {
        if self.subject_public_key_info.algorithm != OID_RSA_ENCRYPTION {
            return Ok(None);
        }

        // RSAPublicKey ::= SEQUENCE { modulus INTEGER, publicExponent INTEGER }
        let key = DerObject::decode(&self.subject_public_key_info.public_key)?;
        let fields = key.as_sequence()?;
        let modulus = fields
            .first()
            .ok_or_else(|| Error::CertificateInvalid("empty RSAPublicKey".to_string()))?
            .as_integer_bytes()?;

        Ok(Some(Bytes::copy_from_slice(strip_leading_zeros(modulus))))
    }

    /// DSA domain parameters (p, q, g), when this is a DSA public key.
    pub fn dsa_parameters(&self) -> Result<Option<(Bytes, Bytes, Bytes)>, Error> {
        if self.subject_public_key_info.algorithm != OID_DSA {
            return Ok(None);
        }

        let parameters = self
            .subject_public_key_info
            .parameters
            .as_ref()
            .ok_or_else(|| Error::CertificateInvalid("DSA key without parameters".to_string()))?;

        let fields = parameters.as_sequence()?;
        if fields.len() != 3 {
            return Err(Error::CertificateInvalid(
                "DSA parameters must be (p, q, g)".to_string(),
            ));
        }

        let grab = |i: usize| -> Result<Bytes, Error> {
            Ok(Bytes::copy_from_slice(strip_leading_zeros(
                fields[i].as_integer_bytes()?,
            )))
        };

        Ok(Some((grab(0)?, grab(1)?, grab(2)?)))
    }

    /// Named curve OID, when this is an EC public key with one.
    pub fn ec_curve(&self) -> Option<Oid> {
        if self.subject_public_key_info.algorithm != OID_EC_PUBLIC_KEY {
            return None;
        }

        self.subject_public_key_info
            .parameters
            .as_ref()
            .and_then(|parameters| parameters.as_oid().ok())
    }

    /// Identity of this certificate when used as a trust anchor:
    /// (subject DN encoding, public key bytes).
    pub fn anchor_identity(&self) -> (&[u8], &[u8]) {
        (
            self.subject.as_der(),
            &self.subject_public_key_info.public_key,
        )
    }

    /// Compare 2 instances, sorting them so the issuer comes before the
    /// issued. Performs a strict compare of the encoded names.
    pub fn compare_issuer(&self, other: &Self) -> Ordering {
        if self.subject == self.issuer {
            // Self signed certificate has no ordering.
            Ordering::Equal
        } else if self.issuer == other.subject {
            // We were issued by the other certificate. The issuer comes first.
            Ordering::Greater
        } else if self.subject == other.issuer {
            // We issued the other certificate. We come first.
            Ordering::Less
        } else {
            Ordering::Equal
        }
    }

    /// Whether the subject name is also the issuer's name.
    pub fn subject_is_issuer(&self) -> bool {
        self.subject == self.issuer
    }
}

impl Debug for X509Certificate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("X509Certificate")
            .field("subject", &format_args!("{}", self.subject))
            .field("issuer", &format_args!("{}", self.issuer))
            .field("serial", &format_args!("{}", hex_lower(&self.serial)))
            .finish()
    }
}

impl PartialEq for X509Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for X509Certificate {}

impl Hash for X509Certificate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.der.hash(state);
    }
}

fn hex_lower(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Parse an AlgorithmIdentifier, returning the OID and any parameters.
///
/// A NULL parameter is normalized to absent.
pub fn algorithm_identifier(obj: &DerObject) -> Result<(Oid, Option<DerObject>), Error> {
    let fields = obj.as_sequence()?;

    let oid = fields
        .first()
        .ok_or_else(|| Error::malformed("empty AlgorithmIdentifier"))?
        .as_oid()?;

    let parameters = match fields.get(1) {
        Some(parameter) if !parameter.is_null() => Some(parameter.clone()),
        _ => None,
    };

    Ok((oid, parameters))
}

fn parse_extension(obj: &DerObject) -> Result<Extension, Error> {
    let fields = obj.as_sequence()?;

    let oid = fields
        .first()
        .ok_or_else(|| Error::CertificateInvalid("empty Extension".to_string()))?
        .as_oid()?;

    let mut critical = false;
    let mut index = 1;

    if let Some(flag) = fields.get(index) {
        if flag.tag() == Tag::BOOLEAN {
            critical = flag.as_bool()?;
            index += 1;
        }
    }

    let value = fields
        .get(index)
        .ok_or_else(|| Error::CertificateInvalid("Extension missing value".to_string()))?
        .as_octet_string()?
        .clone();

    Ok(Extension {
        oid,
        critical,
        value,
    })
}

fn parse_general_name(obj: &DerObject) -> Result<GeneralName, Error> {
    let tag = obj.tag();

    if tag.class != Class::Context {
        return Err(Error::malformed(format!(
            "unexpected GeneralName tag {:?}",
            tag
        )));
    }

    let text = |obj: &DerObject| -> Result<String, Error> {
        let bytes = obj.primitive_bytes()?;
        if bytes.iter().any(|b| !b.is_ascii()) {
            return Err(Error::malformed("GeneralName contains non-ASCII bytes"));
        }
        Ok(String::from_utf8_lossy(bytes).into_owned())
    };

    Ok(match tag.number {
        1 => GeneralName::Rfc822Name(text(obj)?),
        2 => GeneralName::DnsName(text(obj)?),
        6 => GeneralName::UniformResourceIdentifier(text(obj)?),
        7 => GeneralName::IpAddress(obj.primitive_bytes()?.to_vec()),
        number => GeneralName::Other(number),
    })
}

#[cfg(test)]
pub(crate) mod testcert {
    //! Construction of certificate DER for tests, via the crate's own
    //! encoder.

    use {
        super::*,
        crate::{name::build_name, oid::OID_COMMON_NAME},
    };

    pub(crate) struct CertSpec<'a> {
        pub subject_cn: &'a str,
        pub issuer_cn: &'a str,
        pub serial: i64,
        pub san: Vec<DerObject>,
        pub spki_algorithm: &'a [u64],
        pub spki_parameters: Option<DerObject>,
        pub public_key: Vec<u8>,
    }

    impl Default for CertSpec<'_> {
        fn default() -> Self {
            Self {
                subject_cn: "localhost",
                issuer_cn: "localhost",
                serial: 1,
                san: Vec::new(),
                spki_algorithm: OID_RSA_ENCRYPTION,
                spki_parameters: None,
                public_key: DerObject::sequence(vec![
                    DerObject::integer_from_unsigned(&[0xc0, 0xff, 0xee]),
                    DerObject::integer(65537),
                ])
                .encode(),
            }
        }
    }

    pub(crate) fn dns(name: &str) -> DerObject {
        DerObject::primitive(Tag::context_primitive(2), name.as_bytes().to_vec())
    }

    pub(crate) fn ip(addr: &[u8]) -> DerObject {
        DerObject::primitive(Tag::context_primitive(7), addr.to_vec())
    }

    pub(crate) fn build(spec: CertSpec<'_>) -> Vec<u8> {
        let algorithm = DerObject::sequence(vec![
            DerObject::oid(&Oid::new(spec.spki_algorithm.to_vec()).unwrap()),
            spec.spki_parameters.unwrap_or_else(DerObject::null),
        ]);

        let validity = DerObject::sequence(vec![
            DerObject::primitive(Tag::UTC_TIME, b"200101000000Z".to_vec()),
            DerObject::primitive(Tag::GENERALIZED_TIME, b"20491231235959Z".to_vec()),
        ]);

        let mut tbs = vec![
            DerObject::explicit(0, DerObject::integer(2)),
            DerObject::integer(spec.serial),
            signature_algorithm(),
            build_name(&[(OID_COMMON_NAME, spec.issuer_cn)]),
            validity,
            build_name(&[(OID_COMMON_NAME, spec.subject_cn)]),
            DerObject::sequence(vec![algorithm, DerObject::bit_string(0, &spec.public_key)]),
        ];

        if !spec.san.is_empty() {
            let san_value = DerObject::sequence(spec.san).encode();
            let extension = DerObject::sequence(vec![
                DerObject::oid(&Oid::new(OID_SUBJECT_ALT_NAME.to_vec()).unwrap()),
                DerObject::octet_string(san_value),
            ]);
            tbs.push(DerObject::explicit(
                3,
                DerObject::sequence(vec![extension]),
            ));
        }

        DerObject::sequence(vec![
            DerObject::sequence(tbs),
            signature_algorithm(),
            DerObject::bit_string(0, &[0x00]),
        ])
        .encode()
    }

    fn signature_algorithm() -> DerObject {
        // sha256WithRSAEncryption
        let oid = Oid::new(vec![1, 2, 840, 113549, 1, 1, 11]).unwrap();
        DerObject::sequence(vec![DerObject::oid(&oid), DerObject::null()])
    }
}

#[cfg(test)]
mod test {
    use {super::testcert::*, super::*};

    #[test]
    fn parse_basic_fields() {
        let der = build(CertSpec {
            subject_cn: "server.example.com",
            issuer_cn: "Test Root",
            serial: 0x1234,
            ..Default::default()
        });

        let cert = X509Certificate::from_der(&der).unwrap();
        assert_eq!(cert.version(), 3);
        assert_eq!(cert.serial(), &[0x12, 0x34]);
        assert_eq!(cert.subject_common_name(), Some("server.example.com"));
        assert_eq!(cert.issuer().most_specific_common_name(), Some("Test Root"));
        assert!(cert.not_before() < cert.not_after());
        assert!(!cert.subject_is_issuer());
        assert_eq!(cert.as_der(), &der[..]);
    }

    #[test]
    fn pem_round_trip() {
        let der = build(CertSpec::default());
        let cert = X509Certificate::from_der(&der).unwrap();

        let pem = cert.encode_pem();
        let reparsed = X509Certificate::from_pem(pem.as_bytes()).unwrap();
        assert_eq!(reparsed, cert);

        let twice = format!("{}{}", pem, pem);
        assert_eq!(X509Certificate::from_pem_multiple(twice.as_bytes()).unwrap().len(), 2);
    }

    #[test]
    fn subject_alt_names() {
        let der = build(CertSpec {
            san: vec![dns("a.example.com"), dns("*.b.example.com"), ip(&[10, 0, 0, 1])],
            ..Default::default()
        });

        let cert = X509Certificate::from_der(&der).unwrap();
        let names = cert.subject_alt_names().unwrap();

        assert_eq!(
            names,
            vec![
                GeneralName::DnsName("a.example.com".to_string()),
                GeneralName::DnsName("*.b.example.com".to_string()),
                GeneralName::IpAddress(vec![10, 0, 0, 1]),
            ]
        );
    }

    #[test]
    fn no_san_is_empty() {
        let der = build(CertSpec::default());
        let cert = X509Certificate::from_der(&der).unwrap();
        assert!(cert.subject_alt_names().unwrap().is_empty());
    }

    #[test]
    fn rsa_modulus_extraction() {
        let der = build(CertSpec::default());
        let cert = X509Certificate::from_der(&der).unwrap();

        let modulus = cert.rsa_modulus().unwrap().unwrap();
        assert_eq!(modulus.as_ref(), &[0xc0, 0xff, 0xee]);
        assert!(cert.dsa_parameters().unwrap().is_none());
        assert!(cert.ec_curve().is_none());
    }

    #[test]
    fn dsa_parameter_extraction() {
        let parameters = DerObject::sequence(vec![
            DerObject::integer_from_unsigned(&[0x89, 0x01]),
            DerObject::integer_from_unsigned(&[0x07]),
            DerObject::integer_from_unsigned(&[0x02]),
        ]);

        let der = build(CertSpec {
            spki_algorithm: OID_DSA,
            spki_parameters: Some(parameters),
            public_key: DerObject::integer_from_unsigned(&[0x11]).encode(),
            ..Default::default()
        });

        let cert = X509Certificate::from_der(&der).unwrap();
        let (p, q, g) = cert.dsa_parameters().unwrap().unwrap();
        assert_eq!(p.as_ref(), &[0x89, 0x01]);
        assert_eq!(q.as_ref(), &[0x07]);
        assert_eq!(g.as_ref(), &[0x02]);
        assert!(cert.rsa_modulus().unwrap().is_none());
    }

    #[test]
    fn issuer_ordering() {
        let root = X509Certificate::from_der(&build(CertSpec {
            subject_cn: "root",
            issuer_cn: "root",
            ..Default::default()
        }))
        .unwrap();
        let leaf = X509Certificate::from_der(&build(CertSpec {
            subject_cn: "leaf",
            issuer_cn: "root",
            ..Default::default()
        }))
        .unwrap();

        assert!(root.subject_is_issuer());
        assert_eq!(leaf.compare_issuer(&root), Ordering::Greater);
        assert_eq!(root.compare_issuer(&leaf), Ordering::Equal);
    }

    #[test]
    fn truncated_certificate_rejected() {
        let der = build(CertSpec::default());
        assert!(X509Certificate::from_der(&der[..der.len() - 4]).is_err());
        assert!(X509Certificate::from_der(&[0x30, 0x00]).is_err());
    }
}
