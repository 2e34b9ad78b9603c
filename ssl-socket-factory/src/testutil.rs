// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Test fixtures: keys and certificates generated through the platform
//! provider, parsed back through this workspace's own parsers.

use {
    openssl::{
        asn1::Asn1Time,
        bn::BigNum,
        hash::MessageDigest,
        pkey::{PKey, PKeyRef, Private},
        rsa::Rsa,
        x509::{
            extension::SubjectAlternativeName, X509Builder, X509NameBuilder, X509,
        },
    },
    x509_der::{pem::iter_blocks, PrivateKeyInfo},
};

pub(crate) struct Identity {
    pub openssl_key: PKey<Private>,
    pub key: PrivateKeyInfo,
    pub cert_der: Vec<u8>,
}

pub(crate) fn rsa_key() -> PKey<Private> {
    let rsa = Rsa::generate(2048).expect("RSA generation");
    PKey::from_rsa(rsa).expect("PKey wrap")
}

/// Convert a platform key into this workspace's [PrivateKeyInfo] by way
/// of PEM PKCS#8, exercising the frame reader along the way.
pub(crate) fn private_key_info(key: &PKeyRef<Private>) -> PrivateKeyInfo {
    let pem = key.private_key_to_pem_pkcs8().expect("PKCS#8 PEM");

    let block = iter_blocks(&pem)
        .next()
        .expect("one PEM block")
        .expect("valid PEM");

    PrivateKeyInfo::from_pkcs8_der(&block.der).expect("PKCS#8 parse")
}

pub(crate) struct CertSpec<'a> {
    pub subject_cn: &'a str,
    pub issuer_cn: &'a str,
    pub serial: u32,
    pub san_dns: Vec<&'a str>,
    pub san_ips: Vec<&'a str>,
}

impl Default for CertSpec<'_> {
    fn default() -> Self {
        Self {
            subject_cn: "localhost",
            issuer_cn: "localhost",
            serial: 1,
            san_dns: Vec::new(),
            san_ips: Vec::new(),
        }
    }
}

pub(crate) fn build_cert(
    spec: &CertSpec<'_>,
    public_key: &PKeyRef<Private>,
    signing_key: &PKeyRef<Private>,
) -> X509 {
    let mut builder = X509Builder::new().expect("builder");
    builder.set_version(2).expect("version");

    let serial = BigNum::from_u32(spec.serial)
        .and_then(|bn| bn.to_asn1_integer())
        .expect("serial");
    builder.set_serial_number(&serial).expect("serial");

    let mut subject = X509NameBuilder::new().expect("name builder");
    subject
        .append_entry_by_text("CN", spec.subject_cn)
        .expect("subject CN");
    let subject = subject.build();
    builder.set_subject_name(&subject).expect("subject");

    let mut issuer = X509NameBuilder::new().expect("name builder");
    issuer
        .append_entry_by_text("CN", spec.issuer_cn)
        .expect("issuer CN");
    let issuer = issuer.build();
    builder.set_issuer_name(&issuer).expect("issuer");

    builder.set_pubkey(public_key).expect("pubkey");

    let not_before = Asn1Time::days_from_now(0).expect("time");
    builder.set_not_before(&not_before).expect("notBefore");
    let not_after = Asn1Time::days_from_now(365).expect("time");
    builder.set_not_after(&not_after).expect("notAfter");

    if !spec.san_dns.is_empty() || !spec.san_ips.is_empty() {
        let mut san = SubjectAlternativeName::new();
        for name in &spec.san_dns {
            san.dns(name);
        }
        for ip in &spec.san_ips {
            san.ip(ip);
        }
        let extension = san
            .build(&builder.x509v3_context(None, None))
            .expect("SAN");
        builder.append_extension(extension).expect("extension");
    }

    builder
        .sign(signing_key, MessageDigest::sha256())
        .expect("sign");

    builder.build()
}

/// A fresh self-signed RSA identity.
pub(crate) fn rsa_identity(cn: &str) -> Identity {
    rsa_identity_with_san(cn, &[], &[])
}

pub(crate) fn rsa_identity_with_san(cn: &str, san_dns: &[&str], san_ips: &[&str]) -> Identity {
    let openssl_key = rsa_key();
    let cert = build_cert(
        &CertSpec {
            subject_cn: cn,
            issuer_cn: cn,
            san_dns: san_dns.to_vec(),
            san_ips: san_ips.to_vec(),
            ..Default::default()
        },
        &openssl_key,
        &openssl_key,
    );

    Identity {
        key: private_key_info(&openssl_key),
        cert_der: cert.to_der().expect("cert DER"),
        openssl_key,
    }
}

pub(crate) fn self_signed_cert_der(cn: &str) -> Vec<u8> {
    rsa_identity(cn).cert_der
}

/// Key material for an identity, by way of PEM.
pub(crate) fn key_material(identity: &Identity) -> crate::KeyMaterial {
    let cert_pem = x509_der::X509Certificate::from_der(&identity.cert_der)
        .expect("cert parse")
        .encode_pem();
    let key_pem = identity
        .openssl_key
        .private_key_to_pem_pkcs8()
        .expect("key PEM");

    crate::KeyMaterial::from_pem(cert_pem.as_bytes(), &key_pem, None).expect("key material")
}

/// Build CRL DER for the given issuer, listing the given serials.
///
/// The issuer name DER is spliced in verbatim so issuer comparisons
/// against certificates parsed from the same source always line up.
pub(crate) fn build_crl(
    issuer: &x509_der::Name,
    serials: &[i64],
    next_update: Option<&[u8]>,
) -> x509_der::CertificateList {
    use x509_der::{
        der::{DerObject, Tag},
        Oid,
    };

    let algorithm = DerObject::sequence(vec![
        DerObject::oid(&Oid::new(vec![1, 2, 840, 113549, 1, 1, 11]).unwrap()),
        DerObject::null(),
    ]);

    let mut tbs = vec![
        DerObject::integer(1),
        algorithm.clone(),
        DerObject::decode(issuer.as_der()).expect("issuer name DER"),
        DerObject::primitive(Tag::UTC_TIME, b"200101000000Z".to_vec()),
    ];

    if let Some(time) = next_update {
        tbs.push(DerObject::primitive(Tag::UTC_TIME, time.to_vec()));
    }

    if !serials.is_empty() {
        tbs.push(DerObject::sequence(
            serials
                .iter()
                .map(|serial| {
                    DerObject::sequence(vec![
                        DerObject::integer(*serial),
                        DerObject::primitive(Tag::UTC_TIME, b"200601000000Z".to_vec()),
                    ])
                })
                .collect(),
        ));
    }

    let der = DerObject::sequence(vec![
        DerObject::sequence(tbs),
        algorithm,
        DerObject::bit_string(0, &[0x00]),
    ])
    .encode();

    x509_der::CertificateList::from_der(&der).expect("CRL parse")
}

/// Wrap a PKCS#8 key into an EncryptedPrivateKeyInfo protected by the
/// JKS key protector.
pub(crate) fn jks_epki(pkcs8: &[u8], password: &str) -> Vec<u8> {
    use x509_der::{der::DerObject, oid::Oid};

    let salt = [0x5a; 20];
    let protected = crate::pbe::jks_protector_encrypt(password, &salt, pkcs8).expect("protector");

    DerObject::sequence(vec![
        DerObject::sequence(vec![
            DerObject::oid(&Oid::new(crate::pbe::OID_JKS_KEY_PROTECTOR.to_vec()).unwrap()),
            DerObject::null(),
        ]),
        DerObject::octet_string(protected),
    ])
    .encode()
}

/// A two-certificate chain: (leaf key, leaf DER, root DER).
pub(crate) fn chained_identity(leaf_cn: &str, root_cn: &str) -> (PrivateKeyInfo, Vec<u8>, Vec<u8>) {
    let root_key = rsa_key();
    let root = build_cert(
        &CertSpec {
            subject_cn: root_cn,
            issuer_cn: root_cn,
            serial: 10,
            ..Default::default()
        },
        &root_key,
        &root_key,
    );

    let leaf_key = rsa_key();
    let leaf = build_cert(
        &CertSpec {
            subject_cn: leaf_cn,
            issuer_cn: root_cn,
            serial: 11,
            ..Default::default()
        },
        &leaf_key,
        &root_key,
    );

    (
        private_key_info(&leaf_key),
        leaf.to_der().expect("leaf DER"),
        root.to_der().expect("root DER"),
    )
}
