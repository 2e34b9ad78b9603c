// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hostname verification against a peer certificate.
//!
//! The rules: dNSName subjectAltName entries take precedence and, when
//! any are present, the CN is ignored. Otherwise the most specific CN is
//! the candidate. A wildcard covers exactly one leftmost label.
//! IP-literal hostnames match only iPAddress entries, by byte equality.
//!
//! Verification is pure; callers supply the peer chain after the
//! handshake.

use {
    crate::SslError as Error,
    std::net::IpAddr,
    x509_der::{GeneralName, X509Certificate},
};

/// Verify `hostname` against the connected peer's certificate.
pub fn verify_hostname(hostname: &str, certificate: &X509Certificate) -> Result<(), Error> {
    let names = certificate.subject_alt_names()?;

    if let Ok(ip) = hostname.parse::<IpAddr>() {
        return verify_ip(hostname, ip, &names);
    }

    let dns_names = names
        .iter()
        .filter_map(|name| match name {
            GeneralName::DnsName(dns) => Some(dns.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>();

    let candidates = if dns_names.is_empty() {
        certificate
            .subject_common_name()
            .map(|cn| vec![cn])
            .unwrap_or_default()
    } else {
        dns_names
    };

    if candidates
        .iter()
        .any(|candidate| matches_pattern(candidate, hostname))
    {
        return Ok(());
    }

    Err(mismatch(hostname, &candidates))
}

fn verify_ip(hostname: &str, ip: IpAddr, names: &[GeneralName]) -> Result<(), Error> {
    let expected: Vec<u8> = match ip {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    };

    let mut actual = Vec::new();
    for name in names {
        if let GeneralName::IpAddress(bytes) = name {
            if *bytes == expected {
                return Ok(());
            }
            actual.push(format_ip(bytes));
        }
    }

    Err(Error::HostnameMismatch {
        expected: hostname.to_string(),
        actual,
    })
}

fn format_ip(bytes: &[u8]) -> String {
    match bytes.len() {
        4 => IpAddr::from([bytes[0], bytes[1], bytes[2], bytes[3]]).to_string(),
        16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(bytes);
            IpAddr::from(octets).to_string()
        }
        _ => bytes.iter().map(|b| format!("{:02x}", b)).collect(),
    }
}

fn mismatch(hostname: &str, candidates: &[&str]) -> Error {
    Error::HostnameMismatch {
        expected: hostname.to_string(),
        actual: candidates.iter().map(|name| name.to_string()).collect(),
    }
}

/// Case-insensitive match with the single leftmost-label wildcard rule:
/// `*.example.com` covers `a.example.com` but neither `example.com` nor
/// `a.b.example.com`. A `*` anywhere else never matches.
fn matches_pattern(pattern: &str, hostname: &str) -> bool {
    let pattern = pattern.to_ascii_lowercase();
    let hostname = hostname.to_ascii_lowercase();

    match pattern.strip_prefix("*.") {
        Some(tail) => {
            if tail.contains('*') {
                return false;
            }
            match hostname.split_once('.') {
                Some((label, rest)) => !label.is_empty() && rest == tail,
                None => false,
            }
        }
        None => !pattern.contains('*') && pattern == hostname,
    }
}

#[cfg(test)]
mod test {
    use {super::*, crate::testutil, x509_der::X509Certificate};

    fn cert_with(cn: &str, san_dns: &[&str], san_ips: &[&str]) -> X509Certificate {
        let identity = testutil::rsa_identity_with_san(cn, san_dns, san_ips);
        X509Certificate::from_der(&identity.cert_der).unwrap()
    }

    #[test]
    fn wildcard_covers_exactly_one_label() {
        let cert = cert_with("ignored", &["*.example.com"], &[]);

        assert!(verify_hostname("a.example.com", &cert).is_ok());
        assert!(verify_hostname("A.EXAMPLE.COM", &cert).is_ok());
        assert!(verify_hostname("example.com", &cert).is_err());
        assert!(verify_hostname("a.b.example.com", &cert).is_err());
    }

    #[test]
    fn wildcard_only_leftmost() {
        let cert = cert_with("ignored", &["a.*.example.com", "b.example.*"], &[]);

        assert!(verify_hostname("a.b.example.com", &cert).is_err());
        assert!(verify_hostname("b.example.com", &cert).is_err());
    }

    #[test]
    fn san_present_ignores_cn() {
        let cert = cert_with("cn.example.com", &["san.example.com"], &[]);

        assert!(verify_hostname("san.example.com", &cert).is_ok());

        let err = verify_hostname("cn.example.com", &cert).unwrap_err();
        match err {
            Error::HostnameMismatch { expected, actual } => {
                assert_eq!(expected, "cn.example.com");
                assert_eq!(actual, vec!["san.example.com"]);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn cn_fallback_without_san() {
        let cert = cert_with("www.example.com", &[], &[]);

        assert!(verify_hostname("www.example.com", &cert).is_ok());
        assert!(verify_hostname("WWW.example.COM", &cert).is_ok());
        assert!(verify_hostname("other.example.com", &cert).is_err());
    }

    #[test]
    fn ip_literals_match_ip_sans_only() {
        let cert = cert_with("10.0.0.1", &[], &["10.0.0.1"]);

        assert!(verify_hostname("10.0.0.1", &cert).is_ok());
        assert!(verify_hostname("10.0.0.2", &cert).is_err());

        // A CN that happens to spell the IP is not consulted.
        let cn_only = cert_with("10.0.0.1", &[], &[]);
        assert!(verify_hostname("10.0.0.1", &cn_only).is_err());
    }

    #[test]
    fn ipv6_byte_equality() {
        let cert = cert_with("ignored", &[], &["2001:db8::1"]);

        assert!(verify_hostname("2001:db8::1", &cert).is_ok());
        assert!(verify_hostname("2001:db8::2", &cert).is_err());
    }

    #[test]
    fn no_names_at_all() {
        let identity = testutil::rsa_identity_with_san("only-cn", &[], &[]);
        let cert = X509Certificate::from_der(&identity.cert_der).unwrap();

        // "only-cn" is not a wildcard and not the queried host.
        assert!(verify_hostname("example.com", &cert).is_err());
    }
}
