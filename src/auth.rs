// ABOUTME: Peer identity checks for TLS sessions: fingerprints and wildcard name patterns
// ABOUTME: Compiles permitted-peer patterns once and matches certificate SAN/CN names against them

use crate::error::{RelpError, RelpResult};
use sha1::{Digest, Sha1};
use x509_cert::Certificate;
use x509_cert::der::asn1::{Ia5StringRef, ObjectIdentifier, PrintableStringRef, Utf8StringRef};
use x509_cert::der::Decode;
use x509_cert::ext::pkix::SubjectAltName;
use x509_cert::ext::pkix::name::GeneralName;

const OID_CN: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");
const OID_SUBJECT_ALT_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.17");

/// One component of a compiled wildcard pattern.
///
/// A dotted pattern is compiled component by component; the asterisk is only
/// meaningful at the start or end of a component (or alone). Anything else is
/// rejected at configuration time.
#[derive(Debug, Clone, PartialEq, Eq)]
enum WildcardComp {
    /// Plain component, must match exactly.
    Literal(String),
    /// `*foo` - component must end with the given suffix.
    Suffix(String),
    /// `foo*` - component must start with the given prefix.
    Prefix(String),
    /// Bare `*` - matches any single component (never more than one).
    Any,
    /// Empty component, e.g. from a trailing dot. Matches only empty.
    Empty,
}

fn compile_component(comp: &str) -> RelpResult<WildcardComp> {
    if comp.is_empty() {
        return Ok(WildcardComp::Empty);
    }
    if comp == "*" {
        return Ok(WildcardComp::Any);
    }
    if let Some(rest) = comp.strip_prefix('*') {
        if rest.contains('*') {
            return Err(RelpError::InvalidWildcard(comp.to_string()));
        }
        return Ok(WildcardComp::Suffix(rest.to_string()));
    }
    if let Some(head) = comp.strip_suffix('*') {
        if head.contains('*') {
            return Err(RelpError::InvalidWildcard(comp.to_string()));
        }
        return Ok(WildcardComp::Prefix(head.to_string()));
    }
    if comp.contains('*') {
        return Err(RelpError::InvalidWildcard(comp.to_string()));
    }
    Ok(WildcardComp::Literal(comp.to_string()))
}

/// A single permitted-peer entry, pre-compiled at configuration time.
#[derive(Debug, Clone)]
pub struct PeerPattern {
    raw: String,
    /// `None` for plain entries (fingerprints and literal names), which
    /// compare by string equality.
    comps: Option<Vec<WildcardComp>>,
}

impl PeerPattern {
    pub fn compile(pattern: &str) -> RelpResult<PeerPattern> {
        let comps = if pattern.contains('*') {
            Some(
                pattern
                    .split('.')
                    .map(compile_component)
                    .collect::<RelpResult<Vec<_>>>()?,
            )
        } else {
            None
        };
        Ok(PeerPattern {
            raw: pattern.to_string(),
            comps,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.raw
    }

    /// Match a candidate name, walking candidate and pattern components in
    /// lockstep. A bare `*` absorbs exactly one component.
    pub fn matches_name(&self, name: &str) -> bool {
        let Some(comps) = &self.comps else {
            return self.raw == name;
        };

        // a trailing dot on the candidate denotes the domain root, it does
        // not introduce a component of its own
        let name = name.strip_suffix('.').unwrap_or(name);

        let mut pi = 0;
        for nc in name.split('.') {
            let Some(comp) = comps.get(pi) else {
                // candidate has more components than the pattern
                return false;
            };
            let ok = match comp {
                WildcardComp::Literal(s) => s == nc,
                WildcardComp::Suffix(s) => nc.ends_with(s.as_str()),
                WildcardComp::Prefix(s) => nc.starts_with(s.as_str()),
                WildcardComp::Any => true,
                WildcardComp::Empty => nc.is_empty(),
            };
            if !ok {
                return false;
            }
            pi += 1;
        }

        // tolerate a properly-given domain root: a single trailing empty
        // component in the pattern may remain unmatched
        if comps.get(pi) == Some(&WildcardComp::Empty) {
            pi += 1;
        }
        pi == comps.len()
    }
}

/// The compiled allow-list of remote identities. Shared-immutable once a
/// session is constructed.
#[derive(Debug, Clone, Default)]
pub struct PermittedPeers {
    entries: Vec<PeerPattern>,
}

impl PermittedPeers {
    pub fn compile(patterns: &[String]) -> RelpResult<PermittedPeers> {
        let entries = patterns
            .iter()
            .map(|p| PeerPattern::compile(p))
            .collect::<RelpResult<Vec<_>>>()?;
        Ok(PermittedPeers { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fingerprint entries match by exact string comparison only.
    pub fn matches_fingerprint(&self, fingerprint: &str) -> bool {
        self.entries.iter().any(|e| e.raw == fingerprint)
    }

    pub fn matches_name(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.matches_name(name))
    }
}

/// Format a certificate's SHA-1 fingerprint the way permitted-peer lists
/// spell it: `SHA1:XX:XX:…`.
pub fn sha1_fingerprint(cert_der: &[u8]) -> String {
    let digest = Sha1::digest(cert_der);
    let mut out = String::with_capacity(4 + digest.len() * 3);
    out.push_str("SHA1");
    for byte in digest {
        out.push(':');
        out.push_str(&format!("{byte:02X}"));
    }
    out
}

/// Names a certificate claims for its subject: all SubjectAltName DNSName
/// entries, plus the Subject DN's CN as a fallback candidate.
#[derive(Debug, Clone, Default)]
pub struct PeerIdentity {
    pub dns_names: Vec<String>,
    pub common_name: Option<String>,
}

impl PeerIdentity {
    /// Extract the identity from a DER-encoded certificate.
    pub fn from_cert_der(der: &[u8]) -> RelpResult<PeerIdentity> {
        let cert = Certificate::from_der(der).map_err(|_| RelpError::AuthCertInvalid)?;

        let mut identity = PeerIdentity::default();

        if let Some(extensions) = &cert.tbs_certificate.extensions {
            for ext in extensions {
                if ext.extn_id != OID_SUBJECT_ALT_NAME {
                    continue;
                }
                let san = SubjectAltName::from_der(ext.extn_value.as_bytes())
                    .map_err(|_| RelpError::AuthCertInvalid)?;
                for name in san.0 {
                    if let GeneralName::DnsName(dns) = name {
                        identity.dns_names.push(dns.to_string());
                    }
                }
            }
        }

        'outer: for rdn in cert.tbs_certificate.subject.0.iter() {
            for atav in rdn.0.iter() {
                if atav.oid != OID_CN {
                    continue;
                }
                // CN may be encoded as UTF8String, PrintableString or IA5String
                let cn = atav
                    .value
                    .decode_as::<Utf8StringRef<'_>>()
                    .map(|s| s.as_str().to_string())
                    .or_else(|_| {
                        atav.value
                            .decode_as::<PrintableStringRef<'_>>()
                            .map(|s| s.as_str().to_string())
                    })
                    .or_else(|_| {
                        atav.value
                            .decode_as::<Ia5StringRef<'_>>()
                            .map(|s| s.as_str().to_string())
                    });
                if let Ok(cn) = cn {
                    identity.common_name = Some(cn);
                    break 'outer;
                }
            }
        }

        Ok(identity)
    }

    /// All candidate names, SANs first, for error reporting.
    pub fn all_names(&self) -> String {
        let mut parts: Vec<String> = self
            .dns_names
            .iter()
            .map(|n| format!("DNSname: {n}"))
            .collect();
        if let Some(cn) = &self.common_name {
            parts.push(format!("CN: {cn}"));
        }
        parts.join("; ")
    }

    /// Check this identity against the permitted set. SAN entries are tried
    /// first; the CN is only consulted when no SAN matched.
    pub fn permitted_by(&self, peers: &PermittedPeers) -> bool {
        if self.dns_names.iter().any(|n| peers.matches_name(n)) {
            return true;
        }
        self.common_name
            .as_deref()
            .is_some_and(|cn| peers.matches_name(cn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(p: &str) -> PeerPattern {
        PeerPattern::compile(p).unwrap()
    }

    #[test]
    fn literal_pattern_matches_exactly() {
        let p = pattern("host.example.com");
        assert!(p.matches_name("host.example.com"));
        assert!(!p.matches_name("other.example.com"));
        assert!(!p.matches_name("host.example.com.evil.net"));
    }

    #[test]
    fn leading_wildcard_component() {
        let p = pattern("*.example.com");
        assert!(p.matches_name("host.example.com"));
        // the wildcard is one component, candidate with two components fails
        assert!(!p.matches_name("example.com"));
        // the wildcard must not absorb multiple labels
        assert!(!p.matches_name("a.b.example.com"));
    }

    #[test]
    fn suffix_match_within_component() {
        let p = pattern("*host.example.com");
        assert!(p.matches_name("myhost.example.com"));
        assert!(p.matches_name("host.example.com"));
        assert!(!p.matches_name("hostx.example.com"));
    }

    #[test]
    fn prefix_match_within_component() {
        let p = pattern("host*.example.com");
        assert!(p.matches_name("host1.example.com"));
        assert!(p.matches_name("host.example.com"));
        assert!(!p.matches_name("xhost.example.com"));
    }

    #[test]
    fn trailing_dot_pattern_requires_root_or_nothing() {
        let p = pattern("*.example.com.");
        assert!(p.matches_name("host.example.com."));
        assert!(p.matches_name("host.example.com"));
    }

    #[test]
    fn empty_component_in_the_middle() {
        let p = pattern("a.*..b");
        assert!(!p.matches_name("a.x.b"));
        assert!(p.matches_name("a.x..b"));
    }

    #[test]
    fn invalid_wildcard_positions_rejected() {
        assert!(PeerPattern::compile("ho*st.example.com").is_err());
        assert!(PeerPattern::compile("*host*.example.com").is_err());
        assert!(PeerPattern::compile("**.example.com").is_err());
    }

    #[test]
    fn permitted_peers_fingerprint_is_exact() {
        let peers =
            PermittedPeers::compile(&["SHA1:AA:BB:CC".to_string(), "*.example.com".to_string()])
                .unwrap();
        assert!(peers.matches_fingerprint("SHA1:AA:BB:CC"));
        assert!(!peers.matches_fingerprint("SHA1:AA:BB:CD"));
        assert!(peers.matches_name("host.example.com"));
    }

    #[test]
    fn fingerprint_format() {
        let fp = sha1_fingerprint(b"test certificate bytes");
        assert!(fp.starts_with("SHA1:"));
        // "SHA1" + 20 * ":XX"
        assert_eq!(fp.len(), 4 + 20 * 3);
        assert!(
            fp[4..]
                .split(':')
                .skip(1)
                .all(|h| h.len() == 2 && h.chars().all(|c| c.is_ascii_hexdigit()))
        );
    }

    #[test]
    fn identity_from_generated_cert() {
        let cert =
            rcgen::generate_simple_self_signed(vec!["logs.example.com".to_string()]).unwrap();
        let identity = PeerIdentity::from_cert_der(cert.cert.der().as_ref()).unwrap();
        assert!(
            identity
                .dns_names
                .iter()
                .any(|n| n == "logs.example.com")
        );

        let peers = PermittedPeers::compile(&["*.example.com".to_string()]).unwrap();
        assert!(identity.permitted_by(&peers));

        let other = PermittedPeers::compile(&["*.example.org".to_string()]).unwrap();
        assert!(!identity.permitted_by(&other));
    }
}
