//! HTTP Signatures (draft-cavage-12) as Mastodon and most of the fediverse
//! speak them: RSA PKCS#1 v1.5 over SHA-256, key published on the actor's
//! profile, body bound through a `Digest` header.
//!
//! `picky` parses the header, rebuilds the signing string and does the RSA
//! work. Key lookup, the digest rule and the clock checks live here.

use super::actors::{KeyResolver, ResolveError};
use axum::http::header::{InvalidHeaderValue, AUTHORIZATION, DATE, HOST};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use picky::hash::HashAlgorithm;
use picky::http::http_signature::{Header, HttpSigAlgorithm, HttpSignatureBuilder, HttpSignatureError};
use picky::http::HttpSignature;
use picky::key::{PrivateKey, PublicKey};
use picky::signature::SignatureAlgorithm;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Names accepted in the `algorithm` parameter besides picky's own RSA/SHA-256 tag.
const SUPPORTED_ALGORITHMS: &[&str] = &["rsa-sha256", "hs2019"];

const RSA_SHA256: SignatureAlgorithm = SignatureAlgorithm::RsaPkcs1v15(HashAlgorithm::SHA2_256);

#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("request carries no signature")]
    MissingSignature,
    #[error("malformed signature header: {0}")]
    MalformedHeader(String),
    #[error("unsupported signature algorithm `{0}`")]
    UnsupportedAlgorithm(String),
    #[error("signature does not cover `{0}`")]
    UncoveredHeader(&'static str),
    #[error("signed header `{0}` is missing from the request")]
    MissingHeader(String),
    #[error("digest does not match the request body")]
    DigestMismatch,
    #[error("unparseable Date header `{0}`")]
    BadDate(String),
    #[error("Date header is outside the accepted clock skew")]
    StaleDate,
    #[error("signature creation time is outside the accepted clock skew")]
    StaleCreated,
    #[error("signature has expired")]
    Expired,
    #[error("could not resolve signing key: {0}")]
    KeyResolution(#[from] ResolveError),
    #[error("expected a PUBLIC KEY, found `{0}`")]
    NotAPublicKey(String),
    #[error("unusable public key: {0}")]
    BadKey(String),
    #[error("signature verification failed")]
    BadSignature,
    #[error("signed by {signer} but the activity claims actor {actor}")]
    ActorMismatch { signer: String, actor: String },
}

impl VerificationError {
    /// True when the sender should retry later rather than give up.
    pub fn is_transient(&self) -> bool {
        matches!(self, VerificationError::KeyResolution(err) if !err.is_permanent())
    }
}

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("request has no Host header")]
    MissingHost,
    #[error("failed to sign request: {0}")]
    Signature(#[from] HttpSignatureError),
    #[error("signature is not a valid header value: {0}")]
    HeaderValue(#[from] InvalidHeaderValue),
}

fn malformed(message: impl Into<String>) -> VerificationError {
    VerificationError::MalformedHeader(message.into())
}

/// Actor that owns a key: the key id without its fragment.
pub fn key_owner(key_id: &str) -> &str {
    key_id.split_once('#').map_or(key_id, |(actor, _)| actor)
}

/// Raw parameters of the `Signature` header, or of an `Authorization: Signature ...` header.
fn raw_signature(headers: &HeaderMap) -> Result<&str, VerificationError> {
    if let Some(value) = headers.get("signature") {
        return value
            .to_str()
            .map_err(|_| malformed("signature header is not ASCII"));
    }
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Err(VerificationError::MissingSignature);
    };
    let value = value
        .to_str()
        .map_err(|_| malformed("authorization header is not ASCII"))?;
    match value.split_once(' ') {
        Some((scheme, params)) if scheme.eq_ignore_ascii_case("signature") => Ok(params.trim_start()),
        _ => Err(VerificationError::MissingSignature),
    }
}

pub fn parse_signature(headers: &HeaderMap) -> Result<HttpSignature, VerificationError> {
    raw_signature(headers)?
        .parse::<HttpSignature>()
        .map_err(|err| malformed(err.to_string()))
}

fn covers(signature: &HttpSignature, name: &str) -> bool {
    signature
        .headers
        .iter()
        .any(|header| matches!(header, Header::Name(covered) if covered.eq_ignore_ascii_case(name)))
}

fn algorithm_supported(algorithm: &HttpSigAlgorithm) -> bool {
    match algorithm {
        HttpSigAlgorithm::Known(known) => {
            matches!(known, SignatureAlgorithm::RsaPkcs1v15(HashAlgorithm::SHA2_256))
        }
        HttpSigAlgorithm::Custom(name) => SUPPORTED_ALGORITHMS
            .iter()
            .any(|supported| name.eq_ignore_ascii_case(supported)),
    }
}

/// `Digest` header value for `body`.
pub fn sha256_digest(body: &[u8]) -> String {
    format!("SHA-256={}", STANDARD.encode(Sha256::digest(body)))
}

/// RFC 7231 IMF-fixdate.
pub fn http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn check_digest(headers: &HeaderMap, body: &[u8]) -> Result<(), VerificationError> {
    let expected = sha256_digest(body);
    let (_, expected) = expected.split_at("SHA-256=".len());
    let mut found = Vec::new();
    for value in headers.get_all("digest") {
        let value = value
            .to_str()
            .map_err(|_| malformed("digest header is not ASCII"))?;
        for entry in value.split(',') {
            if let Some((algorithm, digest)) = entry.trim().split_once('=') {
                if algorithm.eq_ignore_ascii_case("sha-256") {
                    found.push(digest.to_string());
                }
            }
        }
    }
    match found.as_slice() {
        [] if headers.get("digest").is_none() => Err(VerificationError::MissingHeader("digest".into())),
        [digest] if digest == expected => Ok(()),
        _ => Err(VerificationError::DigestMismatch),
    }
}

/// Parses a PEM `PUBLIC KEY` (SubjectPublicKeyInfo) container.
pub fn decode_public_key(pem: &str) -> Result<PublicKey, VerificationError> {
    let pem = pem.trim();
    let (label, _) = pkcs8::der::pem::decode_vec(pem.as_bytes())
        .map_err(|err| VerificationError::BadKey(err.to_string()))?;
    if label != "PUBLIC KEY" {
        return Err(VerificationError::NotAPublicKey(label.to_string()));
    }
    PublicKey::from_pem_str(pem).map_err(|err| VerificationError::BadKey(err.to_string()))
}

/// The verified signer must be the actor the activity claims.
pub fn ensure_same_actor(signer: &str, actor: &str) -> Result<(), VerificationError> {
    if signer == actor {
        Ok(())
    } else {
        Err(VerificationError::ActorMismatch {
            signer: signer.to_string(),
            actor: actor.to_string(),
        })
    }
}

/// Signs a request the way Mastodon does: a `Digest` of the body, then a
/// `Signature` header covering the request target, `host`, `date` and
/// `digest`. A `Date` header already on the request is kept.
pub fn sign_request(
    parts: &mut Parts,
    body: &[u8],
    key_id: &str,
    private_key: &PrivateKey,
) -> Result<(), SigningError> {
    if !parts.headers.contains_key(HOST) {
        return Err(SigningError::MissingHost);
    }
    if !parts.headers.contains_key(DATE) {
        parts
            .headers
            .insert(DATE, HeaderValue::from_str(&http_date(Utc::now()))?);
    }
    parts
        .headers
        .insert("digest", HeaderValue::from_str(&sha256_digest(body))?);

    let signature = HttpSignatureBuilder::new()
        .key_id(key_id)
        .signature_method(private_key, RSA_SHA256)
        .generate_signing_string_using_http_request(&*parts)
        .request_target()
        .http_header(HOST.as_str())
        .http_header(DATE.as_str())
        .http_header("digest")
        .build()?;
    parts.headers.insert("signature", signature_header(&signature)?);
    Ok(())
}

/// `Signature` header value: the parameters without the auth-scheme prefix.
pub fn signature_header(signature: &HttpSignature) -> Result<HeaderValue, InvalidHeaderValue> {
    let rendered = signature.to_string();
    let params = rendered.strip_prefix("Signature ").unwrap_or(&rendered);
    HeaderValue::from_str(params)
}

pub struct SignatureVerifier {
    resolver: Arc<dyn KeyResolver>,
    max_clock_skew: Duration,
}

impl SignatureVerifier {
    pub fn new(resolver: Arc<dyn KeyResolver>, max_clock_skew: Duration) -> Self {
        Self {
            resolver,
            max_clock_skew,
        }
    }

    /// Checks the request's signature and returns the signing actor's identifier.
    ///
    /// Cheap structural checks (coverage, digest, clock) run before the key is
    /// resolved so junk never triggers an outbound fetch.
    pub async fn verify(&self, request: &Parts, body: &[u8]) -> Result<String, VerificationError> {
        let signature = parse_signature(&request.headers)?;
        if let Some(algorithm) = &signature.algorithm {
            if !algorithm_supported(algorithm) {
                return Err(VerificationError::UnsupportedAlgorithm(format!("{algorithm:?}")));
            }
        }

        let now = Utc::now();
        self.check_lifetime(&signature, now)?;
        for header in &signature.headers {
            match header {
                Header::Name(name) if !request.headers.contains_key(name.to_ascii_lowercase().as_str()) => {
                    return Err(VerificationError::MissingHeader(name.to_ascii_lowercase()));
                }
                Header::Created if signature.created.is_none() => {
                    return Err(malformed("(created) is covered but absent"));
                }
                Header::Expires if signature.expires.is_none() => {
                    return Err(malformed("(expires) is covered but absent"));
                }
                _ => {}
            }
        }
        if !body.is_empty() {
            if !covers(&signature, "digest") {
                return Err(VerificationError::UncoveredHeader("digest"));
            }
            check_digest(&request.headers, body)?;
        }
        if covers(&signature, "date") {
            self.check_date(&request.headers, now)?;
        } else if !signature.headers.contains(&Header::Created) {
            return Err(VerificationError::UncoveredHeader("date"));
        }

        let actor_id = key_owner(&signature.key_id);
        let pem = self.resolver.public_key_pem(actor_id).await?;
        let key = decode_public_key(&pem)?;
        signature
            .verifier()
            .signature_method(&key, RSA_SHA256)
            .generate_signing_string_using_http_request(request)
            .now(now.timestamp().max(0) as u64)
            .verify()
            .map_err(|err| {
                tracing::debug!(actor = %actor_id, error = %err, "signature mismatch");
                VerificationError::BadSignature
            })?;

        tracing::debug!(actor = %actor_id, key_id = %signature.key_id, "signature verified");
        Ok(actor_id.to_string())
    }

    /// `expires` must lie ahead and `created` within the clock skew, whether
    /// or not they are covered.
    fn check_lifetime(&self, signature: &HttpSignature, now: DateTime<Utc>) -> Result<(), VerificationError> {
        let now = now.timestamp();
        if let Some(expires) = signature.expires {
            if i64::try_from(expires).map_or(false, |expires| expires < now) {
                return Err(VerificationError::Expired);
            }
        }
        if let Some(created) = signature.created {
            let created = i64::try_from(created).map_err(|_| VerificationError::StaleCreated)?;
            if (now - created).unsigned_abs() > self.max_clock_skew.as_secs() {
                return Err(VerificationError::StaleCreated);
            }
        }
        Ok(())
    }

    fn check_date(&self, headers: &HeaderMap, now: DateTime<Utc>) -> Result<(), VerificationError> {
        let raw = headers
            .get(DATE)
            .ok_or_else(|| VerificationError::MissingHeader("date".into()))?
            .to_str()
            .map_err(|_| malformed("date header is not ASCII"))?;
        let date = DateTime::parse_from_rfc2822(raw)
            .map_err(|_| VerificationError::BadDate(raw.to_string()))?;
        let skew = (now - date.with_timezone(&Utc)).num_seconds().unsigned_abs();
        if skew > self.max_clock_skew.as_secs() {
            return Err(VerificationError::StaleDate);
        }
        Ok(())
    }
}
