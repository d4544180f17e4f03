// src/dpop.rs

use crate::error::AuthenticationError;
use base64::engine::{general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::jwk::{
    AlgorithmParameters, CommonParameters, EllipticCurve, EllipticCurveKeyParameters,
    EllipticCurveKeyType, Jwk, RSAKeyParameters, RSAKeyType,
};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use p256::ecdsa::SigningKey;
use p256::elliptic_curve::rand_core::OsRng;
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;
use url::Url;
use uuid::Uuid;

/// The algorithm registered when a manager is built without any keys.
pub const DEFAULT_ALGORITHM: &str = "ES256";

const PROOF_TYPE: &str = "dpop+jwt";

/// An asymmetric private key usable for DPoP proofs.
pub enum DpopKey {
    /// A NIST P-256 key, for `ES256`.
    P256(SigningKey),
    /// An RSA key, for `RS256`/`RS384`/`RS512`/`PS256`/`PS384`/`PS512`.
    Rsa(RsaPrivateKey),
}

impl DpopKey {
    /// Generates a fresh P-256 key.
    pub fn generate_p256() -> Self {
        DpopKey::P256(SigningKey::random(&mut OsRng))
    }

    /// Parses a PKCS#8 PEM private key, either EC P-256 or RSA.
    pub fn from_pkcs8_pem(pem: &str) -> Result<Self, AuthenticationError> {
        if let Ok(key) = <SigningKey as p256::pkcs8::DecodePrivateKey>::from_pkcs8_pem(pem) {
            return Ok(DpopKey::P256(key));
        }
        <RsaPrivateKey as rsa::pkcs8::DecodePrivateKey>::from_pkcs8_pem(pem)
            .map(DpopKey::Rsa)
            .map_err(|e| {
                AuthenticationError::InvalidKey(format!(
                    "Failed to parse private key from PKCS#8 PEM: {}",
                    e
                ))
            })
    }

    /// Reads a PKCS#8 PEM private key file.
    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self, AuthenticationError> {
        let path = path.as_ref();
        let pem = std::fs::read_to_string(path).map_err(|e| {
            AuthenticationError::InvalidKey(format!(
                "Failed to read private key file from {:?}: {}",
                path, e
            ))
        })?;
        Self::from_pkcs8_pem(&pem)
    }
}

/// A key ready for signing: the parsed algorithm, the signing key in `jsonwebtoken` form,
/// the public JWK embedded in every proof and its RFC 7638 thumbprint.
struct RegisteredKey {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    jwk: Jwk,
    thumbprint: String,
}

/// DPoP proof claims per RFC 9449.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DpopClaims {
    pub jti: String,
    pub htm: String,
    pub htu: String,
    pub iat: u64,
}

/// Holds one signing keypair per algorithm and issues DPoP proofs with them.
///
/// Keys and the thumbprint index are computed once at construction and never change, so a
/// manager can be shared across threads without locking.
pub struct DpopManager {
    keys: HashMap<String, RegisteredKey>,
    algorithms_by_thumbprint: HashMap<String, String>,
}

impl DpopManager {
    /// Builds a manager from algorithm-name → keypair entries. An empty map registers a
    /// freshly generated P-256 key under `ES256`.
    ///
    /// # Errors
    ///
    /// Returns an error if an algorithm name is unknown or does not fit its key type.
    pub fn new(keypairs: HashMap<String, DpopKey>) -> Result<Self, AuthenticationError> {
        let mut keypairs = keypairs;
        if keypairs.is_empty() {
            keypairs.insert(DEFAULT_ALGORITHM.to_string(), DpopKey::generate_p256());
        }

        let mut keys = HashMap::with_capacity(keypairs.len());
        let mut algorithms_by_thumbprint = HashMap::with_capacity(keypairs.len());
        for (name, key) in keypairs {
            let registered = register(&name, key)?;
            debug!(algorithm = %name, jkt = %registered.thumbprint, "Registered DPoP keypair.");
            algorithms_by_thumbprint.insert(registered.thumbprint.clone(), name.clone());
            keys.insert(name, registered);
        }

        Ok(Self { keys, algorithms_by_thumbprint })
    }

    /// A manager with a single generated `ES256` key.
    pub fn generate() -> Result<Self, AuthenticationError> {
        Self::new(HashMap::new())
    }

    /// The supported algorithm names.
    pub fn algorithms(&self) -> BTreeSet<String> {
        self.keys.keys().cloned().collect()
    }

    /// The algorithm whose public key has this JWK thumbprint.
    pub fn lookup_algorithm(&self, thumbprint: &str) -> Option<&str> {
        self.algorithms_by_thumbprint.get(thumbprint).map(String::as_str)
    }

    /// The JWK thumbprint of the key registered for this algorithm.
    pub fn lookup_thumbprint(&self, algorithm: &str) -> Option<&str> {
        self.keys.get(algorithm).map(|k| k.thumbprint.as_str())
    }

    /// The public JWK of the key registered for this algorithm.
    pub fn public_jwk(&self, algorithm: &str) -> Option<&Jwk> {
        self.keys.get(algorithm).map(|k| &k.jwk)
    }

    /// Signs a DPoP proof binding `method` and `uri` with the key registered for
    /// `algorithm`. Every call produces a new `jti` and `iat`; use one proof per request.
    ///
    /// # Errors
    ///
    /// `UnsupportedAlgorithm` if no key is registered for `algorithm`, `ProofGeneration`
    /// if signing fails.
    pub fn generate_proof(
        &self,
        algorithm: &str,
        uri: &Url,
        method: &str,
    ) -> Result<String, AuthenticationError> {
        let key = self
            .keys
            .get(algorithm)
            .ok_or_else(|| AuthenticationError::UnsupportedAlgorithm(algorithm.to_string()))?;

        let iat = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| AuthenticationError::ProofGeneration(e.to_string()))?
            .as_secs();
        let claims = DpopClaims {
            jti: Uuid::new_v4().to_string(),
            htm: method.to_string(),
            htu: uri.as_str().to_string(),
            iat,
        };

        let mut header = Header::new(key.algorithm);
        header.typ = Some(PROOF_TYPE.to_string());
        header.jwk = Some(key.jwk.clone());

        encode(&header, &claims, &key.encoding_key)
            .map_err(|e| AuthenticationError::ProofGeneration(e.to_string()))
    }
}

fn register(name: &str, key: DpopKey) -> Result<RegisteredKey, AuthenticationError> {
    let algorithm = Algorithm::from_str(name)
        .map_err(|_| AuthenticationError::UnsupportedAlgorithm(name.to_string()))?;

    match key {
        DpopKey::P256(signing_key) => {
            if algorithm != Algorithm::ES256 {
                return Err(AuthenticationError::InvalidKey(format!(
                    "A P-256 key cannot be used for {}",
                    name
                )));
            }
            let point = signing_key.verifying_key().to_encoded_point(false);
            let x = URL_SAFE_NO_PAD.encode(point.x().ok_or_else(|| {
                AuthenticationError::InvalidKey("P-256 point has no x coordinate".into())
            })?);
            let y = URL_SAFE_NO_PAD.encode(point.y().ok_or_else(|| {
                AuthenticationError::InvalidKey("P-256 point has no y coordinate".into())
            })?);

            let der = p256::pkcs8::EncodePrivateKey::to_pkcs8_der(&signing_key).map_err(|e| {
                AuthenticationError::InvalidKey(format!("Failed to encode P-256 key as PKCS#8: {}", e))
            })?;

            Ok(RegisteredKey {
                algorithm,
                encoding_key: EncodingKey::from_ec_der(der.as_bytes()),
                thumbprint: ec_thumbprint(&x, &y),
                jwk: Jwk {
                    common: CommonParameters::default(),
                    algorithm: AlgorithmParameters::EllipticCurve(EllipticCurveKeyParameters {
                        key_type: EllipticCurveKeyType::EC,
                        curve: EllipticCurve::P256,
                        x,
                        y,
                    }),
                },
            })
        }
        DpopKey::Rsa(private_key) => {
            if !matches!(
                algorithm,
                Algorithm::RS256
                    | Algorithm::RS384
                    | Algorithm::RS512
                    | Algorithm::PS256
                    | Algorithm::PS384
                    | Algorithm::PS512
            ) {
                return Err(AuthenticationError::InvalidKey(format!(
                    "An RSA key cannot be used for {}",
                    name
                )));
            }
            // jsonwebtoken reliably accepts RSA keys as PKCS#1 DER.
            let pkcs1_der = private_key.to_pkcs1_der().map_err(|e| {
                AuthenticationError::InvalidKey(format!("Failed to convert RSA key to PKCS#1 DER: {}", e))
            })?;
            let public_key = private_key.to_public_key();
            let n = URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be());
            let e = URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be());

            Ok(RegisteredKey {
                algorithm,
                encoding_key: EncodingKey::from_rsa_der(pkcs1_der.as_bytes()),
                thumbprint: rsa_thumbprint(&n, &e),
                jwk: Jwk {
                    common: CommonParameters::default(),
                    algorithm: AlgorithmParameters::RSA(RSAKeyParameters {
                        key_type: RSAKeyType::RSA,
                        n,
                        e,
                    }),
                },
            })
        }
    }
}

// RFC 7638: the required members in lexicographic order, no whitespace.
fn ec_thumbprint(x: &str, y: &str) -> String {
    let canonical = format!(r#"{{"crv":"P-256","kty":"EC","x":"{}","y":"{}"}}"#, x, y);
    URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()))
}

fn rsa_thumbprint(n: &str, e: &str) -> String {
    let canonical = format!(r#"{{"e":"{}","kty":"RSA","n":"{}"}}"#, e, n);
    URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()))
}
