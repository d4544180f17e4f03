mod common;

use base64::engine::{general_purpose::URL_SAFE_NO_PAD, Engine};
use common::*;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::{pkcs8::DecodePrivateKey, RsaPrivateKey};
use serde_json::json;
use sha2::{Digest, Sha256};
use solid_client_auth::prelude::*;
use solid_client_auth::openid::TokenRequest;
use std::sync::Arc;
use url::Url;
use wiremock::matchers::{body_string_contains, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WEBID: &str = "https://id.example/alice/profile#me";

fn sha256_hex(input: &str) -> String {
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

fn rsa_key() -> RsaPrivateKey {
    RsaPrivateKey::from_pkcs8_pem(RSA_PRIVATE_KEY_PEM.trim()).unwrap()
}

fn signed_id_token(issuer: &str, kid: &str) -> String {
    let der = rsa_key().to_pkcs1_der().unwrap();
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    let claims = json!({
        "iss": issuer,
        "sub": "alice",
        "aud": "https://app.example/id",
        "exp": now() + 300,
        "iat": now(),
        "webid": WEBID,
    });
    encode(&header, &claims, &EncodingKey::from_rsa_der(der.as_bytes())).unwrap()
}

fn unsigned_id_token(issuer: &str) -> String {
    let claims = json!({"iss": issuer, "sub": "alice", "exp": now() + 300, "webid": WEBID});
    encode(&Header::default(), &claims, &EncodingKey::from_secret(b"unused")).unwrap()
}

fn public_jwks(kid: &str) -> serde_json::Value {
    let public_key = rsa_key().to_public_key();
    json!({
        "keys": [{
            "kty": "RSA",
            "kid": kid,
            "use": "sig",
            "alg": "RS256",
            "n": URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
            "e": URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
        }]
    })
}

#[tokio::test]
async fn test_openid_session_from_signed_id_token() {
    solid_client_auth::init_tracing();

    // --- 1. SETUP MOCK JWKS ENDPOINT ---
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(public_jwks("test-key")))
        .mount(&server)
        .await;

    // --- 2. BUILD THE SESSION ---
    let config = OpenIdVerificationConfig::builder()
        .jwks_uri(&format!("{}/jwks", server.uri()))
        .expected_audience("https://app.example/id")
        .build()
        .unwrap();
    let token = signed_id_token("https://issuer.example", "test-key");
    let session = OpenIdSession::of_id_token(&token, config.clone()).await.unwrap();

    // --- 3. ASSERTIONS ---
    assert_eq!(session.id(), sha256_hex(WEBID));
    assert_eq!(session.principal().await.unwrap().unwrap().as_str(), WEBID);
    let credential = session.credential(ID_TOKEN).await.unwrap().unwrap();
    assert_eq!(credential.token(), token);
    assert_eq!(credential.authorization_header(), format!("Bearer {}", token));

    // --- 4. A KEY THE PROVIDER NEVER PUBLISHED ---
    let token = signed_id_token("https://issuer.example", "unknown-key");
    let result = OpenIdSession::of_id_token(&token, config).await;
    assert!(matches!(result, Err(Error::OpenId(OpenIdError::KeyNotFound(_)))));
}

#[tokio::test]
async fn test_session_cache_follows_authority_and_path() {
    let session = OpenIdSession::of_id_token(&unsigned_id_token("https://issuer.example"), Default::default())
        .await
        .unwrap();
    let registry = AuthenticatorRegistry::default().with_mechanism(BearerMechanism::new()).unwrap();

    let request = Request::get(Url::parse("https://storage.example/data/a?x=1").unwrap());
    let credential = registry
        .negotiate(&session, &request, &[Challenge::of("Bearer")])
        .await
        .unwrap()
        .expect("a Bearer credential");
    assert_eq!(credential.scheme(), "Bearer");

    // Case 1: same authority and path, different query and fragment
    let sibling = Request::get(Url::parse("https://storage.example/data/a?y=2#frag").unwrap());
    assert_eq!(session.from_cache(&sibling), Some(credential.clone()));

    // Case 2: a different path
    let other = Request::get(Url::parse("https://storage.example/data/b").unwrap());
    assert!(session.from_cache(&other).is_none());

    // Case 3: after a reset
    session.reset();
    assert!(session.from_cache(&request).is_none());
}

#[tokio::test]
async fn test_client_credentials_session_fetches_lazily() {
    // --- 1. SETUP MOCK PROVIDER ---
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issuer": server.uri(),
            "token_endpoint": format!("{}/token", server.uri()),
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(header("authorization", "Basic YXBwOnMzY3JldA=="))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-token",
            "token_type": "Bearer",
            "expires_in": 300,
            "id_token": unsigned_id_token(&server.uri()),
        })))
        .expect(1)
        .mount(&server)
        .await;

    // --- 2. BUILD THE SESSION ---
    let provider = OpenIdProvider::new(server_url(&server));
    let request = TokenRequest::builder()
        .client_secret("s3cret")
        .build("client_credentials", "app")
        .unwrap();
    let session = OpenIdSession::of_client_credentials(provider, request, Default::default()).unwrap();
    assert_eq!(session.id(), sha256_hex(&format!("{}|app", server_url(&server))));

    // --- 3. FIRST USE FETCHES, LATER USES REUSE THE TOKEN ---
    assert_eq!(session.principal().await.unwrap().unwrap().as_str(), WEBID);
    let credential = session.credential(ID_TOKEN).await.unwrap().unwrap();
    assert_eq!(credential.principal().unwrap().as_str(), WEBID);
}

#[tokio::test]
async fn test_client_credentials_token_endpoint_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issuer": server.uri(),
            "token_endpoint": format!("{}/token", server.uri()),
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("client_secret=wrong"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "invalid_client",
            "error_description": "Bad credentials",
        })))
        .mount(&server)
        .await;

    let request = TokenRequest::builder()
        .client_secret("wrong")
        .auth_method("client_secret_post")
        .build("client_credentials", "app")
        .unwrap();
    let session =
        OpenIdSession::of_client_credentials(OpenIdProvider::new(server_url(&server)), request, Default::default())
            .unwrap();

    match session.principal().await {
        Err(Error::OpenId(OpenIdError::TokenEndpoint { status, error, error_description })) => {
            assert_eq!(status, 401);
            assert_eq!(error, "invalid_client");
            assert_eq!(error_description.as_deref(), Some("Bad credentials"));
        }
        other => panic!("expected a token endpoint error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_uma_negotiation_end_to_end() {
    // --- 1. SETUP MOCK AUTHORIZATION SERVER ---
    let server = MockServer::start().await;
    mount_uma_metadata(&server).await;
    let id_token = unsigned_id_token("https://issuer.example");
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("ticket=ticket-e2e"))
        .and(header_exists("dpop"))
        .and(body_string_contains(format!("claim_token={}", id_token)))
        .and(body_string_contains("claim_token_format=http%3A%2F%2Fopenid.net"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "uma-access-token",
            "token_type": "DPoP",
            "expires_in": 300,
        })))
        .expect(1)
        .mount(&server)
        .await;

    // --- 2. SESSION WITH A DPoP KEY, REGISTRY WITH BOTH MECHANISMS ---
    let dpop = Arc::new(DpopManager::generate().unwrap());
    let session = OpenIdSession::of_id_token(&id_token, Default::default())
        .await
        .unwrap()
        .with_dpop(Arc::clone(&dpop));
    let registry = AuthenticatorRegistry::default()
        .with_mechanism(UmaMechanism::new(UmaClient::default(), Arc::new(NeedInfoHandlers::new())))
        .unwrap()
        .with_mechanism(BearerMechanism::new())
        .unwrap();

    // --- 3. NEGOTIATE FROM THE RESOURCE SERVER'S CHALLENGES ---
    let header = format!(r#"Bearer, UMA as_uri="{}", ticket="ticket-e2e", DPoP algs="ES256 PS256""#, server.uri());
    let challenges = parse_www_authenticate(&header);
    let request = Request::get(Url::parse("https://storage.example/alice/notes").unwrap());
    let credential = registry.negotiate(&session, &request, &challenges).await.unwrap().unwrap();

    // --- 4. ASSERTIONS ---
    assert_eq!(credential.scheme(), "DPoP");
    assert_eq!(credential.token(), "uma-access-token");
    assert_eq!(credential.issuer(), &server_url(&server));
    assert_eq!(credential.principal().unwrap().as_str(), WEBID);
    assert_eq!(credential.proof_thumbprint(), dpop.lookup_thumbprint("ES256"));
    assert_eq!(session.from_cache(&request), Some(credential.clone()));

    // --- 5. THE TOKEN REQUEST PROVED POSSESSION OF THE SAME KEY ---
    let received = server.received_requests().await.unwrap();
    let token_request = received.iter().find(|r| r.url.path() == "/token").unwrap();
    let token_proof = token_request.headers.get("dpop").unwrap().to_str().unwrap();
    let token_proof_header = jsonwebtoken::decode_header(token_proof).unwrap();
    assert_eq!(token_proof_header.alg, jsonwebtoken::Algorithm::ES256);

    let algorithm = dpop.lookup_algorithm(credential.proof_thumbprint().unwrap()).unwrap();
    let proof = dpop.generate_proof(algorithm, request.uri(), request.method().as_str()).unwrap();
    let proof_header = jsonwebtoken::decode_header(&proof).unwrap();
    assert_eq!(proof_header.typ.as_deref(), Some("dpop+jwt"));
}

#[tokio::test]
async fn test_anonymous_uma_negotiation() {
    let server = MockServer::start().await;
    mount_uma_metadata(&server).await;
    mount_token_response(&server, "ticket-anonymous", access_token("anonymous-token")).await;

    let registry = AuthenticatorRegistry::default()
        .with_mechanism(UmaMechanism::new(UmaClient::default(), Arc::new(NeedInfoHandlers::new())))
        .unwrap();
    let session = AnonymousSession::new();
    let header = format!(r#"UMA as_uri="{}", ticket="ticket-anonymous""#, server.uri());
    let request = Request::get(Url::parse("https://storage.example/public").unwrap());

    let credential = registry
        .negotiate(&session, &request, &parse_www_authenticate(&header))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(credential.token(), "anonymous-token");
    assert!(credential.principal().is_none());
    assert!(credential.proof_thumbprint().is_none());
    assert!(session.from_cache(&request).is_none(), "anonymous sessions never cache");
}

#[tokio::test]
async fn test_bearer_uma_token_is_not_bound() {
    let server = MockServer::start().await;
    mount_uma_metadata(&server).await;
    mount_token_response(&server, "ticket-bearer", access_token("plain-token")).await;

    let session = AnonymousSession::new().with_dpop(Arc::new(DpopManager::generate().unwrap()));
    let registry = AuthenticatorRegistry::default()
        .with_mechanism(UmaMechanism::new(UmaClient::default(), Arc::new(NeedInfoHandlers::new())))
        .unwrap();
    let header = format!(r#"UMA as_uri="{}", ticket="ticket-bearer", DPoP algs="ES256""#, server.uri());
    let request = Request::get(Url::parse("https://storage.example/shared").unwrap());

    let credential = registry
        .negotiate(&session, &request, &parse_www_authenticate(&header))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(credential.scheme(), "Bearer");
    assert_eq!(credential.token(), "plain-token");
    assert!(credential.proof_thumbprint().is_none());
}

#[tokio::test]
async fn test_oversized_lifetimes_do_not_panic() {
    // Case 1: an access token lifetime beyond the clock's range
    let server = MockServer::start().await;
    mount_uma_metadata(&server).await;
    mount_token_response(
        &server,
        "ticket-forever",
        json_body(json!({"access_token": "t", "token_type": "Bearer", "expires_in": u64::MAX})),
    )
    .await;

    let registry = AuthenticatorRegistry::default()
        .with_mechanism(UmaMechanism::new(UmaClient::default(), Arc::new(NeedInfoHandlers::new())))
        .unwrap();
    let header = format!(r#"UMA as_uri="{}", ticket="ticket-forever""#, server.uri());
    let request = Request::get(Url::parse("https://storage.example/forever").unwrap());
    let credential = registry
        .negotiate(&AnonymousSession::new(), &request, &parse_www_authenticate(&header))
        .await
        .unwrap()
        .unwrap();
    assert!(credential.is_valid_at(std::time::SystemTime::now()));

    // Case 2: an ID token expiring beyond the clock's range
    let claims = json!({"iss": "https://issuer.example", "sub": "alice", "exp": u64::MAX});
    let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(b"unused")).unwrap();
    let result = OpenIdSession::of_id_token(&token, Default::default()).await;
    assert!(matches!(result, Err(Error::OpenId(OpenIdError::ClaimOutOfRange(_)))));
}
