// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Signing key pairs for gateway and agent identities.
//!
//! Signatures always cover the SHA-256 digest of the input, regardless of
//! key type, so peers can verify without knowing how the payload was
//! framed. Keys import/export as PKCS#8 PEM.

use base64::Engine;
use ring::rand::SystemRandom;
use ring::signature::{self, Ed25519KeyPair, EcdsaKeyPair, KeyPair};

use thingbus::error::{BusError, ErrorKind};

const PRIVATE_PEM_TAG: &str = "PRIVATE KEY";
const PUBLIC_PEM_TAG: &str = "PUBLIC KEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Ed25519,
    EcdsaP256,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ed25519 => "ed25519",
            Self::EcdsaP256 => "ecdsa",
        }
    }
}

enum KeyPairKind {
    Ed25519(Ed25519KeyPair),
    EcdsaP256(EcdsaKeyPair),
}

/// A private signing key with its PKCS#8 encoding retained for export.
pub struct SigningKey {
    kind: KeyPairKind,
    pkcs8: Vec<u8>,
    rng: SystemRandom,
}

impl SigningKey {
    pub fn generate(key_type: KeyType) -> Result<Self, BusError> {
        let rng = SystemRandom::new();
        let pkcs8 = match key_type {
            KeyType::Ed25519 => Ed25519KeyPair::generate_pkcs8(&rng)
                .map_err(|_| BusError::new(ErrorKind::Internal, "key generation failed"))?
                .as_ref()
                .to_vec(),
            KeyType::EcdsaP256 => EcdsaKeyPair::generate_pkcs8(
                &signature::ECDSA_P256_SHA256_ASN1_SIGNING,
                &rng,
            )
            .map_err(|_| BusError::new(ErrorKind::Internal, "key generation failed"))?
            .as_ref()
            .to_vec(),
        };
        Self::from_pkcs8(&pkcs8)
    }

    /// Import from PKCS#8 DER; the key type is detected by parsing.
    pub fn from_pkcs8(pkcs8: &[u8]) -> Result<Self, BusError> {
        let rng = SystemRandom::new();
        if let Ok(pair) = Ed25519KeyPair::from_pkcs8(pkcs8) {
            return Ok(Self { kind: KeyPairKind::Ed25519(pair), pkcs8: pkcs8.to_vec(), rng });
        }
        match EcdsaKeyPair::from_pkcs8(&signature::ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8, &rng) {
            Ok(pair) => Ok(Self { kind: KeyPairKind::EcdsaP256(pair), pkcs8: pkcs8.to_vec(), rng }),
            Err(_) => Err(BusError::new(ErrorKind::Encode, "unsupported private key")),
        }
    }

    /// Import from PKCS#8 PEM.
    pub fn import_private_pem(pem: &str) -> Result<Self, BusError> {
        Self::from_pkcs8(&pem_decode(pem, PRIVATE_PEM_TAG)?)
    }

    pub fn export_private_pem(&self) -> String {
        pem_encode(&self.pkcs8, PRIVATE_PEM_TAG)
    }

    pub fn export_public_pem(&self) -> String {
        pem_encode(self.public_key(), PUBLIC_PEM_TAG)
    }

    pub fn public_key(&self) -> &[u8] {
        match &self.kind {
            KeyPairKind::Ed25519(pair) => pair.public_key().as_ref(),
            KeyPairKind::EcdsaP256(pair) => pair.public_key().as_ref(),
        }
    }

    pub fn key_type(&self) -> KeyType {
        match &self.kind {
            KeyPairKind::Ed25519(_) => KeyType::Ed25519,
            KeyPairKind::EcdsaP256(_) => KeyType::EcdsaP256,
        }
    }

    /// Sign the SHA-256 digest of `data`.
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, BusError> {
        let digest = ring::digest::digest(&ring::digest::SHA256, data);
        match &self.kind {
            KeyPairKind::Ed25519(pair) => Ok(pair.sign(digest.as_ref()).as_ref().to_vec()),
            KeyPairKind::EcdsaP256(pair) => pair
                .sign(&self.rng, digest.as_ref())
                .map(|sig| sig.as_ref().to_vec())
                .map_err(|_| BusError::new(ErrorKind::Internal, "signing failed")),
        }
    }
}

/// Verify a signature produced by [`SigningKey::sign`].
pub fn verify(key_type: KeyType, public_pem: &str, data: &[u8], signature_bytes: &[u8]) -> bool {
    let Ok(public) = pem_decode(public_pem, PUBLIC_PEM_TAG) else {
        return false;
    };
    let digest = ring::digest::digest(&ring::digest::SHA256, data);
    let algorithm: &dyn signature::VerificationAlgorithm = match key_type {
        KeyType::Ed25519 => &signature::ED25519,
        KeyType::EcdsaP256 => &signature::ECDSA_P256_SHA256_ASN1,
    };
    signature::UnparsedPublicKey::new(algorithm, public)
        .verify(digest.as_ref(), signature_bytes)
        .is_ok()
}

fn pem_encode(der: &[u8], tag: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(der);
    let mut out = format!("-----BEGIN {tag}-----\n");
    for chunk in encoded.as_bytes().chunks(64) {
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push('\n');
    }
    out.push_str(&format!("-----END {tag}-----\n"));
    out
}

fn pem_decode(pem: &str, tag: &str) -> Result<Vec<u8>, BusError> {
    let body: String = pem
        .lines()
        .filter(|line| !line.starts_with("-----"))
        .collect::<Vec<_>>()
        .join("");
    if !pem.contains(&format!("BEGIN {tag}")) {
        return Err(BusError::new(ErrorKind::Encode, format!("not a {tag} pem block")));
    }
    base64::engine::general_purpose::STANDARD
        .decode(body)
        .map_err(|e| BusError::new(ErrorKind::Encode, e.to_string()))
}

#[cfg(test)]
#[path = "keys_tests.rs"]
mod tests;
