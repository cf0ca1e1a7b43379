// Copyright (c) Mindchain, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Symmetric encryption of signing material and deterministic account
//! key derivation.
//!
//! Private keys at rest are AES-256-CBC encrypted with a random IV,
//! stored hex encoded as `iv:ciphertext`. Account signing keys derive
//! from a ChaCha20 stream seeded with SHA-256(pepper ‖ username), so
//! regeneration always yields the same address.

use crate::error::{WalletError, WalletResult};
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use ethers::core::k256::ecdsa::SigningKey;
use ethers::signers::{LocalWallet, Signer};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use sha2::{Digest, Sha256};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const IV_LEN: usize = 16;
pub const KEY_LEN: usize = 32;

/// AES-256-CBC cipher over a 32-byte deployment key.
#[derive(Clone)]
pub struct Cipher {
    key: [u8; KEY_LEN],
}

impl Cipher {
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }

    pub fn from_hex(hex_key: &str) -> WalletResult<Self> {
        let bytes = hex::decode(hex_key)
            .map_err(|e| WalletError::Crypto(format!("invalid encryption key hex: {}", e)))?;
        let key: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| WalletError::Crypto("encryption key must be 32 bytes".into()))?;
        Ok(Self::new(key))
    }

    /// Encrypt to `iv:ciphertext`, both hex encoded. The IV is random
    /// per call.
    pub fn encrypt(&self, plaintext: &[u8]) -> String {
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);
        let ciphertext = Aes256CbcEnc::new(&self.key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);
        format!("{}:{}", hex::encode(iv), hex::encode(ciphertext))
    }

    pub fn decrypt(&self, encoded: &str) -> WalletResult<Vec<u8>> {
        let (iv_hex, ct_hex) = encoded
            .split_once(':')
            .ok_or_else(|| WalletError::Crypto("expected iv:ciphertext".into()))?;
        let iv_bytes = hex::decode(iv_hex)
            .map_err(|e| WalletError::Crypto(format!("invalid iv hex: {}", e)))?;
        let iv: [u8; IV_LEN] = iv_bytes
            .try_into()
            .map_err(|_| WalletError::Crypto("iv must be 16 bytes".into()))?;
        let ciphertext = hex::decode(ct_hex)
            .map_err(|e| WalletError::Crypto(format!("invalid ciphertext hex: {}", e)))?;
        Aes256CbcDec::new(&self.key.into(), &iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| WalletError::Crypto("decryption failed (bad key or corrupt data)".into()))
    }
}

/// Derive the account signing key for `username`. Deterministic in
/// (pepper, username): the seed is SHA-256 over both, expanded through
/// ChaCha20.
pub fn derive_signing_key(username: &str, pepper: &str) -> LocalWallet {
    let mut hasher = Sha256::new();
    hasher.update(pepper.as_bytes());
    hasher.update(b":");
    hasher.update(username.as_bytes());
    let seed: [u8; 32] = hasher.finalize().into();

    let mut rng = ChaCha20Rng::from_seed(seed);
    let signing_key = SigningKey::random(&mut rng);
    LocalWallet::from(signing_key)
}

/// Rebuild a wallet from raw 32-byte key material (the decrypted form
/// of `Account::encrypted_key`).
pub fn wallet_from_key_bytes(bytes: &[u8]) -> WalletResult<LocalWallet> {
    let signing_key = SigningKey::from_slice(bytes)
        .map_err(|e| WalletError::Crypto(format!("invalid signing key bytes: {}", e)))?;
    Ok(LocalWallet::from(signing_key))
}

/// Raw key material of a wallet, the form that gets encrypted at rest.
pub fn wallet_key_bytes(wallet: &LocalWallet) -> Vec<u8> {
    wallet.signer().to_bytes().to_vec()
}

/// Lowercased address string of a wallet.
pub fn wallet_address(wallet: &LocalWallet) -> String {
    crate::utils::normalize_address(&wallet.address())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> Cipher {
        Cipher::new([7u8; KEY_LEN])
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let c = cipher();
        let secret = b"super secret signing key material";
        let encoded = c.encrypt(secret);
        assert!(encoded.contains(':'));
        assert_eq!(c.decrypt(&encoded).unwrap(), secret);
    }

    #[test]
    fn test_iv_is_random_per_call() {
        let c = cipher();
        let a = c.encrypt(b"same input");
        let b = c.encrypt(b"same input");
        assert_ne!(a, b);
        assert_eq!(c.decrypt(&a).unwrap(), c.decrypt(&b).unwrap());
    }

    #[test]
    fn test_wrong_key_fails() {
        let encoded = cipher().encrypt(b"payload");
        let other = Cipher::new([8u8; KEY_LEN]);
        assert!(other.decrypt(&encoded).is_err());
    }

    #[test]
    fn test_rejects_malformed_input() {
        let c = cipher();
        assert!(c.decrypt("no-separator").is_err());
        assert!(c.decrypt("zz:00").is_err());
        assert!(c.decrypt("00:zz").is_err());
    }

    #[test]
    fn test_key_derivation_is_deterministic() {
        let a = derive_signing_key("alice", "pepper");
        let b = derive_signing_key("alice", "pepper");
        assert_eq!(a.address(), b.address());

        let c = derive_signing_key("bob", "pepper");
        assert_ne!(a.address(), c.address());

        let d = derive_signing_key("alice", "other-pepper");
        assert_ne!(a.address(), d.address());
    }

    #[test]
    fn test_key_bytes_round_trip_through_cipher() {
        let wallet = derive_signing_key("alice", "pepper");
        let c = cipher();
        let encoded = c.encrypt(&wallet_key_bytes(&wallet));
        let restored = wallet_from_key_bytes(&c.decrypt(&encoded).unwrap()).unwrap();
        assert_eq!(restored.address(), wallet.address());
    }
}
