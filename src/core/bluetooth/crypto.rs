//! Plejd session cryptography
//! Challenge/response for the auth characteristic and the keystream cipher
//! applied to every payload on the data and last-data characteristics.

use aes::Aes128;
use aes::cipher::{BlockEncrypt, KeyInit, generic_array::GenericArray};
use sha2::{Digest, Sha256};

use crate::error::{PlejdError, Result};

/// Length of the shared key and of the keystream block
pub const KEY_LEN: usize = 16;

/// The fixed shared key of a Plejd site
#[derive(Clone, PartialEq, Eq)]
pub struct CryptoKey([u8; KEY_LEN]);

impl CryptoKey {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parses the hex form of the key, dashes are ignored
    pub fn from_hex(key: &str) -> Result<Self> {
        let stripped: String = key.chars().filter(|c| *c != '-').collect();
        let bytes = hex::decode(stripped.trim()).map_err(|e| PlejdError::InvalidKey(e.to_string()))?;
        let bytes: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| PlejdError::InvalidKey(format!("expected {} bytes, got {}", KEY_LEN, b.len())))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for CryptoKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CryptoKey(..)")
    }
}

/// Computes the answer to an auth challenge: SHA-256 of `key ^ challenge`,
/// folded in half by xoring the two 16 byte halves.
pub fn challenge_response(key: &CryptoKey, challenge: &[u8]) -> [u8; 16] {
    let mixed: Vec<u8> = key
        .as_bytes()
        .iter()
        .zip(challenge.iter())
        .map(|(k, c)| k ^ c)
        .collect();
    let digest = Sha256::digest(&mixed);

    let mut response = [0u8; 16];
    for (i, out) in response.iter_mut().enumerate() {
        *out = digest[i] ^ digest[i + 16];
    }
    response
}

/// Derives the 16 byte keystream block for a peer address.
///
/// `address` is the byte-reversed radio address captured when the session was bound.
pub fn keystream(key: &CryptoKey, address: &[u8; 6]) -> [u8; 16] {
    let mut block = [0u8; 16];
    block[..6].copy_from_slice(address);
    block[6..12].copy_from_slice(address);
    block[12..].copy_from_slice(&address[..4]);

    let cipher = Aes128::new(GenericArray::from_slice(key.as_bytes()));
    let mut block = GenericArray::from(block);
    cipher.encrypt_block(&mut block);
    block.into()
}

/// Encrypts or decrypts `data`. The keystream block is reused cyclically for
/// payloads longer than 16 bytes, which is what the mesh expects.
pub fn encrypt_decrypt(key: &CryptoKey, address: &[u8; 6], data: &[u8]) -> Vec<u8> {
    let stream = keystream(key, address);
    data.iter()
        .enumerate()
        .map(|(i, b)| b ^ stream[i % stream.len()])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> CryptoKey {
        CryptoKey::from_hex("abcdef01-2345-6789-abcd-ef0123456789").unwrap()
    }

    #[test]
    fn key_parsing_strips_dashes() {
        let key = test_key();
        assert_eq!(key.as_bytes()[0], 0xab);
        assert_eq!(key.as_bytes()[15], 0x89);
    }

    #[test]
    fn key_parsing_rejects_wrong_length() {
        assert!(matches!(CryptoKey::from_hex("abcd"), Err(PlejdError::InvalidKey(_))));
        assert!(matches!(CryptoKey::from_hex("zz"), Err(PlejdError::InvalidKey(_))));
    }

    #[test]
    fn aes_block_matches_fips_197_vector() {
        // FIPS-197 appendix C.1
        let key = CryptoKey::new([
            0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d,
            0x0e, 0x0f,
        ]);
        let cipher = Aes128::new(GenericArray::from_slice(key.as_bytes()));
        let mut block = GenericArray::from([
            0x00u8, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd,
            0xee, 0xff,
        ]);
        cipher.encrypt_block(&mut block);
        assert_eq!(hex::encode(block), "69c4e0d86a7b0430d8cdb78070b4c55a");
    }

    #[test]
    fn keystream_input_repeats_address() {
        let key = test_key();
        let address = [6, 5, 4, 3, 2, 1];
        let expected = {
            let cipher = Aes128::new(GenericArray::from_slice(key.as_bytes()));
            let mut block =
                GenericArray::from([6u8, 5, 4, 3, 2, 1, 6, 5, 4, 3, 2, 1, 6, 5, 4, 3]);
            cipher.encrypt_block(&mut block);
            <[u8; 16]>::from(block)
        };
        assert_eq!(keystream(&key, &address), expected);
    }

    #[test]
    fn round_trip_restores_payload() {
        let key = test_key();
        let address = [6, 5, 4, 3, 2, 1];
        for len in [0usize, 1, 5, 16, 17, 40] {
            let payload: Vec<u8> = (0..len as u8).collect();
            let encrypted = encrypt_decrypt(&key, &address, &payload);
            assert_eq!(encrypted.len(), payload.len());
            assert_eq!(encrypt_decrypt(&key, &address, &encrypted), payload);
        }
    }

    #[test]
    fn long_payload_reuses_keystream() {
        let key = test_key();
        let address = [6, 5, 4, 3, 2, 1];
        let stream = keystream(&key, &address);

        let encrypted = encrypt_decrypt(&key, &address, &[0u8; 20]);
        assert_eq!(&encrypted[..16], &stream[..]);
        assert_eq!(&encrypted[16..20], &stream[..4]);
    }

    #[test]
    fn short_payload_uses_keystream_prefix() {
        let key = test_key();
        let address = [6, 5, 4, 3, 2, 1];
        let stream = keystream(&key, &address);
        assert_eq!(encrypt_decrypt(&key, &address, &[0u8; 3]), stream[..3].to_vec());
    }

    #[test]
    fn keystream_depends_on_address() {
        let key = test_key();
        assert_ne!(keystream(&key, &[1, 2, 3, 4, 5, 6]), keystream(&key, &[6, 5, 4, 3, 2, 1]));
    }

    #[test]
    fn challenge_response_is_deterministic() {
        let key = test_key();
        let challenge = [0x5a; 16];
        let first = challenge_response(&key, &challenge);
        assert_eq!(first, challenge_response(&key, &challenge));
        assert_ne!(first, challenge_response(&key, &[0xa5; 16]));
    }

    #[test]
    fn challenge_response_folds_digest() {
        let key = CryptoKey::new([0u8; 16]);
        // key ^ challenge == challenge when the key is all zeroes
        let challenge = [0u8; 16];
        let digest = Sha256::digest([0u8; 16]);
        let response = challenge_response(&key, &challenge);
        for i in 0..16 {
            assert_eq!(response[i], digest[i] ^ digest[i + 16]);
        }
    }
}
