// LNP/BP Core Library implementing LNPBP specifications & standards
// Written in 2020-2022 by
//     Dr. Maxim Orlovsky <orlovsky@pandoracore.com>
//
// To the extent possible under law, the author(s) have dedicated all
// copyright and related and neighboring rights to this software to
// the public domain worldwide. This software is distributed without
// any warranty.
//
// You should have received a copy of the MIT License
// along with this software.
// If not, see <https://opensource.org/licenses/MIT>.

use chacha20poly1305::aead::{Aead, NewAead, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use sha2::Sha256;

use super::NoiseError;

/// After this many uses of a single key a rekey is forced.
const REKEY_THRESHOLD: u64 = u32::MAX as u64 - 1;

/// One direction's AEAD state: a 32-byte key plus a nonce counter shared by
/// every chunk sent or received with this key.
#[derive(Clone)]
pub struct CipherState {
    key: [u8; 32],
    nonce: u64,
}

impl CipherState {
    pub(super) fn new(key: [u8; 32]) -> Self {
        CipherState { key, nonce: 0 }
    }

    fn aead_nonce(&self) -> Nonce {
        // BOLT-8: 4 zero bytes followed by the little-endian 64-bit counter.
        let mut buf = [0u8; 12];
        buf[4..].copy_from_slice(&self.nonce.to_le_bytes());
        *Nonce::from_slice(&buf)
    }

    /// Encrypts `plaintext` with `ad` as associated data, advancing the
    /// nonce counter by one chunk.
    pub fn encrypt(
        &mut self,
        ad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, NoiseError> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let nonce = self.aead_nonce();
        let out = cipher
            .encrypt(&nonce, Payload { msg: plaintext, aad: ad })
            .map_err(|_| NoiseError::DecryptionFailure)?;
        self.nonce += 1;
        Ok(out)
    }

    /// Decrypts and authenticates `ciphertext`, advancing the nonce counter
    /// by one chunk.
    pub fn decrypt(
        &mut self,
        ad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, NoiseError> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let nonce = self.aead_nonce();
        let out = cipher
            .decrypt(&nonce, Payload { msg: ciphertext, aad: ad })
            .map_err(|_| NoiseError::DecryptionFailure)?;
        self.nonce += 1;
        Ok(out)
    }

    #[cfg(test)]
    pub(crate) fn key_for_test(&self) -> [u8; 32] {
        self.key
    }

    /// Whether the next use of this key must be preceded by a rotation.
    pub fn needs_rekey(&self) -> bool {
        self.nonce >= REKEY_THRESHOLD
    }

    /// Rotates the key via `HKDF(chaining_key, current_key)`, resetting the
    /// nonce counter to zero, and returns the updated chaining key.
    pub fn rekey(&mut self, chaining_key: &[u8; 32]) -> [u8; 32] {
        let (new_ck, new_key) = hkdf2(chaining_key, &self.key);
        self.key = new_key;
        self.nonce = 0;
        trace!("noise: cipher state rotated");
        new_ck
    }
}

/// The Noise `HKDF` construction used throughout the handshake: two 32-byte
/// outputs derived from a salt (the running chaining key) and input key
/// material.
pub(super) fn hkdf2(salt: &[u8; 32], ikm: &[u8]) -> ([u8; 32], [u8; 32]) {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = [0u8; 64];
    hk.expand(&[], &mut okm)
        .expect("64 is a valid HKDF-SHA256 output length");
    let mut a = [0u8; 32];
    let mut b = [0u8; 32];
    a.copy_from_slice(&okm[..32]);
    b.copy_from_slice(&okm[32..]);
    (a, b)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn encrypt_decrypt_round_trip() {
        let mut enc = CipherState::new([7u8; 32]);
        let mut dec = CipherState::new([7u8; 32]);
        let ct = enc.encrypt(b"ad", b"hello").unwrap();
        let pt = dec.decrypt(b"ad", &ct).unwrap();
        assert_eq!(pt, b"hello");
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let mut enc = CipherState::new([9u8; 32]);
        let mut dec = CipherState::new([9u8; 32]);
        let mut ct = enc.encrypt(b"ad", b"hello").unwrap();
        ct[0] ^= 0xff;
        assert!(dec.decrypt(b"ad", &ct).is_err());
    }

    #[test]
    fn rekey_changes_key_and_resets_nonce() {
        let mut state = CipherState::new([1u8; 32]);
        state.nonce = 5;
        let ck = [2u8; 32];
        let new_ck = state.rekey(&ck);
        assert_ne!(new_ck, ck);
        assert_eq!(state.nonce, 0);
    }
}
