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

use super::cipher::CipherState;
use super::{NoiseError, MAX_FRAME_LEN};

/// The established post-handshake transport: one cipher state per direction
/// plus the chaining key used to rotate them.
///
/// Each record is framed as two AEAD chunks sharing the same (key, nonce)
/// stream: a length chunk (2-byte big-endian length + 16-byte tag) followed
/// by a payload chunk (payload + 16-byte tag).
pub struct NoiseSession {
    sending: CipherState,
    receiving: CipherState,
    chaining_key: [u8; 32],
}

impl NoiseSession {
    pub(super) fn new(
        sending_key: [u8; 32],
        receiving_key: [u8; 32],
        chaining_key: [u8; 32],
    ) -> Self {
        NoiseSession {
            sending: CipherState::new(sending_key),
            receiving: CipherState::new(receiving_key),
            chaining_key,
        }
    }

    #[cfg(test)]
    pub(crate) fn sending_key_for_test(&self) -> [u8; 32] {
        self.sending.key_for_test()
    }

    #[cfg(test)]
    pub(crate) fn receiving_key_for_test(&self) -> [u8; 32] {
        self.receiving.key_for_test()
    }

    /// Encrypts `plaintext` into the two on-wire chunks of a single record.
    pub fn encrypt_message(
        &mut self,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, NoiseError> {
        if plaintext.len() > MAX_FRAME_LEN {
            return Err(NoiseError::FrameTooLarge(plaintext.len()));
        }
        if self.sending.needs_rekey() {
            self.sending.rekey(&self.chaining_key);
        }

        let len = (plaintext.len() as u16).to_be_bytes();
        let len_chunk = self.sending.encrypt(&[], &len)?;
        let payload_chunk = self.sending.encrypt(&[], plaintext)?;

        let mut out = Vec::with_capacity(len_chunk.len() + payload_chunk.len());
        out.extend_from_slice(&len_chunk);
        out.extend_from_slice(&payload_chunk);
        Ok(out)
    }

    /// Decrypts the first chunk of a record, returning the plaintext length
    /// of the payload chunk that must follow.
    pub fn decrypt_length(
        &mut self,
        length_chunk: &[u8],
    ) -> Result<usize, NoiseError> {
        if self.receiving.needs_rekey() {
            self.receiving.rekey(&self.chaining_key);
        }
        let len = self.receiving.decrypt(&[], length_chunk)?;
        if len.len() != 2 {
            return Err(NoiseError::HandshakeFailure(
                "length chunk did not decrypt to 2 bytes".into(),
            ));
        }
        Ok(u16::from_be_bytes([len[0], len[1]]) as usize)
    }

    /// Decrypts the payload chunk that follows a length chunk.
    pub fn decrypt_payload(
        &mut self,
        payload_chunk: &[u8],
    ) -> Result<Vec<u8>, NoiseError> {
        self.receiving.decrypt(&[], payload_chunk)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn pair() -> (NoiseSession, NoiseSession) {
        let a = [1u8; 32];
        let b = [2u8; 32];
        let ck = [3u8; 32];
        (NoiseSession::new(a, b, ck), NoiseSession::new(b, a, ck))
    }

    #[test]
    fn framed_record_round_trips() {
        let (mut alice, mut bob) = pair();
        let msg = b"update_add_htlc payload goes here";
        let record = alice.encrypt_message(msg).unwrap();

        let len = bob.decrypt_length(&record[..18]).unwrap();
        assert_eq!(len, msg.len());
        let payload = bob.decrypt_payload(&record[18..]).unwrap();
        assert_eq!(payload, msg);
    }

    #[test]
    fn oversized_frame_rejected() {
        let (mut alice, _bob) = pair();
        let msg = vec![0u8; MAX_FRAME_LEN + 1];
        assert!(matches!(
            alice.encrypt_message(&msg),
            Err(NoiseError::FrameTooLarge(_))
        ));
    }
}
