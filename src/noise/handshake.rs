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

use secp256k1::ecdh::SharedSecret;
use secp256k1::{PublicKey, Secp256k1, SecretKey, Signing};
use sha2::{Digest, Sha256};

use super::cipher::hkdf2;
use super::transport::NoiseSession;
use super::{NoiseError, HANDSHAKE_PREFIX, PROLOGUE, PROTOCOL_NAME};

/// One of the three Noise_XK handshake messages as it appears on the wire.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Act(pub Vec<u8>);

/// Computes the initial `(chaining_key, handshake_hash)` pair shared by both
/// roles: `ck = SHA256(protocol_name)`, then `h = SHA256(ck || prologue)`,
/// then `h = SHA256(h || responder_static_pubkey)`.
fn initial_state(responder_static: &PublicKey) -> ([u8; 32], [u8; 32]) {
    let ck: [u8; 32] = Sha256::digest(PROTOCOL_NAME).into();
    let h = mix_hash(&ck, PROLOGUE);
    let h = mix_hash(&h, &responder_static.serialize());
    (ck, h)
}

fn mix_hash(h: &[u8; 32], data: &[u8]) -> [u8; 32] {
    Sha256::digest([h.as_slice(), data].concat()).into()
}

fn ecdh(seckey: &SecretKey, pubkey: &PublicKey) -> [u8; 32] {
    // secp256k1's default ECDH hash function is SHA256 of the compressed
    // shared point, matching the BOLT-8 `ecdh()` primitive exactly.
    SharedSecret::new(pubkey, seckey).secret_bytes()
}

/// Drives the initiator side of the three-message Noise_XK handshake.
pub struct HandshakeInitiator {
    h: [u8; 32],
    ck: [u8; 32],
    e: SecretKey,
    e_pub: PublicKey,
    local_static: SecretKey,
    remote_static: PublicKey,
    temp_k2: Option<[u8; 32]>,
    re_pub: Option<PublicKey>,
}

impl HandshakeInitiator {
    pub fn new<C: Signing>(
        secp: &Secp256k1<C>,
        local_static: SecretKey,
        remote_static: PublicKey,
        ephemeral: SecretKey,
    ) -> Self {
        let (ck, h) = initial_state(&remote_static);
        let e_pub = PublicKey::from_secret_key(secp, &ephemeral);
        HandshakeInitiator {
            h,
            ck,
            e: ephemeral,
            e_pub,
            local_static,
            remote_static,
            temp_k2: None,
            re_pub: None,
        }
    }

    /// Produces Act One: `prefix || e.pub || tag` (50 bytes).
    pub fn write_act_one(&mut self) -> Result<Act, NoiseError> {
        self.h = mix_hash(&self.h, &self.e_pub.serialize());
        let es = ecdh(&self.e, &self.remote_static);
        let (ck, temp_k1) = hkdf2(&self.ck, &es);
        self.ck = ck;

        let mut cs = super::cipher::CipherState::new(temp_k1);
        let c = cs.encrypt(&self.h, &[])?;
        self.h = mix_hash(&self.h, &c);

        let mut out = Vec::with_capacity(50);
        out.push(HANDSHAKE_PREFIX);
        out.extend_from_slice(&self.e_pub.serialize());
        out.extend_from_slice(&c);
        Ok(Act(out))
    }

    /// Consumes Act Two (`prefix || re.pub || tag`, 50 bytes).
    pub fn read_act_two(&mut self, act: &Act) -> Result<(), NoiseError> {
        let buf = &act.0;
        if buf.len() != 50 {
            return Err(NoiseError::HandshakeFailure(format!(
                "act two must be 50 bytes, got {}",
                buf.len()
            )));
        }
        if buf[0] != HANDSHAKE_PREFIX {
            return Err(NoiseError::HandshakeFailure(
                "bad prefix byte on act two".into(),
            ));
        }
        let re_pub = PublicKey::from_slice(&buf[1..34]).map_err(|_| {
            NoiseError::HandshakeFailure("malformed ephemeral in act two".into())
        })?;
        let tag = &buf[34..50];

        let h_before = mix_hash(&self.h, &re_pub.serialize());
        let ee = ecdh(&self.e, &re_pub);
        let (ck, temp_k2) = hkdf2(&self.ck, &ee);

        let mut cs = super::cipher::CipherState::new(temp_k2);
        cs.decrypt(&h_before, tag)?;

        self.h = mix_hash(&h_before, tag);
        self.ck = ck;
        self.temp_k2 = Some(temp_k2);
        self.re_pub = Some(re_pub);
        Ok(())
    }

    /// Produces Act Three: `prefix || enc_s || tag` (66 bytes), and finalizes
    /// the session.
    pub fn write_act_three<C: Signing>(
        &mut self,
        secp: &Secp256k1<C>,
    ) -> Result<(Act, NoiseSession), NoiseError> {
        let temp_k2 = self.temp_k2.ok_or_else(|| {
            NoiseError::HandshakeFailure("act two not processed yet".into())
        })?;
        let re_pub = self.re_pub.ok_or_else(|| {
            NoiseError::HandshakeFailure("act two not processed yet".into())
        })?;

        let local_static_pub = PublicKey::from_secret_key(secp, &self.local_static);
        let mut cs2 = super::cipher::CipherState::new(temp_k2);
        let c = cs2.encrypt(&self.h, &local_static_pub.serialize())?;
        self.h = mix_hash(&self.h, &c);

        let se = ecdh(&self.local_static, &re_pub);
        let (ck, temp_k3) = hkdf2(&self.ck, &se);
        self.ck = ck;

        let mut cs3 = super::cipher::CipherState::new(temp_k3);
        let t = cs3.encrypt(&self.h, &[])?;

        let mut out = Vec::with_capacity(66);
        out.push(HANDSHAKE_PREFIX);
        out.extend_from_slice(&c);
        out.extend_from_slice(&t);

        let (sk, rk) = hkdf2(&self.ck, &[]);
        let session = NoiseSession::new(sk, rk, self.ck);
        Ok((Act(out), session))
    }
}

/// Drives the responder side of the three-message Noise_XK handshake.
pub struct HandshakeResponder {
    h: [u8; 32],
    ck: [u8; 32],
    local_static: SecretKey,
    local_static_pub: PublicKey,
    e: SecretKey,
    e_pub: PublicKey,
    re_pub: Option<PublicKey>,
    temp_k2: Option<[u8; 32]>,
}

impl HandshakeResponder {
    pub fn new<C: Signing>(
        secp: &Secp256k1<C>,
        local_static: SecretKey,
        ephemeral: SecretKey,
    ) -> Self {
        let local_static_pub = PublicKey::from_secret_key(secp, &local_static);
        let (ck, h) = initial_state(&local_static_pub);
        let e_pub = PublicKey::from_secret_key(secp, &ephemeral);
        HandshakeResponder {
            h,
            ck,
            local_static,
            local_static_pub,
            e: ephemeral,
            e_pub,
            re_pub: None,
            temp_k2: None,
        }
    }

    /// Consumes Act One and verifies its tag.
    pub fn read_act_one(&mut self, act: &Act) -> Result<(), NoiseError> {
        let buf = &act.0;
        if buf.len() != 50 {
            return Err(NoiseError::HandshakeFailure(format!(
                "act one must be 50 bytes, got {}",
                buf.len()
            )));
        }
        if buf[0] != HANDSHAKE_PREFIX {
            return Err(NoiseError::HandshakeFailure(
                "bad prefix byte on act one".into(),
            ));
        }
        let re_pub = PublicKey::from_slice(&buf[1..34]).map_err(|_| {
            NoiseError::HandshakeFailure("malformed ephemeral in act one".into())
        })?;
        let tag = &buf[34..50];

        let h = mix_hash(&self.h, &re_pub.serialize());
        let es = ecdh(&self.local_static, &re_pub);
        let (ck, temp_k1) = hkdf2(&self.ck, &es);

        let mut cs = super::cipher::CipherState::new(temp_k1);
        cs.decrypt(&h, tag)?;

        self.h = mix_hash(&h, tag);
        self.ck = ck;
        self.re_pub = Some(re_pub);
        Ok(())
    }

    /// Produces Act Two.
    pub fn write_act_two(&mut self) -> Result<Act, NoiseError> {
        let re_pub = self.re_pub.ok_or_else(|| {
            NoiseError::HandshakeFailure("act one not processed yet".into())
        })?;

        self.h = mix_hash(&self.h, &self.e_pub.serialize());
        let ee = ecdh(&self.e, &re_pub);
        let (ck, temp_k2) = hkdf2(&self.ck, &ee);
        self.ck = ck;
        self.temp_k2 = Some(temp_k2);

        let mut cs = super::cipher::CipherState::new(temp_k2);
        let c = cs.encrypt(&self.h, &[])?;
        self.h = mix_hash(&self.h, &c);

        let mut out = Vec::with_capacity(50);
        out.push(HANDSHAKE_PREFIX);
        out.extend_from_slice(&self.e_pub.serialize());
        out.extend_from_slice(&c);
        Ok(Act(out))
    }

    /// Consumes Act Three and finalizes the session.
    pub fn read_act_three(
        &mut self,
        act: &Act,
    ) -> Result<NoiseSession, NoiseError> {
        let buf = &act.0;
        if buf.len() != 66 {
            return Err(NoiseError::HandshakeFailure(format!(
                "act three must be 66 bytes, got {}",
                buf.len()
            )));
        }
        if buf[0] != HANDSHAKE_PREFIX {
            return Err(NoiseError::HandshakeFailure(
                "bad prefix byte on act three".into(),
            ));
        }
        let c = &buf[1..50];
        let t = &buf[50..66];
        let temp_k2 = self.temp_k2.ok_or_else(|| {
            NoiseError::HandshakeFailure("act two not sent yet".into())
        })?;

        let mut cs2 = super::cipher::CipherState::new(temp_k2);
        let remote_static_ser = cs2.decrypt(&self.h, c)?;
        let remote_static = PublicKey::from_slice(&remote_static_ser)
            .map_err(|_| {
                NoiseError::HandshakeFailure(
                    "malformed static key in act three".into(),
                )
            })?;
        let h_after_c = mix_hash(&self.h, c);

        debug_assert!(self.re_pub.is_some(), "act one already processed");
        let se = ecdh(&self.e, &remote_static);
        let (ck, temp_k3) = hkdf2(&self.ck, &se);

        let mut cs3 = super::cipher::CipherState::new(temp_k3);
        cs3.decrypt(&h_after_c, t)?;

        self.ck = ck;
        self.h = mix_hash(&h_after_c, t);

        let (rk, sk) = hkdf2(&self.ck, &[]);
        Ok(NoiseSession::new(sk, rk, self.ck))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// Deterministic stand-ins for the four keys a BOLT-8 handshake
    /// consumes, so a failure here points at the state machine rather than
    /// at whichever random scalar `thread_rng` happened to produce.
    fn fixed_key(secp: &Secp256k1<secp256k1::All>, tag: u8) -> (SecretKey, PublicKey) {
        let mut bytes = [0x11u8; 32];
        bytes[31] = tag;
        let sk = SecretKey::from_slice(&bytes).expect("fixed test scalar is valid");
        let pk = PublicKey::from_secret_key(secp, &sk);
        (sk, pk)
    }

    #[test]
    fn handshake_round_trip_derives_matching_keys() {
        let secp = Secp256k1::new();
        let (resp_static_sk, resp_static_pk) = fixed_key(&secp, 1);
        let (init_static_sk, _init_static_pk) = fixed_key(&secp, 2);
        let (init_e_sk, _) = fixed_key(&secp, 3);
        let (resp_e_sk, _) = fixed_key(&secp, 4);

        let mut initiator = HandshakeInitiator::new(
            &secp,
            init_static_sk,
            resp_static_pk,
            init_e_sk,
        );
        let mut responder =
            HandshakeResponder::new(&secp, resp_static_sk, resp_e_sk);

        let act1 = initiator.write_act_one().unwrap();
        responder.read_act_one(&act1).unwrap();

        let act2 = responder.write_act_two().unwrap();
        initiator.read_act_two(&act2).unwrap();

        let (act3, init_session) = initiator.write_act_three(&secp).unwrap();
        let resp_session = responder.read_act_three(&act3).unwrap();

        // Initiator's send key must equal responder's receive key and vice
        // versa (BOLT-8 §2).
        assert_eq!(
            init_session.sending_key_for_test(),
            resp_session.receiving_key_for_test()
        );
        assert_eq!(
            init_session.receiving_key_for_test(),
            resp_session.sending_key_for_test()
        );
    }
}
