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

//! BOLT-8 Noise_XK transport: handshake, per-direction cipher state and the
//! two-chunk record framing used by the Lightning peer wire protocol.

mod cipher;
mod handshake;
mod transport;

pub use cipher::CipherState;
pub use handshake::{Act, HandshakeInitiator, HandshakeResponder};
pub use transport::NoiseSession;

/// Byte prepended to every handshake act on the wire. Steady-state framed
/// records carry no prefix.
pub const HANDSHAKE_PREFIX: u8 = 0x00;

/// ASCII prologue mixed into the handshake hash.
pub const PROLOGUE: &[u8] = b"lightning";

/// Noise protocol name mixed into the initial handshake hash.
pub const PROTOCOL_NAME: &[u8] = b"Noise_XK_secp256k1_ChaChaPoly_SHA256";

/// Maximum plaintext length of a single framed record (BOLT-8 §2).
pub const MAX_FRAME_LEN: usize = 65535;

/// Errors produced by the Noise transport.
#[derive(Debug, Display, Error)]
#[display(doc_comments)]
pub enum NoiseError {
    /// handshake failed: {0}
    HandshakeFailure(String),

    /// AEAD decryption failed: the tag did not authenticate
    DecryptionFailure,

    /// frame of {0} bytes exceeds the 65535-byte limit imposed by BOLT-8
    FrameTooLarge(usize),
}
