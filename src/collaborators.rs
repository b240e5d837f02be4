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

//! Collaborator contracts the channel core consumes from its host, and the
//! observable surface it exposes back. The core never builds a socket,
//! signs a transaction, or watches the chain itself — it only calls out
//! through these traits, so a single channel state machine and commitment
//! ledger can be driven by wildly different hosts (a daemon with a hot
//! wallet, a hardware-signer bridge, a test harness).

use bitcoin::{OutPoint, Txid};
use secp256k1::ecdsa::Signature;
use secp256k1::PublicKey;

use crate::commitment::{ChannelId, CommitmentSpec};

/// Errors a [`Transport`] implementation may report back to the core.
#[derive(
    Clone, PartialEq, Eq, Hash, Debug, Display, Error, StrictEncode, StrictDecode
)]
#[display(doc_comments)]
pub enum TransportError {
    /// remote peer refused the connection
    ConnectionRefused,

    /// connection to the remote peer was closed
    ConnectionClosed,

    /// transport failure: {0}
    Unknown(String),
}

/// The encrypted-record transport a channel's peer driver sends and receives
/// through. Implemented over the Noise_XK session of [`crate::noise`] plus
/// whatever socket type the host uses.
pub trait Transport {
    /// Sends `bytes` as a single framed record; `flush` requests the
    /// implementation not batch it with a following write.
    fn send(&mut self, bytes: &[u8], flush: bool) -> Result<(), TransportError>;

    /// Blocks until exactly `n` bytes have been read off the wire.
    fn receive_fully(&mut self, n: usize) -> Result<Vec<u8>, TransportError>;

    /// Closes the underlying connection.
    fn close(&mut self) -> Result<(), TransportError>;
}

/// Derives channel keys and signs commitment/HTLC transactions on behalf of
/// the local node. The commitment ledger never holds private key material;
/// every signing operation in [`crate::commitment`] goes through this trait.
///
/// Implementations are pure with respect to the channel id: calling the same
/// method with the same channel id and commitment number twice returns the
/// same result.
pub trait KeyManager {
    /// Returns the local funding public key for `channel_id`.
    fn funding_pubkey(&self, channel_id: ChannelId) -> PublicKey;

    /// Derives the per-commitment point at `commitment_number` for
    /// `channel_id`. Commitment numbers count up from zero.
    fn per_commitment_point(
        &self,
        channel_id: ChannelId,
        commitment_number: u64,
    ) -> PublicKey;

    /// Signs the commitment transaction described by `spec` at
    /// `commitment_number`, committing to `remote_per_commitment_point`.
    fn sign_commitment(
        &self,
        channel_id: ChannelId,
        commitment_number: u64,
        remote_per_commitment_point: &PublicKey,
        spec: &CommitmentSpec,
    ) -> Signature;

    /// Signs the HTLC-success/HTLC-timeout transaction spending output
    /// `htlc_index` of the commitment transaction at `commitment_number`.
    fn sign_htlc(
        &self,
        channel_id: ChannelId,
        commitment_number: u64,
        htlc_index: u16,
        remote_per_commitment_point: &PublicKey,
    ) -> Signature;

    /// Releases the local per-commitment secret at `commitment_number`, for
    /// revoking that commitment. Derived from the local seed the same way
    /// [`crate::sha_chain::derive_secret`] derives the remote side's chain;
    /// implementations typically delegate to that function directly.
    fn per_commitment_secret(
        &self,
        channel_id: ChannelId,
        commitment_number: u64,
    ) -> [u8; 32];
}

/// On-chain events a [`Watcher`] implementation can deliver for a watched
/// outpoint.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, StrictEncode, StrictDecode)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub enum WatchEvent {
    /// The outpoint's containing transaction reached `depth` confirmations.
    Confirmed { depth: u32 },
    /// The outpoint was spent by `spending_txid`.
    Spent { spending_txid: Txid },
}

/// Subscribes to on-chain confirmation and spend events for channel-relevant
/// outpoints (the funding outpoint, a published commitment transaction).
pub trait Watcher {
    /// Registers interest in `outpoint`; `min_depth` is the confirmation
    /// count that should trigger [`WatchEvent::Confirmed`].
    fn watch(&mut self, outpoint: OutPoint, min_depth: u32);

    /// Cancels a previous [`Watcher::watch`] registration.
    fn unwatch(&mut self, outpoint: OutPoint);
}

/// Persists and restores channel state across restarts.
pub trait ChannelsDb {
    /// Upserts the persisted state for `channel_id`.
    fn add_or_update_channel(&mut self, channel_id: ChannelId, state: Vec<u8>);

    /// Returns the channel ids this host currently tracks.
    fn list_local_channels(&self) -> Vec<ChannelId>;

    /// Removes all persisted state for `channel_id`.
    fn remove_channel(&mut self, channel_id: ChannelId);
}

/// Connection status of a peer, as exposed on the peer's observable status
/// stream.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display, StrictEncode, StrictDecode)]
#[display(Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub enum ConnectionStatus {
    Closed,
    Establishing,
    Established,
}

/// Listener events the peer emits on its observable stream for payments
/// flowing through channels it hosts.
#[derive(Clone, PartialEq, Eq, Debug, StrictEncode, StrictDecode)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub enum ListenerEvent {
    /// A payment request (invoice) was generated locally.
    PaymentRequestGenerated { payment_hash: [u8; 32] },
    /// An HTLC destined to terminate locally was fulfilled.
    PaymentReceived { payment_hash: [u8; 32], amount_msat: u64 },
    /// A locally-originated payment's HTLC was fulfilled end-to-end.
    PaymentSent { payment_hash: [u8; 32] },
    /// A locally-originated payment's HTLC failed.
    PaymentFailed { payment_hash: [u8; 32] },
}
