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

//! The commitment spec: one side's view of a commitment transaction as a
//! plain accounting structure, before any script or transaction is built
//! from it (BOLT #3 §4).

use std::collections::BTreeMap;

use bitcoin::Txid;
use secp256k1::PublicKey;

/// Which side originated an HTLC, relative to the [`CommitmentSpec`] it is
/// carried in.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display, StrictEncode, StrictDecode)]
#[display(Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub enum Direction {
    /// HTLC offered by the side whose spec this is.
    Offered,
    /// HTLC offered by the counterparty.
    Received,
}

/// A single in-flight HTLC as carried by a [`CommitmentSpec`].
///
/// This is a pure accounting record: the onion routing packet is kept as an
/// opaque blob since constructing and peeling it is router logic, outside
/// this crate's scope.
#[derive(Clone, PartialEq, Eq, Debug, StrictEncode, StrictDecode)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct Htlc {
    /// HTLC id, assigned by the offering side's `*NextHtlcId` counter.
    pub id: u64,
    /// Which side offered this HTLC.
    pub direction: Direction,
    /// Value of the HTLC, in milli-satoshi.
    pub amount_msat: u64,
    /// SHA-256 of the payment preimage.
    pub payment_hash: [u8; 32],
    /// Block height at which the HTLC times out.
    pub cltv_expiry: u32,
    /// Opaque onion routing packet bytes, unpeeled and unvalidated here.
    pub onion_routing_packet: Vec<u8>,
}

/// One side's accounting view of a commitment transaction: the set of
/// in-flight HTLCs plus the two non-HTLC balances and the feerate they were
/// computed at.
///
/// Balances are non-negative; `to_local_msat + to_remote_msat + sum(htlc
/// amounts)` equals the channel capacity in msat (BOLT #3 §4.1, invariant 2
/// of the testable properties).
#[derive(Clone, PartialEq, Eq, Debug, StrictEncode, StrictDecode)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct CommitmentSpec {
    /// In-flight HTLCs, keyed by their id within this spec's perspective.
    pub htlcs: BTreeMap<u64, Htlc>,
    /// Feerate this commitment was built at, sat per 1000-weight.
    pub feerate_per_kw: u32,
    /// Balance on the `to_local` output, in milli-satoshi.
    pub to_local_msat: u64,
    /// Balance on the `to_remote` output, in milli-satoshi.
    pub to_remote_msat: u64,
}

impl CommitmentSpec {
    /// A spec with no HTLCs and the given balances/feerate.
    pub fn new(
        to_local_msat: u64,
        to_remote_msat: u64,
        feerate_per_kw: u32,
    ) -> Self {
        CommitmentSpec {
            htlcs: BTreeMap::new(),
            feerate_per_kw,
            to_local_msat,
            to_remote_msat,
        }
    }

    /// Sum of all in-flight HTLC amounts, in milli-satoshi.
    pub fn total_htlc_amount_msat(&self) -> u64 {
        self.htlcs.values().map(|htlc| htlc.amount_msat).sum()
    }

    /// HTLCs offered by the side whose spec this is.
    pub fn offered(&self) -> impl Iterator<Item = &Htlc> {
        self.htlcs.values().filter(|htlc| htlc.direction == Direction::Offered)
    }

    /// HTLCs offered by the counterparty.
    pub fn received(&self) -> impl Iterator<Item = &Htlc> {
        self.htlcs.values().filter(|htlc| htlc.direction == Direction::Received)
    }
}

/// One committed version of a [`CommitmentSpec`] together with the committed
/// transaction's identifier and the counterparty's per-commitment point it
/// was built against.
#[derive(Clone, PartialEq, Eq, Debug, StrictEncode, StrictDecode)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct LocalCommit {
    /// Monotonically increasing commitment number, starting at 0.
    pub commitment_number: u64,
    /// The accounting view this commitment transaction encodes.
    pub spec: CommitmentSpec,
    /// Identifier of the local commitment transaction.
    pub tx_id: Txid,
    /// The remote per-commitment point this commitment was signed against.
    pub remote_per_commitment_point: PublicKey,
}

/// The remote-side counterpart of [`LocalCommit`].
#[derive(Clone, PartialEq, Eq, Debug, StrictEncode, StrictDecode)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct RemoteCommit {
    /// Monotonically increasing commitment number, starting at 0.
    pub commitment_number: u64,
    /// The accounting view this commitment transaction encodes.
    pub spec: CommitmentSpec,
    /// Identifier of the remote commitment transaction.
    pub tx_id: Txid,
    /// The remote per-commitment point this commitment was signed against.
    pub remote_per_commitment_point: PublicKey,
}
