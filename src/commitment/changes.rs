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

//! The per-side queue of not-yet-final commitment changes (BOLT #2 update
//! messages that have not yet made it into a signed-and-revoked commitment).

use super::spec::Htlc;

/// A single proposed mutation to a commitment, mirroring one of the BOLT #2
/// `update_*` messages.
#[derive(Clone, PartialEq, Eq, Debug, StrictEncode, StrictDecode)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub enum ChannelChange {
    /// `update_add_htlc`
    AddHtlc(Htlc),
    /// `update_fulfill_htlc`
    FulfillHtlc { id: u64, payment_preimage: [u8; 32] },
    /// `update_fail_htlc`
    FailHtlc { id: u64, reason: Vec<u8> },
    /// `update_fail_malformed_htlc`
    FailMalformedHtlc {
        id: u64,
        sha256_of_onion: [u8; 32],
        failure_code: u16,
    },
    /// `update_fee`
    UpdateFee { feerate_per_kw: u32 },
}

impl ChannelChange {
    /// The HTLC id this change refers to, if any (`UpdateFee` has none).
    pub fn htlc_id(&self) -> Option<u64> {
        match self {
            ChannelChange::AddHtlc(htlc) => Some(htlc.id),
            ChannelChange::FulfillHtlc { id, .. } => Some(*id),
            ChannelChange::FailHtlc { id, .. } => Some(*id),
            ChannelChange::FailMalformedHtlc { id, .. } => Some(*id),
            ChannelChange::UpdateFee { .. } => None,
        }
    }
}

/// One side's three-stage change queue: proposed (sent/received but not yet
/// covered by a `commitment_signed`), signed (covered by a sent-but-
/// unrevoked `commitment_signed`), acked (covered by a revoked commitment).
#[derive(Clone, PartialEq, Eq, Debug, Default, StrictEncode, StrictDecode)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct PendingChanges {
    /// Changes proposed since the last `commitment_signed` was sent/received.
    pub proposed: Vec<ChannelChange>,
    /// Changes already covered by a commitment signature, pending revocation.
    pub signed: Vec<ChannelChange>,
    /// Changes covered by a revoked (final) commitment.
    pub acked: Vec<ChannelChange>,
}

impl PendingChanges {
    pub fn new() -> Self {
        PendingChanges::default()
    }

    /// All changes across the three stages, in `acked, signed, proposed`
    /// order — the order in which a commitment is reduced (§4.3.3).
    pub fn all(&self) -> impl Iterator<Item = &ChannelChange> {
        self.acked.iter().chain(self.signed.iter()).chain(self.proposed.iter())
    }

    /// Moves every proposed change into the signed stage, as happens when
    /// this side sends or receives a `commitment_signed`.
    pub fn sign(&mut self) {
        self.signed.append(&mut self.proposed);
    }

    /// Moves every signed change into the acked stage, as happens when the
    /// matching `revoke_and_ack` is sent or received.
    pub fn acknowledge(&mut self) {
        self.acked.append(&mut self.signed);
    }
}
