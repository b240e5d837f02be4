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

//! The channel lifecycle: a tagged variant over every state a channel can be
//! in, each carrying only the data its own transitions need (§3.4).

use amplify::DumbDefault;
use bitcoin::{OutPoint, Txid};
use p2p::bolt::{ChannelId, TempChannelId};
use secp256k1::PublicKey;

use crate::commitment::Commitments;

/// The temporary or final identifier a channel is addressed by, depending on
/// how far its opening handshake has progressed.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display, StrictEncode, StrictDecode)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub enum AnyChannelId {
    /// Negotiated in `open_channel`/`accept_channel`, before the funding
    /// outpoint is known.
    #[display(inner)]
    Temporary(TempChannelId),
    /// Derived from the funding outpoint once it is known.
    #[display(inner)]
    Final(ChannelId),
}

/// A channel's current lifecycle state (§3.4, §4.4). Transitions are driven
/// exclusively by [`super::machine::process`].
#[derive(Clone, PartialEq, Eq, Debug, Display, StrictEncode, StrictDecode)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub enum ChannelState {
    /// No wire exchange has happened yet; waiting on a host command to pick
    /// a role (`InitFunder` or `InitFundee`).
    #[display("wait_for_init")]
    WaitForInit,

    /// We are the fundee; we've seen nothing yet and are waiting for the
    /// remote's `open_channel`.
    #[display("wait_for_open_channel({temporary_channel_id})")]
    WaitForOpenChannel { temporary_channel_id: TempChannelId },

    /// We are the funder; `open_channel` was sent, waiting for
    /// `accept_channel`.
    #[display("wait_for_accept_channel({temporary_channel_id})")]
    WaitForAcceptChannel { temporary_channel_id: TempChannelId },

    /// We are the fundee; `accept_channel` was sent, waiting for
    /// `funding_created`.
    #[display("wait_for_funding_created({temporary_channel_id})")]
    WaitForFundingCreated { temporary_channel_id: TempChannelId },

    /// We are the funder; `funding_created` was sent, waiting for
    /// `funding_signed`.
    #[display("wait_for_funding_signed({channel_id})")]
    WaitForFundingSigned {
        channel_id: ChannelId,
        funding_outpoint: OutPoint,
        is_funder: bool,
    },

    /// The funding transaction is signed (and, for the funder, published);
    /// waiting for both sides to exchange `funding_locked`.
    #[display("wait_for_funding_locked({channel_id})")]
    WaitForFundingLocked {
        channel_id: ChannelId,
        funding_outpoint: OutPoint,
        is_funder: bool,
        local_funding_locked_sent: bool,
        remote_funding_locked_received: Option<PublicKey>,
    },

    /// Channel is open and usable for payments; holds the live commitment
    /// ledger.
    #[display("normal({channel_id})")]
    Normal {
        channel_id: ChannelId,
        commitments: Box<Commitments>,
    },

    /// A cooperative close was requested locally or by the remote;
    /// `shutdown` has been exchanged and no new HTLCs may be added.
    #[display("shutdown({channel_id})")]
    Shutdown {
        channel_id: ChannelId,
        commitments: Box<Commitments>,
        local_scriptpubkey: Vec<u8>,
        remote_scriptpubkey: Option<Vec<u8>>,
    },

    /// All HTLCs have cleared; negotiating the closing transaction fee via
    /// `closing_signed`.
    #[display("negotiating({channel_id})")]
    Negotiating {
        channel_id: ChannelId,
        local_scriptpubkey: Vec<u8>,
        remote_scriptpubkey: Vec<u8>,
        last_fee_proposed_sat: Option<u64>,
    },

    /// A closing transaction (cooperative, unilateral, or penalty) has been
    /// published; waiting for it to confirm.
    #[display("closing({channel_id})")]
    Closing {
        channel_id: ChannelId,
        closing_txid: Txid,
    },

    /// The channel is fully settled on-chain; terminal state.
    #[display("closed({channel_id})")]
    Closed { channel_id: ChannelId },

    /// The remote peer revealed a revocation secret for a commitment we
    /// still believe current, or otherwise violated the protocol in a way
    /// that makes our local commitment unsafe to keep updating; terminal
    /// state pending a unilateral close from the last known-good commit.
    #[display("error_information_leak({channel_id})")]
    ErrorInformationLeak { channel_id: ChannelId },
}

impl ChannelState {
    /// The identifier this channel is currently addressed by.
    pub fn id(&self) -> AnyChannelId {
        match self {
            ChannelState::WaitForInit => {
                AnyChannelId::Temporary(TempChannelId::dumb_default())
            }
            ChannelState::WaitForOpenChannel {
                temporary_channel_id,
            }
            | ChannelState::WaitForAcceptChannel {
                temporary_channel_id,
            }
            | ChannelState::WaitForFundingCreated {
                temporary_channel_id,
            } => AnyChannelId::Temporary(*temporary_channel_id),
            ChannelState::WaitForFundingSigned { channel_id, .. }
            | ChannelState::WaitForFundingLocked { channel_id, .. }
            | ChannelState::Normal { channel_id, .. }
            | ChannelState::Shutdown { channel_id, .. }
            | ChannelState::Negotiating { channel_id, .. }
            | ChannelState::Closing { channel_id, .. }
            | ChannelState::Closed { channel_id }
            | ChannelState::ErrorInformationLeak { channel_id } => {
                AnyChannelId::Final(*channel_id)
            }
        }
    }

    /// Whether this state accepts new outgoing HTLCs.
    pub fn can_add_htlc(&self) -> bool {
        matches!(self, ChannelState::Normal { .. })
    }

    /// Whether this state is terminal: no further transitions happen.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChannelState::Closed { .. })
    }
}

impl DumbDefault for ChannelState {
    fn dumb_default() -> Self {
        ChannelState::WaitForInit
    }
}
