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

//! The fixed set of events the channel state machine reacts to (§4.4).

use bitcoin::{BlockHeader, Txid};
use p2p::bolt::{
    AcceptChannel, ChannelId, ChannelReestablish, Error as WireError,
    FundingCreated, FundingLocked, FundingSigned, Init, OpenChannel,
};
use secp256k1::ecdsa::Signature;

use crate::collaborators::WatchEvent;
use crate::commitment::{ChannelChange, CommitSig, RemoteRevocation};

/// A `shutdown` message, carrying the closing `scriptpubkey` as raw bytes
/// rather than the wire crate's `PubkeyScript` wrapper — this state machine
/// only ever compares and forwards the script, never inspects its structure.
#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[display("shutdown({channel_id}, ...)")]
pub struct ShutdownMsg {
    pub channel_id: ChannelId,
    pub scriptpubkey: Vec<u8>,
}

/// A `closing_signed` message.
#[derive(Clone, PartialEq, Debug, Display)]
#[display("closing_signed({channel_id}, {fee_satoshis})")]
pub struct ClosingSignedMsg {
    pub channel_id: ChannelId,
    pub fee_satoshis: u64,
    pub signature: Signature,
}

/// Lifecycle-relevant wire messages. Update messages that mutate the
/// commitment ledger (`update_add_htlc` and friends, `commitment_signed`,
/// `revoke_and_ack`) are carried pre-translated into the ledger's own
/// [`ChannelChange`]/[`CommitSig`]/[`RemoteRevocation`] types rather than the
/// raw wire structs — the peer driver that owns the onion layer does that
/// translation before the event reaches this state machine.
#[derive(Clone, PartialEq, Debug, Display)]
pub enum PeerMessage {
    #[display(inner)]
    Init(Init),
    #[display(inner)]
    Error(WireError),
    #[display(inner)]
    OpenChannel(OpenChannel),
    #[display(inner)]
    AcceptChannel(AcceptChannel),
    #[display(inner)]
    FundingCreated(FundingCreated),
    #[display(inner)]
    FundingSigned(FundingSigned),
    #[display(inner)]
    FundingLocked(FundingLocked),
    #[display(inner)]
    Shutdown(ShutdownMsg),
    #[display(inner)]
    ClosingSigned(ClosingSignedMsg),
    #[display(inner)]
    ChannelReestablish(ChannelReestablish),
    #[display("channel_update(...)")]
    ChannelUpdate(ChannelChange),
    #[display("commitment_signed(...)")]
    CommitmentSigned(CommitSig),
    #[display("revoke_and_ack(...)")]
    RevokeAndAck(RemoteRevocation),
}

/// Commands issued by the local host (user action, payment engine, or the
/// channel factory) rather than received over the wire.
#[derive(Clone, PartialEq, Debug, Display)]
pub enum HostCommand {
    /// Start a channel as funder: send the initial `open_channel`.
    #[display("init_funder(...)")]
    InitFunder {
        funding_satoshis: u64,
        push_msat: u64,
        feerate_per_kw: u32,
    },

    /// Start a channel as fundee: wait for the remote's `open_channel`.
    #[display("init_fundee")]
    InitFundee,

    /// The host's wallet finished building and signing the funding
    /// transaction for a channel we are funding. Transaction construction
    /// itself (coin selection, PSBT signing) is the wallet's job, not this
    /// state machine's; this command only hands back the result so
    /// `funding_created` can be sent.
    #[display("funding_constructed({funding_txid})")]
    FundingConstructed {
        funding_txid: Txid,
        funding_output_index: u16,
        signature: Signature,
    },

    /// Originate a new HTLC (`CMD_ADD_HTLC`).
    #[display("add_htlc(...)")]
    AddHtlc {
        amount_msat: u64,
        payment_hash: [u8; 32],
        cltv_expiry: u32,
        onion_routing_packet: Vec<u8>,
    },

    /// Release the preimage for an HTLC terminating locally.
    #[display("fulfill_htlc({id})")]
    FulfillHtlc { id: u64, payment_preimage: [u8; 32] },

    /// Fail an HTLC terminating locally or failed downstream.
    #[display("fail_htlc({id})")]
    FailHtlc { id: u64, reason: Vec<u8> },

    /// Propose a new feerate for the commitment transaction
    /// (`update_fee`, funder only).
    #[display("update_fee({feerate_per_kw})")]
    UpdateFee { feerate_per_kw: u32 },

    /// Sign a new commitment covering all proposed changes (`CMD_SIGN`).
    #[display("sign")]
    Sign,

    /// Begin a cooperative close (`CMD_CLOSE`).
    #[display("close({scriptpubkey:?})")]
    Close { scriptpubkey: Vec<u8> },
}

/// The fixed event vocabulary the state machine's `process` function
/// dispatches on (§4.4).
#[derive(Clone, PartialEq, Debug, Display)]
pub enum Event {
    /// A wire message arrived from the connected peer.
    #[display("message_received({0})")]
    MessageReceived(PeerMessage),

    /// The local host issued a command.
    #[display("execute_command({0})")]
    ExecuteCommand(HostCommand),

    /// A watched outpoint reached confirmation depth or was spent.
    #[display("watch_received(...)")]
    WatchReceived(WatchEvent),

    /// A new block connected to the best chain.
    #[display("new_block({height})")]
    NewBlock { height: u32, header: BlockHeader },

    /// The transport reconnected and both `init` messages were exchanged.
    #[display("connected")]
    Connected { local_init: Init, remote_init: Init },

    /// The transport dropped.
    #[display("disconnected")]
    Disconnected,

    /// Restore a channel from persisted state at startup.
    #[display("restore")]
    Restore { persisted: Vec<u8> },
}
