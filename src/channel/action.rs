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

//! Side effects `process` asks the host to carry out (§4.4). The state
//! machine itself never touches a socket, the chain, or storage — it only
//! returns the actions its host must perform.

use bitcoin::{OutPoint, Transaction};
use p2p::bolt::ChannelId;

use super::event::{HostCommand, PeerMessage};
use crate::commitment::Htlc;

/// One side effect the host must carry out after a `process` call.
#[derive(Clone, PartialEq, Debug, Display)]
pub enum Action {
    /// Send a message to the connected peer.
    #[display("send_message(...)")]
    SendMessage(PeerMessage),

    /// Register interest in an outpoint with the on-chain watcher.
    #[display("send_watch({outpoint}, {min_depth})")]
    SendWatch { outpoint: OutPoint, min_depth: u32 },

    /// Broadcast a transaction (funding, unilateral close, justice/penalty,
    /// cooperative close).
    #[display("publish_tx({0:?})")]
    PublishTx(Box<Transaction>),

    /// Persist the channel's current state.
    #[display("store_state")]
    StoreState(Vec<u8>),

    /// Re-enter `process` with a self-issued command (e.g. `Sign` right
    /// after the change that made it necessary was acked).
    #[display("process_command(...)")]
    ProcessCommand(HostCommand),

    /// The channel's address switched from its temporary id to the
    /// funding-derived final id.
    #[display("channel_id_switch({old}, {new})")]
    ChannelIdSwitch { old: ChannelId, new: ChannelId },

    /// Deliver a newly committed incoming HTLC upstream (to the router or
    /// payment engine).
    #[display("process_add(...)")]
    ProcessAdd(Htlc),

    /// Deliver a newly revealed preimage upstream.
    #[display("process_fulfill({id})")]
    ProcessFulfill { id: u64, payment_preimage: [u8; 32] },
}
