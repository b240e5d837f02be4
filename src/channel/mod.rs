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

//! The channel lifecycle state machine (§3.4, §4.4): a pure
//! `process(state, event) -> (state, actions)` transition function layered
//! on top of the [`crate::commitment`] ledger.

mod action;
mod error;
mod event;
mod lifecycle;
mod machine;

pub use action::Action;
pub use error::ChannelError;
pub use event::{
    ClosingSignedMsg, Event, HostCommand, PeerMessage, ShutdownMsg,
};
pub use lifecycle::{AnyChannelId, ChannelState};
pub use machine::process;
