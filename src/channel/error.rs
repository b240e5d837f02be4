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

use crate::commitment::{CommitmentError, PolicyError};

/// Errors the channel state machine can report from `process` (§7).
///
/// A [`ChannelError::Commitment`] or [`ChannelError::Policy`] failure is
/// non-fatal unless it arises from a cryptographic fault (see
/// [`CommitmentError`]'s own fatal/non-fatal split); every other variant
/// reflects an event that cannot be valid in the channel's current state and
/// is reported to the host without mutating the state.
#[derive(Clone, PartialEq, Eq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum ChannelError {
    /// received {0} while in a state that cannot process it
    UnexpectedEvent(String),

    /// the remote peer's proposed channel parameters were rejected: {0}
    #[from]
    Policy(PolicyError),

    /// commitment ledger rejected the operation: {0}
    #[from]
    Commitment(CommitmentError),

    /// the remote peer reported a protocol error: {0}
    RemoteError(String),

    /// no channel is known under this identifier
    UnknownChannel,
}
