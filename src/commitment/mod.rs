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

//! The BOLT #2 commitment-update protocol: a pure accounting ledger over
//! HTLCs and balances, plus the static per-side parameters it is negotiated
//! against.

mod changes;
mod commitments;
mod error;
mod keyset;
mod params;
mod policy;
mod spec;

pub use p2p::bolt::ChannelId;

pub use changes::{ChannelChange, PendingChanges};
pub use commitments::{
    reduce, validate_received_amount, CommitInput, CommitSig, Commitments,
    HtlcOrigin, OutgoingRevocation, RemoteCommitInfo, RemoteRevocation,
    MAX_ACCEPTED_HTLC_EXPIRY_DELTA,
};
pub use error::CommitmentError;
pub use keyset::{LocalKeyset, RemoteKeyset};
pub use params::{LocalParams, RemoteParams};
pub use policy::{
    CommonParams, PeerParams, Policy, PolicyError, BOLT3_DUST_LIMIT,
    BOLT3_MAX_ACCEPTED_HTLC_LIMIT,
};
pub use spec::{CommitmentSpec, Direction, Htlc, LocalCommit, RemoteCommit};
