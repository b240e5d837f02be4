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

//! The static per-side channel parameters the [`super::Commitments`]
//! aggregate is built against: the negotiated [`PeerParams`] plus the
//! side's public keyset (§3.3).

use amplify::DumbDefault;

use super::keyset::{LocalKeyset, RemoteKeyset};
use super::policy::PeerParams;

/// Static parameters for the local side of a channel: the negotiated
/// [`PeerParams`] plus the public halves of the local keyset.
#[derive(Clone, PartialEq, Eq, Debug, StrictEncode, StrictDecode)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct LocalParams {
    pub peer: PeerParams,
    pub keyset: LocalKeyset,
}

/// Static parameters for the remote side of a channel: the negotiated
/// [`PeerParams`] plus the remote keyset advertised in `open_channel` /
/// `accept_channel`.
#[derive(Clone, PartialEq, Eq, Debug, StrictEncode, StrictDecode)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct RemoteParams {
    pub peer: PeerParams,
    pub keyset: RemoteKeyset,
}

impl DumbDefault for LocalParams {
    fn dumb_default() -> Self {
        LocalParams {
            peer: PeerParams::default(),
            keyset: LocalKeyset::dumb_default(),
        }
    }
}

impl DumbDefault for RemoteParams {
    fn dumb_default() -> Self {
        RemoteParams {
            peer: PeerParams::default(),
            keyset: RemoteKeyset::dumb_default(),
        }
    }
}
