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

use crate::sha_chain::ShaChainError;

/// Errors raised by the commitment ledger's operations (§4.3.2).
///
/// Validation errors (everything but the cryptographic-fault variants) leave
/// the [`super::Commitments`] value unchanged and are reported to the caller
/// as a typed, non-fatal rejection; the cryptographic-fault variants are
/// channel-fatal and should drive the channel state machine to
/// `ErrorInformationLeak`.
#[derive(
    Clone, PartialEq, Eq, Hash, Debug, Display, Error, StrictEncode, StrictDecode
)]
#[display(doc_comments)]
pub enum CommitmentError {
    /// adding this HTLC would leave insufficient funds available on the
    /// sending side
    InsufficientFunds,

    /// HTLC value {0} msat is below the counterparty's dust limit
    HtlcValueTooSmall(u64),

    /// HTLC CLTV expiry {0} exceeds the node's maximum accepted expiry
    ExpiryTooBig(u32),

    /// accepting this HTLC would exceed the negotiated maximum number of
    /// in-flight HTLCs
    TooManyAcceptedHtlcs,

    /// no in-flight HTLC with id {0} is known to this commitment
    UnknownHtlcId(u64),

    /// the supplied preimage does not hash to the HTLC's payment hash
    InvalidHtlcPreimage,

    /// the proposed feerate of {0} sat/kw cannot be afforded by the payer's
    /// current balance
    CannotAffordFees(u32),

    /// the proposed feerate of {0} sat/kw violates the fee update
    /// precondition (only the funder may update the fee)
    FeeratePrecondition(u32),

    /// there are no pending changes to sign
    CannotSignWithoutChanges,

    /// the remote commitment signature did not verify
    InvalidCommitmentSignature,

    /// an HTLC signature accompanying the commitment signature did not
    /// verify
    InvalidHtlcSignature,

    /// the revealed per-commitment secret does not match the expected
    /// revocation
    InvalidRevocation,

    /// the peer's commitment number does not match our expectation;
    /// channel state has diverged
    CommitmentSyncError,

    /// received amount {received_msat} msat is outside the accepted range
    /// for invoice amount {invoice_msat} msat
    PaymentAmountOutOfRange { received_msat: u64, invoice_msat: u64 },

    /// per-commitment secret storage fault: {0}
    #[from]
    ShaChain(ShaChainError),
}
