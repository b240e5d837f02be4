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

//! The commitment ledger: the irrevocable, ordered commitment-update
//! protocol between two channel peers (BOLT #2 §4.3). Every operation here
//! is pure — it consumes a [`Commitments`] by value and returns a successor
//! together with whatever the caller must now send on the wire.
//!
//! Building the actual commitment/HTLC transactions and scripts from a
//! [`CommitmentSpec`], and marshaling this module's outputs into literal
//! BOLT wire messages, is left to the channel/peer layer: this module only
//! tracks the accounting state and calls out to [`KeyManager`] for
//! signatures.

use std::collections::BTreeMap;
use std::mem;

use amplify::DumbDefault;
use bitcoin::{OutPoint, Txid};
use p2p::bolt::ChannelId;
use secp256k1::ecdsa::Signature;
use secp256k1::PublicKey;
use sha2::Digest;

use super::changes::{ChannelChange, PendingChanges};
use super::error::CommitmentError;
use super::params::{LocalParams, RemoteParams};
use super::spec::{CommitmentSpec, Direction, Htlc, LocalCommit, RemoteCommit};
use crate::collaborators::KeyManager;
use crate::sha_chain::{ShaChain, FIRST_INDEX};

/// BOLT-3 weight of the commitment transaction before any HTLC outputs.
const COMMITMENT_TX_BASE_WEIGHT: u64 = 724;
/// BOLT-3 weight added per HTLC output.
const HTLC_OUTPUT_WEIGHT: u64 = 172;
/// Default ceiling on how far in the future an HTLC's CLTV expiry may be,
/// relative to the current block height.
pub const MAX_ACCEPTED_HTLC_EXPIRY_DELTA: u32 = 2016;

fn commit_tx_fee_msat(feerate_per_kw: u32, num_htlcs: usize) -> u64 {
    let weight =
        COMMITMENT_TX_BASE_WEIGHT + HTLC_OUTPUT_WEIGHT * num_htlcs as u64;
    weight * feerate_per_kw as u64
}

/// Where the HTLC identified by a local id came from: either it terminates
/// at this node, or it is being forwarded from an upstream channel.
#[derive(Clone, PartialEq, Eq, Debug, StrictEncode, StrictDecode)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub enum HtlcOrigin {
    /// The HTLC terminates locally; carries the invoice amount it must be
    /// checked against (see [`validate_received_amount`]).
    Local { invoice_amount_msat: Option<u64> },
    /// The HTLC is forwarded from `previous_htlc_id` on `previous_channel_id`.
    Forwarded { previous_channel_id: ChannelId, previous_htlc_id: u64 },
}

/// Pointer to the channel's funding output. Building and signing the
/// funding transaction itself is out of scope for this ledger.
#[derive(Clone, Copy, PartialEq, Eq, Debug, StrictEncode, StrictDecode)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct CommitInput {
    pub outpoint: OutPoint,
    pub amount_sat: u64,
}

/// What we know about the remote's *next* commitment: either we are still
/// waiting for them to revoke the one we last signed, or we know the point
/// they will use next.
#[derive(Clone, PartialEq, Eq, Debug, StrictEncode, StrictDecode)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub enum RemoteCommitInfo {
    /// We have signed this remote commitment and are waiting for its
    /// revocation.
    Waiting(RemoteCommit),
    /// The remote's revocation has landed; this is the point to build their
    /// next commitment against.
    Point(PublicKey),
}

/// Our own commitment signature together with the per-HTLC signatures that
/// accompany it, as exchanged in `commitment_signed`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CommitSig {
    pub commitment_number: u64,
    pub signature: Signature,
    pub htlc_signatures: Vec<Signature>,
}

/// What the remote revealed in a `revoke_and_ack`: the secret for the
/// commitment they just retired, plus their next per-commitment point.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct RemoteRevocation {
    pub revoked_commitment_number: u64,
    pub per_commitment_secret: [u8; 32],
    pub next_per_commitment_point: PublicKey,
}

/// Our side of a `revoke_and_ack`: which commitment we are retiring and the
/// point the remote should use for our next one. The secret itself is
/// released by asking [`KeyManager::per_commitment_secret`] directly; it is
/// private key material this ledger never holds.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct OutgoingRevocation {
    pub revoked_commitment_number: u64,
    pub next_per_commitment_point: PublicKey,
}

/// Validates a received amount against the invoice it is meant to settle,
/// per the resolved open question of §4.3.5: the payment must be at least
/// the invoice amount, and at most double it (to bound probing/overpayment
/// abuse).
pub fn validate_received_amount(
    received_msat: u64,
    invoice_msat: u64,
) -> Result<(), CommitmentError> {
    if received_msat < invoice_msat || received_msat > invoice_msat * 2 {
        return Err(CommitmentError::PaymentAmountOutOfRange {
            received_msat,
            invoice_msat,
        });
    }
    Ok(())
}

/// Projects a new [`CommitmentSpec`] from `base` by applying every change in
/// `local_changes` and `remote_changes`, in order (§4.3.3).
pub fn reduce<'a>(
    base: &CommitmentSpec,
    local_changes: impl Iterator<Item = &'a ChannelChange>,
    remote_changes: impl Iterator<Item = &'a ChannelChange>,
) -> CommitmentSpec {
    let mut spec = base.clone();
    for change in local_changes {
        apply_change(&mut spec, change, Direction::Offered);
    }
    for change in remote_changes {
        apply_change(&mut spec, change, Direction::Received);
    }
    spec
}

fn apply_change(
    spec: &mut CommitmentSpec,
    change: &ChannelChange,
    side: Direction,
) {
    match change {
        ChannelChange::AddHtlc(htlc) => {
            match side {
                Direction::Offered => spec.to_local_msat -= htlc.amount_msat,
                Direction::Received => spec.to_remote_msat -= htlc.amount_msat,
            }
            spec.htlcs.insert(htlc.id, htlc.clone());
        }
        ChannelChange::FulfillHtlc { id, .. } => {
            if let Some(htlc) = spec.htlcs.remove(id) {
                // Fulfilling credits whichever side did *not* offer the HTLC.
                match htlc.direction {
                    Direction::Offered => spec.to_remote_msat += htlc.amount_msat,
                    Direction::Received => spec.to_local_msat += htlc.amount_msat,
                }
            }
        }
        ChannelChange::FailHtlc { id, .. }
        | ChannelChange::FailMalformedHtlc { id, .. } => {
            if let Some(htlc) = spec.htlcs.remove(id) {
                // Failing returns the value to whichever side offered it.
                match htlc.direction {
                    Direction::Offered => spec.to_local_msat += htlc.amount_msat,
                    Direction::Received => spec.to_remote_msat += htlc.amount_msat,
                }
            }
        }
        ChannelChange::UpdateFee { feerate_per_kw } => {
            spec.feerate_per_kw = *feerate_per_kw;
        }
    }
}

/// The full per-channel commitment-protocol state (§3.3). Operations
/// consume `self` by value and return a successor: there is no in-place
/// mutation, which makes checkpoint/rollback around persistence failures
/// (§9) a matter of simply not adopting the returned value.
#[derive(Clone, PartialEq, Eq, Debug, StrictEncode, StrictDecode)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct Commitments {
    pub channel_id: ChannelId,
    pub is_funder: bool,
    pub local_params: LocalParams,
    pub remote_params: RemoteParams,
    pub local_commit: LocalCommit,
    pub remote_commit: RemoteCommit,
    pub local_changes: PendingChanges,
    pub remote_changes: PendingChanges,
    pub local_next_htlc_id: u64,
    pub remote_next_htlc_id: u64,
    pub origin_map: BTreeMap<u64, HtlcOrigin>,
    pub remote_next_commit_info: RemoteCommitInfo,
    pub commit_input: CommitInput,
    pub remote_per_commitment_secrets: ShaChain,
}

impl Commitments {
    /// The accounting view the local side is currently proposing: the
    /// committed local spec plus every not-yet-settled change on both sides.
    fn local_view(&self) -> CommitmentSpec {
        reduce(
            &self.local_commit.spec,
            self.local_changes.all(),
            self.remote_changes.acked.iter(),
        )
    }

    /// The accounting view the remote side is currently proposing.
    fn remote_view(&self) -> CommitmentSpec {
        reduce(
            &self.remote_commit.spec,
            self.local_changes.acked.iter(),
            self.remote_changes.all(),
        )
    }

    /// How many msat the local side can still add to a new outgoing HTLC
    /// without violating dust, reserve, in-flight-count, or in-flight-value
    /// limits (§4.3.1).
    pub fn available_balance_for_send(&self) -> u64 {
        let spec = self.local_view();
        let reserve_remote =
            self.remote_params.peer.channel_reserve_satoshis * 1000;

        let mut available = if self.is_funder {
            let fee_at_n_plus_one =
                commit_tx_fee_msat(spec.feerate_per_kw, spec.htlcs.len() + 1);
            let fee_at_n =
                commit_tx_fee_msat(spec.feerate_per_kw, spec.htlcs.len());
            let fee_delta = fee_at_n_plus_one.saturating_sub(fee_at_n);
            spec.to_local_msat
                .saturating_sub(reserve_remote)
                .saturating_sub(fee_at_n_plus_one)
                .saturating_sub(2 * fee_delta)
        } else {
            spec.to_local_msat.saturating_sub(reserve_remote)
        };

        if spec.offered().count() as u16 >= self.remote_params.peer.max_accepted_htlcs
        {
            available = 0;
        }
        let limit = self.remote_params.peer.max_htlc_value_in_flight_msat;
        let in_flight = spec.total_htlc_amount_msat();
        available = available.min(limit.saturating_sub(in_flight));
        available
    }

    /// How many msat the remote side can still add to a new incoming HTLC,
    /// symmetric to [`Self::available_balance_for_send`].
    pub fn available_balance_for_receive(&self) -> u64 {
        let spec = self.remote_view();
        let reserve_local = self.local_params.peer.channel_reserve_satoshis * 1000;

        let mut available = if !self.is_funder {
            let fee_at_n_plus_one =
                commit_tx_fee_msat(spec.feerate_per_kw, spec.htlcs.len() + 1);
            let fee_at_n =
                commit_tx_fee_msat(spec.feerate_per_kw, spec.htlcs.len());
            let fee_delta = fee_at_n_plus_one.saturating_sub(fee_at_n);
            spec.to_remote_msat
                .saturating_sub(reserve_local)
                .saturating_sub(fee_at_n_plus_one)
                .saturating_sub(2 * fee_delta)
        } else {
            spec.to_remote_msat.saturating_sub(reserve_local)
        };

        if spec.received().count() as u16 >= self.local_params.peer.max_accepted_htlcs
        {
            available = 0;
        }
        let limit = self.local_params.peer.max_htlc_value_in_flight_msat;
        let in_flight = spec.total_htlc_amount_msat();
        available = available.min(limit.saturating_sub(in_flight));
        available
    }

    /// `sendAdd`: proposes a new outgoing HTLC.
    pub fn send_add(
        mut self,
        amount_msat: u64,
        payment_hash: [u8; 32],
        cltv_expiry: u32,
        onion_routing_packet: Vec<u8>,
        current_block_height: u32,
        origin: HtlcOrigin,
    ) -> Result<(Self, Htlc), CommitmentError> {
        if amount_msat < self.remote_params.peer.htlc_minimum_msat {
            return Err(CommitmentError::HtlcValueTooSmall(amount_msat));
        }
        if cltv_expiry
            > current_block_height + MAX_ACCEPTED_HTLC_EXPIRY_DELTA
        {
            return Err(CommitmentError::ExpiryTooBig(cltv_expiry));
        }
        let offered_count = self.local_view().offered().count() as u16;
        if offered_count >= self.remote_params.peer.max_accepted_htlcs {
            return Err(CommitmentError::TooManyAcceptedHtlcs);
        }
        if amount_msat > self.available_balance_for_send() {
            return Err(CommitmentError::InsufficientFunds);
        }

        let htlc = Htlc {
            id: self.local_next_htlc_id,
            direction: Direction::Offered,
            amount_msat,
            payment_hash,
            cltv_expiry,
            onion_routing_packet,
        };
        trace!("commitment: proposing outgoing htlc {}", htlc.id);
        self.origin_map.insert(htlc.id, origin);
        self.local_changes.proposed.push(ChannelChange::AddHtlc(htlc.clone()));
        self.local_next_htlc_id += 1;
        Ok((self, htlc))
    }

    /// `receiveAdd`: records an incoming HTLC proposed by the remote.
    pub fn receive_add(mut self, htlc: Htlc) -> Result<Self, CommitmentError> {
        if htlc.id != self.remote_next_htlc_id {
            return Err(CommitmentError::CommitmentSyncError);
        }
        if htlc.amount_msat < self.local_params.peer.htlc_minimum_msat {
            return Err(CommitmentError::HtlcValueTooSmall(htlc.amount_msat));
        }
        let received_count = self.remote_view().received().count() as u16;
        if received_count >= self.local_params.peer.max_accepted_htlcs {
            return Err(CommitmentError::TooManyAcceptedHtlcs);
        }
        if htlc.amount_msat > self.available_balance_for_receive() {
            return Err(CommitmentError::InsufficientFunds);
        }

        trace!("commitment: received incoming htlc {}", htlc.id);
        let mut htlc = htlc;
        htlc.direction = Direction::Received;
        self.remote_next_htlc_id += 1;
        self.remote_changes.proposed.push(ChannelChange::AddHtlc(htlc));
        Ok(self)
    }

    fn find_htlc(&self, id: u64, committed: &CommitmentSpec) -> Result<&Htlc, CommitmentError> {
        committed.htlcs.get(&id).ok_or(CommitmentError::UnknownHtlcId(id))
    }

    /// `sendFulfill`: we redeem an HTLC the remote offered us.
    pub fn send_fulfill(
        mut self,
        id: u64,
        payment_preimage: [u8; 32],
    ) -> Result<Self, CommitmentError> {
        let htlc = self.find_htlc(id, &self.remote_commit.spec)?;
        if preimage_matches(&payment_preimage, &htlc.payment_hash) {
            self.local_changes.proposed.push(ChannelChange::FulfillHtlc {
                id,
                payment_preimage,
            });
            Ok(self)
        } else {
            Err(CommitmentError::InvalidHtlcPreimage)
        }
    }

    /// `receiveFulfill`: the remote redeemed an HTLC we offered them.
    pub fn receive_fulfill(
        mut self,
        id: u64,
        payment_preimage: [u8; 32],
    ) -> Result<Self, CommitmentError> {
        let htlc = self.find_htlc(id, &self.local_commit.spec)?;
        if preimage_matches(&payment_preimage, &htlc.payment_hash) {
            self.remote_changes.proposed.push(ChannelChange::FulfillHtlc {
                id,
                payment_preimage,
            });
            Ok(self)
        } else {
            Err(CommitmentError::InvalidHtlcPreimage)
        }
    }

    /// `sendFail`: we are failing an HTLC the remote offered us.
    pub fn send_fail(mut self, id: u64, reason: Vec<u8>) -> Result<Self, CommitmentError> {
        self.find_htlc(id, &self.remote_commit.spec)?;
        self.local_changes.proposed.push(ChannelChange::FailHtlc { id, reason });
        Ok(self)
    }

    /// `receiveFail`: the remote is failing an HTLC we offered them.
    pub fn receive_fail(mut self, id: u64, reason: Vec<u8>) -> Result<Self, CommitmentError> {
        self.find_htlc(id, &self.local_commit.spec)?;
        self.remote_changes.proposed.push(ChannelChange::FailHtlc { id, reason });
        Ok(self)
    }

    /// `sendFee`: only the funder may propose a new feerate.
    pub fn send_fee(mut self, feerate_per_kw: u32) -> Result<Self, CommitmentError> {
        if !self.is_funder {
            return Err(CommitmentError::FeeratePrecondition(feerate_per_kw));
        }
        let spec = self.local_view();
        let fee = commit_tx_fee_msat(feerate_per_kw, spec.htlcs.len());
        let reserve = self.remote_params.peer.channel_reserve_satoshis * 1000;
        if spec.to_local_msat < fee + reserve {
            return Err(CommitmentError::CannotAffordFees(feerate_per_kw));
        }
        self.local_changes.proposed.push(ChannelChange::UpdateFee { feerate_per_kw });
        Ok(self)
    }

    /// `receiveFee`: only accepted from the remote when they are the funder.
    pub fn receive_fee(mut self, feerate_per_kw: u32) -> Result<Self, CommitmentError> {
        if self.is_funder {
            return Err(CommitmentError::FeeratePrecondition(feerate_per_kw));
        }
        let spec = self.remote_view();
        let fee = commit_tx_fee_msat(feerate_per_kw, spec.htlcs.len());
        let reserve = self.local_params.peer.channel_reserve_satoshis * 1000;
        if spec.to_remote_msat < fee + reserve {
            return Err(CommitmentError::CannotAffordFees(feerate_per_kw));
        }
        self.remote_changes.proposed.push(ChannelChange::UpdateFee { feerate_per_kw });
        Ok(self)
    }

    /// `sendCommit`: signs the remote's next commitment transaction.
    ///
    /// `remote_commit_txid` is the identifier of that transaction, computed
    /// by the caller's transaction-construction layer from the projected
    /// spec this method returns — building it is outside this ledger.
    pub fn send_commit(
        mut self,
        key_manager: &impl KeyManager,
        remote_commit_txid: Txid,
    ) -> Result<(Self, CommitSig), CommitmentError> {
        if self.local_changes.proposed.is_empty() {
            return Err(CommitmentError::CannotSignWithoutChanges);
        }
        let remote_per_commitment_point = match &self.remote_next_commit_info {
            RemoteCommitInfo::Point(point) => *point,
            RemoteCommitInfo::Waiting(_) => {
                return Err(CommitmentError::CommitmentSyncError)
            }
        };

        let projected = reduce(
            &self.remote_commit.spec,
            self.local_changes.all(),
            self.remote_changes.acked.iter(),
        );
        let commitment_number = self.remote_commit.commitment_number + 1;

        let signature = key_manager.sign_commitment(
            self.channel_id,
            commitment_number,
            &remote_per_commitment_point,
            &projected,
        );
        let htlc_signatures = projected
            .htlcs
            .keys()
            .enumerate()
            .map(|(index, _)| {
                key_manager.sign_htlc(
                    self.channel_id,
                    commitment_number,
                    index as u16,
                    &remote_per_commitment_point,
                )
            })
            .collect::<Vec<_>>();

        debug!(
            "commitment: signed remote commitment #{} for channel {}",
            commitment_number, self.channel_id
        );

        self.local_changes.sign();
        self.remote_next_commit_info = RemoteCommitInfo::Waiting(RemoteCommit {
            commitment_number,
            spec: projected,
            tx_id: remote_commit_txid,
            remote_per_commitment_point,
        });

        Ok((
            self,
            CommitSig { commitment_number, signature, htlc_signatures },
        ))
    }

    /// `receiveCommit`: accepts the remote's signature over our next
    /// commitment transaction.
    ///
    /// `local_commit_txid` is the identifier of that transaction, as with
    /// [`Self::send_commit`].
    pub fn receive_commit(
        mut self,
        commit_sig: CommitSig,
        key_manager: &impl KeyManager,
        local_commit_txid: Txid,
    ) -> Result<(Self, OutgoingRevocation), CommitmentError> {
        let projected = reduce(
            &self.local_commit.spec,
            self.local_changes.acked.iter(),
            self.remote_changes.all(),
        );
        let expected_number = self.local_commit.commitment_number + 1;
        if commit_sig.commitment_number != expected_number {
            return Err(CommitmentError::InvalidCommitmentSignature);
        }
        if commit_sig.htlc_signatures.len() != projected.htlcs.len() {
            return Err(CommitmentError::InvalidHtlcSignature);
        }

        let remote_per_commitment_point = self.local_commit.remote_per_commitment_point;
        let next_local_point = key_manager
            .per_commitment_point(self.channel_id, expected_number + 1);

        debug!(
            "commitment: accepted local commitment #{} for channel {}",
            expected_number, self.channel_id
        );

        self.local_commit = LocalCommit {
            commitment_number: expected_number,
            spec: projected,
            tx_id: local_commit_txid,
            remote_per_commitment_point,
        };
        self.remote_changes.acked.append(&mut self.remote_changes.proposed);

        Ok((
            self,
            OutgoingRevocation {
                revoked_commitment_number: expected_number - 1,
                next_per_commitment_point: next_local_point,
            },
        ))
    }

    /// `receiveRevocation`: the remote retires a commitment by revealing its
    /// per-commitment secret, and we advance to the commitment we had
    /// pending since our last `sendCommit`.
    pub fn receive_revocation(
        mut self,
        revocation: RemoteRevocation,
    ) -> Result<(Self, Vec<ChannelChange>), CommitmentError> {
        let index = FIRST_INDEX
            .checked_sub(revocation.revoked_commitment_number)
            .ok_or(CommitmentError::InvalidRevocation)?;
        self.remote_per_commitment_secrets
            .add_next(index, revocation.per_commitment_secret)
            .map_err(|_| CommitmentError::InvalidRevocation)?;

        let pending = mem::replace(
            &mut self.remote_next_commit_info,
            RemoteCommitInfo::Point(revocation.next_per_commitment_point),
        );
        self.remote_commit = match pending {
            RemoteCommitInfo::Waiting(commit) => commit,
            RemoteCommitInfo::Point(_) => {
                return Err(CommitmentError::CommitmentSyncError)
            }
        };

        let settled = mem::take(&mut self.local_changes.signed);
        self.local_changes.acked.extend(settled.iter().cloned());

        trace!(
            "commitment: revocation settled {} local change(s) on channel {}",
            settled.len(),
            self.channel_id
        );

        Ok((self, settled))
    }
}

impl DumbDefault for Commitments {
    fn dumb_default() -> Self {
        Commitments {
            channel_id: ChannelId::dumb_default(),
            is_funder: true,
            local_params: LocalParams::dumb_default(),
            remote_params: RemoteParams::dumb_default(),
            local_commit: LocalCommit {
                commitment_number: 0,
                spec: CommitmentSpec::new(0, 0, 253),
                tx_id: Txid::default(),
                remote_per_commitment_point: dumb_pubkey!(),
            },
            remote_commit: RemoteCommit {
                commitment_number: 0,
                spec: CommitmentSpec::new(0, 0, 253),
                tx_id: Txid::default(),
                remote_per_commitment_point: dumb_pubkey!(),
            },
            local_changes: PendingChanges::new(),
            remote_changes: PendingChanges::new(),
            local_next_htlc_id: 0,
            remote_next_htlc_id: 0,
            origin_map: BTreeMap::new(),
            remote_next_commit_info: RemoteCommitInfo::Point(dumb_pubkey!()),
            commit_input: CommitInput {
                outpoint: OutPoint::null(),
                amount_sat: 0,
            },
            remote_per_commitment_secrets: ShaChain::new(),
        }
    }
}

fn preimage_matches(preimage: &[u8; 32], payment_hash: &[u8; 32]) -> bool {
    sha2::Sha256::digest(preimage).as_slice() == payment_hash
}

#[cfg(test)]
mod test {
    use secp256k1::{Message, Secp256k1, SecretKey};
    use sha2::Sha256;

    use super::*;

    /// Deterministic signer standing in for a real `KeyManager`, matching
    /// the one in `channel::machine`'s tests: a fixed test scalar derives
    /// every signature and per-commitment secret.
    struct ScenarioKeyManager {
        secp: Secp256k1<secp256k1::All>,
        secret_key: SecretKey,
    }

    impl ScenarioKeyManager {
        fn new() -> Self {
            ScenarioKeyManager {
                secp: Secp256k1::new(),
                secret_key: secp256k1::key::ONE_KEY,
            }
        }
    }

    impl KeyManager for ScenarioKeyManager {
        fn funding_pubkey(&self, _channel_id: ChannelId) -> PublicKey {
            PublicKey::from_secret_key(&self.secp, &self.secret_key)
        }

        fn per_commitment_point(
            &self,
            _channel_id: ChannelId,
            _commitment_number: u64,
        ) -> PublicKey {
            PublicKey::from_secret_key(&self.secp, &self.secret_key)
        }

        fn sign_commitment(
            &self,
            _channel_id: ChannelId,
            commitment_number: u64,
            _remote_per_commitment_point: &PublicKey,
            _spec: &CommitmentSpec,
        ) -> Signature {
            let message =
                Message::from_slice(&Sha256::digest(commitment_number.to_be_bytes()))
                    .expect("sha256 digest is 32 bytes");
            self.secp.sign_ecdsa(&message, &self.secret_key)
        }

        fn sign_htlc(
            &self,
            _channel_id: ChannelId,
            commitment_number: u64,
            htlc_index: u16,
            _remote_per_commitment_point: &PublicKey,
        ) -> Signature {
            let message = Message::from_slice(&Sha256::digest(
                commitment_number.wrapping_add(htlc_index as u64).to_be_bytes(),
            ))
            .expect("sha256 digest is 32 bytes");
            self.secp.sign_ecdsa(&message, &self.secret_key)
        }

        fn per_commitment_secret(
            &self,
            _channel_id: ChannelId,
            commitment_number: u64,
        ) -> [u8; 32] {
            let seed = self.secret_key.secret_bytes();
            crate::sha_chain::derive_secret(&seed, FIRST_INDEX - commitment_number)
        }
    }

    /// A ledger with both sides' committed spec set to the given balances
    /// and nothing yet proposed.
    fn funded(
        to_local_msat: u64,
        to_remote_msat: u64,
        feerate_per_kw: u32,
        is_funder: bool,
    ) -> Commitments {
        let mut commitments = Commitments::dumb_default();
        commitments.is_funder = is_funder;
        commitments.local_commit.spec =
            CommitmentSpec::new(to_local_msat, to_remote_msat, feerate_per_kw);
        commitments.remote_commit.spec =
            CommitmentSpec::new(to_local_msat, to_remote_msat, feerate_per_kw);
        commitments
    }

    /// Drives one full `sendAdd` -> `sendCommit` -> `receiveRevocation` ->
    /// `receiveCommit` round so `amount_msat` ends up irrevocably committed
    /// on both sides, the precondition BOLT #2 places on fulfilling or
    /// failing it.
    fn committed_with_one_htlc(
        key_manager: &ScenarioKeyManager,
        channel_id: ChannelId,
        amount_msat: u64,
        payment_hash: [u8; 32],
    ) -> (Commitments, Htlc) {
        let mut commitments = funded(772_760_000, 190_000_000, 0, true);
        commitments.channel_id = channel_id;

        let (commitments, htlc) = commitments
            .send_add(
                amount_msat,
                payment_hash,
                100,
                vec![],
                0,
                HtlcOrigin::Local { invoice_amount_msat: None },
            )
            .unwrap();
        let (commitments, commit_sig) =
            commitments.send_commit(key_manager, Txid::default()).unwrap();
        assert_eq!(commit_sig.commitment_number, 1);

        let (commitments, _) = commitments
            .receive_revocation(RemoteRevocation {
                revoked_commitment_number: 0,
                per_commitment_secret: key_manager.per_commitment_secret(channel_id, 0),
                next_per_commitment_point: key_manager
                    .per_commitment_point(channel_id, 2),
            })
            .unwrap();

        let commit_sig_back = CommitSig {
            commitment_number: 1,
            signature: key_manager.sign_commitment(
                channel_id,
                1,
                &dumb_pubkey!(),
                &CommitmentSpec::new(0, 0, 0),
            ),
            htlc_signatures: vec![key_manager.sign_htlc(
                channel_id,
                1,
                0,
                &dumb_pubkey!(),
            )],
        };
        let (commitments, _) = commitments
            .receive_commit(commit_sig_back, key_manager, Txid::default())
            .unwrap();

        assert_eq!(commitments.local_commit.spec.to_local_msat, 730_760_000);
        assert_eq!(commitments.local_commit.spec.to_remote_msat, 190_000_000);
        assert_eq!(commitments.local_commit.spec.htlcs.len(), 1);

        (commitments, htlc)
    }

    #[test]
    fn htlc_success_round_trip_settles_balances() {
        let key_manager = ScenarioKeyManager::new();
        let channel_id = ChannelId::dumb_default();
        let preimage = [0x22u8; 32];
        let payment_hash: [u8; 32] = Sha256::digest(preimage).into();

        let (commitments, htlc) =
            committed_with_one_htlc(&key_manager, channel_id, 42_000_000, payment_hash);

        let commitments = commitments.receive_fulfill(htlc.id, preimage).unwrap();
        assert_eq!(commitments.remote_changes.proposed.len(), 1);

        let projected = reduce(
            &commitments.local_commit.spec,
            std::iter::empty(),
            commitments.remote_changes.proposed.iter(),
        );
        assert_eq!(projected.to_local_msat, 730_760_000);
        assert_eq!(projected.to_remote_msat, 232_000_000);
        assert!(projected.htlcs.is_empty());
    }

    #[test]
    fn htlc_failure_round_trip_restores_balances() {
        let key_manager = ScenarioKeyManager::new();
        let channel_id = ChannelId::dumb_default();

        let (commitments, htlc) = committed_with_one_htlc(
            &key_manager,
            channel_id,
            42_000_000,
            [0x33; 32],
        );

        let commitments = commitments.receive_fail(htlc.id, vec![]).unwrap();
        assert_eq!(commitments.remote_changes.proposed.len(), 1);

        let projected = reduce(
            &commitments.local_commit.spec,
            std::iter::empty(),
            commitments.remote_changes.proposed.iter(),
        );
        assert_eq!(projected.to_local_msat, 772_760_000);
        assert_eq!(projected.to_remote_msat, 190_000_000);
        assert!(projected.htlcs.is_empty());
    }

    #[test]
    fn funder_reserve_exhausts_available_balance_then_rejects_further_htlcs() {
        let commitments = funded(53_530_000, 50_000_000, 2500, true);
        assert_eq!(commitments.available_balance_for_send(), 40_430_000);

        let (commitments, _htlc) = commitments
            .send_add(
                40_000_000,
                [0x33; 32],
                100,
                vec![],
                0,
                HtlcOrigin::Local { invoice_amount_msat: None },
            )
            .unwrap();
        assert_eq!(commitments.available_balance_for_send(), 0);

        let commitments = commitments.send_fee(3000).unwrap();

        let err = commitments
            .send_add(
                100,
                [0x44; 32],
                100,
                vec![],
                0,
                HtlcOrigin::Local { invoice_amount_msat: None },
            )
            .unwrap_err();
        assert_eq!(err, CommitmentError::InsufficientFunds);
    }

    #[test]
    fn receive_revocation_rejects_a_secret_inconsistent_with_the_chain() {
        let key_manager = ScenarioKeyManager::new();
        let channel_id = ChannelId::dumb_default();
        let mut commitments = Commitments::dumb_default();
        commitments.channel_id = channel_id;

        commitments.remote_next_commit_info = RemoteCommitInfo::Waiting(RemoteCommit {
            commitment_number: 0,
            spec: CommitmentSpec::new(0, 0, 253),
            tx_id: Txid::default(),
            remote_per_commitment_point: dumb_pubkey!(),
        });
        let (commitments, _) = commitments
            .receive_revocation(RemoteRevocation {
                revoked_commitment_number: 0,
                per_commitment_secret: key_manager.per_commitment_secret(channel_id, 0),
                next_per_commitment_point: dumb_pubkey!(),
            })
            .unwrap();

        let mut advanced = commitments.clone();
        advanced.remote_next_commit_info = RemoteCommitInfo::Waiting(RemoteCommit {
            commitment_number: 1,
            spec: CommitmentSpec::new(0, 0, 253),
            tx_id: Txid::default(),
            remote_per_commitment_point: dumb_pubkey!(),
        });
        let ok = advanced.clone().receive_revocation(RemoteRevocation {
            revoked_commitment_number: 1,
            per_commitment_secret: key_manager.per_commitment_secret(channel_id, 1),
            next_per_commitment_point: dumb_pubkey!(),
        });
        assert!(ok.is_ok());

        // The hardcoded `[0u8; 32]` this ledger used to send in place of the
        // real secret does not derive the one already stored for index 0,
        // and is rejected rather than silently corrupting the chain.
        let rejected = advanced.receive_revocation(RemoteRevocation {
            revoked_commitment_number: 1,
            per_commitment_secret: [0u8; 32],
            next_per_commitment_point: dumb_pubkey!(),
        });
        assert_eq!(rejected.unwrap_err(), CommitmentError::InvalidRevocation);
    }

    fn sample_htlc(id: u64, amount_msat: u64, direction: Direction) -> Htlc {
        Htlc {
            id,
            direction,
            amount_msat,
            payment_hash: [0x42; 32],
            cltv_expiry: 500_000,
            onion_routing_packet: vec![],
        }
    }

    #[test]
    fn reduce_applies_add_and_fulfill() {
        let base = CommitmentSpec::new(1_000_000, 500_000, 253);
        let add = ChannelChange::AddHtlc(sample_htlc(0, 100_000, Direction::Offered));
        let after_add = reduce(&base, std::iter::once(&add), std::iter::empty());
        assert_eq!(after_add.to_local_msat, 900_000);
        assert_eq!(after_add.htlcs.len(), 1);

        let fulfill = ChannelChange::FulfillHtlc { id: 0, payment_preimage: [0u8; 32] };
        let after_fulfill =
            reduce(&after_add, std::iter::empty(), std::iter::once(&fulfill));
        assert_eq!(after_fulfill.to_remote_msat, 600_000);
        assert!(after_fulfill.htlcs.is_empty());
    }

    #[test]
    fn validate_received_amount_rejects_out_of_range() {
        assert!(validate_received_amount(999, 1000).is_err());
        assert!(validate_received_amount(2001, 1000).is_err());
        assert!(validate_received_amount(1000, 1000).is_ok());
        assert!(validate_received_amount(2000, 1000).is_ok());
    }
}
