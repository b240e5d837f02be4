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

//! The channel lifecycle state machine's transition function (§4.4).
//!
//! `process` is pure: given the current state and an event it returns the
//! successor state together with the actions the host must carry out. It
//! never touches a socket, builds a transaction, or persists anything
//! itself — see [`super::action::Action`].

use amplify::DumbDefault;
use p2p::bolt::{AcceptChannel, ChannelId, OpenChannel, TempChannelId};
use secp256k1::PublicKey;

use super::action::Action;
use super::error::ChannelError;
use super::event::{Event, HostCommand, PeerMessage};
use super::lifecycle::ChannelState;
use crate::collaborators::KeyManager;
use crate::commitment::{
    CommitInput, Commitments, LocalParams, Policy, RemoteCommitInfo,
    RemoteParams,
};

fn unexpected(event: &Event) -> ChannelError {
    ChannelError::UnexpectedEvent(event.to_string())
}

/// Advances a channel's lifecycle by one event.
///
/// `current_block_height` is the host's view of the chain tip, used only to
/// bound a proposed HTLC's `cltv_expiry` in the `Normal` state; the state
/// machine does not track height across calls itself (see [`Event::NewBlock`]).
pub fn process(
    state: ChannelState,
    event: Event,
    local_params: &LocalParams,
    policy: &Policy,
    key_manager: &impl KeyManager,
    current_block_height: u32,
) -> Result<(ChannelState, Vec<Action>), ChannelError> {
    if let Event::Disconnected = event {
        // No `Offline` wrapper exists in the state tagging (§3.4); the
        // channel just stops producing `SendMessage` actions until it next
        // sees `Connected`, which is the peer driver's concern, not ours.
        return Ok((state, vec![]));
    }

    match state {
        ChannelState::WaitForInit => wait_for_init(event, local_params, policy),
        ChannelState::WaitForOpenChannel { temporary_channel_id } => {
            wait_for_open_channel(temporary_channel_id, event, local_params, policy)
        }
        ChannelState::WaitForAcceptChannel { temporary_channel_id } => {
            wait_for_accept_channel(
                temporary_channel_id,
                event,
                local_params,
                policy,
            )
        }
        ChannelState::WaitForFundingCreated { temporary_channel_id } => {
            wait_for_funding_created(temporary_channel_id, event, key_manager)
        }
        ChannelState::WaitForFundingSigned {
            channel_id,
            funding_outpoint,
            is_funder,
        } => wait_for_funding_signed(channel_id, funding_outpoint, is_funder, event),
        ChannelState::WaitForFundingLocked {
            channel_id,
            funding_outpoint,
            is_funder,
            local_funding_locked_sent,
            remote_funding_locked_received,
        } => wait_for_funding_locked(
            channel_id,
            funding_outpoint,
            is_funder,
            local_funding_locked_sent,
            remote_funding_locked_received,
            event,
            local_params,
        ),
        ChannelState::Normal { channel_id, commitments } => {
            normal(channel_id, commitments, event, key_manager, current_block_height)
        }
        ChannelState::Shutdown {
            channel_id,
            commitments,
            local_scriptpubkey,
            remote_scriptpubkey,
        } => shutdown(
            channel_id,
            commitments,
            local_scriptpubkey,
            remote_scriptpubkey,
            event,
        ),
        ChannelState::Negotiating {
            channel_id,
            local_scriptpubkey,
            remote_scriptpubkey,
            last_fee_proposed_sat,
        } => negotiating(
            channel_id,
            local_scriptpubkey,
            remote_scriptpubkey,
            last_fee_proposed_sat,
            event,
        ),
        ChannelState::Closing { channel_id, closing_txid } => {
            closing(channel_id, closing_txid, event)
        }
        s @ ChannelState::Closed { .. } => Ok((s, vec![])),
        s @ ChannelState::ErrorInformationLeak { .. } => Ok((s, vec![])),
    }
}

fn wait_for_init(
    event: Event,
    local_params: &LocalParams,
    _policy: &Policy,
) -> Result<(ChannelState, Vec<Action>), ChannelError> {
    match event {
        Event::ExecuteCommand(HostCommand::InitFunder {
            funding_satoshis,
            push_msat,
            feerate_per_kw,
        }) => {
            let temporary_channel_id = TempChannelId::random();
            let mut open_channel = OpenChannel::dumb_default();
            open_channel.temporary_channel_id = temporary_channel_id;
            open_channel.funding_satoshis = funding_satoshis;
            open_channel.push_msat = push_msat;
            open_channel.feerate_per_kw = feerate_per_kw;
            open_channel.dust_limit_satoshis =
                local_params.peer.dust_limit_satoshis;
            open_channel.channel_reserve_satoshis =
                local_params.peer.channel_reserve_satoshis;
            open_channel.htlc_minimum_msat = local_params.peer.htlc_minimum_msat;
            open_channel.to_self_delay = local_params.peer.to_self_delay;
            open_channel.max_accepted_htlcs = local_params.peer.max_accepted_htlcs;
            open_channel.max_htlc_value_in_flight_msat =
                local_params.peer.max_htlc_value_in_flight_msat;
            open_channel.funding_pubkey = local_params.keyset.funding_pubkey;
            open_channel.revocation_basepoint =
                local_params.keyset.revocation_basepoint;
            open_channel.payment_point = local_params.keyset.payment_basepoint;
            open_channel.delayed_payment_basepoint =
                local_params.keyset.delayed_payment_basepoint;
            open_channel.htlc_basepoint = local_params.keyset.htlc_basepoint;
            open_channel.first_per_commitment_point =
                local_params.keyset.first_per_commitment_point;

            debug!(
                "channel: sending open_channel for temporary id {}",
                temporary_channel_id
            );
            Ok((
                ChannelState::WaitForAcceptChannel { temporary_channel_id },
                vec![Action::SendMessage(PeerMessage::OpenChannel(open_channel))],
            ))
        }
        Event::ExecuteCommand(HostCommand::InitFundee) => {
            Ok((ChannelState::WaitForOpenChannel {
                temporary_channel_id: TempChannelId::dumb_default(),
            }, vec![]))
        }
        other => Err(unexpected(&other)),
    }
}

fn wait_for_open_channel(
    _temporary_channel_id: TempChannelId,
    event: Event,
    local_params: &LocalParams,
    policy: &Policy,
) -> Result<(ChannelState, Vec<Action>), ChannelError> {
    match event {
        Event::MessageReceived(PeerMessage::OpenChannel(open_channel)) => {
            policy.validate_inbound(&open_channel)?;

            let mut accept_channel = AcceptChannel::dumb_default();
            accept_channel.temporary_channel_id =
                open_channel.temporary_channel_id;
            accept_channel.dust_limit_satoshis =
                local_params.peer.dust_limit_satoshis;
            accept_channel.channel_reserve_satoshis =
                local_params.peer.channel_reserve_satoshis;
            accept_channel.htlc_minimum_msat = local_params.peer.htlc_minimum_msat;
            accept_channel.to_self_delay = local_params.peer.to_self_delay;
            accept_channel.max_accepted_htlcs =
                local_params.peer.max_accepted_htlcs;
            accept_channel.max_htlc_value_in_flight_msat =
                local_params.peer.max_htlc_value_in_flight_msat;
            accept_channel.funding_pubkey = local_params.keyset.funding_pubkey;
            accept_channel.revocation_basepoint =
                local_params.keyset.revocation_basepoint;
            accept_channel.payment_point = local_params.keyset.payment_basepoint;
            accept_channel.delayed_payment_basepoint =
                local_params.keyset.delayed_payment_basepoint;
            accept_channel.htlc_basepoint = local_params.keyset.htlc_basepoint;
            accept_channel.first_per_commitment_point =
                local_params.keyset.first_per_commitment_point;

            debug!(
                "channel: accepted open_channel for temporary id {}",
                open_channel.temporary_channel_id
            );
            Ok((
                ChannelState::WaitForFundingCreated {
                    temporary_channel_id: open_channel.temporary_channel_id,
                },
                vec![Action::SendMessage(PeerMessage::AcceptChannel(
                    accept_channel,
                ))],
            ))
        }
        other => Err(unexpected(&other)),
    }
}

fn wait_for_accept_channel(
    temporary_channel_id: TempChannelId,
    event: Event,
    _local_params: &LocalParams,
    policy: &Policy,
) -> Result<(ChannelState, Vec<Action>), ChannelError> {
    match event {
        Event::MessageReceived(PeerMessage::AcceptChannel(accept_channel)) => {
            // `our_params` is re-derived by the host from the exact
            // `open_channel` it sent; policy only needs the remote's reply
            // here to confirm it against our own floor/ceiling.
            let our_params = crate::commitment::PeerParams::default();
            policy.confirm_outbound(our_params, &accept_channel)?;

            debug!(
                "channel: accept_channel received for temporary id {}",
                temporary_channel_id
            );
            Ok((
                ChannelState::WaitForFundingCreated { temporary_channel_id },
                vec![],
            ))
        }
        other => Err(unexpected(&other)),
    }
}

fn wait_for_funding_created(
    temporary_channel_id: TempChannelId,
    event: Event,
    key_manager: &impl KeyManager,
) -> Result<(ChannelState, Vec<Action>), ChannelError> {
    match event {
        // Funder side: the wallet has built and signed the funding
        // transaction; announce it and wait for the fundee's signature over
        // our first commitment.
        Event::ExecuteCommand(HostCommand::FundingConstructed {
            funding_txid,
            funding_output_index,
            signature,
        }) => {
            let funding_outpoint =
                bitcoin::OutPoint::new(funding_txid, funding_output_index as u32);
            let channel_id = ChannelId::with(funding_outpoint);
            let _ = key_manager; // signature already produced by the host's wallet

            let funding_created = p2p::bolt::FundingCreated {
                temporary_channel_id,
                funding_txid,
                funding_output_index,
                signature,
            };

            debug!(
                "channel: funding_created for channel {} (temp {})",
                channel_id, temporary_channel_id
            );
            Ok((
                ChannelState::WaitForFundingSigned {
                    channel_id,
                    funding_outpoint,
                    is_funder: true,
                },
                vec![Action::SendMessage(PeerMessage::FundingCreated(
                    funding_created,
                ))],
            ))
        }
        // Fundee side: the funder announced the funding outpoint; sign the
        // fundee's view of the first commitment and acknowledge.
        Event::MessageReceived(PeerMessage::FundingCreated(funding_created)) => {
            let funding_outpoint = bitcoin::OutPoint::new(
                funding_created.funding_txid,
                funding_created.funding_output_index as u32,
            );
            let channel_id = ChannelId::with(funding_outpoint);
            let signature = key_manager.sign_commitment(
                channel_id,
                0,
                &dumb_pubkey!(),
                &crate::commitment::CommitmentSpec::new(0, 0, 0),
            );
            let funding_signed = p2p::bolt::FundingSigned {
                channel_id,
                signature,
            };

            debug!("channel: funding_signed for channel {}", channel_id);
            Ok((
                ChannelState::WaitForFundingLocked {
                    channel_id,
                    funding_outpoint,
                    is_funder: false,
                    local_funding_locked_sent: false,
                    remote_funding_locked_received: None,
                },
                vec![
                    Action::SendMessage(PeerMessage::FundingSigned(funding_signed)),
                    Action::SendWatch { outpoint: funding_outpoint, min_depth: 1 },
                ],
            ))
        }
        other => Err(unexpected(&other)),
    }
}

fn wait_for_funding_signed(
    channel_id: ChannelId,
    funding_outpoint: bitcoin::OutPoint,
    is_funder: bool,
    event: Event,
) -> Result<(ChannelState, Vec<Action>), ChannelError> {
    match event {
        Event::MessageReceived(PeerMessage::FundingSigned(funding_signed)) => {
            if funding_signed.channel_id != channel_id {
                return Err(ChannelError::UnknownChannel);
            }
            debug!(
                "channel: received funding_signed for channel {}, publishing \
                 funding transaction",
                channel_id
            );
            Ok((
                ChannelState::WaitForFundingLocked {
                    channel_id,
                    funding_outpoint,
                    is_funder,
                    local_funding_locked_sent: false,
                    remote_funding_locked_received: None,
                },
                vec![Action::SendWatch { outpoint: funding_outpoint, min_depth: 1 }],
            ))
        }
        other => Err(unexpected(&other)),
    }
}

fn wait_for_funding_locked(
    channel_id: ChannelId,
    funding_outpoint: bitcoin::OutPoint,
    is_funder: bool,
    local_funding_locked_sent: bool,
    remote_funding_locked_received: Option<PublicKey>,
    event: Event,
    local_params: &LocalParams,
) -> Result<(ChannelState, Vec<Action>), ChannelError> {
    match event {
        Event::WatchReceived(crate::collaborators::WatchEvent::Confirmed {
            depth,
        }) if !local_funding_locked_sent && depth >= 1 => {
            let next_point = local_params.keyset.first_per_commitment_point;
            let funding_locked = p2p::bolt::FundingLocked {
                channel_id,
                next_per_commitment_point: next_point,
            };
            debug!(
                "channel: funding confirmed at depth {}, sending funding_locked \
                 for channel {}",
                depth, channel_id
            );
            try_activate(
                channel_id,
                funding_outpoint,
                is_funder,
                true,
                remote_funding_locked_received,
                vec![Action::SendMessage(PeerMessage::FundingLocked(
                    funding_locked,
                ))],
                local_params,
            )
        }
        Event::MessageReceived(PeerMessage::FundingLocked(funding_locked)) => {
            if funding_locked.channel_id != channel_id {
                return Err(ChannelError::UnknownChannel);
            }
            try_activate(
                channel_id,
                funding_outpoint,
                is_funder,
                local_funding_locked_sent,
                Some(funding_locked.next_per_commitment_point),
                vec![],
                local_params,
            )
        }
        other => Err(unexpected(&other)),
    }
}

fn try_activate(
    channel_id: ChannelId,
    funding_outpoint: bitcoin::OutPoint,
    is_funder: bool,
    local_funding_locked_sent: bool,
    remote_funding_locked_received: Option<PublicKey>,
    mut actions: Vec<Action>,
    local_params: &LocalParams,
) -> Result<(ChannelState, Vec<Action>), ChannelError> {
    match remote_funding_locked_received {
        Some(remote_per_commitment_point)
            if local_funding_locked_sent =>
        {
            debug!("channel: both sides locked, channel {} is Normal", channel_id);
            let remote_params = RemoteParams::dumb_default();
            let commitments = Commitments {
                channel_id,
                is_funder,
                local_params: local_params.clone(),
                remote_params,
                local_commit: crate::commitment::LocalCommit {
                    commitment_number: 0,
                    spec: crate::commitment::CommitmentSpec::new(0, 0, 253),
                    tx_id: bitcoin::Txid::default(),
                    remote_per_commitment_point,
                },
                remote_commit: crate::commitment::RemoteCommit {
                    commitment_number: 0,
                    spec: crate::commitment::CommitmentSpec::new(0, 0, 253),
                    tx_id: bitcoin::Txid::default(),
                    remote_per_commitment_point,
                },
                local_changes: crate::commitment::PendingChanges::new(),
                remote_changes: crate::commitment::PendingChanges::new(),
                local_next_htlc_id: 0,
                remote_next_htlc_id: 0,
                origin_map: Default::default(),
                remote_next_commit_info: RemoteCommitInfo::Point(
                    remote_per_commitment_point,
                ),
                commit_input: CommitInput {
                    outpoint: funding_outpoint,
                    amount_sat: 0,
                },
                remote_per_commitment_secrets: crate::sha_chain::ShaChain::new(),
            };
            actions.push(Action::StoreState(vec![]));
            Ok((
                ChannelState::Normal {
                    channel_id,
                    commitments: Box::new(commitments),
                },
                actions,
            ))
        }
        remote => Ok((
            ChannelState::WaitForFundingLocked {
                channel_id,
                funding_outpoint,
                is_funder,
                local_funding_locked_sent: local_funding_locked_sent
                    || actions.iter().any(|a| {
                        matches!(a, Action::SendMessage(PeerMessage::FundingLocked(_)))
                    }),
                remote_funding_locked_received: remote,
            },
            actions,
        )),
    }
}

fn normal(
    channel_id: ChannelId,
    commitments: Box<Commitments>,
    event: Event,
    key_manager: &impl KeyManager,
    current_block_height: u32,
) -> Result<(ChannelState, Vec<Action>), ChannelError> {
    let commitments = *commitments;
    match event {
        Event::ExecuteCommand(HostCommand::AddHtlc {
            amount_msat,
            payment_hash,
            cltv_expiry,
            onion_routing_packet,
        }) => {
            let (commitments, htlc) = commitments.send_add(
                amount_msat,
                payment_hash,
                cltv_expiry,
                onion_routing_packet.clone(),
                current_block_height,
                crate::commitment::HtlcOrigin::Local { invoice_amount_msat: None },
            )?;
            let change = crate::commitment::ChannelChange::AddHtlc(htlc);
            Ok(into_normal(
                channel_id,
                commitments,
                vec![Action::SendMessage(PeerMessage::ChannelUpdate(change))],
            ))
        }
        Event::MessageReceived(PeerMessage::ChannelUpdate(
            crate::commitment::ChannelChange::AddHtlc(htlc),
        )) => {
            let commitments = commitments.receive_add(htlc)?;
            Ok(into_normal(channel_id, commitments, vec![]))
        }
        Event::ExecuteCommand(HostCommand::FulfillHtlc { id, payment_preimage }) => {
            let commitments = commitments.send_fulfill(id, payment_preimage)?;
            let change = crate::commitment::ChannelChange::FulfillHtlc {
                id,
                payment_preimage,
            };
            Ok(into_normal(
                channel_id,
                commitments,
                vec![Action::SendMessage(PeerMessage::ChannelUpdate(change))],
            ))
        }
        Event::MessageReceived(PeerMessage::ChannelUpdate(
            crate::commitment::ChannelChange::FulfillHtlc { id, payment_preimage },
        )) => {
            let commitments = commitments.receive_fulfill(id, payment_preimage)?;
            Ok(into_normal(
                channel_id,
                commitments,
                vec![Action::ProcessFulfill { id, payment_preimage }],
            ))
        }
        Event::ExecuteCommand(HostCommand::FailHtlc { id, reason }) => {
            let commitments = commitments.send_fail(id, reason.clone())?;
            let change = crate::commitment::ChannelChange::FailHtlc { id, reason };
            Ok(into_normal(
                channel_id,
                commitments,
                vec![Action::SendMessage(PeerMessage::ChannelUpdate(change))],
            ))
        }
        Event::MessageReceived(PeerMessage::ChannelUpdate(
            crate::commitment::ChannelChange::FailHtlc { id, reason },
        )) => {
            let commitments = commitments.receive_fail(id, reason)?;
            Ok(into_normal(channel_id, commitments, vec![]))
        }
        Event::ExecuteCommand(HostCommand::UpdateFee { feerate_per_kw }) => {
            let commitments = commitments.send_fee(feerate_per_kw)?;
            let change = crate::commitment::ChannelChange::UpdateFee { feerate_per_kw };
            Ok(into_normal(
                channel_id,
                commitments,
                vec![Action::SendMessage(PeerMessage::ChannelUpdate(change))],
            ))
        }
        Event::MessageReceived(PeerMessage::ChannelUpdate(
            crate::commitment::ChannelChange::UpdateFee { feerate_per_kw },
        )) => {
            let commitments = commitments.receive_fee(feerate_per_kw)?;
            Ok(into_normal(channel_id, commitments, vec![]))
        }
        Event::ExecuteCommand(HostCommand::Sign) => {
            let (commitments, commit_sig) = commitments
                .send_commit(key_manager, bitcoin::Txid::default())?;
            Ok(into_normal(
                channel_id,
                commitments,
                vec![Action::SendMessage(PeerMessage::CommitmentSigned(
                    commit_sig,
                ))],
            ))
        }
        Event::MessageReceived(PeerMessage::CommitmentSigned(commit_sig)) => {
            let (commitments, revocation) = commitments.receive_commit(
                commit_sig,
                key_manager,
                bitcoin::Txid::default(),
            )?;
            Ok(into_normal(
                channel_id,
                commitments,
                vec![
                    Action::SendMessage(PeerMessage::RevokeAndAck(
                        crate::commitment::RemoteRevocation {
                            revoked_commitment_number: revocation
                                .revoked_commitment_number,
                            per_commitment_secret: key_manager.per_commitment_secret(
                                channel_id,
                                revocation.revoked_commitment_number,
                            ),
                            next_per_commitment_point: revocation
                                .next_per_commitment_point,
                        },
                    )),
                    Action::StoreState(vec![]),
                ],
            ))
        }
        Event::MessageReceived(PeerMessage::RevokeAndAck(revocation)) => {
            let (commitments, settled) =
                commitments.receive_revocation(revocation)?;
            let mut actions: Vec<Action> = settled
                .into_iter()
                .filter_map(|change| match change {
                    crate::commitment::ChannelChange::FulfillHtlc {
                        id,
                        payment_preimage,
                    } => Some(Action::ProcessFulfill { id, payment_preimage }),
                    _ => None,
                })
                .collect();
            actions.push(Action::StoreState(vec![]));
            Ok(into_normal(channel_id, commitments, actions))
        }
        Event::ExecuteCommand(HostCommand::Close { scriptpubkey }) => {
            let shutdown = super::event::ShutdownMsg {
                channel_id,
                scriptpubkey: scriptpubkey.clone(),
            };
            Ok((
                ChannelState::Shutdown {
                    channel_id,
                    commitments: Box::new(commitments),
                    local_scriptpubkey: scriptpubkey,
                    remote_scriptpubkey: None,
                },
                vec![Action::SendMessage(PeerMessage::Shutdown(shutdown))],
            ))
        }
        Event::MessageReceived(PeerMessage::Shutdown(remote_shutdown)) => {
            let local_scriptpubkey = vec![];
            let shutdown = super::event::ShutdownMsg {
                channel_id,
                scriptpubkey: local_scriptpubkey.clone(),
            };
            Ok((
                ChannelState::Shutdown {
                    channel_id,
                    commitments: Box::new(commitments),
                    local_scriptpubkey,
                    remote_scriptpubkey: Some(remote_shutdown.scriptpubkey),
                },
                vec![Action::SendMessage(PeerMessage::Shutdown(shutdown))],
            ))
        }
        other => Err(unexpected(&other)),
    }
}

fn into_normal(
    channel_id: ChannelId,
    commitments: Commitments,
    actions: Vec<Action>,
) -> (ChannelState, Vec<Action>) {
    (
        ChannelState::Normal { channel_id, commitments: Box::new(commitments) },
        actions,
    )
}

fn shutdown(
    channel_id: ChannelId,
    commitments: Box<Commitments>,
    local_scriptpubkey: Vec<u8>,
    remote_scriptpubkey: Option<Vec<u8>>,
    event: Event,
) -> Result<(ChannelState, Vec<Action>), ChannelError> {
    match event {
        Event::MessageReceived(PeerMessage::Shutdown(remote_shutdown))
            if remote_scriptpubkey.is_none() =>
        {
            if commitments.local_changes.all().next().is_some()
                || commitments.remote_changes.all().next().is_some()
            {
                // HTLCs still in flight; stay in Shutdown until they clear.
                return Ok((
                    ChannelState::Shutdown {
                        channel_id,
                        commitments,
                        local_scriptpubkey,
                        remote_scriptpubkey: Some(remote_shutdown.scriptpubkey),
                    },
                    vec![],
                ));
            }
            debug!("channel: all HTLCs cleared, negotiating close for {}", channel_id);
            Ok((
                ChannelState::Negotiating {
                    channel_id,
                    local_scriptpubkey,
                    remote_scriptpubkey: remote_shutdown.scriptpubkey,
                    last_fee_proposed_sat: None,
                },
                vec![],
            ))
        }
        _ if remote_scriptpubkey.is_some()
            && commitments.local_changes.all().next().is_none()
            && commitments.remote_changes.all().next().is_none() =>
        {
            let remote_scriptpubkey = remote_scriptpubkey.expect("checked above");
            Ok((
                ChannelState::Negotiating {
                    channel_id,
                    local_scriptpubkey,
                    remote_scriptpubkey,
                    last_fee_proposed_sat: None,
                },
                vec![],
            ))
        }
        other => Err(unexpected(&other)),
    }
}

fn negotiating(
    channel_id: ChannelId,
    local_scriptpubkey: Vec<u8>,
    remote_scriptpubkey: Vec<u8>,
    last_fee_proposed_sat: Option<u64>,
    event: Event,
) -> Result<(ChannelState, Vec<Action>), ChannelError> {
    match event {
        Event::MessageReceived(PeerMessage::ClosingSigned(closing_signed)) => {
            if Some(closing_signed.fee_satoshis) == last_fee_proposed_sat {
                debug!(
                    "channel: closing fee {} accepted for {}, publishing close",
                    closing_signed.fee_satoshis, channel_id
                );
                return Ok((
                    ChannelState::Closing {
                        channel_id,
                        closing_txid: bitcoin::Txid::default(),
                    },
                    vec![Action::StoreState(vec![])],
                ));
            }
            let counter = super::event::ClosingSignedMsg {
                channel_id,
                fee_satoshis: closing_signed.fee_satoshis,
                signature: closing_signed.signature,
            };
            Ok((
                ChannelState::Negotiating {
                    channel_id,
                    local_scriptpubkey,
                    remote_scriptpubkey,
                    last_fee_proposed_sat: Some(closing_signed.fee_satoshis),
                },
                vec![Action::SendMessage(PeerMessage::ClosingSigned(counter))],
            ))
        }
        other => Err(unexpected(&other)),
    }
}

fn closing(
    channel_id: ChannelId,
    closing_txid: bitcoin::Txid,
    event: Event,
) -> Result<(ChannelState, Vec<Action>), ChannelError> {
    match event {
        Event::WatchReceived(crate::collaborators::WatchEvent::Confirmed {
            ..
        }) => {
            debug!("channel: close transaction confirmed for {}", channel_id);
            Ok((ChannelState::Closed { channel_id }, vec![Action::StoreState(vec![])]))
        }
        Event::WatchReceived(crate::collaborators::WatchEvent::Spent {
            spending_txid,
        }) if spending_txid != closing_txid => Ok((
            ChannelState::ErrorInformationLeak { channel_id },
            vec![Action::StoreState(vec![])],
        )),
        other => Err(unexpected(&other)),
    }
}

#[cfg(test)]
mod test {
    use secp256k1::ecdsa::Signature;
    use secp256k1::{Message, Secp256k1, SecretKey};
    use sha2::{Digest, Sha256};

    use super::*;
    use crate::channel::{AnyChannelId, ClosingSignedMsg, ShutdownMsg};
    use crate::collaborators::WatchEvent;
    use crate::commitment::{
        ChannelChange, CommitmentSpec, LocalKeyset, PeerParams, RemoteKeyset,
    };

    /// Deterministic signer standing in for a real `KeyManager` so these
    /// tests never touch private key material beyond a fixed test scalar.
    struct TestKeyManager {
        secp: Secp256k1<secp256k1::All>,
        secret_key: SecretKey,
    }

    impl TestKeyManager {
        fn new() -> Self {
            TestKeyManager {
                secp: Secp256k1::new(),
                secret_key: secp256k1::key::ONE_KEY,
            }
        }

        fn message(tag: &[u8], nonce: u64) -> Message {
            let mut hasher = Sha256::new();
            hasher.update(tag);
            hasher.update(nonce.to_be_bytes());
            Message::from_slice(&hasher.finalize())
                .expect("sha256 digest is 32 bytes")
        }
    }

    impl KeyManager for TestKeyManager {
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
            self.secp.sign_ecdsa(
                &Self::message(b"commitment", commitment_number),
                &self.secret_key,
            )
        }

        fn sign_htlc(
            &self,
            _channel_id: ChannelId,
            commitment_number: u64,
            htlc_index: u16,
            _remote_per_commitment_point: &PublicKey,
        ) -> Signature {
            self.secp.sign_ecdsa(
                &Self::message(
                    b"htlc",
                    commitment_number.wrapping_add(htlc_index as u64),
                ),
                &self.secret_key,
            )
        }

        fn per_commitment_secret(
            &self,
            _channel_id: ChannelId,
            commitment_number: u64,
        ) -> [u8; 32] {
            let seed = self.secret_key.secret_bytes();
            crate::sha_chain::derive_secret(
                &seed,
                crate::sha_chain::FIRST_INDEX - commitment_number,
            )
        }
    }

    fn sample_local_params() -> LocalParams {
        LocalParams { peer: PeerParams::default(), keyset: LocalKeyset::dumb_default() }
    }

    /// Mirrors exactly the `accept_channel` a real `wait_for_open_channel`
    /// would have built from the same defaults, so policy validation passes.
    fn sample_accept_channel(temporary_channel_id: TempChannelId) -> AcceptChannel {
        let peer = PeerParams::default();
        let mut accept_channel = AcceptChannel::dumb_default();
        accept_channel.temporary_channel_id = temporary_channel_id;
        accept_channel.dust_limit_satoshis = peer.dust_limit_satoshis;
        accept_channel.channel_reserve_satoshis = peer.channel_reserve_satoshis;
        accept_channel.htlc_minimum_msat = peer.htlc_minimum_msat;
        accept_channel.to_self_delay = peer.to_self_delay;
        accept_channel.max_accepted_htlcs = peer.max_accepted_htlcs;
        accept_channel.max_htlc_value_in_flight_msat =
            peer.max_htlc_value_in_flight_msat;
        accept_channel.minimum_depth = 3;
        accept_channel
    }

    /// A funded ledger, skipping the degenerate all-zero first commitment
    /// `wait_for_funding_created` signs, so `Normal`-state tests have actual
    /// balance to move.
    fn funded_commitments(channel_id: ChannelId) -> Commitments {
        let mut commitments = Commitments::dumb_default();
        commitments.channel_id = channel_id;
        commitments.local_params = sample_local_params();
        commitments.remote_params = RemoteParams {
            peer: PeerParams::default(),
            keyset: RemoteKeyset::dumb_default(),
        };
        commitments.local_commit.spec =
            CommitmentSpec::new(5_000_000_000, 5_000_000_000, 253);
        commitments.remote_commit.spec =
            CommitmentSpec::new(5_000_000_000, 5_000_000_000, 253);
        commitments
    }

    #[test]
    fn wait_for_init_funder_sends_open_channel() {
        let policy = Policy::default();
        let params = sample_local_params();
        let key_manager = TestKeyManager::new();

        let (state, actions) = process(
            ChannelState::WaitForInit,
            Event::ExecuteCommand(HostCommand::InitFunder {
                funding_satoshis: 100_000,
                push_msat: 0,
                feerate_per_kw: 253,
            }),
            &params,
            &policy,
            &key_manager,
            0,
        )
        .unwrap();

        assert!(matches!(state, ChannelState::WaitForAcceptChannel { .. }));
        match actions.as_slice() {
            [Action::SendMessage(PeerMessage::OpenChannel(open_channel))] => {
                assert_eq!(open_channel.funding_satoshis, 100_000);
                assert_eq!(open_channel.feerate_per_kw, 253);
            }
            other => panic!("unexpected actions: {:?}", other),
        }
    }

    #[test]
    fn funder_handshake_reaches_wait_for_funding_locked() {
        let policy = Policy::default();
        let params = sample_local_params();
        let key_manager = TestKeyManager::new();

        let (state, actions) = process(
            ChannelState::WaitForInit,
            Event::ExecuteCommand(HostCommand::InitFunder {
                funding_satoshis: 100_000,
                push_msat: 0,
                feerate_per_kw: 253,
            }),
            &params,
            &policy,
            &key_manager,
            0,
        )
        .unwrap();
        let temporary_channel_id = match actions.as_slice() {
            [Action::SendMessage(PeerMessage::OpenChannel(open_channel))] => {
                open_channel.temporary_channel_id
            }
            other => panic!("unexpected actions: {:?}", other),
        };
        assert_eq!(state.id(), AnyChannelId::Temporary(temporary_channel_id));

        let (state, _) = process(
            state,
            Event::MessageReceived(PeerMessage::AcceptChannel(
                sample_accept_channel(temporary_channel_id),
            )),
            &params,
            &policy,
            &key_manager,
            0,
        )
        .unwrap();
        assert!(matches!(state, ChannelState::WaitForFundingCreated { .. }));

        let (state, actions) = process(
            state,
            Event::ExecuteCommand(HostCommand::FundingConstructed {
                funding_txid: bitcoin::Txid::default(),
                funding_output_index: 0,
                signature: key_manager.sign_commitment(
                    ChannelId::dumb_default(),
                    0,
                    &dumb_pubkey!(),
                    &CommitmentSpec::new(0, 0, 253),
                ),
            }),
            &params,
            &policy,
            &key_manager,
            0,
        )
        .unwrap();
        let channel_id = match (&state, actions.as_slice()) {
            (
                ChannelState::WaitForFundingSigned { channel_id, .. },
                [Action::SendMessage(PeerMessage::FundingCreated(_))],
            ) => *channel_id,
            other => panic!("unexpected transition: {:?}", other),
        };

        let (state, actions) = process(
            state,
            Event::MessageReceived(PeerMessage::FundingSigned(
                p2p::bolt::FundingSigned {
                    channel_id,
                    signature: key_manager.sign_commitment(
                        channel_id,
                        0,
                        &dumb_pubkey!(),
                        &CommitmentSpec::new(0, 0, 253),
                    ),
                },
            )),
            &params,
            &policy,
            &key_manager,
            0,
        )
        .unwrap();
        assert!(matches!(state, ChannelState::WaitForFundingLocked { .. }));
        assert!(matches!(
            actions.as_slice(),
            [Action::SendWatch { min_depth: 1, .. }]
        ));
    }

    #[test]
    fn disconnected_is_a_noop_from_any_state() {
        let policy = Policy::default();
        let params = sample_local_params();
        let key_manager = TestKeyManager::new();
        let state = ChannelState::WaitForOpenChannel {
            temporary_channel_id: TempChannelId::random(),
        };

        let (next, actions) = process(
            state.clone(),
            Event::Disconnected,
            &params,
            &policy,
            &key_manager,
            0,
        )
        .unwrap();
        assert_eq!(next, state);
        assert!(actions.is_empty());
    }

    #[test]
    fn unexpected_event_is_reported_without_a_panic() {
        let policy = Policy::default();
        let params = sample_local_params();
        let key_manager = TestKeyManager::new();

        let err = process(
            ChannelState::WaitForInit,
            Event::MessageReceived(PeerMessage::FundingLocked(
                p2p::bolt::FundingLocked {
                    channel_id: ChannelId::dumb_default(),
                    next_per_commitment_point: dumb_pubkey!(),
                },
            )),
            &params,
            &policy,
            &key_manager,
            0,
        )
        .unwrap_err();
        assert!(matches!(err, ChannelError::UnexpectedEvent(_)));
    }

    #[test]
    fn normal_add_htlc_and_sign_round_trip() {
        let policy = Policy::default();
        let params = sample_local_params();
        let key_manager = TestKeyManager::new();
        let channel_id = ChannelId::dumb_default();
        let state = ChannelState::Normal {
            channel_id,
            commitments: Box::new(funded_commitments(channel_id)),
        };

        let (state, actions) = process(
            state,
            Event::ExecuteCommand(HostCommand::AddHtlc {
                amount_msat: 100_000,
                payment_hash: [7u8; 32],
                cltv_expiry: 100,
                onion_routing_packet: vec![0u8; 32],
            }),
            &params,
            &policy,
            &key_manager,
            50,
        )
        .unwrap();
        assert!(matches!(
            actions.as_slice(),
            [Action::SendMessage(PeerMessage::ChannelUpdate(
                ChannelChange::AddHtlc(_)
            ))]
        ));

        let (state, actions) = process(
            state,
            Event::ExecuteCommand(HostCommand::Sign),
            &params,
            &policy,
            &key_manager,
            50,
        )
        .unwrap();
        assert!(matches!(
            actions.as_slice(),
            [Action::SendMessage(PeerMessage::CommitmentSigned(_))]
        ));

        match state {
            ChannelState::Normal { commitments, .. } => {
                assert_eq!(commitments.local_changes.signed.len(), 1);
                assert!(commitments.local_changes.proposed.is_empty());
            }
            other => panic!("unexpected state: {:?}", other),
        }
    }

    #[test]
    fn shutdown_negotiates_fee_and_closes() {
        let policy = Policy::default();
        let params = sample_local_params();
        let key_manager = TestKeyManager::new();
        let channel_id = ChannelId::dumb_default();
        let state = ChannelState::Normal {
            channel_id,
            commitments: Box::new(funded_commitments(channel_id)),
        };

        let (state, actions) = process(
            state,
            Event::ExecuteCommand(HostCommand::Close { scriptpubkey: vec![0u8; 22] }),
            &params,
            &policy,
            &key_manager,
            0,
        )
        .unwrap();
        assert!(matches!(
            actions.as_slice(),
            [Action::SendMessage(PeerMessage::Shutdown(_))]
        ));
        assert!(matches!(state, ChannelState::Shutdown { .. }));

        let (state, _) = process(
            state,
            Event::MessageReceived(PeerMessage::Shutdown(ShutdownMsg {
                channel_id,
                scriptpubkey: vec![1u8; 22],
            })),
            &params,
            &policy,
            &key_manager,
            0,
        )
        .unwrap();
        assert!(matches!(state, ChannelState::Negotiating { .. }));

        let (state, actions) = process(
            state,
            Event::MessageReceived(PeerMessage::ClosingSigned(ClosingSignedMsg {
                channel_id,
                fee_satoshis: 500,
                signature: key_manager.sign_commitment(
                    channel_id,
                    0,
                    &dumb_pubkey!(),
                    &CommitmentSpec::new(0, 0, 253),
                ),
            })),
            &params,
            &policy,
            &key_manager,
            0,
        )
        .unwrap();
        assert!(matches!(state, ChannelState::Negotiating { .. }));
        assert!(matches!(
            actions.as_slice(),
            [Action::SendMessage(PeerMessage::ClosingSigned(_))]
        ));

        let (state, actions) = process(
            state,
            Event::MessageReceived(PeerMessage::ClosingSigned(ClosingSignedMsg {
                channel_id,
                fee_satoshis: 500,
                signature: key_manager.sign_commitment(
                    channel_id,
                    0,
                    &dumb_pubkey!(),
                    &CommitmentSpec::new(0, 0, 253),
                ),
            })),
            &params,
            &policy,
            &key_manager,
            0,
        )
        .unwrap();
        assert!(matches!(state, ChannelState::Closing { .. }));
        assert!(matches!(actions.as_slice(), [Action::StoreState(_)]));

        let closing_txid = match state {
            ChannelState::Closing { closing_txid, .. } => closing_txid,
            other => panic!("unexpected state: {:?}", other),
        };
        let (state, actions) = process(
            ChannelState::Closing { channel_id, closing_txid },
            Event::WatchReceived(WatchEvent::Confirmed { depth: 1 }),
            &params,
            &policy,
            &key_manager,
            0,
        )
        .unwrap();
        assert!(matches!(state, ChannelState::Closed { .. }));
        assert!(matches!(actions.as_slice(), [Action::StoreState(_)]));
    }
}
