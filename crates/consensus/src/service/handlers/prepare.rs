use super::super::{ConsensusEvent, ConsensusService};
use crate::context::{now_timestamp, Role};
use crate::messages::{PrepareRequest, PrepareResponse};
use crate::MAX_FUTURE_TIMESTAMP;
use appchain_core::{ConsensusPayload, Transaction, UInt256};
use appchain_ledger::verification::verify_transaction;
use tracing::{debug, info, warn};

impl ConsensusService {
    /// Primary timeout: propose a block.
    ///
    /// A node that already signed a proposal in an earlier view of this
    /// height proposes the same block again.
    pub(in crate::service) fn send_prepare_request(&mut self) {
        info!(
            block_index = self.context.block_index,
            view = self.context.view_number,
            "send prepare request"
        );
        self.context.role = Role::Primary { request_sent: true };
        if !self.context.flags.signature_sent {
            if let Err(e) = self.context.fill(&self.chain) {
                warn!(error = %e, "cannot fill proposal");
                return;
            }
            self.context.sign_header();
        }
        let payload = self.context.make_prepare_request();
        self.send_payload(payload);
        if self.context.transaction_hashes.len() > 1 {
            self.emit(ConsensusEvent::AnnounceTransactions(
                self.context.transaction_hashes[1..].to_vec(),
            ));
        }
        self.change_timer(self.view_timeout(self.context.view_number));
        self.check_signatures();
    }

    pub(in crate::service) fn on_prepare_request(
        &mut self,
        payload: &ConsensusPayload,
        index: usize,
        request: PrepareRequest,
    ) {
        if self.context.role != (Role::Backup { request_received: false }) {
            return;
        }
        if index != self.context.primary_index {
            warn!(
                validator = index,
                primary = self.context.primary_index,
                "prepare request from a backup"
            );
            return;
        }
        let timestamp = payload.timestamp();
        let latest = u64::from(now_timestamp()) + MAX_FUTURE_TIMESTAMP.as_secs();
        if timestamp <= self.context.prev_timestamp || u64::from(timestamp) > latest {
            warn!(timestamp, "prepare request timestamp out of range");
            return;
        }
        if let Some(snapshot) = &self.context.snapshot {
            if let Some(hash) = request
                .transaction_hashes
                .iter()
                .find(|hash| snapshot.contains_transaction(hash))
            {
                warn!(%hash, "prepare request references a persisted transaction");
                return;
            }
        }
        info!(
            block_index = self.context.block_index,
            view = self.context.view_number,
            primary = index,
            transactions = request.transaction_hashes.len(),
            "prepare request received"
        );

        let header = self.context.header_for(
            &request.transaction_hashes,
            timestamp,
            request.nonce,
            request.next_consensus,
        );
        let hash_data = header.get_hash_data();
        if !self.context.validators[index].verify(&hash_data, &request.signature) {
            warn!(validator = index, "prepare request signature invalid");
            return;
        }

        let PrepareRequest {
            nonce,
            next_consensus,
            transaction_hashes,
            miner_transaction,
            signature,
        } = request;
        let context = &mut self.context;
        context.role = Role::Backup {
            request_received: true,
        };
        context.timestamp = timestamp;
        context.nonce = nonce;
        context.next_consensus = next_consensus;
        context.transaction_hashes = transaction_hashes;
        context.transactions.clear();
        for (validator, slot) in context.validators.iter().zip(context.signatures.iter_mut()) {
            if slot.is_some_and(|signature| !validator.verify(&hash_data, &signature)) {
                *slot = None;
            }
        }
        context.signatures[index] = Some(signature);

        let mempool = self.chain.mempool().clone();
        let mut unverified = Vec::new();
        let hashes = self.context.transaction_hashes[1..].to_vec();
        for hash in &hashes {
            if let Some(tx) = mempool.try_get_verified(hash) {
                if !self.add_transaction(tx, false) {
                    return;
                }
            } else if let Some(tx) = mempool.try_get(hash) {
                unverified.push(tx);
            }
        }
        for tx in unverified {
            if !self.add_transaction(tx, true) {
                return;
            }
        }
        if !self.add_transaction(miner_transaction, true) {
            return;
        }

        let missing: Vec<UInt256> = self
            .context
            .transaction_hashes
            .iter()
            .filter(|hash| !self.context.transactions.contains_key(*hash))
            .copied()
            .collect();
        if !missing.is_empty() {
            debug!(count = missing.len(), "requesting missing proposal transactions");
            self.emit(ConsensusEvent::RestartTasks(missing));
        }
    }

    /// Stores a backup's signature. Before the proposal is known the
    /// signature is kept unchecked; it is checked when the request arrives.
    pub(in crate::service) fn on_prepare_response(
        &mut self,
        index: usize,
        response: PrepareResponse,
    ) {
        if self.context.signatures[index].is_some() {
            return;
        }
        let Some(header) = self.context.make_header() else {
            debug!(validator = index, "prepare response buffered");
            self.context.signatures[index] = Some(response.signature);
            return;
        };
        if !self.context.validators[index].verify(&header.get_hash_data(), &response.signature) {
            warn!(validator = index, "prepare response signature invalid");
            return;
        }
        info!(
            block_index = self.context.block_index,
            validator = index,
            "prepare response received"
        );
        self.context.signatures[index] = Some(response.signature);
        self.check_signatures();
    }

    /// Adds a proposed transaction.
    ///
    /// A transaction already on chain, failing verification or rejected by
    /// policy makes this node ask for a view change. Once every proposed
    /// transaction is present the proposal is checked and, if sound, signed.
    pub(in crate::service) fn add_transaction(&mut self, tx: Transaction, verify: bool) -> bool {
        let hash = tx.hash();
        if let Some(reason) = self.reject_reason(&tx, verify) {
            warn!(%hash, reason, "proposed transaction rejected");
            self.request_change_view();
            return false;
        }
        self.context.transactions.insert(hash, tx);
        if self.context.transactions.len() < self.context.transaction_hashes.len() {
            return true;
        }
        match self.context.verify_request(&self.chain) {
            Ok(true) => {
                info!(
                    block_index = self.context.block_index,
                    view = self.context.view_number,
                    "send prepare response"
                );
                self.context.flags.signature_sent = true;
                if let Some(signature) = self.context.sign_header() {
                    let payload = self.context.make_prepare_response(signature);
                    self.send_payload(payload);
                }
                self.check_signatures();
                true
            }
            Ok(false) => {
                warn!(block_index = self.context.block_index, "proposal rejected");
                self.request_change_view();
                false
            }
            Err(e) => {
                warn!(error = %e, "cannot verify proposal");
                self.request_change_view();
                false
            }
        }
    }

    fn reject_reason(&self, tx: &Transaction, verify: bool) -> Option<&'static str> {
        let Some(snapshot) = &self.context.snapshot else {
            return Some("no snapshot");
        };
        if snapshot.contains_transaction(&tx.hash()) {
            return Some("already persisted");
        }
        if verify {
            let others: Vec<Transaction> = self.context.transactions.values().cloned().collect();
            if let Err(e) = verify_transaction(tx, snapshot, &others, &self.chain.utility_token()) {
                debug!(hash = %tx.hash(), error = %e, "proposed transaction invalid");
                return Some("verification failed");
            }
        }
        if !self.chain.policy().check_policy(tx) {
            return Some("policy");
        }
        None
    }
}
