//! Cluster controller
//!
//! The role state machine for primary/secondary replication:
//!
//! - **Primary** accepts writes: WAL-append locally, fan out
//!   `AppendEntry`, wait for a strict majority, apply, ack. Emits
//!   heartbeats every 150 ms carrying its replication progress.
//! - **Secondary** rejects client writes with a `not_primary` hint,
//!   applies entries from the current-term primary, and advertises its
//!   own progress back. The advertisement is both the append ack and
//!   the gap-fill trigger.
//! - **Candidate** is transient: on a missed-heartbeat timeout a
//!   secondary increments the term, votes for itself, and solicits
//!   votes; a strict majority makes it Primary.
//!
//! All elapsed-time checks use `Instant`; the wall clock only stamps
//! records.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, RecvTimeoutError};
use parking_lot::{Condvar, Mutex};
use rand::Rng;

use crate::engine::{StateEngine, WritePath};
use crate::error::{MeridianError, Result};
use crate::repl::{PeerMessage, PeerSet};
use crate::wal::{LogEntry, Operation};

use super::ClusterConfig;

/// How many entries a single gap-fill pass resends
const GAP_FILL_BATCH: usize = 256;

/// Ticker granularity for heartbeat/election checks
const TICK: Duration = Duration::from_millis(25);

/// Replication role of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Primary,
    Secondary,
    Candidate,
}

/// Mutable role state, guarded by one lock
struct RoleState {
    role: Role,
    term: u64,
    voted_for: Option<u32>,
    known_primary: Option<u32>,
    /// Peers that granted a vote in the current candidacy
    votes: HashSet<u32>,
    /// When a missing primary triggers the next election
    election_deadline: Instant,
    last_heartbeat_sent: Instant,
}

/// Controller for one cluster node
pub struct ClusterController {
    config: ClusterConfig,
    engine: Arc<StateEngine>,
    peers: PeerSet,

    state: Mutex<RoleState>,

    /// Highest cluster sequence this node has assigned or applied
    cluster_seq: AtomicU64,

    /// Per-peer highest advertised sequence; the ack ledger
    acks: Mutex<HashMap<u32, u64>>,
    ack_cond: Condvar,

    stop: AtomicBool,
}

impl ClusterController {
    /// Build the controller and spawn its inbox and ticker threads.
    /// `inbox` carries messages from this node's repl listener.
    pub fn start(
        config: ClusterConfig,
        engine: Arc<StateEngine>,
        inbox: Receiver<PeerMessage>,
    ) -> (Arc<Self>, Vec<JoinHandle<()>>) {
        let peers = PeerSet::start(
            config
                .peers
                .iter()
                .map(|p| (p.node_id, p.repl_addr.clone()))
                .collect(),
            config.outbound_buffer,
        );

        // Node 0 bootstraps as Primary; everyone else follows it until an
        // election says otherwise.
        let is_bootstrap_primary = config.node_id == 0;
        let now = Instant::now();
        let state = RoleState {
            role: if is_bootstrap_primary {
                Role::Primary
            } else {
                Role::Secondary
            },
            term: 1,
            voted_for: None,
            known_primary: Some(0),
            votes: HashSet::new(),
            election_deadline: now + random_election_timeout(&config),
            last_heartbeat_sent: now - config.heartbeat_interval,
        };

        let controller = Arc::new(ClusterController {
            cluster_seq: AtomicU64::new(engine.max_origin_seq()),
            config,
            engine,
            peers,
            state: Mutex::new(state),
            acks: Mutex::new(HashMap::new()),
            ack_cond: Condvar::new(),
            stop: AtomicBool::new(false),
        });

        let mut handles = Vec::new();

        let inbox_controller = Arc::clone(&controller);
        handles.push(
            thread::Builder::new()
                .name("meridian-cluster-inbox".to_string())
                .spawn(move || inbox_controller.inbox_loop(inbox))
                .expect("failed to spawn cluster inbox thread"),
        );

        let ticker_controller = Arc::clone(&controller);
        handles.push(
            thread::Builder::new()
                .name("meridian-cluster-ticker".to_string())
                .spawn(move || ticker_controller.ticker_loop())
                .expect("failed to spawn cluster ticker thread"),
        );

        (controller, handles)
    }

    /// Stop background threads; they exit within one tick.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
        self.peers.stop();
        self.ack_cond.notify_all();
    }

    /// Current role (for tests and diagnostics)
    pub fn role(&self) -> Role {
        self.state.lock().role
    }

    /// Current term
    pub fn term(&self) -> u64 {
        self.state.lock().term
    }

    /// Node id of the primary as far as this node knows
    pub fn known_primary(&self) -> Option<u32> {
        self.state.lock().known_primary
    }

    // -------------------------------------------------------------------------
    // Inbox
    // -------------------------------------------------------------------------

    fn inbox_loop(self: Arc<Self>, inbox: Receiver<PeerMessage>) {
        while !self.stop.load(Ordering::Relaxed) {
            match inbox.recv_timeout(TICK) {
                Ok(message) => self.handle_message(message),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn handle_message(&self, message: PeerMessage) {
        match message {
            PeerMessage::AppendEntry { term, entry } => self.on_append_entry(term, entry),
            PeerMessage::Heartbeat {
                term,
                node_id,
                last_seq,
            } => self.on_heartbeat(term, node_id, last_seq),
            PeerMessage::RequestVote {
                term,
                candidate_id,
                last_seq,
            } => self.on_request_vote(term, candidate_id, last_seq),
            PeerMessage::Vote {
                term,
                node_id,
                granted,
            } => self.on_vote(term, node_id, granted),
        }
    }

    fn on_append_entry(&self, term: u64, entry: LogEntry) {
        {
            let mut state = self.state.lock();
            if term < state.term {
                tracing::debug!(term, own_term = state.term, "rejected stale AppendEntry");
                return;
            }
            if term > state.term {
                self.step_down(&mut state, term);
            }
            // An entry from the live primary counts as liveness.
            state.election_deadline = Instant::now() + random_election_timeout(&self.config);
        }

        match self.engine.apply_replicated(entry.clone()) {
            Ok(()) => {
                self.cluster_seq.fetch_max(entry.seq, Ordering::AcqRel);
                self.ack_progress();
            }
            Err(e) => {
                tracing::warn!(seq = entry.seq, "failed to apply replicated entry: {}", e);
            }
        }
    }

    fn on_heartbeat(&self, term: u64, node_id: u32, last_seq: u64) {
        let role = {
            let mut state = self.state.lock();
            if term < state.term {
                return;
            }
            if term > state.term {
                self.step_down(&mut state, term);
            }
            match state.role {
                Role::Primary => Role::Primary,
                Role::Secondary | Role::Candidate => {
                    // Heartbeat from the current-term primary.
                    state.role = Role::Secondary;
                    state.known_primary = Some(node_id);
                    state.election_deadline =
                        Instant::now() + random_election_timeout(&self.config);
                    Role::Secondary
                }
            }
        };

        match role {
            Role::Primary => {
                // A secondary advertising progress: record the ack and
                // resend whatever it is missing.
                {
                    let mut acks = self.acks.lock();
                    let slot = acks.entry(node_id).or_insert(0);
                    *slot = (*slot).max(last_seq);
                }
                self.ack_cond.notify_all();
                self.gap_fill(node_id, last_seq);
            }
            _ => {
                // Reply with our own progress so the primary can count
                // acks and drive gap-fill.
                self.ack_progress();
            }
        }
    }

    fn on_request_vote(&self, term: u64, candidate_id: u32, last_seq: u64) {
        let (reply_term, granted) = {
            let mut state = self.state.lock();
            if term < state.term {
                (state.term, false)
            } else {
                if term > state.term {
                    self.step_down(&mut state, term);
                }
                let already_voted = state
                    .voted_for
                    .map(|v| v != candidate_id)
                    .unwrap_or(false);
                let up_to_date = last_seq >= self.cluster_seq.load(Ordering::Acquire);
                let granted = !already_voted && up_to_date;
                if granted {
                    state.voted_for = Some(candidate_id);
                    state.election_deadline =
                        Instant::now() + random_election_timeout(&self.config);
                }
                (state.term, granted)
            }
        };

        tracing::debug!(term, candidate_id, granted, "vote request handled");
        self.peers.send_to(
            candidate_id,
            PeerMessage::Vote {
                term: reply_term,
                node_id: self.config.node_id,
                granted,
            },
        );
    }

    fn on_vote(&self, term: u64, node_id: u32, granted: bool) {
        let won = {
            let mut state = self.state.lock();
            if term > state.term {
                self.step_down(&mut state, term);
                return;
            }
            if state.role != Role::Candidate || term != state.term || !granted {
                return;
            }
            state.votes.insert(node_id);
            // The candidate's own vote is implicit.
            if state.votes.len() + 1 >= self.config.majority() {
                state.role = Role::Primary;
                state.known_primary = Some(self.config.node_id);
                state.last_heartbeat_sent = Instant::now();
                tracing::info!(term, "won election; now primary");
                true
            } else {
                false
            }
        };

        if won {
            // Announce immediately so secondaries settle and lagging
            // peers start advertising their progress.
            self.broadcast_heartbeat();
            self.acks.lock().clear();
        }
    }

    // -------------------------------------------------------------------------
    // Ticker
    // -------------------------------------------------------------------------

    fn ticker_loop(self: Arc<Self>) {
        while !self.stop.load(Ordering::Relaxed) {
            thread::sleep(TICK);

            enum Action {
                Heartbeat,
                Election(u64),
                None,
            }

            let action = {
                let mut state = self.state.lock();
                let now = Instant::now();
                match state.role {
                    Role::Primary => {
                        if now.duration_since(state.last_heartbeat_sent)
                            >= self.config.heartbeat_interval
                        {
                            state.last_heartbeat_sent = now;
                            Action::Heartbeat
                        } else {
                            Action::None
                        }
                    }
                    Role::Secondary | Role::Candidate => {
                        if now >= state.election_deadline {
                            state.role = Role::Candidate;
                            state.term += 1;
                            state.voted_for = Some(self.config.node_id);
                            state.votes.clear();
                            state.known_primary = None;
                            state.election_deadline =
                                now + random_election_timeout(&self.config);
                            Action::Election(state.term)
                        } else {
                            Action::None
                        }
                    }
                }
            };

            match action {
                Action::Heartbeat => self.broadcast_heartbeat(),
                Action::Election(term) => {
                    tracing::info!(term, "heartbeat lost; starting election");
                    self.peers.broadcast(&PeerMessage::RequestVote {
                        term,
                        candidate_id: self.config.node_id,
                        last_seq: self.cluster_seq.load(Ordering::Acquire),
                    });
                }
                Action::None => {}
            }
        }
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    /// Observed a higher term: become Secondary under it.
    fn step_down(&self, state: &mut RoleState, term: u64) {
        if state.role == Role::Primary {
            tracing::info!(from = state.term, to = term, "higher term seen; stepping down");
        }
        state.role = Role::Secondary;
        state.term = term;
        state.voted_for = None;
        state.votes.clear();
        state.known_primary = None;
        state.election_deadline = Instant::now() + random_election_timeout(&self.config);
    }

    fn broadcast_heartbeat(&self) {
        let term = self.state.lock().term;
        self.peers.broadcast(&PeerMessage::Heartbeat {
            term,
            node_id: self.config.node_id,
            last_seq: self.cluster_seq.load(Ordering::Acquire),
        });
    }

    /// Advertise our progress to the primary (append ack / gap-fill
    /// driver). Skipped while the primary is unknown; its next heartbeat
    /// collects the same information.
    fn ack_progress(&self) {
        let (term, primary) = {
            let state = self.state.lock();
            (state.term, state.known_primary)
        };
        let primary = match primary {
            Some(id) if id != self.config.node_id => id,
            _ => return,
        };
        self.peers.send_to(
            primary,
            PeerMessage::Heartbeat {
                term,
                node_id: self.config.node_id,
                last_seq: self.cluster_seq.load(Ordering::Acquire),
            },
        );
    }

    /// Resend entries a lagging peer is missing, oldest first.
    fn gap_fill(&self, node_id: u32, peer_last: u64) {
        let own = self.cluster_seq.load(Ordering::Acquire);
        if peer_last >= own {
            return;
        }

        let term = self.state.lock().term;
        match self.engine.entries_with_origin_after(peer_last) {
            Ok(entries) => {
                if entries.is_empty() {
                    // The peer is behind the WAL rotation horizon; log
                    // resend cannot heal it.
                    tracing::warn!(
                        node_id,
                        peer_last,
                        own,
                        "peer behind rotation horizon; cannot gap-fill"
                    );
                    return;
                }
                let batch = entries.len().min(GAP_FILL_BATCH);
                tracing::debug!(node_id, peer_last, resend = batch, "gap-fill resend");
                for entry in entries.into_iter().take(GAP_FILL_BATCH) {
                    self.peers
                        .send_to(node_id, PeerMessage::AppendEntry { term, entry });
                }
            }
            Err(e) => {
                tracing::warn!("gap-fill read failed: {}", e);
            }
        }
    }

    /// Kv-port hint for `not_primary` errors. Takes the already held
    /// role state to keep the lock non-reentrant.
    fn primary_hint(&self, state: &RoleState) -> Option<u16> {
        let primary = state.known_primary?;
        if primary == self.config.node_id {
            return Some(self.config.kv_port);
        }
        self.config
            .peers
            .iter()
            .find(|p| p.node_id == primary)
            .map(|p| p.kv_port)
    }

    /// Block until `needed` peers have advertised `seq`, or the deadline.
    fn wait_for_peer_acks(&self, seq: u64, needed: usize, deadline: Instant) -> bool {
        let mut acks = self.acks.lock();
        loop {
            let have = acks.values().filter(|&&acked| acked >= seq).count();
            if have >= needed {
                return true;
            }
            if Instant::now() >= deadline
                || self
                    .ack_cond
                    .wait_until(&mut acks, deadline)
                    .timed_out()
            {
                return acks.values().filter(|&&acked| acked >= seq).count() >= needed;
            }
        }
    }
}

impl WritePath for ClusterController {
    /// Primary write path: durable locally, replicated to a majority,
    /// then applied and acked.
    fn submit(&self, op: Operation, simulate_fail: bool) -> Result<()> {
        let term = {
            let state = self.state.lock();
            if state.role != Role::Primary {
                return Err(MeridianError::NotPrimary {
                    kv_port: self.primary_hint(&state),
                });
            }
            state.term
        };

        // Assign the next cluster sequence and make the entry durable
        // locally. The writer lock is released before any network wait.
        let seq = self.cluster_seq.fetch_add(1, Ordering::AcqRel) + 1;
        let mut entry = LogEntry::new(self.config.node_id, op);
        entry.seq = seq;
        let pending = self.engine.log_entry(entry)?;

        self.peers.broadcast(&PeerMessage::AppendEntry {
            term,
            entry: pending.entry.clone(),
        });

        let needed_peers = self.config.majority() - 1;
        let deadline = Instant::now() + self.config.majority_timeout;
        if !self.wait_for_peer_acks(seq, needed_peers, deadline) {
            // The entry stays durable in the WAL; reconnecting
            // secondaries pick it up through gap-fill.
            self.engine.abandon_pending(&pending);
            return Err(MeridianError::Unavailable(format!(
                "no majority ack for seq {} within {:?}",
                seq, self.config.majority_timeout
            )));
        }

        self.engine.apply_pending(&pending, simulate_fail);
        Ok(())
    }
}

fn random_election_timeout(config: &ClusterConfig) -> Duration {
    let (lo, hi) = config.election_timeout;
    let span = hi.saturating_sub(lo);
    lo + Duration::from_millis(rand::thread_rng().gen_range(0..=span.as_millis() as u64))
}
