//! Local transport implementation.
//!
//! Every rank lives in the same process, usually on its own thread, and the
//! ranks exchange messages through shared mailboxes. Matching follows the
//! usual tagged message rules: a receive takes the first matching message in
//! arrival order, and wildcards match any source or tag. Collectives travel in
//! a separate context so that wildcard receives never observe them.
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use log::{debug, trace};
use crate::{Error, Result};
use super::{
    check_root,
    Completion,
    MessageTransport,
    Rank,
    ReduceOp,
    Scalar,
    ScalarPair,
    Status,
    Tag,
    ANY_SOURCE,
    ANY_TAG,
};

const BCAST_TAG: Tag = 1;
const GATHER_TAG: Tag = 2;
const REDUCE_TAG: Tag = 3;
const SCAN_TAG: Tag = 4;

/// Encoded size of a scalar pair: kind byte, value, rank.
const PAIR_BYTES: usize = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Context {
    PointToPoint,
    Collective,
}

struct Envelope {
    source: Rank,
    tag: Tag,
    context: Context,
    data: Vec<u8>,
    /// Send handle waiting for this message to be matched
    send_id: Option<u64>,
}

struct PostedRecv {
    id: u64,
    source: Rank,
    tag: Tag,
    context: Context,
    len: usize,
}

impl PostedRecv {
    fn matches(&self, env: &Envelope) -> bool {
        self.context == env.context
            && (self.source == ANY_SOURCE || self.source == env.source)
            && (self.tag == ANY_TAG || self.tag == env.tag)
    }

    fn deliver(&self, env: Envelope) -> Result<Completion> {
        if env.data.len() > self.len {
            return Err(Error::transport(format!(
                "message truncated: {} bytes into a {} byte buffer",
                env.data.len(),
                self.len,
            )));
        }
        Ok(Completion {
            status: Status {
                source: env.source,
                tag: env.tag,
                count: env.data.len(),
                ..Status::default()
            },
            data: Some(env.data),
        })
    }
}

fn sent(source: Rank, tag: Tag, count: usize) -> Completion {
    Completion {
        status: Status {
            source,
            tag,
            count,
            ..Status::default()
        },
        data: None,
    }
}

#[derive(Default)]
struct Fabric {
    next_id: u64,
    /// Unmatched messages, per destination rank
    unexpected: Vec<VecDeque<Envelope>>,
    /// Receives posted before their message arrived, per receiving rank
    posted: Vec<VecDeque<PostedRecv>>,
    /// Finished operations not yet collected through their handle
    done: HashMap<u64, Result<Completion>>,
}

impl Fabric {
    fn id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Options for a [`LocalCluster`].
#[derive(Debug, Clone)]
pub struct LocalOptions {
    /// Non-blocking sends up to this many bytes complete as soon as they are
    /// queued; larger ones complete once a receive matches them.
    pub eager_threshold: usize,
    /// Allow cancelling sends that have not been matched
    pub send_cancel: bool,
    /// Upper bound for any blocking wait
    pub wait_timeout: Duration,
}

impl Default for LocalOptions {
    fn default() -> LocalOptions {
        LocalOptions {
            eager_threshold: 64 * 1024,
            send_cancel: false,
            wait_timeout: Duration::from_secs(30),
        }
    }
}

struct Shared {
    size: usize,
    options: LocalOptions,
    fabric: Mutex<Fabric>,
    progress: Condvar,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, Fabric>> {
        self.fabric
            .lock()
            .map_err(|_| Error::transport("local fabric lock poisoned"))
    }
}

/// Builder for a set of connected in-process ranks.
pub struct LocalCluster {
    size: usize,
    options: LocalOptions,
}

impl LocalCluster {
    pub fn new(size: usize) -> LocalCluster {
        LocalCluster {
            size,
            options: LocalOptions::default(),
        }
    }

    pub fn options(mut self, options: LocalOptions) -> LocalCluster {
        self.options = options;
        self
    }

    pub fn eager_threshold(mut self, bytes: usize) -> LocalCluster {
        self.options.eager_threshold = bytes;
        self
    }

    pub fn send_cancel(mut self, enabled: bool) -> LocalCluster {
        self.options.send_cancel = enabled;
        self
    }

    pub fn wait_timeout(mut self, timeout: Duration) -> LocalCluster {
        self.options.wait_timeout = timeout;
        self
    }

    /// Create one transport per rank, in rank order.
    pub fn build(self) -> Vec<LocalTransport> {
        let fabric = Fabric {
            unexpected: (0..self.size).map(|_| VecDeque::new()).collect(),
            posted: (0..self.size).map(|_| VecDeque::new()).collect(),
            ..Fabric::default()
        };
        let shared = Arc::new(Shared {
            size: self.size,
            options: self.options,
            fabric: Mutex::new(fabric),
            progress: Condvar::new(),
        });
        (0..self.size)
            .map(|rank| LocalTransport {
                rank: rank as Rank,
                shared: Arc::clone(&shared),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
enum HandleKind {
    Send { dest: usize },
    Recv,
}

#[derive(Debug)]
pub struct LocalHandle {
    id: u64,
    kind: HandleKind,
}

/// One rank's view of a [`LocalCluster`].
pub struct LocalTransport {
    rank: Rank,
    shared: Arc<Shared>,
}

impl LocalTransport {
    fn dest_index(&self, dest: Rank) -> Result<usize> {
        if dest < 0 || dest as usize >= self.shared.size {
            Err(Error::transport(format!("invalid rank {}", dest)))
        } else {
            Ok(dest as usize)
        }
    }

    /// Queue a message for `dest`, matching it against a posted receive if
    /// one is waiting. Returns the send handle id when `track` is set.
    fn post_send(
        &self,
        buf: &[u8],
        dest: Rank,
        tag: Tag,
        context: Context,
        track: bool,
    ) -> Result<Option<u64>> {
        let dest = self.dest_index(dest)?;
        let mut fabric = self.shared.lock()?;
        let send_id = if track { Some(fabric.id()) } else { None };
        let env = Envelope {
            source: self.rank,
            tag,
            context,
            data: buf.to_vec(),
            send_id: None,
        };
        let pos = fabric.posted[dest].iter().position(|p| p.matches(&env));
        match pos.and_then(|pos| fabric.posted[dest].remove(pos)) {
            Some(recv) => {
                trace!("rank {} matched send to {} tag {} on arrival", self.rank, dest, tag);
                let result = recv.deliver(env);
                fabric.done.insert(recv.id, result);
                if let Some(id) = send_id {
                    fabric.done.insert(id, Ok(sent(self.rank, tag, buf.len())));
                }
            }
            None => {
                let eager = buf.len() <= self.shared.options.eager_threshold;
                let mut env = env;
                if let Some(id) = send_id {
                    if eager {
                        fabric.done.insert(id, Ok(sent(self.rank, tag, buf.len())));
                    } else {
                        env.send_id = Some(id);
                    }
                }
                fabric.unexpected[dest].push_back(env);
            }
        }
        self.shared.progress.notify_all();
        Ok(send_id)
    }

    fn post_recv(&self, len: usize, source: Rank, tag: Tag, context: Context) -> Result<u64> {
        let me = self.rank as usize;
        let mut fabric = self.shared.lock()?;
        let id = fabric.id();
        let recv = PostedRecv {
            id,
            source,
            tag,
            context,
            len,
        };
        let pos = fabric.unexpected[me].iter().position(|env| recv.matches(env));
        match pos.and_then(|pos| fabric.unexpected[me].remove(pos)) {
            Some(env) => {
                if let Some(send_id) = env.send_id {
                    let done = sent(env.source, env.tag, env.data.len());
                    fabric.done.insert(send_id, Ok(done));
                    self.shared.progress.notify_all();
                }
                let result = recv.deliver(env);
                fabric.done.insert(id, result);
            }
            None => fabric.posted[me].push_back(recv),
        }
        Ok(id)
    }

    fn wait_id(&self, id: u64) -> Result<Completion> {
        let deadline = Instant::now() + self.shared.options.wait_timeout;
        let mut fabric = self.shared.lock()?;
        loop {
            if let Some(result) = fabric.done.remove(&id) {
                return result;
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::transport(format!(
                    "rank {} timed out after {:?}",
                    self.rank, self.shared.options.wait_timeout,
                )));
            }
            fabric = self
                .shared
                .progress
                .wait_timeout(fabric, deadline - now)
                .map_err(|_| Error::transport("local fabric lock poisoned"))?
                .0;
        }
    }

    fn coll_send(&self, buf: &[u8], dest: Rank, tag: Tag) -> Result<()> {
        self.post_send(buf, dest, tag, Context::Collective, false)?;
        Ok(())
    }

    /// Receive exactly `len` bytes in the collective context.
    fn coll_recv(&self, len: usize, source: Rank, tag: Tag) -> Result<Vec<u8>> {
        let id = self.post_recv(len, source, tag, Context::Collective)?;
        let data = self.wait_id(id)?.data.unwrap_or_default();
        if data.len() != len {
            return Err(Error::transport(format!(
                "collective size mismatch: expected {} bytes from rank {}, got {}",
                len,
                source,
                data.len(),
            )));
        }
        Ok(data)
    }

    /// Collect every rank's pair on rank 0.
    fn gather_pairs(&self, input: ScalarPair) -> Result<Option<Vec<ScalarPair>>> {
        match self.gather(&encode_pair(input), 0)? {
            Some(bytes) => bytes
                .chunks_exact(PAIR_BYTES)
                .map(decode_pair)
                .collect::<Result<Vec<_>>>()
                .map(Some),
            None => Ok(None),
        }
    }
}

fn encode_pair(pair: ScalarPair) -> [u8; PAIR_BYTES] {
    let mut out = [0u8; PAIR_BYTES];
    let (kind, raw) = match pair.value {
        Scalar::Long(v) => (0u8, v.to_le_bytes()),
        Scalar::Double(v) => (1u8, v.to_le_bytes()),
    };
    out[0] = kind;
    out[1..9].copy_from_slice(&raw);
    out[9..13].copy_from_slice(&pair.rank.to_le_bytes());
    out
}

fn decode_pair(bytes: &[u8]) -> Result<ScalarPair> {
    if bytes.len() != PAIR_BYTES {
        return Err(Error::transport("malformed reduction pair"));
    }
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[1..9]);
    let mut rank = [0u8; 4];
    rank.copy_from_slice(&bytes[9..13]);
    let value = match bytes[0] {
        0 => Scalar::Long(i64::from_le_bytes(raw)),
        1 => Scalar::Double(f64::from_le_bytes(raw)),
        k => return Err(Error::transport(format!("unknown scalar kind {}", k))),
    };
    Ok(ScalarPair {
        value,
        rank: Rank::from_le_bytes(rank),
    })
}

impl MessageTransport for LocalTransport {
    type Handle = LocalHandle;

    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn supports_send_cancel(&self) -> bool {
        self.shared.options.send_cancel
    }

    fn send(&self, buf: &[u8], dest: Rank, tag: Tag) -> Result<()> {
        self.post_send(buf, dest, tag, Context::PointToPoint, false)?;
        Ok(())
    }

    fn recv(&self, len: usize, source: Rank, tag: Tag) -> Result<(Vec<u8>, Status)> {
        let id = self.post_recv(len, source, tag, Context::PointToPoint)?;
        let done = self.wait_id(id)?;
        Ok((done.data.unwrap_or_default(), done.status))
    }

    fn isend(&self, buf: &[u8], dest: Rank, tag: Tag) -> Result<LocalHandle> {
        let dest_index = self.dest_index(dest)?;
        let id = self
            .post_send(buf, dest, tag, Context::PointToPoint, true)?
            .ok_or_else(|| Error::transport("untracked send"))?;
        Ok(LocalHandle {
            id,
            kind: HandleKind::Send { dest: dest_index },
        })
    }

    fn irecv(&self, len: usize, source: Rank, tag: Tag) -> Result<LocalHandle> {
        if source != ANY_SOURCE {
            self.dest_index(source)?;
        }
        let id = self.post_recv(len, source, tag, Context::PointToPoint)?;
        Ok(LocalHandle {
            id,
            kind: HandleKind::Recv,
        })
    }

    fn test(&self, handle: &mut LocalHandle) -> Result<Option<Completion>> {
        let mut fabric = self.shared.lock()?;
        fabric.done.remove(&handle.id).transpose()
    }

    fn wait(&self, handle: &mut LocalHandle) -> Result<Completion> {
        self.wait_id(handle.id)
    }

    fn cancel(&self, handle: &mut LocalHandle) -> Result<()> {
        let mut fabric = self.shared.lock()?;
        match handle.kind {
            HandleKind::Recv => {
                let me = self.rank as usize;
                let pos = fabric.posted[me].iter().position(|p| p.id == handle.id);
                if let Some(pos) = pos {
                    fabric.posted[me].remove(pos);
                    fabric.done.insert(handle.id, Ok(Completion {
                        status: Status::cancelled(),
                        data: None,
                    }));
                    trace!("rank {} cancelled receive {}", self.rank, handle.id);
                }
            }
            HandleKind::Send { dest } => {
                if !self.shared.options.send_cancel {
                    return Err(Error::transport("send cancellation is not supported"));
                }
                let pos = fabric.unexpected[dest]
                    .iter()
                    .position(|env| env.send_id == Some(handle.id));
                if let Some(pos) = pos {
                    fabric.unexpected[dest].remove(pos);
                    fabric.done.insert(handle.id, Ok(Completion {
                        status: Status::cancelled(),
                        data: None,
                    }));
                    trace!("rank {} cancelled send {}", self.rank, handle.id);
                }
            }
        }
        self.shared.progress.notify_all();
        Ok(())
    }

    fn barrier(&self) -> Result<()> {
        let empty: &[u8] = &[];
        self.gather(empty, 0)?;
        self.bcast(Some(empty), 0, 0)?;
        debug!("rank {} passed barrier", self.rank);
        Ok(())
    }

    fn bcast(&self, buf: Option<&[u8]>, len: usize, root: Rank) -> Result<Option<Vec<u8>>> {
        check_root(root, self.shared.size)?;
        if self.rank != root {
            return self.coll_recv(len, root, BCAST_TAG).map(Some);
        }
        let buf = buf.ok_or_else(|| Error::argument("broadcast root has no buffer"))?;
        if buf.len() != len {
            return Err(Error::argument("broadcast buffer length mismatch"));
        }
        for dest in (0..self.shared.size as Rank).filter(|r| *r != root) {
            self.coll_send(buf, dest, BCAST_TAG)?;
        }
        Ok(None)
    }

    fn gather(&self, send: &[u8], root: Rank) -> Result<Option<Vec<u8>>> {
        let counts = vec![send.len(); self.shared.size];
        self.gatherv(send, Some(&counts), root)
    }

    fn gatherv(&self, send: &[u8], counts: Option<&[usize]>, root: Rank) -> Result<Option<Vec<u8>>> {
        check_root(root, self.shared.size)?;
        if self.rank != root {
            self.coll_send(send, root, GATHER_TAG)?;
            return Ok(None);
        }
        let counts = counts
            .filter(|c| c.len() == self.shared.size)
            .ok_or_else(|| Error::argument("gatherv root needs one count per rank"))?;
        let mut out = Vec::with_capacity(counts.iter().sum());
        for (source, &count) in counts.iter().enumerate() {
            if source as Rank == root {
                if send.len() != count {
                    return Err(Error::argument("gatherv root count mismatch"));
                }
                out.extend_from_slice(send);
            } else {
                out.extend(self.coll_recv(count, source as Rank, GATHER_TAG)?);
            }
        }
        Ok(Some(out))
    }

    fn allgather(&self, send: &[u8]) -> Result<Vec<u8>> {
        let gathered = self.gather(send, 0)?;
        let total = send.len() * self.shared.size;
        match self.bcast(gathered.as_deref(), total, 0)? {
            Some(data) => Ok(data),
            None => Ok(gathered.unwrap_or_default()),
        }
    }

    fn reduce(&self, input: ScalarPair, op: ReduceOp, root: Rank) -> Result<Option<ScalarPair>> {
        check_root(root, self.shared.size)?;
        op.check_scalar(input.value)?;
        let pairs = self.gather_pairs(input)?;
        let folded = match pairs {
            Some(pairs) => Some(fold_pairs(op, &pairs)?),
            None => None,
        };
        // Pairs were gathered on rank 0; forward to the requested root.
        if root == 0 {
            return Ok(folded);
        }
        if self.rank == 0 {
            let pair = folded.ok_or_else(|| Error::transport("missing reduction result"))?;
            self.coll_send(&encode_pair(pair), root, REDUCE_TAG)?;
            Ok(None)
        } else if self.rank == root {
            decode_pair(&self.coll_recv(PAIR_BYTES, 0, REDUCE_TAG)?).map(Some)
        } else {
            Ok(None)
        }
    }

    fn allreduce(&self, input: ScalarPair, op: ReduceOp) -> Result<ScalarPair> {
        let result = self.reduce(input, op, 0)?;
        let bytes = result.map(encode_pair);
        match self.bcast(bytes.as_ref().map(|b| &b[..]), PAIR_BYTES, 0)? {
            Some(data) => decode_pair(&data),
            None => result.ok_or_else(|| Error::transport("missing reduction result")),
        }
    }

    fn scan(&self, input: ScalarPair, op: ReduceOp) -> Result<ScalarPair> {
        op.check_scalar(input.value)?;
        match self.gather_pairs(input)? {
            Some(pairs) => {
                let mut acc: Option<ScalarPair> = None;
                let mut mine = input;
                for (rank, pair) in pairs.into_iter().enumerate() {
                    let next = match acc {
                        Some(prev) => op.combine(prev, pair)?,
                        None => pair,
                    };
                    acc = Some(next);
                    if rank as Rank == self.rank {
                        mine = next;
                    } else {
                        self.coll_send(&encode_pair(next), rank as Rank, SCAN_TAG)?;
                    }
                }
                Ok(mine)
            }
            None => decode_pair(&self.coll_recv(PAIR_BYTES, 0, SCAN_TAG)?),
        }
    }
}

fn fold_pairs(op: ReduceOp, pairs: &[ScalarPair]) -> Result<ScalarPair> {
    let (first, rest) = pairs
        .split_first()
        .ok_or_else(|| Error::transport("empty reduction"))?;
    rest.iter().try_fold(*first, |acc, pair| op.combine(acc, *pair))
}
