//! The in-process half of the channel.
//!
//! A [`Link`] is the sending side every handle shares: the listening flag plus
//! an unbounded request queue. The owner keeps the matching [`Mailbox`]. Each
//! queued [`Envelope`] carries a one-shot reply slot the sender waits on.

use super::stats::ChannelStats;
use super::{OwnerStatus, Serializer, Transport};
use crate::error::{ProxyError, Result};
use crate::platform;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// One encoded request and the slot its encoded response goes into.
pub(crate) struct Envelope {
    pub(crate) frame: Vec<u8>,
    pub(crate) reply: oneshot::Sender<Vec<u8>>,
}

/// Sending side of a proxy's channel.
pub struct Link {
    listening: RwLock<bool>,
    sender: mpsc::UnboundedSender<Envelope>,
    stats: ChannelStats,
    pid: u32,
}

/// Receiving side of a proxy's channel, held by the owner.
pub(crate) struct Mailbox {
    receiver: Mutex<mpsc::UnboundedReceiver<Envelope>>,
}

/// Create a connected link and mailbox.
pub(crate) fn channel() -> (Arc<Link>, Mailbox) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let link = Link {
        listening: RwLock::new(false),
        sender,
        stats: ChannelStats::default(),
        pid: platform::current_pid(),
    };
    let mailbox = Mailbox {
        receiver: Mutex::new(receiver),
    };
    (Arc::new(link), mailbox)
}

impl Link {
    /// Whether the owner currently answers requests.
    pub fn is_listening(&self) -> Result<bool> {
        self.listening
            .read()
            .map(|flag| *flag)
            .map_err(|_| ProxyError::LockPoisoned("listening flag"))
    }

    /// Pid of the owner process.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Counters shared by every handle on this link.
    pub fn stats(&self) -> &ChannelStats {
        &self.stats
    }

    /// Flip the flag under the write lock, returning its previous value.
    ///
    /// After the flag is lowered, no [`submit`](Self::submit) can queue
    /// anything until it is raised again.
    pub(crate) fn set_listening(&self, listening: bool) -> Result<bool> {
        let mut flag = self
            .listening
            .write()
            .map_err(|_| ProxyError::LockPoisoned("listening flag"))?;
        Ok(std::mem::replace(&mut *flag, listening))
    }

    /// Queue an encoded request if the owner is listening.
    ///
    /// Returns `None` when nobody is listening; the request is not queued.
    pub(crate) fn submit(&self, frame: Vec<u8>) -> Result<Option<oneshot::Receiver<Vec<u8>>>> {
        let flag = self
            .listening
            .read()
            .map_err(|_| ProxyError::LockPoisoned("listening flag"))?;
        if !*flag {
            return Ok(None);
        }
        let (reply, receiver) = oneshot::channel();
        if self.sender.send(Envelope { frame, reply }).is_err() {
            // owner gone
            return Ok(None);
        }
        self.stats.record_sent();
        Ok(Some(receiver))
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("pid", &self.pid)
            .field("listening", &self.is_listening().unwrap_or(false))
            .finish_non_exhaustive()
    }
}

impl Mailbox {
    /// Next queued request, without blocking.
    pub(crate) fn try_next(&self) -> Result<Option<Envelope>> {
        let mut receiver = self
            .receiver
            .lock()
            .map_err(|_| ProxyError::LockPoisoned("mailbox"))?;
        Ok(receiver.try_recv().ok())
    }
}

/// Transport for handles living in the owner's process.
#[derive(Debug, Clone)]
pub struct LocalTransport {
    link: Arc<Link>,
}

impl LocalTransport {
    /// A transport that queues requests on `link`.
    pub fn new(link: Arc<Link>) -> Self {
        Self { link }
    }

    /// The link requests are queued on.
    pub fn link(&self) -> &Arc<Link> {
        &self.link
    }
}

impl Transport for LocalTransport {
    fn round_trip(&self, frame: Vec<u8>) -> Result<Option<Vec<u8>>> {
        let Some(receiver) = self.link.submit(frame)? else {
            return Ok(None);
        };
        debug!("waiting for owner {} to answer", self.link.pid);
        receiver
            .blocking_recv()
            .map(Some)
            .map_err(|_| ProxyError::ChannelClosed {
                message: "owner dropped the request without answering".to_string(),
            })
    }

    fn status(&self, _serializer: &dyn Serializer) -> Result<OwnerStatus> {
        Ok(OwnerStatus {
            listening: self.link.is_listening()?,
            pid: Some(self.link.pid),
        })
    }
}
