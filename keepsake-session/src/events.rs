//! Lifecycle notifications.

use tokio::sync::broadcast;

/// Default number of buffered events per listener.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Something that happened to a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent<P> {
    /// `set` inserted a new record
    Create { sid: String },
    /// `set` replaced an existing record
    Update { sid: String },
    /// `set` finished, after `Create` or `Update`
    Set { sid: String },
    /// `get` returned a session
    Get { sid: String },
    /// `touch` wrote a refresh
    Touch { sid: String, session: P },
    /// `destroy` finished
    Destroy { sid: String },
    /// `all` finished
    All { sessions: Vec<P> },
}

impl<P> SessionEvent<P> {
    /// Event name as used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Update { .. } => "update",
            Self::Set { .. } => "set",
            Self::Get { .. } => "get",
            Self::Touch { .. } => "touch",
            Self::Destroy { .. } => "destroy",
            Self::All { .. } => "all",
        }
    }

    /// Session id the event concerns, `None` for `All`.
    pub fn sid(&self) -> Option<&str> {
        match self {
            Self::Create { sid }
            | Self::Update { sid }
            | Self::Set { sid }
            | Self::Get { sid }
            | Self::Touch { sid, .. }
            | Self::Destroy { sid } => Some(sid),
            Self::All { .. } => None,
        }
    }
}

/// Fire-and-forget fan-out of [`SessionEvent`]s.
///
/// Publishing never fails: with no listeners the event is dropped, and a
/// listener that falls behind loses its oldest events.
pub struct EventEmitter<P> {
    sender: broadcast::Sender<SessionEvent<P>>,
}

impl<P: Clone> EventEmitter<P> {
    /// Create an emitter buffering `capacity` events per listener.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Register a listener.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent<P>> {
        self.sender.subscribe()
    }

    /// Publish an event to every current listener.
    pub fn emit(&self, event: SessionEvent<P>) {
        if self.listener_count() == 0 {
            return;
        }
        let _ = self.sender.send(event);
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<P: Clone> Default for EventEmitter<P> {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
