//! Client-side model of the room, folded from server events.

use common::{ConsumerId, MediaKind, PeerId, ProducerId};
use signaling_protocol::{ChatMessage, PeerSummary, ServerEvent};
use std::collections::BTreeMap;

/// One consumed remote track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub producer_id: ProducerId,
    pub consumer_id: ConsumerId,
    pub kind: MediaKind,
}

/// A remote participant as seen by this client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePeer {
    pub id: PeerId,
    pub display_name: String,
    pub tracks: BTreeMap<MediaKind, RemoteTrack>,
    pub audio_enabled: bool,
    pub video_enabled: bool,
}

impl RemotePeer {
    fn new(id: PeerId, display_name: String) -> Self {
        Self {
            id,
            display_name,
            tracks: BTreeMap::new(),
            audio_enabled: true,
            video_enabled: true,
        }
    }

    #[must_use]
    pub fn track(&self, kind: MediaKind) -> Option<&RemoteTrack> {
        self.tracks.get(&kind)
    }
}

/// Remote peers, the ordered chat log, and an unread counter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomView {
    local_peer_id: Option<PeerId>,
    peers: BTreeMap<PeerId, RemotePeer>,
    chat: Vec<ChatMessage>,
    unread: usize,
}

impl RoomView {
    /// Start a view for a freshly joined session.
    #[must_use]
    pub fn joined(local_peer_id: PeerId, existing: &[PeerSummary]) -> Self {
        let mut view = Self {
            local_peer_id: Some(local_peer_id),
            ..Self::default()
        };
        for peer in existing {
            view.add_peer(peer.id.clone(), peer.display_name.clone());
        }
        view
    }

    fn add_peer(&mut self, id: PeerId, display_name: String) {
        if Some(&id) == self.local_peer_id.as_ref() {
            return;
        }
        self.peers
            .entry(id.clone())
            .or_insert_with(|| RemotePeer::new(id, display_name));
    }

    /// Fold one server event into the view.
    pub fn apply(&mut self, event: &ServerEvent) {
        match event {
            ServerEvent::PeerJoined {
                peer_id,
                display_name,
            } => self.add_peer(peer_id.clone(), display_name.clone()),
            ServerEvent::PeerLeft { peer_id, .. } => {
                self.peers.remove(peer_id);
            }
            // Tracks appear once the consumer is resumed.
            ServerEvent::NewProducer { .. } => {}
            ServerEvent::ProducerClosed {
                producer_id,
                peer_id,
            } => {
                if let Some(peer) = self.peers.get_mut(peer_id) {
                    peer.tracks.retain(|_, track| &track.producer_id != producer_id);
                }
            }
            ServerEvent::PeerMediaStateChanged {
                peer_id,
                kind,
                enabled,
            } => {
                if let Some(peer) = self.peers.get_mut(peer_id) {
                    match kind {
                        MediaKind::Audio => peer.audio_enabled = *enabled,
                        MediaKind::Video => peer.video_enabled = *enabled,
                    }
                }
            }
            ServerEvent::ChatMessage(message) => {
                if Some(&message.sender_id) != self.local_peer_id.as_ref() {
                    self.unread += 1;
                }
                self.chat.push(message.clone());
            }
        }
    }

    /// Record a resumed consumer. Ignored if the peer has already left.
    pub fn attach_track(&mut self, peer_id: &PeerId, track: RemoteTrack) -> bool {
        match self.peers.get_mut(peer_id) {
            Some(peer) => {
                peer.tracks.insert(track.kind, track);
                true
            }
            None => false,
        }
    }

    /// Reset to the state of a session that never joined.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn mark_read(&mut self) {
        self.unread = 0;
    }

    #[must_use]
    pub fn local_peer_id(&self) -> Option<&PeerId> {
        self.local_peer_id.as_ref()
    }

    #[must_use]
    pub fn peer(&self, id: &PeerId) -> Option<&RemotePeer> {
        self.peers.get(id)
    }

    pub fn peers(&self) -> impl Iterator<Item = &RemotePeer> {
        self.peers.values()
    }

    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    #[must_use]
    pub fn chat(&self) -> &[ChatMessage] {
        &self.chat
    }

    #[must_use]
    pub fn unread(&self) -> usize {
        self.unread
    }
}
