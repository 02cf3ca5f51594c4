use std::collections::HashMap;

use crate::cleanup::TeardownReport;
use crate::events::{ParticipantInfo, TrackInfo, TrackKind};
use crate::media::Track;

/// An identity plus the tracks it currently owns.
///
/// Local and remote participants share this shape.
#[derive(Debug)]
pub struct Participant {
    identity: String,
    audio_tracks: HashMap<String, Track>,
    video_tracks: HashMap<String, Track>,
}

impl Participant {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            audio_tracks: HashMap::new(),
            video_tracks: HashMap::new(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// The local participant learns its identity once the room accepts us.
    pub(crate) fn set_identity(&mut self, identity: String) {
        self.identity = identity;
    }

    fn map_mut(&mut self, kind: TrackKind) -> &mut HashMap<String, Track> {
        match kind {
            TrackKind::Audio => &mut self.audio_tracks,
            TrackKind::Video => &mut self.video_tracks,
        }
    }

    /// Insert a track, returning the one it replaced (same id), if any.
    pub fn insert_track(&mut self, track: Track) -> Option<Track> {
        let id = track.id().to_string();
        self.map_mut(track.kind()).insert(id, track)
    }

    pub fn remove_track(&mut self, track_id: &str) -> Option<Track> {
        self.audio_tracks
            .remove(track_id)
            .or_else(|| self.video_tracks.remove(track_id))
    }

    pub fn track_mut(&mut self, track_id: &str) -> Option<&mut Track> {
        match self.audio_tracks.get_mut(track_id) {
            Some(track) => Some(track),
            None => self.video_tracks.get_mut(track_id),
        }
    }

    pub fn tracks(&self, kind: TrackKind) -> impl Iterator<Item = &Track> {
        match kind {
            TrackKind::Audio => self.audio_tracks.values(),
            TrackKind::Video => self.video_tracks.values(),
        }
    }

    pub fn tracks_mut(&mut self, kind: TrackKind) -> impl Iterator<Item = &mut Track> {
        self.map_mut(kind).values_mut()
    }

    pub fn has_track(&self, track_id: &str) -> bool {
        self.audio_tracks.contains_key(track_id) || self.video_tracks.contains_key(track_id)
    }

    pub fn track_count(&self) -> usize {
        self.audio_tracks.len() + self.video_tracks.len()
    }

    /// Release and drop every track.
    pub fn release_tracks(&mut self, report: &mut TeardownReport) {
        for (_, mut track) in self.audio_tracks.drain().chain(self.video_tracks.drain()) {
            report.record(&mut track);
        }
    }

    pub fn info(&self) -> ParticipantInfo {
        fn sorted(tracks: &HashMap<String, Track>) -> Vec<TrackInfo> {
            let mut infos: Vec<TrackInfo> = tracks.values().map(Track::info).collect();
            infos.sort_by(|a, b| a.id.cmp(&b.id));
            infos
        }

        ParticipantInfo {
            identity: self.identity.clone(),
            audio_tracks: sorted(&self.audio_tracks),
            video_tracks: sorted(&self.video_tracks),
        }
    }
}

/// Remote participants of a session, keyed by identity.
///
/// The local identity is remembered so it can never be added as a remote.
#[derive(Debug)]
pub struct ParticipantRoster {
    local_identity: String,
    remote: HashMap<String, Participant>,
}

impl ParticipantRoster {
    pub fn new(local_identity: impl Into<String>) -> Self {
        Self {
            local_identity: local_identity.into(),
            remote: HashMap::new(),
        }
    }

    pub fn local_identity(&self) -> &str {
        &self.local_identity
    }

    /// Add an empty remote participant. Returns `false` for duplicates and
    /// for the local identity.
    pub fn add(&mut self, identity: &str) -> bool {
        if identity == self.local_identity || self.remote.contains_key(identity) {
            return false;
        }
        self.remote
            .insert(identity.to_string(), Participant::new(identity));
        true
    }

    pub fn remove(&mut self, identity: &str) -> Option<Participant> {
        self.remote.remove(identity)
    }

    pub fn get(&self, identity: &str) -> Option<&Participant> {
        self.remote.get(identity)
    }

    pub fn get_mut(&mut self, identity: &str) -> Option<&mut Participant> {
        self.remote.get_mut(identity)
    }

    pub fn find_track_mut(&mut self, track_id: &str) -> Option<&mut Track> {
        self.remote.values_mut().find_map(|p| p.track_mut(track_id))
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.remote.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.remote.len()
    }

    pub fn is_empty(&self) -> bool {
        self.remote.is_empty()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = Participant> + '_ {
        self.remote.drain().map(|(_, p)| p)
    }

    /// Participant infos sorted by identity.
    pub fn infos(&self) -> Vec<ParticipantInfo> {
        let mut infos: Vec<ParticipantInfo> = self.remote.values().map(Participant::info).collect();
        infos.sort_by(|a, b| a.identity.cmp(&b.identity));
        infos
    }
}
