#![forbid(unsafe_code)]

// Spotlight selection - which remote peers get live video, given a cap

use crate::signaling::protocol::PeerId;
use std::collections::HashSet;

/// Picks the ordered set of spotlighted peers: manual selections first, then
/// the speaker list by recency, deduplicated, optionally filtered to peers
/// with video, capped at `max_spotlights`.
#[derive(Debug)]
pub struct SpotlightSelector {
    max_spotlights: usize,
    hide_no_video: bool,
    /// All known peers; most recent speaker first, newly joined peers last.
    speakers: Vec<PeerId>,
    /// Manually selected peers, in selection order. Always included.
    selected: Vec<PeerId>,
    peers_with_video: HashSet<PeerId>,
}

impl SpotlightSelector {
    pub fn new(max_spotlights: usize) -> Self {
        Self {
            max_spotlights,
            hide_no_video: false,
            speakers: Vec::new(),
            selected: Vec::new(),
            peers_with_video: HashSet::new(),
        }
    }

    pub fn max_spotlights(&self) -> usize {
        self.max_spotlights
    }

    pub fn set_max_spotlights(&mut self, max: usize) {
        self.max_spotlights = max;
    }

    pub fn set_hide_no_video(&mut self, hide: bool) {
        self.hide_no_video = hide;
    }

    pub fn selected(&self) -> &[PeerId] {
        &self.selected
    }

    /// Append a newly joined peer at the tail of the speaker order.
    pub fn add_peer(&mut self, peer_id: &str) {
        if !self.speakers.iter().any(|id| id == peer_id) {
            self.speakers.push(peer_id.to_string());
        }
    }

    pub fn add_peers<'a>(&mut self, peer_ids: impl IntoIterator<Item = &'a str>) {
        for peer_id in peer_ids {
            self.add_peer(peer_id);
        }
    }

    pub fn remove_peer(&mut self, peer_id: &str) {
        self.speakers.retain(|id| id != peer_id);
        self.selected.retain(|id| id != peer_id);
        self.peers_with_video.remove(peer_id);
    }

    /// Move the active speaker to the front of the speaker order.
    pub fn on_active_speaker(&mut self, peer_id: &str) {
        self.speakers.retain(|id| id != peer_id);
        self.speakers.insert(0, peer_id.to_string());
    }

    pub fn add_selected(&mut self, peer_id: &str) {
        if !self.selected.iter().any(|id| id == peer_id) {
            self.selected.push(peer_id.to_string());
        }
    }

    /// Replace the selection with a single peer.
    pub fn set_selected(&mut self, peer_id: &str) {
        self.selected.clear();
        self.selected.push(peer_id.to_string());
    }

    pub fn remove_selected(&mut self, peer_id: &str) {
        self.selected.retain(|id| id != peer_id);
    }

    pub fn clear_selected(&mut self) {
        self.selected.clear();
    }

    pub fn set_peer_video(&mut self, peer_id: &str, has_video: bool) {
        if has_video {
            self.peers_with_video.insert(peer_id.to_string());
        } else {
            self.peers_with_video.remove(peer_id);
        }
    }

    /// Forget everything; used on transient disconnect teardown.
    pub fn clear(&mut self) {
        self.speakers.clear();
        self.selected.clear();
        self.peers_with_video.clear();
    }

    /// Current spotlight order.
    pub fn spotlights(&self) -> Vec<PeerId> {
        let mut seen = HashSet::new();
        self.selected
            .iter()
            .chain(self.speakers.iter())
            .filter(|id| seen.insert(id.as_str()))
            .filter(|id| !self.hide_no_video || self.peers_with_video.contains(id.as_str()))
            .take(self.max_spotlights)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector_with_peers(max: usize, peers: &[&str]) -> SpotlightSelector {
        let mut selector = SpotlightSelector::new(max);
        selector.add_peers(peers.iter().copied());
        selector
    }

    #[test]
    fn spotlights_never_exceed_cap() {
        let selector = selector_with_peers(2, &["p1", "p2", "p3", "p4"]);
        let spotlights = selector.spotlights();
        assert_eq!(spotlights, vec!["p1", "p2"]);
        assert!(spotlights.len() <= selector.max_spotlights());
    }

    #[test]
    fn active_speaker_moves_to_front() {
        let mut selector = selector_with_peers(2, &["p1", "p2", "p3"]);
        selector.on_active_speaker("p3");
        assert_eq!(selector.spotlights(), vec!["p3", "p1"]);

        // unknown speakers still enter the list
        selector.on_active_speaker("p9");
        assert_eq!(selector.spotlights(), vec!["p9", "p3"]);
    }

    #[test]
    fn selected_peers_take_priority() {
        let mut selector = selector_with_peers(2, &["p1", "p2", "p3"]);
        selector.add_selected("p3");
        assert_eq!(selector.spotlights(), vec!["p3", "p1"]);

        // the same peer is not listed twice
        selector.on_active_speaker("p3");
        assert_eq!(selector.spotlights(), vec!["p3", "p1"]);

        selector.set_selected("p2");
        assert_eq!(selector.spotlights(), vec!["p2", "p3"]);

        selector.clear_selected();
        assert_eq!(selector.spotlights(), vec!["p3", "p1"]);
    }

    #[test]
    fn removed_peer_leaves_every_structure() {
        let mut selector = selector_with_peers(4, &["p1", "p2"]);
        selector.add_selected("p2");
        selector.set_peer_video("p2", true);

        selector.remove_peer("p2");
        assert_eq!(selector.spotlights(), vec!["p1"]);
        assert!(selector.selected().is_empty());
    }

    #[test]
    fn hide_no_video_filters_spotlights() {
        let mut selector = selector_with_peers(3, &["p1", "p2", "p3"]);
        selector.set_hide_no_video(true);
        assert!(selector.spotlights().is_empty());

        selector.set_peer_video("p2", true);
        assert_eq!(selector.spotlights(), vec!["p2"]);

        selector.set_hide_no_video(false);
        assert_eq!(selector.spotlights(), vec!["p1", "p2", "p3"]);
    }
}
