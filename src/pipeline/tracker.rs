//! Face track association
//!
//! Greedy IoU matching between live tracks and per-frame detections.
//! Track identity is sticky: once an employee is attached above the
//! identification threshold, a different answer needs the higher
//! re-identification bar to replace it.

use crate::models::BBox;

/// Identity attached to a track
#[derive(Debug, Clone, PartialEq)]
pub struct TrackIdentity {
    pub employee_id: String,
    pub score: f32,
}

/// One face followed across frames
#[derive(Debug, Clone)]
pub struct Track {
    /// Monotonic within the pipeline; never reused
    pub id: u64,
    pub bbox: BBox,
    /// Pixels per frame, from the last association
    pub velocity: (f32, f32),
    pub last_seen_frame: u64,
    pub frames_tracked: u64,
    pub identity: Option<TrackIdentity>,
    /// Best rejected score since the last identity change; surfaces
    /// "unknown" tracks in status
    pub last_score: f32,
}

/// A detection prepared for association: box plus the best index match
#[derive(Debug, Clone)]
pub struct Observation {
    pub bbox: BBox,
    pub confidence: f32,
    /// Best identity candidate from the index, if any
    pub candidate: Option<(String, f32)>,
}

/// FaceTracker instance, one per pipeline
pub struct FaceTracker {
    tracks: Vec<Track>,
    next_id: u64,
    iou_threshold: f32,
    expire_frames: u64,
    identify_threshold: f32,
    reid_threshold: f32,
}

impl FaceTracker {
    pub fn new(
        iou_threshold: f32,
        expire_frames: u64,
        identify_threshold: f32,
        reid_margin: f32,
    ) -> Self {
        Self {
            tracks: Vec::new(),
            next_id: 1,
            iou_threshold,
            expire_frames,
            identify_threshold,
            reid_threshold: identify_threshold + reid_margin,
        }
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Associate observations with tracks for `frame_no`.
    /// Returns the ids of tracks expired this frame.
    pub fn update(&mut self, frame_no: u64, observations: &[Observation]) -> Vec<u64> {
        // Greedy matching: best IoU pair first
        let mut pairs: Vec<(usize, usize, f32)> = Vec::new();
        for (t, track) in self.tracks.iter().enumerate() {
            for (o, obs) in observations.iter().enumerate() {
                let iou = track.bbox.iou(&obs.bbox);
                if iou >= self.iou_threshold {
                    pairs.push((t, o, iou));
                }
            }
        }
        pairs.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

        let mut track_taken = vec![false; self.tracks.len()];
        let mut obs_taken = vec![false; observations.len()];

        for (t, o, _) in pairs {
            if track_taken[t] || obs_taken[o] {
                continue;
            }
            track_taken[t] = true;
            obs_taken[o] = true;
            self.apply_observation(t, frame_no, &observations[o]);
        }

        // Unmatched observations found new tracks
        for (o, obs) in observations.iter().enumerate() {
            if obs_taken[o] {
                continue;
            }
            let identity = obs.candidate.as_ref().and_then(|(id, score)| {
                (*score >= self.identify_threshold).then(|| TrackIdentity {
                    employee_id: id.clone(),
                    score: *score,
                })
            });
            let track = Track {
                id: self.next_id,
                bbox: obs.bbox,
                velocity: (0.0, 0.0),
                last_seen_frame: frame_no,
                frames_tracked: 1,
                identity,
                last_score: obs.candidate.as_ref().map(|(_, s)| *s).unwrap_or(0.0),
            };
            self.next_id += 1;
            tracing::debug!(
                track_id = track.id,
                identified = track.identity.is_some(),
                "Track created"
            );
            self.tracks.push(track);
        }

        // Age out stale tracks
        let expire_frames = self.expire_frames;
        let mut expired = Vec::new();
        self.tracks.retain(|track| {
            let stale = frame_no.saturating_sub(track.last_seen_frame) > expire_frames;
            if stale {
                tracing::debug!(track_id = track.id, "Track expired");
                expired.push(track.id);
            }
            !stale
        });

        expired
    }

    fn apply_observation(&mut self, idx: usize, frame_no: u64, obs: &Observation) {
        let track = &mut self.tracks[idx];

        let (old_cx, old_cy) = track.bbox.center();
        let (new_cx, new_cy) = obs.bbox.center();
        let frames = (frame_no.saturating_sub(track.last_seen_frame)).max(1) as f32;
        track.velocity = ((new_cx - old_cx) / frames, (new_cy - old_cy) / frames);
        track.bbox = obs.bbox;
        track.last_seen_frame = frame_no;
        track.frames_tracked += 1;

        if let Some((candidate_id, score)) = &obs.candidate {
            track.last_score = *score;
            match &track.identity {
                None => {
                    if *score >= self.identify_threshold {
                        track.identity = Some(TrackIdentity {
                            employee_id: candidate_id.clone(),
                            score: *score,
                        });
                        tracing::info!(
                            track_id = track.id,
                            employee_id = %candidate_id,
                            score,
                            "Track identified"
                        );
                    }
                }
                Some(current) => {
                    if candidate_id == &current.employee_id {
                        if *score > current.score {
                            track.identity = Some(TrackIdentity {
                                employee_id: candidate_id.clone(),
                                score: *score,
                            });
                        }
                    } else if *score >= self.reid_threshold {
                        // A different employee needs the higher bar
                        tracing::info!(
                            track_id = track.id,
                            previous = %current.employee_id,
                            employee_id = %candidate_id,
                            score,
                            "Track re-identified"
                        );
                        track.identity = Some(TrackIdentity {
                            employee_id: candidate_id.clone(),
                            score: *score,
                        });
                    }
                }
            }
        }
    }
}
