use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

pub type ParticipantId = String;

// Giver id -> receiver id. A valid draw is a constrained derangement: a
// bijection over the participant ids with no fixed points and no excluded
// pairs.
pub type DrawResult = HashMap<ParticipantId, ParticipantId>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    pub exclusions: Vec<ParticipantId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppState {
    pub participants: Vec<Participant>,
    pub draw: Option<DrawResult>,
    pub timestamp: u64,
}

pub const MAX_ATTEMPTS: u32 = 1000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DrawError {
    #[error("no valid assignment found in {0} attempts")]
    Infeasible(u32),
}

pub fn generate_draw<R: Rng + ?Sized>(
    participants: &[Participant],
    rng: &mut R,
) -> Result<DrawResult, DrawError> {
    for _ in 0..MAX_ATTEMPTS {
        if let Some(result) = attempt_assignment(participants, rng) {
            return Ok(result);
        }
    }
    Err(DrawError::Infeasible(MAX_ATTEMPTS))
}

// One greedy pass in a random giver order. A giver with no remaining valid
// receiver abandons the whole attempt; the caller retries from scratch
// instead of backtracking.
fn attempt_assignment<R: Rng + ?Sized>(
    participants: &[Participant],
    rng: &mut R,
) -> Option<DrawResult> {
    let mut pool: Vec<ParticipantId> = participants.iter().map(|p| p.id.clone()).collect();

    let mut givers: Vec<&Participant> = participants.iter().collect();
    givers.shuffle(rng);

    let mut result = DrawResult::with_capacity(participants.len());
    for giver in givers {
        let candidates: Vec<usize> = (0..pool.len())
            .filter(|&i| pool[i] != giver.id && !giver.exclusions.contains(&pool[i]))
            .collect();
        let picked = *candidates.choose(rng)?;
        let receiver = pool.swap_remove(picked);
        result.insert(giver.id.clone(), receiver);
    }
    Some(result)
}

pub fn validate_draw(participants: &[Participant], draw: &DrawResult) -> bool {
    if draw.len() != participants.len() {
        return false;
    }
    let mut receivers = HashSet::with_capacity(draw.len());
    for giver in participants {
        let Some(receiver) = draw.get(&giver.id) else {
            return false;
        };
        if *receiver == giver.id || giver.exclusions.contains(receiver) {
            return false;
        }
        if !participants.iter().any(|p| &p.id == receiver) {
            return false;
        }
        if !receivers.insert(receiver) {
            return false;
        }
    }
    true
}

// Obfuscation for casual shareability, not encryption: anyone holding the
// token can recover the full state, other assignments included.
pub fn encode_state(state: &AppState) -> String {
    match serde_json::to_string(state) {
        Ok(json) => URL_SAFE_NO_PAD.encode(json),
        Err(_) => String::new(),
    }
}

pub fn decode_state(token: &str) -> Option<AppState> {
    let token = token.strip_prefix('#').unwrap_or(token);
    if token.is_empty() {
        return None;
    }
    let bytes = URL_SAFE_NO_PAD.decode(token).ok()?;
    serde_json::from_slice(&bytes).ok()
}

// Decoded state behind a share link, present only when it carries a
// completed draw.
pub fn shared_draw(fragment: &str) -> Option<AppState> {
    decode_state(fragment).filter(|state| state.draw.is_some())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppMode {
    Landing,
    Setup,
    Reveal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentStatus {
    Absent,
    Invalid,
    Draw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEvent {
    FragmentChanged(FragmentStatus),
    AdminAuthenticated,
    DrawGenerated,
    PreviewRequested,
    StateCleared,
}

pub fn fragment_status(fragment: Option<&str>) -> FragmentStatus {
    match fragment {
        None => FragmentStatus::Absent,
        Some(raw) if raw.is_empty() || raw == "#" => FragmentStatus::Absent,
        Some(raw) => {
            if shared_draw(raw).is_some() {
                FragmentStatus::Draw
            } else {
                FragmentStatus::Invalid
            }
        }
    }
}

pub fn apply_event(mode: AppMode, event: AppEvent) -> AppMode {
    match event {
        AppEvent::FragmentChanged(FragmentStatus::Draw) => AppMode::Reveal,
        AppEvent::FragmentChanged(FragmentStatus::Invalid) => AppMode::Landing,
        // An empty location keeps an organizer mid-edit in the panel.
        AppEvent::FragmentChanged(FragmentStatus::Absent) => {
            if matches!(mode, AppMode::Setup) {
                AppMode::Setup
            } else {
                AppMode::Landing
            }
        }
        AppEvent::AdminAuthenticated => AppMode::Setup,
        // The organizer stays on the panel to copy the share link.
        AppEvent::DrawGenerated => AppMode::Setup,
        AppEvent::PreviewRequested => AppMode::Reveal,
        AppEvent::StateCleared => AppMode::Setup,
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RosterError {
    #[error("name required")]
    EmptyName,
    #[error("name taken")]
    NameTaken,
    #[error("id taken")]
    DuplicateId,
    #[error("participant not found")]
    ParticipantNotFound,
    #[error("participants cannot exclude themselves")]
    SelfExclusion,
    #[error("exclusion references an unknown participant")]
    UnknownExclusion,
}

// Organizer-side working copy of the list. Every edit discards a stored
// draw: stale assignments may violate the new constraints, and the link
// built from them stops being honored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    participants: Vec<Participant>,
    draw: Option<DrawResult>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_participants(participants: Vec<Participant>) -> Result<Self, RosterError> {
        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for participant in &participants {
            let name = participant.name.trim();
            if name.is_empty() {
                return Err(RosterError::EmptyName);
            }
            if !ids.insert(participant.id.as_str()) {
                return Err(RosterError::DuplicateId);
            }
            if !names.insert(name) {
                return Err(RosterError::NameTaken);
            }
        }
        for participant in &participants {
            for excluded in &participant.exclusions {
                if *excluded == participant.id {
                    return Err(RosterError::SelfExclusion);
                }
                if !participants.iter().any(|other| &other.id == excluded) {
                    return Err(RosterError::UnknownExclusion);
                }
            }
        }
        Ok(Self {
            participants,
            draw: None,
        })
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn draw(&self) -> Option<&DrawResult> {
        self.draw.as_ref()
    }

    pub fn add_participant(
        &mut self,
        id: impl Into<ParticipantId>,
        name: &str,
    ) -> Result<(), RosterError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RosterError::EmptyName);
        }
        let id = id.into();
        if self.participants.iter().any(|p| p.id == id) {
            return Err(RosterError::DuplicateId);
        }
        if self.participants.iter().any(|p| p.name == name) {
            return Err(RosterError::NameTaken);
        }
        self.participants.push(Participant {
            id,
            name: name.to_string(),
            exclusions: Vec::new(),
        });
        self.draw = None;
        Ok(())
    }

    pub fn remove_participant(&mut self, id: &str) -> Result<(), RosterError> {
        let before = self.participants.len();
        self.participants.retain(|p| p.id != id);
        if self.participants.len() == before {
            return Err(RosterError::ParticipantNotFound);
        }
        // The removed id must not linger in anyone's exclusion set.
        for participant in &mut self.participants {
            participant.exclusions.retain(|excluded| excluded != id);
        }
        self.draw = None;
        Ok(())
    }

    pub fn toggle_exclusion(&mut self, giver: &str, target: &str) -> Result<bool, RosterError> {
        if giver == target {
            return Err(RosterError::SelfExclusion);
        }
        if !self.participants.iter().any(|p| p.id == target) {
            return Err(RosterError::ParticipantNotFound);
        }
        let participant = self
            .participants
            .iter_mut()
            .find(|p| p.id == giver)
            .ok_or(RosterError::ParticipantNotFound)?;
        let excluded = if let Some(pos) = participant.exclusions.iter().position(|e| e == target) {
            participant.exclusions.remove(pos);
            false
        } else {
            participant.exclusions.push(target.to_string());
            true
        };
        self.draw = None;
        Ok(excluded)
    }

    pub fn clear(&mut self) {
        self.participants.clear();
        self.draw = None;
    }

    pub fn perform_draw<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<DrawResult, DrawError> {
        let result = generate_draw(&self.participants, rng)?;
        self.draw = Some(result.clone());
        Ok(result)
    }

    pub fn to_state(&self, timestamp: u64) -> AppState {
        AppState {
            participants: self.participants.clone(),
            draw: self.draw.clone(),
            timestamp,
        }
    }
}
