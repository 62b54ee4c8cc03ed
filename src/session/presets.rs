// Preset catalog - factory presets plus user presets that may shadow them

use super::types::{EventState, Preset, SessionSnapshot, TimelineState, TrackState};
use crate::sequencer::note::NoteLength;
use chrono::Utc;
use uuid::Uuid;

/// Names of the built-in presets, in display order
pub const FACTORY_PRESET_NAMES: [&str; 4] = ["Init", "Four On The Floor", "Bassline", "Arp Sketch"];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PresetError {
    #[error("A preset named '{0}' already exists; overwrite it explicitly")]
    NameExists(String),

    #[error("Preset '{0}' not found")]
    NotFound(String),

    #[error("Factory preset '{0}' cannot be removed")]
    FactoryPreset(String),

    #[error("Preset name must not be empty")]
    EmptyName,
}

/// Factory and user presets
///
/// A user preset whose name matches a factory preset shadows it: lookups
/// return the user version while the factory version stays available
/// underneath.
#[derive(Debug, Clone)]
pub struct PresetCatalog {
    factory: Vec<Preset>,
    user: Vec<Preset>,
}

impl PresetCatalog {
    pub fn new() -> Self {
        Self {
            factory: factory_presets(),
            user: Vec::new(),
        }
    }

    pub fn is_factory(&self, name: &str) -> bool {
        self.factory.iter().any(|p| p.name == name)
    }

    /// Look up by name; user presets win over factory ones
    pub fn get_by_name(&self, name: &str) -> Option<&Preset> {
        self.user
            .iter()
            .find(|p| p.name == name)
            .or_else(|| self.factory.iter().find(|p| p.name == name))
    }

    pub fn get_by_id(&self, id: Uuid) -> Option<&Preset> {
        self.user
            .iter()
            .find(|p| p.id == id)
            .or_else(|| self.factory.iter().find(|p| p.id == id))
    }

    /// Visible presets: factory slots (or their shadows) first, then user presets
    pub fn list(&self) -> Vec<&Preset> {
        let mut presets: Vec<&Preset> = self
            .factory
            .iter()
            .map(|f| self.user.iter().find(|u| u.name == f.name).unwrap_or(f))
            .collect();
        presets.extend(self.user.iter().filter(|u| !self.is_factory(&u.name)));
        presets
    }

    pub fn user_presets(&self) -> &[Preset] {
        &self.user
    }

    /// Save a new preset; fails if the name is already taken
    pub fn save(&mut self, name: &str, snapshot: SessionSnapshot) -> Result<Uuid, PresetError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(PresetError::EmptyName);
        }
        if self.get_by_name(name).is_some() {
            return Err(PresetError::NameExists(name.to_string()));
        }

        let preset = Preset::new(name, snapshot);
        let id = preset.id;
        self.user.push(preset);
        log::debug!("Saved preset '{}'", name);
        Ok(id)
    }

    /// Confirmed overwrite of an existing preset, keeping its id
    pub fn overwrite(&mut self, name: &str, snapshot: SessionSnapshot) -> Result<Uuid, PresetError> {
        let name = name.trim();
        if let Some(preset) = self.user.iter_mut().find(|p| p.name == name) {
            preset.snapshot = snapshot;
            preset.saved_at = Some(Utc::now());
            return Ok(preset.id);
        }

        let factory = self
            .factory
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| PresetError::NotFound(name.to_string()))?;
        let shadow = Preset {
            id: factory.id,
            name: factory.name.clone(),
            saved_at: Some(Utc::now()),
            snapshot,
        };
        let id = shadow.id;
        self.user.push(shadow);
        log::debug!("Factory preset '{}' shadowed by a user version", name);
        Ok(id)
    }

    /// Delete a user preset; removing a shadow reveals the factory preset
    pub fn remove(&mut self, name: &str) -> Result<(), PresetError> {
        if let Some(index) = self.user.iter().position(|p| p.name == name) {
            self.user.remove(index);
            return Ok(());
        }
        if self.is_factory(name) {
            Err(PresetError::FactoryPreset(name.to_string()))
        } else {
            Err(PresetError::NotFound(name.to_string()))
        }
    }

    /// Back to the factory set, discarding every user preset
    pub fn reset(&mut self) {
        self.user.clear();
    }

    /// Replace the user presets with a loaded set
    ///
    /// Later entries win when the set repeats a name.
    pub fn load_user_presets(&mut self, presets: Vec<Preset>) {
        self.user.clear();
        for preset in presets {
            match self.user.iter_mut().find(|p| p.name == preset.name) {
                Some(existing) => *existing = preset,
                None => self.user.push(preset),
            }
        }
    }
}

impl Default for PresetCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed ids so factory presets are stable across runs
fn factory_id(index: u128) -> Uuid {
    Uuid::from_u128(0x6d79_6d75_7369_6300_0000_0000_0000_0000 | index)
}

fn event(id: u64, pitch: &str, start: f64, duration: &str) -> EventState {
    EventState {
        id: Some(id),
        pitch: pitch.to_string(),
        start,
        duration: NoteLength::from(duration),
        velocity: 1.0,
    }
}

fn factory_presets() -> Vec<Preset> {
    let synth = |name: &str, channel: u8, waveform: &str| TrackState {
        name: name.to_string(),
        channel,
        instrument: serde_json::json!({ "waveform": waveform }),
    };

    let init = SessionSnapshot {
        tracks: vec![synth("Synth", 0, "sine")],
        timelines: vec![TimelineState {
            channels: vec![0],
            ..TimelineState::default()
        }],
        ..SessionSnapshot::default()
    };

    let four_on_the_floor = SessionSnapshot {
        tempo: 124.0,
        tracks: vec![synth("Kick", 9, "sine")],
        active_channel: 9,
        timelines: vec![TimelineState {
            channels: vec![9],
            events: (0..4)
                .map(|i| event(i, "C2", i as f64 / 4.0, "16n"))
                .collect(),
            ..TimelineState::default()
        }],
        ..SessionSnapshot::default()
    };

    let bassline = SessionSnapshot {
        tempo: 110.0,
        octave: 2,
        tracks: vec![synth("Bass", 1, "saw")],
        active_channel: 1,
        timelines: vec![TimelineState {
            channels: vec![1],
            bars: 2,
            events: vec![
                event(0, "E2", 0.0, "8n"),
                event(1, "E2", 0.375, "16n"),
                event(2, "G2", 0.5, "8n"),
                event(3, "A2", 1.0, "4n"),
                event(4, "D2", 1.5, "8n."),
            ],
            ..TimelineState::default()
        }],
        ..SessionSnapshot::default()
    };

    let arp_sketch = SessionSnapshot {
        tracks: vec![synth("Arp", 2, "square")],
        active_channel: 2,
        timelines: vec![TimelineState {
            channels: vec![2],
            humanize: true,
            events: ["C4", "E4", "G4", "C5", "G4", "E4", "C4", "G3"]
                .iter()
                .enumerate()
                .map(|(i, pitch)| event(i as u64, pitch, i as f64 / 8.0, "16n"))
                .collect(),
            ..TimelineState::default()
        }],
        ..SessionSnapshot::default()
    };

    [init, four_on_the_floor, bassline, arp_sketch]
        .into_iter()
        .zip(FACTORY_PRESET_NAMES)
        .enumerate()
        .map(|(index, (snapshot, name))| Preset {
            id: factory_id(index as u128),
            name: name.to_string(),
            saved_at: None,
            snapshot,
        })
        .collect()
}
