//! Vehicle state: the single shared record every tool handler mutates.
//!
//! One store owns the state. Writes go through the store's mutex; reads
//! take value-copy snapshots, so readers may observe a slightly stale view
//! but never a torn one. Field-by-name access mirrors the tool layer's
//! string-keyed world and is backed by the serde representation.

use crate::error::{AssistantError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

fn zone_map_f32(value: f32) -> HashMap<String, f32> {
    ["driver", "passenger", "rear_left", "rear_right"]
        .iter()
        .map(|z| ((*z).to_owned(), value))
        .collect()
}

fn zone_map_u8(value: u8) -> HashMap<String, u8> {
    ["driver", "passenger", "rear_left", "rear_right"]
        .iter()
        .map(|z| ((*z).to_owned(), value))
        .collect()
}

fn zone_map_bool(value: bool) -> HashMap<String, bool> {
    ["driver", "passenger", "rear_left", "rear_right"]
        .iter()
        .map(|z| ((*z).to_owned(), value))
        .collect()
}

/// Complete vehicle state record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleState {
    // Base vehicle status
    pub engine_running: bool,
    pub locked: bool,
    pub speed_kmh: f32,
    pub fuel_level_pct: f32,
    pub battery_level_pct: f32,
    pub range_km: f32,
    pub mileage_km: f32,
    pub outside_temperature_c: f32,

    // Driving controls
    pub driving_mode: String,
    pub parking_brake: bool,
    pub cruise_control_enabled: bool,
    pub cruise_control_speed: f32,
    pub speed_limit: f32,

    // Climate
    pub ac_on: bool,
    pub ac_max_mode: bool,
    pub auto_climate: bool,
    pub recirculation: bool,
    pub defrost_front: bool,
    pub defrost_rear: bool,
    pub temperature_c: HashMap<String, f32>,
    pub fan_speed: u8,
    pub air_direction: String,
    pub seat_heating: HashMap<String, u8>,
    pub seat_ventilation: HashMap<String, u8>,

    // Entertainment
    pub music_playing: bool,
    pub music_paused: bool,
    pub current_track: String,
    pub current_artist: String,
    pub volume: u8,
    pub muted: bool,
    pub audio_source: String,
    pub radio_frequency: f32,

    // Lighting
    pub headlights_on: bool,
    pub headlight_mode: String,
    pub high_beam: bool,
    pub fog_lights_front: bool,
    pub fog_lights_rear: bool,
    pub interior_lights_on: bool,
    pub interior_brightness: u8,
    pub ambient_lights_on: bool,
    pub ambient_light_color: String,

    // Windows / sunroof
    pub windows: HashMap<String, u8>,
    pub sunroof_position: u8,
    pub sunroof_tilted: bool,

    // Doors / trunk
    pub doors_locked: bool,
    pub doors_open: HashMap<String, bool>,
    pub trunk_open: bool,

    // Safety / ADAS
    pub lane_assist: bool,
    pub blind_spot_monitor: bool,
    pub collision_warning: bool,
    pub autopilot: bool,
    pub following_distance: u8,

    // Wipers
    pub wipers_on: bool,
    pub wiper_speed: String,

    // Communication
    pub call_active: bool,
    pub call_contact: String,

    // Navigation
    pub navigation_active: bool,
    pub navigation_destination: String,
    pub voice_guidance: bool,

    // Energy
    pub charging: bool,
    pub charge_limit_pct: u8,
}

impl Default for VehicleState {
    fn default() -> Self {
        Self {
            engine_running: false,
            locked: true,
            speed_kmh: 0.0,
            fuel_level_pct: 50.0,
            battery_level_pct: 80.0,
            range_km: 400.0,
            mileage_km: 50_000.0,
            outside_temperature_c: 25.0,
            driving_mode: "comfort".to_owned(),
            parking_brake: true,
            cruise_control_enabled: false,
            cruise_control_speed: 0.0,
            speed_limit: 0.0,
            ac_on: false,
            ac_max_mode: false,
            auto_climate: false,
            recirculation: false,
            defrost_front: false,
            defrost_rear: false,
            temperature_c: zone_map_f32(22.0),
            fan_speed: 3,
            air_direction: "auto".to_owned(),
            seat_heating: zone_map_u8(0),
            seat_ventilation: zone_map_u8(0),
            music_playing: false,
            music_paused: false,
            current_track: String::new(),
            current_artist: String::new(),
            volume: 50,
            muted: false,
            audio_source: "bluetooth".to_owned(),
            radio_frequency: 0.0,
            headlights_on: false,
            headlight_mode: "auto".to_owned(),
            high_beam: false,
            fog_lights_front: false,
            fog_lights_rear: false,
            interior_lights_on: false,
            interior_brightness: 50,
            ambient_lights_on: true,
            ambient_light_color: "white".to_owned(),
            windows: zone_map_u8(0),
            sunroof_position: 0,
            sunroof_tilted: false,
            doors_locked: true,
            doors_open: zone_map_bool(false),
            trunk_open: false,
            lane_assist: false,
            blind_spot_monitor: true,
            collision_warning: true,
            autopilot: false,
            following_distance: 3,
            wipers_on: false,
            wiper_speed: "auto".to_owned(),
            call_active: false,
            call_contact: String::new(),
            navigation_active: false,
            navigation_destination: String::new(),
            voice_guidance: true,
            charging: false,
            charge_limit_pct: 80,
        }
    }
}

/// The single owner of [`VehicleState`].
pub struct VehicleStore {
    state: Mutex<VehicleState>,
}

impl Default for VehicleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl VehicleStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(VehicleState::default()),
        }
    }

    /// Value-copy snapshot of the whole state.
    pub fn snapshot(&self) -> VehicleState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Run a mutation under the write lock.
    pub fn with_mut<T>(&self, f: impl FnOnce(&mut VehicleState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    /// Read one field by name from a snapshot.
    pub fn get_field(&self, key: &str) -> Option<serde_json::Value> {
        let snapshot = self.snapshot();
        let value = serde_json::to_value(&snapshot).ok()?;
        value.get(key).cloned()
    }

    /// Set one field by name. The value must deserialize into the field's
    /// declared type.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown fields or type mismatches.
    pub fn set_field(&self, key: &str, value: serde_json::Value) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut tree = serde_json::to_value(&*state)
            .map_err(|e| AssistantError::Tool(format!("state serialize: {e}")))?;
        let Some(object) = tree.as_object_mut() else {
            return Err(AssistantError::Tool("state is not an object".to_owned()));
        };
        if !object.contains_key(key) {
            return Err(AssistantError::Tool(format!("unknown state field: {key}")));
        }
        object.insert(key.to_owned(), value);
        let updated: VehicleState = serde_json::from_value(tree)
            .map_err(|e| AssistantError::Tool(format!("invalid value for {key}: {e}")))?;
        *state = updated;
        debug!(field = key, "vehicle state updated");
        Ok(())
    }

    /// Reset every field to its default.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *state = VehicleState::default();
    }
}
