/* Dev-hooks synthetic device driver: JSON spec parsing and conversion
 * into a `DeviceState`, injected via `Manager.LoadTestDevice` when built
 * with the `dev-hooks` feature. Only compiled in that configuration. */
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use crate::device::{
    BusId, ButtonAction, Color, DeviceState, DeviceType, Dpi, LedMode, ProfileCaps, ResolutionCaps,
};
use crate::driver::{DeviceIo, Driver};

/* ------------------------------------------------------------------ */
/* JSON DTOs                                                            */
/* ------------------------------------------------------------------ */

#[derive(Debug, Default, Deserialize)]
pub struct TestDeviceSpec {
    #[serde(default)]
    pub profiles: Vec<TestProfileSpec>,
}

#[derive(Debug, Deserialize)]
pub struct TestProfileSpec {
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_disabled: bool,
    #[serde(default = "default_rate")]
    pub rate: u32,
    #[serde(default = "default_report_rates")]
    pub report_rates: Vec<u32>,
    #[serde(default = "default_resolutions")]
    pub resolutions: Vec<TestResolutionSpec>,
    #[serde(default = "default_buttons")]
    pub buttons: Vec<TestButtonSpec>,
    #[serde(default)]
    pub leds: Vec<TestLedSpec>,
}

impl Default for TestProfileSpec {
    fn default() -> Self {
        Self {
            is_active: true,
            is_disabled: false,
            rate: default_rate(),
            report_rates: default_report_rates(),
            resolutions: default_resolutions(),
            buttons: default_buttons(),
            leds: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TestResolutionSpec {
    #[serde(default = "default_dpi")]
    pub xres: u32,
    #[serde(default = "default_dpi")]
    pub yres: u32,
    pub dpi_min: Option<u32>,
    pub dpi_max: Option<u32>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_disabled: bool,
    #[serde(default)]
    pub separate_xy: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct TestButtonSpec {
    #[serde(default = "default_action_type")]
    pub action_type: String,
    #[serde(default)]
    pub button: u32,
    #[serde(default)]
    pub key: u32,
}

#[derive(Debug, Default, Deserialize)]
pub struct TestLedSpec {
    #[serde(default)]
    pub mode: u32,
    #[serde(default)]
    pub duration: u32,
    #[serde(default = "default_brightness")]
    pub brightness: u8,
    /// `[r, g, b]` array.
    pub color: Option<Vec<u8>>,
}

fn default_rate() -> u32 {
    1000
}
fn default_report_rates() -> Vec<u32> {
    vec![125, 250, 500, 1000]
}
fn default_dpi() -> u32 {
    1000
}
fn default_action_type() -> String {
    "button".to_string()
}
fn default_brightness() -> u8 {
    100
}
fn default_resolutions() -> Vec<TestResolutionSpec> {
    vec![TestResolutionSpec {
        xres: 1000,
        yres: 1000,
        dpi_min: Some(100),
        dpi_max: Some(4000),
        is_active: true,
        is_disabled: false,
        separate_xy: false,
    }]
}
fn default_buttons() -> Vec<TestButtonSpec> {
    vec![TestButtonSpec {
        action_type: "button".to_string(),
        button: 0,
        key: 0,
    }]
}

/// Parse a JSON string into a [`TestDeviceSpec`]. An empty string or
/// `"{}"` yields one minimal default profile.
pub fn parse_json(json: &str) -> Result<TestDeviceSpec, serde_json::Error> {
    if json.trim().is_empty() || json.trim() == "{}" {
        return Ok(TestDeviceSpec {
            profiles: vec![TestProfileSpec::default()],
        });
    }
    serde_json::from_str(json)
}

/// Build a [`DeviceState`] from a parsed spec, pre-validated against
/// `check_invariants` before being handed to the registry.
pub fn build_device_state(sysname: &str, mut spec: TestDeviceSpec) -> Result<DeviceState> {
    if spec.profiles.is_empty() {
        spec.profiles.push(TestProfileSpec::default());
    }
    let num_profiles = spec.profiles.len();
    let num_resolutions = spec.profiles[0].resolutions.len().max(1);
    let num_buttons = spec.profiles[0].buttons.len().max(1);
    let num_leds = spec.profiles[0].leds.len();

    let mut state = DeviceState::init_profiles(
        sysname,
        0,
        0,
        0,
        BusId(0),
        format!("Test Device ({sysname})"),
        DeviceType::Mouse,
        num_profiles,
        num_resolutions,
        num_buttons,
        num_leds,
        &[],
    );

    for (pi, p) in spec.profiles.into_iter().enumerate() {
        let profile = &mut state.profiles[pi];
        profile.is_active = p.is_active;
        profile.is_enabled = !p.is_disabled;
        profile.report_rate = p.rate;
        profile.allowed_rates = p.report_rates;
        profile.caps = ProfileCaps::SUPPORTS_DEFAULT | ProfileCaps::CAN_DISABLE;

        for (ri, r) in p.resolutions.into_iter().enumerate() {
            if ri >= profile.resolutions.len() {
                break;
            }
            let res = &mut profile.resolutions[ri];
            res.is_active = r.is_active;
            res.is_disabled = r.is_disabled;
            if r.separate_xy {
                res.caps.insert(ResolutionCaps::SEPARATE_XY);
            }
            res.caps.insert(ResolutionCaps::CAN_DISABLE);
            res.dpi = if r.xres == r.yres {
                Dpi::Unified(r.xres)
            } else {
                Dpi::Separate { x: r.xres, y: r.yres }
            };
            res.allowed_dpi = match (r.dpi_min, r.dpi_max) {
                (Some(lo), Some(hi)) if hi >= lo => {
                    let step = ((hi - lo) / 20).max(1);
                    (lo..=hi).step_by(step as usize).collect()
                }
                _ => vec![r.xres],
            };
        }

        for (bi, b) in p.buttons.into_iter().enumerate() {
            if bi >= profile.buttons.len() {
                break;
            }
            let button = &mut profile.buttons[bi];
            button.action = match b.action_type.as_str() {
                "none" => ButtonAction::None,
                "button" => ButtonAction::Button(b.button),
                "special" => ButtonAction::Special(b.button),
                "key" => ButtonAction::Key(b.key),
                "macro" => ButtonAction::Macro(Vec::new()),
                _ => {
                    tracing::warn!("unknown test button action type: {}", b.action_type);
                    ButtonAction::None
                }
            };
        }

        for (li, l) in p.leds.into_iter().enumerate() {
            if li >= profile.leds.len() {
                break;
            }
            let led = &mut profile.leds[li];
            led.mode = LedMode::from_u32(l.mode).unwrap_or(LedMode::Off);
            led.effect_duration = l.duration;
            led.brightness = l.brightness;
            led.color = l
                .color
                .as_deref()
                .filter(|c| c.len() >= 3)
                .map(|c| Color {
                    red: c[0] as u32,
                    green: c[1] as u32,
                    blue: c[2] as u32,
                })
                .unwrap_or_default();
        }
    }

    if !state.profiles.iter().any(|p| p.is_active) {
        state.profiles[0].is_active = true;
    }
    let active_count = state.profiles.iter().filter(|p| p.is_active).count();
    if active_count > 1 {
        let mut seen_active = false;
        for profile in &mut state.profiles {
            if profile.is_active {
                if seen_active {
                    profile.is_active = false;
                } else {
                    seen_active = true;
                }
            }
        }
    }
    for profile in &mut state.profiles {
        if profile.is_active && !profile.resolutions.iter().any(|r| r.is_active) {
            if let Some(first) = profile.resolutions.first_mut() {
                first.is_active = true;
            }
        }
    }

    state.check_invariants()?;
    Ok(state)
}

/// No-op hardware driver backing `dev-hooks` synthetic devices: there is
/// no real wire protocol, so `commit`/refresh just succeed immediately.
pub struct TestDriver;

impl Default for TestDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl TestDriver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Driver for TestDriver {
    fn name(&self) -> &str {
        "test"
    }

    async fn probe(&mut self, _io: &mut DeviceIo) -> Result<DeviceState> {
        build_device_state("test0", TestDeviceSpec::default())
    }

    async fn commit(&mut self, _io: &mut DeviceIo, _state: &DeviceState) -> Result<()> {
        Ok(())
    }

    async fn set_active_profile(&mut self, _io: &mut DeviceIo, _profile_index: u32) -> Result<()> {
        Ok(())
    }

    async fn refresh_active_resolution(&mut self, _io: &mut DeviceIo, _profile_index: u32) -> Result<u32> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_yields_one_profile() {
        let spec = parse_json("").unwrap();
        let state = build_device_state("test0", spec).unwrap();
        assert_eq!(state.profiles.len(), 1);
        state.check_invariants().unwrap();
    }

    #[test]
    fn explicit_spec_round_trips_fields() {
        let json = r#"{
            "profiles": [
                {
                    "is_active": true,
                    "rate": 500,
                    "resolutions": [{"xres": 800, "yres": 800, "is_active": true}],
                    "buttons": [{"action_type": "key", "key": 30}],
                    "leds": [{"mode": 1, "color": [255, 0, 0]}]
                }
            ]
        }"#;
        let spec = parse_json(json).unwrap();
        let state = build_device_state("test0", spec).unwrap();
        let profile = &state.profiles[0];
        assert_eq!(profile.report_rate, 500);
        assert_eq!(profile.resolutions[0].dpi, Dpi::Unified(800));
        assert_eq!(profile.buttons[0].action, ButtonAction::Key(30));
        assert_eq!(profile.leds[0].mode, LedMode::On);
        assert_eq!(profile.leds[0].color.red, 255);
    }

    #[test]
    fn multiple_active_profiles_collapse_to_one() {
        let json = r#"{
            "profiles": [
                {"is_active": true},
                {"is_active": true}
            ]
        }"#;
        let spec = parse_json(json).unwrap();
        let state = build_device_state("test0", spec).unwrap();
        assert_eq!(state.profiles.iter().filter(|p| p.is_active).count(), 1);
    }
}
