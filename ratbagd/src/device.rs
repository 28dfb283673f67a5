/* Object model (C1): the in-memory graph that mirrors hardware state —
 * Device -> Profile -> {Resolution, Button, LED} — plus the mutator
 * contract from spec §4.1 that every write path funnels through so the
 * eight invariants of §3 hold after any sequence of calls.
 *
 * Children are modelled as (device handle, index...) rather than raw
 * back-pointers: holding any handle clones the `Arc<RwLock<DeviceState>>`
 * and so pins the whole device alive, which gives the refcount behaviour
 * of §3's "Ownership" paragraph for free from `Arc`. */
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::{RatbagError, Result};

/* ------------------------------------------------------------------ */
/* Capability / enum codes — stable wire values                        */
/* ------------------------------------------------------------------ */

pub mod cap {
    /// Profile capability codes begin at 101 per spec §6.
    pub const PROFILE_SET_DEFAULT: u32 = 101;
    pub const PROFILE_DISABLE: u32 = 102;
    pub const PROFILE_WRITE_ONLY: u32 = 103;

    pub const RESOLUTION_SEPARATE_XY: u32 = 1;
    pub const RESOLUTION_CAN_DISABLE: u32 = 2;

    /// Action-type codes double as button capability codes: a button's
    /// `ActionTypes` property lists which of these it supports.
    pub const ACTION_TYPE_NONE: u32 = 0;
    pub const ACTION_TYPE_BUTTON: u32 = 1;
    pub const ACTION_TYPE_SPECIAL: u32 = 2;
    pub const ACTION_TYPE_KEY: u32 = 3;
    pub const ACTION_TYPE_MACRO: u32 = 4;
}

/// A tiny ad-hoc bitflags macro: the workspace doesn't carry the
/// `bitflags` crate (the teacher never needed it), and these sets are
/// small and internal, so a minimal hand-rolled version matching the
/// `bitflags!` shape keeps the call sites idiomatic without adding a
/// dependency the teacher's stack doesn't already have.
macro_rules! bitflags_u32 {
    (
        $(#[$meta:meta])*
        pub struct $name:ident: u32 {
            $(const $flag:ident = $value:expr;)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name(u32);

        impl $name {
            $(pub const $flag: Self = Self($value);)*

            pub const fn empty() -> Self {
                Self(0)
            }

            pub const fn contains(self, other: Self) -> bool {
                (self.0 & other.0) == other.0
            }

            pub fn insert(&mut self, other: Self) {
                self.0 |= other.0;
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }
    };
}

bitflags_u32! {
    /// Bitmask of which `ActionType`s a button slot supports. Internal
    /// representation only; exposed over the bus as `Vec<u32>` of
    /// `cap::ACTION_TYPE_*` codes.
    pub struct ActionCaps: u32 {
        const NONE   = 1 << 0;
        const BUTTON = 1 << 1;
        const SPECIAL = 1 << 2;
        const KEY    = 1 << 3;
        const MACRO  = 1 << 4;
    }
}

bitflags_u32! {
    pub struct ResolutionCaps: u32 {
        const SEPARATE_XY = 1 << 0;
        const CAN_DISABLE = 1 << 1;
    }
}

bitflags_u32! {
    pub struct ProfileCaps: u32 {
        const SUPPORTS_DEFAULT = 1 << 0;
        const CAN_DISABLE      = 1 << 1;
        const WRITE_ONLY       = 1 << 2;
    }
}

bitflags_u32! {
    pub struct LedModeCaps: u32 {
        const OFF       = 1 << 0;
        const ON        = 1 << 1;
        const CYCLE     = 1 << 2;
        const BREATHING = 1 << 3;
    }
}

/* ------------------------------------------------------------------ */
/* Leaf value types                                                     */
/* ------------------------------------------------------------------ */

/// Numeric bus type tag from `HID_ID` (see `device_database::BusType` for
/// the string form used to key the descriptor database).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusId(pub u16);

/// Device type, derived from the matched descriptor entry's declared
/// capabilities (spec §6: unspecified=0, other, mouse, keyboard).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DeviceType {
    Unspecified = 0,
    Other = 1,
    Mouse = 2,
    Keyboard = 3,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Color {
    pub red: u32,
    pub green: u32,
    pub blue: u32,
}

impl Color {
    pub fn new(red: u32, green: u32, blue: u32) -> Result<Self> {
        if red > 255 || green > 255 || blue > 255 {
            return Err(RatbagError::InvalidValue);
        }
        Ok(Self { red, green, blue })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorDepth {
    Mono,
    Rgb888,
    Rgb111,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum LedMode {
    Off = 0,
    On = 1,
    Cycle = 2,
    Breathing = 3,
}

impl LedMode {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(LedMode::Off),
            1 => Some(LedMode::On),
            2 => Some(LedMode::Cycle),
            3 => Some(LedMode::Breathing),
            _ => None,
        }
    }

    pub fn as_cap(self) -> LedModeCaps {
        match self {
            LedMode::Off => LedModeCaps::OFF,
            LedMode::On => LedModeCaps::ON,
            LedMode::Cycle => LedModeCaps::CYCLE,
            LedMode::Breathing => LedModeCaps::BREATHING,
        }
    }
}

/// DPI value, unified or per-axis. Separate x/y requires
/// `ResolutionCaps::SEPARATE_XY` (§3 invariant 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dpi {
    Unified(u32),
    Separate { x: u32, y: u32 },
}

impl Dpi {
    fn is_disable(&self) -> bool {
        matches!(
            self,
            Dpi::Unified(0) | Dpi::Separate { x: 0, y: 0 }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ActionType {
    None = 0,
    Button = 1,
    Special = 2,
    Key = 3,
    Macro = 4,
    Unknown = 1000,
}

/// A single event in a macro's fixed-capacity event sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacroEvent {
    None,
    KeyPressed(u16),
    KeyReleased(u16),
    Wait(u32),
}

/// Maximum number of events a macro may hold; longer specifications are
/// truncated (spec §6).
pub const MACRO_CAPACITY: usize = 256;

/// Truncate a macro event sequence to `MACRO_CAPACITY`.
pub fn clamp_macro(mut events: Vec<MacroEvent>) -> Vec<MacroEvent> {
    events.truncate(MACRO_CAPACITY);
    events
}

/// A button's mapping: a tagged union over the supported action kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonAction {
    None,
    Button(u32),
    Special(u32),
    Key(u32),
    Macro(Vec<MacroEvent>),
}

impl ButtonAction {
    pub fn action_type(&self) -> ActionType {
        match self {
            ButtonAction::None => ActionType::None,
            ButtonAction::Button(_) => ActionType::Button,
            ButtonAction::Special(_) => ActionType::Special,
            ButtonAction::Key(_) => ActionType::Key,
            ButtonAction::Macro(_) => ActionType::Macro,
        }
    }

    fn required_cap(&self) -> ActionCaps {
        match self {
            ButtonAction::None => ActionCaps::NONE,
            ButtonAction::Button(_) => ActionCaps::BUTTON,
            ButtonAction::Special(_) => ActionCaps::SPECIAL,
            ButtonAction::Key(_) => ActionCaps::KEY,
            ButtonAction::Macro(_) => ActionCaps::MACRO,
        }
    }
}

/* ------------------------------------------------------------------ */
/* Macro <-> (key, modifiers) round-tripping (spec §4.1)                */
/* ------------------------------------------------------------------ */

/// The eight canonical modifier keycodes, in encode/decode order:
/// left-ctrl, left-shift, left-alt, left-meta, right-ctrl, right-shift,
/// right-alt, right-meta. Values are the standard Linux
/// `input-event-codes.h` keycodes.
pub const MODIFIER_TABLE: [(u16, u8); 8] = [
    (29, 1 << 0),  // KEY_LEFTCTRL
    (42, 1 << 1),  // KEY_LEFTSHIFT
    (56, 1 << 2),  // KEY_LEFTALT
    (125, 1 << 3), // KEY_LEFTMETA
    (97, 1 << 4),  // KEY_RIGHTCTRL
    (54, 1 << 5),  // KEY_RIGHTSHIFT
    (100, 1 << 6), // KEY_RIGHTALT
    (126, 1 << 7), // KEY_RIGHTMETA
];

fn modifier_bit(keycode: u16) -> Option<u8> {
    MODIFIER_TABLE
        .iter()
        .find(|(kc, _)| *kc == keycode)
        .map(|(_, bit)| *bit)
}

/// Encode `(key, modifiers)` into the macro event sequence described in
/// spec §4.1: modifier presses in canonical order, the key press/release,
/// then modifier releases in the same canonical order.
pub fn encode_key_with_modifiers(key: u16, modifiers: u8) -> Vec<MacroEvent> {
    let mut events = Vec::new();
    for (keycode, bit) in MODIFIER_TABLE {
        if modifiers & bit != 0 {
            events.push(MacroEvent::KeyPressed(keycode));
        }
    }
    events.push(MacroEvent::KeyPressed(key));
    events.push(MacroEvent::KeyReleased(key));
    for (keycode, bit) in MODIFIER_TABLE {
        if modifiers & bit != 0 {
            events.push(MacroEvent::KeyReleased(keycode));
        }
    }
    events
}

/// Decode a macro event sequence back into `(key, modifiers)`.
///
/// Classifies each event as a modifier press/release (updating the
/// running modifier mask) or as the payload key. Wait events are
/// tolerated and ignored. Rejects with `InvalidValue` unless exactly one
/// non-modifier key appears, *or* the macro is exactly one modifier-press
/// event (the "lone modifier" case, corrected per spec §4.1: an earlier
/// implementation rejected this because it failed the "exactly one
/// non-modifier key" check).
pub fn decode_key_with_modifiers(events: &[MacroEvent]) -> Result<(u16, u8)> {
    /* Lone-modifier special case: a single modifier-press event with no
     * matching release and no payload key decodes to that modifier as
     * the key, with an empty modifier mask. */
    if events.len() == 1 {
        if let MacroEvent::KeyPressed(kc) = events[0] {
            if modifier_bit(kc).is_some() {
                return Ok((kc, 0));
            }
        }
    }

    let mut modifiers = 0u8;
    let mut payload_key: Option<u16> = None;

    for event in events {
        match event {
            MacroEvent::None | MacroEvent::Wait(_) => continue,
            MacroEvent::KeyPressed(kc) => {
                if let Some(bit) = modifier_bit(*kc) {
                    modifiers |= bit;
                } else if payload_key.is_none() {
                    payload_key = Some(*kc);
                } else if payload_key != Some(*kc) {
                    return Err(RatbagError::InvalidValue);
                }
            }
            MacroEvent::KeyReleased(kc) => {
                if modifier_bit(*kc).is_some() {
                    continue;
                } else if payload_key != Some(*kc) {
                    return Err(RatbagError::InvalidValue);
                }
            }
        }
    }

    match payload_key {
        Some(key) => Ok((key, modifiers)),
        None => Err(RatbagError::InvalidValue),
    }
}

/* ------------------------------------------------------------------ */
/* Dirty tracking                                                       */
/* ------------------------------------------------------------------ */

/// Profile-level dirty bits: the profile's own flag plus the sub-flags
/// spec §3 calls out explicitly (rate / angle-snap / debounce /
/// active-transition). A child entity going dirty always also sets the
/// plain `profile` bit (contract item 4).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProfileDirty {
    pub profile: bool,
    pub rate: bool,
    pub angle_snap: bool,
    pub debounce: bool,
    pub active_transition: bool,
}

impl ProfileDirty {
    pub fn any(self) -> bool {
        self.profile || self.rate || self.angle_snap || self.debounce || self.active_transition
    }

    fn clear(&mut self) {
        *self = ProfileDirty::default();
    }
}

/* ------------------------------------------------------------------ */
/* Resolution                                                           */
/* ------------------------------------------------------------------ */

#[derive(Debug, Clone)]
pub struct ResolutionState {
    pub index: u32,
    pub dpi: Dpi,
    pub allowed_dpi: Vec<u32>,
    pub caps: ResolutionCaps,
    pub is_active: bool,
    pub is_default: bool,
    pub is_disabled: bool,
    pub is_dpi_shift_target: bool,
    pub dirty: bool,
}

impl ResolutionState {
    fn new(index: u32, allowed_dpi: Vec<u32>) -> Self {
        let default_dpi = allowed_dpi.first().copied().unwrap_or(800);
        Self {
            index,
            dpi: Dpi::Unified(default_dpi),
            allowed_dpi,
            caps: ResolutionCaps::empty(),
            is_active: index == 0,
            is_default: index == 0,
            is_disabled: false,
            is_dpi_shift_target: false,
            dirty: false,
        }
    }
}

/* ------------------------------------------------------------------ */
/* Button                                                               */
/* ------------------------------------------------------------------ */

#[derive(Debug, Clone)]
pub struct ButtonState {
    pub index: u32,
    pub action: ButtonAction,
    pub caps: ActionCaps,
    pub dirty: bool,
}

impl ButtonState {
    fn new(index: u32) -> Self {
        Self {
            index,
            action: ButtonAction::Button(index),
            caps: ActionCaps::NONE | ActionCaps::BUTTON | ActionCaps::SPECIAL | ActionCaps::KEY | ActionCaps::MACRO,
            dirty: false,
        }
    }
}

/* ------------------------------------------------------------------ */
/* LED                                                                  */
/* ------------------------------------------------------------------ */

#[derive(Debug, Clone)]
pub struct LedState {
    pub index: u32,
    pub mode: LedMode,
    pub supported_modes: LedModeCaps,
    pub color: Color,
    pub color_depth: ColorDepth,
    pub effect_duration: u32,
    pub brightness: u8,
    pub dirty: bool,
}

impl LedState {
    fn new(index: u32) -> Self {
        Self {
            index,
            mode: LedMode::Off,
            supported_modes: LedModeCaps::OFF | LedModeCaps::ON | LedModeCaps::CYCLE | LedModeCaps::BREATHING,
            color: Color::default(),
            color_depth: ColorDepth::Rgb888,
            effect_duration: 0,
            brightness: 255,
            dirty: false,
        }
    }
}

/* ------------------------------------------------------------------ */
/* Profile                                                              */
/* ------------------------------------------------------------------ */

#[derive(Debug, Clone)]
pub struct ProfileState {
    pub index: u32,
    pub name: Option<String>,
    pub is_enabled: bool,
    pub is_active: bool,
    pub dirty: ProfileDirty,
    pub caps: ProfileCaps,
    pub report_rate: u32,
    pub allowed_rates: Vec<u32>,
    /// -1 = unsupported/unset.
    pub angle_snap: i32,
    pub supports_angle_snap: bool,
    /// -1 = unsupported/unset.
    pub debounce: i32,
    pub supports_debounce: bool,
    pub allowed_debounce: Vec<u32>,
    pub resolutions: Vec<ResolutionState>,
    pub buttons: Vec<ButtonState>,
    pub leds: Vec<LedState>,
}

/// Report rate is clamped into this closed interval on every write
/// (spec §3 invariant 6 / §6).
pub const REPORT_RATE_RANGE: std::ops::RangeInclusive<u32> = 125..=8000;

impl ProfileState {
    fn new(index: u32, num_res: usize, num_buttons: usize, num_leds: usize, dpi_list: &[u32]) -> Self {
        Self {
            index,
            name: None,
            is_enabled: true,
            is_active: index == 0,
            dirty: ProfileDirty::default(),
            caps: ProfileCaps::SUPPORTS_DEFAULT | ProfileCaps::CAN_DISABLE,
            report_rate: 1000,
            allowed_rates: vec![125, 250, 500, 1000],
            angle_snap: -1,
            supports_angle_snap: false,
            debounce: -1,
            supports_debounce: false,
            allowed_debounce: Vec::new(),
            resolutions: (0..num_res as u32)
                .map(|i| ResolutionState::new(i, dpi_list.to_vec()))
                .collect(),
            buttons: (0..num_buttons as u32).map(ButtonState::new).collect(),
            leds: (0..num_leds as u32).map(LedState::new).collect(),
        }
    }

    fn mark_dirty(&mut self) {
        self.dirty.profile = true;
    }
}

/* ------------------------------------------------------------------ */
/* Device                                                               */
/* ------------------------------------------------------------------ */

#[derive(Debug, Clone)]
pub struct DeviceState {
    pub sysname: String,
    pub vendor: u16,
    pub product: u16,
    pub version: u16,
    pub bustype: BusId,
    pub name: String,
    pub firmware_version: String,
    pub device_type: DeviceType,
    pub profiles: Vec<ProfileState>,
}

impl DeviceState {
    /// `device_init_profiles` from spec §4.1: pre-allocate the full
    /// lattice with default values and zero dirty flags. The driver's
    /// `probe` then populates each entity from the wire.
    pub fn init_profiles(
        sysname: impl Into<String>,
        vendor: u16,
        product: u16,
        version: u16,
        bustype: BusId,
        name: impl Into<String>,
        device_type: DeviceType,
        num_profiles: usize,
        num_resolutions: usize,
        num_buttons: usize,
        num_leds: usize,
        dpi_list: &[u32],
    ) -> Self {
        let num_profiles = num_profiles.max(1);
        Self {
            sysname: sysname.into(),
            vendor,
            product,
            version,
            bustype,
            name: name.into(),
            firmware_version: String::new(),
            device_type,
            profiles: (0..num_profiles as u32)
                .map(|i| ProfileState::new(i, num_resolutions, num_buttons, num_leds, dpi_list))
                .collect(),
        }
    }

    /// Validate every invariant in spec §3. Used as the post-probe sanity
    /// check (§4.2): a driver's `probe` must either leave the graph
    /// satisfying all of these, or the device is discarded.
    pub fn check_invariants(&self) -> Result<()> {
        if self.profiles.is_empty() {
            return Err(RatbagError::InvalidValue);
        }
        let active_profiles = self.profiles.iter().filter(|p| p.is_active).count();
        if active_profiles != 1 {
            return Err(RatbagError::InvalidValue);
        }
        for profile in &self.profiles {
            let active_res = profile.resolutions.iter().filter(|r| r.is_active).count();
            if profile.is_active && !profile.resolutions.is_empty() && active_res != 1 {
                return Err(RatbagError::InvalidValue);
            }
            let default_res = profile.resolutions.iter().filter(|r| r.is_default).count();
            if default_res > 1 {
                return Err(RatbagError::InvalidValue);
            }
            let shift_res = profile
                .resolutions
                .iter()
                .filter(|r| r.is_dpi_shift_target)
                .count();
            if shift_res > 1 {
                return Err(RatbagError::InvalidValue);
            }
            for res in &profile.resolutions {
                if res.is_disabled && (res.is_active || res.is_default || res.is_dpi_shift_target) {
                    return Err(RatbagError::InvalidValue);
                }
            }
        }
        Ok(())
    }

    fn profile_mut(&mut self, idx: u32) -> Result<&mut ProfileState> {
        self.profiles
            .get_mut(idx as usize)
            .ok_or(RatbagError::InvalidValue)
    }

    pub fn profile(&self, idx: u32) -> Result<&ProfileState> {
        self.profiles.get(idx as usize).ok_or(RatbagError::InvalidValue)
    }

    /* ---------------- Profile mutators ---------------- */

    pub fn set_profile_name(&mut self, idx: u32, name: String) -> Result<()> {
        let profile = self.profile_mut(idx)?;
        if profile.name.as_deref() == Some(name.as_str()) {
            return Ok(());
        }
        profile.name = Some(name);
        profile.mark_dirty();
        Ok(())
    }

    /// Invariant 4: disabling the last-enabled profile, or the active
    /// profile, fails with `InvalidValue`.
    pub fn set_profile_disabled(&mut self, idx: u32, disabled: bool) -> Result<()> {
        if !self.profile(idx)?.caps.contains(ProfileCaps::CAN_DISABLE) {
            return Err(RatbagError::Capability);
        }
        if disabled {
            let enabled_count = self.profiles.iter().filter(|p| p.is_enabled).count();
            let target = self.profile(idx)?;
            if target.is_active || (target.is_enabled && enabled_count <= 1) {
                return Err(RatbagError::InvalidValue);
            }
        }
        let profile = self.profile_mut(idx)?;
        if profile.is_enabled == !disabled {
            return Ok(());
        }
        profile.is_enabled = !disabled;
        profile.mark_dirty();
        Ok(())
    }

    /// Invariant 1: exactly one profile is active. Clears the bit on
    /// every sibling first (marking those dirty too), matching the
    /// mutual-exclusion contract of §4.1 item 5.
    pub fn set_profile_active(&mut self, idx: u32) -> Result<()> {
        if idx as usize >= self.profiles.len() {
            return Err(RatbagError::InvalidValue);
        }
        if self.profiles[idx as usize].is_active {
            return Ok(());
        }
        for profile in &mut self.profiles {
            if profile.is_active {
                profile.is_active = false;
                profile.dirty.active_transition = true;
                profile.mark_dirty();
            }
        }
        let target = &mut self.profiles[idx as usize];
        target.is_active = true;
        target.dirty.active_transition = true;
        target.mark_dirty();
        Ok(())
    }

    /// Clamps into `REPORT_RATE_RANGE` rather than rejecting
    /// out-of-range input (invariant 6 / testable property 5).
    pub fn set_profile_report_rate(&mut self, idx: u32, rate: u32) -> Result<()> {
        let clamped = rate.clamp(*REPORT_RATE_RANGE.start(), *REPORT_RATE_RANGE.end());
        let profile = self.profile_mut(idx)?;
        if profile.report_rate == clamped {
            return Ok(());
        }
        profile.report_rate = clamped;
        profile.dirty.rate = true;
        profile.mark_dirty();
        Ok(())
    }

    pub fn set_profile_angle_snapping(&mut self, idx: u32, value: i32) -> Result<()> {
        let profile = self.profile_mut(idx)?;
        if !profile.supports_angle_snap {
            return Err(RatbagError::Capability);
        }
        if profile.angle_snap == value {
            return Ok(());
        }
        profile.angle_snap = value;
        profile.dirty.angle_snap = true;
        profile.mark_dirty();
        Ok(())
    }

    pub fn set_profile_debounce(&mut self, idx: u32, value: i32) -> Result<()> {
        let profile = self.profile_mut(idx)?;
        if !profile.supports_debounce {
            return Err(RatbagError::Capability);
        }
        if value >= 0 && !profile.allowed_debounce.is_empty() {
            let value_u32 = value as u32;
            if !profile.allowed_debounce.contains(&value_u32) {
                return Err(RatbagError::InvalidValue);
            }
        }
        if profile.debounce == value {
            return Ok(());
        }
        profile.debounce = value;
        profile.dirty.debounce = true;
        profile.mark_dirty();
        Ok(())
    }

    /* ---------------- Resolution mutators ---------------- */

    fn resolution_mut(&mut self, p_idx: u32, r_idx: u32) -> Result<&mut ResolutionState> {
        self.profile_mut(p_idx)?
            .resolutions
            .get_mut(r_idx as usize)
            .ok_or(RatbagError::InvalidValue)
    }

    pub fn resolution(&self, p_idx: u32, r_idx: u32) -> Result<&ResolutionState> {
        self.profile(p_idx)?
            .resolutions
            .get(r_idx as usize)
            .ok_or(RatbagError::InvalidValue)
    }

    /// Invariant 3: a disabled resolution may not become active, default,
    /// or the shift target.
    fn reject_if_disabled(&self, p_idx: u32, r_idx: u32) -> Result<()> {
        if self.resolution(p_idx, r_idx)?.is_disabled {
            return Err(RatbagError::InvalidValue);
        }
        Ok(())
    }

    pub fn set_resolution_active(&mut self, p_idx: u32, r_idx: u32) -> Result<()> {
        self.reject_if_disabled(p_idx, r_idx)?;
        let profile = self.profile_mut(p_idx)?;
        if profile.resolutions[r_idx as usize].is_active {
            return Ok(());
        }
        for res in &mut profile.resolutions {
            if res.is_active {
                res.is_active = false;
                res.dirty = true;
            }
        }
        profile.resolutions[r_idx as usize].is_active = true;
        profile.resolutions[r_idx as usize].dirty = true;
        profile.mark_dirty();
        Ok(())
    }

    pub fn set_resolution_default(&mut self, p_idx: u32, r_idx: u32) -> Result<()> {
        self.reject_if_disabled(p_idx, r_idx)?;
        if !self.profile(p_idx)?.caps.contains(ProfileCaps::SUPPORTS_DEFAULT) {
            return Err(RatbagError::Capability);
        }
        let profile = self.profile_mut(p_idx)?;
        if profile.resolutions[r_idx as usize].is_default {
            return Ok(());
        }
        for res in &mut profile.resolutions {
            if res.is_default {
                res.is_default = false;
                res.dirty = true;
            }
        }
        profile.resolutions[r_idx as usize].is_default = true;
        profile.resolutions[r_idx as usize].dirty = true;
        profile.mark_dirty();
        Ok(())
    }

    pub fn set_resolution_dpi_shift_target(&mut self, p_idx: u32, r_idx: u32) -> Result<()> {
        self.reject_if_disabled(p_idx, r_idx)?;
        let profile = self.profile_mut(p_idx)?;
        if profile.resolutions[r_idx as usize].is_dpi_shift_target {
            return Ok(());
        }
        for res in &mut profile.resolutions {
            if res.is_dpi_shift_target {
                res.is_dpi_shift_target = false;
                res.dirty = true;
            }
        }
        profile.resolutions[r_idx as usize].is_dpi_shift_target = true;
        profile.resolutions[r_idx as usize].dirty = true;
        profile.mark_dirty();
        Ok(())
    }

    /// Disabling the active resolution of the active profile would strand
    /// invariant 2 ("exactly one Resolution has `is_active`"); this
    /// mirrors the profile-level "can't disable the active one" rule
    /// (open question resolved in DESIGN.md).
    pub fn set_resolution_disabled(&mut self, p_idx: u32, r_idx: u32, disabled: bool) -> Result<()> {
        if !self
            .resolution(p_idx, r_idx)?
            .caps
            .contains(ResolutionCaps::CAN_DISABLE)
        {
            return Err(RatbagError::Capability);
        }
        if disabled {
            let profile = self.profile(p_idx)?;
            let res = &profile.resolutions[r_idx as usize];
            if profile.is_active && res.is_active {
                return Err(RatbagError::InvalidValue);
            }
        }
        let profile = self.profile_mut(p_idx)?;
        let res = &mut profile.resolutions[r_idx as usize];
        if res.is_disabled == disabled {
            return Ok(());
        }
        res.is_disabled = disabled;
        res.dirty = true;
        profile.mark_dirty();
        Ok(())
    }

    /// Invariant 5: DPI values must lie in the allowed-DPI list. Separate
    /// x/y requires `ResolutionCaps::SEPARATE_XY`, and both components
    /// must be either zero (disable) or both non-zero.
    pub fn set_resolution_dpi(&mut self, p_idx: u32, r_idx: u32, dpi: Dpi) -> Result<()> {
        let res = self.resolution(p_idx, r_idx)?;
        if let Dpi::Separate { .. } = dpi {
            if !res.caps.contains(ResolutionCaps::SEPARATE_XY) {
                return Err(RatbagError::Capability);
            }
        }
        if !dpi.is_disable() {
            match dpi {
                Dpi::Unified(v) => {
                    if !res.allowed_dpi.is_empty() && !res.allowed_dpi.contains(&v) {
                        return Err(RatbagError::InvalidValue);
                    }
                }
                Dpi::Separate { x, y } => {
                    if x == 0 || y == 0 {
                        return Err(RatbagError::InvalidValue);
                    }
                    if !res.allowed_dpi.is_empty()
                        && (!res.allowed_dpi.contains(&x) || !res.allowed_dpi.contains(&y))
                    {
                        return Err(RatbagError::InvalidValue);
                    }
                }
            }
        }
        let profile = self.profile_mut(p_idx)?;
        let res = &mut profile.resolutions[r_idx as usize];
        if res.dpi == dpi {
            return Ok(());
        }
        res.dpi = dpi;
        res.dirty = true;
        profile.mark_dirty();
        Ok(())
    }

    /* ---------------- Button mutators ---------------- */

    fn button_mut(&mut self, p_idx: u32, b_idx: u32) -> Result<&mut ButtonState> {
        self.profile_mut(p_idx)?
            .buttons
            .get_mut(b_idx as usize)
            .ok_or(RatbagError::InvalidValue)
    }

    pub fn button(&self, p_idx: u32, b_idx: u32) -> Result<&ButtonState> {
        self.profile(p_idx)?
            .buttons
            .get(b_idx as usize)
            .ok_or(RatbagError::InvalidValue)
    }

    pub fn set_button_action(&mut self, p_idx: u32, b_idx: u32, action: ButtonAction) -> Result<()> {
        let required = action.required_cap();
        if !self.button(p_idx, b_idx)?.caps.contains(required) {
            return Err(RatbagError::Capability);
        }
        let action = match action {
            ButtonAction::Macro(events) => ButtonAction::Macro(clamp_macro(events)),
            other => other,
        };
        let profile = self.profile_mut(p_idx)?;
        let button = &mut profile.buttons[b_idx as usize];
        if button.action == action {
            return Ok(());
        }
        button.action = action;
        button.dirty = true;
        profile.mark_dirty();
        Ok(())
    }

    /* ---------------- LED mutators ---------------- */

    fn led_mut(&mut self, p_idx: u32, l_idx: u32) -> Result<&mut LedState> {
        self.profile_mut(p_idx)?
            .leds
            .get_mut(l_idx as usize)
            .ok_or(RatbagError::InvalidValue)
    }

    pub fn led(&self, p_idx: u32, l_idx: u32) -> Result<&LedState> {
        self.profile(p_idx)?
            .leds
            .get(l_idx as usize)
            .ok_or(RatbagError::InvalidValue)
    }

    pub fn set_led_mode(&mut self, p_idx: u32, l_idx: u32, mode: LedMode) -> Result<()> {
        if !self.led(p_idx, l_idx)?.supported_modes.contains(mode.as_cap()) {
            return Err(RatbagError::Capability);
        }
        let profile = self.profile_mut(p_idx)?;
        let led = &mut profile.leds[l_idx as usize];
        if led.mode == mode {
            return Ok(());
        }
        led.mode = mode;
        led.dirty = true;
        profile.mark_dirty();
        Ok(())
    }

    pub fn set_led_color(&mut self, p_idx: u32, l_idx: u32, color: Color) -> Result<()> {
        let profile = self.profile_mut(p_idx)?;
        let led = &mut profile.leds[l_idx as usize];
        if led.color == color {
            return Ok(());
        }
        led.color = color;
        led.dirty = true;
        profile.mark_dirty();
        Ok(())
    }

    pub fn set_led_effect_duration(&mut self, p_idx: u32, l_idx: u32, ms: u32) -> Result<()> {
        let profile = self.profile_mut(p_idx)?;
        let led = &mut profile.leds[l_idx as usize];
        if led.effect_duration == ms {
            return Ok(());
        }
        led.effect_duration = ms;
        led.dirty = true;
        profile.mark_dirty();
        Ok(())
    }

    pub fn set_led_brightness(&mut self, p_idx: u32, l_idx: u32, brightness: u8) -> Result<()> {
        let profile = self.profile_mut(p_idx)?;
        let led = &mut profile.leds[l_idx as usize];
        if led.brightness == brightness {
            return Ok(());
        }
        led.brightness = brightness;
        led.dirty = true;
        profile.mark_dirty();
        Ok(())
    }

    /* ---------------- Commit support ---------------- */

    /// True if any profile in the device has uncommitted changes.
    pub fn is_dirty(&self) -> bool {
        self.profiles.iter().any(|p| p.dirty.any())
    }

    /// Clear every dirty flag in the subtree. Called by the commit
    /// scheduler (C6) after a successful wire transaction, atomically
    /// with respect to that transaction (invariant 7).
    pub fn clear_all_dirty(&mut self) {
        for profile in &mut self.profiles {
            profile.dirty.clear();
            for res in &mut profile.resolutions {
                res.dirty = false;
            }
            for button in &mut profile.buttons {
                button.dirty = false;
            }
            for led in &mut profile.leds {
                led.dirty = false;
            }
        }
    }

    /// Re-read the active resolution index from the driver's refresh
    /// hook result and update `is_active` flags across that profile's
    /// resolutions (C7 poll loop). Returns true if anything changed.
    pub fn apply_active_resolution(&mut self, p_idx: u32, active_idx: u32) -> bool {
        let Ok(profile) = self.profile_mut(p_idx) else {
            return false;
        };
        let mut changed = false;
        for res in &mut profile.resolutions {
            let should_be_active = res.index == active_idx;
            if res.is_active != should_be_active {
                res.is_active = should_be_active;
                changed = true;
            }
        }
        changed
    }
}

/// Refcounted handle to a device's state. Cloning bumps the `Arc`
/// strong count, which *is* the reference count of §3 invariant 8 — no
/// separate bookkeeping is needed.
pub type DeviceHandle = Arc<RwLock<DeviceState>>;

pub fn new_device_handle(state: DeviceState) -> DeviceHandle {
    Arc::new(RwLock::new(state))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_device() -> DeviceState {
        let mut dev = DeviceState::init_profiles(
            "test0",
            0x046d,
            0xc52b,
            1,
            BusId(0x03),
            "Test Mouse",
            DeviceType::Mouse,
            2,
            5,
            3,
            1,
            &[400, 800, 1600, 3200, 6400],
        );
        for profile in &mut dev.profiles {
            for res in &mut profile.resolutions {
                res.caps.insert(ResolutionCaps::CAN_DISABLE);
            }
        }
        dev
    }

    #[test]
    fn device_has_one_profile_minimum() {
        let dev = DeviceState::init_profiles(
            "t", 0, 0, 0, BusId(3), "n", DeviceType::Mouse, 0, 1, 0, 0, &[800],
        );
        assert_eq!(dev.profiles.len(), 1);
    }

    #[test]
    fn shift_target_exclusion() {
        // S1 from spec §8.
        let mut dev = test_device();
        dev.set_resolution_dpi_shift_target(0, 2).unwrap();
        assert!(dev.resolution(0, 2).unwrap().is_dpi_shift_target);
        dev.set_resolution_dpi_shift_target(0, 4).unwrap();
        assert!(!dev.resolution(0, 2).unwrap().is_dpi_shift_target);
        assert!(dev.resolution(0, 4).unwrap().is_dpi_shift_target);
        assert!(dev.resolution(0, 2).unwrap().dirty);
        assert!(dev.resolution(0, 4).unwrap().dirty);
        assert!(dev.profile(0).unwrap().dirty.profile);
    }

    #[test]
    fn rate_is_clamped_not_rejected() {
        // S2 from spec §8.
        dev_rate_scenario(1000, 50, 125);
        dev_rate_scenario(1000, 50000, 8000);
    }

    fn dev_rate_scenario(initial: u32, write: u32, expect: u32) {
        let mut dev = test_device();
        dev.set_profile_report_rate(0, initial).unwrap();
        dev.clear_all_dirty();
        dev.set_profile_report_rate(0, write).unwrap();
        assert_eq!(dev.profile(0).unwrap().report_rate, expect);
        assert!(dev.profile(0).unwrap().dirty.rate);
    }

    #[test]
    fn disabled_resolution_rejects_status_bits() {
        let mut dev = test_device();
        dev.set_resolution_disabled(0, 1, true).unwrap();
        assert_eq!(
            dev.set_resolution_active(0, 1).unwrap_err(),
            RatbagError::InvalidValue
        );
        assert_eq!(
            dev.set_resolution_default(0, 1).unwrap_err(),
            RatbagError::InvalidValue
        );
        assert_eq!(
            dev.set_resolution_dpi_shift_target(0, 1).unwrap_err(),
            RatbagError::InvalidValue
        );
        assert!(!dev.resolution(0, 1).unwrap().is_active);
    }

    #[test]
    fn cannot_disable_active_profile() {
        let mut dev = test_device();
        assert_eq!(
            dev.set_profile_disabled(0, true).unwrap_err(),
            RatbagError::InvalidValue
        );
    }

    #[test]
    fn cannot_disable_last_enabled_profile() {
        let mut dev = test_device();
        dev.set_profile_active(1).unwrap();
        dev.set_profile_disabled(0, true).unwrap(); // fine, 1 remains enabled + active
        assert_eq!(
            dev.set_profile_disabled(1, true).unwrap_err(),
            RatbagError::InvalidValue
        );
    }

    #[test]
    fn commit_clears_all_dirty_bits() {
        // Testable property 1.
        let mut dev = test_device();
        dev.set_profile_report_rate(0, 2000).unwrap();
        dev.set_resolution_dpi(0, 0, Dpi::Unified(1600)).unwrap();
        dev.set_resolution_active(0, 3).unwrap();
        assert!(dev.is_dirty());
        dev.clear_all_dirty();
        assert!(!dev.is_dirty());
        for profile in &dev.profiles {
            assert!(!profile.dirty.any());
            for r in &profile.resolutions {
                assert!(!r.dirty);
            }
        }
    }

    #[test]
    fn macro_round_trips_for_non_modifier_keys() {
        // Testable property 6.
        for modifiers in 0u8..=255 {
            let key = 30u16; // KEY_A, not a modifier
            let encoded = encode_key_with_modifiers(key, modifiers);
            let (decoded_key, decoded_mods) = decode_key_with_modifiers(&encoded).unwrap();
            assert_eq!(decoded_key, key);
            assert_eq!(decoded_mods, modifiers);
        }
    }

    #[test]
    fn macro_decodes_lone_modifier() {
        // S3 / testable property 7.
        let events = vec![MacroEvent::KeyPressed(29)]; // left-ctrl alone
        let (key, modifiers) = decode_key_with_modifiers(&events).unwrap();
        assert_eq!(key, 29);
        assert_eq!(modifiers, 0);
    }

    #[test]
    fn macro_rejects_multiple_payload_keys() {
        let events = vec![
            MacroEvent::KeyPressed(30),
            MacroEvent::KeyReleased(30),
            MacroEvent::KeyPressed(31),
            MacroEvent::KeyReleased(31),
        ];
        assert_eq!(
            decode_key_with_modifiers(&events).unwrap_err(),
            RatbagError::InvalidValue
        );
    }

    #[test]
    fn button_action_overwrites_previous_macro() {
        let mut dev = test_device();
        let events = encode_key_with_modifiers(30, 1);
        dev.set_button_action(0, 0, ButtonAction::Macro(events)).unwrap();
        dev.set_button_action(0, 0, ButtonAction::Button(5)).unwrap();
        assert_eq!(dev.button(0, 0).unwrap().action, ButtonAction::Button(5));
    }

    #[test]
    fn separate_xy_requires_capability() {
        let mut dev = test_device();
        assert_eq!(
            dev.set_resolution_dpi(0, 0, Dpi::Separate { x: 800, y: 1600 })
                .unwrap_err(),
            RatbagError::Capability
        );
        dev.profiles[0].resolutions[0]
            .caps
            .insert(ResolutionCaps::SEPARATE_XY);
        // out-of-list DPI still rejected even with the capability.
        assert_eq!(
            dev.set_resolution_dpi(0, 0, Dpi::Separate { x: 1, y: 1600 })
                .unwrap_err(),
            RatbagError::InvalidValue
        );
    }

    #[test]
    fn invariants_hold_after_init() {
        let dev = test_device();
        dev.check_invariants().unwrap();
    }
}
