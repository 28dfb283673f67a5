/* The org.freedesktop.ratbag1.Button interface: one physical button on a
 * profile. */
use zbus::interface;
use zbus::object_server::SignalEmitter;
use zbus::zvariant::{OwnedValue, Value};

use crate::bus::to_fdo_error;
use crate::device::{cap, clamp_macro, ActionCaps, ButtonAction, DeviceHandle, MacroEvent};
use crate::error::RatbagError;

pub struct RatbagButton {
    handle: DeviceHandle,
    profile_index: u32,
    button_index: u32,
}

impl RatbagButton {
    pub fn new(handle: DeviceHandle, profile_index: u32, button_index: u32) -> Self {
        Self { handle, profile_index, button_index }
    }
}

fn caps_to_codes(caps: ActionCaps) -> Vec<u32> {
    let table = [
        (ActionCaps::NONE, cap::ACTION_TYPE_NONE),
        (ActionCaps::BUTTON, cap::ACTION_TYPE_BUTTON),
        (ActionCaps::SPECIAL, cap::ACTION_TYPE_SPECIAL),
        (ActionCaps::KEY, cap::ACTION_TYPE_KEY),
        (ActionCaps::MACRO, cap::ACTION_TYPE_MACRO),
    ];
    table
        .into_iter()
        .filter(|(flag, _)| caps.contains(*flag))
        .map(|(_, code)| code)
        .collect()
}

/// Macro events cross the bus as `(keycode, direction)` pairs: 1 = press,
/// 0 = release, 2 = wait (keycode slot repurposed as a millisecond count).
const MACRO_DIR_RELEASE: u32 = 0;
const MACRO_DIR_PRESS: u32 = 1;
const MACRO_DIR_WAIT: u32 = 2;

fn macro_to_wire(events: &[MacroEvent]) -> Vec<(u32, u32)> {
    events
        .iter()
        .filter_map(|e| match e {
            MacroEvent::None => None,
            MacroEvent::KeyPressed(kc) => Some((*kc as u32, MACRO_DIR_PRESS)),
            MacroEvent::KeyReleased(kc) => Some((*kc as u32, MACRO_DIR_RELEASE)),
            MacroEvent::Wait(ms) => Some((*ms, MACRO_DIR_WAIT)),
        })
        .collect()
}

fn wire_to_macro(entries: &[(u32, u32)]) -> crate::error::Result<Vec<MacroEvent>> {
    entries
        .iter()
        .map(|(keycode, direction)| match *direction {
            MACRO_DIR_PRESS => Ok(MacroEvent::KeyPressed(*keycode as u16)),
            MACRO_DIR_RELEASE => Ok(MacroEvent::KeyReleased(*keycode as u16)),
            MACRO_DIR_WAIT => Ok(MacroEvent::Wait(*keycode)),
            _ => Err(RatbagError::InvalidValue),
        })
        .collect()
}

fn fallback_owned_value() -> OwnedValue {
    OwnedValue::from(0u32)
}

#[interface(name = "org.freedesktop.ratbag1.Button")]
impl RatbagButton {
    /// Zero-based button index (constant).
    #[zbus(property)]
    async fn index(&self) -> u32 {
        self.button_index
    }

    /// Current mapping as `(ActionType, Variant)`. The variant's shape
    /// depends on the action type: `u32` for Button/Special/Key, an
    /// array of `(u32, u32)` event pairs for Macro, `u32(0)` for None.
    #[zbus(property)]
    async fn mapping(&self) -> (u32, OwnedValue) {
        let state = self.handle.read().await;
        let Ok(button) = state.button(self.profile_index, self.button_index) else {
            return (cap::ACTION_TYPE_NONE, fallback_owned_value());
        };
        let action_type = button.action.action_type() as u32;
        let value = match &button.action {
            ButtonAction::None => fallback_owned_value(),
            ButtonAction::Button(v) | ButtonAction::Special(v) | ButtonAction::Key(v) => {
                OwnedValue::try_from(Value::from(*v)).unwrap_or_else(|_| fallback_owned_value())
            }
            ButtonAction::Macro(events) => {
                OwnedValue::try_from(Value::from(macro_to_wire(events))).unwrap_or_else(|_| fallback_owned_value())
            }
        };
        (action_type, value)
    }

    #[zbus(property)]
    async fn set_mapping(
        &self,
        mapping: (u32, OwnedValue),
        emitter: &SignalEmitter<'_>,
    ) -> zbus::fdo::Result<()> {
        let (action_type_raw, value) = mapping;
        let inner: Value<'_> = value.into();

        let action = match action_type_raw {
            v if v == cap::ACTION_TYPE_NONE => ButtonAction::None,
            v if v == cap::ACTION_TYPE_BUTTON => {
                ButtonAction::Button(u32_from_value(&inner).ok_or(RatbagError::InvalidValue).map_err(to_fdo_error)?)
            }
            v if v == cap::ACTION_TYPE_SPECIAL => {
                ButtonAction::Special(u32_from_value(&inner).ok_or(RatbagError::InvalidValue).map_err(to_fdo_error)?)
            }
            v if v == cap::ACTION_TYPE_KEY => {
                ButtonAction::Key(u32_from_value(&inner).ok_or(RatbagError::InvalidValue).map_err(to_fdo_error)?)
            }
            v if v == cap::ACTION_TYPE_MACRO => {
                let entries: Vec<(u32, u32)> = match &inner {
                    Value::Array(arr) => arr
                        .iter()
                        .filter_map(|v| match v {
                            Value::Structure(s) => match s.fields() {
                                [Value::U32(a), Value::U32(b)] => Some((*a, *b)),
                                _ => None,
                            },
                            _ => None,
                        })
                        .collect(),
                    _ => return Err(to_fdo_error(RatbagError::InvalidValue)),
                };
                let events = wire_to_macro(&entries).map_err(to_fdo_error)?;
                ButtonAction::Macro(clamp_macro(events))
            }
            _ => return Err(to_fdo_error(RatbagError::InvalidValue)),
        };

        {
            let mut state = self.handle.write().await;
            state
                .set_button_action(self.profile_index, self.button_index, action)
                .map_err(to_fdo_error)?;
        }
        let _ = self.mapping_changed(emitter).await;
        Ok(())
    }

    /// Action types this button slot can hold (constant).
    #[zbus(property)]
    async fn action_types(&self) -> Vec<u32> {
        let state = self.handle.read().await;
        state
            .button(self.profile_index, self.button_index)
            .map(|b| caps_to_codes(b.caps))
            .unwrap_or_default()
    }
}

fn u32_from_value(value: &Value<'_>) -> Option<u32> {
    match value {
        Value::U32(v) => Some(*v),
        _ => None,
    }
}
