/// OpenInput protocol driver.
///
/// Targets mice implementing the OpenInput HID protocol, an open-source
/// hardware configuration protocol for gaming peripherals. Reference
/// implementation: `src/driver-openinput.c`.
use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::device::{BusId, Color, DeviceState, DeviceType, Dpi, LedMode, ResolutionCaps};
use crate::driver::{DeviceIo, Driver};

/* ------------------------------------------------------------------ */
/* Report IDs and sizes                                                 */
/* ------------------------------------------------------------------ */

const OI_REPORT_SHORT: u8 = 0x20;
const OI_REPORT_LONG: u8 = 0x21;

const OI_REPORT_SHORT_SIZE: usize = 8;
const OI_REPORT_LONG_SIZE: usize = 32;
const OI_REPORT_DATA_INDEX: usize = 3;
const OI_REPORT_DATA_MAX_SIZE: usize = OI_REPORT_LONG_SIZE - OI_REPORT_DATA_INDEX;

/* ------------------------------------------------------------------ */
/* Protocol function pages                                              */
/* ------------------------------------------------------------------ */

const OI_PAGE_INFO: u8 = 0x00;
const OI_PAGE_DPI: u8 = 0x02;
const OI_PAGE_ERROR: u8 = 0xFF;

const OI_FUNCTION_VERSION: u8 = 0x00;
const OI_FUNCTION_DPI_GET: u8 = 0x00;
const OI_FUNCTION_DPI_SET: u8 = 0x01;

const MAX_ATTEMPTS: u8 = 3;

/// Valid polling rates (Hz).
const REPORT_RATES: &[u32] = &[125, 250, 500, 750, 1000];

/// Allowed DPI steps, matching the 50-step resolution the real hardware
/// exposes over this page.
const ALLOWED_DPI: &[u32] = &[400, 800, 1200, 1600, 2400, 3200, 6400];

/* ------------------------------------------------------------------ */
/* Report payload layout                                                */
/* ------------------------------------------------------------------ */

#[derive(Debug, Default, Clone)]
pub struct OiReport {
    pub id: u8,
    pub function_page: u8,
    pub function: u8,
    pub data: [u8; OI_REPORT_DATA_MAX_SIZE],
}

impl OiReport {
    pub fn to_short_buf(&self) -> [u8; OI_REPORT_SHORT_SIZE] {
        let mut buf = [0u8; OI_REPORT_SHORT_SIZE];
        buf[0] = self.id;
        buf[1] = self.function_page;
        buf[2] = self.function;
        let len = (OI_REPORT_SHORT_SIZE - OI_REPORT_DATA_INDEX).min(self.data.len());
        buf[OI_REPORT_DATA_INDEX..OI_REPORT_DATA_INDEX + len].copy_from_slice(&self.data[..len]);
        buf
    }
}

fn short_request(page: u8, function: u8, data: &[u8]) -> OiReport {
    let mut payload = [0u8; OI_REPORT_DATA_MAX_SIZE];
    let len = data.len().min(payload.len());
    payload[..len].copy_from_slice(&data[..len]);
    OiReport {
        id: OI_REPORT_SHORT,
        function_page: page,
        function,
        data: payload,
    }
}

/* ------------------------------------------------------------------ */
/* Cached state                                                         */
/* ------------------------------------------------------------------ */

#[derive(Debug, Default)]
struct OiData {
    fw_major: u8,
    fw_minor: u8,
    fw_patch: u8,
}

/* ------------------------------------------------------------------ */
/* Driver                                                               */
/* ------------------------------------------------------------------ */

pub struct OpenInputDriver {
    data: Option<OiData>,
}

impl Default for OpenInputDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenInputDriver {
    pub fn new() -> Self {
        Self { data: None }
    }

    async fn query_version(&self, io: &mut DeviceIo) -> Result<OiData> {
        let req = short_request(OI_PAGE_INFO, OI_FUNCTION_VERSION, &[]);
        let buf = req.to_short_buf();
        io.write_report(&buf).await?;

        let mut resp = [0u8; OI_REPORT_SHORT_SIZE];
        io.read_report(&mut resp).await?;

        if resp[1] == OI_PAGE_ERROR {
            bail!(
                "OpenInput device returned error on version query: code={:#04x}",
                resp[OI_REPORT_DATA_INDEX]
            );
        }

        Ok(OiData {
            fw_major: resp[OI_REPORT_DATA_INDEX],
            fw_minor: resp[OI_REPORT_DATA_INDEX + 1],
            fw_patch: resp[OI_REPORT_DATA_INDEX + 2],
        })
    }

    async fn query_dpi(&mut self, io: &mut DeviceIo) -> Result<u32> {
        let req = short_request(OI_PAGE_DPI, OI_FUNCTION_DPI_GET, &[]);
        let buf = req.to_short_buf();
        io.request(&buf, OI_REPORT_SHORT_SIZE, MAX_ATTEMPTS, |resp| {
            if resp.len() < OI_REPORT_DATA_INDEX + 2 || resp[1] == OI_PAGE_ERROR {
                return None;
            }
            let dpi = u16::from_le_bytes([resp[OI_REPORT_DATA_INDEX], resp[OI_REPORT_DATA_INDEX + 1]]);
            Some(dpi as u32)
        })
        .await
    }

    async fn write_dpi(&mut self, io: &mut DeviceIo, dpi: u32) -> Result<()> {
        let bytes = (dpi as u16).to_le_bytes();
        let req = short_request(OI_PAGE_DPI, OI_FUNCTION_DPI_SET, &bytes);
        io.write_report(&req.to_short_buf()).await
    }
}

#[async_trait]
impl Driver for OpenInputDriver {
    fn name(&self) -> &str {
        "openinput"
    }

    async fn probe(&mut self, io: &mut DeviceIo) -> Result<DeviceState> {
        let version = self.query_version(io).await?;
        let dpi = self.query_dpi(io).await.unwrap_or(ALLOWED_DPI[0]);

        tracing::info!(
            "OpenInput device firmware {}.{}.{}",
            version.fw_major,
            version.fw_minor,
            version.fw_patch
        );
        self.data = Some(version);

        let mut state = DeviceState::init_profiles(
            "",
            0,
            0,
            0,
            BusId(0x03),
            "OpenInput Mouse",
            DeviceType::Mouse,
            1,
            1,
            5,
            1,
            ALLOWED_DPI,
        );

        state.profiles[0].allowed_rates = REPORT_RATES.to_vec();
        state.profiles[0].resolutions[0].caps.insert(ResolutionCaps::CAN_DISABLE);
        state.profiles[0].resolutions[0].dpi = Dpi::Unified(dpi);
        state.profiles[0].leds[0].mode = LedMode::On;
        state.profiles[0].leds[0].color = Color::new(0, 128, 255)?;

        state.check_invariants().map_err(|e| anyhow::anyhow!("invariant violation after probe: {e}"))?;
        Ok(state)
    }

    async fn commit(&mut self, io: &mut DeviceIo, state: &DeviceState) -> Result<()> {
        let profile = state.profile(0).map_err(|e| anyhow::anyhow!("{e}"))?;
        let res = &profile.resolutions[0];
        if res.dirty {
            if let Dpi::Unified(dpi) = res.dpi {
                self.write_dpi(io, dpi).await?;
            }
        }
        Ok(())
    }

    async fn set_active_profile(&mut self, _io: &mut DeviceIo, _profile_index: u32) -> Result<()> {
        // Single-profile hardware: nothing to do on the wire.
        Ok(())
    }

    async fn refresh_active_resolution(&mut self, io: &mut DeviceIo, _profile_index: u32) -> Result<u32> {
        let _ = self.query_dpi(io).await?;
        Ok(0)
    }
}
