//! Sony IMX224 image sensor driver.
//!
//! Unlike the polled light sensors, the camera's control plane is
//! mode-centric: a resolution request is negotiated against a static
//! mode table, the selected mode's register sequences are uploaded,
//! and the mode's vertical total becomes the denominator for all
//! subsequent exposure writes. Re-negotiating the same mode re-uploads
//! the sequences unconditionally; skipping the upload could mask a
//! desynced chip.
//!
//! Frame-length writes are committed before shutter writes so the
//! shutter is always evaluated against the window it was computed for.

pub mod cci;
pub mod exposure;
pub mod gain;
pub mod registers;

use crate::cci::CciClient;
use crate::exposure::{frame_length, shutter_from_exposure, timing_bytes};
use crate::gain::gain_to_register;
use crate::registers::{
    select_mode, ModeDescriptor, CHIP_ID, INIT_SEQUENCE, PIXEL_FORMAT_SEQUENCE, REG_GAIN_LO,
    REG_ID, REG_REGHOLD, REG_SHS1_LO, REG_STANDBY, REG_VMAX_LO, REG_XMSTA, STANDBY_OFF,
    STANDBY_ON, XMSTA_START, XMSTA_STOP,
};
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use sense_core::board::BoardSupport;
use sense_core::bus::{BusAddress, SharedBus};
use sense_core::config::ConfigError;
use sense_core::error::{DriverError, InitError, SenseResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Environment variable prefix recognized by [`CameraConfig::load`].
pub const ENV_PREFIX: &str = "SUNXI_SENSE_IMX224_";

/// Board-description input for the camera.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// 7-bit device address on the control bus.
    #[serde(default = "default_camera_address")]
    pub bus_address: u16,

    /// Mode negotiated immediately after probe, as `[width, height]`.
    #[serde(default)]
    pub initial_mode: Option<[u32; 2]>,
}

fn default_camera_address() -> u16 {
    0x1A
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            bus_address: default_camera_address(),
            initial_mode: None,
        }
    }
}

impl CameraConfig {
    /// Load from a TOML file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: CameraConfig = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()?;
        if config.bus_address > 0x7F {
            return Err(ConfigError::Validation(format!(
                "bus_address 0x{:x} does not fit a 7-bit address",
                config.bus_address
            )));
        }
        Ok(config)
    }
}

struct CameraState {
    current_mode: Option<&'static ModeDescriptor>,
    streaming: bool,
    suspended: bool,
}

/// A probed IMX224 instance.
pub struct Imx224 {
    client: CciClient,
    board: Arc<dyn BoardSupport>,
    control: tokio::sync::Mutex<()>,
    state: parking_lot::Mutex<CameraState>,
}

impl std::fmt::Debug for Imx224 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Imx224").finish_non_exhaustive()
    }
}

impl Imx224 {
    /// Attach to the camera described by `config`.
    ///
    /// Powers the board slot on, pulses reset, matches the chip
    /// identity register and uploads the chip-global defaults. When
    /// `initial_mode` is configured the mode is negotiated before
    /// returning.
    pub async fn probe(
        bus: SharedBus,
        config: &CameraConfig,
        board: Arc<dyn BoardSupport>,
    ) -> Result<Self, InitError> {
        board.power_on().await?;
        board.reset().await?;
        let client = CciClient::new(bus, BusAddress::new(config.bus_address));
        let address = client.address();

        let id = client.read(REG_ID).await.map_err(|err| {
            InitError::ChipNotDetected(format!("no response from {address}: {err}"))
        })?;
        if id != CHIP_ID {
            return Err(InitError::ChipNotDetected(format!(
                "identity register read 0x{id:02x}, expected 0x{CHIP_ID:02x}"
            )));
        }

        client.upload(INIT_SEQUENCE).await?;
        let camera = Self {
            client,
            board,
            control: tokio::sync::Mutex::new(()),
            state: parking_lot::Mutex::new(CameraState {
                current_mode: None,
                streaming: false,
                suspended: false,
            }),
        };
        if let Some([width, height]) = config.initial_mode {
            camera
                .negotiate_mode(width, height)
                .await
                .map_err(|err| match err {
                    DriverError::Bus(bus_err) => InitError::Bus(bus_err),
                    other => InitError::ChipNotDetected(other.to_string()),
                })?;
        }
        info!(%address, "imx224 attached");
        Ok(camera)
    }

    /// Select and apply the nearest supported mode for the requested
    /// output size. Never fails to find a mode; re-applying the
    /// current mode re-uploads its sequences.
    pub async fn negotiate_mode(&self, width: u32, height: u32) -> SenseResult<ModeDescriptor> {
        let _guard = self.control.lock().await;
        if self.state.lock().suspended {
            return Err(DriverError::InvalidParameter("device is suspended".into()));
        }
        let mode = select_mode(width, height);
        self.apply_mode(mode).await?;
        self.state.lock().current_mode = Some(mode);
        info!(
            requested_width = width,
            requested_height = height,
            width = mode.width,
            height = mode.height,
            "sensor mode applied"
        );
        Ok(*mode)
    }

    async fn apply_mode(&self, mode: &'static ModeDescriptor) -> SenseResult<()> {
        self.client.upload(PIXEL_FORMAT_SEQUENCE).await?;
        self.client.upload(mode.register_sequence).await?;
        if let Some(finalize) = mode.finalize {
            self.client.upload(finalize).await?;
        }
        Ok(())
    }

    /// The mode most recently applied, if any.
    pub fn current_mode(&self) -> Option<ModeDescriptor> {
        self.state.lock().current_mode.copied()
    }

    /// Program exposure (1/16-line units) and linear gain against the
    /// current mode's frame timing. Rejected until a mode has been
    /// negotiated, so the conversion can never use a stale or absent
    /// vertical total.
    pub async fn set_exposure_gain(&self, exposure: u32, gain: u16) -> SenseResult<()> {
        let _guard = self.control.lock().await;
        let mode = {
            let state = self.state.lock();
            if state.suspended {
                return Err(DriverError::InvalidParameter("device is suspended".into()));
            }
            state
                .current_mode
                .ok_or_else(|| DriverError::InvalidParameter("no mode negotiated".into()))?
        };

        let exposure = exposure.clamp(mode.exposure_bounds.0, mode.exposure_bounds.1);
        let gain = gain.clamp(mode.gain_bounds.0, mode.gain_bounds.1);
        let shutter = shutter_from_exposure(exposure, mode.frame_lines);
        let stretched = frame_length(shutter, mode.frame_lines);
        let code = gain_to_register(gain);

        // Frame length first: the shutter must land in the window it
        // was computed against.
        self.client.write(REG_REGHOLD, 0x01).await?;
        self.client
            .write_seq(REG_VMAX_LO, &timing_bytes(stretched))
            .await?;
        self.client
            .write_seq(REG_SHS1_LO, &timing_bytes(shutter))
            .await?;
        self.client
            .write_seq(REG_GAIN_LO, &[(code & 0xFF) as u8, (code >> 8) as u8])
            .await?;
        self.client.write(REG_REGHOLD, 0x00).await?;
        debug!(exposure, gain, shutter, frame_length = stretched, "exposure programmed");
        Ok(())
    }

    /// Whether the sensor is streaming frames.
    pub fn is_streaming(&self) -> bool {
        self.state.lock().streaming
    }

    /// Start or stop streaming. Starting requires a negotiated mode
    /// and succeeds only if both control writes land; stopping is
    /// best-effort and always leaves the logical state off.
    pub async fn set_streaming(&self, streaming: bool) -> SenseResult<()> {
        let _guard = self.control.lock().await;
        if streaming {
            {
                let state = self.state.lock();
                if state.suspended {
                    return Err(DriverError::InvalidParameter("device is suspended".into()));
                }
                if state.streaming {
                    return Ok(());
                }
                if state.current_mode.is_none() {
                    return Err(DriverError::InvalidParameter("no mode negotiated".into()));
                }
            }
            self.client.write(REG_STANDBY, STANDBY_OFF).await?;
            self.client.write(REG_XMSTA, XMSTA_START).await?;
            self.state.lock().streaming = true;
            info!("streaming started");
        } else {
            {
                let state = self.state.lock();
                if !state.streaming {
                    return Ok(());
                }
            }
            if let Err(err) = self.stop_streaming_writes().await {
                warn!(error = %err, "stream-stop writes failed; streaming marked off anyway");
            }
            self.state.lock().streaming = false;
            info!("streaming stopped");
        }
        Ok(())
    }

    async fn stop_streaming_writes(&self) -> Result<(), sense_core::error::BusError> {
        self.client.write(REG_XMSTA, XMSTA_STOP).await?;
        self.client.write(REG_STANDBY, STANDBY_ON).await
    }

    /// Whether the camera is between `suspend()` and `resume()`.
    pub fn is_suspended(&self) -> bool {
        self.state.lock().suspended
    }

    /// Enter standby without forgetting the streaming state.
    pub async fn suspend(&self) -> SenseResult<()> {
        let _guard = self.control.lock().await;
        let was_streaming = {
            let mut state = self.state.lock();
            if state.suspended {
                return Ok(());
            }
            state.suspended = true;
            state.streaming
        };
        if was_streaming {
            if let Err(err) = self.stop_streaming_writes().await {
                warn!(error = %err, "suspend standby writes failed");
            }
        }
        info!("camera suspended");
        Ok(())
    }

    /// Re-initialize the chip (registers may have reset across a deep
    /// sleep), re-upload the current mode and restore streaming.
    pub async fn resume(&self) -> SenseResult<()> {
        let _guard = self.control.lock().await;
        let (mode, was_streaming) = {
            let state = self.state.lock();
            if !state.suspended {
                return Ok(());
            }
            (state.current_mode, state.streaming)
        };
        self.client.upload(INIT_SEQUENCE).await?;
        if let Some(mode) = mode {
            self.apply_mode(mode).await?;
        }
        self.state.lock().suspended = false;
        if was_streaming {
            match async {
                self.client.write(REG_STANDBY, STANDBY_OFF).await?;
                self.client.write(REG_XMSTA, XMSTA_START).await
            }
            .await
            {
                Ok(()) => {}
                Err(err) => {
                    warn!(error = %err, "restart failed on resume; streaming left off");
                    self.state.lock().streaming = false;
                    return Err(err.into());
                }
            }
        }
        info!("camera resumed");
        Ok(())
    }

    /// Detach: stop streaming, enter standby, release the board slot.
    pub async fn shutdown(&self) -> SenseResult<()> {
        let _guard = self.control.lock().await;
        if let Err(err) = self.stop_streaming_writes().await {
            warn!(error = %err, "standby writes failed during shutdown");
        }
        self.state.lock().streaming = false;
        if let Err(err) = self.board.power_off().await {
            warn!(error = %err, "board power-off failed during shutdown");
        }
        Ok(())
    }
}
