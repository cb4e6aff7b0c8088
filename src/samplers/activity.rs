use async_trait::async_trait;

use crate::error::Result;
use crate::models::{NewCapture, Source};

use super::{PollOutcome, Sampler, SamplerContext};

#[cfg(target_os = "macos")]
fn idle_seconds() -> f64 {
    use core_graphics::event::{CGEventType, CGEventSource, CGEventSourceStateID};

    CGEventSource::seconds_since_last_event_type(
        CGEventSourceStateID::CombinedSessionState,
        CGEventType::Null,
    )
}

#[cfg(target_os = "windows")]
fn idle_seconds() -> f64 {
    use windows::Win32::System::SystemInformation::GetTickCount;
    use windows::Win32::UI::Input::KeyboardAndMouse::{GetLastInputInfo, LASTINPUTINFO};

    unsafe {
        let mut info = LASTINPUTINFO {
            cbSize: std::mem::size_of::<LASTINPUTINFO>() as u32,
            dwTime: 0,
        };
        if GetLastInputInfo(&mut info).as_bool() {
            let now = GetTickCount();
            (now.saturating_sub(info.dwTime)) as f64 / 1000.0
        } else {
            0.0
        }
    }
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn idle_seconds() -> f64 {
    0.0
}

const IDLE_THRESHOLD_SECS: f64 = 120.0;

/// Tracks transitions between active and idle, per `spec.md` §4.3/§4.7 (the
/// context-switch insight rule keys off exactly this signal). Emits a
/// capture only on a state transition, never on every tick.
pub struct ActivitySampler {
    was_idle: bool,
}

impl ActivitySampler {
    pub fn new() -> Self {
        Self { was_idle: false }
    }
}

impl Default for ActivitySampler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sampler for ActivitySampler {
    fn source(&self) -> Source {
        Source::Activity
    }

    async fn poll(&mut self, _ctx: &SamplerContext<'_>) -> Result<PollOutcome> {
        let idle_for = idle_seconds();
        let is_idle = idle_for >= IDLE_THRESHOLD_SECS;
        if is_idle == self.was_idle {
            return Ok(PollOutcome::Skipped);
        }
        self.was_idle = is_idle;

        let capture = NewCapture::new(Source::Activity)
            .with_meta("state", if is_idle { "idle" } else { "active" })
            .with_meta("idle_seconds", format!("{:.0}", idle_for));
        Ok(PollOutcome::Captured(capture))
    }
}
