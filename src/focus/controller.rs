/// Platform action taken when a warn-then-act timer expires, per
/// `spec.md` §4.7: close the current tab for browsers, close the window
/// for everything else.
pub trait Controller: Send + Sync {
    fn close_tab(&self) -> anyhow::Result<()>;
    fn close_window(&self) -> anyhow::Result<()>;
}

#[cfg(target_os = "macos")]
pub struct PlatformController;

#[cfg(target_os = "macos")]
impl Controller for PlatformController {
    fn close_tab(&self) -> anyhow::Result<()> {
        send_cmd_key(core_graphics::event::CGKeyCode::from(13)) // 'w'
    }

    fn close_window(&self) -> anyhow::Result<()> {
        send_cmd_key(core_graphics::event::CGKeyCode::from(13))
    }
}

#[cfg(target_os = "macos")]
fn send_cmd_key(key_code: core_graphics::event::CGKeyCode) -> anyhow::Result<()> {
    use core_graphics::event::{CGEvent, CGEventFlags, CGEventTapLocation};
    use core_graphics::event_source::{CGEventSource, CGEventSourceStateID};

    let source = CGEventSource::new(CGEventSourceStateID::CombinedSessionState)
        .map_err(|_| anyhow::anyhow!("failed to create CGEventSource"))?;
    let down = CGEvent::new_keyboard_event(source.clone(), key_code, true)
        .map_err(|_| anyhow::anyhow!("failed to create key-down event"))?;
    down.set_flags(CGEventFlags::CGEventFlagCommand);
    down.post(CGEventTapLocation::HID);

    let up = CGEvent::new_keyboard_event(source, key_code, false)
        .map_err(|_| anyhow::anyhow!("failed to create key-up event"))?;
    up.set_flags(CGEventFlags::CGEventFlagCommand);
    up.post(CGEventTapLocation::HID);
    Ok(())
}

#[cfg(target_os = "windows")]
pub struct PlatformController;

#[cfg(target_os = "windows")]
impl Controller for PlatformController {
    fn close_tab(&self) -> anyhow::Result<()> {
        // Ctrl+W closes the current tab in every mainstream browser.
        send_ctrl_w()
    }

    fn close_window(&self) -> anyhow::Result<()> {
        post_close_to_foreground()
    }
}

#[cfg(target_os = "windows")]
fn send_ctrl_w() -> anyhow::Result<()> {
    use windows::Win32::UI::Input::KeyboardAndMouse::{
        SendInput, INPUT, INPUT_0, INPUT_KEYBOARD, KEYBDINPUT, KEYEVENTF_KEYUP, VIRTUAL_KEY,
        VK_CONTROL, VK_W,
    };

    unsafe fn key_input(vk: VIRTUAL_KEY, up: bool) -> INPUT {
        INPUT {
            r#type: INPUT_KEYBOARD,
            Anonymous: INPUT_0 {
                ki: KEYBDINPUT {
                    wVk: vk,
                    wScan: 0,
                    dwFlags: if up { KEYEVENTF_KEYUP } else { Default::default() },
                    time: 0,
                    dwExtraInfo: 0,
                },
            },
        }
    }

    unsafe {
        let inputs = [
            key_input(VK_CONTROL, false),
            key_input(VK_W, false),
            key_input(VK_W, true),
            key_input(VK_CONTROL, true),
        ];
        SendInput(&inputs, std::mem::size_of::<INPUT>() as i32);
    }
    Ok(())
}

#[cfg(target_os = "windows")]
fn post_close_to_foreground() -> anyhow::Result<()> {
    use windows::Win32::UI::WindowsAndMessaging::{GetForegroundWindow, PostMessageW, WM_CLOSE};

    unsafe {
        let hwnd = GetForegroundWindow();
        PostMessageW(hwnd, WM_CLOSE, windows::Win32::Foundation::WPARAM(0), windows::Win32::Foundation::LPARAM(0))?;
    }
    Ok(())
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub struct PlatformController;

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
impl Controller for PlatformController {
    fn close_tab(&self) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("focus controller not implemented on this platform"))
    }

    fn close_window(&self) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("focus controller not implemented on this platform"))
    }
}
