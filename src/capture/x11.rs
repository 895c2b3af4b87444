//! X11/WSLg backends: `xclip` for the clipboard, `xdotool` for the copy keystroke.
//! Tool availability is probed once at construction.

use std::io::Write;
use std::process::{Command, Stdio};

use tracing::{info, warn};

use super::{ClipboardError, ClipboardPort, CopyTrigger};

pub struct XclipClipboard {
    available: bool,
}

impl XclipClipboard {
    pub fn new() -> Self {
        let available = probe_command("xclip");
        if !available {
            warn!("xclip not found; clipboard capture will be unavailable");
        }
        Self { available }
    }

    fn ensure(&self) -> Result<(), ClipboardError> {
        if self.available {
            Ok(())
        } else {
            Err(ClipboardError::ToolMissing("xclip".into()))
        }
    }

    fn write(&self, content: &str) -> Result<(), ClipboardError> {
        self.ensure()?;
        let mut child = Command::new("xclip")
            .args(["-selection", "clipboard", "-i"])
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|e| tool_error("xclip", format!("spawn: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(content.as_bytes())
                .map_err(|e| tool_error("xclip", format!("write: {e}")))?;
        }

        let status = child
            .wait()
            .map_err(|e| tool_error("xclip", format!("wait: {e}")))?;
        if !status.success() {
            return Err(tool_error("xclip", format!("exited with {status}")));
        }
        Ok(())
    }
}

impl Default for XclipClipboard {
    fn default() -> Self {
        Self::new()
    }
}

impl ClipboardPort for XclipClipboard {
    fn get_text(&self) -> Result<Option<String>, ClipboardError> {
        self.ensure()?;
        let output = Command::new("xclip")
            .args(["-selection", "clipboard", "-o"])
            .output()
            .map_err(|e| tool_error("xclip", format!("exec: {e}")))?;

        read_outcome(output.status.success(), &output.stdout, &output.stderr)
    }

    fn set_text(&self, text: &str) -> Result<(), ClipboardError> {
        self.write(text)
    }

    fn clear(&self) -> Result<(), ClipboardError> {
        self.write("")
    }
}

pub struct XdotoolCopy {
    available: bool,
}

impl XdotoolCopy {
    pub fn new() -> Self {
        let available = probe_command("xdotool");
        if available {
            info!("copy trigger: xdotool available");
        } else {
            warn!("xdotool not found; clipboard capture will be unavailable");
        }
        Self { available }
    }
}

impl Default for XdotoolCopy {
    fn default() -> Self {
        Self::new()
    }
}

impl CopyTrigger for XdotoolCopy {
    fn send_copy(&self) -> Result<(), ClipboardError> {
        if !self.available {
            return Err(ClipboardError::ToolMissing("xdotool".into()));
        }
        // --clearmodifiers releases the hotkey's own modifiers for the keystroke.
        let output = Command::new("xdotool")
            .args(["key", "--clearmodifiers", "ctrl+c"])
            .output()
            .map_err(|e| tool_error("xdotool", format!("exec: {e}")))?;
        if !output.status.success() {
            return Err(tool_error(
                "xdotool",
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }
}

/// Interpret one `xclip -o` run. A non-zero exit means "no text" only when xclip says
/// the selection has no text target; anything else (no display, no X server) is an error.
fn read_outcome(
    success: bool,
    stdout: &[u8],
    stderr: &[u8],
) -> Result<Option<String>, ClipboardError> {
    if success {
        let text = String::from_utf8_lossy(stdout).into_owned();
        return Ok(if text.is_empty() { None } else { Some(text) });
    }
    let message = String::from_utf8_lossy(stderr).trim().to_string();
    // "Error: target STRING not available", or a silent exit on an unowned selection.
    if message.is_empty() || message.contains("not available") {
        return Ok(None);
    }
    Err(tool_error("xclip", message))
}

fn tool_error(tool: &'static str, message: String) -> ClipboardError {
    ClipboardError::Tool { tool, message }
}

/// Whether `name` resolves on PATH.
pub fn probe_command(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_tools_report_tool_missing() {
        let clip = XclipClipboard { available: false };
        assert!(matches!(clip.get_text(), Err(ClipboardError::ToolMissing(_))));
        assert!(matches!(clip.clear(), Err(ClipboardError::ToolMissing(_))));

        let copy = XdotoolCopy { available: false };
        assert!(matches!(copy.send_copy(), Err(ClipboardError::ToolMissing(_))));
    }

    #[test]
    fn read_outcome_separates_empty_from_broken() {
        assert_eq!(read_outcome(true, b"hi\n", b"").unwrap().as_deref(), Some("hi\n"));
        assert_eq!(read_outcome(true, b"", b"").unwrap(), None);
        assert_eq!(
            read_outcome(false, b"", b"Error: target STRING not available\n").unwrap(),
            None
        );
        assert_eq!(read_outcome(false, b"", b"").unwrap(), None);

        let err = read_outcome(false, b"", b"Error: Can't open display: :0\n").unwrap_err();
        assert!(matches!(
            err,
            ClipboardError::Tool { tool: "xclip", ref message } if message.contains("open display")
        ));
    }

    #[test]
    fn probe_rejects_nonexistent_command() {
        assert!(!probe_command("snaptrans-definitely-not-installed"));
    }
}
