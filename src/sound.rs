//! Sound cues for notable dashboard transitions

use log::debug;
use std::process::{Command, Stdio};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    /// An agent appeared in a session roster for the first time
    AgentSpawned,
}

pub trait SoundPlayer: Send + Sync {
    fn play(&self, cue: Cue);
}

/// Plays nothing, for `--no-sound` and headless runs
#[derive(Debug, Default, Clone, Copy)]
pub struct Silent;

impl SoundPlayer for Silent {
    fn play(&self, _cue: Cue) {}
}

/// Spawns the platform's sound command without waiting for it
#[derive(Debug, Clone)]
pub struct SystemPlayer {
    program: &'static str,
    sound_file: &'static str,
}

impl SystemPlayer {
    /// `None` on platforms without a known player
    pub fn detect() -> Option<Self> {
        if cfg!(target_os = "macos") {
            Some(Self {
                program: "afplay",
                sound_file: "/System/Library/Sounds/Glass.aiff",
            })
        } else if cfg!(target_os = "linux") {
            Some(Self {
                program: "paplay",
                sound_file: "/usr/share/sounds/freedesktop/stereo/message.oga",
            })
        } else {
            None
        }
    }
}

impl SoundPlayer for SystemPlayer {
    fn play(&self, cue: Cue) {
        let spawned = Command::new(self.program)
            .arg(self.sound_file)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        match spawned {
            // Reap in the background so no zombie is left behind
            Ok(mut child) => {
                std::thread::spawn(move || {
                    let _ = child.wait();
                });
            }
            Err(e) => debug!("Sound cue {:?} not played: {}", cue, e),
        }
    }
}
