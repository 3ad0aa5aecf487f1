use std::fmt;
use std::str::FromStr;

/// Viewer-facing transport controls, one per button of the player UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewerCommand {
    Play,
    Pause,
    SpeedUp,
    SpeedDown,
    SeekBack,
    SeekForward,
    FrameNext,
    FramePrev,
    EnterPlayback,
    ReturnToLive,
}

impl ViewerCommand {
    pub const ALL: [ViewerCommand; 10] = [
        Self::Play,
        Self::Pause,
        Self::SpeedUp,
        Self::SpeedDown,
        Self::SeekBack,
        Self::SeekForward,
        Self::FrameNext,
        Self::FramePrev,
        Self::EnterPlayback,
        Self::ReturnToLive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Play => "play",
            Self::Pause => "pause",
            Self::SpeedUp => "speed-up",
            Self::SpeedDown => "speed-down",
            Self::SeekBack => "seek-back",
            Self::SeekForward => "seek-forward",
            Self::FrameNext => "frame-next",
            Self::FramePrev => "frame-prev",
            Self::EnterPlayback => "playback",
            Self::ReturnToLive => "live",
        }
    }
}

impl fmt::Display for ViewerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ViewerCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        let command = match normalized.as_str() {
            "play" => Self::Play,
            "pause" => Self::Pause,
            "speed-up" | "speedup" | "faster" | "+" => Self::SpeedUp,
            "speed-down" | "speeddown" | "slower" | "-" => Self::SpeedDown,
            "seek-back" | "back" | "-5s" => Self::SeekBack,
            "seek-forward" | "forward" | "+5s" => Self::SeekForward,
            "frame-next" | "frame+" => Self::FrameNext,
            "frame-prev" | "frame-" => Self::FramePrev,
            "playback" | "enter-playback" => Self::EnterPlayback,
            "live" | "return-to-live" => Self::ReturnToLive,
            "" => return Err("empty command".into()),
            other => return Err(format!("unknown command `{other}`")),
        };
        Ok(command)
    }
}
